//! Deterministic result archive.

use std::{
    collections::BTreeMap,
    fs::{self, File},
    io::Read,
    path::{Path, PathBuf},
};

use flate2::{Compression, GzBuilder, read::GzDecoder};
use serde::Serialize;
use sha2::{Digest, Sha256};
use tempfile::NamedTempFile;

use super::ArchiveError;
use crate::util::parent_or_cwd;

const MEMBER_MODE: u32 = 0o644;

/// A file to place in the result archive under `name`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveMember {
    /// Path of the member inside the archive.
    pub name: String,
    /// File whose bytes are stored.
    pub source: PathBuf,
}

impl ArchiveMember {
    /// Member named after the source file itself.
    pub fn from_path(source: &Path) -> Self {
        let name = source
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| source.display().to_string());
        Self {
            name,
            source: source.to_path_buf(),
        }
    }
}

/// What actually went into the archive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PackagedMember {
    /// Member name.
    pub name: String,
    /// Uncompressed size.
    pub bytes: u64,
    /// Lowercase hex SHA-256 of the member contents.
    pub sha256: String,
}

impl PackagedMember {
    /// Size and digest of `data` stored as `name`.
    pub fn from_bytes(name: impl Into<String>, data: &[u8]) -> Self {
        Self {
            name: name.into(),
            bytes: data.len() as u64,
            sha256: format!("{:x}", Sha256::digest(data)),
        }
    }
}

/// Write `members` (in order) into a gzip-compressed tar at `dest`.
///
/// Headers carry a fixed mode, owner and mtime so identical inputs produce
/// identical bytes. The archive is assembled in a temporary file next to
/// `dest` and renamed into place only once complete, so an earlier archive
/// is either kept intact or fully replaced.
pub fn write_result_archive(
    dest: &Path,
    members: &[ArchiveMember],
) -> Result<Vec<PackagedMember>, ArchiveError> {
    let dir = parent_or_cwd(dest);
    fs::create_dir_all(&dir).map_err(ArchiveError::io(&dir))?;
    let tmp = NamedTempFile::new_in(&dir).map_err(ArchiveError::io(&dir))?;

    let encoder = GzBuilder::new()
        .mtime(0)
        .write(tmp.as_file(), Compression::default());
    let mut builder = tar::Builder::new(encoder);
    let mut packaged = Vec::with_capacity(members.len());

    for member in members {
        let data = fs::read(&member.source)
            .map_err(ArchiveError::io(&member.source))?;

        let mut header = tar::Header::new_gnu();
        header.set_entry_type(tar::EntryType::Regular);
        header.set_size(data.len() as u64);
        header.set_mode(MEMBER_MODE);
        header.set_mtime(0);
        header.set_uid(0);
        header.set_gid(0);
        builder
            .append_data(&mut header, &member.name, data.as_slice())
            .map_err(ArchiveError::io(dest))?;

        packaged.push(PackagedMember::from_bytes(member.name.as_str(), &data));
    }

    builder
        .into_inner()
        .and_then(|encoder| encoder.finish())
        .map_err(ArchiveError::io(dest))?;
    tmp.as_file().sync_all().map_err(ArchiveError::io(dest))?;
    set_readable(tmp.path()).map_err(ArchiveError::io(dest))?;

    tmp.persist(dest).map_err(|err| ArchiveError::Io {
        path: dest.to_path_buf(),
        source: err.error,
    })?;

    Ok(packaged)
}

#[cfg(unix)]
fn set_readable(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(MEMBER_MODE))
}

#[cfg(not(unix))]
fn set_readable(_path: &Path) -> std::io::Result<()> {
    Ok(())
}

/// Read every regular member of a result archive into memory.
pub fn read_result_archive(
    path: &Path,
) -> Result<BTreeMap<String, Vec<u8>>, ArchiveError> {
    let file = File::open(path).map_err(ArchiveError::io(path))?;
    let mut tar = tar::Archive::new(GzDecoder::new(file));
    let mut members = BTreeMap::new();

    for entry in tar.entries().map_err(ArchiveError::io(path))? {
        let mut entry = entry.map_err(ArchiveError::io(path))?;
        if !entry.header().entry_type().is_file() {
            continue;
        }
        let name = entry
            .path()
            .map_err(ArchiveError::io(path))?
            .to_string_lossy()
            .into_owned();
        let mut data = Vec::new();
        entry.read_to_end(&mut data).map_err(ArchiveError::io(path))?;
        members.insert(name, data);
    }

    Ok(members)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seed(dir: &Path, name: &str, body: &str) -> ArchiveMember {
        let path = dir.join(name);
        fs::write(&path, body).expect("seed member");
        ArchiveMember::from_path(&path)
    }

    #[test]
    fn archive_contains_members_with_digests() {
        let dir = tempfile::tempdir().expect("tempdir");
        let members = vec![
            seed(
                dir.path(),
                "full_rankings.csv",
                "query_id,reference_id,score\nq1,r1,0.9\n",
            ),
            seed(
                dir.path(),
                "subset_rankings.csv",
                "query_id,reference_id,score\n",
            ),
        ];
        let dest = dir.path().join("out/submission.tar.gz");

        let packaged =
            write_result_archive(&dest, &members).expect("write archive");
        assert_eq!(packaged.len(), 2);
        assert_eq!(packaged[0].name, "full_rankings.csv");
        assert_eq!(packaged[1].bytes, 28);
        assert_eq!(packaged[0].sha256.len(), 64);

        let contents = read_result_archive(&dest).expect("read archive");
        assert_eq!(
            contents.get("subset_rankings.csv").map(Vec::as_slice),
            Some(b"query_id,reference_id,score\n".as_slice())
        );
        assert!(contents.contains_key("full_rankings.csv"));
    }

    #[test]
    fn repackaging_is_byte_identical() {
        let dir = tempfile::tempdir().expect("tempdir");
        let members = vec![seed(
            dir.path(),
            "full_rankings.csv",
            "query_id,reference_id,score\n",
        )];

        let first = dir.path().join("a.tar.gz");
        let second = dir.path().join("b.tar.gz");
        write_result_archive(&first, &members).expect("first");
        write_result_archive(&second, &members).expect("second");

        assert_eq!(
            fs::read(&first).expect("first bytes"),
            fs::read(&second).expect("second bytes")
        );
    }

    #[test]
    fn failed_packaging_keeps_previous_archive() {
        let dir = tempfile::tempdir().expect("tempdir");
        let dest = dir.path().join("submission.tar.gz");
        fs::write(&dest, b"previous archive").expect("seed previous");

        let missing = ArchiveMember::from_path(&dir.path().join("gone.csv"));
        let err = write_result_archive(&dest, &[missing])
            .expect_err("missing member");
        assert!(matches!(err, ArchiveError::Io { .. }));
        assert_eq!(fs::read(&dest).expect("read"), b"previous archive");
    }
}
