//! Submission extraction.

use std::{
    fs::{self, File},
    io::{self, Read},
    path::{Path, PathBuf},
};

use flate2::read::GzDecoder;
use tar::EntryType;

use super::{ArchiveError, ArchiveFormat, detect_format, normalize_entry_path};

const UNIX_FILE_TYPE_MASK: u32 = 0o170000;
const UNIX_SYMLINK: u32 = 0o120000;

/// Extract `archive` into `dest`, returning the files written.
///
/// Entries are written relative to `dest`; any member that would land
/// outside it, or that is a link or special file, aborts the extraction.
pub fn extract(
    archive: &Path,
    dest: &Path,
) -> Result<Vec<PathBuf>, ArchiveError> {
    let format = detect_format(archive)?;
    fs::create_dir_all(dest).map_err(ArchiveError::io(dest))?;

    match format {
        ArchiveFormat::Zip => extract_zip(archive, dest),
        ArchiveFormat::Tar => {
            let file = File::open(archive).map_err(ArchiveError::io(archive))?;
            extract_tar(file, archive, dest)
        }
        ArchiveFormat::TarGz => {
            let file = File::open(archive).map_err(ArchiveError::io(archive))?;
            extract_tar(GzDecoder::new(file), archive, dest)
        }
    }
}

/// List the file members of `archive` (normalized, directories omitted)
/// without extracting anything.
pub fn list_entries(archive: &Path) -> Result<Vec<String>, ArchiveError> {
    let mut names = Vec::new();
    match detect_format(archive)? {
        ArchiveFormat::Zip => {
            let mut zip = open_zip(archive)?;
            for index in 0..zip.len() {
                let entry = zip.by_index(index).map_err(zip_error(archive))?;
                if entry.is_dir() {
                    continue;
                }
                names.push(normalized_name(entry.name())?);
            }
        }
        ArchiveFormat::Tar => {
            let file = File::open(archive).map_err(ArchiveError::io(archive))?;
            list_tar(file, archive, &mut names)?;
        }
        ArchiveFormat::TarGz => {
            let file = File::open(archive).map_err(ArchiveError::io(archive))?;
            list_tar(GzDecoder::new(file), archive, &mut names)?;
        }
    }
    Ok(names)
}

fn extract_zip(
    archive: &Path,
    dest: &Path,
) -> Result<Vec<PathBuf>, ArchiveError> {
    let mut zip = open_zip(archive)?;
    let mut written = Vec::new();

    for index in 0..zip.len() {
        let mut entry = zip.by_index(index).map_err(zip_error(archive))?;
        let name = entry.name().to_string();

        if entry
            .unix_mode()
            .is_some_and(|mode| mode & UNIX_FILE_TYPE_MASK == UNIX_SYMLINK)
        {
            return Err(ArchiveError::UnsupportedEntry { entry: name });
        }

        let relative = normalize_entry_path(&name)
            .ok_or_else(|| ArchiveError::UnsafePath { entry: name.clone() })?;
        if relative.as_os_str().is_empty() {
            continue;
        }
        let target = dest.join(&relative);

        if entry.is_dir() {
            fs::create_dir_all(&target).map_err(ArchiveError::io(&target))?;
            continue;
        }

        write_member(&mut entry, &target)?;
        written.push(target);
    }

    Ok(written)
}

fn extract_tar<R: Read>(
    reader: R,
    archive: &Path,
    dest: &Path,
) -> Result<Vec<PathBuf>, ArchiveError> {
    let mut tar = tar::Archive::new(reader);
    let mut written = Vec::new();

    for entry in tar.entries().map_err(ArchiveError::io(archive))? {
        let mut entry = entry.map_err(ArchiveError::io(archive))?;
        let entry_type = entry.header().entry_type();
        if is_metadata_entry(entry_type) {
            continue;
        }

        let name = entry
            .path()
            .map_err(ArchiveError::io(archive))?
            .to_string_lossy()
            .into_owned();
        let relative = normalize_entry_path(&name)
            .ok_or_else(|| ArchiveError::UnsafePath { entry: name.clone() })?;
        if relative.as_os_str().is_empty() {
            continue;
        }
        let target = dest.join(&relative);

        if entry_type.is_dir() {
            fs::create_dir_all(&target).map_err(ArchiveError::io(&target))?;
        } else if entry_type.is_file() {
            write_member(&mut entry, &target)?;
            written.push(target);
        } else {
            return Err(ArchiveError::UnsupportedEntry { entry: name });
        }
    }

    Ok(written)
}

fn list_tar<R: Read>(
    reader: R,
    archive: &Path,
    names: &mut Vec<String>,
) -> Result<(), ArchiveError> {
    let mut tar = tar::Archive::new(reader);
    for entry in tar.entries().map_err(ArchiveError::io(archive))? {
        let entry = entry.map_err(ArchiveError::io(archive))?;
        let entry_type = entry.header().entry_type();
        if is_metadata_entry(entry_type) || entry_type.is_dir() {
            continue;
        }
        let name = entry
            .path()
            .map_err(ArchiveError::io(archive))?
            .to_string_lossy()
            .into_owned();
        names.push(normalized_name(&name)?);
    }
    Ok(())
}

/// Pax and GNU long-name records describe the following entry.
fn is_metadata_entry(entry_type: EntryType) -> bool {
    entry_type.is_pax_global_extensions()
        || entry_type.is_pax_local_extensions()
        || entry_type.is_gnu_longname()
        || entry_type.is_gnu_longlink()
}

fn normalized_name(raw: &str) -> Result<String, ArchiveError> {
    normalize_entry_path(raw)
        .map(|p| p.to_string_lossy().into_owned())
        .ok_or_else(|| ArchiveError::UnsafePath {
            entry: raw.to_string(),
        })
}

fn write_member(
    reader: &mut impl Read,
    target: &Path,
) -> Result<(), ArchiveError> {
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent).map_err(ArchiveError::io(parent))?;
    }
    let mut out = File::create(target).map_err(ArchiveError::io(target))?;
    io::copy(reader, &mut out).map_err(ArchiveError::io(target))?;
    Ok(())
}

fn open_zip(archive: &Path) -> Result<zip::ZipArchive<File>, ArchiveError> {
    let file = File::open(archive).map_err(ArchiveError::io(archive))?;
    zip::ZipArchive::new(file).map_err(zip_error(archive))
}

fn zip_error(
    archive: &Path,
) -> impl FnOnce(zip::result::ZipError) -> ArchiveError + '_ {
    move |source| ArchiveError::Zip {
        path: archive.to_path_buf(),
        source,
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use flate2::{Compression, write::GzEncoder};
    use zip::write::SimpleFileOptions;

    use super::*;

    fn write_zip(path: &Path, members: &[(&str, &[u8])]) {
        let file = File::create(path).expect("create zip");
        let mut zip = zip::ZipWriter::new(file);
        let options = SimpleFileOptions::default()
            .compression_method(zip::CompressionMethod::Stored);
        for (name, data) in members {
            zip.start_file(*name, options).expect("start file");
            zip.write_all(data).expect("write member");
        }
        zip.finish().expect("finish zip");
    }

    fn append_file<W: Write>(
        builder: &mut tar::Builder<W>,
        name: &str,
        data: &[u8],
    ) {
        let mut header = tar::Header::new_gnu();
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        builder.append_data(&mut header, name, data).expect("append");
    }

    fn write_tar_gz(path: &Path, members: &[(&str, &[u8])]) {
        let file = File::create(path).expect("create tar.gz");
        let mut builder =
            tar::Builder::new(GzEncoder::new(file, Compression::default()));
        for (name, data) in members {
            append_file(&mut builder, name, data);
        }
        builder
            .into_inner()
            .expect("tar finish")
            .finish()
            .expect("gzip finish");
    }

    #[test]
    fn extracts_zip_members_into_dest() {
        let dir = tempfile::tempdir().expect("tempdir");
        let archive = dir.path().join("submission.zip");
        write_zip(
            &archive,
            &[
                ("main.py", b"print('hi')\n"),
                ("nested/reference_descriptors.npz", b"ref"),
            ],
        );

        let dest = dir.path().join("src");
        let written = extract(&archive, &dest).expect("extract");
        assert_eq!(written.len(), 2);
        assert_eq!(
            fs::read(dest.join("main.py")).expect("main.py"),
            b"print('hi')\n"
        );
        assert_eq!(
            fs::read(dest.join("nested/reference_descriptors.npz"))
                .expect("nested"),
            b"ref"
        );
    }

    #[test]
    fn extracts_tar_gz_members_into_dest() {
        let dir = tempfile::tempdir().expect("tempdir");
        let archive = dir.path().join("submission.tar.gz");
        write_tar_gz(&archive, &[("query_descriptors.npz", b"query")]);

        let dest = dir.path().join("src");
        let written = extract(&archive, &dest).expect("extract");
        assert_eq!(written, vec![dest.join("query_descriptors.npz")]);
        assert_eq!(
            fs::read(dest.join("query_descriptors.npz")).expect("query"),
            b"query"
        );
    }

    #[test]
    fn zip_traversal_is_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let archive = dir.path().join("evil.zip");
        write_zip(&archive, &[("../escaped.txt", b"nope")]);

        let err = extract(&archive, &dir.path().join("src"))
            .expect_err("traversal");
        assert!(matches!(err, ArchiveError::UnsafePath { .. }));
        assert!(!dir.path().join("escaped.txt").exists());
    }

    #[test]
    fn extracts_plain_tar_members_into_dest() {
        let dir = tempfile::tempdir().expect("tempdir");
        let archive = dir.path().join("submission.tar");
        let mut builder =
            tar::Builder::new(File::create(&archive).expect("create tar"));
        append_file(&mut builder, "main.py", b"print()\n");
        append_file(&mut builder, "data/reference_descriptors.npz", b"ref");
        builder.finish().expect("tar finish");

        let dest = dir.path().join("src");
        let written = extract(&archive, &dest).expect("extract");
        assert_eq!(
            written,
            vec![
                dest.join("main.py"),
                dest.join("data/reference_descriptors.npz"),
            ]
        );
        assert_eq!(
            fs::read(dest.join("main.py")).expect("main.py"),
            b"print()\n"
        );
    }

    #[test]
    fn tar_links_are_rejected() {
        for entry_type in [EntryType::Symlink, EntryType::Link] {
            let dir = tempfile::tempdir().expect("tempdir");
            let archive = dir.path().join("submission.tar");
            let mut builder =
                tar::Builder::new(File::create(&archive).expect("create tar"));
            let mut header = tar::Header::new_gnu();
            header.set_entry_type(entry_type);
            header.set_size(0);
            header.set_mode(0o777);
            builder
                .append_link(&mut header, "query_descriptors.npz", "main.py")
                .expect("append link");
            builder.finish().expect("tar finish");

            let dest = dir.path().join("src");
            let err = extract(&archive, &dest).expect_err("link entry");
            assert!(
                matches!(
                    &err,
                    ArchiveError::UnsupportedEntry { entry }
                        if entry == "query_descriptors.npz"
                ),
                "{entry_type:?}: {err}"
            );
            assert!(
                fs::symlink_metadata(dest.join("query_descriptors.npz")).is_err()
            );
        }
    }

    #[test]
    fn zip_symlink_is_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let archive = dir.path().join("submission.zip");
        let mut zip =
            zip::ZipWriter::new(File::create(&archive).expect("create zip"));
        zip.add_symlink(
            "reference_descriptors.npz",
            "/etc/passwd",
            SimpleFileOptions::default(),
        )
        .expect("add symlink");
        zip.finish().expect("finish zip");

        let dest = dir.path().join("src");
        let err = extract(&archive, &dest).expect_err("symlink entry");
        assert!(matches!(err, ArchiveError::UnsupportedEntry { .. }), "{err}");
        assert!(
            fs::symlink_metadata(dest.join("reference_descriptors.npz")).is_err()
        );
    }

    #[test]
    fn corrupt_archive_is_unsupported() {
        let dir = tempfile::tempdir().expect("tempdir");
        let archive = dir.path().join("submission.zip");
        fs::write(&archive, b"this is not an archive").expect("write");
        let err = extract(&archive, &dir.path().join("src"))
            .expect_err("corrupt");
        assert!(matches!(err, ArchiveError::UnsupportedFormat { .. }));
    }

    #[test]
    fn truncated_zip_reports_zip_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let archive = dir.path().join("submission.zip");
        fs::write(&archive, b"PK\x03\x04truncated").expect("write");
        let err = extract(&archive, &dir.path().join("src"))
            .expect_err("truncated");
        assert!(matches!(err, ArchiveError::Zip { .. }));
    }

    #[test]
    fn lists_members_without_extracting() {
        let dir = tempfile::tempdir().expect("tempdir");
        let archive = dir.path().join("submission.zip");
        write_zip(
            &archive,
            &[("./main.py", b"x"), ("query_descriptors.npz", b"q")],
        );
        let names = list_entries(&archive).expect("list");
        assert_eq!(names, vec!["main.py", "query_descriptors.npz"]);
    }
}
