//! Submission extraction and result packaging.
//!
//! Submissions arrive as zip, tar or gzip-compressed tar bundles; the format
//! is sniffed from the leading bytes rather than trusted from the file
//! extension. Results leave as a deterministic `.tar.gz`.

pub mod package;
pub mod unpack;

pub use package::{
    ArchiveMember, PackagedMember, read_result_archive, write_result_archive,
};
pub use unpack::{extract, list_entries};

use std::{
    fs::File,
    io::{self, Read},
    path::{Component, Path, PathBuf},
};

use thiserror::Error;

/// Errors raised while reading submissions or writing result archives.
#[derive(Debug, Error)]
pub enum ArchiveError {
    /// The submission path does not name a regular file.
    #[error("archive not found: {path}")]
    NotFound {
        /// Path that was looked up.
        path: PathBuf,
    },
    /// The leading bytes match none of the accepted containers.
    #[error("unsupported archive format: {path} (expected zip, tar or tar.gz)")]
    UnsupportedFormat {
        /// Offending archive.
        path: PathBuf,
    },
    /// A member name is absolute or climbs out with `..`.
    #[error("archive entry '{entry}' escapes the extraction directory")]
    UnsafePath {
        /// Member name as stored in the archive.
        entry: String,
    },
    /// A member is a link, device or other special file.
    #[error("archive entry '{entry}' is not a regular file or directory")]
    UnsupportedEntry {
        /// Member name as stored in the archive.
        entry: String,
    },
    /// The zip central directory or a member could not be decoded.
    #[error("failed to read zip archive {path}")]
    Zip {
        /// Archive being read.
        path: PathBuf,
        /// Decoder error.
        #[source]
        source: zip::result::ZipError,
    },
    /// Reading or writing a file failed.
    #[error("i/o error on {path}")]
    Io {
        /// File or directory involved.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: io::Error,
    },
}

impl ArchiveError {
    pub(crate) fn io(path: &Path) -> impl FnOnce(io::Error) -> Self + '_ {
        move |source| Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Container formats accepted for submissions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
    /// PKZIP, stored or deflated members.
    Zip,
    /// Uncompressed ustar or GNU tar.
    Tar,
    /// Tar wrapped in gzip.
    TarGz,
}

impl ArchiveFormat {
    /// Short name used in `subrun inspect` output.
    pub fn label(self) -> &'static str {
        match self {
            ArchiveFormat::Zip => "zip",
            ArchiveFormat::Tar => "tar",
            ArchiveFormat::TarGz => "tar.gz",
        }
    }
}

const ZIP_LOCAL_HEADER: &[u8] = b"PK\x03\x04";
const ZIP_EMPTY_ARCHIVE: &[u8] = b"PK\x05\x06";
const GZIP_MAGIC: &[u8] = &[0x1f, 0x8b];
const USTAR_OFFSET: usize = 257;
const USTAR_MAGIC: &[u8] = b"ustar";

/// Identify the archive format of `path` from its magic bytes.
pub fn detect_format(path: &Path) -> Result<ArchiveFormat, ArchiveError> {
    if !path.is_file() {
        return Err(ArchiveError::NotFound {
            path: path.to_path_buf(),
        });
    }

    let mut head = Vec::with_capacity(512);
    File::open(path)
        .and_then(|file| file.take(512).read_to_end(&mut head))
        .map_err(ArchiveError::io(path))?;

    sniff(&head).ok_or_else(|| ArchiveError::UnsupportedFormat {
        path: path.to_path_buf(),
    })
}

fn sniff(head: &[u8]) -> Option<ArchiveFormat> {
    if head.starts_with(ZIP_LOCAL_HEADER) || head.starts_with(ZIP_EMPTY_ARCHIVE)
    {
        Some(ArchiveFormat::Zip)
    } else if head.starts_with(GZIP_MAGIC) {
        Some(ArchiveFormat::TarGz)
    } else if head
        .get(USTAR_OFFSET..USTAR_OFFSET + USTAR_MAGIC.len())
        .is_some_and(|magic| magic == USTAR_MAGIC)
    {
        Some(ArchiveFormat::Tar)
    } else {
        None
    }
}

/// Normalize an archive member name into a relative path.
///
/// Backslashes are treated as separators and `.` segments are dropped.
/// Returns `None` for absolute paths, drive prefixes, NUL bytes and any
/// `..` segment. A name that normalizes to nothing (such as `./`) yields an
/// empty path.
pub fn normalize_entry_path(raw: &str) -> Option<PathBuf> {
    if raw.contains('\0') {
        return None;
    }
    let unified = raw.replace('\\', "/");
    if unified.starts_with('/') {
        return None;
    }
    let bytes = unified.as_bytes();
    if bytes.len() >= 2 && bytes[1] == b':' && bytes[0].is_ascii_alphabetic()
    {
        return None;
    }

    let mut out = PathBuf::new();
    for component in Path::new(&unified).components() {
        match component {
            Component::Normal(segment) => out.push(segment),
            Component::CurDir => {}
            Component::ParentDir
            | Component::RootDir
            | Component::Prefix(_) => return None,
        }
    }
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sniff_recognises_containers() {
        assert_eq!(sniff(b"PK\x03\x04rest"), Some(ArchiveFormat::Zip));
        assert_eq!(sniff(b"PK\x05\x06"), Some(ArchiveFormat::Zip));
        assert_eq!(sniff(&[0x1f, 0x8b, 0x08]), Some(ArchiveFormat::TarGz));

        let mut tar_head = vec![0u8; 512];
        tar_head[USTAR_OFFSET..USTAR_OFFSET + 5].copy_from_slice(b"ustar");
        assert_eq!(sniff(&tar_head), Some(ArchiveFormat::Tar));

        assert_eq!(sniff(b"plain text"), None);
        assert_eq!(sniff(&[]), None);
    }

    #[test]
    fn normalize_keeps_nested_relative_paths() {
        assert_eq!(
            normalize_entry_path("./submission/main.py"),
            Some(PathBuf::from("submission/main.py"))
        );
        assert_eq!(
            normalize_entry_path("dir\\query_descriptors.npz"),
            Some(PathBuf::from("dir/query_descriptors.npz"))
        );
        assert_eq!(normalize_entry_path("./"), Some(PathBuf::new()));
    }

    #[test]
    fn normalize_rejects_escapes() {
        assert_eq!(normalize_entry_path("../outside.txt"), None);
        assert_eq!(normalize_entry_path("a/../../b"), None);
        assert_eq!(normalize_entry_path("/etc/passwd"), None);
        assert_eq!(normalize_entry_path("C:\\temp\\x"), None);
        assert_eq!(normalize_entry_path("bad\0name"), None);
    }

    #[test]
    fn detect_reports_missing_file() {
        let err = detect_format(Path::new("/nonexistent/submission.zip"))
            .expect_err("missing");
        assert!(matches!(err, ArchiveError::NotFound { .. }));
    }
}
