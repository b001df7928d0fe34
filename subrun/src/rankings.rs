//! Rankings file helpers.

use std::{
    fs::{self, File},
    io::{self, BufRead, BufReader},
    path::Path,
};

/// Header row every rankings CSV starts with.
pub const RANKINGS_HEADER: &str = "query_id,reference_id,score";

/// Write a header-only rankings file, replacing whatever was at `path`.
pub fn write_placeholder(path: &Path) -> io::Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, format!("{RANKINGS_HEADER}\n"))
}

/// Number of non-blank rows after the header.
pub fn count_data_rows(path: &Path) -> io::Result<usize> {
    let reader = BufReader::new(File::open(path)?);
    let mut rows = 0;
    for line in reader.lines().skip(1) {
        if !line?.trim().is_empty() {
            rows += 1;
        }
    }
    Ok(rows)
}

/// `true` when `path` holds the header and nothing else.
pub fn is_placeholder(path: &Path) -> io::Result<bool> {
    let text = fs::read_to_string(path)?;
    Ok(text.trim_end() == RANKINGS_HEADER)
}
