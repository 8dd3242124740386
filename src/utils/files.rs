use std::cmp::Ordering;
use std::fs;
use std::io::{self, BufWriter, Read, Write};
use std::path::{Component, Path, PathBuf};

use tempfile::NamedTempFile;

use crate::constants::EXTRACT_BUFFER_SIZE;

/// Map an object key to its path below the download root.
///
/// The first key segment (the top-level bucket folder) is dropped and the
/// rest of the structure kept; a single-segment key is kept whole. Returns
/// `None` for keys that would escape the root or name no file.
pub fn relative_key_path(key: &str) -> Option<PathBuf> {
    let segments: Vec<&str> = key.split('/').collect();
    let remainder = if segments.len() > 1 { &segments[1..] } else { &segments[..] };

    let mut path = PathBuf::new();
    for segment in remainder {
        match *segment {
            "" | "." => continue,
            ".." => return None,
            s if s.contains('\\') || Path::new(s).is_absolute() => return None,
            s => path.push(s),
        }
    }

    if path.as_os_str().is_empty() {
        None
    } else {
        Some(path)
    }
}

/// True when `path` has no parent-dir, root or prefix components
pub fn is_contained_relative(path: &Path) -> bool {
    !path.as_os_str().is_empty()
        && path
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
}

/// Case-insensitive extension check
pub fn has_extension(path: &Path, extensions: &[&str]) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| extensions.iter().any(|x| x.eq_ignore_ascii_case(e)))
        .unwrap_or(false)
}

/// File name as UTF-8, lossily
pub fn file_name_lossy(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default()
}

/// Compare names so that runs of digits order by value: `data_9` < `data_10`.
///
/// Leading zeros only break ties, everything else compares bytewise.
pub fn natural_cmp(a: &str, b: &str) -> Ordering {
    let (mut a, mut b) = (a.as_bytes(), b.as_bytes());
    loop {
        match (a.first(), b.first()) {
            (None, None) => return Ordering::Equal,
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(x), Some(y)) if x.is_ascii_digit() && y.is_ascii_digit() => {
                let run_a = a.iter().take_while(|c| c.is_ascii_digit()).count();
                let run_b = b.iter().take_while(|c| c.is_ascii_digit()).count();
                let value_a = trim_leading_zeros(&a[..run_a]);
                let value_b = trim_leading_zeros(&b[..run_b]);
                let order = value_a
                    .len()
                    .cmp(&value_b.len())
                    .then_with(|| value_a.cmp(value_b))
                    .then_with(|| run_a.cmp(&run_b));
                if order != Ordering::Equal {
                    return order;
                }
                a = &a[run_a..];
                b = &b[run_b..];
            }
            (Some(x), Some(y)) => {
                if x != y {
                    return x.cmp(y);
                }
                a = &a[1..];
                b = &b[1..];
            }
        }
    }
}

fn trim_leading_zeros(digits: &[u8]) -> &[u8] {
    let zeros = digits.iter().take_while(|&&c| c == b'0').count();
    &digits[zeros..]
}

/// Stream `reader` into `dest` through a temporary sibling file.
///
/// `dest` only ever appears complete: an interrupted copy leaves nothing at
/// the destination, so a later skip-if-exists check cannot mistake a
/// half-written file for a finished one.
pub fn write_atomic<R: Read>(reader: &mut R, dest: &Path) -> io::Result<u64> {
    let parent = dest.parent().ok_or_else(|| {
        io::Error::new(io::ErrorKind::InvalidInput, format!("no parent directory for {}", dest.display()))
    })?;
    fs::create_dir_all(parent)?;

    let temp = NamedTempFile::new_in(parent)?;
    let mut writer = BufWriter::with_capacity(EXTRACT_BUFFER_SIZE, temp);
    let written = io::copy(reader, &mut writer)?;
    writer.flush()?;

    let temp = writer.into_inner().map_err(|e| e.into_error())?;
    temp.persist(dest).map_err(|e| e.error)?;
    Ok(written)
}
