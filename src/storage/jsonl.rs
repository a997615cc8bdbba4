//! JSON-lines record files and size attribute files.

use crate::{Error, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, BufWriter, Seek, SeekFrom, Write};
use std::path::Path;

pub const ATTRS_FILE: &str = "attrs.json";

/// Aggregate attributes stored alongside a partition directory.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SizeAttrs {
    pub size: u64,
}

pub fn read_attrs(dir: &Path) -> Result<Option<SizeAttrs>> {
    let path = dir.join(ATTRS_FILE);
    match fs::read(&path) {
        Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Replace the attribute file atomically.
pub fn write_attrs(dir: &Path, attrs: SizeAttrs) -> Result<()> {
    let tmp = dir.join(format!("{}.tmp", ATTRS_FILE));
    fs::write(&tmp, serde_json::to_vec(&attrs)?)?;
    fs::rename(&tmp, dir.join(ATTRS_FILE))?;
    Ok(())
}

pub(crate) fn open_partition(path: &Path) -> Result<File> {
    File::open(path).map_err(|e| match e.kind() {
        io::ErrorKind::NotFound => Error::MissingPartition(path.to_path_buf()),
        _ => Error::Io(e),
    })
}

/// Start of a line in a JSON-lines file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LinePosition {
    pub line: u64,
    pub byte: u64,
}

/// Read up to `limit` records after skipping `offset` lines.
pub fn read_slice<T: DeserializeOwned>(path: &Path, offset: u64, limit: usize) -> Result<Vec<T>> {
    Ok(read_slice_from(path, LinePosition::default(), offset, limit)?.0)
}

/// Like [`read_slice`], but the scan begins at `from` instead of the top of
/// the file. `from.line` must not exceed `offset`.
///
/// Returns the records and the position of the line after the last one read.
pub fn read_slice_from<T: DeserializeOwned>(
    path: &Path,
    from: LinePosition,
    offset: u64,
    limit: usize,
) -> Result<(Vec<T>, LinePosition)> {
    if from.line > offset {
        return Err(Error::Internal(format!(
            "cannot resume {} at line {} to reach line {}",
            path.display(),
            from.line,
            offset
        )));
    }
    let mut file = open_partition(path)?;
    file.seek(SeekFrom::Start(from.byte))?;
    let mut reader = BufReader::new(file);
    let mut position = from;
    let mut records = Vec::with_capacity(limit.min(4096));
    let mut line = String::new();
    while records.len() < limit {
        line.clear();
        let read = reader.read_line(&mut line)?;
        if read == 0 {
            break;
        }
        position.line += 1;
        position.byte += read as u64;
        if position.line > offset {
            records.push(serde_json::from_str(line.trim_end())?);
        }
    }
    Ok((records, position))
}

pub fn read_all<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    read_slice(path, 0, usize::MAX)
}

pub fn count_records(path: &Path) -> Result<u64> {
    let reader = BufReader::new(open_partition(path)?);
    let mut count = 0;
    for line in reader.lines() {
        line?;
        count += 1;
    }
    Ok(count)
}

/// Append records, one JSON document per line. Returns bytes written.
pub fn append<T: Serialize>(path: &Path, records: &[T]) -> Result<u64> {
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    let mut writer = BufWriter::new(file);
    let mut written = 0u64;
    for record in records {
        let line = serde_json::to_vec(record)?;
        writer.write_all(&line)?;
        writer.write_all(b"\n")?;
        written += line.len() as u64 + 1;
    }
    writer.flush()?;
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_append_and_slice() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("records.jsonl");
        append(&path, &[1u32, 2, 3]).unwrap();
        append(&path, &[4u32, 5]).unwrap();

        assert_eq!(count_records(&path).unwrap(), 5);
        assert_eq!(read_slice::<u32>(&path, 1, 3).unwrap(), vec![2, 3, 4]);
        assert_eq!(read_slice::<u32>(&path, 4, 10).unwrap(), vec![5]);
        assert!(read_slice::<u32>(&path, 5, 10).unwrap().is_empty());
        assert_eq!(read_all::<u32>(&path).unwrap().len(), 5);
    }

    #[test]
    fn test_read_slice_resumes_from_position() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("records.jsonl");
        append(&path, &[10u32, 200, 3000, 4, 50]).unwrap();

        let (first, position) = read_slice_from::<u32>(&path, LinePosition::default(), 1, 2).unwrap();
        assert_eq!(first, vec![200, 3000]);
        assert_eq!(position, LinePosition { line: 3, byte: 12 });

        let (rest, end) = read_slice_from::<u32>(&path, position, 4, 10).unwrap();
        assert_eq!(rest, vec![50]);
        assert_eq!(end, LinePosition { line: 5, byte: 17 });

        assert!(read_slice_from::<u32>(&path, end, 2, 1).is_err());
    }

    #[test]
    fn test_missing_partition() {
        let dir = TempDir::new().unwrap();
        let result = read_slice::<u32>(&dir.path().join("nope.jsonl"), 0, 1);
        assert!(matches!(result, Err(Error::MissingPartition(_))));
    }

    #[test]
    fn test_attrs_roundtrip() {
        let dir = TempDir::new().unwrap();
        assert_eq!(read_attrs(dir.path()).unwrap(), None);
        write_attrs(dir.path(), SizeAttrs { size: 42 }).unwrap();
        assert_eq!(read_attrs(dir.path()).unwrap(), Some(SizeAttrs { size: 42 }));
    }
}
