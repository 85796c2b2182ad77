//! Synchronous file helpers
//!
//! Every read the managers issue goes through [`read_exact_at`]; a seek
//! failure, end-of-file or short read is surfaced as an error and never as a
//! partially filled buffer.

use std::fs::File;
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::Path;
use tracing::debug;

use crate::{Result, StorageError};

/// Open a file for reading, attaching the path to any error.
pub fn open_file(path: &Path) -> Result<File> {
    File::open(path).map_err(|source| StorageError::Open {
        path: path.to_path_buf(),
        source,
    })
}

/// Read an entire file.
pub fn load_file(path: &Path) -> Result<Vec<u8>> {
    let mut file = open_file(path)?;
    let expected = usize::try_from(file.metadata()?.len())
        .map_err(|_| StorageError::ResourceExhausted(format!("{} too large", path.display())))?;

    let mut data = Vec::with_capacity(expected);
    file.read_to_end(&mut data)?;
    if data.len() < expected {
        return Err(StorageError::ShortRead {
            offset: 0,
            expected,
            actual: data.len(),
        });
    }

    debug!("Loaded {} ({} bytes)", path.display(), data.len());
    Ok(data)
}

/// Create or truncate a file and write `data` to it.
pub fn write_file(path: &Path, data: &[u8]) -> Result<()> {
    let mut file = File::create(path).map_err(|source| StorageError::Open {
        path: path.to_path_buf(),
        source,
    })?;

    let mut written = 0;
    while written < data.len() {
        match file.write(&data[written..]) {
            Ok(0) => {
                return Err(StorageError::ShortWrite {
                    expected: data.len(),
                    actual: written,
                });
            }
            Ok(n) => written += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => {}
            Err(e) => return Err(e.into()),
        }
    }
    file.flush()?;
    Ok(())
}

/// Seek to `offset` and fill `buf` completely.
pub fn read_exact_at<R: Read + Seek>(reader: &mut R, offset: u64, buf: &mut [u8]) -> Result<()> {
    reader.seek(SeekFrom::Start(offset))?;

    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => {
                return Err(StorageError::ShortRead {
                    offset,
                    expected: buf.len(),
                    actual: filled,
                });
            }
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => {}
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use tempfile::tempdir;

    #[test]
    fn test_write_then_load() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("config.WL6");
        write_file(&path, b"saved settings").expect("write");
        assert_eq!(load_file(&path).expect("load"), b"saved settings");
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempdir().expect("tempdir");
        let err = load_file(&dir.path().join("vgadict.WL6")).expect_err("missing");
        assert!(matches!(err, StorageError::Open { .. }));
        assert!(err.to_string().contains("vgadict.WL6"));
    }

    #[test]
    fn test_read_exact_at() {
        let mut reader = Cursor::new((0u8..32).collect::<Vec<_>>());
        let mut buf = [0u8; 4];
        read_exact_at(&mut reader, 10, &mut buf).expect("read");
        assert_eq!(buf, [10, 11, 12, 13]);
    }

    #[test]
    fn test_read_past_end_is_short_read() {
        let mut reader = Cursor::new(vec![0u8; 8]);
        let mut buf = [0u8; 6];
        let err = read_exact_at(&mut reader, 4, &mut buf).expect_err("short");
        assert!(matches!(
            err,
            StorageError::ShortRead {
                offset: 4,
                expected: 6,
                actual: 4
            }
        ));
    }
}
