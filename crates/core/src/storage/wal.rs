//! Per-index write-ahead log for crash recovery.
//!
//! Every mutation is appended here before the graph is touched. Each record
//! is framed as `[u32 length BE][u32 CRC32 BE][bincode payload]` and durably
//! flushed with `fsync` before the append returns. The reader tolerates a
//! truncated or corrupt tail: everything before the first bad frame is
//! returned, and a bad frame can only belong to a write that was never
//! acknowledged.

use crate::error::{Error, Result};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

/// Frames larger than this are treated as a corrupt tail rather than
/// attempting a giant allocation from a damaged length prefix.
const MAX_FRAME_LEN: usize = 1 << 26;

/// A single logged mutation.
///
/// The discriminant is part of the stable on-disk format; new kinds must
/// only ever be appended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum WalRecord {
    /// A vector was added under `id`. The vector is logged as received,
    /// before any space normalization.
    PointAddition { vector: Vec<f32>, id: u32 },
    /// `id` was soft-deleted.
    DeletionMark { id: u32 },
    /// The query-time `ef` parameter was changed.
    EfSetting { ef: i32 },
}

/// Diagnostics from reading a log back.
#[derive(Debug, Default, Clone, Copy)]
pub struct ReplayStats {
    /// Records decoded successfully.
    pub records: usize,
    /// The file ended inside a frame.
    pub truncated: bool,
    /// A frame failed its CRC or payload decode.
    pub corrupt_tail: bool,
}

impl ReplayStats {
    /// True when the whole file decoded cleanly.
    pub fn is_clean(&self) -> bool {
        !self.truncated && !self.corrupt_tail
    }
}

/// Append-only log with lazy file creation.
///
/// The file is opened with append+create semantics on the first write and
/// kept open between writes. All writer access is serialized by an internal
/// mutex so appends stay safe even when issued from multiple operations of
/// the owning index.
pub struct WriteAheadLog {
    path: PathBuf,
    writer: Mutex<Option<BufWriter<File>>>,
}

impl WriteAheadLog {
    /// Create a handle for the log at `path`. No I/O happens until the
    /// first append.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            writer: Mutex::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one record: serialize, frame, write, flush, fsync.
    pub fn append(&self, record: &WalRecord) -> Result<()> {
        let framed = serialize_and_frame(record)?;

        let mut guard = self.writer.lock();
        if guard.is_none() {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.path)?;
            *guard = Some(BufWriter::new(file));
        }
        let writer = guard.as_mut().expect("writer opened above");
        writer.write_all(&framed)?;
        writer.flush()?;
        writer.get_mut().sync_all()?;
        Ok(())
    }

    /// Read all records, closing any open writer first.
    ///
    /// A missing file reads as an empty log. A truncated or corrupt tail
    /// ends the read early; the records decoded before it are returned and
    /// the condition is reported through [`ReplayStats`].
    pub fn read(&self) -> Result<(Vec<WalRecord>, ReplayStats)> {
        self.close();

        let file = match File::open(&self.path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Ok((Vec::new(), ReplayStats::default()));
            }
            Err(e) => return Err(e.into()),
        };

        let mut reader = BufReader::new(file);
        let mut records = Vec::new();
        let mut stats = ReplayStats::default();
        let mut header = [0u8; 8];

        loop {
            match read_fully(&mut reader, &mut header)? {
                0 => break,
                8 => {}
                _ => {
                    stats.truncated = true;
                    break;
                }
            }
            let len =
                u32::from_be_bytes([header[0], header[1], header[2], header[3]]) as usize;
            let stored_crc =
                u32::from_be_bytes([header[4], header[5], header[6], header[7]]);

            if len > MAX_FRAME_LEN {
                stats.corrupt_tail = true;
                break;
            }

            let mut payload = vec![0u8; len];
            match reader.read_exact(&mut payload) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                    stats.truncated = true;
                    break;
                }
                Err(e) => return Err(e.into()),
            }

            if crc32fast::hash(&payload) != stored_crc {
                stats.corrupt_tail = true;
                break;
            }
            match bincode::deserialize::<WalRecord>(&payload) {
                Ok(record) => {
                    records.push(record);
                    stats.records += 1;
                }
                Err(_) => {
                    stats.corrupt_tail = true;
                    break;
                }
            }
        }

        Ok((records, stats))
    }

    /// Close (if open) and remove the log file. Removing a missing file is
    /// not an error.
    pub fn delete(&self) -> Result<()> {
        self.close();
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::Io(e)),
        }
    }

    /// Close the writer if open. Idempotent.
    pub fn close(&self) {
        *self.writer.lock() = None;
    }
}

/// Read until `buf` is full or EOF; returns the number of bytes read.
fn read_fully(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// `[u32 len BE][u32 crc32 BE][bincode payload]`
fn serialize_and_frame(record: &WalRecord) -> Result<Vec<u8>> {
    let payload = bincode::serialize(record)
        .map_err(|e| Error::Internal(format!("wal encode: {e}")))?;
    let len = payload.len() as u32;
    let crc = crc32fast::hash(&payload);

    let mut framed = Vec::with_capacity(8 + payload.len());
    framed.extend_from_slice(&len.to_be_bytes());
    framed.extend_from_slice(&crc.to_be_bytes());
    framed.extend_from_slice(&payload);
    Ok(framed)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn log_in(dir: &tempfile::TempDir) -> WriteAheadLog {
        WriteAheadLog::new(dir.path().join("log"))
    }

    #[test]
    fn write_and_read_all_record_kinds() {
        let dir = tempfile::tempdir().unwrap();
        let log = log_in(&dir);

        log.append(&WalRecord::PointAddition {
            vector: vec![1.0, 2.0, 3.0],
            id: 10,
        })
        .unwrap();
        log.append(&WalRecord::PointAddition {
            vector: vec![4.0, 5.0, 6.0],
            id: 20,
        })
        .unwrap();
        log.append(&WalRecord::DeletionMark { id: 10 }).unwrap();
        log.append(&WalRecord::EfSetting { ef: 42 }).unwrap();

        let (records, stats) = log.read().unwrap();
        assert!(stats.is_clean());
        assert_eq!(
            records,
            vec![
                WalRecord::PointAddition {
                    vector: vec![1.0, 2.0, 3.0],
                    id: 10
                },
                WalRecord::PointAddition {
                    vector: vec![4.0, 5.0, 6.0],
                    id: 20
                },
                WalRecord::DeletionMark { id: 10 },
                WalRecord::EfSetting { ef: 42 },
            ]
        );
    }

    #[test]
    fn missing_file_reads_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let log = log_in(&dir);
        let (records, stats) = log.read().unwrap();
        assert!(records.is_empty());
        assert!(stats.is_clean());
    }

    #[test]
    fn empty_file_reads_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("log"), b"").unwrap();
        let log = log_in(&dir);
        let (records, stats) = log.read().unwrap();
        assert!(records.is_empty());
        assert!(stats.is_clean());
    }

    #[test]
    fn append_after_read_keeps_appending() {
        let dir = tempfile::tempdir().unwrap();
        let log = log_in(&dir);

        log.append(&WalRecord::EfSetting { ef: 1 }).unwrap();
        let (records, _) = log.read().unwrap();
        assert_eq!(records.len(), 1);

        // read() closed the writer; the next append reopens in append mode.
        log.append(&WalRecord::EfSetting { ef: 2 }).unwrap();
        let (records, stats) = log.read().unwrap();
        assert!(stats.is_clean());
        assert_eq!(records.len(), 2);
    }

    #[test]
    fn garbage_tail_yields_valid_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let log = log_in(&dir);

        log.append(&WalRecord::EfSetting { ef: 1 }).unwrap();
        log.append(&WalRecord::EfSetting { ef: 2 }).unwrap();
        log.close();

        let mut file = OpenOptions::new()
            .append(true)
            .open(dir.path().join("log"))
            .unwrap();
        file.write_all(b"foo!").unwrap();
        drop(file);

        let (records, stats) = log.read().unwrap();
        assert_eq!(
            records,
            vec![WalRecord::EfSetting { ef: 1 }, WalRecord::EfSetting { ef: 2 }]
        );
        assert!(!stats.is_clean());
        assert!(stats.truncated);
    }

    #[test]
    fn truncation_mid_payload_yields_valid_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let log = log_in(&dir);

        log.append(&WalRecord::PointAddition {
            vector: vec![1.0; 64],
            id: 1,
        })
        .unwrap();
        log.append(&WalRecord::PointAddition {
            vector: vec![2.0; 64],
            id: 2,
        })
        .unwrap();
        log.close();

        let path = dir.path().join("log");
        let raw = std::fs::read(&path).unwrap();
        std::fs::write(&path, &raw[..raw.len() - 17]).unwrap();

        let (records, stats) = log.read().unwrap();
        assert_eq!(records.len(), 1);
        assert!(stats.truncated);
    }

    #[test]
    fn flipped_bit_stops_at_corrupt_frame() {
        let dir = tempfile::tempdir().unwrap();
        let log = log_in(&dir);

        log.append(&WalRecord::EfSetting { ef: 1 }).unwrap();
        log.append(&WalRecord::EfSetting { ef: 2 }).unwrap();
        log.close();

        let path = dir.path().join("log");
        let mut raw = std::fs::read(&path).unwrap();
        let n = raw.len();
        raw[n - 1] ^= 0xFF; // corrupt the second record's payload
        std::fs::write(&path, &raw).unwrap();

        let (records, stats) = log.read().unwrap();
        assert_eq!(records, vec![WalRecord::EfSetting { ef: 1 }]);
        assert!(stats.corrupt_tail);
    }

    #[test]
    fn pure_garbage_file_yields_no_records() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("log"), b"foo!").unwrap();
        let log = log_in(&dir);

        let (records, stats) = log.read().unwrap();
        assert!(records.is_empty());
        assert!(!stats.is_clean());
    }

    #[test]
    fn delete_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let log = log_in(&dir);

        log.delete().unwrap();
        log.append(&WalRecord::EfSetting { ef: 9 }).unwrap();
        assert!(log.path().exists());

        log.delete().unwrap();
        assert!(!log.path().exists());
        log.delete().unwrap();
    }

    #[test]
    fn close_without_writes_is_fine() {
        let dir = tempfile::tempdir().unwrap();
        let log = log_in(&dir);
        log.close();
        log.close();
        assert!(!log.path().exists());
    }
}
