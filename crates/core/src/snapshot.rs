//! Sealed snapshot files: bincode payload + magic + CRC32 footer.
//!
//! Both the `state` file and the graph snapshot use the same framing:
//! `[bincode payload][magic "VSN1" 4B][CRC32 4B BE]`. The checksum covers
//! the payload only; a partially written or bit-flipped file fails the
//! check at load time.

use crate::error::{Error, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs;
use std::path::Path;

/// Magic bytes preceding the CRC32 footer.
const SNAPSHOT_MAGIC: &[u8; 4] = b"VSN1";

/// Serialize `value` and write it to `path` with the magic + CRC32 footer.
///
/// The write is not atomic; callers that need atomicity write to a
/// temporary path and rename.
pub(crate) fn write_sealed<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let payload =
        bincode::serialize(value).map_err(|e| Error::Internal(format!("snapshot encode: {e}")))?;
    let crc = crc32fast::hash(&payload);

    let mut out = Vec::with_capacity(payload.len() + 8);
    out.extend_from_slice(&payload);
    out.extend_from_slice(SNAPSHOT_MAGIC);
    out.extend_from_slice(&crc.to_be_bytes());
    fs::write(path, &out)?;
    Ok(())
}

/// Read a sealed file written by [`write_sealed`], verifying the checksum.
pub(crate) fn read_sealed<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let raw = fs::read(path)?;
    if raw.len() < 8 || &raw[raw.len() - 8..raw.len() - 4] != SNAPSHOT_MAGIC {
        return Err(Error::Corruption(format!(
            "{} is not a sealed snapshot file",
            path.display()
        )));
    }

    let payload = &raw[..raw.len() - 8];
    let stored_crc = u32::from_be_bytes([
        raw[raw.len() - 4],
        raw[raw.len() - 3],
        raw[raw.len() - 2],
        raw[raw.len() - 1],
    ]);
    let computed_crc = crc32fast::hash(payload);
    if computed_crc != stored_crc {
        return Err(Error::Corruption(format!(
            "{}: CRC32 mismatch, expected {stored_crc:#010x} got {computed_crc:#010x}",
            path.display()
        )));
    }

    bincode::deserialize(payload)
        .map_err(|e| Error::Corruption(format!("{}: decode failed: {e}", path.display())))
}
