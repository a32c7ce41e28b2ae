//! Content checksums for assembled uploads (SHA-256, lowercase hex).

use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

use sha2::{Digest, Sha256};

use crate::Result;

/// Read block size.
pub const BLOCK_SIZE: usize = 64 * 1024;

/// Hex SHA-256 of everything `reader` yields, read in [`BLOCK_SIZE`] blocks.
pub fn checksum_reader<R: Read>(mut reader: R) -> io::Result<String> {
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; BLOCK_SIZE];
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

/// Hex SHA-256 of a file. Blocking.
pub fn checksum(path: &Path) -> Result<String> {
    let file = File::open(path)?;
    Ok(checksum_reader(file)?)
}

/// Hex SHA-256 of an in-memory block.
pub fn digest(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

/// Compare a client supplied digest with a computed one.
///
/// Surrounding whitespace and hex case are ignored.
pub fn verify(expected: &str, actual: &str) -> bool {
    expected.trim().eq_ignore_ascii_case(actual.trim())
}
