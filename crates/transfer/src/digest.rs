use std::io::Read;
use std::path::Path;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use sha2::{Digest, Sha256};

use crate::TransferError;

/// Computes SHA-256 of `data` and returns it as padded standard base64.
///
/// This is the encoding object stores expect in `x-amz-checksum-sha256`.
pub fn checksum_part(data: &[u8]) -> String {
    STANDARD.encode(Sha256::digest(data))
}

/// Streams a whole file through SHA-256 and returns the base64 digest.
pub fn calculate_file_checksum(path: &Path) -> Result<String, TransferError> {
    let mut file = std::fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(STANDARD.encode(hasher.finalize()))
}
