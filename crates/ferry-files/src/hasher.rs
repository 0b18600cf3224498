//! BLAKE3 file digests for relay verification.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::Path;

/// Read buffer for hashing (1 MiB, large enough for rayon to split)
const HASH_BUFFER_SIZE: usize = 1024 * 1024;

/// Hash an entire file
pub fn hash_file(path: impl AsRef<Path>) -> io::Result<blake3::Hash> {
    hash_file_from(path, 0)
}

/// Hash a file from byte `offset` to its end
///
/// Used to compare a resumed relay: only the tail past the restart offset
/// went through the relay.
pub fn hash_file_from(path: impl AsRef<Path>, offset: u64) -> io::Result<blake3::Hash> {
    let mut file = File::open(path)?;
    file.seek(SeekFrom::Start(offset))?;

    let mut hasher = blake3::Hasher::new();
    let mut buf = vec![0u8; HASH_BUFFER_SIZE];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        update(&mut hasher, &buf[..n]);
    }
    Ok(hasher.finalize())
}

/// Hash an in-memory buffer
pub fn hash_bytes(data: &[u8]) -> blake3::Hash {
    blake3::hash(data)
}

#[cfg(feature = "rayon")]
fn update(hasher: &mut blake3::Hasher, data: &[u8]) {
    hasher.update_rayon(data);
}

#[cfg(not(feature = "rayon"))]
fn update(hasher: &mut blake3::Hasher, data: &[u8]) {
    hasher.update(data);
}
