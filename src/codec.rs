//! Lossless byte transform used for snapshots.

use std::io::{self, Read, Write};

use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;

/// Compression level used for snapshots. Speed matters more than ratio here.
pub const SNAPSHOT_LEVEL: u32 = 1;

/// Compress `bytes` with zlib at `level` (0..=9).
pub fn compress(bytes: &[u8], level: u32) -> io::Result<Vec<u8>> {
    let mut encoder = ZlibEncoder::new(Vec::with_capacity(bytes.len() / 2), Compression::new(level));
    encoder.write_all(bytes)?;
    encoder.finish()
}

/// Reverse of [`compress`].
pub fn decompress(bytes: &[u8]) -> io::Result<Vec<u8>> {
    let mut decoder = ZlibDecoder::new(bytes);
    let mut out = Vec::with_capacity(bytes.len() * 4);
    decoder.read_to_end(&mut out)?;
    Ok(out)
}
