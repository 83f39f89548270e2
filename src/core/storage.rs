use std::io::{self, Read, Write};

pub const MAGIC: &[u8; 8] = b"NOEMA_01";
pub const VERSION_V1: u32 = 1;
pub const VERSION_CURRENT: u32 = VERSION_V1;

pub fn compress_lz4(input: &[u8]) -> Vec<u8> {
    lz4_flex::compress(input)
}

pub fn decompress_lz4(input: &[u8], expected_size: usize) -> io::Result<Vec<u8>> {
    // Strict format: raw LZ4 block with external expected size.
    lz4_flex::decompress(input, expected_size)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "lz4 decompression failed"))
}

pub fn write_u32_le<W: Write>(w: &mut W, v: u32) -> io::Result<()> {
    w.write_all(&v.to_le_bytes())
}

pub fn write_u64_le<W: Write>(w: &mut W, v: u64) -> io::Result<()> {
    w.write_all(&v.to_le_bytes())
}

pub fn write_f32_le<W: Write>(w: &mut W, v: f32) -> io::Result<()> {
    w.write_all(&v.to_le_bytes())
}

pub fn write_bytes<W: Write>(w: &mut W, bytes: &[u8]) -> io::Result<()> {
    write_u32_le(w, bytes.len() as u32)?;
    w.write_all(bytes)
}

pub fn write_string<W: Write>(w: &mut W, s: &str) -> io::Result<()> {
    write_bytes(w, s.as_bytes())
}

pub fn read_exact<const N: usize, R: Read>(r: &mut R) -> io::Result<[u8; N]> {
    let mut buf = [0u8; N];
    r.read_exact(&mut buf)?;
    Ok(buf)
}

pub fn read_u32_le<R: Read>(r: &mut R) -> io::Result<u32> {
    Ok(u32::from_le_bytes(read_exact::<4, _>(r)?))
}

pub fn read_u64_le<R: Read>(r: &mut R) -> io::Result<u64> {
    Ok(u64::from_le_bytes(read_exact::<8, _>(r)?))
}

pub fn read_f32_le<R: Read>(r: &mut R) -> io::Result<f32> {
    Ok(f32::from_le_bytes(read_exact::<4, _>(r)?))
}

pub fn read_bytes<R: Read>(r: &mut R) -> io::Result<Vec<u8>> {
    let n = read_u32_le(r)? as usize;
    let mut buf = vec![0u8; n];
    r.read_exact(&mut buf)?;
    Ok(buf)
}

pub fn read_string<R: Read>(r: &mut R) -> io::Result<String> {
    let bytes = read_bytes(r)?;
    String::from_utf8(bytes)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "invalid utf-8 string"))
}

pub fn write_chunk<W: Write>(w: &mut W, tag: [u8; 4], payload: &[u8]) -> io::Result<()> {
    w.write_all(&tag)?;
    write_u32_le(w, payload.len() as u32)?;
    w.write_all(payload)
}

/// Write an LZ4 chunk: payload is block-compressed and preceded by the
/// uncompressed length (u32).
///
/// Layout:
/// - tag: [u8;4]
/// - len: u32 (bytes following, including the 4-byte uncompressed length)
/// - uncompressed_len: u32
/// - compressed payload bytes
pub fn write_chunk_lz4<W: Write>(w: &mut W, tag: [u8; 4], payload: &[u8]) -> io::Result<()> {
    let compressed = compress_lz4(payload);
    let uncompressed_len = payload.len() as u32;
    let total_len = 4u32.saturating_add(
        u32::try_from(compressed.len())
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "chunk too large"))?,
    );

    w.write_all(&tag)?;
    write_u32_le(w, total_len)?;
    write_u32_le(w, uncompressed_len)?;
    w.write_all(&compressed)
}

/// Read the rest of an LZ4 chunk body after the header: the uncompressed
/// length followed by the compressed bytes.
pub fn read_chunk_lz4<R: Read>(r: &mut R) -> io::Result<Vec<u8>> {
    let uncompressed_len = read_u32_le(r)? as usize;
    let mut compressed = Vec::new();
    r.read_to_end(&mut compressed)?;
    decompress_lz4(&compressed, uncompressed_len)
}

pub fn read_chunk_header<R: Read>(r: &mut R) -> io::Result<([u8; 4], u32)> {
    let tag = read_exact::<4, _>(r)?;
    let len = read_u32_le(r)?;
    Ok((tag, len))
}
