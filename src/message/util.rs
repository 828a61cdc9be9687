use std::io::{self, prelude::*};

/// Read a little-endian u64 out of the given stream.
///
pub fn read_u64<R: Read>(stream: &mut R) -> io::Result<u64> {
    let mut buffer = [0; 8];
    stream.read_exact(&mut buffer)?;
    Ok(u64::from_le_bytes(buffer))
}

/// Write a little-endian u64 to the given stream.
///
pub fn write_u64<W: Write>(stream: &mut W, value: u64) -> io::Result<()> {
    stream.write_all(&value.to_le_bytes())?;
    stream.flush()
}

/// Write a length-prefixed frame to the given stream.
///
pub fn write_frame<W: Write>(stream: &mut W, bytes: &[u8]) -> io::Result<()> {
    stream.write_all(&(bytes.len() as u64).to_le_bytes())?;
    stream.write_all(bytes)?;
    stream.flush()
}

/// Read a length-prefixed frame from the given stream, into a vec. Returns
/// `None` if the stream was closed cleanly before a new frame started.
///
pub fn read_frame<R: Read>(stream: &mut R) -> io::Result<Option<Vec<u8>>> {
    let mut header = [0; 8];
    match stream.read_exact(&mut header) {
        Ok(()) => (),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e),
    }
    let mut buffer = vec![0; u64::from_le_bytes(header) as usize];
    stream.read_exact(&mut buffer)?;
    Ok(Some(buffer))
}

/// Encode a slice of f64 as little-endian bytes.
///
pub fn f64s_to_bytes(values: &[f64]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_le_bytes()).collect()
}

/// Decode little-endian bytes into the given f64 buffer. Fails unless the
/// byte count matches the buffer length exactly.
///
pub fn bytes_into_f64s(bytes: &[u8], values: &mut [f64]) -> Result<(), String> {
    if bytes.len() != 8 * values.len() {
        return Err(format!(
            "expected {} bytes for {} values, got {}",
            8 * values.len(),
            values.len(),
            bytes.len()
        ));
    }
    for (value, chunk) in values.iter_mut().zip(bytes.chunks_exact(8)) {
        let mut word = [0; 8];
        word.copy_from_slice(chunk);
        *value = f64::from_le_bytes(word);
    }
    Ok(())
}
