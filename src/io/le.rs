use std::io::{Read, Write};

pub(crate) fn read_leu8<R: Read>(r: &mut R) -> Result<u8, std::io::Error> {
    // Create and fill buffer
    let mut buf: [u8; 1] = [0; 1];
    r.read_exact(&mut buf)?;
    Ok(buf[0])
}

pub(crate) fn read_leu16<R: Read>(r: &mut R) -> Result<u16, std::io::Error> {
    // Create and fill buffer
    let mut buf: [u8; 2] = [0; 2];
    r.read_exact(&mut buf)?;
    // Decode little endian
    Ok(u16::from_le_bytes(buf))
}

pub(crate) fn read_leu32<R: Read>(r: &mut R) -> Result<u32, std::io::Error> {
    // Create and fill buffer
    let mut buf: [u8; 4] = [0; 4];
    r.read_exact(&mut buf)?;
    // Decode little endian
    Ok(u32::from_le_bytes(buf))
}

pub(crate) fn read_leu64<R: Read>(r: &mut R) -> Result<u64, std::io::Error> {
    // Create and fill buffer
    let mut buf: [u8; 8] = [0; 8];
    r.read_exact(&mut buf)?;
    // Decode little endian
    Ok(u64::from_le_bytes(buf))
}

pub(crate) fn read_lei32<R: Read>(r: &mut R) -> Result<i32, std::io::Error> {
    let mut buf: [u8; 4] = [0; 4];
    r.read_exact(&mut buf)?;
    Ok(i32::from_le_bytes(buf))
}

pub(crate) fn read_lei64<R: Read>(r: &mut R) -> Result<i64, std::io::Error> {
    let mut buf: [u8; 8] = [0; 8];
    r.read_exact(&mut buf)?;
    Ok(i64::from_le_bytes(buf))
}

/// Read exactly `n` bytes into a fresh buffer
pub(crate) fn read_bytes_exact<R: Read>(r: &mut R, n: usize) -> Result<Vec<u8>, std::io::Error> {
    let mut buf: Vec<u8> = vec![0; n];
    r.read_exact(&mut buf)?;
    Ok(buf)
}

/// Strings serialize as `u32 length || bytes`
pub(crate) fn read_string<R: Read>(r: &mut R) -> Result<String, std::io::Error> {
    let length = read_leu32(r)? as usize;
    let bytes = read_bytes_exact(r, length)?;
    String::from_utf8(bytes)
        .map_err(|_| std::io::Error::new(std::io::ErrorKind::InvalidData, "non-utf8 string"))
}

pub(crate) fn write_string<W: Write>(w: &mut W, value: &str) -> Result<(), std::io::Error> {
    w.write_all(&(value.len() as u32).to_le_bytes())?;
    w.write_all(value.as_bytes())?;
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn string_round_trip() -> Result<(), std::io::Error> {
        let mut buf = Cursor::new(<Vec<u8>>::new());
        write_string(&mut buf, "chr20")?;
        buf.set_position(0);
        assert_eq!(read_string(&mut buf)?, "chr20");
        Ok(())
    }

    #[test]
    fn primitive_round_trip() -> Result<(), std::io::Error> {
        let mut buf = Cursor::new(<Vec<u8>>::new());
        buf.get_mut().extend_from_slice(&0xdead_beef_u32.to_le_bytes());
        buf.get_mut().extend_from_slice(&(-7_i64).to_le_bytes());
        assert_eq!(read_leu32(&mut buf)?, 0xdead_beef);
        assert_eq!(read_lei64(&mut buf)?, -7);
        Ok(())
    }
}
