//! Little-endian primitives over `std::io` streams.

use std::io::{self, Read, Write};

macro_rules! read_le {
    ($name:ident, $ty:ty) => {
        pub fn $name<R: Read + ?Sized>(reader: &mut R) -> io::Result<$ty> {
            let mut buf = [0u8; std::mem::size_of::<$ty>()];
            reader.read_exact(&mut buf)?;
            Ok(<$ty>::from_le_bytes(buf))
        }
    };
}

macro_rules! write_le {
    ($name:ident, $ty:ty) => {
        pub fn $name<W: Write + ?Sized>(writer: &mut W, value: $ty) -> io::Result<()> {
            writer.write_all(&value.to_le_bytes())
        }
    };
}

read_le!(read_u16, u16);
read_le!(read_u32, u32);
read_le!(read_u64, u64);
read_le!(read_i64, i64);

write_le!(write_u16, u16);
write_le!(write_u32, u32);
write_le!(write_u64, u64);
write_le!(write_i64, i64);

pub fn read_vec<R: Read + ?Sized>(reader: &mut R, len: usize) -> io::Result<Vec<u8>> {
    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf)?;
    Ok(buf)
}

/// Fills `buf`, returning `false` on a clean end-of-stream before the
/// first byte. End-of-stream after a partial fill is an error: the
/// stream ended inside something it promised to contain.
pub fn read_or_eof<R: Read + ?Sized>(reader: &mut R, buf: &mut [u8]) -> io::Result<bool> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) if filled == 0 => return Ok(false),
            Ok(0) => {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "stream ended inside a record",
                ))
            }
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(true)
}
