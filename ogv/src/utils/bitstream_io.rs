//! Bitstream I/O utilities for header parsing.
//!
//! Header packets are MSB-first bitpacked; the bit order is a format
//! contract, not a choice, and is pinned by the tests at the bottom of
//! this file. Multi-byte length fields inside the comment header are
//! byte-aligned little-endian and read through [`BitstreamIoReader::get_le32`].

use std::io;
use std::io::SeekFrom;

use bitstream_io::{BigEndian, BitRead, BitReader, UnsignedInteger};

#[derive(Debug)]
pub struct BitstreamIoReader<R: io::Read + io::Seek> {
    bs: BitReader<R, BigEndian>,
    len: u64,
}

pub type BsIoSliceReader<'a> = BitstreamIoReader<io::Cursor<&'a [u8]>>;

impl<R> BitstreamIoReader<R>
where
    R: io::Read + io::Seek,
{
    pub fn new(read: R, len_bytes: u64) -> Self {
        Self {
            bs: BitReader::new(read),
            len: len_bytes << 3,
        }
    }

    #[inline(always)]
    pub fn get(&mut self) -> io::Result<bool> {
        self.bs.read_bit()
    }

    #[inline(always)]
    pub fn get_n<I: UnsignedInteger>(&mut self, n: u32) -> io::Result<I> {
        match self.bs.read_unsigned_var(n) {
            Ok(val) => Ok(val),
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                // Only call position() on error path to avoid overhead
                Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!(
                        "get_n({}): out of bounds bits at {}",
                        n,
                        self.bs.position_in_bits().unwrap_or(0)
                    ),
                ))
            }
            Err(e) => Err(e),
        }
    }

    /// Reads `n` bits without advancing the position.
    #[inline(always)]
    pub fn peek_n<I: UnsignedInteger>(&mut self, n: u32) -> io::Result<I> {
        let position = self.position()?;
        let value = self.get_n(n);
        self.bs.seek_bits(SeekFrom::Start(position))?;

        value
    }

    /// Reads a byte-aligned 32-bit little-endian field.
    #[inline(always)]
    pub fn get_le32(&mut self) -> io::Result<u32> {
        let mut buf = [0u8; 4];
        self.get_bytes(&mut buf)?;

        Ok(u32::from_le_bytes(buf))
    }

    #[inline(always)]
    pub fn get_bytes(&mut self, buf: &mut [u8]) -> io::Result<()> {
        match self.bs.read_bytes(buf) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!(
                    "get_bytes({}): out of bounds bits at {}",
                    buf.len(),
                    self.bs.position_in_bits().unwrap_or(0)
                ),
            )),
            Err(e) => Err(e),
        }
    }

    #[inline(always)]
    pub fn seek(&mut self, offset: i64) -> io::Result<u64> {
        if (offset < 0 && self.position()? as i64 + offset >= 0)
            || (offset >= 0 && self.available()? as i64 >= offset)
        {
            return self.bs.seek_bits(SeekFrom::Current(offset));
        }

        Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            format!(
                "seek({}): out of bounds bits at {}",
                offset,
                self.position()?
            ),
        ))
    }

    #[inline(always)]
    pub fn skip_n(&mut self, n: u32) -> io::Result<()> {
        // Skip bounds check for small skips - bitstream_io handles EOF internally
        if n <= 64 {
            self.bs.skip(n)
        } else {
            self.available().and_then(|avail| {
                if n as u64 > avail {
                    Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "skip_n: out of bounds bits",
                    ))
                } else {
                    self.bs.skip(n)
                }
            })
        }
    }

    #[inline(always)]
    pub fn available(&mut self) -> io::Result<u64> {
        self.bs.position_in_bits().map(|pos| self.len - pos)
    }

    #[inline(always)]
    pub fn position(&mut self) -> io::Result<u64> {
        self.bs.position_in_bits()
    }
}

impl<'a> BsIoSliceReader<'a> {
    pub fn from_slice(buf: &'a [u8]) -> Self {
        let len = buf.len() as u64;
        let read = io::Cursor::new(buf);

        Self::new(read, len)
    }
}

impl Default for BsIoSliceReader<'_> {
    fn default() -> Self {
        Self::from_slice(&[])
    }
}

#[test]
fn bit_order_is_msb_first() -> io::Result<()> {
    let mut reader = BsIoSliceReader::from_slice(&[0b1011_0001, 0b1000_0000]);

    assert_eq!(reader.get_n::<u32>(4)?, 0b1011);
    assert!(!reader.get()?);
    assert_eq!(reader.get_n::<u32>(5)?, 0b00_110);
    assert_eq!(reader.position()?, 10);
    Ok(())
}

#[test]
fn peek_does_not_advance() -> io::Result<()> {
    let mut reader = BsIoSliceReader::from_slice(&[0xA5, 0x3C]);

    assert_eq!(reader.peek_n::<u32>(8)?, 0xA5);
    assert_eq!(reader.position()?, 0);
    assert_eq!(reader.get_n::<u32>(16)?, 0xA53C);
    Ok(())
}

#[test]
fn out_of_data_reported() {
    let mut reader = BsIoSliceReader::from_slice(&[0xFF]);

    assert!(reader.get_n::<u32>(16).is_err());
}

#[test]
fn le32_inside_msb_stream() -> io::Result<()> {
    let mut reader = BsIoSliceReader::from_slice(&[0x0D, 0x00, 0x00, 0x00, 0xFF]);

    assert_eq!(reader.get_le32()?, 13);
    assert_eq!(reader.get_n::<u32>(8)?, 0xFF);
    Ok(())
}
