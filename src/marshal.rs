use std::{
    fmt::{Debug, Display, Formatter},
    io::{self, Read},
};

use byteorder::{BigEndian, ReadBytesExt};
use fixed::types::{U16F16, U2F30, U8F8};
use miette::Diagnostic;
use thiserror::Error;

pub mod avc;
pub mod mp4;

#[derive(Error, Debug, Diagnostic)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("stream truncated at offset {offset}")]
    #[diagnostic(code(mp4demux::truncated_stream))]
    TruncatedStream { offset: u64 },

    #[error("invalid box size {size} at offset {offset}, header is {header_length} bytes")]
    #[diagnostic(code(mp4demux::invalid_size))]
    InvalidSize {
        offset: u64,
        size: u64,
        header_length: u64,
    },

    #[error("{tag} box at offset {offset} ends at {end}, past its parent's end {region_end}")]
    #[diagnostic(code(mp4demux::box_overflow))]
    BoxOverflow {
        tag: FourCC,
        offset: u64,
        end: u64,
        region_end: u64,
    },

    #[error("{tag} container at offset {offset} has no room for children")]
    #[diagnostic(code(mp4demux::registry_miss))]
    RegistryMiss { tag: FourCC, offset: u64 },

    #[error("{0} is already registered")]
    DuplicateTag(FourCC),

    #[error("boxes nested too deep at offset {offset}")]
    #[diagnostic(code(mp4demux::nesting_too_deep))]
    NestingTooDeep { offset: u64 },

    #[error("malformed {tag} box at offset {offset}")]
    #[diagnostic(code(mp4demux::malformed_box))]
    MalformedBox {
        tag: FourCC,
        offset: u64,
        #[source]
        source: Box<Error>,
    },

    #[error("Invalid {r#type} box quantity: {quantity}, expected: {expected}")]
    InvalidBoxQuantity {
        r#type: &'static str,
        quantity: usize,
        expected: usize,
    },

    #[error("unsupported {r#type} box version {version}")]
    UnsupportedVersion { r#type: &'static str, version: u8 },

    #[error("invalid decoder configuration: {0}")]
    InvalidConfiguration(&'static str),

    #[error("no AVC video track found")]
    #[diagnostic(help("only H.264 tracks carrying an avcC record can be extracted"))]
    NoVideoTrack,

    #[error("inconsistent sample tables: {0}")]
    #[diagnostic(code(mp4demux::inconsistent_tables))]
    InconsistentTables(String),

    #[error("sample {sample_index} needs {length} bytes at offset {offset}, past end of file")]
    #[diagnostic(code(mp4demux::short_read))]
    ShortRead {
        sample_index: u32,
        offset: u64,
        length: u32,
    },

    #[error("sample {sample_index} at offset {offset} has a NAL unit overrunning the sample")]
    #[diagnostic(code(mp4demux::malformed_payload))]
    MalformedPayload { sample_index: u32, offset: u64 },

    #[error("invalid value {value:?} for {key}")]
    InvalidConfig { key: &'static str, value: String },
}

impl Error {
    /// Byte offset in the input at which the error was detected, if known.
    pub fn offset(&self) -> Option<u64> {
        match self {
            Error::TruncatedStream { offset }
            | Error::InvalidSize { offset, .. }
            | Error::BoxOverflow { offset, .. }
            | Error::RegistryMiss { offset, .. }
            | Error::NestingTooDeep { offset }
            | Error::MalformedBox { offset, .. }
            | Error::ShortRead { offset, .. }
            | Error::MalformedPayload { offset, .. } => Some(*offset),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

pub trait Decode: Sized {
    fn decode(input: &mut &[u8]) -> Result<Self>;
}

impl Decode for u8 {
    fn decode(input: &mut &[u8]) -> Result<Self> {
        Ok(input.read_u8()?)
    }
}

impl Decode for u16 {
    fn decode(input: &mut &[u8]) -> Result<Self> {
        Ok(input.read_u16::<BigEndian>()?)
    }
}

impl Decode for U8F8 {
    fn decode(input: &mut &[u8]) -> Result<Self> {
        Ok(Self::from_bits(input.read_u16::<BigEndian>()?))
    }
}

impl Decode for u32 {
    fn decode(input: &mut &[u8]) -> Result<Self> {
        Ok(input.read_u32::<BigEndian>()?)
    }
}

impl Decode for U16F16 {
    fn decode(input: &mut &[u8]) -> Result<Self> {
        Ok(Self::from_bits(input.read_u32::<BigEndian>()?))
    }
}

impl Decode for U2F30 {
    fn decode(input: &mut &[u8]) -> Result<Self> {
        Ok(Self::from_bits(input.read_u32::<BigEndian>()?))
    }
}

impl Decode for u64 {
    fn decode(input: &mut &[u8]) -> Result<Self> {
        Ok(input.read_u64::<BigEndian>()?)
    }
}

impl Decode for String {
    fn decode(input: &mut &[u8]) -> Result<Self> {
        let length = input.iter().position(|&c| c == 0).unwrap_or(input.len());
        let (data, remaining_data) = input.split_at(length);
        *input = remaining_data.get(1..).unwrap_or_default();
        Ok(String::from_utf8_lossy(data).into_owned())
    }
}

/// Reads the version and flags of a full box.
pub fn decode_full_box_header(input: &mut &[u8]) -> Result<(u8, u32)> {
    let version = input.read_u8()?;
    let flags = input.read_u24::<BigEndian>()?;
    Ok((version, flags))
}

/// Splits `length` bytes off the front of `input`.
pub fn take<'a>(input: &mut &'a [u8], length: usize) -> Result<&'a [u8]> {
    if input.len() < length {
        return Err(io::Error::from(io::ErrorKind::UnexpectedEof).into());
    }
    let (data, remaining_data) = input.split_at(length);
    *input = remaining_data;
    Ok(data)
}

#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct FourCC(pub u32);

impl FourCC {
    pub const fn from_bytes(bytes: [u8; 4]) -> Self {
        Self(u32::from_be_bytes(bytes))
    }

    pub const fn to_bytes(self) -> [u8; 4] {
        self.0.to_be_bytes()
    }
}

impl Display for FourCC {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        for byte in self.to_bytes() {
            if byte.is_ascii_graphic() || byte == b' ' {
                write!(f, "{}", byte as char)?;
            } else {
                write!(f, "\\x{byte:02x}")?;
            }
        }
        Ok(())
    }
}

impl Debug for FourCC {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        Display::fmt(self, f)
    }
}

impl Decode for FourCC {
    fn decode(input: &mut &[u8]) -> Result<Self> {
        Ok(Self(input.read_u32::<BigEndian>()?))
    }
}

// ISO/IEC 14496-12 4.2
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoxHeader {
    pub tag: FourCC,
    /// Size of the whole box including this header, 0 when the box runs to
    /// the end of its enclosing region.
    pub declared_size: u64,
    pub header_length: u64,
}

impl BoxHeader {
    pub const COMPACT_LENGTH: u64 = 8;
    pub const EXTENDED_LENGTH: u64 = 16;

    /// Reads one header from `input`, which is positioned at `offset`.
    pub fn read(input: &mut impl Read, offset: u64) -> Result<Self> {
        let truncated = |error: io::Error| match error.kind() {
            io::ErrorKind::UnexpectedEof => Error::TruncatedStream { offset },
            _ => Error::Io(error),
        };

        let size = input.read_u32::<BigEndian>().map_err(truncated)?;
        let tag = FourCC(input.read_u32::<BigEndian>().map_err(truncated)?);
        let (declared_size, header_length) = if size == 1 {
            let size = input.read_u64::<BigEndian>().map_err(truncated)?;
            (size, Self::EXTENDED_LENGTH)
        } else {
            (size as u64, Self::COMPACT_LENGTH)
        };

        if declared_size != 0 && declared_size < header_length {
            return Err(Error::InvalidSize {
                offset,
                size: declared_size,
                header_length,
            });
        }

        Ok(Self {
            tag,
            declared_size,
            header_length,
        })
    }

    /// Length of the body, or `None` if the box extends to the end of its
    /// enclosing region.
    pub fn body_length(&self) -> Option<u64> {
        match self.declared_size {
            0 => None,
            size => Some(size - self.header_length),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Matrix {
    pub a: U16F16,
    pub b: U16F16,
    pub u: U2F30,
    pub c: U16F16,
    pub d: U16F16,
    pub v: U2F30,
    pub x: U16F16,
    pub y: U16F16,
    pub w: U2F30,
}

impl Decode for Matrix {
    fn decode(input: &mut &[u8]) -> Result<Self> {
        Ok(Self {
            a: Decode::decode(input)?,
            b: Decode::decode(input)?,
            u: Decode::decode(input)?,
            c: Decode::decode(input)?,
            d: Decode::decode(input)?,
            v: Decode::decode(input)?,
            x: Decode::decode(input)?,
            y: Decode::decode(input)?,
            w: Decode::decode(input)?,
        })
    }
}

pub struct Language(pub u16);

impl Debug for Language {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let bytes = self.0.to_be_bytes();
        let c0 = (bytes[0] >> 2 & 0x1F) + 0x60;
        let c1 = (((bytes[0] & 0x3) << 3) | (bytes[1] >> 5)) + 0x60;
        let c2 = (bytes[1] & 0x1F) + 0x60;
        f.write_str(&String::from_utf8_lossy(&[c0, c1, c2]))
    }
}
