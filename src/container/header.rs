use crate::{
    container::error::ContainerError,
    io::{read_lei32, read_leu16, read_leu32, read_leu64, Streamable},
};
use num_enum::{IntoPrimitive, TryFromPrimitive};
use std::io::{Read, Seek, Write};

/// Number of bytes in a serialized [`StreamHeader`]
pub const STREAM_HEADER_SIZE: usize = 2 + 4 * 5 + 16 + 4;
/// Number of bytes in a serialized [`ContainerHeader`]
pub const CONTAINER_HEADER_SIZE: usize = 8 + 4 * 3 + 2 * STREAM_HEADER_SIZE;

/// Primitive typing of a byte stream. `Struct` denotes a self-describing
/// layout and is used only for concatenated variable-length alleles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, TryFromPrimitive, IntoPrimitive)]
#[repr(u8)]
pub enum TachyonType {
    Int8 = 0,
    Int16 = 1,
    Int32 = 2,
    Int64 = 3,
    UInt8 = 4,
    UInt16 = 5,
    UInt32 = 6,
    UInt64 = 7,
    Float32 = 8,
    Float64 = 9,
    Char = 10,
    Boolean = 11,
    Struct = 12,
    #[default]
    Unknown = 13,
}

impl TachyonType {
    /// Byte width of one element, when the type has one
    pub fn width(&self) -> Option<usize> {
        match self {
            TachyonType::Int8 | TachyonType::UInt8 | TachyonType::Char | TachyonType::Boolean => {
                Some(1)
            }
            TachyonType::Int16 | TachyonType::UInt16 => Some(2),
            TachyonType::Int32 | TachyonType::UInt32 | TachyonType::Float32 => Some(4),
            TachyonType::Int64 | TachyonType::UInt64 | TachyonType::Float64 => Some(8),
            TachyonType::Struct | TachyonType::Unknown => None,
        }
    }

    pub fn is_float(&self) -> bool {
        matches!(self, TachyonType::Float32 | TachyonType::Float64)
    }
}

/// Compression codec applied to a byte stream. Tag 2 is the opt-in
/// high-entropy textual codec.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, TryFromPrimitive, IntoPrimitive)]
#[repr(u8)]
pub enum Encoder {
    #[default]
    None = 0,
    Zstd = 1,
    Textual = 2,
}

/// Encryption applied to a byte stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, TryFromPrimitive, IntoPrimitive)]
#[repr(u8)]
pub enum Encryption {
    #[default]
    None = 0,
    AesGcm256 = 1,
}

/// Controller bits for one byte stream
/// | signed:1 | mixed_stride:1 | uniform:1 | type:4 | encoder:3 | encryption:2 |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StreamController {
    pub signed: bool,
    pub mixed_stride: bool,
    pub uniform: bool,
    pub ty: TachyonType,
    pub encoder: Encoder,
    pub encryption: Encryption,
}

impl StreamController {
    pub fn to_u16(self) -> u16 {
        u16::from(self.signed)
            | u16::from(self.mixed_stride) << 1
            | u16::from(self.uniform) << 2
            | u16::from(u8::from(self.ty)) << 3
            | u16::from(u8::from(self.encoder)) << 7
            | u16::from(u8::from(self.encryption)) << 10
    }

    pub fn from_u16(value: u16) -> Result<Self, ContainerError> {
        Ok(Self {
            signed: value & 1 != 0,
            mixed_stride: value >> 1 & 1 != 0,
            uniform: value >> 2 & 1 != 0,
            ty: TachyonType::try_from((value >> 3 & 0xf) as u8)
                .map_err(|_| ContainerError::unknown_type((value >> 3 & 0xf) as u8))?,
            encoder: Encoder::try_from((value >> 7 & 0x7) as u8)
                .map_err(|_| ContainerError::unknown_encoder((value >> 7 & 0x7) as u8))?,
            encryption: Encryption::try_from((value >> 10 & 0x3) as u8)
                .map_err(|_| ContainerError::unknown_encryption((value >> 10 & 0x3) as u8))?,
        })
    }

    pub fn is_encrypted(&self) -> bool {
        self.encryption != Encryption::None
    }
}

/// Per-stream header: typing, framing and integrity of one byte stream.
/// A container carries two of these, one for data and one for strides.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamHeader {
    pub controller: StreamController,
    /// Stride size: -1 when strides are mixed, a non-negative value otherwise
    pub stride: i32,
    /// Byte offset relative to the block's compressed-data origin
    pub offset: u32,
    /// Compressed length
    pub c_length: u32,
    /// Uncompressed length
    pub u_length: u32,
    /// Encrypted length
    pub e_length: u32,
    /// MD5 digest of the uncompressed stream
    pub md5: [u8; 16],
    /// Global field identifier, -1 when not a dictionary-mapped stream
    pub global_key: i32,
}

impl Default for StreamHeader {
    fn default() -> Self {
        Self {
            controller: StreamController::default(),
            stride: 1,
            offset: 0,
            c_length: 0,
            u_length: 0,
            e_length: 0,
            md5: [0; 16],
            global_key: -1,
        }
    }
}

impl StreamHeader {
    pub fn has_mixed_stride(&self) -> bool {
        self.controller.mixed_stride
    }

    pub fn check_md5(&self, digest: &[u8; 16]) -> bool {
        &self.md5 == digest
    }
}

impl Streamable for StreamHeader {
    type StreamError = ContainerError;

    fn write_bytes<W: Write + Seek>(&self, w: &mut W) -> Result<(), Self::StreamError> {
        w.write_all(&self.controller.to_u16().to_le_bytes())?;
        w.write_all(&self.stride.to_le_bytes())?;
        w.write_all(&self.offset.to_le_bytes())?;
        w.write_all(&self.c_length.to_le_bytes())?;
        w.write_all(&self.u_length.to_le_bytes())?;
        w.write_all(&self.e_length.to_le_bytes())?;
        w.write_all(&self.md5)?;
        w.write_all(&self.global_key.to_le_bytes())?;
        Ok(())
    }

    fn read_bytes<R: Read + Seek>(r: &mut R) -> Result<Self, Self::StreamError> {
        let controller = StreamController::from_u16(read_leu16(r)?)?;
        let stride = read_lei32(r)?;
        let offset = read_leu32(r)?;
        let c_length = read_leu32(r)?;
        let u_length = read_leu32(r)?;
        let e_length = read_leu32(r)?;
        let mut md5 = [0u8; 16];
        r.read_exact(&mut md5)?;
        let global_key = read_lei32(r)?;
        Ok(Self {
            controller,
            stride,
            offset,
            c_length,
            u_length,
            e_length,
            md5,
            global_key,
        })
    }
}

/// Header of a data container: counters plus the data and stride stream
/// headers. Serialized in front of the stream bytes themselves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ContainerHeader {
    /// Unique identifier; links encrypted containers to their keychain entry
    pub identifier: u64,
    /// Number of container entries (records appended)
    pub n_entries: u32,
    /// Number of addition operations executed
    pub n_additions: u32,
    /// Number of stride elements
    pub n_strides: u32,
    pub data: StreamHeader,
    pub stride: StreamHeader,
}

impl ContainerHeader {
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

impl Streamable for ContainerHeader {
    type StreamError = ContainerError;

    fn write_bytes<W: Write + Seek>(&self, w: &mut W) -> Result<(), Self::StreamError> {
        w.write_all(&self.identifier.to_le_bytes())?;
        w.write_all(&self.n_entries.to_le_bytes())?;
        w.write_all(&self.n_additions.to_le_bytes())?;
        w.write_all(&self.n_strides.to_le_bytes())?;
        self.data.write_bytes(w)?;
        self.stride.write_bytes(w)?;
        Ok(())
    }

    fn read_bytes<R: Read + Seek>(r: &mut R) -> Result<Self, Self::StreamError> {
        Ok(Self {
            identifier: read_leu64(r)?,
            n_entries: read_leu32(r)?,
            n_additions: read_leu32(r)?,
            n_strides: read_leu32(r)?,
            data: StreamHeader::read_bytes(r)?,
            stride: StreamHeader::read_bytes(r)?,
        })
    }
}
