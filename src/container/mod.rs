/// Errors raised by container assembly and decoding
pub mod error;
/// Stream and container headers
pub mod header;

pub use error::ContainerError;
pub use header::{
    ContainerHeader, Encoder, Encryption, StreamController, StreamHeader, TachyonType,
    CONTAINER_HEADER_SIZE, STREAM_HEADER_SIZE,
};

use crate::io::{read_bytes_exact, Streamable};
use md5::{Digest, Md5};
use std::io::{Read, Seek, Write};

/// Missing-value sentinel in `i32` construction space
pub const MISSING_INT: i32 = i32::MIN;
/// End-of-vector sentinel in `i32` construction space
pub const EOV_INT: i32 = i32::MIN + 1;

pub(crate) fn md5_digest(bytes: &[u8]) -> [u8; 16] {
    let mut hasher = Md5::new();
    hasher.update(bytes);
    hasher.finalize().into()
}

/// Primary data container. Stores one typed byte stream, an optional stride
/// stream, and the header required to restore the input values. Containers
/// are mutated only during block assembly, sealed with [`update_container`],
/// then compressed, optionally encrypted, and serialized — never mutated
/// afterwards.
///
/// [`update_container`]: DataContainer::update_container
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DataContainer {
    pub header: ContainerHeader,
    /// Compressed (or encrypted) data bytes
    pub data: Vec<u8>,
    /// Compressed stride bytes
    pub strides: Vec<u8>,
    /// Uncompressed data bytes
    pub data_uncompressed: Vec<u8>,
    /// Uncompressed stride bytes, always `u32` during construction
    pub strides_uncompressed: Vec<u8>,
}

impl DataContainer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_type(ty: TachyonType) -> Self {
        let mut container = Self::default();
        container.header.data.controller.ty = ty;
        container
    }

    /// Set the primitive type for the values in this container
    pub fn set_type(&mut self, ty: TachyonType) {
        self.header.data.controller.ty = ty;
    }

    /// Set a fixed stride size. -1 is reserved for mixed strides.
    pub fn set_stride_size(&mut self, stride: i32) {
        self.header.data.stride = stride;
    }

    pub fn is_encrypted(&self) -> bool {
        self.header.data.controller.is_encrypted()
    }

    pub fn is_empty(&self) -> bool {
        self.header.n_entries == 0 && self.header.n_additions == 0
    }

    pub fn n_entries(&self) -> u32 {
        self.header.n_entries
    }

    /// Record that one more logical entry has been appended
    pub fn increment(&mut self) {
        self.header.n_entries += 1;
    }

    /// Switch this container to mixed per-record strides
    pub fn trigger_mixed_stride(&mut self) {
        self.header.data.stride = -1;
        self.header.data.controller.mixed_stride = true;
    }

    /// Add a stride value for the current record. All strides are `u32`
    /// during construction; mixed strides are detected on the fly.
    pub fn add_stride(&mut self, value: u32) -> Result<(), ContainerError> {
        // A container that was sealed with a fixed stride refuses divergent
        // additions
        if !self.header.data.controller.mixed_stride
            && self.header.n_strides > 0
            && self.strides_uncompressed.is_empty()
            && self.header.data.stride != value as i32
        {
            return Err(ContainerError::StrideMismatch {
                fixed: self.header.data.stride,
                added: value,
            });
        }

        if self.header.n_strides == 0 {
            // First stride fixes the candidate size
            self.header.data.stride = value as i32;
            self.header.stride.controller.ty = TachyonType::UInt32;
        } else if !self.header.data.controller.mixed_stride
            && self.header.data.stride != value as i32
        {
            self.trigger_mixed_stride();
        }

        self.strides_uncompressed.extend_from_slice(&value.to_le_bytes());
        self.header.n_strides += 1;
        Ok(())
    }

    /// Add an integer value. Integers are always widened to `i32` during
    /// construction; MISSING and EOV sentinels arrive pre-expanded into
    /// `i32` space.
    pub fn add(&mut self, value: i32) -> Result<(), ContainerError> {
        self.check_family(TachyonType::Int32, true)?;
        self.data_uncompressed.extend_from_slice(&value.to_le_bytes());
        self.header.n_additions += 1;
        Ok(())
    }

    pub fn add_f32(&mut self, value: f32) -> Result<(), ContainerError> {
        self.check_family(TachyonType::Float32, false)?;
        self.data_uncompressed.extend_from_slice(&value.to_le_bytes());
        self.header.n_additions += 1;
        Ok(())
    }

    pub fn add_f64(&mut self, value: f64) -> Result<(), ContainerError> {
        self.check_family(TachyonType::Float64, false)?;
        self.data_uncompressed.extend_from_slice(&value.to_le_bytes());
        self.header.n_additions += 1;
        Ok(())
    }

    /// Add string bytes; the literal counter advances by the byte count
    pub fn add_string(&mut self, value: &str) -> Result<(), ContainerError> {
        self.check_family(TachyonType::Char, false)?;
        self.data_uncompressed.extend_from_slice(value.as_bytes());
        self.header.n_additions += value.len() as u32;
        Ok(())
    }

    /// Append raw bytes as a single literal value, bypassing type checks.
    /// Used by record-layout encoders that pack their own framing.
    pub fn add_literal_value(&mut self, bytes: &[u8]) {
        self.data_uncompressed.extend_from_slice(bytes);
        self.header.n_additions += 1;
    }

    /// Append raw bytes counting each byte as a literal
    pub fn add_literal_bytes(&mut self, bytes: &[u8]) {
        self.data_uncompressed.extend_from_slice(bytes);
        self.header.n_additions += bytes.len() as u32;
    }

    fn check_family(&mut self, ty: TachyonType, signed: bool) -> Result<(), ContainerError> {
        let controller = &mut self.header.data.controller;
        if self.header.n_additions == 0 && controller.ty == TachyonType::Unknown {
            controller.ty = ty;
            controller.signed = signed;
        }
        if controller.ty != ty || controller.signed != signed {
            return Err(ContainerError::TypeMismatch {
                held: controller.ty,
                added: ty,
            });
        }
        Ok(())
    }

    /// Check whether all records are byte-identical under the declared
    /// fixed stride. Uniform containers keep a single record.
    pub fn check_uniformity(&mut self) -> bool {
        if self.header.n_entries == 0 || self.header.data.controller.mixed_stride {
            return false;
        }
        let stride = self.header.data.stride;
        if stride < 1 {
            return false;
        }
        let width = match self.header.data.controller.ty.width() {
            Some(width) => width,
            None => return false,
        };
        let chunk = stride as usize * width;
        if chunk == 0 || self.data_uncompressed.len() != chunk * self.header.n_entries as usize {
            return false;
        }

        let first = &self.data_uncompressed[..chunk];
        let uniform = self
            .data_uncompressed
            .chunks_exact(chunk)
            .all(|record| record == first);
        if uniform {
            self.data_uncompressed.truncate(chunk);
            self.header.data.controller.uniform = true;
        }
        uniform
    }

    /// Shrink the integer word size to the narrowest width representing
    /// every value plus the two reserved sentinels. Narrowing never aliases
    /// a sentinel with a live value; when no narrower width is safe the
    /// stream is left at `i32` (or widened to `i64`).
    pub fn reformat_integer(&mut self) -> Result<(), ContainerError> {
        let controller = self.header.data.controller;
        if controller.ty != TachyonType::Int32 || !controller.signed {
            return Ok(());
        }
        if self.data_uncompressed.len() % 4 != 0 {
            return Ok(());
        }

        let values: Vec<i32> = self
            .data_uncompressed
            .chunks_exact(4)
            .map(|chunk| i32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect();
        if values.is_empty() {
            return Ok(());
        }

        let mut min = i32::MAX;
        let mut max = i32::MIN;
        for value in &values {
            if *value == MISSING_INT || *value == EOV_INT {
                continue;
            }
            min = min.min(*value);
            max = max.max(*value);
        }
        if min > max {
            // Only sentinels present
            min = 0;
            max = 0;
        }

        // Reserve the two lowest codes of the target width for the sentinels
        let ty = if min >= i32::from(i8::MIN) + 2 && max <= i32::from(i8::MAX) {
            TachyonType::Int8
        } else if min >= i32::from(i16::MIN) + 2 && max <= i32::from(i16::MAX) {
            TachyonType::Int16
        } else if min >= i32::MIN + 2 {
            TachyonType::Int32
        } else {
            TachyonType::Int64
        };

        if ty == TachyonType::Int32 {
            return Ok(());
        }

        let mut rewritten: Vec<u8> =
            Vec::with_capacity(values.len() * ty.width().unwrap_or(4));
        for value in &values {
            match ty {
                TachyonType::Int8 => {
                    let narrow = match *value {
                        MISSING_INT => i8::MIN,
                        EOV_INT => i8::MIN + 1,
                        v => v as i8,
                    };
                    rewritten.extend_from_slice(&narrow.to_le_bytes());
                }
                TachyonType::Int16 => {
                    let narrow = match *value {
                        MISSING_INT => i16::MIN,
                        EOV_INT => i16::MIN + 1,
                        v => v as i16,
                    };
                    rewritten.extend_from_slice(&narrow.to_le_bytes());
                }
                TachyonType::Int64 => {
                    let wide = match *value {
                        MISSING_INT => i64::MIN,
                        EOV_INT => i64::MIN + 1,
                        v => i64::from(v),
                    };
                    rewritten.extend_from_slice(&wide.to_le_bytes());
                }
                _ => unreachable!("narrowing targets are fixed above"),
            }
        }
        self.data_uncompressed = rewritten;
        self.header.data.controller.ty = ty;
        Ok(())
    }

    /// Collapse uniform strides into the header, or narrow the stride
    /// stream's word size
    pub fn reformat_stride(&mut self) -> Result<(), ContainerError> {
        if self.header.n_strides == 0 || self.strides_uncompressed.is_empty() {
            return Ok(());
        }
        let strides: Vec<u32> = self
            .strides_uncompressed
            .chunks_exact(4)
            .map(|chunk| u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect();

        let first = strides[0];
        if strides.iter().all(|stride| *stride == first) {
            // Homogeneous strides live in the header alone
            self.header.data.stride = first as i32;
            self.header.data.controller.mixed_stride = false;
            self.strides_uncompressed.clear();
            self.header.stride = StreamHeader::default();
            return Ok(());
        }

        let max = strides.iter().copied().max().unwrap_or(0);
        let ty = if max <= u32::from(u8::MAX) {
            TachyonType::UInt8
        } else if max <= u32::from(u16::MAX) {
            TachyonType::UInt16
        } else {
            TachyonType::UInt32
        };
        if ty != TachyonType::UInt32 {
            let mut rewritten: Vec<u8> = Vec::with_capacity(strides.len() * ty.width().unwrap_or(4));
            for stride in &strides {
                match ty {
                    TachyonType::UInt8 => rewritten.push(*stride as u8),
                    TachyonType::UInt16 => {
                        rewritten.extend_from_slice(&(*stride as u16).to_le_bytes())
                    }
                    _ => unreachable!(),
                }
            }
            self.strides_uncompressed = rewritten;
        }
        self.header.stride.controller.ty = ty;
        self.header.stride.controller.signed = false;
        Ok(())
    }

    /// Generate the MD5 checksums of the uncompressed data and, if present,
    /// the uncompressed strides
    pub fn generate_md5(&mut self) {
        self.header.data.md5 = md5_digest(&self.data_uncompressed);
        self.header.data.u_length = self.data_uncompressed.len() as u32;
        if !self.strides_uncompressed.is_empty() {
            self.header.stride.md5 = md5_digest(&self.strides_uncompressed);
            self.header.stride.u_length = self.strides_uncompressed.len() as u32;
        }
    }

    /// Verify the stored MD5 of the uncompressed data stream
    pub fn check_md5(&self) -> Result<(), ContainerError> {
        if !self.header.data.check_md5(&md5_digest(&self.data_uncompressed)) {
            return Err(ContainerError::integrity("data"));
        }
        if !self.strides_uncompressed.is_empty()
            && !self
                .header
                .stride
                .check_md5(&md5_digest(&self.strides_uncompressed))
        {
            return Err(ContainerError::integrity("stride"));
        }
        Ok(())
    }

    /// Seal the container: uniformity, integer and stride narrowing, then
    /// checksums. Containers are never mutated after sealing.
    pub fn update_container(
        &mut self,
        reformat_data: bool,
        reformat_stride: bool,
    ) -> Result<(), ContainerError> {
        if reformat_data {
            if !self.check_uniformity() {
                self.reformat_integer()?;
            }
        }
        if reformat_stride {
            self.reformat_stride()?;
        }
        self.generate_md5();
        Ok(())
    }

    /// Number of bytes this container occupies when serialized
    pub fn object_size(&self) -> u64 {
        (CONTAINER_HEADER_SIZE + self.data.len() + self.strides.len()) as u64
    }

    /// Decode the data stream as integers, re-widening narrowed words and
    /// translating the per-width sentinels back into `i32` space
    pub fn integer_values(&self) -> Result<Vec<i32>, ContainerError> {
        let ty = self.header.data.controller.ty;
        let bytes = &self.data_uncompressed;
        let values = match ty {
            TachyonType::Int8 => bytes
                .iter()
                .map(|byte| match *byte as i8 {
                    v if v == i8::MIN => MISSING_INT,
                    v if v == i8::MIN + 1 => EOV_INT,
                    v => i32::from(v),
                })
                .collect(),
            TachyonType::UInt8 => bytes.iter().map(|byte| i32::from(*byte)).collect(),
            TachyonType::Int16 => bytes
                .chunks_exact(2)
                .map(|chunk| match i16::from_le_bytes([chunk[0], chunk[1]]) {
                    v if v == i16::MIN => MISSING_INT,
                    v if v == i16::MIN + 1 => EOV_INT,
                    v => i32::from(v),
                })
                .collect(),
            TachyonType::UInt16 => bytes
                .chunks_exact(2)
                .map(|chunk| i32::from(u16::from_le_bytes([chunk[0], chunk[1]])))
                .collect(),
            TachyonType::Int32 => bytes
                .chunks_exact(4)
                .map(|chunk| i32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
                .collect(),
            TachyonType::Int64 => bytes
                .chunks_exact(8)
                .map(|chunk| {
                    let wide = i64::from_le_bytes([
                        chunk[0], chunk[1], chunk[2], chunk[3], chunk[4], chunk[5], chunk[6],
                        chunk[7],
                    ]);
                    match wide {
                        v if v == i64::MIN => MISSING_INT,
                        v if v == i64::MIN + 1 => EOV_INT,
                        v => v as i32,
                    }
                })
                .collect(),
            other => {
                return Err(ContainerError::TypeMismatch {
                    held: other,
                    added: TachyonType::Int32,
                })
            }
        };
        Ok(values)
    }

    /// Decode the data stream as 32-bit floats
    pub fn float_values(&self) -> Result<Vec<f32>, ContainerError> {
        if self.header.data.controller.ty != TachyonType::Float32 {
            return Err(ContainerError::TypeMismatch {
                held: self.header.data.controller.ty,
                added: TachyonType::Float32,
            });
        }
        Ok(self
            .data_uncompressed
            .chunks_exact(4)
            .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect())
    }

    /// Decode the stride stream, honoring its narrowed word size
    pub fn stride_values(&self) -> Result<Vec<u32>, ContainerError> {
        let bytes = &self.strides_uncompressed;
        let values = match self.header.stride.controller.ty {
            TachyonType::UInt8 => bytes.iter().map(|byte| u32::from(*byte)).collect(),
            TachyonType::UInt16 => bytes
                .chunks_exact(2)
                .map(|chunk| u32::from(u16::from_le_bytes([chunk[0], chunk[1]])))
                .collect(),
            _ => bytes
                .chunks_exact(4)
                .map(|chunk| u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
                .collect(),
        };
        Ok(values)
    }
}

impl Streamable for DataContainer {
    type StreamError = ContainerError;

    fn write_bytes<W: Write + Seek>(&self, w: &mut W) -> Result<(), Self::StreamError> {
        // Header precedes the stream bytes so encrypted containers stay
        // self-describing
        self.header.write_bytes(w)?;
        w.write_all(&self.data)?;
        w.write_all(&self.strides)?;
        Ok(())
    }

    fn read_bytes<R: Read + Seek>(r: &mut R) -> Result<Self, Self::StreamError> {
        let header = ContainerHeader::read_bytes(r)?;
        // Encrypted containers carry a single opaque payload
        let (data, strides) = if header.data.controller.is_encrypted() {
            (read_bytes_exact(r, header.data.e_length as usize)?, Vec::new())
        } else {
            (
                read_bytes_exact(r, header.data.c_length as usize)?,
                read_bytes_exact(r, header.stride.c_length as usize)?,
            )
        };
        Ok(Self {
            header,
            data,
            strides,
            data_uncompressed: Vec::new(),
            strides_uncompressed: Vec::new(),
        })
    }
}
