/// Compression error kinds
pub mod error;
pub(crate) mod transpose;

pub use error::CompressionError;

use crate::{
    constants::{MIN_COMPRESSION_FOLD, MIN_COMPRESSION_SIZE, ZSTD_LEVEL_FLOAT, ZSTD_LEVEL_GENERAL},
    container::{md5_digest, DataContainer, Encoder},
};
use tracing::{debug, warn};

/// Pick the zstd level for a container: float streams compress poorly at
/// high levels, so they run fast
fn level_for(container: &DataContainer) -> i32 {
    if container.header.data.controller.ty.is_float() {
        ZSTD_LEVEL_FLOAT
    } else {
        ZSTD_LEVEL_GENERAL
    }
}

/// Compress a sealed container in place. Uniform and tiny streams are
/// stored verbatim; a stream that fails the minimum fold test falls back to
/// verbatim storage and re-stamps its header.
pub fn compress_container(container: &mut DataContainer) -> Result<(), CompressionError> {
    compress_container_with(container, Encoder::Zstd)
}

/// Compress a sealed container with a caller-selected encoder. The textual
/// encoder is opt-in for high-entropy string streams such as variant names.
pub fn compress_container_with(
    container: &mut DataContainer,
    encoder: Encoder,
) -> Result<(), CompressionError> {
    let uniform = container.header.data.controller.uniform;
    let u_length = container.data_uncompressed.len();
    if uniform || u_length < MIN_COMPRESSION_SIZE || encoder == Encoder::None {
        store_data_verbatim(container);
        return compress_strides(container);
    }

    let compressed = match encoder {
        Encoder::Zstd => zstd::bulk::compress(&container.data_uncompressed, level_for(container))?,
        Encoder::Textual => textual_compress(&container.data_uncompressed)?,
        Encoder::None => unreachable!("handled above"),
    };

    let fold = u_length as f64 / compressed.len().max(1) as f64;
    if fold < MIN_COMPRESSION_FOLD {
        debug!(u_length, fold, "compression fold below threshold, storing verbatim");
        store_data_verbatim(container);
        return compress_strides(container);
    }

    container.header.data.controller.encoder = encoder;
    container.header.data.c_length = compressed.len() as u32;
    container.header.data.u_length = u_length as u32;
    container.data = compressed;
    compress_strides(container)
}

fn store_data_verbatim(container: &mut DataContainer) {
    container.data = container.data_uncompressed.clone();
    container.header.data.controller.encoder = Encoder::None;
    container.header.data.c_length = container.data_uncompressed.len() as u32;
    container.header.data.u_length = container.data_uncompressed.len() as u32;
}

fn compress_strides(container: &mut DataContainer) -> Result<(), CompressionError> {
    let u_length = container.strides_uncompressed.len();
    if u_length == 0 {
        container.strides.clear();
        container.header.stride.c_length = 0;
        container.header.stride.u_length = 0;
        return Ok(());
    }
    if container.header.stride.controller.uniform || u_length < MIN_COMPRESSION_SIZE {
        store_strides_verbatim(container);
        return Ok(());
    }

    let compressed = zstd::bulk::compress(&container.strides_uncompressed, ZSTD_LEVEL_GENERAL)?;
    let fold = u_length as f64 / compressed.len().max(1) as f64;
    if fold < MIN_COMPRESSION_FOLD {
        store_strides_verbatim(container);
        return Ok(());
    }

    container.header.stride.controller.encoder = Encoder::Zstd;
    container.header.stride.c_length = compressed.len() as u32;
    container.header.stride.u_length = u_length as u32;
    container.strides = compressed;
    Ok(())
}

fn store_strides_verbatim(container: &mut DataContainer) {
    container.strides = container.strides_uncompressed.clone();
    container.header.stride.controller.encoder = Encoder::None;
    container.header.stride.c_length = container.strides_uncompressed.len() as u32;
    container.header.stride.u_length = container.strides_uncompressed.len() as u32;
}

/// Decompress a container in place and verify the MD5 of the recovered
/// data and stride streams
pub fn decompress_container(container: &mut DataContainer) -> Result<(), CompressionError> {
    container.data_uncompressed = match container.header.data.controller.encoder {
        Encoder::None => container.data.clone(),
        Encoder::Zstd => zstd::bulk::decompress(
            &container.data,
            container.header.data.u_length as usize + 64,
        )?,
        Encoder::Textual => textual_decompress(&container.data)?,
    };
    if md5_digest(&container.data_uncompressed) != container.header.data.md5 {
        warn!("container data stream failed its integrity check");
        return Err(CompressionError::Integrity { target: "data" });
    }

    if container.header.stride.c_length > 0 {
        container.strides_uncompressed = match container.header.stride.controller.encoder {
            Encoder::None => container.strides.clone(),
            Encoder::Zstd => zstd::bulk::decompress(
                &container.strides,
                container.header.stride.u_length as usize + 64,
            )?,
            Encoder::Textual => textual_decompress(&container.strides)?,
        };
        if md5_digest(&container.strides_uncompressed) != container.header.stride.md5 {
            warn!("container stride stream failed its integrity check");
            return Err(CompressionError::Integrity { target: "stride" });
        }
    }
    Ok(())
}

/// Compress the sample permutation array: bit-transpose, then zstd. The MD5
/// and `u_length` refer to the raw (pre-transpose) bytes.
pub fn compress_permutation(container: &mut DataContainer) -> Result<(), CompressionError> {
    let transposed = transpose::transpose_bits(&container.data_uncompressed);
    let compressed = zstd::bulk::compress(&transposed, ZSTD_LEVEL_FLOAT)?;
    container.header.data.controller.encoder = Encoder::Zstd;
    container.header.data.u_length = container.data_uncompressed.len() as u32;
    container.header.data.c_length = compressed.len() as u32;
    container.data = compressed;
    Ok(())
}

/// Invert [`compress_permutation`]: zstd, un-transpose, truncate the
/// alignment padding, verify
pub fn decompress_permutation(container: &mut DataContainer) -> Result<(), CompressionError> {
    if container.header.data.controller.encoder != Encoder::Zstd {
        return Err(CompressionError::WrongEncoder("zstd"));
    }
    let u_length = container.header.data.u_length as usize;
    let transposed = zstd::bulk::decompress(&container.data, u_length + 64)?;
    let mut raw = transpose::untranspose_bits(&transposed);
    raw.truncate(u_length);
    if md5_digest(&raw) != container.header.data.md5 {
        return Err(CompressionError::Integrity { target: "data" });
    }
    container.data_uncompressed = raw;
    Ok(())
}

fn textual_compress(data: &[u8]) -> Result<Vec<u8>, CompressionError> {
    let params = brotli::enc::BrotliEncoderParams::default();
    let mut out: Vec<u8> = Vec::with_capacity(data.len() / 2 + 64);
    brotli::BrotliCompress(&mut &data[..], &mut out, &params)?;
    Ok(out)
}

fn textual_decompress(data: &[u8]) -> Result<Vec<u8>, CompressionError> {
    let mut out: Vec<u8> = Vec::new();
    brotli::BrotliDecompress(&mut &data[..], &mut out)?;
    Ok(out)
}
