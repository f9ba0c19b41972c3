//! Payload compression announced through the `content-encoding` header.

use bytes::Bytes;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use std::collections::HashMap;
use std::io::{Read, Write};

use finstream_metadata::Compression;

use crate::error::CodecError;

pub const CONTENT_ENCODING_HEADER: &str = "content-encoding";

const IDENTITY: &str = "identity";
const GZIP: &str = "gzip";
const ZSTD: &str = "zstd";
const ZSTD_LEVEL: i32 = 3;

/// Header value announcing a compression codec
pub fn content_encoding(compression: Compression) -> &'static str {
    match compression {
        Compression::None => IDENTITY,
        Compression::Gzip => GZIP,
        Compression::Zstd => ZSTD,
    }
}

/// Compress a serialized payload
pub fn encode_payload(compression: Compression, data: &[u8]) -> Result<Bytes, CodecError> {
    match compression {
        Compression::None => Ok(Bytes::copy_from_slice(data)),
        Compression::Gzip => {
            let mut encoder = GzEncoder::new(Vec::new(), flate2::Compression::default());
            encoder.write_all(data)?;
            Ok(Bytes::from(encoder.finish()?))
        }
        Compression::Zstd => Ok(Bytes::from(zstd::encode_all(data, ZSTD_LEVEL)?)),
    }
}

/// Reverse the compression announced in `headers`; a missing header means identity.
pub fn decode_payload(headers: &HashMap<String, String>, data: &Bytes) -> Result<Bytes, CodecError> {
    let encoding = headers
        .get(CONTENT_ENCODING_HEADER)
        .map(|v| v.trim().to_ascii_lowercase());
    match encoding.as_deref() {
        None | Some("") | Some(IDENTITY) => Ok(data.clone()),
        Some(GZIP) => {
            let mut decoder = GzDecoder::new(data.as_ref());
            let mut out = Vec::new();
            decoder.read_to_end(&mut out)?;
            Ok(Bytes::from(out))
        }
        Some(ZSTD) => Ok(Bytes::from(zstd::decode_all(data.as_ref())?)),
        Some(other) => Err(CodecError::UnsupportedEncoding(other.to_string())),
    }
}
