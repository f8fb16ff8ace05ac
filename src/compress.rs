//! Wire codec for the agent protocol envelope (§4.4, §6): Base64 text
//! wrapping a zlib/lz4-compressed blob, itself JSON or MsgPack depending on
//! protocol version.
//!
//! Grounded on `taos.im.utils.compress.compress/decompress`: the codec and
//! version selector, and the legacy `{payload, books}` envelope that decodes
//! each field independently and merges them.

use base64::{engine::general_purpose::STANDARD, Engine};
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use std::io::{Read, Write};
use thiserror::Error;

/// Protocol version at which the inner encoding switches from JSON to
/// MsgPack (named for the source constant it mirrors).
pub const V_MSGPACK_SWITCH: u32 = 45;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Codec {
    Zlib,
    Lz4,
}

#[derive(Debug, Error)]
pub enum CompressError {
    #[error("base64 decode failed: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("json decode failed: {0}")]
    Json(#[from] serde_json::Error),
    #[error("msgpack decode failed: {0}")]
    MsgPack(#[from] rmp_serde::decode::Error),
    #[error("msgpack encode failed: {0}")]
    MsgPackEncode(#[from] rmp_serde::encode::Error),
}

fn compress_bytes(codec: Codec, raw: &[u8]) -> Result<Vec<u8>, CompressError> {
    match codec {
        Codec::Zlib => {
            let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
            encoder.write_all(raw)?;
            Ok(encoder.finish()?)
        }
        Codec::Lz4 => Ok(lz4_flex::compress_prepend_size(raw)),
    }
}

fn decompress_bytes(codec: Codec, blob: &[u8]) -> Result<Vec<u8>, CompressError> {
    match codec {
        Codec::Zlib => {
            let mut decoder = ZlibDecoder::new(blob);
            let mut out = Vec::new();
            decoder.read_to_end(&mut out)?;
            Ok(out)
        }
        Codec::Lz4 => lz4_flex::decompress_size_prepended(blob).map_err(|e| {
            CompressError::Io(std::io::Error::new(std::io::ErrorKind::InvalidData, e))
        }),
    }
}

fn encode_inner<T: Serialize>(value: &T, protocol_version: u32) -> Result<Vec<u8>, CompressError> {
    if protocol_version < V_MSGPACK_SWITCH {
        Ok(serde_json::to_vec(value)?)
    } else {
        Ok(rmp_serde::to_vec_named(value)?)
    }
}

fn decode_inner<T: DeserializeOwned>(
    bytes: &[u8],
    protocol_version: u32,
) -> Result<T, CompressError> {
    if protocol_version < V_MSGPACK_SWITCH {
        Ok(serde_json::from_slice(bytes)?)
    } else {
        Ok(rmp_serde::from_slice(bytes)?)
    }
}

/// Encode `value` as Base64(codec(JSON|MsgPack(value))), mirroring the
/// agent protocol envelope.
pub fn compress<T: Serialize>(
    value: &T,
    codec: Codec,
    protocol_version: u32,
) -> Result<String, CompressError> {
    let inner = encode_inner(value, protocol_version)?;
    let blob = compress_bytes(codec, &inner)?;
    Ok(STANDARD.encode(blob))
}

/// Decode a Base64(codec(JSON|MsgPack(value))) payload.
pub fn decompress<T: DeserializeOwned>(
    payload: &str,
    codec: Codec,
    protocol_version: u32,
) -> Result<T, CompressError> {
    let blob = STANDARD.decode(payload)?;
    let inner = decompress_bytes(codec, &blob)?;
    decode_inner(&inner, protocol_version)
}

/// Decode the legacy `{payload, books}` envelope: each field is independently
/// Base64/codec/encoding-decoded, then merged as `{books, ..payload}`.
pub fn decompress_legacy_envelope(
    payload_field: &str,
    books_field: &str,
    codec: Codec,
    protocol_version: u32,
) -> Result<Value, CompressError> {
    let payload: Value = decompress(payload_field, codec, protocol_version)?;
    let books: Value = decompress(books_field, codec, protocol_version)?;

    let mut merged = match payload {
        Value::Object(map) => map,
        other => {
            let mut map = serde_json::Map::new();
            map.insert("payload".to_string(), other);
            map
        }
    };
    merged.insert("books".to_string(), books);
    Ok(Value::Object(merged))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Sample {
        agent_id: u32,
        values: Vec<f64>,
    }

    fn sample() -> Sample {
        Sample {
            agent_id: 7,
            values: vec![1.0, 2.5, -3.25],
        }
    }

    #[test]
    fn round_trip_zlib_json() {
        let s = sample();
        let encoded = compress(&s, Codec::Zlib, V_MSGPACK_SWITCH - 1).unwrap();
        let decoded: Sample = decompress(&encoded, Codec::Zlib, V_MSGPACK_SWITCH - 1).unwrap();
        assert_eq!(s, decoded);
    }

    #[test]
    fn round_trip_lz4_msgpack() {
        let s = sample();
        let encoded = compress(&s, Codec::Lz4, V_MSGPACK_SWITCH).unwrap();
        let decoded: Sample = decompress(&encoded, Codec::Lz4, V_MSGPACK_SWITCH).unwrap();
        assert_eq!(s, decoded);
    }

    #[test]
    fn legacy_envelope_merges_books_and_payload() {
        let payload = serde_json::json!({"agent_id": 1, "instructions": []});
        let books = serde_json::json!({"0": {"bids": {}, "asks": {}}});
        let payload_enc = compress(&payload, Codec::Zlib, V_MSGPACK_SWITCH - 1).unwrap();
        let books_enc = compress(&books, Codec::Zlib, V_MSGPACK_SWITCH - 1).unwrap();

        let merged =
            decompress_legacy_envelope(&payload_enc, &books_enc, Codec::Zlib, V_MSGPACK_SWITCH - 1)
                .unwrap();
        assert_eq!(merged["agent_id"], 1);
        assert!(merged["books"].is_object());
    }
}
