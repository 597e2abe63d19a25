//! Versioned compressed encoding for cached responses
//!
//! ```text
//! blob    = version:u8 ++ lz4_block(payload)          (lz4 size-prefixed)
//!
//! v1 payload (legacy, read-only upgrade path):
//!   JSON {"url", "status", "headers"?, "body", "time"?}
//!
//! v2 payload (current):
//!   status:u16 | fetched_at_us:i64 | url_len:u32 url | headers_len:u32 headers | body_len:u32 body
//! ```
//!
//! All integers are big-endian.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use chrono::{DateTime, Duration, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use super::CachedResponse;
use crate::error::{Error, Result};
use crate::utils::{from_epoch_f64, to_epoch_f64};

/// Encoding version found in a blob
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Version {
    Legacy = 0x01,
    Typed = 0x02,
}

impl Version {
    /// The version written by [`encode`]
    pub const CURRENT: Version = Version::Typed;

    fn from_byte(byte: u8) -> Result<Self> {
        match byte {
            0x01 => Ok(Self::Legacy),
            0x02 => Ok(Self::Typed),
            other => Err(Error::decode(format!("unknown cache encoding version 0x{other:02x}"))),
        }
    }
}

/// Age assigned to legacy entries stored without a fetch time
pub fn legacy_default_age() -> Duration {
    Duration::hours(24)
}

/// Body or header bytes as older writers stored them
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
enum LegacyBytes {
    Text(String),
    Raw(Vec<u8>),
    Structured(serde_json::Value),
}

impl LegacyBytes {
    fn into_bytes(self) -> Vec<u8> {
        match self {
            Self::Text(text) => text.into_bytes(),
            Self::Raw(raw) => raw,
            Self::Structured(serde_json::Value::Null) => Vec::new(),
            Self::Structured(value) => value.to_string().into_bytes(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct LegacyEntry {
    url: String,
    status: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    headers: Option<LegacyBytes>,
    body: LegacyBytes,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    time: Option<f64>,
}

/// Encode `response` in the current format
pub fn encode(response: &CachedResponse) -> Vec<u8> {
    let mut payload = BytesMut::with_capacity(
        2 + 8 + 12 + response.url.len() + response.headers.len() + response.body.len(),
    );
    payload.put_u16(response.status);
    payload.put_i64(response.fetched_at.timestamp_micros());
    put_chunk(&mut payload, response.url.as_bytes());
    put_chunk(&mut payload, &response.headers);
    put_chunk(&mut payload, &response.body);

    seal(Version::Typed, &payload)
}

/// Encode `response` in the legacy format; `with_time = false` omits the fetch time
pub fn encode_legacy(response: &CachedResponse, with_time: bool) -> Result<Vec<u8>> {
    let entry = LegacyEntry {
        url: response.url.clone(),
        status: response.status,
        headers: Some(LegacyBytes::Raw(response.headers.clone())),
        body: LegacyBytes::Raw(response.body.clone()),
        time: with_time.then(|| to_epoch_f64(response.fetched_at)),
    };
    let payload = serde_json::to_vec(&entry).map_err(|e| Error::decode(e.to_string()))?;
    Ok(seal(Version::Legacy, &payload))
}

/// Decode a blob of any known version
pub fn decode(blob: &[u8]) -> Result<(CachedResponse, Version)> {
    decode_at(blob, Utc::now())
}

/// Decode with an explicit clock for synthesising legacy fetch times
pub(crate) fn decode_at(blob: &[u8], now: DateTime<Utc>) -> Result<(CachedResponse, Version)> {
    let (&version, compressed) = blob
        .split_first()
        .ok_or_else(|| Error::decode("empty cache blob"))?;
    let version = Version::from_byte(version)?;

    let payload = lz4_flex::block::decompress_size_prepended(compressed)
        .map_err(|e| Error::decode(format!("lz4 decompression failed: {e}")))?;

    let response = match version {
        Version::Typed => decode_typed(Bytes::from(payload))?,
        Version::Legacy => decode_legacy(&payload, now)?,
    };
    Ok((response, version))
}

fn seal(version: Version, payload: &[u8]) -> Vec<u8> {
    let compressed = lz4_flex::block::compress_prepend_size(payload);
    let mut blob = Vec::with_capacity(1 + compressed.len());
    blob.push(version as u8);
    blob.extend_from_slice(&compressed);
    blob
}

fn put_chunk(buf: &mut BytesMut, chunk: &[u8]) {
    buf.put_u32(chunk.len() as u32);
    buf.put_slice(chunk);
}

fn take_chunk(buf: &mut Bytes, field: &str) -> Result<Bytes> {
    if buf.remaining() < 4 {
        return Err(Error::decode(format!("truncated length of `{field}`")));
    }
    let len = buf.get_u32() as usize;
    if buf.remaining() < len {
        return Err(Error::decode(format!(
            "truncated `{field}`: need {len} bytes, have {}",
            buf.remaining()
        )));
    }
    Ok(buf.split_to(len))
}

fn decode_typed(mut buf: Bytes) -> Result<CachedResponse> {
    if buf.remaining() < 10 {
        return Err(Error::decode("truncated response header"));
    }
    let status = buf.get_u16();
    let micros = buf.get_i64();
    let fetched_at = Utc
        .timestamp_micros(micros)
        .single()
        .ok_or_else(|| Error::decode(format!("fetch time out of range: {micros}")))?;

    let url = take_chunk(&mut buf, "url")?;
    let url = String::from_utf8(url.to_vec())
        .map_err(|e| Error::decode(format!("url is not UTF-8: {e}")))?;
    let headers = take_chunk(&mut buf, "headers")?.to_vec();
    let body = take_chunk(&mut buf, "body")?.to_vec();

    if buf.has_remaining() {
        return Err(Error::decode(format!("{} trailing bytes", buf.remaining())));
    }

    Ok(CachedResponse {
        url,
        status,
        headers,
        body,
        fetched_at,
    })
}

fn decode_legacy(payload: &[u8], now: DateTime<Utc>) -> Result<CachedResponse> {
    let entry: LegacyEntry = serde_json::from_slice(payload)
        .map_err(|e| Error::decode(format!("invalid legacy entry: {e}")))?;

    let fetched_at = match entry.time {
        Some(secs) => from_epoch_f64(secs)
            .ok_or_else(|| Error::decode(format!("legacy time out of range: {secs}")))?,
        None => now - legacy_default_age(),
    };

    Ok(CachedResponse {
        url: entry.url,
        status: entry.status,
        headers: entry.headers.map(LegacyBytes::into_bytes).unwrap_or_default(),
        body: entry.body.into_bytes(),
        fetched_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> CachedResponse {
        CachedResponse {
            url: "https://www.meetup.com/events/1/".to_string(),
            status: 200,
            headers: b"Content-Type: text/html".to_vec(),
            body: b"<html><body>hello</body></html>".repeat(20),
            fetched_at: Utc.timestamp_micros(1_700_000_000_123_456).unwrap(),
        }
    }

    #[test]
    fn test_typed_round_trip() {
        let response = sample();
        let blob = encode(&response);
        assert_eq!(blob[0], Version::Typed as u8);

        let (decoded, version) = decode(&blob).unwrap();
        assert_eq!(version, Version::Typed);
        assert_eq!(decoded, response);
    }

    #[test]
    fn test_compression_shrinks_repetitive_bodies() {
        let response = sample();
        let blob = encode(&response);
        assert!(blob.len() < response.body.len());
    }

    #[test]
    fn test_legacy_with_time() {
        let response = sample();
        let blob = encode_legacy(&response, true).unwrap();

        let (decoded, version) = decode(&blob).unwrap();
        assert_eq!(version, Version::Legacy);
        assert_eq!(decoded, response);
    }

    #[test]
    fn test_legacy_without_time_is_one_day_old() {
        let response = sample();
        let blob = encode_legacy(&response, false).unwrap();
        let now = Utc.timestamp_opt(1_800_000_000, 0).unwrap();

        let (decoded, _) = decode_at(&blob, now).unwrap();
        assert_eq!(decoded.fetched_at, now - Duration::hours(24));
        assert_eq!(decoded.body, response.body);
    }

    #[test]
    fn test_legacy_text_fields() {
        let payload = br#"{"url":"https://a/","status":404,"headers":{"Server":["nginx"]},"body":"not found"}"#;
        let blob = seal(Version::Legacy, payload);

        let (decoded, _) = decode(&blob).unwrap();
        assert_eq!(decoded.status, 404);
        assert_eq!(decoded.body, b"not found");
        assert_eq!(decoded.headers, br#"{"Server":["nginx"]}"#);
    }

    #[test]
    fn test_rejects_unknown_version() {
        let mut blob = encode(&sample());
        blob[0] = 0x07;
        let err = decode(&blob).unwrap_err();
        assert!(err.to_string().contains("0x07"));
    }

    #[test]
    fn test_rejects_empty_and_garbage() {
        assert!(decode(&[]).is_err());
        assert!(decode(&[0x02, 0xff, 0xff]).is_err());
        assert!(decode(&[0x02, 4, 0, 0, 0, 0xf0]).is_err());
    }

    #[test]
    fn test_rejects_truncated_payload() {
        let response = sample();
        let mut payload = BytesMut::new();
        payload.put_u16(response.status);
        payload.put_i64(0);
        payload.put_u32(1000);
        payload.put_slice(b"short");

        let blob = seal(Version::Typed, &payload);
        let err = decode(&blob).unwrap_err();
        assert!(err.to_string().contains("truncated"));
    }
}
