//! Binary wire codec for [`Envelope`] (panic-free).
//!
//! Layout (big-endian, length-prefixed strings), version 1:
//!
//! ```text
//! magic:       u16 = 0x4657 ("FW")
//! version:     u8
//! flags:       u8   bit0 = has target, bit1 = has correlation
//! id:          16 bytes
//! msg_type:    u16 len + UTF-8
//! timestamp:   u64 epoch ms
//! source:      u16 len + UTF-8
//! target:      [u16 len + UTF-8]   iff flags bit0
//! correlation: [16 bytes]          iff flags bit1
//! ttl:         u64
//! payload:     u32 len + bytes
//! ```
//!
//! Parsing rules:
//! - Never index (`buf[0]`) — always use `Buf` and `remaining()` checks.
//! - Never `unwrap()` / `expect()` / `panic!()` in production paths.
//! - A version above [`WIRE_VERSION`] is refused; v1 is the first published
//!   layout, so there are no lower historical layouts to accept.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use uuid::Uuid;

use crate::envelope::Envelope;
use crate::error::{FleetwireError, Result};
use crate::node::NodeId;

/// Frame magic, `"FW"` big-endian.
pub const WIRE_MAGIC: u16 = 0x4657;

/// Highest wire version this node encodes and decodes.
pub const WIRE_VERSION: u8 = 1;

/// Flag: target node string is present.
pub const FLAG_HAS_TARGET: u8 = 0x01;

/// Flag: correlation id is present.
pub const FLAG_HAS_CORRELATION: u8 = 0x02;

const KNOWN_FLAGS: u8 = FLAG_HAS_TARGET | FLAG_HAS_CORRELATION;

fn put_str(buf: &mut BytesMut, field: &str, s: &str) -> Result<()> {
    let len = s.len();
    if len > u16::MAX as usize {
        return Err(FleetwireError::MalformedEnvelope(format!(
            "{field} exceeds {} bytes",
            u16::MAX
        )));
    }
    buf.put_u16(len as u16);
    buf.put_slice(s.as_bytes());
    Ok(())
}

fn get_str(buf: &mut Bytes, field: &str) -> Result<String> {
    if buf.remaining() < 2 {
        return Err(FleetwireError::MalformedEnvelope(format!(
            "truncated before {field} length"
        )));
    }
    let len = buf.get_u16() as usize;
    if buf.remaining() < len {
        return Err(FleetwireError::MalformedEnvelope(format!(
            "{field} length {len} exceeds remaining {}",
            buf.remaining()
        )));
    }
    let raw = buf.copy_to_bytes(len);
    let s = std::str::from_utf8(&raw)
        .map_err(|e| FleetwireError::MalformedEnvelope(format!("{field} not UTF-8: {e}")))?;
    Ok(s.to_string())
}

fn get_uuid(buf: &mut Bytes, field: &str) -> Result<Uuid> {
    if buf.remaining() < 16 {
        return Err(FleetwireError::MalformedEnvelope(format!(
            "truncated before {field}"
        )));
    }
    Ok(Uuid::from_u128(buf.get_u128()))
}

/// Encode an envelope into a version-1 frame.
///
/// # Errors
/// `MalformedEnvelope` if a string field exceeds its u16 length prefix or the
/// payload exceeds the u32 length prefix. Both bound well-formed input, not
/// ordinary traffic.
pub fn encode(env: &Envelope) -> Result<Bytes> {
    if env.payload.len() > u32::MAX as usize {
        return Err(FleetwireError::MalformedEnvelope(format!(
            "payload exceeds {} bytes",
            u32::MAX
        )));
    }

    let mut flags = 0u8;
    if env.target.is_some() {
        flags |= FLAG_HAS_TARGET;
    }
    if env.correlation.is_some() {
        flags |= FLAG_HAS_CORRELATION;
    }

    let mut buf = BytesMut::with_capacity(
        64 + env.msg_type.len() + env.source.as_str().len() + env.payload.len(),
    );
    buf.put_u16(WIRE_MAGIC);
    buf.put_u8(WIRE_VERSION);
    buf.put_u8(flags);
    buf.put_u128(env.id.as_u128());
    put_str(&mut buf, "msg_type", &env.msg_type)?;
    buf.put_u64(env.timestamp_ms);
    put_str(&mut buf, "source", env.source.as_str())?;
    if let Some(target) = &env.target {
        put_str(&mut buf, "target", target.as_str())?;
    }
    if let Some(correlation) = &env.correlation {
        buf.put_u128(correlation.as_u128());
    }
    buf.put_u64(env.ttl_ms);
    buf.put_u32(env.payload.len() as u32);
    buf.put_slice(&env.payload);
    Ok(buf.freeze())
}

/// Decode a frame back into an envelope.
///
/// Structural validity only: a payload the receiver cannot further interpret
/// is the caller's concern once the envelope decodes.
///
/// # Errors
/// `MalformedEnvelope` for magic mismatch, truncation, length overruns,
/// trailing bytes, invalid UTF-8, unknown flag bits, or a correlation id equal
/// to the envelope id. `UnsupportedVersion` for a version above
/// [`WIRE_VERSION`].
pub fn decode(mut buf: Bytes) -> Result<Envelope> {
    // Fixed prelude: magic, version, flags.
    if buf.remaining() < 4 {
        return Err(FleetwireError::MalformedEnvelope("frame too short".into()));
    }
    let magic = buf.get_u16();
    if magic != WIRE_MAGIC {
        return Err(FleetwireError::MalformedEnvelope(format!(
            "bad magic {magic:#06x}"
        )));
    }
    let version = buf.get_u8();
    if version > WIRE_VERSION {
        return Err(FleetwireError::UnsupportedVersion(version));
    }
    if version != WIRE_VERSION {
        return Err(FleetwireError::MalformedEnvelope(format!(
            "unknown historical version {version}"
        )));
    }
    let flags = buf.get_u8();
    if flags & !KNOWN_FLAGS != 0 {
        // Within a wire version the layout is fixed; an unknown bit implies a
        // frame this version cannot size correctly.
        return Err(FleetwireError::MalformedEnvelope(format!(
            "unknown flag bits {:#04x}",
            flags & !KNOWN_FLAGS
        )));
    }

    let id = get_uuid(&mut buf, "id")?;
    let msg_type = get_str(&mut buf, "msg_type")?;
    if buf.remaining() < 8 {
        return Err(FleetwireError::MalformedEnvelope(
            "truncated before timestamp".into(),
        ));
    }
    let timestamp_ms = buf.get_u64();
    let source = NodeId::new(get_str(&mut buf, "source")?);

    let target = if flags & FLAG_HAS_TARGET != 0 {
        Some(NodeId::new(get_str(&mut buf, "target")?))
    } else {
        None
    };

    let correlation = if flags & FLAG_HAS_CORRELATION != 0 {
        let c = get_uuid(&mut buf, "correlation")?;
        if c == id {
            return Err(FleetwireError::MalformedEnvelope(
                "correlation equals envelope id".into(),
            ));
        }
        Some(c)
    } else {
        None
    };

    if buf.remaining() < 12 {
        return Err(FleetwireError::MalformedEnvelope(
            "truncated before ttl/payload length".into(),
        ));
    }
    let ttl_ms = buf.get_u64();
    let payload_len = buf.get_u32() as usize;
    if buf.remaining() != payload_len {
        return Err(FleetwireError::MalformedEnvelope(format!(
            "payload length {payload_len} but {} bytes remain",
            buf.remaining()
        )));
    }
    let payload = buf.copy_to_bytes(payload_len);

    Ok(Envelope {
        id,
        msg_type,
        timestamp_ms,
        source,
        target,
        correlation,
        ttl_ms,
        payload,
    })
}
