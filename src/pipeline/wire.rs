//! Wire envelope codec for the sender/receiver bridge.
//!
//! ```text
//! magic   4 bytes b"VPEN"
//! u8      version
//! u16     package-type length, UTF-8 package type
//! u32     field count
//! field*: u16 name length, UTF-8 name, u8 type tag, u32 value length, value
//! ```
//!
//! All integers are big-endian. Nested frames encode as `u32 count` followed
//! by fields; lists as `u32 count` followed by `u8 tag, u32 len, bytes` items.
//! Frames and lists nest at most [`MAX_NESTING_DEPTH`] levels.

use crate::pipeline::error::{PipelineError, PipelineResult};
use crate::pipeline::frame::{FieldType, FieldValue, Frame};
use std::fmt;
use std::sync::Arc;

pub const MAGIC: &[u8; 4] = b"VPEN";
pub const WIRE_VERSION: u8 = 1;
pub const MAX_ENVELOPE_SIZE: usize = 64 * 1024 * 1024;
/// Deepest nesting of frames and lists accepted on either side of the wire.
pub const MAX_NESTING_DEPTH: usize = 64;

/// Which fields of a frame travel over the wire.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PackageType {
    /// Every field.
    Frame,
    /// Every field except binary blobs, recursively.
    Metadata,
    /// Unrecognized type; passed through as-is by receivers.
    Other(String),
}

impl PackageType {
    pub fn parse(s: &str) -> Self {
        match s {
            "frame" => PackageType::Frame,
            "metadata" => PackageType::Metadata,
            other => PackageType::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            PackageType::Frame => "frame",
            PackageType::Metadata => "metadata",
            PackageType::Other(s) => s,
        }
    }

    pub fn is_known(&self) -> bool {
        !matches!(self, PackageType::Other(_))
    }

    /// The part of `frame` this package type carries.
    pub fn project(&self, frame: &Frame) -> Frame {
        match self {
            PackageType::Metadata => frame.without_blobs(),
            PackageType::Frame | PackageType::Other(_) => frame.clone(),
        }
    }
}

impl fmt::Display for PackageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A decoded envelope.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub version: u8,
    pub package_type: PackageType,
    pub frame: Frame,
}

/// Encode `frame` under `package_type`. The frame is written as given; apply
/// [`PackageType::project`] first to narrow it.
pub fn encode(package_type: &PackageType, frame: &Frame) -> PipelineResult<Vec<u8>> {
    let mut out = Vec::with_capacity(64 + frame.blob_bytes());
    out.extend_from_slice(MAGIC);
    out.push(WIRE_VERSION);
    put_str16(&mut out, package_type.as_str())?;
    put_fields(&mut out, frame, 0)?;
    if out.len() > MAX_ENVELOPE_SIZE {
        return Err(PipelineError::Protocol(format!(
            "envelope of {} bytes exceeds the {} byte limit",
            out.len(),
            MAX_ENVELOPE_SIZE
        )));
    }
    Ok(out)
}

pub fn decode(bytes: &[u8]) -> PipelineResult<Envelope> {
    if bytes.len() > MAX_ENVELOPE_SIZE {
        return Err(PipelineError::Protocol(format!(
            "envelope of {} bytes exceeds the {} byte limit",
            bytes.len(),
            MAX_ENVELOPE_SIZE
        )));
    }
    let mut r = Reader { buf: bytes, pos: 0 };
    if r.take(4)? != MAGIC {
        return Err(PipelineError::Protocol("bad magic".into()));
    }
    let version = r.u8()?;
    if version != WIRE_VERSION {
        return Err(PipelineError::Protocol(format!(
            "unsupported envelope version {}",
            version
        )));
    }
    let len = r.u16()? as usize;
    let package_type = PackageType::parse(r.str(len)?);
    let frame = r.fields(0)?;
    if r.pos != bytes.len() {
        return Err(PipelineError::Protocol(format!(
            "{} trailing bytes after envelope",
            bytes.len() - r.pos
        )));
    }
    Ok(Envelope {
        version,
        package_type,
        frame,
    })
}

fn put_str16(out: &mut Vec<u8>, s: &str) -> PipelineResult<()> {
    let len = u16::try_from(s.len())
        .map_err(|_| PipelineError::Protocol(format!("name too long: {} bytes", s.len())))?;
    out.extend_from_slice(&len.to_be_bytes());
    out.extend_from_slice(s.as_bytes());
    Ok(())
}

fn put_len32(out: &mut Vec<u8>, len: usize) -> PipelineResult<()> {
    let len = u32::try_from(len)
        .map_err(|_| PipelineError::Protocol(format!("length {} does not fit in u32", len)))?;
    out.extend_from_slice(&len.to_be_bytes());
    Ok(())
}

fn too_deep() -> PipelineError {
    PipelineError::Protocol(format!(
        "nesting too deep: more than {} levels",
        MAX_NESTING_DEPTH
    ))
}

fn put_fields(out: &mut Vec<u8>, frame: &Frame, depth: usize) -> PipelineResult<()> {
    put_len32(out, frame.len())?;
    for (name, value) in frame.iter() {
        put_str16(out, name)?;
        put_value(out, value, depth)?;
    }
    Ok(())
}

/// Tag, length placeholder, body; the length is patched after the body.
fn put_value(out: &mut Vec<u8>, value: &FieldValue, depth: usize) -> PipelineResult<()> {
    if matches!(value, FieldValue::Frame(_) | FieldValue::List(_)) && depth >= MAX_NESTING_DEPTH {
        return Err(too_deep());
    }
    out.push(value.field_type().tag());
    let len_at = out.len();
    out.extend_from_slice(&[0; 4]);
    let body_start = out.len();
    match value {
        FieldValue::Bool(b) => out.push(u8::from(*b)),
        FieldValue::Int(i) => out.extend_from_slice(&i.to_be_bytes()),
        FieldValue::UInt(u) => out.extend_from_slice(&u.to_be_bytes()),
        FieldValue::Float(f) => out.extend_from_slice(&f.to_bits().to_be_bytes()),
        FieldValue::Str(s) => out.extend_from_slice(s.as_bytes()),
        FieldValue::Bytes(b) => out.extend_from_slice(b),
        FieldValue::Frame(f) => put_fields(out, f, depth + 1)?,
        FieldValue::List(items) => {
            put_len32(out, items.len())?;
            for item in items {
                put_value(out, item, depth + 1)?;
            }
        }
    }
    let body_len = out.len() - body_start;
    let len = u32::try_from(body_len)
        .map_err(|_| PipelineError::Protocol(format!("value of {} bytes too large", body_len)))?;
    out[len_at..len_at + 4].copy_from_slice(&len.to_be_bytes());
    Ok(())
}

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, n: usize) -> PipelineResult<&'a [u8]> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|end| *end <= self.buf.len())
            .ok_or_else(|| {
                PipelineError::Protocol(format!(
                    "truncated envelope: need {} bytes at offset {}",
                    n, self.pos
                ))
            })?;
        let slice = &self.buf[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn array<const N: usize>(&mut self) -> PipelineResult<[u8; N]> {
        let mut arr = [0u8; N];
        arr.copy_from_slice(self.take(N)?);
        Ok(arr)
    }

    fn u8(&mut self) -> PipelineResult<u8> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> PipelineResult<u16> {
        Ok(u16::from_be_bytes(self.array()?))
    }

    fn u32(&mut self) -> PipelineResult<u32> {
        Ok(u32::from_be_bytes(self.array()?))
    }

    fn str(&mut self, len: usize) -> PipelineResult<&'a str> {
        std::str::from_utf8(self.take(len)?)
            .map_err(|e| PipelineError::Protocol(format!("invalid UTF-8: {}", e)))
    }

    /// Fields of a frame nested `depth` levels below the envelope.
    fn fields(&mut self, depth: usize) -> PipelineResult<Frame> {
        let count = self.u32()? as usize;
        // Each field needs at least 7 header bytes; reject absurd counts early.
        if count > (self.buf.len() - self.pos) / 7 {
            return Err(PipelineError::Protocol(format!(
                "field count {} exceeds remaining input",
                count
            )));
        }
        let mut frame = Frame::with_capacity(count);
        for _ in 0..count {
            let name_len = self.u16()? as usize;
            let name = self.str(name_len)?.to_string();
            let value = self.value(depth)?;
            frame.set(name, value);
        }
        Ok(frame)
    }

    fn value(&mut self, depth: usize) -> PipelineResult<FieldValue> {
        let tag = self.u8()?;
        let field_type = FieldType::from_tag(tag)
            .ok_or_else(|| PipelineError::Protocol(format!("unknown type tag {}", tag)))?;
        if matches!(field_type, FieldType::Frame | FieldType::List) && depth >= MAX_NESTING_DEPTH {
            return Err(too_deep());
        }
        let len = self.u32()? as usize;
        let body = self.take(len)?;
        let fixed = |expected: usize| -> PipelineResult<()> {
            if len == expected {
                Ok(())
            } else {
                Err(PipelineError::Protocol(format!(
                    "{} value must be {} bytes, got {}",
                    field_type.name(),
                    expected,
                    len
                )))
            }
        };

        let value = match field_type {
            FieldType::Bool => {
                fixed(1)?;
                match body[0] {
                    0 => FieldValue::Bool(false),
                    1 => FieldValue::Bool(true),
                    other => {
                        return Err(PipelineError::Protocol(format!("invalid bool byte {}", other)))
                    }
                }
            }
            FieldType::Int => {
                fixed(8)?;
                FieldValue::Int(i64::from_be_bytes(to_array(body)))
            }
            FieldType::UInt => {
                fixed(8)?;
                FieldValue::UInt(u64::from_be_bytes(to_array(body)))
            }
            FieldType::Float => {
                fixed(8)?;
                FieldValue::Float(f64::from_bits(u64::from_be_bytes(to_array(body))))
            }
            FieldType::Str => FieldValue::Str(
                std::str::from_utf8(body)
                    .map_err(|e| PipelineError::Protocol(format!("invalid UTF-8: {}", e)))?
                    .to_string(),
            ),
            FieldType::Bytes => FieldValue::Bytes(Arc::from(body)),
            FieldType::Frame => {
                let mut inner = Reader { buf: body, pos: 0 };
                let frame = inner.fields(depth + 1)?;
                inner.finish()?;
                FieldValue::Frame(Box::new(frame))
            }
            FieldType::List => {
                let mut inner = Reader { buf: body, pos: 0 };
                let count = inner.u32()? as usize;
                if count > body.len() / 5 {
                    return Err(PipelineError::Protocol(format!(
                        "list count {} exceeds remaining input",
                        count
                    )));
                }
                let mut items = Vec::with_capacity(count);
                for _ in 0..count {
                    items.push(inner.value(depth + 1)?);
                }
                inner.finish()?;
                FieldValue::List(items)
            }
        };
        Ok(value)
    }

    fn finish(&self) -> PipelineResult<()> {
        if self.pos == self.buf.len() {
            Ok(())
        } else {
            Err(PipelineError::Protocol(format!(
                "nested value has {} unread bytes",
                self.buf.len() - self.pos
            )))
        }
    }
}

fn to_array(body: &[u8]) -> [u8; 8] {
    let mut arr = [0u8; 8];
    arr.copy_from_slice(body);
    arr
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn sample() -> Frame {
        Frame::new()
            .with("label", "person")
            .with("score", 0.87)
            .with("frame_id", 42u64)
            .with("offset", -7i64)
            .with("keyframe", true)
            .with("original_image", vec![1u8, 2, 3])
            .with(
                "bounding_boxes",
                vec![FieldValue::from(Frame::new().with("x", 1i64).with("w", 9i64))],
            )
    }

    #[test]
    fn test_round_trip_preserves_order_and_types() {
        let frame = sample();
        let bytes = encode(&PackageType::Frame, &frame).unwrap();
        let envelope = decode(&bytes).unwrap();
        assert_eq!(envelope.version, WIRE_VERSION);
        assert_eq!(envelope.package_type, PackageType::Frame);
        assert_eq!(envelope.frame, frame);
    }

    #[test]
    fn test_metadata_projection_strips_blobs() {
        let projected = PackageType::Metadata.project(&sample());
        assert!(!projected.contains("original_image"));
        assert_eq!(projected.blob_bytes(), 0);
        assert_eq!(projected.get_str("label").unwrap(), "person");
    }

    #[test]
    fn test_other_package_type_survives() {
        let bytes = encode(&PackageType::parse("thumbnail"), &Frame::new()).unwrap();
        let envelope = decode(&bytes).unwrap();
        assert_eq!(envelope.package_type, PackageType::Other("thumbnail".into()));
        assert!(!envelope.package_type.is_known());
    }

    #[test]
    fn test_unknown_version_rejected() {
        let mut bytes = encode(&PackageType::Frame, &sample()).unwrap();
        bytes[4] = 9;
        assert!(matches!(decode(&bytes), Err(PipelineError::Protocol(_))));
    }

    #[test]
    fn test_malformed_inputs_rejected() {
        let bytes = encode(&PackageType::Frame, &sample()).unwrap();
        assert!(decode(&bytes[..bytes.len() - 1]).is_err());
        assert!(decode(b"NOPE\x01").is_err());

        let mut trailing = bytes.clone();
        trailing.push(0);
        assert!(decode(&trailing).is_err());

        let mut bad_tag = encode(&PackageType::Frame, &Frame::new().with("a", true)).unwrap();
        // magic(4) + version(1) + len(2) + "frame"(5) + count(4) + name len(2) + "a"(1)
        bad_tag[19] = 42;
        assert!(decode(&bad_tag).is_err());
    }

    fn nested_list(levels: usize) -> FieldValue {
        let mut value = FieldValue::from(1i64);
        for _ in 0..levels {
            value = FieldValue::List(vec![value]);
        }
        value
    }

    /// Envelope with one field `deep` holding a list nested `levels` deep,
    /// built by hand so the encoder's own limit does not apply.
    fn raw_nested_envelope(levels: usize) -> Vec<u8> {
        // Innermost int body: tag, len 8, value. Each list level adds
        // tag(1) + len(4) + count(4) in front of its single item.
        let leaf_len = 1 + 4 + 8;
        let mut bytes = MAGIC.to_vec();
        bytes.push(WIRE_VERSION);
        bytes.extend_from_slice(&5u16.to_be_bytes());
        bytes.extend_from_slice(b"frame");
        bytes.extend_from_slice(&1u32.to_be_bytes());
        bytes.extend_from_slice(&4u16.to_be_bytes());
        bytes.extend_from_slice(b"deep");
        bytes.reserve(levels * 9 + leaf_len);
        for level in (1..=levels).rev() {
            let item_len = leaf_len + (level - 1) * 9;
            bytes.push(FieldType::List.tag());
            bytes.extend_from_slice(&((item_len + 4) as u32).to_be_bytes());
            bytes.extend_from_slice(&1u32.to_be_bytes());
        }
        bytes.push(FieldType::Int.tag());
        bytes.extend_from_slice(&8u32.to_be_bytes());
        bytes.extend_from_slice(&1i64.to_be_bytes());
        bytes
    }

    #[test]
    fn test_nesting_limit_on_decode() {
        let ok = raw_nested_envelope(MAX_NESTING_DEPTH);
        let envelope = decode(&ok).unwrap();
        assert_eq!(envelope.frame.get("deep"), Some(&nested_list(MAX_NESTING_DEPTH)));

        let too_deep = raw_nested_envelope(MAX_NESTING_DEPTH + 1);
        assert!(matches!(decode(&too_deep), Err(PipelineError::Protocol(_))));
    }

    #[test]
    fn test_deeply_nested_envelope_rejected_without_overflow() {
        // Large enough to exhaust the stack if decoding recursed unbounded.
        let bytes = raw_nested_envelope(200_000);
        assert!(bytes.len() < MAX_ENVELOPE_SIZE);
        assert!(matches!(decode(&bytes), Err(PipelineError::Protocol(_))));
    }

    #[test]
    fn test_encode_refuses_what_decode_would_reject() {
        let frame = Frame::new().with("deep", nested_list(MAX_NESTING_DEPTH));
        let bytes = encode(&PackageType::Frame, &frame).unwrap();
        assert_eq!(decode(&bytes).unwrap().frame, frame);

        let frame = Frame::new().with("deep", nested_list(MAX_NESTING_DEPTH + 1));
        assert!(matches!(
            encode(&PackageType::Frame, &frame),
            Err(PipelineError::Protocol(_))
        ));

        let mut nested = Frame::new().with("leaf", 1i64);
        for _ in 0..=MAX_NESTING_DEPTH {
            nested = Frame::new().with("child", nested);
        }
        assert!(encode(&PackageType::Frame, &nested).is_err());
    }

    fn leaf_value() -> impl Strategy<Value = FieldValue> {
        prop_oneof![
            any::<bool>().prop_map(FieldValue::Bool),
            any::<i64>().prop_map(FieldValue::Int),
            any::<u64>().prop_map(FieldValue::UInt),
            any::<f64>()
                .prop_filter("NaN never compares equal", |f| !f.is_nan())
                .prop_map(FieldValue::Float),
            ".{0,12}".prop_map(FieldValue::Str),
            proptest::collection::vec(any::<u8>(), 0..32).prop_map(FieldValue::from),
        ]
    }

    fn frame_strategy() -> impl Strategy<Value = Frame> {
        let value = leaf_value().prop_recursive(2, 16, 4, |inner| {
            prop_oneof![
                proptest::collection::vec(inner.clone(), 0..4).prop_map(FieldValue::List),
                proptest::collection::vec(("[a-z]{1,6}", inner), 0..4)
                    .prop_map(|fields| FieldValue::from(fields.into_iter().collect::<Frame>())),
            ]
        });
        proptest::collection::vec(("[a-z_]{1,8}", value), 0..8)
            .prop_map(|fields| fields.into_iter().collect::<Frame>())
    }

    proptest! {
        #[test]
        fn prop_decode_inverts_encode(frame in frame_strategy()) {
            let bytes = encode(&PackageType::Frame, &frame).unwrap();
            prop_assert_eq!(decode(&bytes).unwrap().frame, frame);
        }

        #[test]
        fn prop_decode_never_panics(bytes in proptest::collection::vec(any::<u8>(), 0..64)) {
            let _ = decode(&bytes);
        }

        #[test]
        fn prop_corrupted_nested_envelope_never_panics(
            levels in 1usize..200,
            flips in proptest::collection::vec((any::<prop::sample::Index>(), any::<u8>()), 0..8)
        ) {
            let mut bytes = raw_nested_envelope(levels);
            for (index, byte) in flips {
                let at = index.index(bytes.len());
                bytes[at] = byte;
            }
            match decode(&bytes) {
                Ok(_) | Err(PipelineError::Protocol(_)) => {}
                Err(other) => prop_assert!(false, "unexpected error {:?}", other),
            }
        }
    }
}
