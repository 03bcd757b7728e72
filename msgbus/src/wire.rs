//! Bus-native wire codec
//!
//! Compact self-describing encoding used between daemons: one tag byte per
//! node, little-endian scalars, length-prefixed strings, and child counts on
//! containers. Arrayness is carried by the container tag, so items never
//! repeat it; names exist only inside objects. A null node is a bare tag — a
//! typed "no value" marker. Binary payloads ride the same base64 sentinel
//! object as the JSON codec so both codecs round-trip identically.

use crate::msg::{Msg, MsgError};

const TAG_NULL: u8 = 0;
const TAG_OBJECT: u8 = 1;
const TAG_ARRAY: u8 = 2;
const TAG_BOOL: u8 = 3;
const TAG_INT: u8 = 4;
const TAG_INT64: u8 = 5;
const TAG_DOUBLE: u8 = 6;
const TAG_STRING: u8 = 7;

const MAX_NAME_LEN: usize = u16::MAX as usize;

fn put_name(out: &mut Vec<u8>, name: &str) -> Result<(), MsgError> {
    let bytes = name.as_bytes();
    if bytes.len() > MAX_NAME_LEN {
        return Err(MsgError::Wire(format!("name too long: {} bytes", bytes.len())));
    }
    out.extend_from_slice(&(bytes.len() as u16).to_le_bytes());
    out.extend_from_slice(bytes);
    Ok(())
}

fn put_value(out: &mut Vec<u8>, msg: &Msg) -> Result<(), MsgError> {
    match msg {
        Msg::Null => out.push(TAG_NULL),
        Msg::Bool(v) => {
            out.push(TAG_BOOL);
            out.push(u8::from(*v));
        }
        Msg::Int(v) => {
            out.push(TAG_INT);
            out.extend_from_slice(&v.to_le_bytes());
        }
        Msg::Int64(v) => {
            out.push(TAG_INT64);
            out.extend_from_slice(&v.to_le_bytes());
        }
        Msg::Double(v) => {
            out.push(TAG_DOUBLE);
            out.extend_from_slice(&v.to_bits().to_le_bytes());
        }
        Msg::Str(v) => {
            out.push(TAG_STRING);
            out.extend_from_slice(&(v.len() as u32).to_le_bytes());
            out.extend_from_slice(v.as_bytes());
        }
        Msg::Bin(v) => {
            // no native binary on the bus; reuse the sentinel object
            let sentinel = super::json::bin_sentinel_msg(v);
            put_value(out, &sentinel)?;
        }
        Msg::Array(items) => {
            out.push(TAG_ARRAY);
            out.extend_from_slice(&(items.len() as u32).to_le_bytes());
            for item in items {
                put_value(out, item)?;
            }
        }
        Msg::Object(props) => {
            out.push(TAG_OBJECT);
            out.extend_from_slice(&(props.len() as u32).to_le_bytes());
            for (name, value) in props.iter() {
                put_name(out, name)?;
                put_value(out, value)?;
            }
        }
    }
    Ok(())
}

struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8], MsgError> {
        if self.pos + n > self.buf.len() {
            return Err(MsgError::Wire("truncated payload".into()));
        }
        let s = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(s)
    }

    fn take_u8(&mut self) -> Result<u8, MsgError> {
        Ok(self.take(1)?[0])
    }

    fn take_u16(&mut self) -> Result<u16, MsgError> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    fn take_u32(&mut self) -> Result<u32, MsgError> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn take_str(&mut self, len: usize) -> Result<&'a str, MsgError> {
        std::str::from_utf8(self.take(len)?)
            .map_err(|_| MsgError::Wire("invalid utf-8".into()))
    }
}

fn get_value(cur: &mut Cursor<'_>, depth: u32) -> Result<Msg, MsgError> {
    if depth == 0 {
        return Err(MsgError::Wire("nesting too deep".into()));
    }
    let tag = cur.take_u8()?;
    let msg = match tag {
        TAG_NULL => Msg::Null,
        TAG_BOOL => Msg::Bool(cur.take_u8()? != 0),
        TAG_INT => {
            let b = cur.take(4)?;
            Msg::Int(i32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        }
        TAG_INT64 => {
            let b = cur.take(8)?;
            Msg::Int64(i64::from_le_bytes(b.try_into().unwrap()))
        }
        TAG_DOUBLE => {
            let b = cur.take(8)?;
            Msg::Double(f64::from_bits(u64::from_le_bytes(b.try_into().unwrap())))
        }
        TAG_STRING => {
            let len = cur.take_u32()? as usize;
            Msg::Str(cur.take_str(len)?.to_string())
        }
        TAG_ARRAY => {
            let count = cur.take_u32()? as usize;
            let mut items = Vec::new();
            for _ in 0..count {
                items.push(get_value(cur, depth - 1)?);
            }
            Msg::Array(items)
        }
        TAG_OBJECT => {
            let count = cur.take_u32()? as usize;
            let mut obj = Msg::new_object();
            for _ in 0..count {
                let name_len = cur.take_u16()? as usize;
                let name = cur.take_str(name_len)?.to_string();
                let value = get_value(cur, depth - 1)?;
                obj.set_prop(&name, value)?;
            }
            // an object that spells out the sentinel decodes back to binary
            match super::json::sentinel_to_bytes(&obj) {
                Some(buf) => Msg::Bin(buf),
                None => obj,
            }
        }
        other => return Err(MsgError::Wire(format!("unknown tag {other}"))),
    };
    Ok(msg)
}

impl Msg {
    /// Encode into the bus-native byte format.
    pub fn to_wire(&self) -> Result<Vec<u8>, MsgError> {
        let mut out = Vec::new();
        put_value(&mut out, self)?;
        Ok(out)
    }

    /// Decode from the bus-native byte format.
    ///
    /// Trailing bytes after the root value are a decode error.
    pub fn from_wire(buf: &[u8]) -> Result<Msg, MsgError> {
        let mut cur = Cursor { buf, pos: 0 };
        let msg = get_value(&mut cur, 128)?;
        if cur.pos != buf.len() {
            return Err(MsgError::Wire(format!(
                "{} trailing bytes after value",
                buf.len() - cur.pos
            )));
        }
        Ok(msg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_tree() -> Msg {
        let mut m = Msg::new_object();
        m.set_prop("enabled", true).unwrap();
        m.set_prop("retries", 3).unwrap();
        m.set_prop("window_ns", 1_500_000_000i64).unwrap();
        m.set_prop("load", 0.25).unwrap();
        m.set_prop("id", "node-7").unwrap();
        m.set_prop("digest", b"\x00\x01\xfe\xff".as_slice()).unwrap();
        m.set_prop("empty", Msg::Null).unwrap();
        let nested = m.set_prop("windows", Msg::new_array()).unwrap();
        let w = nested.push(Msg::new_object()).unwrap();
        w.set_prop("flows", 12).unwrap();
        nested.push(Msg::new_array()).unwrap();
        m
    }

    #[test]
    fn test_wire_roundtrip() {
        let m = sample_tree();
        let bytes = m.to_wire().unwrap();
        let back = Msg::from_wire(&bytes).unwrap();
        assert_eq!(m, back);
    }

    #[test]
    fn test_wire_binary_rides_sentinel() {
        let m = Msg::Bin(b"sample\n".to_vec());
        let bytes = m.to_wire().unwrap();
        // the encoded form is an object carrying the sentinel keys
        assert_eq!(bytes[0], TAG_OBJECT);
        let back = Msg::from_wire(&bytes).unwrap();
        assert_eq!(back, m);
    }

    #[test]
    fn test_wire_null_is_bare_tag() {
        let bytes = Msg::Null.to_wire().unwrap();
        assert_eq!(bytes, vec![TAG_NULL]);
        assert_eq!(Msg::from_wire(&bytes).unwrap(), Msg::Null);
    }

    #[test]
    fn test_wire_truncation_detected() {
        let m = sample_tree();
        let bytes = m.to_wire().unwrap();
        assert!(Msg::from_wire(&bytes[..bytes.len() - 1]).is_err());

        let mut extended = bytes.clone();
        extended.push(0);
        assert!(Msg::from_wire(&extended).is_err());
    }

    #[test]
    fn test_wire_unknown_tag_rejected() {
        assert!(Msg::from_wire(&[0xAB]).is_err());
    }
}
