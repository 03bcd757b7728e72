//! JSON codec
//!
//! Every non-binary node maps 1:1 onto JSON. Binary payloads have no JSON
//! representation, so they cross the boundary as a sentinel object:
//!
//! ```json
//! {
//!     "#_type": "bin",
//!     "#_enc": "base64",
//!     "#_data": "c2FtcGxlCg=="
//! }
//! ```
//!
//! Decoding recognizes exactly that shape and nothing else; emitters must not
//! use the sentinel keys for any other purpose.

use base64::prelude::*;
use serde_json::{Map, Number, Value};
use tracing::debug;

use crate::msg::{Msg, MsgError};

const BIN_TYPE_KEY: &str = "#_type";
const BIN_ENC_KEY: &str = "#_enc";
const BIN_DATA_KEY: &str = "#_data";

fn encode_bin_sentinel(buf: &[u8]) -> Value {
    let mut obj = Map::new();
    obj.insert(BIN_TYPE_KEY.into(), Value::String("bin".into()));
    obj.insert(BIN_ENC_KEY.into(), Value::String("base64".into()));
    obj.insert(BIN_DATA_KEY.into(), Value::String(BASE64_STANDARD.encode(buf)));
    Value::Object(obj)
}

/// Sentinel object for a binary payload, as a message tree node.
pub(crate) fn bin_sentinel_msg(buf: &[u8]) -> Msg {
    let mut obj = Msg::new_object();
    // building a three-prop object on a fresh node cannot fail
    let _ = obj.set_prop(BIN_TYPE_KEY, "bin");
    let _ = obj.set_prop(BIN_ENC_KEY, "base64");
    let _ = obj.set_prop(BIN_DATA_KEY, BASE64_STANDARD.encode(buf));
    obj
}

/// Recognize the sentinel shape on an already-built message tree.
pub(crate) fn sentinel_to_bytes(msg: &Msg) -> Option<Vec<u8>> {
    if msg.item_count() != 3 {
        return None;
    }
    if msg.prop(BIN_TYPE_KEY)?.as_str()? != "bin" {
        return None;
    }
    if msg.prop(BIN_ENC_KEY)?.as_str()? != "base64" {
        return None;
    }
    let data = msg.prop(BIN_DATA_KEY)?.as_str()?;
    BASE64_STANDARD.decode(data).ok()
}

fn decode_bin_sentinel(obj: &Map<String, Value>) -> Option<Vec<u8>> {
    if obj.len() != 3 {
        return None;
    }
    if obj.get(BIN_TYPE_KEY)?.as_str()? != "bin" {
        return None;
    }
    if obj.get(BIN_ENC_KEY)?.as_str()? != "base64" {
        return None;
    }
    let data = obj.get(BIN_DATA_KEY)?.as_str()?;
    BASE64_STANDARD.decode(data).ok()
}

impl Msg {
    pub fn to_json(&self) -> Value {
        match self {
            Msg::Null => Value::Null,
            Msg::Bool(v) => Value::Bool(*v),
            Msg::Int(v) => Value::Number((*v).into()),
            Msg::Int64(v) => Value::Number((*v).into()),
            Msg::Double(v) => Number::from_f64(*v)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            Msg::Str(v) => Value::String(v.clone()),
            Msg::Bin(v) => encode_bin_sentinel(v),
            Msg::Array(items) => Value::Array(items.iter().map(Msg::to_json).collect()),
            Msg::Object(props) => {
                let mut obj = Map::new();
                for (k, v) in props.iter() {
                    obj.insert(k.clone(), v.to_json());
                }
                Value::Object(obj)
            }
        }
    }

    /// Build a message tree from a JSON value.
    ///
    /// Integers land on the narrow type when they fit, `Int64` otherwise.
    pub fn from_json(value: &Value) -> Msg {
        match value {
            Value::Null => Msg::Null,
            Value::Bool(v) => Msg::Bool(*v),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    match i32::try_from(i) {
                        Ok(narrow) => Msg::Int(narrow),
                        Err(_) => Msg::Int64(i),
                    }
                } else {
                    Msg::Double(n.as_f64().unwrap_or(0.0))
                }
            }
            Value::String(v) => Msg::Str(v.clone()),
            Value::Array(items) => Msg::Array(items.iter().map(Msg::from_json).collect()),
            Value::Object(obj) => {
                if let Some(buf) = decode_bin_sentinel(obj) {
                    return Msg::Bin(buf);
                }
                let mut m = Msg::new_object();
                for (k, v) in obj.iter() {
                    // keys inside a JSON object are unique by construction
                    let _ = m.set_prop(k, Msg::from_json(v));
                }
                m
            }
        }
    }

    pub fn to_json_string(&self) -> String {
        self.to_json().to_string()
    }

    pub fn from_json_str(s: &str) -> Result<Msg, MsgError> {
        let value: Value = serde_json::from_str(s).map_err(|err| {
            debug!(error = %err, "json parse failed");
            MsgError::Json(err.to_string())
        })?;
        Ok(Msg::from_json(&value))
    }
}
