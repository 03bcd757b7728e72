//! Skylink dynamic message tree
//!
//! The control plane moves configuration and telemetry around as a dynamic,
//! self-describing tree of typed values. This crate provides the tree itself
//! (`Msg`), path-based access (`lookup`/`mkpath`), a symmetric JSON codec with
//! a base64 sentinel for binary payloads, and the compact bus-native wire
//! codec used between daemons.

pub mod json;
pub mod msg;
pub mod path;
pub mod wire;

pub use msg::{Msg, MsgError, MsgType};
