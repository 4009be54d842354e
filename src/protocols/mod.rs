//! Protocol implementations.
//!
//! - `frame`: 16-bit length-prefixed binary frames
//!
//! Each protocol has a decoder used by its connection handler.

pub mod frame;
