//! Minimal RFC 1035 message types and wire codec for the resolver core.
//!
//! This crate plays the role of the external message codec the
//! resolver core is built against: it knows nothing about caching,
//! transport, or resolution strategy, only how to turn a [`protocol::types::Message`]
//! into octets and back.

pub mod protocol;
