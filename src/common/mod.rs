//! Common types and utilities shared across the OOXML layers.

pub mod id;
pub mod xml;
