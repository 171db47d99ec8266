//! Utility functions and helpers.

pub mod json;

pub use json::JsonCodec;
