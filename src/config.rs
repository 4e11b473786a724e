//! Compile-time constants, generated from `alloc.toml` by `build.rs`.
//!
//! Everything in this module is a `pub const`. There is no runtime
//! configuration surface — no env var is read outside of `build.rs`, no file
//! is opened once the binary is running. Overriding a value means editing
//! `alloc.toml` (or pointing `ALLOC_CONFIG` at a different file) and
//! rebuilding.

include!(concat!(env!("OUT_DIR"), "/config_gen.rs"));
