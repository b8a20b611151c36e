//! Akai S5000/S6000 program file format.
//!
//! Programs are stored as little-endian length-prefixed chunks with 4-byte
//! ASCII tags. [`chunk`] is the generic schema-driven codec; [`program`]
//! declares the chunk layouts and composes them into whole program files.

pub mod chunk;
pub mod program;
