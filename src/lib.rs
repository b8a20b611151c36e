//! Device protocol and binary codec layer for vintage hardware samplers.
//!
//! Talks to Roland S-330 family samplers over MIDI System-Exclusive and
//! reads/writes Akai S5000/S6000 program files bit-exactly. Platform MIDI
//! bindings are injected through the [`transport::MidiPort`] trait; the
//! crate itself never opens a port.

pub mod address;
pub mod akai;
pub mod device;
pub mod error;
pub mod handshake;
pub mod nibble;
pub mod params;
pub mod patch;
pub mod sysex;
pub mod transport;
