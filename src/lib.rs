//! Driver for the XY-SK120 / XY-SKxxx family of programmable bench power supplies.
//!
//! The supply speaks Modbus RTU over a half-duplex serial link, and this crate
//! supplies the three layers an operator-facing firmware builds on:
//!
//! * an RTU transaction engine that enforces the 3.5-character silent interval
//!   between frames and stamps the completion time of every bus operation,
//! * a bounded retry policy that absorbs transient bus noise without hammering
//!   the line,
//! * a staleness-bounded cache of device state, split into independently
//!   timestamped subgroups so slow-moving values never cost redundant traffic
//!   and multi-register values are never observed half-updated.
//!
//! It supports `no_std` environments via the `no_std` feature flag. Any
//! transport implementing [`embedded_io::Read`] and [`embedded_io::Write`]
//! works; timing comes from a [`Clock`](clock::Clock) implementation supplied
//! at construction, so multiple driver instances can coexist in one process.
//!
//! Developed against the XY-SK120. The register map matches the published
//! XY-SKxxx Modbus documentation, so the sibling models (XY-SK60S, XY-SK150S)
//! are expected to work as well.
//!
//! The serial port used for PSU comms should be configured like so:
//! * Default baud rate: 115200
//! * Data bits: 8
//! * Stop bits: 1
//! * Parity: None

#![cfg_attr(feature = "no_std", no_std)]

pub mod bus;
pub mod cache;
pub mod clock;
pub mod error;
pub mod psu;
pub mod registers;
pub mod types;

#[cfg(test)]
mod mock;
