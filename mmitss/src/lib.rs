//! Roadside engine for an MMITSS-style connected intersection.
//!
//! The crate is I/O-free: binaries feed it serial bytes, UDP payloads and
//! clock readings, and it hands back frames, records and decisions.
//!
//! - [`bytes`] — network-order packing, HDLC FCS-16, byte stuffing
//! - [`j2735`] — UPER codec for BSM / MAP / SPaT / SRM / SSM
//! - [`geo`] / [`map`] — ENU geometry and lane-level vehicle locating
//! - [`ab3418`] — controller frame reassembly, push messages, poll driver
//! - [`timecard`] — controller timing card and plan derivations
//! - [`predictor`] — dual-ring phase-state prediction bounds
//! - [`priority`] — vehicle tracking, soft calls and priority grants
//! - [`fanout`] — interprocess UDP message framing

pub use crate::error::{CardError, CodecError, FrameError, MapError, PerCause};

pub mod ab3418;
pub mod bytes;
mod error;
pub mod fanout;
pub mod geo;
pub mod j2735;
pub mod map;
mod per;
pub mod predictor;
pub mod priority;
pub mod timecard;
