//! # beacon-server
//!
//! HTTP host shell for the beacon presence engine.
//!
//! The engine in `beacon-core` does not own a radio. This server stands in
//! for the host platform: an external radio process polls the region plan,
//! posts scan batches and region transitions, and consumes detections from
//! the event stream.

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]

pub mod api;
pub mod host;
pub mod logging;
pub mod settings;
pub mod state;
