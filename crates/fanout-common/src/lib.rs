//! Common types shared by the fanout server and its clients.
//!
//! This crate provides:
//! - JSON frame encoding and parsing ([`frame`])
//! - Client identities and protocol constants ([`types`])

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod frame;
pub mod types;

pub use frame::{ClientFrame, FrameError, ServerFrame};
pub use types::ClientId;
