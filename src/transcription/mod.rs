//! # Transcription Module
//!
//! Speech-to-text over a Whisper model run through Candle-rs, no FFI.
//!
//! ## Key Components:
//! - **Transcriber**: the capability handed to every session. One call per
//!   request, safe for concurrent use, failures reported as a tagged
//!   [`crate::error::DecodeError`] rather than a panic or a torn session.
//! - **Model**: weight loading from HuggingFace, the mel front end, and the
//!   greedy decode loop.
//!
//! The model is loaded exactly once at startup and shared across every
//! session for the life of the process.

pub mod model;
pub mod transcriber;

pub use transcriber::{Transcriber, TranscriberConfig};
