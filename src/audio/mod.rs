//! # Audio Payload Handling
//!
//! Turns the raw bytes of one inbound request into the mono 16 kHz float
//! samples the acoustic model consumes. Each request carries one complete,
//! independently decodable WAV clip; there is no chunk reassembly and no
//! state kept between requests.

pub mod decode;

pub use decode::{decode_wav_payload, MODEL_SAMPLE_RATE};
