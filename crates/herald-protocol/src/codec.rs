//! Encoding and decoding for socket frames and bus payloads.
//!
//! Socket frames are always JSON text. Bus payloads use the codec selected in
//! configuration: JSON for interoperability with the chat services, or
//! MessagePack when every producer on the bus is a Herald process.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::frames::{ClientFrame, DomainEvent, ServerFrame};

/// Maximum accepted size of an inbound frame or bus payload (1 MiB).
pub const MAX_FRAME_SIZE: usize = 1024 * 1024;

/// Protocol errors that can occur during encoding/decoding.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Frame exceeds maximum size.
    #[error("Frame size {0} exceeds maximum {MAX_FRAME_SIZE}")]
    FrameTooLarge(usize),

    /// JSON encoding or decoding error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// MessagePack encoding error.
    #[error("Encoding error: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    /// MessagePack decoding error.
    #[error("Decoding error: {0}")]
    Decode(#[from] rmp_serde::decode::Error),
}

/// Encode a server frame as JSON text.
///
/// # Errors
///
/// Returns an error if serialization fails.
pub fn encode_frame(frame: &ServerFrame) -> Result<String, ProtocolError> {
    Ok(serde_json::to_string(frame)?)
}

/// Decode a client frame from JSON text.
///
/// # Errors
///
/// Returns an error if the text is too large or not a valid frame.
pub fn decode_frame(text: &str) -> Result<ClientFrame, ProtocolError> {
    if text.len() > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge(text.len()));
    }
    Ok(serde_json::from_str(text)?)
}

/// Serialization used for events on the shared bus.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BusCodec {
    /// `{"event": ..., "data": ...}` JSON envelope.
    #[default]
    Json,
    /// The same envelope as named MessagePack.
    Msgpack,
}

impl BusCodec {
    /// Encode an event for publishing.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn encode(&self, event: &DomainEvent) -> Result<Bytes, ProtocolError> {
        let data = match self {
            BusCodec::Json => serde_json::to_vec(event)?,
            BusCodec::Msgpack => rmp_serde::to_vec_named(event)?,
        };
        Ok(Bytes::from(data))
    }

    /// Decode an event received from the bus.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload is too large or malformed.
    pub fn decode(&self, data: &[u8]) -> Result<DomainEvent, ProtocolError> {
        if data.len() > MAX_FRAME_SIZE {
            return Err(ProtocolError::FrameTooLarge(data.len()));
        }
        let event = match self {
            BusCodec::Json => serde_json::from_slice(data)?,
            BusCodec::Msgpack => rmp_serde::from_slice(data)?,
        };
        Ok(event)
    }

    /// Codec name as used in configuration.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            BusCodec::Json => "json",
            BusCodec::Msgpack => "msgpack",
        }
    }
}
