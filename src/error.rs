//! Error taxonomy
//!
//! Errors that end a single pipeline (one encoder role, one signaling client,
//! one relay sink) stay inside that pipeline; only negotiation and launch
//! failures reach the caller.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::pipeline::EncoderRole;

/// The browser offer could not be turned into an answer.
#[derive(Debug, Error)]
pub enum NegotiationError {
    #[error("malformed session description: {0}")]
    MalformedOffer(#[source] webrtc::Error),

    #[error("media engine rejected the offer: {0}")]
    Rejected(#[source] webrtc::Error),

    #[error("no local description after negotiation")]
    MissingAnswer,
}

#[derive(Debug, Error)]
pub enum EncoderError {
    #[error("{0} encoder is already running")]
    AlreadyRunning(EncoderRole),

    #[error("failed to launch {role} encoder: {source}")]
    Launch {
        role: EncoderRole,
        #[source]
        source: std::io::Error,
    },

    #[error("{0} encoder start was aborted by a stop request")]
    StartAborted(EncoderRole),

    #[error("invalid {role} destination: {reason}")]
    InvalidDestination { role: EncoderRole, reason: String },

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
}

impl EncoderError {
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        EncoderError::Io {
            context: context.into(),
            source,
        }
    }
}

/// A single relay write failed. Logged and counted, never propagated.
#[derive(Debug, Error)]
#[error("write to {role} sink failed: {source}")]
pub struct SinkWriteError {
    pub role: EncoderRole,
    #[source]
    pub source: std::io::Error,
}

/// The recording encoder ignored the quit request for the whole grace period.
#[derive(Debug, Error)]
#[error("{} did not finalize within {grace:?}", output.display())]
pub struct FinalizeTimeout {
    pub output: PathBuf,
    pub grace: Duration,
}

/// Terminates the unit sequence of an inbound track.
#[derive(Debug, Error)]
pub enum TrackError {
    #[error("track ended")]
    Ended,

    #[error("track read failed: {0}")]
    Read(String),
}

#[derive(Debug, Error)]
pub enum SignalingError {
    #[error("websocket transport error: {0}")]
    Transport(#[from] async_tungstenite::tungstenite::Error),

    #[error("undecodable signaling message: {0}")]
    Decode(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum TunnelError {
    #[error("failed to launch tunnel: {0}")]
    Launch(#[source] std::io::Error),

    #[error("tunnel produced no output handle")]
    NoOutput,

    #[error("tunnel exited before publishing a url")]
    Exited,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages_name_the_role() {
        let err = EncoderError::AlreadyRunning(EncoderRole::Record);
        assert_eq!(err.to_string(), "record encoder is already running");

        let err = EncoderError::Launch {
            role: EncoderRole::Live,
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "no such file"),
        };
        assert!(err.to_string().starts_with("failed to launch live encoder"));
    }

    #[test]
    fn test_finalize_timeout_message() {
        let err = FinalizeTimeout {
            output: PathBuf::from("recordings/show.mp4"),
            grace: Duration::from_secs(2),
        };
        assert_eq!(err.to_string(), "recordings/show.mp4 did not finalize within 2s");
    }
}
