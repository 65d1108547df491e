//! Background workers
//!
//! This module contains the external processes the studio drives:
//! the two ffmpeg encoder jobs and the reverse tunnel.

pub mod encoder;
pub mod ffmpeg;
pub mod finalizer;
pub mod tunnel;

pub use encoder::{EncoderProcessManager, EncoderSettings, JobStatus, RecordingStarted};
pub use finalizer::{OutputCheck, RecordingFinalizer, StopOutcome, StopReport};
pub use tunnel::{TunnelManager, TunnelSettings};
