//! Media relay pipeline
//!
//! The inbound WebRTC track is relayed, packet by packet, to up to two local
//! RTP sinks:
//! - `Live`: consumed by the broadcast encoder
//! - `Record`: consumed by the recording encoder
//!
//! Each encoder job owns one sink slot. The relay keeps running while jobs
//! come and go; a job attaches its sink on start and detaches it on stop.

pub mod health;
pub mod relay;
pub mod sink;
pub mod state;

pub use health::{HealthSummary, RelayHealth};
pub use relay::{ReadinessReceiver, RelayFanout, UnitSource};
pub use sink::{SinkCodec, UdpSink, UnitSink};
pub use state::JobState;

use serde::Serialize;

/// Which encoder pipeline a sink, job or log file belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EncoderRole {
    /// Outbound live broadcast
    Live,
    /// Local recording to disk
    Record,
}

impl EncoderRole {
    pub const ALL: [EncoderRole; 2] = [EncoderRole::Live, EncoderRole::Record];

    pub(crate) fn index(self) -> usize {
        match self {
            EncoderRole::Live => 0,
            EncoderRole::Record => 1,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            EncoderRole::Live => "live",
            EncoderRole::Record => "record",
        }
    }
}

impl std::fmt::Display for EncoderRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
