mod common;
mod keyframe;
mod negotiator;
mod track;

pub use keyframe::{KeyframeCoordinator, KeyframeRequester};
pub use negotiator::{
    MediaSession, NegotiatorSettings, SessionNegotiator, SessionState, SessionTrack, TrackHandler,
};
pub use track::RemoteVideoTrack;
