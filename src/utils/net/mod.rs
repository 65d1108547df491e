pub mod signaling;
pub mod webrtc;
