use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use webrtc::track::track_remote::TrackRemote;
use webrtc::util::Marshal;

use crate::error::TrackError;
use crate::pipeline::UnitSource;

/// Inbound video track as a source of raw RTP packets.
///
/// Each packet is re-marshalled with the payload type the sink descriptors
/// announce, whatever the browser negotiated.
pub struct RemoteVideoTrack {
    track: Arc<TrackRemote>,
    payload_type: u8,
}

impl RemoteVideoTrack {
    pub fn new(track: Arc<TrackRemote>, payload_type: u8) -> RemoteVideoTrack {
        RemoteVideoTrack {
            track,
            payload_type,
        }
    }
}

#[async_trait]
impl UnitSource for RemoteVideoTrack {
    async fn read_unit(&self) -> Result<Bytes, TrackError> {
        let (mut packet, _) = self
            .track
            .read_rtp()
            .await
            .map_err(|e| TrackError::Read(e.to_string()))?;

        packet.header.payload_type = self.payload_type;
        packet.marshal().map_err(|e| TrackError::Read(e.to_string()))
    }
}
