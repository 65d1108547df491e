//! The studio context
//!
//! Owns every component and wires them together: inbound tracks from the
//! negotiator feed the relay, the encoders attach their sinks to the relay
//! and ask the negotiator's session for keyframes.

use log::{info, warn};
use serde::Serialize;
use std::net::IpAddr;
use std::sync::Arc;

use crate::config::StudioConfig;
use crate::error::{EncoderError, NegotiationError, TunnelError};
use crate::pipeline::{EncoderRole, HealthSummary, RelayFanout, RelayHealth};
use crate::utils::net::signaling::SignalingHub;
use crate::utils::net::webrtc::{
    KeyframeCoordinator, SessionNegotiator, SessionState, SessionTrack, TrackHandler,
};
use crate::workers::ffmpeg::probe_available;
use crate::workers::{
    EncoderProcessManager, JobStatus, RecordingStarted, StopReport, TunnelManager, TunnelSettings,
};

#[derive(Debug, Clone, Serialize)]
pub struct SessionStatus {
    pub id: u64,
    pub state: SessionState,
    pub created_at: String,
    pub ssrc: Option<u32>,
    pub codec: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RelayStatus {
    pub has_data: bool,
    pub live_attached: bool,
    pub record_attached: bool,
    pub health: HealthSummary,
}

#[derive(Debug, Clone, Serialize)]
pub struct StudioStatus {
    pub jobs: Vec<JobStatus>,
    pub session: Option<SessionStatus>,
    pub relay: RelayStatus,
    pub tunnel_open: bool,
    pub tunnel_opening: bool,
    pub signaling_clients: usize,
}

pub struct Studio {
    config: StudioConfig,
    relay: Arc<RelayFanout>,
    negotiator: Arc<SessionNegotiator>,
    encoders: EncoderProcessManager,
    signaling: Arc<SignalingHub>,
    tunnel: TunnelManager,
}

impl Studio {
    pub fn new(config: StudioConfig) -> Result<Studio, webrtc::Error> {
        let relay = Arc::new(RelayFanout::new(Arc::new(RelayHealth::new())));

        let negotiator = Arc::new(SessionNegotiator::new(
            config.negotiator.clone(),
            relay_track_handler(Arc::clone(&relay)),
        )?);

        let keyframes = Arc::new(KeyframeCoordinator::new(Arc::clone(&negotiator)));
        let encoders =
            EncoderProcessManager::new(config.encoder.clone(), Arc::clone(&relay), keyframes);

        let tunnel = TunnelManager::new(TunnelSettings::localhost_run(config.http_port));

        Ok(Studio {
            config,
            relay,
            negotiator,
            encoders,
            signaling: Arc::new(SignalingHub::new()),
            tunnel,
        })
    }

    pub fn config(&self) -> &StudioConfig {
        &self.config
    }

    pub fn signaling(&self) -> Arc<SignalingHub> {
        Arc::clone(&self.signaling)
    }

    pub async fn negotiate(&self, offer_sdp: String) -> Result<String, NegotiationError> {
        self.negotiator.negotiate(offer_sdp).await
    }

    pub async fn start_stream(&self, url: &str) -> Result<(), EncoderError> {
        self.encoders.start_stream(url).await
    }

    pub async fn stop_stream(&self) -> Result<Option<StopReport>, EncoderError> {
        self.encoders.stop(EncoderRole::Live).await
    }

    pub async fn start_recording(&self, base_name: &str) -> Result<RecordingStarted, EncoderError> {
        self.encoders.start_recording(base_name).await
    }

    pub async fn stop_recording(&self) -> Result<Option<StopReport>, EncoderError> {
        self.encoders.stop(EncoderRole::Record).await
    }

    pub async fn toggle_tunnel(&self) -> Result<String, TunnelError> {
        self.tunnel.toggle().await
    }

    pub async fn ffmpeg_available(&self) -> bool {
        probe_available(&self.config.encoder.ffmpeg).await
    }

    /// First non-loopback IPv4 address, for the guest link.
    pub fn local_ip(&self) -> String {
        match local_ip_address::local_ip() {
            Ok(IpAddr::V4(ip)) if !ip.is_loopback() => ip.to_string(),
            Ok(_) => "127.0.0.1".to_string(),
            Err(e) => {
                warn!("Local IP lookup failed: {}", e);
                "127.0.0.1".to_string()
            }
        }
    }

    pub async fn status(&self) -> StudioStatus {
        let session = match self.negotiator.active_session().await {
            Some(session) => Some(SessionStatus {
                id: session.id(),
                state: session.state().await,
                created_at: session.created_at().format("%Y-%m-%d %H:%M:%S").to_string(),
                ssrc: session.ssrc(),
                codec: session.codec().map(|codec| codec.to_string()),
            }),
            None => None,
        };

        StudioStatus {
            jobs: self.encoders.status().await,
            session,
            relay: RelayStatus {
                has_data: self.relay.has_data(),
                live_attached: self.relay.is_attached(EncoderRole::Live).await,
                record_attached: self.relay.is_attached(EncoderRole::Record).await,
                health: self.relay.health().summary(),
            },
            tunnel_open: self.tunnel.is_open().await,
            tunnel_opening: self.tunnel.is_opening().await,
            signaling_clients: self.signaling.client_count().await,
        }
    }

    /// Stop both encoders (the recording is finalized), then drop the
    /// session and the tunnel.
    pub async fn shutdown(&self) {
        info!("Shutting down studio");
        self.encoders.shutdown().await;
        self.negotiator.close().await;
        self.tunnel.close().await;
        info!("{}", self.relay.health().summary());
    }
}

/// Every inbound video track starts a new relay session.
fn relay_track_handler(relay: Arc<RelayFanout>) -> TrackHandler {
    Arc::new(move |track: SessionTrack| {
        let relay = Arc::clone(&relay);
        let generation = relay.begin_session();
        info!(
            "Relaying session {} track {} ({}) as relay session {}",
            track.session_id, track.ssrc, track.codec, generation
        );
        tokio::spawn(async move {
            relay.run(generation, track.source, track.cancel).await;
        });
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::SinkCodec;
    use crate::pipeline::relay::tests::{ChannelSource, CollectSink};
    use bytes::Bytes;
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    #[tokio::test]
    async fn test_track_handler_starts_a_relay_session() {
        let relay = Arc::new(RelayFanout::new(Arc::new(RelayHealth::new())));
        let (sink, mut sink_rx) = CollectSink::new();
        let _ = relay.attach(EncoderRole::Record, sink).await;

        let (tx, source) = ChannelSource::new();
        let cancel = CancellationToken::new();
        let handler = relay_track_handler(Arc::clone(&relay));
        handler(SessionTrack {
            session_id: 1,
            ssrc: 42,
            codec: SinkCodec::default(),
            source,
            cancel: cancel.clone(),
        });

        for i in 0..3u8 {
            tx.send(Bytes::from(vec![0x80, 96, 0, i])).unwrap();
        }
        for _ in 0..3 {
            tokio::time::timeout(Duration::from_secs(2), sink_rx.recv())
                .await
                .unwrap()
                .unwrap();
        }
        assert!(relay.has_data());

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(2), async {
            while relay.has_data() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("cancelled session must clear has_data");
    }

    #[tokio::test]
    async fn test_idle_status() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = StudioConfig::default();
        config.encoder.data_dir = dir.path().to_path_buf();
        config.negotiator.ice_servers.clear();
        let studio = Studio::new(config).unwrap();

        let status = studio.status().await;
        assert_eq!(status.jobs.len(), 2);
        assert!(status.jobs.iter().all(|job| job.state == "idle"));
        assert!(status.session.is_none());
        assert!(!status.relay.has_data);
        assert!(!status.tunnel_open);
        assert!(!status.tunnel_opening);

        assert!(studio.stop_recording().await.unwrap().is_none());
        studio.shutdown().await;
    }
}
