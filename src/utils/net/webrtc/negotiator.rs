//! Browser session negotiation
//!
//! The studio accepts exactly one inbound media session at a time. Every
//! offer is answered by a fresh peer connection; only once the answer is
//! ready does the new session replace the active one.

use chrono::{DateTime, Local};
use log::{debug, info, warn};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use webrtc::api::API;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;
use webrtc::rtp_transceiver::rtp_receiver::RTCRtpReceiver;
use webrtc::rtp_transceiver::RTCRtpTransceiver;
use webrtc::track::track_remote::TrackRemote;

use super::common::{create_webrtc_api, rtc_configuration};
use super::track::RemoteVideoTrack;
use crate::assets::{ICE_GATHERING_WAIT, SINK_PAYLOAD_TYPE, STUN_SERVER};
use crate::error::NegotiationError;
use crate::pipeline::{SinkCodec, UnitSource};

#[derive(Debug, Clone)]
pub struct NegotiatorSettings {
    pub ice_servers: Vec<String>,
    /// Upper bound on ICE candidate gathering before the answer is returned
    pub gathering_wait: Duration,
    /// Payload type stamped on every relayed packet
    pub payload_type: u8,
}

impl Default for NegotiatorSettings {
    fn default() -> Self {
        NegotiatorSettings {
            ice_servers: vec![STUN_SERVER.to_string()],
            gathering_wait: ICE_GATHERING_WAIT,
            payload_type: SINK_PAYLOAD_TYPE,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Negotiating,
    Connected,
    Disconnected,
    Closed,
}

/// The inbound video track of a session, handed to whoever relays it.
pub struct SessionTrack {
    pub session_id: u64,
    pub ssrc: u32,
    pub codec: SinkCodec,
    pub source: Arc<dyn UnitSource>,
    /// Cancelled when the session is replaced, closed or fails
    pub cancel: CancellationToken,
}

pub type TrackHandler = Arc<dyn Fn(SessionTrack) + Send + Sync>;

pub struct MediaSession {
    id: u64,
    created_at: DateTime<Local>,
    offer: String,
    answer: OnceLock<String>,
    connection: Arc<RTCPeerConnection>,
    ssrc: OnceLock<u32>,
    codec: OnceLock<SinkCodec>,
    state: RwLock<SessionState>,
    cancel: CancellationToken,
}

impl MediaSession {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn created_at(&self) -> DateTime<Local> {
        self.created_at
    }

    pub fn offer(&self) -> &str {
        &self.offer
    }

    /// Local description handed back to the browser
    pub fn answer(&self) -> Option<&str> {
        self.answer.get().map(String::as_str)
    }

    /// SSRC of the inbound video track, once it has arrived
    pub fn ssrc(&self) -> Option<u32> {
        self.ssrc.get().copied()
    }

    pub fn codec(&self) -> Option<SinkCodec> {
        self.codec.get().cloned()
    }

    pub async fn state(&self) -> SessionState {
        *self.state.read().await
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub(crate) fn connection(&self) -> &Arc<RTCPeerConnection> {
        &self.connection
    }

    async fn set_state(&self, state: SessionState) {
        let mut current = self.state.write().await;
        if *current != state {
            debug!("Session {}: {:?} -> {:?}", self.id, *current, state);
            *current = state;
        }
    }

    async fn close(&self) {
        self.cancel.cancel();
        self.set_state(SessionState::Closed).await;
        if let Err(e) = self.connection.close().await {
            warn!("Session {}: error while closing peer connection: {}", self.id, e);
        }
    }
}

pub struct SessionNegotiator {
    api: API,
    settings: NegotiatorSettings,
    on_track: TrackHandler,
    active: RwLock<Option<Arc<MediaSession>>>,
    negotiating: Mutex<()>,
    next_id: AtomicU64,
}

impl SessionNegotiator {
    pub fn new(
        settings: NegotiatorSettings,
        on_track: TrackHandler,
    ) -> Result<SessionNegotiator, webrtc::Error> {
        Ok(SessionNegotiator {
            api: create_webrtc_api()?,
            settings,
            on_track,
            active: RwLock::new(None),
            negotiating: Mutex::new(()),
            next_id: AtomicU64::new(1),
        })
    }

    /// Answer a browser offer, replacing the active session on success.
    ///
    /// A failed negotiation leaves the active session untouched.
    pub async fn negotiate(&self, offer_sdp: String) -> Result<String, NegotiationError> {
        let _guard = self.negotiating.lock().await;

        let offer = RTCSessionDescription::offer(offer_sdp.clone())
            .map_err(NegotiationError::MalformedOffer)?;

        let connection = Arc::new(
            self.api
                .new_peer_connection(rtc_configuration(&self.settings.ice_servers))
                .await
                .map_err(NegotiationError::Rejected)?,
        );

        let session = Arc::new(MediaSession {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            created_at: Local::now(),
            offer: offer_sdp,
            answer: OnceLock::new(),
            connection: Arc::clone(&connection),
            ssrc: OnceLock::new(),
            codec: OnceLock::new(),
            state: RwLock::new(SessionState::Negotiating),
            cancel: CancellationToken::new(),
        });

        self.install_handlers(&session);

        let answer = match self.answer(&connection, offer).await {
            Ok(answer) => answer,
            Err(e) => {
                warn!("Session {}: negotiation failed: {}", session.id, e);
                session.close().await;
                return Err(e);
            }
        };

        let _ = session.answer.set(answer.clone());
        let previous = self.active.write().await.replace(Arc::clone(&session));
        if let Some(previous) = previous {
            info!("Session {} replaced by session {}", previous.id, session.id);
            previous.close().await;
        }

        info!("Session {}: answer ready ({} bytes)", session.id, answer.len());
        Ok(answer)
    }

    async fn answer(
        &self,
        connection: &RTCPeerConnection,
        offer: RTCSessionDescription,
    ) -> Result<String, NegotiationError> {
        connection
            .add_transceiver_from_kind(RTPCodecType::Video, None)
            .await
            .map_err(NegotiationError::Rejected)?;

        connection
            .set_remote_description(offer)
            .await
            .map_err(NegotiationError::Rejected)?;

        let answer = connection
            .create_answer(None)
            .await
            .map_err(NegotiationError::Rejected)?;

        // the promise must be taken before the local description starts gathering
        let mut gather_complete = connection.gathering_complete_promise().await;

        connection
            .set_local_description(answer)
            .await
            .map_err(NegotiationError::Rejected)?;

        if tokio::time::timeout(self.settings.gathering_wait, gather_complete.recv())
            .await
            .is_err()
        {
            warn!(
                "ICE gathering incomplete after {:?}, answering with the candidates found so far",
                self.settings.gathering_wait
            );
        }

        connection
            .local_description()
            .await
            .map(|desc| desc.sdp)
            .ok_or(NegotiationError::MissingAnswer)
    }

    fn install_handlers(&self, session: &Arc<MediaSession>) {
        let weak: Weak<MediaSession> = Arc::downgrade(session);
        session
            .connection
            .on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
                let weak = weak.clone();
                Box::pin(async move {
                    let Some(session) = weak.upgrade() else {
                        return;
                    };
                    info!("Session {}: peer connection {}", session.id, state);
                    match state {
                        RTCPeerConnectionState::Connected => {
                            session.set_state(SessionState::Connected).await
                        }
                        RTCPeerConnectionState::Disconnected => {
                            session.set_state(SessionState::Disconnected).await
                        }
                        RTCPeerConnectionState::Failed | RTCPeerConnectionState::Closed => {
                            session.cancel.cancel();
                            session.set_state(SessionState::Closed).await;
                        }
                        _ => {}
                    }
                })
            }));

        let weak: Weak<MediaSession> = Arc::downgrade(session);
        let on_track = Arc::clone(&self.on_track);
        let payload_type = self.settings.payload_type;
        session.connection.on_track(Box::new(
            move |track: Arc<TrackRemote>,
                  _receiver: Arc<RTCRtpReceiver>,
                  _transceiver: Arc<RTCRtpTransceiver>| {
                let weak = weak.clone();
                let on_track = Arc::clone(&on_track);
                Box::pin(async move {
                    let Some(session) = weak.upgrade() else {
                        return;
                    };

                    if track.kind() != RTPCodecType::Video {
                        debug!("Session {}: ignoring {} track", session.id, track.kind());
                        return;
                    }

                    let ssrc = track.ssrc();
                    if session.ssrc.set(ssrc).is_err() {
                        debug!("Session {}: ignoring extra video track {}", session.id, ssrc);
                        return;
                    }

                    let codec = SinkCodec::from_mime_type(&track.codec().capability.mime_type);
                    let _ = session.codec.set(codec.clone());
                    info!("Session {}: video track {} ({})", session.id, ssrc, codec);

                    if session.cancel.is_cancelled() {
                        return;
                    }

                    on_track(SessionTrack {
                        session_id: session.id,
                        ssrc,
                        codec,
                        source: Arc::new(RemoteVideoTrack::new(track, payload_type)),
                        cancel: session.cancel.child_token(),
                    });
                })
            },
        ));
    }

    pub async fn active_session(&self) -> Option<Arc<MediaSession>> {
        self.active.read().await.clone()
    }

    pub async fn active_ssrc(&self) -> Option<u32> {
        self.active.read().await.as_ref().and_then(|s| s.ssrc())
    }

    pub async fn active_codec(&self) -> Option<SinkCodec> {
        self.active.read().await.as_ref().and_then(|s| s.codec())
    }

    /// Tear down the active session, if any.
    pub async fn close(&self) {
        let _guard = self.negotiating.lock().await;
        if let Some(session) = self.active.write().await.take() {
            info!("Session {}: closing", session.id);
            session.close().await;
        }
    }
}
