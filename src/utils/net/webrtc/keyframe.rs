use async_trait::async_trait;
use log::{debug, warn};
use rtcp::payload_feedbacks::picture_loss_indication::PictureLossIndication;
use std::sync::Arc;

use super::negotiator::SessionNegotiator;
use crate::pipeline::SinkCodec;

/// Asks the media source for a fresh keyframe.
#[async_trait]
pub trait KeyframeRequester: Send + Sync {
    /// Best effort: failures are logged, never returned.
    async fn request_active_keyframe(&self);

    /// Codec of the inbound track, once one has arrived
    async fn active_codec(&self) -> Option<SinkCodec> {
        None
    }
}

/// Sends Picture Loss Indications to the browser of the active session.
pub struct KeyframeCoordinator {
    negotiator: Arc<SessionNegotiator>,
}

impl KeyframeCoordinator {
    pub fn new(negotiator: Arc<SessionNegotiator>) -> KeyframeCoordinator {
        KeyframeCoordinator { negotiator }
    }

    /// Request a keyframe for the track identified by `ssrc`.
    ///
    /// Returns whether the request was written to the peer connection.
    pub async fn request_keyframe(&self, ssrc: u32) -> bool {
        let Some(session) = self.negotiator.active_session().await else {
            debug!("Keyframe request for {} dropped: no active session", ssrc);
            return false;
        };

        let pli = PictureLossIndication {
            sender_ssrc: 0,
            media_ssrc: ssrc,
        };

        match session.connection().write_rtcp(&[Box::new(pli)]).await {
            Ok(_) => {
                debug!("Keyframe requested from session {} (ssrc {})", session.id(), ssrc);
                true
            }
            Err(e) => {
                warn!("Keyframe request to session {} failed: {}", session.id(), e);
                false
            }
        }
    }
}

#[async_trait]
impl KeyframeRequester for KeyframeCoordinator {
    async fn request_active_keyframe(&self) {
        match self.negotiator.active_ssrc().await {
            Some(ssrc) => {
                self.request_keyframe(ssrc).await;
            }
            None => debug!("Keyframe request skipped: no inbound video track yet"),
        }
    }

    async fn active_codec(&self) -> Option<SinkCodec> {
        self.negotiator.active_codec().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::net::webrtc::negotiator::SessionTrack;
    use crate::utils::net::webrtc::negotiator::tests::{
        LoopbackPublisher, recording_negotiator, test_settings,
    };
    use std::time::Duration;

    #[tokio::test]
    async fn test_request_without_session_is_a_no_op() {
        let negotiator = Arc::new(
            SessionNegotiator::new(test_settings(), Arc::new(|_track: SessionTrack| {})).unwrap(),
        );
        let keyframes = KeyframeCoordinator::new(negotiator);

        assert!(!keyframes.request_keyframe(1234).await);
        keyframes.request_active_keyframe().await;
    }

    #[tokio::test]
    async fn test_keyframe_request_reaches_the_publisher() {
        let (negotiator, mut tracks) = recording_negotiator();
        let negotiator = Arc::new(negotiator);
        let mut publisher = LoopbackPublisher::connect(&negotiator).await;

        let track = tokio::time::timeout(Duration::from_secs(15), tracks.recv())
            .await
            .expect("inbound video track never arrived")
            .unwrap();

        let keyframes = KeyframeCoordinator::new(Arc::clone(&negotiator));
        assert!(keyframes.request_keyframe(track.ssrc).await);

        let media_ssrc = tokio::time::timeout(Duration::from_secs(5), publisher.plis.recv())
            .await
            .expect("PLI never reached the publisher")
            .unwrap();
        assert_eq!(media_ssrc, track.ssrc);

        // the trait path targets the same track
        keyframes.request_active_keyframe().await;
        let media_ssrc = tokio::time::timeout(Duration::from_secs(5), publisher.plis.recv())
            .await
            .expect("second PLI never reached the publisher")
            .unwrap();
        assert_eq!(media_ssrc, track.ssrc);
        assert_eq!(keyframes.active_codec().await, Some(track.codec.clone()));

        publisher.close().await;
        negotiator.close().await;
    }
}
