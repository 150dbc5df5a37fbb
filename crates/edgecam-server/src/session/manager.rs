//! Session manager
//!
//! Turns SDP offers into answers and wires each new peer connection to the
//! frame source.

use super::registry::{on_ice_state, Session, SessionRegistry};
use crate::error::{AppError, Result};
use crate::pipeline::FramePipeline;
use crate::rtc;
use crate::streamer::{self, KeyframeRequest};
use edgecam_media::capture::FrameSource;
use edgecam_media::codec::VideoCodec;
use edgecam_protocol::{AnswerResponse, FilterMode, FilterSettings, SessionDescription, SessionInfo};
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Weak};
use tokio::sync::watch;
use uuid::Uuid;
use webrtc::api::API;
use webrtc::ice_transport::ice_connection_state::RTCIceConnectionState;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtcp::payload_feedbacks::full_intra_request::FullIntraRequest;
use webrtc::rtcp::payload_feedbacks::picture_loss_indication::PictureLossIndication;
use webrtc::rtp_transceiver::rtp_sender::RTCRtpSender;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;

pub struct SessionManager {
    /// WebRTC API (shared for all connections)
    api: Arc<API>,
    ice_servers: Vec<RTCIceServer>,
    registry: Arc<SessionRegistry>,
    source: Arc<dyn FrameSource>,
    settings: watch::Receiver<FilterSettings>,
    fps: u32,
}

impl SessionManager {
    pub fn new(
        api: API,
        ice_servers: Vec<RTCIceServer>,
        source: Arc<dyn FrameSource>,
        settings: watch::Receiver<FilterSettings>,
        fps: u32,
    ) -> Self {
        tracing::info!("Frame source: {}", source.describe());
        Self {
            api: Arc::new(api),
            ice_servers,
            registry: Arc::new(SessionRegistry::new()),
            source,
            settings,
            fps,
        }
    }

    /// Answer a browser's offer with a new streaming session
    pub async fn negotiate(
        &self,
        offer: SessionDescription,
        mode: FilterMode,
    ) -> Result<AnswerResponse> {
        if offer.sdp_type != "offer" {
            return Err(AppError::BadRequest(format!(
                "Expected an offer, got \"{}\"",
                offer.sdp_type
            )));
        }
        let offer = RTCSessionDescription::offer(offer.sdp)
            .map_err(|e| AppError::BadRequest(format!("Invalid SDP offer: {}", e)))?;

        let config = RTCConfiguration {
            ice_servers: self.ice_servers.clone(),
            ..Default::default()
        };
        let peer_connection = Arc::new(self.api.new_peer_connection(config).await?);

        let session = Session::new(peer_connection.clone(), mode);
        let stop = session.stop_flag();
        let session_id = self.registry.insert(session).await;

        match self
            .start_session(session_id, &peer_connection, offer, mode, stop)
            .await
        {
            Ok(answer) => {
                tracing::info!("Session {} negotiated ({})", session_id, mode);
                Ok(AnswerResponse {
                    description: answer,
                    session_id,
                })
            }
            Err(e) => {
                self.registry.remove(session_id).await;
                Err(e)
            }
        }
    }

    async fn start_session(
        &self,
        session_id: Uuid,
        peer_connection: &Arc<RTCPeerConnection>,
        offer: RTCSessionDescription,
        mode: FilterMode,
        stop: Arc<AtomicBool>,
    ) -> Result<SessionDescription> {
        let keyframe_request = KeyframeRequest::default();
        self.watch_connection(session_id, peer_connection, keyframe_request.clone());

        // The track must exist before the offer is applied so it is bound to
        // the offered video transceiver
        let track = Arc::new(TrackLocalStaticSample::new(
            rtc::video_capability(VideoCodec::H264),
            "video".to_string(),
            format!("edgecam-{}", session_id),
        ));
        let sender = peer_connection
            .add_track(Arc::clone(&track) as Arc<dyn TrackLocal + Send + Sync>)
            .await?;
        read_rtcp(session_id, sender, keyframe_request.clone());

        peer_connection
            .set_remote_description(offer)
            .await
            .map_err(|e| AppError::BadRequest(format!("Offer rejected: {}", e)))?;

        // Opening a camera blocks, keep it off the runtime threads
        let source = self.source.clone();
        let source_stop = stop.clone();
        let frames = tokio::task::spawn_blocking(move || source.start(source_stop))
            .await
            .map_err(anyhow::Error::from)??;

        let pipeline = FramePipeline::new(mode, self.settings.clone());
        streamer::spawn(
            session_id,
            frames,
            pipeline,
            self.fps,
            keyframe_request,
            track,
            stop,
        )?;

        let answer = peer_connection.create_answer(None).await?;
        let mut gather_complete = peer_connection.gathering_complete_promise().await;
        peer_connection.set_local_description(answer).await?;
        let _ = gather_complete.recv().await;

        let local = peer_connection.local_description().await.ok_or_else(|| {
            AppError::Internal(anyhow::anyhow!("No local description after ICE gathering"))
        })?;

        Ok(SessionDescription {
            sdp: local.sdp,
            sdp_type: local.sdp_type.to_string(),
        })
    }

    /// Drop the session when ICE fails or closes, and ask for a fresh
    /// keyframe once media can flow
    fn watch_connection(
        &self,
        session_id: Uuid,
        peer_connection: &RTCPeerConnection,
        keyframe_request: KeyframeRequest,
    ) {
        let registry: Weak<SessionRegistry> = Arc::downgrade(&self.registry);

        peer_connection.on_ice_connection_state_change(Box::new(
            move |state: RTCIceConnectionState| {
                tracing::info!("Session {} ICE state: {}", session_id, state);
                // Closing from inside the callback would wait on itself
                tokio::spawn(on_ice_state(registry.clone(), session_id, state));
                Box::pin(async {})
            },
        ));

        peer_connection.on_peer_connection_state_change(Box::new(
            move |state: RTCPeerConnectionState| {
                if state == RTCPeerConnectionState::Connected {
                    tracing::info!("Session {} connected", session_id);
                    // Anything encoded before DTLS finished never reached the viewer
                    keyframe_request.request();
                }
                Box::pin(async {})
            },
        ));
    }

    pub async fn list(&self) -> Vec<SessionInfo> {
        self.registry.list().await
    }

    pub async fn count(&self) -> usize {
        self.registry.len().await
    }

    /// Close one session; false if it does not exist
    pub async fn close(&self, session_id: Uuid) -> bool {
        self.registry.remove(session_id).await
    }

    /// Close every session. Returns how many were open.
    pub async fn shutdown(&self) -> usize {
        self.registry.close_all().await
    }
}

/// Read incoming RTCP so interceptors (NACK, reports) keep working, and turn
/// picture loss reports into keyframe requests
fn read_rtcp(session_id: Uuid, sender: Arc<RTCRtpSender>, keyframe_request: KeyframeRequest) {
    tokio::spawn(async move {
        let mut rtcp_buf = vec![0u8; 1500];
        while let Ok((packets, _)) = sender.read(&mut rtcp_buf).await {
            let wants_keyframe = packets.iter().any(|packet| {
                let packet = packet.as_any();
                packet.is::<PictureLossIndication>() || packet.is::<FullIntraRequest>()
            });
            if wants_keyframe {
                tracing::debug!("Session {} requested a keyframe", session_id);
                keyframe_request.request();
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use edgecam_media::capture::TestPatternSource;

    fn manager() -> SessionManager {
        let (_tx, rx) = watch::channel(FilterSettings::default());
        SessionManager::new(
            rtc::build_api().unwrap(),
            vec![],
            Arc::new(TestPatternSource::new(64, 48, 10)),
            rx,
            10,
        )
    }

    #[tokio::test]
    async fn test_rejects_answer_type() {
        let manager = manager();
        let result = manager
            .negotiate(
                SessionDescription {
                    sdp: "v=0\r\n".to_string(),
                    sdp_type: "answer".to_string(),
                },
                FilterMode::Edges,
            )
            .await;

        assert!(matches!(result, Err(AppError::BadRequest(_))));
        assert_eq!(manager.count().await, 0);
    }

    #[tokio::test]
    async fn test_bad_sdp_leaves_no_session() {
        let manager = manager();
        let result = manager
            .negotiate(
                SessionDescription {
                    sdp: "not sdp".to_string(),
                    sdp_type: "offer".to_string(),
                },
                FilterMode::Canny,
            )
            .await;

        assert!(result.is_err());
        assert_eq!(manager.count().await, 0);
    }

    #[tokio::test]
    async fn test_unusable_offer_is_bad_request() {
        let manager = manager();
        // Parses as SDP, but has no DTLS fingerprint or ICE credentials
        let sdp = "v=0\r\n\
                   o=- 0 0 IN IP4 127.0.0.1\r\n\
                   s=-\r\n\
                   t=0 0\r\n\
                   m=video 9 UDP/TLS/RTP/SAVPF 102\r\n\
                   c=IN IP4 0.0.0.0\r\n\
                   a=mid:0\r\n\
                   a=recvonly\r\n\
                   a=rtpmap:102 H264/90000\r\n";

        let result = manager
            .negotiate(
                SessionDescription {
                    sdp: sdp.to_string(),
                    sdp_type: "offer".to_string(),
                },
                FilterMode::Edges,
            )
            .await;

        assert!(matches!(result, Err(AppError::BadRequest(_))), "{:?}", result.err());
        assert_eq!(manager.count().await, 0);
    }

    #[tokio::test]
    async fn test_close_unknown_session() {
        let manager = manager();
        assert!(!manager.close(Uuid::new_v4()).await);
        assert_eq!(manager.shutdown().await, 0);
    }
}
