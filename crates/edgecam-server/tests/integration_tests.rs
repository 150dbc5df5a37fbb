//! Integration tests for the Edgecam server
//!
//! The server runs on a random local port with the test-pattern source, so
//! no camera is needed.
//!
//! Run with: cargo test -p edgecam-server --test integration_tests

use clap::Parser;
use edgecam_protocol::{AnswerResponse, ErrorResponse, FilterSettings, SessionsResponse};
use edgecam_server::state::Config;
use reqwest::{Client, StatusCode};
use serde_json::json;
use std::time::Duration;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;
use webrtc::rtp_transceiver::rtp_transceiver_direction::RTCRtpTransceiverDirection;
use webrtc::rtp_transceiver::RTCRtpTransceiverInit;

/// Test helper to start a test server
async fn start_test_server() -> TestServer {
    TestServer::start().await.expect("Failed to start test server")
}

/// Test server wrapper
struct TestServer {
    addr: std::net::SocketAddr,
    state: edgecam_server::state::AppState,
    shutdown_tx: Option<tokio::sync::oneshot::Sender<()>>,
}

impl TestServer {
    async fn start() -> anyhow::Result<Self> {
        let config = Config::try_parse_from([
            "edgecam-server",
            "--source",
            "test-pattern",
            "--width",
            "64",
            "--height",
            "48",
            "--fps",
            "10",
            "--stun-server",
            "",
        ])?;

        let (router, state) = edgecam_server::create_app(config)?;

        // Bind to random port
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;

        // Create shutdown channel
        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();

        // Spawn server
        tokio::spawn(async move {
            axum::serve(listener, router)
                .with_graceful_shutdown(async {
                    shutdown_rx.await.ok();
                })
                .await
                .ok();
        });

        // Give server time to start
        tokio::time::sleep(Duration::from_millis(100)).await;

        Ok(Self {
            addr,
            state,
            shutdown_tx: Some(shutdown_tx),
        })
    }

    fn http_url(&self) -> String {
        format!("http://{}", self.addr)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

/// Build a receive-only video offer the way the browser page does
async fn browser_offer() -> anyhow::Result<(
    std::sync::Arc<webrtc::peer_connection::RTCPeerConnection>,
    RTCSessionDescription,
)> {
    let api = edgecam_server::rtc::build_api()?;
    let peer = std::sync::Arc::new(api.new_peer_connection(Default::default()).await?);

    peer.add_transceiver_from_kind(
        RTPCodecType::Video,
        Some(RTCRtpTransceiverInit {
            direction: RTCRtpTransceiverDirection::Recvonly,
            send_encodings: vec![],
        }),
    )
    .await?;

    let offer = peer.create_offer(None).await?;
    let mut gather_complete = peer.gathering_complete_promise().await;
    peer.set_local_description(offer).await?;
    let _ = gather_complete.recv().await;

    let local = peer
        .local_description()
        .await
        .ok_or_else(|| anyhow::anyhow!("no local description"))?;
    Ok((peer, local))
}

/// True if an H.264 RTP payload carries an IDR slice or a parameter set
fn carries_keyframe(payload: &[u8]) -> bool {
    let is_key = |nal_type: u8| nal_type == 5 || nal_type == 7;
    match payload.first().map(|b| b & 0x1f) {
        Some(24) => {
            // STAP-A: 16-bit size prefix before each aggregated NAL
            let mut rest = &payload[1..];
            while rest.len() > 2 {
                let size = usize::from(u16::from_be_bytes([rest[0], rest[1]]));
                if rest.get(2).is_some_and(|&b| is_key(b & 0x1f)) {
                    return true;
                }
                rest = rest.get(2 + size..).unwrap_or_default();
            }
            false
        }
        Some(28) => payload.get(1).is_some_and(|&b| is_key(b & 0x1f)),
        Some(nal_type) => is_key(nal_type),
        None => false,
    }
}

#[tokio::test]
async fn test_health_check() {
    let server = start_test_server().await;
    let client = Client::new();

    let response = client
        .get(format!("{}/health", server.http_url()))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.text().await.unwrap(), "OK");
}

#[tokio::test]
async fn test_index_serves_viewer_page() {
    let server = start_test_server().await;
    let client = Client::new();

    let response = client.get(server.http_url()).send().await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let content_type = response.headers()["content-type"].to_str().unwrap().to_string();
    assert!(content_type.starts_with("text/html"));

    let body = response.text().await.unwrap();
    assert!(body.contains("RTCPeerConnection"));
    assert!(body.contains("threshold1"));
    assert!(body.contains("threshold2"));
}

#[tokio::test]
async fn test_settings_round_trip() {
    let server = start_test_server().await;
    let client = Client::new();
    let url = format!("{}/settings", server.http_url());

    let initial: FilterSettings = client.get(&url).send().await.unwrap().json().await.unwrap();
    assert_eq!(initial, FilterSettings::default());

    let response = client
        .post(&url)
        .json(&json!({ "threshold1": 30, "threshold2": 90 }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let updated: FilterSettings = client.get(&url).send().await.unwrap().json().await.unwrap();
    assert_eq!(updated, FilterSettings::new(30, 90).unwrap());
}

#[tokio::test]
async fn test_settings_reject_out_of_range() {
    let server = start_test_server().await;
    let client = Client::new();
    let url = format!("{}/settings", server.http_url());

    let response = client
        .post(&url)
        .json(&json!({ "threshold1": 100, "threshold2": 501 }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let error: ErrorResponse = response.json().await.unwrap();
    assert!(error.error.contains("threshold2"));

    // Unchanged
    let current: FilterSettings = client.get(&url).send().await.unwrap().json().await.unwrap();
    assert_eq!(current, FilterSettings::default());
}

#[tokio::test]
async fn test_offer_rejects_non_offer() {
    let server = start_test_server().await;
    let client = Client::new();

    let response = client
        .post(format!("{}/offer", server.http_url()))
        .json(&json!({ "sdp": "v=0\r\n", "type": "answer" }))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(server.state.sessions.count().await, 0);
}

#[tokio::test]
async fn test_offer_negotiates_session() {
    let server = start_test_server().await;
    let client = Client::new();
    let (peer, offer) = browser_offer().await.unwrap();

    // Report every received packet and whether it carries a keyframe
    let (rtp_tx, mut rtp_rx) = tokio::sync::mpsc::unbounded_channel::<bool>();
    peer.on_track(Box::new(move |track, _receiver, _transceiver| {
        let rtp_tx = rtp_tx.clone();
        Box::pin(async move {
            while let Ok((packet, _attributes)) = track.read_rtp().await {
                if rtp_tx.send(carries_keyframe(&packet.payload)).is_err() {
                    break;
                }
            }
        })
    }));

    let response = client
        .post(format!("{}/offer", server.http_url()))
        .json(&json!({ "sdp": offer.sdp, "type": "offer", "filter": "canny" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let answer: AnswerResponse = response.json().await.unwrap();
    assert_eq!(answer.description.sdp_type, "answer");
    assert!(answer.description.sdp.contains("H264"));

    // The answer is usable by the offering peer
    peer.set_remote_description(RTCSessionDescription::answer(answer.description.sdp).unwrap())
        .await
        .unwrap();

    // Media flows once ICE connects, starting from a decodable keyframe
    let first_keyframe = tokio::time::timeout(Duration::from_secs(15), async {
        let mut packets = 0usize;
        while let Some(keyframe) = rtp_rx.recv().await {
            packets += 1;
            if keyframe {
                return Some(packets);
            }
        }
        None
    })
    .await
    .expect("no keyframe received over RTP");
    assert!(first_keyframe.is_some());

    let sessions: SessionsResponse = client
        .get(format!("{}/sessions", server.http_url()))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(sessions.count, 1);
    assert_eq!(sessions.sessions[0].id, answer.session_id);
    assert_eq!(sessions.sessions[0].mode, edgecam_protocol::FilterMode::Canny);

    let response = client
        .delete(format!("{}/sessions/{}", server.http_url(), answer.session_id))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    assert_eq!(server.state.sessions.count().await, 0);

    peer.close().await.unwrap();
}

#[tokio::test]
async fn test_shutdown_closes_all_sessions() {
    let server = start_test_server().await;
    let client = Client::new();

    let mut peers = Vec::new();
    for _ in 0..2 {
        let (peer, offer) = browser_offer().await.unwrap();
        let response = client
            .post(format!("{}/offer", server.http_url()))
            .json(&json!({ "sdp": offer.sdp, "type": "offer" }))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        peers.push(peer);
    }

    assert_eq!(server.state.sessions.count().await, 2);
    assert_eq!(server.state.sessions.shutdown().await, 2);
    assert_eq!(server.state.sessions.count().await, 0);

    for peer in peers {
        peer.close().await.unwrap();
    }
}

#[tokio::test]
async fn test_delete_unknown_session() {
    let server = start_test_server().await;
    let client = Client::new();

    let response = client
        .delete(format!("{}/sessions/{}", server.http_url(), uuid::Uuid::new_v4()))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_ice_servers_reflect_config() {
    let server = start_test_server().await;
    let client = Client::new();

    let body: serde_json::Value = client
        .get(format!("{}/ice-servers", server.http_url()))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    // Started with an empty STUN list
    assert_eq!(body["ice_servers"], json!([]));
}
