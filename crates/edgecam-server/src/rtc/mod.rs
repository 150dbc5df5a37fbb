//! WebRTC plumbing shared by every session: the media engine and ICE servers.

use crate::state::AppState;
use anyhow::Result;
use axum::{extract::State, Json};
use edgecam_media::codec::VideoCodec;
use edgecam_protocol::{IceServer, IceServersResponse};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::setting_engine::SettingEngine;
use webrtc::api::{APIBuilder, API};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::rtp_transceiver::rtp_codec::{
    RTCRtpCodecCapability, RTCRtpCodecParameters, RTPCodecType,
};

/// Dynamic payload type used for H.264
const H264_PAYLOAD_TYPE: u8 = 102;

/// Codec capability of the outgoing video track. Must match the media engine registration.
pub fn video_capability(codec: VideoCodec) -> RTCRtpCodecCapability {
    RTCRtpCodecCapability {
        mime_type: codec.mime_type().to_string(),
        clock_rate: codec.clock_rate(),
        channels: 0,
        sdp_fmtp_line: codec.sdp_fmtp_line().to_string(),
        rtcp_feedback: vec![],
    }
}

/// Build the WebRTC API with H.264 as the only video codec
pub fn build_api() -> Result<API> {
    let mut media_engine = MediaEngine::default();

    media_engine.register_codec(
        RTCRtpCodecParameters {
            capability: video_capability(VideoCodec::H264),
            payload_type: H264_PAYLOAD_TYPE,
            ..Default::default()
        },
        RTPCodecType::Video,
    )?;

    let mut registry = Registry::new();
    registry = register_default_interceptors(registry, &mut media_engine)?;

    let api = APIBuilder::new()
        .with_media_engine(media_engine)
        .with_interceptor_registry(registry)
        .with_setting_engine(SettingEngine::default())
        .build();

    Ok(api)
}

pub fn ice_servers(stun_servers: &[String]) -> Vec<RTCIceServer> {
    stun_servers
        .iter()
        .filter(|url| !url.trim().is_empty())
        .map(|url| RTCIceServer {
            urls: vec![url.trim().to_string()],
            ..Default::default()
        })
        .collect()
}

/// `GET /ice-servers`: the servers the page should hand to its own peer connection
pub async fn get_ice_servers(State(state): State<AppState>) -> Json<IceServersResponse> {
    let ice_servers = ice_servers(&state.config.stun_servers)
        .into_iter()
        .map(|server| IceServer {
            urls: server.urls,
            username: None,
            credential: None,
        })
        .collect();

    Json(IceServersResponse { ice_servers })
}
