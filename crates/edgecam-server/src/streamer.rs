//! Media streamer
//!
//! Moves frames from a source through the session's pipeline and encoder
//! onto its outgoing track. Filtering and encoding run on a dedicated thread;
//! an async task writes the encoded samples to the track.

use crate::pipeline::FramePipeline;
use anyhow::Result;
use edgecam_media::capture::{FrameReceiver, FRAME_QUEUE_DEPTH};
use edgecam_media::codec::{H264Encoder, VideoEncoder};
use edgecam_media::VideoFrame;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tokio::sync::mpsc;
use uuid::Uuid;
use webrtc::media::Sample;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;

/// Asks a session's encoder for a keyframe, e.g. when the viewer connects
/// or reports picture loss
#[derive(Debug, Clone, Default)]
pub struct KeyframeRequest(Arc<AtomicBool>);

impl KeyframeRequest {
    pub fn request(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    fn take(&self) -> bool {
        self.0.swap(false, Ordering::SeqCst)
    }
}

/// Filters and encodes frames into samples for the track
pub struct SampleProducer {
    pipeline: FramePipeline,
    encoder: Option<H264Encoder>,
    frame_duration: Duration,
    /// One keyframe per second of video
    keyframe_interval: u64,
    keyframe_request: KeyframeRequest,
    /// Dimensions the encoder refused, so the warning is logged once per size
    rejected: Option<(u32, u32)>,
}

impl SampleProducer {
    pub fn new(pipeline: FramePipeline, fps: u32, keyframe_request: KeyframeRequest) -> Self {
        let fps = fps.max(1);
        Self {
            pipeline,
            encoder: None,
            frame_duration: Duration::from_secs(1) / fps,
            keyframe_interval: u64::from(fps),
            keyframe_request,
            rejected: None,
        }
    }

    /// Returns `None` when the frame could not be encoded; the frame is dropped
    pub fn next_sample(&mut self, frame: VideoFrame) -> Option<Sample> {
        let frame = self.pipeline.process(frame);
        let keyframe_requested = self.keyframe_request.take();
        let encoder = self.encoder_for(frame.width, frame.height)?;
        if keyframe_requested {
            encoder.force_keyframe();
        }

        match encoder.encode(&frame) {
            Ok(encoded) if !encoded.data.is_empty() => {
                if keyframe_requested && encoded.is_keyframe {
                    tracing::debug!("Sent requested keyframe");
                }
                Some(Sample {
                    data: encoded.data.into(),
                    duration: self.frame_duration,
                    ..Default::default()
                })
            }
            Ok(_) => None,
            Err(e) => {
                tracing::warn!("Dropping frame: {}", e);
                None
            }
        }
    }

    /// The encoder for the current frame size, recreated when the size changes
    fn encoder_for(&mut self, width: u32, height: u32) -> Option<&mut H264Encoder> {
        let matches = self
            .encoder
            .as_ref()
            .is_some_and(|e| e.width() == width && e.height() == height);

        if !matches {
            self.encoder = None;
            if self.rejected == Some((width, height)) {
                return None;
            }
            match H264Encoder::new(width, height, self.keyframe_interval) {
                Ok(encoder) => {
                    self.rejected = None;
                    self.encoder = Some(encoder);
                }
                Err(e) => {
                    tracing::warn!("Cannot encode {}x{} frames: {}", width, height, e);
                    self.rejected = Some((width, height));
                    return None;
                }
            }
        }

        self.encoder.as_mut()
    }
}

/// Start streaming `frames` to `track` until `stop` is set, the source ends
/// or the track goes away
pub fn spawn(
    session_id: Uuid,
    mut frames: FrameReceiver,
    pipeline: FramePipeline,
    fps: u32,
    keyframe_request: KeyframeRequest,
    track: Arc<TrackLocalStaticSample>,
    stop: Arc<AtomicBool>,
) -> Result<()> {
    let (sample_tx, mut sample_rx) = mpsc::channel::<Sample>(FRAME_QUEUE_DEPTH);

    thread::Builder::new()
        .name("edgecam-encode".to_string())
        .spawn(move || {
            // The encoder wraps a C handle and stays on this thread
            let mut producer = SampleProducer::new(pipeline, fps, keyframe_request);
            let mut sent = 0u64;
            while let Some(frame) = frames.blocking_recv() {
                if stop.load(Ordering::SeqCst) {
                    break;
                }
                if let Some(sample) = producer.next_sample(frame) {
                    if sample_tx.blocking_send(sample).is_err() {
                        break;
                    }
                    sent += 1;
                }
            }
            tracing::debug!(
                "Encoder for session {} stopped after {} samples ({} unfiltered)",
                session_id,
                sent,
                producer.pipeline.failures()
            );
        })?;

    tokio::spawn(async move {
        let mut written = 0u64;
        while let Some(sample) = sample_rx.recv().await {
            written += 1;
            if let Err(e) = track.write_sample(&sample).await {
                if e.to_string().contains("closed") {
                    tracing::info!("Track closed for session {}", session_id);
                    break;
                }
                if written % 100 == 1 {
                    tracing::warn!("Failed to write sample for session {}: {}", session_id, e);
                }
            }
            if written == 1 {
                tracing::info!("Session {} is streaming", session_id);
            }
        }
    });

    Ok(())
}
