//! Frame sources
//!
//! A source runs on its own thread and hands frames to the session through a
//! small bounded channel, so a slow consumer stalls capture instead of
//! growing a queue.

use crate::frame::{PixelFormat, VideoFrame};
use anyhow::Result;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

/// Frames in flight between a capture thread and its consumer
pub const FRAME_QUEUE_DEPTH: usize = 2;

pub type FrameReceiver = mpsc::Receiver<VideoFrame>;

#[derive(Debug, Clone)]
pub struct VideoDeviceInfo {
    pub index: u32,
    pub name: String,
}

/// Something that can produce a stream of RGB frames.
///
/// `start` may block while the device opens. The capture thread exits once
/// `stop` is set or the receiver is dropped.
pub trait FrameSource: Send + Sync {
    fn describe(&self) -> String;
    fn start(&self, stop: Arc<AtomicBool>) -> Result<FrameReceiver>;
}

/// Synthetic moving pattern: a colour gradient with a bright square bouncing across it
#[derive(Debug, Clone)]
pub struct TestPatternSource {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
}

impl TestPatternSource {
    pub fn new(width: u32, height: u32, fps: u32) -> Self {
        Self { width, height, fps }
    }

    pub fn frame(&self, frame_number: u64) -> VideoFrame {
        test_pattern_frame(frame_number, self.width, self.height)
    }
}

pub fn test_pattern_frame(frame_number: u64, width: u32, height: u32) -> VideoFrame {
    let w = width as usize;
    let h = height as usize;
    let mut data = vec![0u8; w * h * 3];

    let base = (frame_number % 256) as u8;
    let side = (w.min(h) / 4).max(1);
    let travel = w.saturating_sub(side).max(1);
    let phase = (frame_number as usize * 4) % (2 * travel);
    let square_x = if phase < travel { phase } else { 2 * travel - phase };
    let square_y = h.saturating_sub(side) / 2;

    for y in 0..h {
        for x in 0..w {
            let idx = (y * w + x) * 3;
            let in_square =
                x >= square_x && x < square_x + side && y >= square_y && y < square_y + side;
            if in_square {
                data[idx..idx + 3].copy_from_slice(&[250, 250, 250]);
            } else {
                data[idx] = base.wrapping_add((x % 128) as u8);
                data[idx + 1] = (y * 255 / h.max(1)) as u8 / 2;
                data[idx + 2] = 60;
            }
        }
    }

    VideoFrame::new(width, height, data, PixelFormat::Rgb24)
}

impl FrameSource for TestPatternSource {
    fn describe(&self) -> String {
        format!("test pattern {}x{} @ {} fps", self.width, self.height, self.fps)
    }

    fn start(&self, stop: Arc<AtomicBool>) -> Result<FrameReceiver> {
        let (tx, rx) = mpsc::channel(FRAME_QUEUE_DEPTH);
        let source = self.clone();
        let frame_duration = Duration::from_secs(1) / source.fps.max(1);

        thread::Builder::new()
            .name("edgecam-pattern".to_string())
            .spawn(move || {
                let mut frame_number = 0u64;
                while !stop.load(Ordering::SeqCst) {
                    let started = Instant::now();
                    if tx.blocking_send(source.frame(frame_number)).is_err() {
                        break;
                    }
                    frame_number += 1;

                    if let Some(remaining) = frame_duration.checked_sub(started.elapsed()) {
                        thread::sleep(remaining);
                    }
                }
                tracing::debug!("Test pattern stopped after {} frames", frame_number);
            })?;

        Ok(rx)
    }
}

/// Webcam capture through nokhwa
#[derive(Debug, Clone)]
pub struct CameraSource {
    /// Device index (`0`) or Video4Linux path (`/dev/video0`)
    pub device: String,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
}

impl CameraSource {
    pub fn new(device: impl Into<String>, width: u32, height: u32, fps: u32) -> Self {
        Self {
            device: device.into(),
            width,
            height,
            fps,
        }
    }

    /// Index of the device, when it is given numerically or as `/dev/videoN`
    pub fn device_index(&self) -> Option<u32> {
        let device = self.device.trim();
        device
            .strip_prefix("/dev/video")
            .unwrap_or(device)
            .parse()
            .ok()
    }
}

#[cfg(feature = "camera")]
mod camera {
    use super::*;
    use anyhow::anyhow;
    use nokhwa::pixel_format::RgbFormat;
    use nokhwa::utils::{
        ApiBackend, CameraFormat, CameraIndex, FrameFormat, RequestedFormat, RequestedFormatType,
        Resolution,
    };
    use nokhwa::Camera;

    pub fn list_devices() -> Result<Vec<VideoDeviceInfo>> {
        let devices = nokhwa::query(ApiBackend::Auto)?;
        Ok(devices
            .iter()
            .map(|d| VideoDeviceInfo {
                index: d.index().as_index().unwrap_or(0),
                name: d.human_name().to_string(),
            })
            .collect())
    }

    impl CameraSource {
        fn camera_index(&self) -> CameraIndex {
            match self.device_index() {
                Some(index) => CameraIndex::Index(index),
                None => CameraIndex::String(self.device.clone()),
            }
        }

        fn open(&self) -> Result<Camera> {
            let format = CameraFormat::new(
                Resolution::new(self.width, self.height),
                FrameFormat::MJPEG,
                self.fps,
            );
            let requested =
                RequestedFormat::new::<RgbFormat>(RequestedFormatType::Closest(format));

            let mut camera = Camera::new(self.camera_index(), requested)?;
            camera.open_stream()?;

            let resolution = camera.resolution();
            tracing::info!(
                "Opened camera {} at {}x{} {} fps",
                self.device,
                resolution.width(),
                resolution.height(),
                camera.frame_rate()
            );
            Ok(camera)
        }
    }

    impl FrameSource for CameraSource {
        fn describe(&self) -> String {
            format!("camera {}", self.device)
        }

        fn start(&self, stop: Arc<AtomicBool>) -> Result<FrameReceiver> {
            let (tx, rx) = mpsc::channel(FRAME_QUEUE_DEPTH);
            // The camera handle is not Send on every backend, so it is opened on the capture thread
            let (ready_tx, ready_rx) = std::sync::mpsc::sync_channel::<Result<(), String>>(1);
            let source = self.clone();

            thread::Builder::new()
                .name("edgecam-camera".to_string())
                .spawn(move || {
                    let mut camera = match source.open() {
                        Ok(camera) => {
                            let _ = ready_tx.send(Ok(()));
                            camera
                        }
                        Err(e) => {
                            let _ = ready_tx.send(Err(e.to_string()));
                            return;
                        }
                    };

                    let mut frame_count = 0u64;
                    while !stop.load(Ordering::SeqCst) {
                        let buffer = match camera.frame() {
                            Ok(buffer) => buffer,
                            Err(e) => {
                                tracing::error!("Camera {} read failed: {}", source.device, e);
                                break;
                            }
                        };
                        let image = match buffer.decode_image::<RgbFormat>() {
                            Ok(image) => image,
                            Err(e) => {
                                tracing::warn!("Dropping undecodable camera frame: {}", e);
                                continue;
                            }
                        };

                        let (width, height) = (image.width(), image.height());
                        let frame =
                            VideoFrame::new(width, height, image.into_raw(), PixelFormat::Rgb24);
                        if tx.blocking_send(frame).is_err() {
                            break;
                        }
                        frame_count += 1;
                    }

                    if let Err(e) = camera.stop_stream() {
                        tracing::warn!("Error stopping camera {}: {}", source.device, e);
                    }
                    tracing::info!(
                        "Camera {} released after {} frames",
                        source.device,
                        frame_count
                    );
                })?;

            match ready_rx.recv() {
                Ok(Ok(())) => Ok(rx),
                Ok(Err(e)) => Err(anyhow!("Failed to open camera {}: {}", self.device, e)),
                Err(_) => Err(anyhow!("Camera thread for {} exited early", self.device)),
            }
        }
    }
}

#[cfg(feature = "camera")]
pub use camera::list_devices;

#[cfg(not(feature = "camera"))]
pub fn list_devices() -> Result<Vec<VideoDeviceInfo>> {
    anyhow::bail!("built without the `camera` feature")
}

#[cfg(not(feature = "camera"))]
impl FrameSource for CameraSource {
    fn describe(&self) -> String {
        format!("camera {}", self.device)
    }

    fn start(&self, _stop: Arc<AtomicBool>) -> Result<FrameReceiver> {
        anyhow::bail!(
            "cannot open camera {}: built without the `camera` feature",
            self.device
        )
    }
}
