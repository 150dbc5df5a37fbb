//! Video codec utilities
//!
//! H.264 encoding of filtered frames through openh264. Both RGB and
//! single-channel frames are converted to YUV420 before encoding.

use crate::frame::{PixelFormat, VideoFrame};
use anyhow::{anyhow, bail, Result};
use openh264::encoder::{Encoder, FrameType};
use openh264::formats::YUVBuffer;

/// Video codec type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VideoCodec {
    H264,
}

impl VideoCodec {
    pub fn mime_type(&self) -> &'static str {
        match self {
            VideoCodec::H264 => "video/H264",
        }
    }

    pub fn clock_rate(&self) -> u32 {
        90_000
    }

    /// Baseline profile, level 3.1, non-interleaved packetization
    pub fn sdp_fmtp_line(&self) -> &'static str {
        match self {
            VideoCodec::H264 => {
                "level-asymmetry-allowed=1;packetization-mode=1;profile-level-id=42e01f"
            }
        }
    }
}

/// Video encoder trait
pub trait VideoEncoder {
    fn encode(&mut self, frame: &VideoFrame) -> Result<EncodedFrame>;
    /// Make the next encoded frame a keyframe
    fn force_keyframe(&mut self);
}

/// Result of encoding a single frame
#[derive(Debug, Clone)]
pub struct EncodedFrame {
    /// Annex B NAL units (with start codes)
    pub data: Vec<u8>,
    pub is_keyframe: bool,
}

/// H.264 encoder using openh264
///
/// openh264 only emits an IDR for the first frame unless asked, so the
/// encoder requests one every `keyframe_interval` frames and keeps asking
/// until one comes out (rate control may skip the frame it was asked on).
pub struct H264Encoder {
    encoder: Encoder,
    width: u32,
    height: u32,
    frame_count: u64,
    keyframe_interval: u64,
    keyframe_pending: bool,
}

impl H264Encoder {
    /// Dimensions must be non-zero and even (YUV420 chroma subsampling).
    /// A `keyframe_interval` of 0 disables periodic keyframes.
    pub fn new(width: u32, height: u32, keyframe_interval: u64) -> Result<Self> {
        if width == 0 || height == 0 || width % 2 != 0 || height % 2 != 0 {
            bail!("H.264 needs even, non-zero dimensions, got {}x{}", width, height);
        }

        let encoder =
            Encoder::new().map_err(|e| anyhow!("Failed to create H.264 encoder: {}", e))?;

        tracing::debug!("Created H.264 encoder for {}x{}", width, height);

        Ok(Self {
            encoder,
            width,
            height,
            frame_count: 0,
            keyframe_interval,
            keyframe_pending: false,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    fn encode_yuv(&mut self, yuv: Vec<u8>) -> Result<EncodedFrame> {
        if self.keyframe_interval > 0
            && self.frame_count > 0
            && self.frame_count % self.keyframe_interval == 0
        {
            self.keyframe_pending = true;
        }
        if self.keyframe_pending {
            self.encoder.force_intra_frame();
        }

        let buffer = YUVBuffer::from_vec(yuv, self.width as usize, self.height as usize);

        let bitstream = self
            .encoder
            .encode(&buffer)
            .map_err(|e| anyhow!("Encoding failed: {}", e))?;

        self.frame_count += 1;

        let is_keyframe = matches!(bitstream.frame_type(), FrameType::IDR | FrameType::I);
        if is_keyframe {
            self.keyframe_pending = false;
        }

        Ok(EncodedFrame {
            data: bitstream.to_vec(),
            is_keyframe,
        })
    }
}

impl VideoEncoder for H264Encoder {
    fn encode(&mut self, frame: &VideoFrame) -> Result<EncodedFrame> {
        if frame.width != self.width || frame.height != self.height {
            bail!(
                "Frame is {}x{}, encoder expects {}x{}",
                frame.width,
                frame.height,
                self.width,
                self.height
            );
        }
        if !frame.is_well_formed() {
            bail!(
                "Invalid frame size: expected {} bytes, got {}",
                frame.expected_len(),
                frame.data.len()
            );
        }

        let yuv = match frame.format {
            PixelFormat::Rgb24 => rgb_to_yuv420(&frame.data, self.width, self.height),
            PixelFormat::Gray8 => gray_to_yuv420(&frame.data, self.width, self.height),
        };
        self.encode_yuv(yuv)
    }

    fn force_keyframe(&mut self) {
        self.keyframe_pending = true;
    }
}

/// Convert RGB24 to YUV420 planar (BT.601, studio swing)
pub fn rgb_to_yuv420(rgb: &[u8], width: u32, height: u32) -> Vec<u8> {
    let w = width as usize;
    let h = height as usize;

    let y_size = w * h;
    let uv_size = (w / 2) * (h / 2);
    let mut yuv = vec![0u8; y_size + uv_size * 2];

    let (y_plane, uv_planes) = yuv.split_at_mut(y_size);
    let (u_plane, v_plane) = uv_planes.split_at_mut(uv_size);

    for y in 0..h {
        for x in 0..w {
            let rgb_idx = (y * w + x) * 3;
            let r = rgb[rgb_idx] as i32;
            let g = rgb[rgb_idx + 1] as i32;
            let b = rgb[rgb_idx + 2] as i32;

            let y_val = ((66 * r + 129 * g + 25 * b + 128) >> 8) + 16;
            y_plane[y * w + x] = y_val.clamp(0, 255) as u8;

            // Chroma from the top-left pixel of each 2x2 block
            if y % 2 == 0 && x % 2 == 0 {
                let uv_idx = (y / 2) * (w / 2) + (x / 2);
                let u_val = ((-38 * r - 74 * g + 112 * b + 128) >> 8) + 128;
                let v_val = ((112 * r - 94 * g - 18 * b + 128) >> 8) + 128;
                u_plane[uv_idx] = u_val.clamp(0, 255) as u8;
                v_plane[uv_idx] = v_val.clamp(0, 255) as u8;
            }
        }
    }

    yuv
}

/// Convert a single-channel frame to YUV420 with neutral chroma
pub fn gray_to_yuv420(gray: &[u8], width: u32, height: u32) -> Vec<u8> {
    let w = width as usize;
    let h = height as usize;
    let uv_size = (w / 2) * (h / 2);

    let mut yuv = Vec::with_capacity(w * h + uv_size * 2);
    // Same luma range as rgb_to_yuv420
    yuv.extend(gray.iter().map(|&v| (16 + (219 * v as u32 + 127) / 255) as u8));
    yuv.resize(w * h + uv_size * 2, 128);
    yuv
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rgb_to_yuv420_size() {
        let rgb = vec![128u8; 640 * 480 * 3];
        let yuv = rgb_to_yuv420(&rgb, 640, 480);
        assert_eq!(yuv.len(), 640 * 480 * 3 / 2);
    }

    #[test]
    fn test_gray_and_rgb_luma_agree() {
        let gray = vec![0u8, 255, 0, 255];
        let rgb: Vec<u8> = gray.iter().flat_map(|&v| [v, v, v]).collect();

        let from_gray = gray_to_yuv420(&gray, 2, 2);
        let from_rgb = rgb_to_yuv420(&rgb, 2, 2);

        assert_eq!(&from_gray[..4], &[16, 235, 16, 235]);
        assert_eq!(&from_gray[..4], &from_rgb[..4]);
        assert_eq!(&from_gray[4..], &[128, 128]);
    }

    #[test]
    fn test_odd_dimensions_rejected() {
        assert!(H264Encoder::new(641, 480, 30).is_err());
        assert!(H264Encoder::new(0, 480, 30).is_err());
    }

    #[test]
    fn test_encode_gray_frame() {
        let mut encoder = H264Encoder::new(320, 240, 30).expect("Encoder creation failed");
        let frame = VideoFrame::new(320, 240, vec![0u8; 320 * 240], PixelFormat::Gray8);

        let encoded = encoder.encode(&frame).expect("Encoding should succeed");
        assert!(!encoded.data.is_empty());
        assert!(
            encoded.data.starts_with(&[0x00, 0x00, 0x00, 0x01])
                || encoded.data.starts_with(&[0x00, 0x00, 0x01]),
            "Should start with Annex B start code"
        );
        assert!(encoded.is_keyframe, "First frame should be a keyframe");
        assert_eq!(encoder.frame_count, 1);
    }

    #[test]
    fn test_encode_rejects_mismatched_frame() {
        let mut encoder = H264Encoder::new(320, 240, 30).unwrap();
        let frame = VideoFrame::black(160, 120);
        assert!(encoder.encode(&frame).is_err());
    }

    fn keyframe_indices(encoder: &mut H264Encoder, frames: u64, force_at: &[u64]) -> Vec<u64> {
        let mut keyframes = Vec::new();
        for n in 0..frames {
            if force_at.contains(&n) {
                encoder.force_keyframe();
            }
            let frame = crate::capture::test_pattern_frame(n, 64, 48);
            if encoder.encode(&frame).unwrap().is_keyframe {
                keyframes.push(n);
            }
        }
        keyframes
    }

    #[test]
    fn test_keyframes_recur() {
        let mut encoder = H264Encoder::new(64, 48, 10).unwrap();
        let keyframes = keyframe_indices(&mut encoder, 60, &[]);

        assert_eq!(keyframes.first(), Some(&0));
        assert!(keyframes.len() >= 5, "keyframes at {:?}", keyframes);
        // No stretch longer than the interval without one
        for pair in keyframes.windows(2) {
            assert!(pair[1] - pair[0] <= 15, "keyframes at {:?}", keyframes);
        }
        assert!(*keyframes.last().unwrap() >= 50, "keyframes at {:?}", keyframes);
    }

    #[test]
    fn test_forced_keyframe() {
        let mut encoder = H264Encoder::new(64, 48, 0).unwrap();
        let keyframes = keyframe_indices(&mut encoder, 40, &[25]);

        assert_eq!(keyframes.first(), Some(&0));
        assert!(keyframes.iter().any(|&n| n >= 25), "keyframes at {:?}", keyframes);
    }
}
