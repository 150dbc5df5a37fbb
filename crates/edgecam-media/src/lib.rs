//! Media processing for Edgecam
//!
//! This crate provides the per-frame side of the server:
//! - Frame sources (webcam through nokhwa, synthetic test pattern)
//! - The edge filter (grayscale, Gaussian blur, Canny)
//! - H.264 encoding for the outgoing WebRTC track

pub mod capture;
pub mod codec;
pub mod filter;
pub mod frame;

pub use frame::{PixelFormat, VideoFrame};
