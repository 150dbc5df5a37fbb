//! Edge filter
//!
//! Grayscale conversion, 5x5 Gaussian smoothing and a two-threshold Canny
//! detector over packed 8-bit buffers. Gradients use 3x3 Sobel kernels with
//! L1 magnitude, so thresholds are on the same scale as OpenCV's `Canny`
//! with its default aperture.

use crate::frame::{PixelFormat, VideoFrame};
use edgecam_protocol::{FilterMode, FilterSettings};
use std::collections::VecDeque;
use thiserror::Error;

/// Value written for edge pixels
pub const EDGE: u8 = 255;

/// 5x5 Gaussian kernel, applied separably (1 4 6 4 1) / 16
const GAUSSIAN_5: [f32; 5] = [1.0 / 16.0, 4.0 / 16.0, 6.0 / 16.0, 4.0 / 16.0, 1.0 / 16.0];

// tan(22.5deg) and tan(67.5deg), for quantizing the gradient direction
const TAN_22_5: f32 = 0.414_213_57;
const TAN_67_5: f32 = 2.414_213_6;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FilterError {
    #[error("frame buffer holds {actual} bytes, expected {expected} for {width}x{height}")]
    BufferSize {
        width: u32,
        height: u32,
        expected: usize,
        actual: usize,
    },

    #[error("edge filter needs an RGB frame, got {0:?}")]
    UnsupportedFormat(PixelFormat),
}

/// Run a frame through the processing selected by `mode`
pub fn apply(
    mode: FilterMode,
    frame: &VideoFrame,
    settings: &FilterSettings,
) -> Result<VideoFrame, FilterError> {
    match mode {
        FilterMode::Passthrough => Ok(frame.clone()),
        FilterMode::Edges => {
            let mask = edge_mask(frame, settings, true)?;
            Ok(VideoFrame::new(
                frame.width,
                frame.height,
                expand_to_rgb(&mask),
                PixelFormat::Rgb24,
            ))
        }
        FilterMode::Canny => {
            let mask = edge_mask(frame, settings, false)?;
            Ok(VideoFrame::new(frame.width, frame.height, mask, PixelFormat::Gray8))
        }
    }
}

/// Single-channel edge mask of an RGB frame, optionally smoothed first
pub fn edge_mask(
    frame: &VideoFrame,
    settings: &FilterSettings,
    blur: bool,
) -> Result<Vec<u8>, FilterError> {
    if frame.format != PixelFormat::Rgb24 {
        return Err(FilterError::UnsupportedFormat(frame.format));
    }
    if !frame.is_well_formed() {
        return Err(FilterError::BufferSize {
            width: frame.width,
            height: frame.height,
            expected: frame.expected_len(),
            actual: frame.data.len(),
        });
    }

    let width = frame.width as usize;
    let height = frame.height as usize;
    let gray = grayscale(&frame.data);

    let plane = if blur {
        gaussian_blur_5x5(&gray, width, height)
    } else {
        gray.iter().map(|&v| v as f32).collect()
    };

    Ok(canny(
        &plane,
        width,
        height,
        settings.threshold1 as f32,
        settings.threshold2 as f32,
    ))
}

/// BT.601 luma of packed RGB, fixed point with rounding
pub fn grayscale(rgb: &[u8]) -> Vec<u8> {
    rgb.chunks_exact(3)
        .map(|px| {
            let y = 4899 * px[0] as u32 + 9617 * px[1] as u32 + 1868 * px[2] as u32 + (1 << 13);
            (y >> 14) as u8
        })
        .collect()
}

/// Duplicate a single-channel mask into three identical channels
pub fn expand_to_rgb(mask: &[u8]) -> Vec<u8> {
    let mut rgb = Vec::with_capacity(mask.len() * 3);
    for &v in mask {
        rgb.extend_from_slice(&[v, v, v]);
    }
    rgb
}

/// Mirror an out-of-range index back into `0..n`, excluding the edge sample (`dcb|abcd|cba`)
fn reflect101(mut i: isize, n: usize) -> usize {
    if n == 1 {
        return 0;
    }
    let n = n as isize;
    loop {
        if i < 0 {
            i = -i;
        } else if i >= n {
            i = 2 * n - 2 - i;
        } else {
            return i as usize;
        }
    }
}

/// Separable 5x5 Gaussian smoothing. Output stays in f32 so faint detail is not rounded away.
pub fn gaussian_blur_5x5(gray: &[u8], width: usize, height: usize) -> Vec<f32> {
    let mut horizontal = vec![0.0f32; width * height];
    for y in 0..height {
        let row = &gray[y * width..(y + 1) * width];
        for x in 0..width {
            let mut acc = 0.0;
            for (k, weight) in GAUSSIAN_5.iter().enumerate() {
                let sx = reflect101(x as isize + k as isize - 2, width);
                acc += weight * row[sx] as f32;
            }
            horizontal[y * width + x] = acc;
        }
    }

    let mut out = vec![0.0f32; width * height];
    for y in 0..height {
        for x in 0..width {
            let mut acc = 0.0;
            for (k, weight) in GAUSSIAN_5.iter().enumerate() {
                let sy = reflect101(y as isize + k as isize - 2, height);
                acc += weight * horizontal[sy * width + x];
            }
            out[y * width + x] = acc;
        }
    }
    out
}

/// Canny edge detection over a single-channel plane.
///
/// `low` and `high` are swapped when given in the wrong order. Returns a mask
/// of `EDGE` and 0 with the plane's dimensions.
pub fn canny(plane: &[f32], width: usize, height: usize, low: f32, high: f32) -> Vec<u8> {
    let (low, high) = if low > high { (high, low) } else { (low, high) };
    let len = width * height;
    if len == 0 {
        return Vec::new();
    }

    // Sobel gradients
    let mut gx = vec![0.0f32; len];
    let mut gy = vec![0.0f32; len];
    let mut magnitude = vec![0.0f32; len];
    for y in 0..height {
        let up = reflect101(y as isize - 1, height) * width;
        let mid = y * width;
        let down = reflect101(y as isize + 1, height) * width;
        for x in 0..width {
            let left = reflect101(x as isize - 1, width);
            let right = reflect101(x as isize + 1, width);

            let dx = (plane[up + right] + 2.0 * plane[mid + right] + plane[down + right])
                - (plane[up + left] + 2.0 * plane[mid + left] + plane[down + left]);
            let dy = (plane[down + left] + 2.0 * plane[down + x] + plane[down + right])
                - (plane[up + left] + 2.0 * plane[up + x] + plane[up + right]);

            let i = mid + x;
            gx[i] = dx;
            gy[i] = dy;
            magnitude[i] = dx.abs() + dy.abs();
        }
    }

    let mag_at = |x: isize, y: isize| -> f32 {
        if x < 0 || y < 0 || x >= width as isize || y >= height as isize {
            0.0
        } else {
            magnitude[y as usize * width + x as usize]
        }
    };

    // Non-maximum suppression, then classify
    const NONE: u8 = 0;
    const WEAK: u8 = 1;
    const STRONG: u8 = 2;
    let mut class = vec![NONE; len];
    let mut queue = VecDeque::new();

    for y in 0..height {
        for x in 0..width {
            let i = y * width + x;
            let m = magnitude[i];
            if m <= low || m <= 0.0 {
                continue;
            }

            let ax = gx[i].abs();
            let ay = gy[i].abs();
            let (xi, yi) = (x as isize, y as isize);
            let (n1, n2) = if ay <= ax * TAN_22_5 {
                (mag_at(xi - 1, yi), mag_at(xi + 1, yi))
            } else if ay > ax * TAN_67_5 {
                (mag_at(xi, yi - 1), mag_at(xi, yi + 1))
            } else if gx[i] * gy[i] > 0.0 {
                (mag_at(xi - 1, yi - 1), mag_at(xi + 1, yi + 1))
            } else {
                (mag_at(xi + 1, yi - 1), mag_at(xi - 1, yi + 1))
            };

            if m < n1 || m < n2 {
                continue;
            }

            if m > high {
                class[i] = STRONG;
                queue.push_back(i);
            } else {
                class[i] = WEAK;
            }
        }
    }

    // Hysteresis: grow strong edges through 8-connected weak pixels
    let mut mask = vec![0u8; len];
    for &i in &queue {
        mask[i] = EDGE;
    }
    while let Some(i) = queue.pop_front() {
        let x = (i % width) as isize;
        let y = (i / width) as isize;
        for dy in -1..=1isize {
            for dx in -1..=1isize {
                let (nx, ny) = (x + dx, y + dy);
                if nx < 0 || ny < 0 || nx >= width as isize || ny >= height as isize {
                    continue;
                }
                let n = ny as usize * width + nx as usize;
                if class[n] == WEAK && mask[n] == 0 {
                    mask[n] = EDGE;
                    queue.push_back(n);
                }
            }
        }
    }

    mask
}
