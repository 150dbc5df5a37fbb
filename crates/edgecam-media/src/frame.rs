/// Layout of a frame's pixel buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// Three interleaved 8-bit channels, R G B
    Rgb24,
    /// One 8-bit channel
    Gray8,
}

impl PixelFormat {
    pub fn channels(&self) -> usize {
        match self {
            PixelFormat::Rgb24 => 3,
            PixelFormat::Gray8 => 1,
        }
    }
}

/// A single video frame with a tightly packed buffer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoFrame {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
    pub format: PixelFormat,
}

impl VideoFrame {
    pub fn new(width: u32, height: u32, data: Vec<u8>, format: PixelFormat) -> Self {
        Self {
            width,
            height,
            data,
            format,
        }
    }

    /// All-black RGB frame
    pub fn black(width: u32, height: u32) -> Self {
        Self::new(
            width,
            height,
            vec![0; width as usize * height as usize * 3],
            PixelFormat::Rgb24,
        )
    }

    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    /// Buffer length implied by the dimensions and format
    pub fn expected_len(&self) -> usize {
        self.pixel_count() * self.format.channels()
    }

    pub fn is_well_formed(&self) -> bool {
        self.data.len() == self.expected_len()
    }
}
