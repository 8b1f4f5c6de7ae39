use image::{codecs::jpeg::JpegEncoder, imageops::FilterType, RgbImage};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FrameError {
    #[error("Frame buffer holds {actual} bytes, expected {expected} for {height}x{width}x{channels}")]
    InvalidDimensions {
        height: u32,
        width: u32,
        channels: u8,
        expected: usize,
        actual: usize,
    },
    #[error("Unsupported channel count: {0}")]
    UnsupportedChannels(u8),
    #[error("Failed to encode frame: {0}")]
    EncodeFrameFailed(#[from] image::ImageError),
}

/// A raster image as the camera delivers it: `height x width x channels`,
/// 8 bits per channel, rows packed without padding. Colour frames are BGR
/// (or BGRA), single channel frames are grey.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    height: u32,
    width: u32,
    channels: u8,
    data: Vec<u8>,
}

impl Frame {
    pub fn new(height: u32, width: u32, channels: u8, data: Vec<u8>) -> Result<Self, FrameError> {
        if !matches!(channels, 1 | 3 | 4) {
            return Err(FrameError::UnsupportedChannels(channels));
        }
        let expected = height as usize * width as usize * channels as usize;
        if data.len() != expected {
            return Err(FrameError::InvalidDimensions {
                height,
                width,
                channels,
                expected,
                actual: data.len(),
            });
        }
        Ok(Self {
            height,
            width,
            channels,
            data,
        })
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn channels(&self) -> u8 {
        self.channels
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn to_rgb_image(&self) -> Result<RgbImage, FrameError> {
        let pixels: Vec<u8> = match self.channels {
            1 => self.data.iter().flat_map(|&v| [v, v, v]).collect(),
            n => self
                .data
                .chunks_exact(n as usize)
                .flat_map(|px| [px[2], px[1], px[0]])
                .collect(),
        };

        RgbImage::from_raw(self.width, self.height, pixels).ok_or(FrameError::InvalidDimensions {
            height: self.height,
            width: self.width,
            channels: self.channels,
            expected: self.height as usize * self.width as usize * self.channels as usize,
            actual: self.data.len(),
        })
    }

    /// Stretches the frame to exactly `width x height`, ignoring aspect ratio.
    pub fn resize_exact(&self, width: u32, height: u32) -> Result<RgbImage, FrameError> {
        let rgb = self.to_rgb_image()?;
        Ok(image::imageops::resize(
            &rgb,
            width,
            height,
            FilterType::Triangle,
        ))
    }
}

pub fn encode_jpeg(image: &RgbImage, quality: u8) -> Result<Vec<u8>, FrameError> {
    let mut buf = Vec::new();
    JpegEncoder::new_with_quality(&mut buf, quality).encode_image(image)?;
    Ok(buf)
}
