use image::{GrayImage, Luma, RgbaImage};
use nalgebra::Point2;

use crate::{CoreError, Result};

/// Byte layout of a caller-supplied pixel buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    Gray8,
    Rgb8,
    Rgba8,
    Bgr8,
    Bgra8,
}

impl PixelFormat {
    pub fn channels(&self) -> u8 {
        match self {
            PixelFormat::Gray8 => 1,
            PixelFormat::Rgb8 | PixelFormat::Bgr8 => 3,
            PixelFormat::Rgba8 | PixelFormat::Bgra8 => 4,
        }
    }

    pub fn color_space(&self) -> ColorSpace {
        match self {
            PixelFormat::Gray8 => ColorSpace::Gray,
            PixelFormat::Rgb8 => ColorSpace::Rgb,
            PixelFormat::Rgba8 => ColorSpace::Rgba,
            PixelFormat::Bgr8 => ColorSpace::Bgr,
            PixelFormat::Bgra8 => ColorSpace::Bgra,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColorSpace {
    Gray,
    Rgb,
    Rgba,
    Bgr,
    Bgra,
}

/// A decoded frame as handed over by the caller.
#[derive(Debug, Clone)]
pub struct RawImage {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub data: Vec<u8>,
}

impl RawImage {
    pub fn new(width: u32, height: u32, format: PixelFormat, data: Vec<u8>) -> Self {
        Self {
            width,
            height,
            format,
            data,
        }
    }

    pub fn from_rgba(image: RgbaImage) -> Self {
        let (width, height) = image.dimensions();
        Self::new(width, height, PixelFormat::Rgba8, image.into_raw())
    }

    pub fn from_gray(image: GrayImage) -> Self {
        let (width, height) = image.dimensions();
        Self::new(width, height, PixelFormat::Gray8, image.into_raw())
    }

    /// Byte length implied by the header, `None` on arithmetic overflow.
    pub fn expected_len(&self) -> Option<usize> {
        (self.width as usize)
            .checked_mul(self.height as usize)?
            .checked_mul(self.format.channels() as usize)
    }

    pub fn validate(&self) -> Result<()> {
        if self.width == 0 || self.height == 0 {
            return Err(CoreError::InvalidDimensions {
                width: self.width,
                height: self.height,
            });
        }
        let expected = self.expected_len().ok_or(CoreError::BufferOverflow {
            width: self.width,
            height: self.height,
        })?;
        if expected != self.data.len() {
            return Err(CoreError::BufferLength {
                expected,
                actual: self.data.len(),
            });
        }
        Ok(())
    }

    /// Validates the buffer and converts it to RGBA8. RGBA8 input is moved without copying.
    pub fn into_rgba(self) -> Result<RgbaImage> {
        self.validate()?;
        let (width, height) = (self.width, self.height);
        let data = match self.format {
            PixelFormat::Rgba8 => self.data,
            PixelFormat::Gray8 => self.data.iter().flat_map(|&v| [v, v, v, 255]).collect(),
            PixelFormat::Rgb8 => self
                .data
                .chunks_exact(3)
                .flat_map(|p| [p[0], p[1], p[2], 255])
                .collect(),
            PixelFormat::Bgr8 => self
                .data
                .chunks_exact(3)
                .flat_map(|p| [p[2], p[1], p[0], 255])
                .collect(),
            PixelFormat::Bgra8 => self
                .data
                .chunks_exact(4)
                .flat_map(|p| [p[2], p[1], p[0], p[3]])
                .collect(),
        };
        RgbaImage::from_raw(width, height, data).ok_or(CoreError::BufferOverflow { width, height })
    }
}

/// An ingested image. Pixels are immutable once the store owns them.
#[derive(Debug, Clone)]
pub struct Image {
    index: usize,
    color_space: ColorSpace,
    channels: u8,
    pixels: RgbaImage,
}

impl Image {
    pub fn new(index: usize, raw: RawImage) -> Result<Self> {
        let color_space = raw.format.color_space();
        let channels = raw.format.channels();
        let pixels = raw.into_rgba()?;
        Ok(Self {
            index,
            color_space,
            channels,
            pixels,
        })
    }

    /// Position of this image in the caller's input list.
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    pub fn height(&self) -> u32 {
        self.pixels.height()
    }

    pub fn color_space(&self) -> ColorSpace {
        self.color_space
    }

    /// Channel count of the source buffer before conversion.
    pub fn source_channels(&self) -> u8 {
        self.channels
    }

    pub fn pixels(&self) -> &RgbaImage {
        &self.pixels
    }

    /// Integer Rec.601 luma. Gray sources convert back to their exact values.
    pub fn to_gray(&self) -> GrayImage {
        GrayImage::from_fn(self.width(), self.height(), |x, y| {
            let p = self.pixels.get_pixel(x, y).0;
            Luma([luma_u8(p[0], p[1], p[2])])
        })
    }

    /// Image corners in pixel coordinates, clockwise from the origin.
    pub fn corners(&self) -> [Point2<f64>; 4] {
        let w = self.width() as f64;
        let h = self.height() as f64;
        [
            Point2::new(0.0, 0.0),
            Point2::new(w, 0.0),
            Point2::new(w, h),
            Point2::new(0.0, h),
        ]
    }

    pub fn max_dimension(&self) -> u32 {
        self.width().max(self.height())
    }
}

#[inline]
pub fn luma_u8(r: u8, g: u8, b: u8) -> u8 {
    ((77 * r as u32 + 150 * g as u32 + 29 * b as u32) >> 8) as u8
}
