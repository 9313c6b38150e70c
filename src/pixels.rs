//! Decoded RGB pixel buffers and representative-color extraction.
//!
//! Decoding (PNG, JPEG, BMP, GIF, WebP) goes through the `image` crate; the
//! rest of the crate only ever sees a [`PixelBuffer`].

use base64::{Engine as _, engine::general_purpose::STANDARD};
use image::RgbImage;

use crate::error::SensorError;
use crate::model::{Color, Rect};

/// An already-decoded image: `width` × `height` RGB pixels, row-major.
#[derive(Debug, Clone, PartialEq)]
pub struct PixelBuffer {
    width: u32,
    height: u32,
    pixels: Vec<[u8; 3]>,
}

impl PixelBuffer {
    /// Wrap raw row-major pixels.
    pub fn new(width: u32, height: u32, pixels: Vec<[u8; 3]>) -> Result<Self, SensorError> {
        if width == 0 || height == 0 {
            return Err(SensorError::InvalidImage(format!(
                "zero-sized image ({width}x{height})"
            )));
        }
        let expected = u64::from(width) * u64::from(height);
        if pixels.len() as u64 != expected {
            return Err(SensorError::InvalidImage(format!(
                "expected {expected} pixels for {width}x{height}, got {}",
                pixels.len()
            )));
        }
        Ok(Self {
            width,
            height,
            pixels,
        })
    }

    /// A buffer where every pixel has the same color.
    pub fn filled(width: u32, height: u32, color: Color) -> Result<Self, SensorError> {
        let count = (u64::from(width) * u64::from(height)) as usize;
        let px: [u8; 3] = color.into();
        Self::new(width, height, vec![px; count])
    }

    /// Decode an encoded image file.
    pub fn decode(bytes: &[u8]) -> Result<Self, SensorError> {
        if bytes.is_empty() {
            return Err(SensorError::InvalidImage("empty image payload".to_string()));
        }
        let image = image::load_from_memory(bytes)
            .map_err(|e| SensorError::InvalidImage(e.to_string()))?;
        Self::from_rgb_image(&image.to_rgb8())
    }

    /// Decode a base64 payload, with or without a `data:...;base64,` prefix.
    pub fn from_base64(data: &str) -> Result<Self, SensorError> {
        let payload = match data.split_once(',') {
            Some((_, rest)) => rest,
            None => data,
        };
        let bytes = STANDARD
            .decode(payload.trim())
            .map_err(|e| SensorError::InvalidImage(format!("bad base64 payload: {e}")))?;
        Self::decode(&bytes)
    }

    pub fn from_rgb_image(image: &RgbImage) -> Result<Self, SensorError> {
        let pixels = image.pixels().map(|p| p.0).collect();
        Self::new(image.width(), image.height(), pixels)
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn pixel(&self, x: u32, y: u32) -> Option<Color> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let idx = y as usize * self.width as usize + x as usize;
        Some(Color::from(self.pixels[idx]))
    }

    /// Channel sums over a rectangle that has already been bounds-checked.
    pub(crate) fn channel_sums(&self, rect: Rect) -> ChannelSums {
        let mut sums = ChannelSums::default();
        let row_len = self.width as usize;
        for y in rect.y0..rect.y1 {
            let start = y as usize * row_len;
            let row = &self.pixels[start + rect.x0 as usize..start + rect.x1 as usize];
            for px in row {
                sums.add(px);
            }
        }
        sums
    }

    /// Representative color of a region: the per-channel mean, rounded.
    ///
    /// Fails with [`SensorError::InvalidImage`] if the region is degenerate
    /// or outside the image.
    pub fn mean_color(&self, rect: Rect) -> Result<Color, SensorError> {
        rect.check_bounds(self.width, self.height)
            .map_err(SensorError::InvalidImage)?;
        self.channel_sums(rect)
            .mean()
            .ok_or_else(|| SensorError::InvalidImage("empty sampling region".to_string()))
    }

    /// The region sampled when the caller gives none.
    pub fn default_region(&self) -> Rect {
        Rect::central(self.width, self.height)
    }

    /// Resolve an optional caller region against the default-region policy.
    pub fn region_or_default(&self, region: Option<Rect>) -> Rect {
        region.unwrap_or_else(|| self.default_region())
    }
}

/// Running per-channel totals over a set of pixels.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct ChannelSums {
    r: u64,
    g: u64,
    b: u64,
    count: u64,
}

impl ChannelSums {
    fn add(&mut self, px: &[u8; 3]) {
        self.r += u64::from(px[0]);
        self.g += u64::from(px[1]);
        self.b += u64::from(px[2]);
        self.count += 1;
    }

    pub(crate) fn merge(&mut self, other: ChannelSums) {
        self.r += other.r;
        self.g += other.g;
        self.b += other.b;
        self.count += other.count;
    }

    /// Mean per channel, rounded half up. `None` for an empty set.
    pub(crate) fn mean(&self) -> Option<Color> {
        if self.count == 0 {
            return None;
        }
        let avg = |sum: u64| ((2 * sum + self.count) / (2 * self.count)).min(255) as u8;
        Some(Color::new(avg(self.r), avg(self.g), avg(self.b)))
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use image::{DynamicImage, ImageFormat, Rgb};

    use super::*;

    fn png_bytes(image: RgbImage) -> Vec<u8> {
        let mut bytes = Vec::new();
        DynamicImage::ImageRgb8(image)
            .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .unwrap();
        bytes
    }

    #[test]
    fn test_rejects_zero_sized() {
        assert!(matches!(
            PixelBuffer::new(0, 4, vec![]),
            Err(SensorError::InvalidImage(_))
        ));
    }

    #[test]
    fn test_rejects_wrong_pixel_count() {
        assert!(PixelBuffer::new(2, 2, vec![[0, 0, 0]; 3]).is_err());
    }

    #[test]
    fn test_mean_of_uniform_region() {
        let buf = PixelBuffer::filled(8, 6, Color::new(0, 180, 0)).unwrap();
        assert_eq!(
            buf.mean_color(Rect::full(8, 6)).unwrap(),
            Color::new(0, 180, 0)
        );
    }

    #[test]
    fn test_mean_rounds_to_nearest() {
        // Two pixels: 10 and 11 → 10.5 → 11; 0 and 1 → 0.5 → 1; 0 and 0 → 0.
        let buf = PixelBuffer::new(2, 1, vec![[10, 0, 0], [11, 1, 0]]).unwrap();
        assert_eq!(
            buf.mean_color(Rect::full(2, 1)).unwrap(),
            Color::new(11, 1, 0)
        );

        // 1, 1, 2 → 1.33 → 1
        let buf = PixelBuffer::new(3, 1, vec![[1, 0, 0], [1, 0, 0], [2, 0, 0]]).unwrap();
        assert_eq!(buf.mean_color(Rect::full(3, 1)).unwrap().r, 1);
    }

    #[test]
    fn test_mean_only_covers_region() {
        // Left half black, right half white.
        let mut pixels = Vec::new();
        for _y in 0..4 {
            pixels.extend([[0, 0, 0], [0, 0, 0], [255, 255, 255], [255, 255, 255]]);
        }
        let buf = PixelBuffer::new(4, 4, pixels).unwrap();

        assert_eq!(
            buf.mean_color(Rect::new(0, 0, 2, 4)).unwrap(),
            Color::new(0, 0, 0)
        );
        assert_eq!(
            buf.mean_color(Rect::new(2, 0, 4, 4)).unwrap(),
            Color::new(255, 255, 255)
        );
        assert_eq!(
            buf.mean_color(Rect::new(1, 0, 3, 1)).unwrap(),
            Color::new(128, 128, 128)
        );
    }

    #[test]
    fn test_mean_rejects_out_of_bounds() {
        let buf = PixelBuffer::filled(4, 4, Color::new(1, 2, 3)).unwrap();
        assert!(buf.mean_color(Rect::new(0, 0, 5, 4)).is_err());
        assert!(buf.mean_color(Rect::new(2, 2, 2, 4)).is_err());
    }

    #[test]
    fn test_decode_png() {
        let image = RgbImage::from_pixel(5, 3, Rgb([150, 150, 0]));
        let buf = PixelBuffer::decode(&png_bytes(image)).unwrap();
        assert_eq!(buf.width(), 5);
        assert_eq!(buf.height(), 3);
        assert_eq!(buf.pixel(4, 2), Some(Color::new(150, 150, 0)));
        assert_eq!(buf.pixel(5, 0), None);
    }

    #[test]
    fn test_decode_base64_data_url() {
        let image = RgbImage::from_pixel(2, 2, Rgb([200, 0, 0]));
        let encoded = STANDARD.encode(png_bytes(image));

        let bare = PixelBuffer::from_base64(&encoded).unwrap();
        let url = PixelBuffer::from_base64(&format!("data:image/png;base64,{encoded}")).unwrap();
        assert_eq!(bare, url);
    }

    #[test]
    fn test_decode_garbage() {
        assert!(PixelBuffer::decode(b"not an image").is_err());
        assert!(PixelBuffer::decode(&[]).is_err());
        assert!(PixelBuffer::from_base64("!!!").is_err());
    }

    #[test]
    fn test_default_region_is_central() {
        let buf = PixelBuffer::filled(100, 40, Color::new(0, 0, 0)).unwrap();
        assert_eq!(buf.region_or_default(None), Rect::new(25, 10, 75, 30));
        let explicit = Rect::new(0, 0, 1, 1);
        assert_eq!(buf.region_or_default(Some(explicit)), explicit);
    }
}
