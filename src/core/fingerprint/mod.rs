//! # Fingerprint Module
//!
//! Derives a fixed-length binary signature from an image region.
//!
//! The signature is an average hash: the selected region is converted to
//! grayscale, downsampled to an N x N grid, and each grid sample becomes one
//! bit - `1` if the sample is brighter than the grid mean, `0` otherwise.
//! Identical bytes and region always produce the identical signature.

mod resize;
mod signature;

pub use signature::Signature;

use crate::error::FingerprintError;
use serde::{Deserialize, Serialize};

/// A bounding region expressed as percentages of the source image's
/// dimensions. Values nominally fall in `[0, 100]` but out-of-range input is
/// tolerated and clamped during pixel conversion.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Region {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

/// A region resolved against concrete pixel dimensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct PixelCrop {
    pub left: u32,
    pub top: u32,
    pub width: u32,
    pub height: u32,
}

impl Region {
    /// Convert percentages to a pixel crop, clamped fully inside the image.
    ///
    /// A region that rounds to a zero-size crop is coerced to a minimum 1x1
    /// crop rather than failing; callers asking for a sliver of an image get
    /// a sliver, not an error.
    pub(crate) fn to_pixel_crop(&self, image_width: u32, image_height: u32) -> PixelCrop {
        let left = round_pct(self.x, image_width).clamp(0, image_width as i64 - 1) as u32;
        let top = round_pct(self.y, image_height).clamp(0, image_height as i64 - 1) as u32;
        let width =
            round_pct(self.width, image_width).clamp(1, (image_width - left) as i64) as u32;
        let height =
            round_pct(self.height, image_height).clamp(1, (image_height - top) as i64) as u32;

        PixelCrop {
            left,
            top,
            width,
            height,
        }
    }
}

fn round_pct(percentage: f64, dimension: u32) -> i64 {
    (percentage / 100.0 * dimension as f64).round() as i64
}

/// Configuration for signature computation
#[derive(Debug, Clone, Copy)]
pub struct FingerprintConfig {
    /// Side length of the sample grid. Signatures have `grid_size^2` bits;
    /// signatures computed with different grid sizes are not comparable.
    pub grid_size: u32,
}

impl Default for FingerprintConfig {
    fn default() -> Self {
        Self { grid_size: 8 }
    }
}

/// Computes perceptual signatures from image bytes.
pub struct Fingerprinter {
    config: FingerprintConfig,
}

impl Fingerprinter {
    /// Create a fingerprinter with the given configuration
    pub fn new(config: FingerprintConfig) -> Self {
        Self { config }
    }

    /// Number of bits in every signature this fingerprinter produces
    pub fn signature_bits(&self) -> u32 {
        self.config.grid_size * self.config.grid_size
    }

    /// Compute the signature of `bytes`, optionally restricted to `region`.
    ///
    /// Fails with [`FingerprintError::Decode`] when the bytes are not a
    /// decodable image and with [`FingerprintError::EmptyImage`] when the
    /// decoded image has a zero dimension.
    pub fn fingerprint(
        &self,
        bytes: &[u8],
        region: Option<&Region>,
    ) -> Result<Signature, FingerprintError> {
        let image = image::load_from_memory(bytes).map_err(|e| FingerprintError::Decode {
            reason: e.to_string(),
        })?;

        let (width, height) = (image.width(), image.height());
        if width == 0 || height == 0 {
            return Err(FingerprintError::EmptyImage);
        }

        let selected = match region {
            Some(region) => {
                let crop = region.to_pixel_crop(width, height);
                image.crop_imm(crop.left, crop.top, crop.width, crop.height)
            }
            None => image,
        };

        let n = self.config.grid_size;
        let gray = resize::downsample_to_gray(&selected, n, n)?;

        // Threshold against the exact mean: p > total/count <=> p*count > total
        let total: u64 = gray.pixels().map(|p| p[0] as u64).sum();
        let count = (n * n) as u64;

        Ok(Signature::from_bits(
            gray.pixels().map(|p| p[0] as u64 * count > total),
        ))
    }
}

impl Default for Fingerprinter {
    fn default() -> Self {
        Self::new(FingerprintConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, ImageBuffer, Rgb};
    use std::io::Cursor;

    fn encode_png(image: &DynamicImage) -> Vec<u8> {
        let mut bytes = Vec::new();
        image
            .write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png)
            .unwrap();
        bytes
    }

    fn gradient_png(width: u32, height: u32) -> Vec<u8> {
        let img = ImageBuffer::from_fn(width, height, |x, y| {
            let r = (x * 255 / width.max(1)) as u8;
            let g = (y * 255 / height.max(1)) as u8;
            Rgb([r, g, 128])
        });
        encode_png(&DynamicImage::ImageRgb8(img))
    }

    fn solid_png(width: u32, height: u32, value: u8) -> Vec<u8> {
        let img = ImageBuffer::from_fn(width, height, |_, _| Rgb([value, value, value]));
        encode_png(&DynamicImage::ImageRgb8(img))
    }

    #[test]
    fn signature_length_matches_grid() {
        let bytes = gradient_png(100, 100);

        for grid_size in [4, 8, 16] {
            let fingerprinter = Fingerprinter::new(FingerprintConfig { grid_size });
            let sig = fingerprinter.fingerprint(&bytes, None).unwrap();
            assert_eq!(sig.bit_len(), grid_size * grid_size);
        }
    }

    #[test]
    fn identical_input_produces_identical_signature() {
        let bytes = gradient_png(120, 90);
        let fingerprinter = Fingerprinter::default();

        let first = fingerprinter.fingerprint(&bytes, None).unwrap();
        let second = fingerprinter.fingerprint(&bytes, None).unwrap();

        assert_eq!(first, second);
        assert_eq!(first.distance(&second).unwrap(), 0);
    }

    #[test]
    fn solid_image_produces_all_zero_signature() {
        // Every sample equals the mean, and equality is not "brighter than".
        let bytes = solid_png(50, 50, 128);
        let fingerprinter = Fingerprinter::default();

        let sig = fingerprinter.fingerprint(&bytes, None).unwrap();
        assert_eq!(sig.to_bit_string(), "0".repeat(64));
    }

    #[test]
    fn undecodable_bytes_fail_with_decode_error() {
        let fingerprinter = Fingerprinter::default();
        let err = fingerprinter
            .fingerprint(b"definitely not an image", None)
            .unwrap_err();
        assert!(matches!(err, FingerprintError::Decode { .. }));
    }

    #[test]
    fn out_of_range_region_clamps_inside_image() {
        let region = Region {
            x: -10.0,
            y: 120.0,
            width: 150.0,
            height: 50.0,
        };

        let crop = region.to_pixel_crop(100, 100);

        assert_eq!(crop.left, 0);
        assert_eq!(crop.top, 99);
        assert!(crop.width >= 1 && crop.left + crop.width <= 100);
        assert!(crop.height >= 1 && crop.top + crop.height <= 100);
    }

    #[test]
    fn zero_size_region_coerces_to_one_pixel() {
        let region = Region {
            x: 50.0,
            y: 50.0,
            width: 0.0,
            height: 0.0,
        };

        let crop = region.to_pixel_crop(100, 100);

        assert_eq!(crop.width, 1);
        assert_eq!(crop.height, 1);
    }

    #[test]
    fn region_selects_differing_content() {
        // Left half dark, right half bright: opposite halves should not
        // produce the same signature.
        let img = ImageBuffer::from_fn(100, 100, |x, _| {
            if x < 50 {
                Rgb([10u8, 10, 10])
            } else {
                Rgb([240u8, 240, 240])
            }
        });
        let bytes = encode_png(&DynamicImage::ImageRgb8(img));
        let fingerprinter = Fingerprinter::default();

        let whole = fingerprinter.fingerprint(&bytes, None).unwrap();
        let left = fingerprinter
            .fingerprint(
                &bytes,
                Some(&Region {
                    x: 0.0,
                    y: 0.0,
                    width: 50.0,
                    height: 100.0,
                }),
            )
            .unwrap();

        assert_ne!(whole, left);
    }
}
