//! Fast SIMD-accelerated grayscale downsampling.
//!
//! Uses fast_image_resize, which is 5-14x faster than the image crate's
//! resize and automatically picks AVX2/NEON when available.

use crate::error::FingerprintError;
use fast_image_resize::{images::Image, PixelType, ResizeOptions, Resizer};
use image::{DynamicImage, GrayImage, ImageBuffer, Luma};

/// Resize an image to the given dimensions and convert to grayscale.
///
/// Grayscale conversion happens before the resize; resizing a single
/// channel is cheaper than resizing RGB and converting afterwards.
pub fn downsample_to_gray(
    image: &DynamicImage,
    width: u32,
    height: u32,
) -> Result<GrayImage, FingerprintError> {
    let gray = image.to_luma8();

    let src_width = gray.width();
    let src_height = gray.height();

    if src_width == 0 || src_height == 0 {
        return Err(FingerprintError::EmptyImage);
    }

    if width == 0 || height == 0 {
        return Err(FingerprintError::ResizeFailed(
            "destination dimensions must be non-zero".to_string(),
        ));
    }

    let src_image = Image::from_vec_u8(src_width, src_height, gray.into_raw(), PixelType::U8)
        .map_err(|e| FingerprintError::ResizeFailed(format!("source buffer: {e}")))?;

    let mut dst_image = Image::new(width, height, PixelType::U8);

    // Bilinear is a good speed/quality balance for signature grids.
    let options = ResizeOptions::new().resize_alg(fast_image_resize::ResizeAlg::Convolution(
        fast_image_resize::FilterType::Bilinear,
    ));

    let mut resizer = Resizer::new();
    resizer
        .resize(&src_image, &mut dst_image, &options)
        .map_err(|e| FingerprintError::ResizeFailed(e.to_string()))?;

    let result: ImageBuffer<Luma<u8>, Vec<u8>> =
        ImageBuffer::from_raw(width, height, dst_image.into_vec()).ok_or_else(|| {
            FingerprintError::ResizeFailed("result buffer size mismatch".to_string())
        })?;

    Ok(result)
}
