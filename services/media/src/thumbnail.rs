//! Square-pad thumbnail generation.
//!
//! Images are letterboxed onto a square black canvas (centered on the shorter
//! axis, never cropped) and then resampled to a fixed `N x N` PNG.

use crate::error::{MediaError, Result};
use image::imageops::{self, FilterType};
use image::{
    DynamicImage, GenericImageView, ImageBuffer, ImageFormat, ImageReader, Limits, Luma, LumaA,
    Pixel, Rgb, Rgba,
};
use std::io::Cursor;

/// Maximum image dimension (width or height) to prevent decompression bombs.
const MAX_IMAGE_DIMENSION: u32 = 16384;

/// Padding color for 8-bit RGBA. Every mode pads with opaque black.
const BACKGROUND: Rgba<u8> = Rgba([0, 0, 0, 255]);

pub const THUMBNAIL_CONTENT_TYPE: &str = "image/png";

/// Reader with format sniffing and dimension limits applied
fn reader(data: &[u8]) -> Result<ImageReader<Cursor<&[u8]>>> {
    let mut reader = ImageReader::new(Cursor::new(data))
        .with_guessed_format()
        .map_err(|e| MediaError::Decode(e.to_string()))?;

    let mut limits = Limits::default();
    limits.max_image_width = Some(MAX_IMAGE_DIMENSION);
    limits.max_image_height = Some(MAX_IMAGE_DIMENSION);
    reader.limits(limits);

    Ok(reader)
}

/// Decode an encoded image
pub fn decode(data: &[u8]) -> Result<DynamicImage> {
    reader(data)?
        .decode()
        .map_err(|e| MediaError::Decode(e.to_string()))
}

/// Width and height of an encoded image, read from its header only
pub fn read_dimensions(data: &[u8]) -> Result<(u32, u32)> {
    reader(data)?
        .into_dimensions()
        .map_err(|e| MediaError::Decode(e.to_string()))
}

/// Offset of the source image on a square canvas of side `max(w, h)`
pub fn square_offset(width: u32, height: u32) -> (u32, u32) {
    if width > height {
        (0, (width - height) / 2)
    } else {
        ((height - width) / 2, 0)
    }
}

/// Paste `source` at `(x, y)` on a `side x side` canvas of `background`
fn pad<P: Pixel>(
    source: &ImageBuffer<P, Vec<P::Subpixel>>,
    side: u32,
    (x, y): (u32, u32),
    background: P,
) -> ImageBuffer<P, Vec<P::Subpixel>> {
    let mut canvas = ImageBuffer::from_pixel(side, side, background);
    imageops::replace(&mut canvas, source, i64::from(x), i64::from(y));
    canvas
}

/// Pad an image to a square, keeping its color mode and bit depth.
///
/// Square images are returned untouched.
pub fn expand_to_square(image: DynamicImage) -> DynamicImage {
    let (width, height) = image.dimensions();
    if width == height {
        return image;
    }

    let side = width.max(height);
    let at = square_offset(width, height);

    match image {
        DynamicImage::ImageLuma8(buf) => DynamicImage::ImageLuma8(pad(&buf, side, at, Luma([0]))),
        DynamicImage::ImageLumaA8(buf) => {
            DynamicImage::ImageLumaA8(pad(&buf, side, at, LumaA([0, u8::MAX])))
        }
        DynamicImage::ImageRgb8(buf) => DynamicImage::ImageRgb8(pad(&buf, side, at, Rgb([0; 3]))),
        DynamicImage::ImageRgba8(buf) => DynamicImage::ImageRgba8(pad(&buf, side, at, BACKGROUND)),
        DynamicImage::ImageLuma16(buf) => {
            DynamicImage::ImageLuma16(pad(&buf, side, at, Luma([0])))
        }
        DynamicImage::ImageLumaA16(buf) => {
            DynamicImage::ImageLumaA16(pad(&buf, side, at, LumaA([0, u16::MAX])))
        }
        DynamicImage::ImageRgb16(buf) => DynamicImage::ImageRgb16(pad(&buf, side, at, Rgb([0; 3]))),
        DynamicImage::ImageRgba16(buf) => {
            DynamicImage::ImageRgba16(pad(&buf, side, at, Rgba([0, 0, 0, u16::MAX])))
        }
        DynamicImage::ImageRgb32F(buf) => {
            DynamicImage::ImageRgb32F(pad(&buf, side, at, Rgb([0.0; 3])))
        }
        DynamicImage::ImageRgba32F(buf) => {
            DynamicImage::ImageRgba32F(pad(&buf, side, at, Rgba([0.0, 0.0, 0.0, 1.0])))
        }
        other => DynamicImage::ImageRgba8(pad(&other.to_rgba8(), side, at, BACKGROUND)),
    }
}

/// Produce a `size x size` PNG thumbnail from encoded image bytes.
///
/// CPU-bound; callers on the async runtime should use `spawn_blocking`.
pub fn create_thumbnail(data: &[u8], size: u32) -> Result<Vec<u8>> {
    let image = decode(data)?;
    let square = expand_to_square(image);
    let thumbnail = square.resize_exact(size, size, FilterType::Lanczos3);

    let mut buf = Cursor::new(Vec::new());
    thumbnail
        .write_to(&mut buf, ImageFormat::Png)
        .map_err(|e| MediaError::Encode(e.to_string()))?;

    Ok(buf.into_inner())
}
