//! Resized raster copies of an uploaded image.

use anyhow::{anyhow, Result};
use image::codecs::gif::GifEncoder;
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::codecs::webp::WebPEncoder;
use image::{DynamicImage, ExtendedColorType, ImageEncoder, ImageFormat, RgbaImage};
use std::io::Cursor;

use super::metadata::exif_orientation;
use super::resample::resample_area;
use super::validator::AcceptedType;
use crate::config::DerivativeSize;

/// One encoded derivative ready to be written.
#[derive(Debug)]
pub struct RenderedDerivative {
    pub size_class: String,
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
}

/// Dimensions of a derivative bounded by `max_width` x `max_height`, keeping
/// the aspect ratio. `None` when the original already fits; images are never
/// upscaled.
pub fn target_dimensions(width: u32, height: u32, max_width: u32, max_height: u32) -> Option<(u32, u32)> {
    if width == 0 || height == 0 || (width <= max_width && height <= max_height) {
        return None;
    }

    let (w, h) = (width as u64, height as u64);
    let (mw, mh) = (max_width as u64, max_height as u64);

    // Compare mw/w against mh/h without floating point
    let (tw, th) = if mw * h <= mh * w {
        (mw, h * mw / w)
    } else {
        (w * mh / h, mh)
    };

    Some((tw.max(1) as u32, th.max(1) as u32))
}

fn image_format(accepted: AcceptedType) -> Option<ImageFormat> {
    match accepted.extension {
        "jpg" => Some(ImageFormat::Jpeg),
        "png" => Some(ImageFormat::Png),
        "gif" => Some(ImageFormat::Gif),
        "webp" => Some(ImageFormat::WebP),
        _ => None,
    }
}

/// Decode a raster original to RGBA, upright according to its EXIF
/// orientation. Animated GIFs yield their first frame.
pub fn decode_rgba(data: &[u8], accepted: AcceptedType) -> Result<RgbaImage> {
    let format = image_format(accepted)
        .ok_or_else(|| anyhow!("{} has no raster representation", accepted.mime_type))?;
    let decoded = image::load_from_memory_with_format(data, format)?;
    let decoded = match exif_orientation(data) {
        Some(orientation) => apply_orientation(decoded, orientation),
        None => decoded,
    };
    Ok(decoded.into_rgba8())
}

/// Rotate or mirror pixels so an image with EXIF `orientation` displays upright.
pub fn apply_orientation(image: DynamicImage, orientation: u32) -> DynamicImage {
    match orientation {
        2 => image.fliph(),
        3 => image.rotate180(),
        4 => image.flipv(),
        5 => image.rotate90().fliph(),
        6 => image.rotate90(),
        7 => image.rotate270().fliph(),
        8 => image.rotate270(),
        _ => image,
    }
}

/// Encode RGBA pixels in the original's format.
pub fn encode(image: &RgbaImage, accepted: AcceptedType, quality: u8) -> Result<Vec<u8>> {
    let (width, height) = image.dimensions();
    let mut buf = Vec::new();

    match accepted.extension {
        "jpg" => {
            let rgb = DynamicImage::ImageRgba8(image.clone()).into_rgb8();
            JpegEncoder::new_with_quality(&mut buf, quality.clamp(1, 100)).write_image(
                rgb.as_raw(),
                width,
                height,
                ExtendedColorType::Rgb8,
            )?;
        }
        "png" => {
            PngEncoder::new(&mut buf).write_image(image.as_raw(), width, height, ExtendedColorType::Rgba8)?;
        }
        "gif" => {
            let mut encoder = GifEncoder::new(Cursor::new(&mut buf));
            encoder.encode(image.as_raw(), width, height, ExtendedColorType::Rgba8)?;
        }
        "webp" => {
            WebPEncoder::new_lossless(&mut buf).write_image(
                image.as_raw(),
                width,
                height,
                ExtendedColorType::Rgba8,
            )?;
        }
        other => return Err(anyhow!("Cannot encode derivatives as {}", other)),
    }

    Ok(buf)
}

/// Produce one size class from a decoded original. `Ok(None)` means the
/// original is already within bounds and no derivative is needed.
pub fn render_derivative(
    source: &RgbaImage,
    accepted: AcceptedType,
    size: &DerivativeSize,
    quality: u8,
) -> Result<Option<RenderedDerivative>> {
    let (width, height) = source.dimensions();
    let Some((tw, th)) = target_dimensions(width, height, size.max_width, size.max_height) else {
        return Ok(None);
    };

    let resized = resample_area(source, tw, th);
    let data = encode(&resized, accepted, quality)?;

    Ok(Some(RenderedDerivative {
        size_class: size.name.clone(),
        width: tw,
        height: th,
        data,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    #[test]
    fn test_target_dimensions_never_upscale() {
        assert_eq!(target_dimensions(100, 80, 150, 150), None);
        assert_eq!(target_dimensions(150, 150, 150, 150), None);
    }

    #[test]
    fn test_target_dimensions_preserve_aspect() {
        assert_eq!(target_dimensions(2000, 1000, 150, 150), Some((150, 75)));
        assert_eq!(target_dimensions(2000, 1000, 600, 600), Some((600, 300)));
        assert_eq!(target_dimensions(1000, 3000, 600, 600), Some((200, 600)));
        assert_eq!(target_dimensions(160, 100, 150, 150), Some((150, 93)));
    }

    #[test]
    fn test_target_dimensions_clamp_to_one() {
        assert_eq!(target_dimensions(10000, 10, 150, 150), Some((150, 1)));
    }

    #[test]
    fn test_png_derivative_keeps_alpha() {
        let mut src = RgbaImage::from_pixel(400, 200, Rgba([0, 128, 255, 255]));
        for y in 0..200 {
            for x in 0..200 {
                src.put_pixel(x, y, Rgba([0, 0, 0, 0]));
            }
        }
        let size = DerivativeSize::new("thumb", 150, 150);
        let rendered = render_derivative(&src, AcceptedType::PNG, &size, 85).unwrap().unwrap();
        assert_eq!((rendered.width, rendered.height), (150, 75));

        let decoded = image::load_from_memory(&rendered.data).unwrap().to_rgba8();
        assert_eq!(decoded.dimensions(), (150, 75));
        assert_eq!(decoded.get_pixel(10, 10)[3], 0);
        assert_eq!(*decoded.get_pixel(140, 60), Rgba([0, 128, 255, 255]));
    }

    #[test]
    fn test_jpeg_derivative_is_rgb() {
        let src = RgbaImage::from_pixel(300, 300, Rgba([200, 100, 50, 255]));
        let size = DerivativeSize::new("thumb", 150, 150);
        let rendered = render_derivative(&src, AcceptedType::JPEG, &size, 85).unwrap().unwrap();
        let decoded = image::load_from_memory(&rendered.data).unwrap();
        assert_eq!(decoded.color(), image::ColorType::Rgb8);
        assert_eq!((decoded.width(), decoded.height()), (150, 150));
    }

    #[test]
    fn test_small_source_yields_no_derivative() {
        let src = RgbaImage::new(64, 64);
        let size = DerivativeSize::new("medium", 600, 600);
        assert!(render_derivative(&src, AcceptedType::PNG, &size, 85).unwrap().is_none());
    }

    #[test]
    fn test_orientation_transforms() {
        // 2x1: red on the left, blue on the right
        let mut src = RgbaImage::new(2, 1);
        src.put_pixel(0, 0, Rgba([255, 0, 0, 255]));
        src.put_pixel(1, 0, Rgba([0, 0, 255, 255]));
        let src = DynamicImage::ImageRgba8(src);

        let upright = apply_orientation(src.clone(), 1).to_rgba8();
        assert_eq!(upright.dimensions(), (2, 1));

        let mirrored = apply_orientation(src.clone(), 2).to_rgba8();
        assert_eq!(*mirrored.get_pixel(0, 0), Rgba([0, 0, 255, 255]));

        // Rotated 90 degrees clockwise, the left pixel ends up on top
        let rotated = apply_orientation(src.clone(), 6).to_rgba8();
        assert_eq!(rotated.dimensions(), (1, 2));
        assert_eq!(*rotated.get_pixel(0, 0), Rgba([255, 0, 0, 255]));

        let rotated = apply_orientation(src.clone(), 8).to_rgba8();
        assert_eq!(*rotated.get_pixel(0, 0), Rgba([0, 0, 255, 255]));

        assert_eq!(apply_orientation(src, 42).to_rgba8().dimensions(), (2, 1));
    }

    #[test]
    fn test_decode_applies_exif_orientation() {
        let jpeg = crate::test_helpers::jpeg_with_orientation(&crate::test_helpers::jpeg_bytes(40, 20), 6);
        let decoded = decode_rgba(&jpeg, AcceptedType::JPEG).unwrap();
        assert_eq!(decoded.dimensions(), (20, 40));

        let plain = decode_rgba(&crate::test_helpers::jpeg_bytes(40, 20), AcceptedType::JPEG).unwrap();
        assert_eq!(plain.dimensions(), (40, 20));
    }

    #[test]
    fn test_webp_derivative_keeps_alpha() {
        let mut src = RgbaImage::from_pixel(300, 100, Rgba([10, 200, 30, 255]));
        for y in 0..100 {
            for x in 150..300 {
                src.put_pixel(x, y, Rgba([0, 0, 0, 0]));
            }
        }
        let size = DerivativeSize::new("thumb", 150, 150);
        let rendered = render_derivative(&src, AcceptedType::WEBP, &size, 85).unwrap().unwrap();
        assert_eq!((rendered.width, rendered.height), (150, 50));

        let decoded = image::load_from_memory_with_format(&rendered.data, ImageFormat::WebP)
            .unwrap()
            .to_rgba8();
        assert_eq!(*decoded.get_pixel(10, 25), Rgba([10, 200, 30, 255]));
        assert_eq!(decoded.get_pixel(140, 25)[3], 0);
    }

    #[test]
    fn test_svg_has_no_raster_decoder() {
        assert!(decode_rgba(b"<svg/>", AcceptedType::SVG).is_err());
    }
}
