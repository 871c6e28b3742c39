/*!
 * Test Helpers and Utilities
 *
 * Configurations, databases, app states and generated images with sensible
 * defaults. Tests can modify the returned objects as needed.
 */

use std::collections::BTreeMap;
use std::io::Cursor;
use std::path::Path;
use std::sync::Arc;

use image::{DynamicImage, ImageFormat, Rgba, RgbaImage};

use crate::{
    config::{default_derivative_sizes, BackendDescriptor, BackendName, Config},
    db::Database,
    models::{Collection, CreateCollection},
    storage::StorageRegistry,
    AppState,
};

/// Test configuration rooted at `root`: an in-memory database and a single
/// `local` backend under `root/uploads`.
pub fn test_config(root: &Path) -> Config {
    let upload_path = root.join("uploads").to_string_lossy().to_string();
    let mut backends = BTreeMap::new();
    backends.insert(BackendName::Local, BackendDescriptor::local(upload_path.clone()));

    Config {
        database_url: "sqlite::memory:".to_string(),
        server_address: "127.0.0.1:0".to_string(),
        public_base_url: "http://localhost:8000".to_string(),
        staging_path: root.join("staging").to_string_lossy().to_string(),
        upload_path,
        max_file_size_mb: 10,
        image_quality: 85,
        derivative_sizes: default_derivative_sizes(),
        default_backend: BackendName::Local,
        deduplicate_uploads: false,
        backends,
    }
}

/// Creates a migrated in-memory database
pub async fn create_test_database() -> Database {
    let db = Database::new("sqlite::memory:")
        .await
        .expect("Failed to open in-memory database");
    db.migrate().await.expect("Failed to run migrations");
    db
}

/// Creates a test AppState with every backend of `config` built
pub async fn create_test_app_state_with_config(config: Config) -> Arc<AppState> {
    let db = create_test_database().await;
    let storage = Arc::new(StorageRegistry::from_config(&config).await);
    Arc::new(AppState::new(db, config, storage))
}

/// Creates a test AppState rooted at `root`
pub async fn create_test_app_state(root: &Path) -> Arc<AppState> {
    create_test_app_state_with_config(test_config(root)).await
}

pub async fn create_test_collection(db: &Database, name: &str) -> Collection {
    db.create_collection(&CreateCollection {
        name: name.to_string(),
        slug: None,
        tenant_id: None,
        layout: None,
        columns: None,
        gap: None,
        is_featured: None,
    })
    .await
    .expect("Failed to create test collection")
}

/// Opaque image with a colour gradient, so resampling has something to average.
pub fn gradient_image(width: u32, height: u32) -> RgbaImage {
    RgbaImage::from_fn(width, height, |x, y| {
        Rgba([
            (x * 255 / width.max(1)) as u8,
            (y * 255 / height.max(1)) as u8,
            128,
            255,
        ])
    })
}

/// Left half opaque red, right half fully transparent.
pub fn half_transparent_image(width: u32, height: u32) -> RgbaImage {
    RgbaImage::from_fn(width, height, |x, _| {
        if x < width / 2 {
            Rgba([255, 0, 0, 255])
        } else {
            Rgba([0, 0, 0, 0])
        }
    })
}

/// Encode an image in `format`. JPEG drops the alpha channel.
pub fn encode_image(image: &RgbaImage, format: ImageFormat) -> Vec<u8> {
    let dynamic = match format {
        ImageFormat::Jpeg => DynamicImage::ImageRgb8(DynamicImage::ImageRgba8(image.clone()).to_rgb8()),
        _ => DynamicImage::ImageRgba8(image.clone()),
    };
    let mut out = Cursor::new(Vec::new());
    dynamic.write_to(&mut out, format).expect("Failed to encode test image");
    out.into_inner()
}

pub fn jpeg_bytes(width: u32, height: u32) -> Vec<u8> {
    encode_image(&gradient_image(width, height), ImageFormat::Jpeg)
}

pub fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    encode_image(&gradient_image(width, height), ImageFormat::Png)
}

pub fn webp_bytes(width: u32, height: u32) -> Vec<u8> {
    encode_image(&gradient_image(width, height), ImageFormat::WebP)
}

/// Little-endian TIFF block holding only an Orientation tag.
pub fn exif_tiff_with_orientation(orientation: u16) -> Vec<u8> {
    let mut data = Vec::new();
    data.extend_from_slice(b"II*\0");
    data.extend_from_slice(&8u32.to_le_bytes());
    data.extend_from_slice(&1u16.to_le_bytes());
    data.extend_from_slice(&0x0112u16.to_le_bytes());
    data.extend_from_slice(&3u16.to_le_bytes());
    data.extend_from_slice(&1u32.to_le_bytes());
    data.extend_from_slice(&orientation.to_le_bytes());
    data.extend_from_slice(&[0, 0]);
    data.extend_from_slice(&0u32.to_le_bytes());
    data
}

/// Insert an EXIF APP1 segment with `orientation` right after the JPEG SOI marker.
pub fn jpeg_with_orientation(jpeg: &[u8], orientation: u16) -> Vec<u8> {
    let tiff = exif_tiff_with_orientation(orientation);
    let segment_len = (2 + 6 + tiff.len()) as u16;

    let mut out = Vec::with_capacity(jpeg.len() + segment_len as usize + 2);
    out.extend_from_slice(&jpeg[..2]);
    out.extend_from_slice(&[0xFF, 0xE1]);
    out.extend_from_slice(&segment_len.to_be_bytes());
    out.extend_from_slice(b"Exif\0\0");
    out.extend_from_slice(&tiff);
    out.extend_from_slice(&jpeg[2..]);
    out
}

pub fn svg_bytes() -> Vec<u8> {
    br#"<?xml version="1.0" encoding="UTF-8"?>
<svg xmlns="http://www.w3.org/2000/svg" width="120" height="80" viewBox="0 0 120 80">
  <rect width="120" height="80" fill="teal"/>
</svg>"#
        .to_vec()
}

/// Chunked in-memory byte stream, shaped like a request body.
pub fn byte_stream(
    data: &[u8],
    chunk_size: usize,
) -> futures::stream::Iter<std::vec::IntoIter<Result<Vec<u8>, std::io::Error>>> {
    let chunks: Vec<Result<Vec<u8>, std::io::Error>> =
        data.chunks(chunk_size.max(1)).map(|c| Ok(c.to_vec())).collect();
    futures::stream::iter(chunks)
}

pub const MULTIPART_BOUNDARY: &str = "mediashelf-test-boundary";

/// One part of a multipart form.
pub struct FormPart<'a> {
    pub name: &'a str,
    pub filename: Option<&'a str>,
    pub content_type: Option<&'a str>,
    pub data: &'a [u8],
}

impl<'a> FormPart<'a> {
    pub fn file(filename: &'a str, content_type: &'a str, data: &'a [u8]) -> Self {
        Self {
            name: "file",
            filename: Some(filename),
            content_type: Some(content_type),
            data,
        }
    }

    pub fn text(name: &'a str, value: &'a str) -> Self {
        Self {
            name,
            filename: None,
            content_type: None,
            data: value.as_bytes(),
        }
    }
}

/// Encode a `multipart/form-data` body delimited by [`MULTIPART_BOUNDARY`].
pub fn multipart_body(parts: &[FormPart<'_>]) -> Vec<u8> {
    let mut body = Vec::new();
    for part in parts {
        body.extend_from_slice(format!("--{}\r\n", MULTIPART_BOUNDARY).as_bytes());
        match part.filename {
            Some(filename) => body.extend_from_slice(
                format!(
                    "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\n",
                    part.name, filename
                )
                .as_bytes(),
            ),
            None => body.extend_from_slice(
                format!("Content-Disposition: form-data; name=\"{}\"\r\n", part.name).as_bytes(),
            ),
        }
        if let Some(content_type) = part.content_type {
            body.extend_from_slice(format!("Content-Type: {}\r\n", content_type).as_bytes());
        }
        body.extend_from_slice(b"\r\n");
        body.extend_from_slice(part.data);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{}--\r\n", MULTIPART_BOUNDARY).as_bytes());
    body
}
