//! Pixel dimensions and a small EXIF subset for stored originals.
//!
//! Extraction never fails an upload: anything unreadable degrades to missing
//! dimensions and an empty metadata object.

use chrono::NaiveDateTime;
use exif::{In, Reader as ExifReader, Tag, Value};
use image::{ImageFormat, ImageReader};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{json, Map};
use std::io::Cursor;
use tracing::debug;

use super::validator::AcceptedType;

static SVG_ROOT: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?is)<svg(?::svg)?\b[^>]*>").unwrap());
static SVG_WIDTH: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?i)(?:^|\s)width\s*=\s*["']\s*([0-9]*\.?[0-9]+)\s*(?:px)?\s*["']"#).unwrap());
static SVG_HEIGHT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?i)(?:^|\s)height\s*=\s*["']\s*([0-9]*\.?[0-9]+)\s*(?:px)?\s*["']"#).unwrap());
static SVG_VIEWBOX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)(?:^|\s)viewBox\s*=\s*["']\s*(-?[0-9.]+)[\s,]+(-?[0-9.]+)[\s,]+([0-9.]+)[\s,]+([0-9.]+)\s*["']"#)
        .unwrap()
});

#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedMetadata {
    pub width: Option<u32>,
    pub height: Option<u32>,
    /// JSON object holding whichever EXIF fields were present.
    pub fields: serde_json::Value,
}

/// Read dimensions and EXIF from a stored original.
pub fn extract(data: &[u8], accepted: AcceptedType) -> ExtractedMetadata {
    let dimensions = if accepted.is_vector() {
        svg_dimensions(data)
    } else {
        raster_dimensions(data, accepted)
    };

    let fields = if accepted.is_vector() {
        json!({})
    } else {
        exif_fields(data)
    };

    ExtractedMetadata {
        width: dimensions.map(|(w, _)| w),
        height: dimensions.map(|(_, h)| h),
        fields,
    }
}

fn raster_dimensions(data: &[u8], accepted: AcceptedType) -> Option<(u32, u32)> {
    let format = ImageFormat::from_mime_type(accepted.mime_type)?;
    match ImageReader::with_format(Cursor::new(data), format).into_dimensions() {
        Ok(dims) => Some(dims),
        Err(e) => {
            debug!("Could not read {} dimensions: {}", accepted.mime_type, e);
            None
        }
    }
}

/// Intrinsic size of an SVG from its root `width`/`height` (px or unitless),
/// falling back to the `viewBox`.
pub fn svg_dimensions(data: &[u8]) -> Option<(u32, u32)> {
    let text = String::from_utf8_lossy(data);
    let root = SVG_ROOT.find(&text)?.as_str();

    let parse = |re: &Regex| -> Option<u32> {
        let value: f64 = re.captures(root)?.get(1)?.as_str().parse().ok()?;
        let rounded = value.round();
        (rounded >= 1.0 && rounded <= u32::MAX as f64).then_some(rounded as u32)
    };

    if let (Some(w), Some(h)) = (parse(&SVG_WIDTH), parse(&SVG_HEIGHT)) {
        return Some((w, h));
    }

    let caps = SVG_VIEWBOX.captures(root)?;
    let w: f64 = caps.get(3)?.as_str().parse().ok()?;
    let h: f64 = caps.get(4)?.as_str().parse().ok()?;
    let (w, h) = (w.round(), h.round());
    (w >= 1.0 && h >= 1.0).then_some((w as u32, h as u32))
}

/// EXIF subset as a JSON object; empty when the file carries none.
pub fn exif_fields(data: &[u8]) -> serde_json::Value {
    let mut cursor = Cursor::new(data);
    match ExifReader::new().read_from_container(&mut cursor) {
        Ok(exif) => fields_from_exif(&exif),
        Err(e) => {
            debug!("No EXIF data: {}", e);
            json!({})
        }
    }
}

/// EXIF orientation tag (1-8) of a raster original, if it carries one.
pub fn exif_orientation(data: &[u8]) -> Option<u32> {
    let exif = ExifReader::new().read_from_container(&mut Cursor::new(data)).ok()?;
    exif.get_field(Tag::Orientation, In::PRIMARY)
        .and_then(|f| f.value.get_uint(0))
}

fn fields_from_exif(exif: &exif::Exif) -> serde_json::Value {
    let mut out = Map::new();
    let field = |tag: Tag| exif.get_field(tag, In::PRIMARY);

    if let Some(model) = field(Tag::Model).and_then(|f| ascii_value(&f.value)) {
        out.insert("camera".to_string(), json!(model));
    }
    if let Some(make) = field(Tag::Make).and_then(|f| ascii_value(&f.value)) {
        out.insert("make".to_string(), json!(make));
    }
    if let Some(taken) = field(Tag::DateTimeOriginal).and_then(|f| ascii_value(&f.value)) {
        out.insert("taken_at".to_string(), json!(normalize_exif_datetime(&taken)));
    }
    if let Some((num, denom)) = field(Tag::ExposureTime).and_then(|f| rational_value(&f.value)) {
        if let Some(exposure) = format_exposure(num, denom) {
            out.insert("exposure".to_string(), json!(exposure));
        }
    }
    if let Some((num, denom)) = field(Tag::FNumber).and_then(|f| rational_value(&f.value)) {
        if denom != 0 {
            out.insert("aperture".to_string(), json!(round_to(num as f64 / denom as f64, 1)));
        }
    }
    if let Some(iso) = field(Tag::PhotographicSensitivity).and_then(|f| f.value.get_uint(0)) {
        out.insert("iso".to_string(), json!(iso));
    }
    if let Some((num, denom)) = field(Tag::FocalLength).and_then(|f| rational_value(&f.value)) {
        if denom != 0 {
            out.insert("focal_length".to_string(), json!(round_to(num as f64 / denom as f64, 1)));
        }
    }
    if let Some(orientation) = field(Tag::Orientation).and_then(|f| f.value.get_uint(0)) {
        out.insert("orientation".to_string(), json!(orientation));
    }

    serde_json::Value::Object(out)
}

fn ascii_value(value: &Value) -> Option<String> {
    match value {
        Value::Ascii(parts) => {
            let s = parts
                .first()
                .map(|bytes| String::from_utf8_lossy(bytes).trim_matches(['\0', ' ']).to_string())?;
            (!s.is_empty()).then_some(s)
        }
        _ => None,
    }
}

fn rational_value(value: &Value) -> Option<(u32, u32)> {
    match value {
        Value::Rational(r) => r.first().map(|r| (r.num, r.denom)),
        _ => None,
    }
}

/// `1/250` for fast shutter speeds, seconds otherwise.
fn format_exposure(num: u32, denom: u32) -> Option<String> {
    if num == 0 || denom == 0 {
        return None;
    }
    if num < denom {
        Some(format!("1/{}", (denom as f64 / num as f64).round() as u64))
    } else {
        let seconds = round_to(num as f64 / denom as f64, 1);
        Some(format!("{}", seconds))
    }
}

fn normalize_exif_datetime(raw: &str) -> String {
    NaiveDateTime::parse_from_str(raw, "%Y:%m:%d %H:%M:%S")
        .map(|dt| dt.format("%Y-%m-%dT%H:%M:%S").to_string())
        .unwrap_or_else(|_| raw.to_string())
}

fn round_to(value: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    (value * factor).round() / factor
}
