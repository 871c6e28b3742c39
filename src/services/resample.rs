//! Area-averaging image downscaler.
//!
//! Every destination pixel is the coverage-weighted mean of the source pixels
//! under its footprint. Work happens on premultiplied RGBA so transparent
//! source pixels contribute nothing to colour and fully transparent regions
//! stay fully transparent.

use image::{Rgba, RgbaImage};

/// Per-destination-index list of `(source index, weight)`; weights sum to 1.
fn axis_weights(src_len: u32, dst_len: u32) -> Vec<Vec<(usize, f32)>> {
    let scale = src_len as f64 / dst_len as f64;
    (0..dst_len)
        .map(|i| {
            let start = i as f64 * scale;
            let end = ((i + 1) as f64 * scale).min(src_len as f64);
            let first = start.floor() as u32;
            let last = (end.ceil() as u32).min(src_len);

            let mut weights: Vec<(usize, f32)> = (first..last)
                .filter_map(|j| {
                    let coverage = end.min(j as f64 + 1.0) - start.max(j as f64);
                    (coverage > 0.0).then_some((j as usize, coverage as f32))
                })
                .collect();

            let total: f32 = weights.iter().map(|(_, w)| w).sum();
            if total > 0.0 {
                for (_, w) in weights.iter_mut() {
                    *w /= total;
                }
            }
            weights
        })
        .collect()
}

fn premultiply(src: &RgbaImage) -> Vec<[f32; 4]> {
    src.pixels()
        .map(|Rgba([r, g, b, a])| {
            let alpha = *a as f32 / 255.0;
            [*r as f32 * alpha, *g as f32 * alpha, *b as f32 * alpha, *a as f32]
        })
        .collect()
}

fn unpremultiply(px: [f32; 4]) -> Rgba<u8> {
    let alpha = px[3].clamp(0.0, 255.0);
    let a = alpha.round() as u8;
    if a == 0 {
        return Rgba([0, 0, 0, 0]);
    }
    let channel = |c: f32| (c * 255.0 / alpha).round().clamp(0.0, 255.0) as u8;
    Rgba([channel(px[0]), channel(px[1]), channel(px[2]), a])
}

/// Downscale `src` to exactly `dst_width` x `dst_height`.
pub fn resample_area(src: &RgbaImage, dst_width: u32, dst_height: u32) -> RgbaImage {
    let (src_width, src_height) = src.dimensions();
    let dst_width = dst_width.max(1);
    let dst_height = dst_height.max(1);

    let source = premultiply(src);
    let x_weights = axis_weights(src_width, dst_width);
    let y_weights = axis_weights(src_height, dst_height);

    // Horizontal pass: src_width x src_height -> dst_width x src_height
    let mut horizontal = vec![[0f32; 4]; dst_width as usize * src_height as usize];
    for y in 0..src_height as usize {
        let row = &source[y * src_width as usize..(y + 1) * src_width as usize];
        for (x, weights) in x_weights.iter().enumerate() {
            let mut acc = [0f32; 4];
            for &(sx, w) in weights {
                let p = row[sx];
                acc[0] += p[0] * w;
                acc[1] += p[1] * w;
                acc[2] += p[2] * w;
                acc[3] += p[3] * w;
            }
            horizontal[y * dst_width as usize + x] = acc;
        }
    }

    // Vertical pass: dst_width x src_height -> dst_width x dst_height
    let mut out = RgbaImage::new(dst_width, dst_height);
    for (y, weights) in y_weights.iter().enumerate() {
        for x in 0..dst_width as usize {
            let mut acc = [0f32; 4];
            for &(sy, w) in weights {
                let p = horizontal[sy * dst_width as usize + x];
                acc[0] += p[0] * w;
                acc[1] += p[1] * w;
                acc[2] += p[2] * w;
                acc[3] += p[3] * w;
            }
            out.put_pixel(x as u32, y as u32, unpremultiply(acc));
        }
    }

    out
}
