//! Per-pixel blending and layer drawing
//!
//! Blending follows the W3C compositing model: the blend function mixes
//! source and backdrop colors, then the result is composited source-over with
//! straight alpha. Every layer operation writes 8-bit channels.

use image::{Rgba, RgbaImage};
use rayon::prelude::*;

use crate::domain::BlendMode;

const TRANSPARENT: Rgba<u8> = Rgba([0, 0, 0, 0]);

/// Composite `src` over `dst` using `mode`, scaled by `opacity` (0.0 to 1.0)
pub fn blend_pixel(dst: Rgba<u8>, src: Rgba<u8>, mode: BlendMode, opacity: f32) -> Rgba<u8> {
    let src_alpha = src.0[3] as f32 / 255.0 * opacity.clamp(0.0, 1.0);
    if src_alpha <= 0.0 {
        return dst;
    }

    let dst_alpha = dst.0[3] as f32 / 255.0;
    let cs = unit_rgb(src);
    let cb = unit_rgb(dst);
    let mixed = mix(mode, cb, cs);

    let out_alpha = src_alpha + dst_alpha * (1.0 - src_alpha);
    let mut result = [0u8; 4];
    for i in 0..3 {
        // Backdrop-weighted source color, then source-over
        let source = (1.0 - dst_alpha) * cs[i] + dst_alpha * mixed[i];
        let premultiplied = src_alpha * source + dst_alpha * (1.0 - src_alpha) * cb[i];
        result[i] = to_channel(premultiplied / out_alpha);
    }
    result[3] = to_channel(out_alpha);

    if result[3] == 0 {
        return TRANSPARENT;
    }
    Rgba(result)
}

/// Fill every pixel of `layer` with `color` using `mode`
pub fn fill(layer: &mut RgbaImage, color: Rgba<u8>, mode: BlendMode) {
    let pixels: &mut [u8] = &mut **layer;
    pixels.par_chunks_exact_mut(4).for_each(|px| {
        let out = blend_pixel(Rgba([px[0], px[1], px[2], px[3]]), color, mode, 1.0);
        px.copy_from_slice(&out.0);
    });
}

/// Keep `layer` only where `mask` is opaque ("destination-in")
///
/// Color channels are untouched; alpha becomes `layer_alpha * mask_alpha / 255`.
/// Both rasters must share dimensions; extra mask pixels are ignored and
/// layer pixels without a mask counterpart become transparent.
pub fn mask_by_alpha(layer: &mut RgbaImage, mask: &RgbaImage) {
    let (width, height) = layer.dimensions();
    let (mask_width, mask_height) = mask.dimensions();
    let row_len = width as usize * 4;
    if row_len == 0 {
        return;
    }

    let pixels: &mut [u8] = &mut **layer;
    pixels
        .par_chunks_mut(row_len)
        .enumerate()
        .for_each(|(y, row)| {
            for (x, px) in row.chunks_exact_mut(4).enumerate() {
                let (x, y) = (x as u32, y as u32);
                let mask_alpha = if x < mask_width && y < mask_height && y < height {
                    mask.get_pixel(x, y).0[3] as u32
                } else {
                    0
                };

                let alpha = (px[3] as u32 * mask_alpha + 127) / 255;
                if alpha == 0 {
                    px.copy_from_slice(&TRANSPARENT.0);
                } else {
                    px[3] = alpha as u8;
                }
            }
        });
}

/// Draw `layer` onto `canvas` with its top-left corner at `(x, y)`
///
/// Pixels falling outside the canvas are clipped.
pub fn draw_layer(
    canvas: &mut RgbaImage,
    layer: &RgbaImage,
    x: i64,
    y: i64,
    mode: BlendMode,
    opacity: f32,
) {
    let (canvas_width, canvas_height) = canvas.dimensions();
    let (layer_width, layer_height) = layer.dimensions();

    let x0 = x.max(0);
    let y0 = y.max(0);
    let x1 = x.saturating_add(layer_width as i64).min(canvas_width as i64);
    let y1 = y.saturating_add(layer_height as i64).min(canvas_height as i64);
    if x0 >= x1 || y0 >= y1 {
        return;
    }

    let row_len = canvas_width as usize * 4;
    let pixels: &mut [u8] = &mut **canvas;
    pixels
        .par_chunks_mut(row_len)
        .enumerate()
        .skip(y0 as usize)
        .take((y1 - y0) as usize)
        .for_each(|(canvas_y, row)| {
            let layer_y = (canvas_y as i64 - y) as u32;
            for canvas_x in x0..x1 {
                let src = *layer.get_pixel((canvas_x - x) as u32, layer_y);
                if src.0[3] == 0 {
                    continue;
                }

                let i = canvas_x as usize * 4;
                let dst = Rgba([row[i], row[i + 1], row[i + 2], row[i + 3]]);
                let out = blend_pixel(dst, src, mode, opacity);
                row[i..i + 4].copy_from_slice(&out.0);
            }
        });
}

fn unit_rgb(pixel: Rgba<u8>) -> [f32; 3] {
    [
        pixel.0[0] as f32 / 255.0,
        pixel.0[1] as f32 / 255.0,
        pixel.0[2] as f32 / 255.0,
    ]
}

fn to_channel(value: f32) -> u8 {
    (value * 255.0).round().clamp(0.0, 255.0) as u8
}

/// Blend function B(backdrop, source) on unit RGB
fn mix(mode: BlendMode, cb: [f32; 3], cs: [f32; 3]) -> [f32; 3] {
    match mode {
        BlendMode::SourceOver => cs,
        BlendMode::Multiply => separable(cb, cs, |b, s| b * s),
        BlendMode::Screen => separable(cb, cs, screen),
        BlendMode::Overlay => separable(cb, cs, |b, s| {
            // Overlay is hard-light with the layers swapped
            if b <= 0.5 {
                s * 2.0 * b
            } else {
                screen(s, 2.0 * b - 1.0)
            }
        }),
        BlendMode::Darken => separable(cb, cs, f32::min),
        BlendMode::Lighten => separable(cb, cs, f32::max),
        BlendMode::Color => set_lum(cs, lum(cb)),
    }
}

fn separable(cb: [f32; 3], cs: [f32; 3], f: impl Fn(f32, f32) -> f32) -> [f32; 3] {
    [f(cb[0], cs[0]), f(cb[1], cs[1]), f(cb[2], cs[2])]
}

fn screen(b: f32, s: f32) -> f32 {
    b + s - b * s
}

fn lum(c: [f32; 3]) -> f32 {
    0.3 * c[0] + 0.59 * c[1] + 0.11 * c[2]
}

fn set_lum(c: [f32; 3], l: f32) -> [f32; 3] {
    let d = l - lum(c);
    clip_color([c[0] + d, c[1] + d, c[2] + d])
}

fn clip_color(c: [f32; 3]) -> [f32; 3] {
    let l = lum(c);
    let n = c[0].min(c[1]).min(c[2]);
    let x = c[0].max(c[1]).max(c[2]);

    let mut out = c;
    if n < 0.0 && l - n > f32::EPSILON {
        out = out.map(|v| l + (v - l) * l / (l - n));
    }
    if x > 1.0 && x - l > f32::EPSILON {
        out = out.map(|v| l + (v - l) * (1.0 - l) / (x - l));
    }
    out
}
