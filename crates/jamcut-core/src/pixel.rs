// crates/jamcut-core/src/pixel.rs
//
// CPU pixel operations for the compositor: viewport blits and the ops the
// software effect chain applies. All functions operate on raw RGBA byte
// slices — no ffmpeg, no GPU.

use crate::helpers::geometry::Viewport;

// ── Clamp / lerp ─────────────────────────────────────────────────────────────

/// Clamp `v` to [0.0, 1.0].
#[inline]
pub fn clamp01(v: f32) -> f32 {
    v.clamp(0.0, 1.0)
}

/// Linear interpolation between `a` and `b` at `t` ∈ [0, 1].
#[inline]
pub fn lerp(a: f32, b: f32, t: f32) -> f32 {
    a + (b - a) * t
}

// ── Canvas fill / blit ────────────────────────────────────────────────────────

/// Fill an RGBA canvas with opaque black.
pub fn clear(canvas: &mut [u8]) {
    for px in canvas.chunks_exact_mut(4) {
        px[0] = 0;
        px[1] = 0;
        px[2] = 0;
        px[3] = 255;
    }
}

/// Nearest-neighbour blit of `frame` into `viewport` on `canvas`, with a
/// constant blend factor (`alpha` 1.0 = fully opaque source).
///
/// The viewport is clipped against the canvas bounds; out-of-range frames
/// simply draw their visible part.
pub fn blit_nearest(
    canvas:   &mut [u8],
    canvas_w: u32,
    canvas_h: u32,
    frame:    &[u8],
    frame_w:  u32,
    frame_h:  u32,
    viewport: Viewport,
    alpha:    f32,
) {
    if viewport.is_empty() || frame_w == 0 || frame_h == 0 {
        return;
    }
    let alpha = clamp01(alpha);
    if alpha == 0.0 {
        return;
    }

    let x0 = viewport.x.max(0);
    let y0 = viewport.y.max(0);
    let x1 = (viewport.x + viewport.width as i32).min(canvas_w as i32);
    let y1 = (viewport.y + viewport.height as i32).min(canvas_h as i32);

    for dy in y0..y1 {
        // Source row via nearest sampling over the viewport height.
        let v = (dy - viewport.y) as u64 * frame_h as u64 / viewport.height as u64;
        let src_row = (v as u32).min(frame_h - 1) as usize * frame_w as usize * 4;
        let dst_row = dy as usize * canvas_w as usize * 4;
        for dx in x0..x1 {
            let u = (dx - viewport.x) as u64 * frame_w as u64 / viewport.width as u64;
            let si = src_row + (u as u32).min(frame_w - 1) as usize * 4;
            let di = dst_row + dx as usize * 4;
            if si + 4 > frame.len() || di + 4 > canvas.len() {
                continue;
            }
            if alpha >= 1.0 {
                canvas[di..di + 3].copy_from_slice(&frame[si..si + 3]);
            } else {
                for c in 0..3 {
                    let src = frame[si + c] as f32;
                    let dst = canvas[di + c] as f32;
                    canvas[di + c] = lerp(dst, src, alpha) as u8;
                }
            }
            canvas[di + 3] = 255;
        }
    }
}

// ── Effect-chain pixel ops ────────────────────────────────────────────────────
//
// Each op takes a normalized [0, 1] amount; 0.5 is neutral where the op is
// bidirectional (brightness, contrast), 1.0 is neutral for saturation.

/// Brightness: 0.0 = black, 0.5 = unchanged, 1.0 = 2× gain.
pub fn apply_brightness(rgba: &mut [u8], amount: f32) {
    let gain = clamp01(amount) * 2.0;
    for px in rgba.chunks_exact_mut(4) {
        for c in 0..3 {
            px[c] = (px[c] as f32 * gain).min(255.0) as u8;
        }
    }
}

/// Contrast around mid-grey: 0.0 = flat grey, 0.5 = unchanged, 1.0 = 2×.
pub fn apply_contrast(rgba: &mut [u8], amount: f32) {
    let factor = clamp01(amount) * 2.0;
    for px in rgba.chunks_exact_mut(4) {
        for c in 0..3 {
            let v = (px[c] as f32 - 128.0) * factor + 128.0;
            px[c] = v.clamp(0.0, 255.0) as u8;
        }
    }
}

/// Saturation: 0.0 = greyscale, 1.0 = unchanged.
pub fn apply_saturation(rgba: &mut [u8], amount: f32) {
    let amount = clamp01(amount);
    for px in rgba.chunks_exact_mut(4) {
        // Rec. 601 luma.
        let luma = 0.299 * px[0] as f32 + 0.587 * px[1] as f32 + 0.114 * px[2] as f32;
        for c in 0..3 {
            px[c] = lerp(luma, px[c] as f32, amount).clamp(0.0, 255.0) as u8;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn solid(rgb: [u8; 3], pixels: usize) -> Vec<u8> {
        let mut data = Vec::with_capacity(pixels * 4);
        for _ in 0..pixels {
            data.extend_from_slice(&[rgb[0], rgb[1], rgb[2], 255]);
        }
        data
    }

    #[test]
    fn clear_paints_opaque_black() {
        let mut canvas = solid([10, 20, 30], 4);
        clear(&mut canvas);
        assert!(canvas.chunks_exact(4).all(|px| px == [0, 0, 0, 255]));
    }

    #[test]
    fn blit_fills_exact_viewport() {
        let mut canvas = solid([0, 0, 0], 16); // 4×4
        let frame = solid([200, 100, 50], 4); // 2×2
        blit_nearest(&mut canvas, 4, 4, &frame, 2, 2, Viewport::new(2, 2, 2, 2), 1.0);

        let px = |x: usize, y: usize| {
            let i = (y * 4 + x) * 4;
            [canvas[i], canvas[i + 1], canvas[i + 2]]
        };
        assert_eq!(px(0, 0), [0, 0, 0]);
        assert_eq!(px(1, 1), [0, 0, 0]);
        assert_eq!(px(2, 2), [200, 100, 50]);
        assert_eq!(px(3, 3), [200, 100, 50]);
    }

    #[test]
    fn blit_clips_to_canvas_bounds() {
        let mut canvas = solid([0, 0, 0], 16); // 4×4
        let frame = solid([255, 255, 255], 4); // 2×2
        // Viewport half off the right edge — must not panic or wrap.
        blit_nearest(&mut canvas, 4, 4, &frame, 2, 2, Viewport::new(3, 0, 2, 2), 1.0);
        let i = (0 * 4 + 3) * 4;
        assert_eq!(canvas[i], 255);
    }

    #[test]
    fn blend_alpha_mixes_source_and_dest() {
        let mut canvas = solid([0, 0, 0], 1);
        let frame = solid([200, 200, 200], 1);
        blit_nearest(&mut canvas, 1, 1, &frame, 1, 1, Viewport::new(0, 0, 1, 1), 0.5);
        assert!((canvas[0] as i32 - 100).abs() <= 1);
    }

    #[test]
    fn neutral_amounts_leave_pixels_unchanged() {
        let original = solid([120, 60, 200], 2);

        let mut b = original.clone();
        apply_brightness(&mut b, 0.5);
        assert_eq!(b, original);

        let mut c = original.clone();
        apply_contrast(&mut c, 0.5);
        assert_eq!(c, original);

        let mut s = original.clone();
        apply_saturation(&mut s, 1.0);
        assert_eq!(s, original);
    }

    #[test]
    fn saturation_zero_is_greyscale() {
        let mut data = solid([255, 0, 0], 1);
        apply_saturation(&mut data, 0.0);
        assert_eq!(data[0], data[1]);
        assert_eq!(data[1], data[2]);
    }
}
