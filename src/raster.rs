//! Pixel-level drawing shared by the page rasterizer and the annotation surface.
//!
//! Shapes are first rendered into a coverage [`Mask`] and then composited
//! with source-over blending, so overlapping segments of one stroke never
//! double up their opacity.

use ab_glyph::{point, Font, FontRef, GlyphId, PxScale, ScaleFont};
use image::imageops::{self, FilterType};
use image::{GrayImage, Luma, Rgba, RgbaImage};
use imageproc::drawing::{draw_filled_circle_mut, draw_line_segment_mut, draw_polygon_mut};
use imageproc::point::Point;

pub(crate) const WHITE: Rgba<u8> = Rgba([255, 255, 255, 255]);
pub(crate) const TRANSPARENT: Rgba<u8> = Rgba([0, 0, 0, 0]);

/// Largest canvas, or scaled image, the drawing code allocates.
pub(crate) const MAX_PIXELS: u64 = 120_000_000;

/// Length of the diagonal of a `width` × `height` area.
pub(crate) fn diagonal((width, height): (u32, u32)) -> f32 {
    (width as f32).hypot(height as f32)
}

/// Composite `src` over `dst` with an extra opacity factor.
pub(crate) fn blend(dst: &mut Rgba<u8>, src: Rgba<u8>, opacity: f32) {
    let a = (src.0[3] as f32 / 255.0 * opacity).clamp(0.0, 1.0);
    if a <= 0.0 {
        return;
    }
    let dst_a = dst.0[3] as f32 / 255.0;
    let out_a = a + dst_a * (1.0 - a);
    for i in 0..3 {
        let c = src.0[i] as f32 * a + dst.0[i] as f32 * dst_a * (1.0 - a);
        dst.0[i] = (c / out_a).round().clamp(0.0, 255.0) as u8;
    }
    dst.0[3] = (out_a * 255.0).round().clamp(0.0, 255.0) as u8;
}

/// Axis-aligned bounds `(x0, y0, x1, y1)` of a point list, grown by `pad`.
pub(crate) fn bounds_of(points: &[(f32, f32)], pad: f32) -> Option<(f32, f32, f32, f32)> {
    let first = points.first()?;
    let mut b = (first.0, first.1, first.0, first.1);
    for &(x, y) in &points[1..] {
        b.0 = b.0.min(x);
        b.1 = b.1.min(y);
        b.2 = b.2.max(x);
        b.3 = b.3.max(y);
    }
    Some((b.0 - pad, b.1 - pad, b.2 + pad, b.3 + pad))
}

/// Coverage mask over the part of a canvas a shape can touch.
pub(crate) struct Mask {
    image: GrayImage,
    left: i32,
    top: i32,
}

impl Mask {
    /// Mask for `bounds` clipped to a `canvas`-sized area; `None` when nothing is visible.
    pub(crate) fn covering(canvas: (u32, u32), bounds: (f32, f32, f32, f32)) -> Option<Mask> {
        let (x0, y0, x1, y1) = bounds;
        if !(x0.is_finite() && y0.is_finite() && x1.is_finite() && y1.is_finite()) {
            return None;
        }
        let left = x0.floor().max(0.0) as i64;
        let top = y0.floor().max(0.0) as i64;
        let right = (x1.ceil() as i64).saturating_add(1).min(canvas.0 as i64);
        let bottom = (y1.ceil() as i64).saturating_add(1).min(canvas.1 as i64);
        if right <= left || bottom <= top {
            return None;
        }
        Some(Mask {
            image: GrayImage::new((right - left) as u32, (bottom - top) as u32),
            left: left as i32,
            top: top as i32,
        })
    }

    fn local(&self, (x, y): (f32, f32)) -> (f32, f32) {
        (x - self.left as f32, y - self.top as f32)
    }

    fn local_point(&self, p: (f32, f32)) -> Point<i32> {
        let (x, y) = self.local(p);
        Point::new(x.round() as i32, y.round() as i32)
    }

    pub(crate) fn fill_polygon(&mut self, points: &[(f32, f32)]) {
        let mut poly: Vec<Point<i32>> = Vec::with_capacity(points.len());
        for &p in points {
            let lp = self.local_point(p);
            if poly.last() != Some(&lp) {
                poly.push(lp);
            }
        }
        while poly.len() > 1 && poly.first() == poly.last() {
            poly.pop();
        }

        match poly.len() {
            0 => {}
            1 | 2 => {
                let a = poly[0];
                let b = *poly.last().unwrap_or(&a);
                draw_line_segment_mut(
                    &mut self.image,
                    (a.x as f32, a.y as f32),
                    (b.x as f32, b.y as f32),
                    Luma([255]),
                );
            }
            _ => draw_polygon_mut(&mut self.image, &poly, Luma([255])),
        }
    }

    /// Fill every subpath with the even-odd rule: areas covered an even
    /// number of times stay empty.
    pub(crate) fn fill_even_odd(&mut self, subpaths: &[Vec<(f32, f32)>]) {
        for subpath in subpaths.iter().filter(|sp| sp.len() > 1) {
            let mut ring = Mask {
                image: GrayImage::new(self.image.width(), self.image.height()),
                left: self.left,
                top: self.top,
            };
            ring.fill_polygon(subpath);
            for (dst, src) in self.image.pixels_mut().zip(ring.image.pixels()) {
                if src.0[0] > 0 {
                    dst.0[0] = 255 - dst.0[0];
                }
            }
        }
    }

    pub(crate) fn stroke_polyline(&mut self, points: &[(f32, f32)], width: f32) {
        // Wider than the mask diagonal covers the same pixels
        let half = width.max(1.0).min(2.0 * diagonal(self.image.dimensions()) + 2.0) / 2.0;
        if points.len() == 1 {
            let c = self.local_point(points[0]);
            draw_filled_circle_mut(&mut self.image, (c.x, c.y), half.round() as i32, Luma([255]));
            return;
        }

        for pair in points.windows(2) {
            let (a, b) = (self.local(pair[0]), self.local(pair[1]));
            if half <= 0.75 {
                draw_line_segment_mut(&mut self.image, a, b, Luma([255]));
                continue;
            }
            let (dx, dy) = (b.0 - a.0, b.1 - a.1);
            let len = (dx * dx + dy * dy).sqrt();
            if len > f32::EPSILON {
                let (nx, ny) = (-dy / len * half, dx / len * half);
                let quad = [
                    (a.0 + nx, a.1 + ny),
                    (b.0 + nx, b.1 + ny),
                    (b.0 - nx, b.1 - ny),
                    (a.0 - nx, a.1 - ny),
                ];
                let poly: Vec<Point<i32>> = quad
                    .iter()
                    .map(|&(x, y)| Point::new(x.round() as i32, y.round() as i32))
                    .collect();
                if poly[0] != poly[3] && poly[0] != poly[1] {
                    draw_polygon_mut(&mut self.image, &poly, Luma([255]));
                }
            }
            for p in [a, b] {
                draw_filled_circle_mut(
                    &mut self.image,
                    (p.0.round() as i32, p.1.round() as i32),
                    half.round() as i32,
                    Luma([255]),
                );
            }
        }
    }

    /// Composite `color` through this mask onto `canvas`.
    pub(crate) fn paint(&self, canvas: &mut RgbaImage, color: Rgba<u8>, opacity: f32) {
        let (cw, ch) = canvas.dimensions();
        for (x, y, coverage) in self.image.enumerate_pixels() {
            if coverage.0[0] == 0 {
                continue;
            }
            let cx = self.left as u32 + x;
            let cy = self.top as u32 + y;
            if cx < cw && cy < ch {
                blend(
                    canvas.get_pixel_mut(cx, cy),
                    color,
                    opacity * coverage.0[0] as f32 / 255.0,
                );
            }
        }
    }
}

/// Fill a polygon on `canvas` in one step.
pub(crate) fn fill_polygon(
    canvas: &mut RgbaImage,
    points: &[(f32, f32)],
    color: Rgba<u8>,
    opacity: f32,
) {
    let Some(bounds) = bounds_of(points, 1.0) else {
        return;
    };
    if let Some(mut mask) = Mask::covering(canvas.dimensions(), bounds) {
        mask.fill_polygon(points);
        mask.paint(canvas, color, opacity);
    }
}

/// Stroke an open polyline on `canvas` in one step.
pub(crate) fn stroke_polyline(
    canvas: &mut RgbaImage,
    points: &[(f32, f32)],
    width: f32,
    color: Rgba<u8>,
    opacity: f32,
) {
    let Some(bounds) = bounds_of(points, width.max(1.0) + 1.0) else {
        return;
    };
    if let Some(mut mask) = Mask::covering(canvas.dimensions(), bounds) {
        mask.stroke_polyline(points, width);
        mask.paint(canvas, color, opacity);
    }
}

/// Draw `image` scaled into the rectangle at (`x`, `y`) of size `w` × `h` pixels.
pub(crate) fn draw_image(
    canvas: &mut RgbaImage,
    image: &RgbaImage,
    x: f32,
    y: f32,
    w: f32,
    h: f32,
    opacity: f32,
) {
    let tw = w.round().max(1.0);
    let th = h.round().max(1.0);
    if !(tw.is_finite() && th.is_finite()) || tw > 32_768.0 || th > 32_768.0 {
        return;
    }
    if tw as u64 * th as u64 > MAX_PIXELS {
        return;
    }
    let (tw, th) = (tw as u32, th as u32);

    let scaled;
    let source = if image.dimensions() == (tw, th) {
        image
    } else {
        scaled = imageops::resize(image, tw, th, FilterType::Triangle);
        &scaled
    };

    let (cw, ch) = canvas.dimensions();
    let left = x.round() as i64;
    let top = y.round() as i64;
    for (sx, sy, pixel) in source.enumerate_pixels() {
        let cx = left + sx as i64;
        let cy = top + sy as i64;
        if cx >= 0 && cy >= 0 && (cx as u32) < cw && (cy as u32) < ch {
            blend(canvas.get_pixel_mut(cx as u32, cy as u32), *pixel, opacity);
        }
    }
}

fn layout<F: FnMut(GlyphId, f32)>(font: &FontRef<'_>, px: f32, text: &str, mut place: F) -> f32 {
    let scaled = font.as_scaled(PxScale::from(px));
    let mut caret = 0.0;
    let mut last: Option<GlyphId> = None;
    for ch in text.chars() {
        let id = scaled.glyph_id(ch);
        if let Some(prev) = last {
            caret += scaled.kern(prev, id);
        }
        place(id, caret);
        caret += scaled.h_advance(id);
        last = Some(id);
    }
    caret
}

/// Width in pixels of `text` set at `px` pixels.
pub(crate) fn text_width(font: &FontRef<'_>, px: f32, text: &str) -> f32 {
    layout(font, px, text, |_, _| {})
}

/// Ascent in pixels of `font` at `px` pixels.
pub(crate) fn ascent(font: &FontRef<'_>, px: f32) -> f32 {
    font.as_scaled(PxScale::from(px)).ascent()
}

/// Draw one line of text with its baseline at `baseline`; returns the advance width.
pub(crate) fn draw_text(
    canvas: &mut RgbaImage,
    font: &FontRef<'_>,
    px: f32,
    x: f32,
    baseline: f32,
    color: Rgba<u8>,
    text: &str,
) -> f32 {
    let (cw, ch) = canvas.dimensions();
    layout(font, px, text, |id, offset| {
        let glyph = id.with_scale_and_position(px, point(x + offset, baseline));
        if let Some(outlined) = font.outline_glyph(glyph) {
            let bounds = outlined.px_bounds();
            outlined.draw(|gx, gy, coverage| {
                let cx = bounds.min.x as i64 + gx as i64;
                let cy = bounds.min.y as i64 + gy as i64;
                if cx >= 0 && cy >= 0 && (cx as u32) < cw && (cy as u32) < ch {
                    blend(canvas.get_pixel_mut(cx as u32, cy as u32), color, coverage);
                }
            });
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fonts::FontFamily;

    #[test]
    fn blend_opaque_source_replaces_destination() {
        let mut dst = Rgba([10, 20, 30, 255]);
        blend(&mut dst, Rgba([200, 100, 0, 255]), 1.0);
        assert_eq!(dst, Rgba([200, 100, 0, 255]));
    }

    #[test]
    fn blend_half_opacity_mixes_channels() {
        let mut dst = WHITE;
        blend(&mut dst, Rgba([0, 0, 0, 255]), 0.5);
        assert!(dst.0[0] > 120 && dst.0[0] < 135);
        assert_eq!(dst.0[3], 255);
    }

    #[test]
    fn blend_onto_transparent_keeps_source_color() {
        let mut dst = TRANSPARENT;
        blend(&mut dst, Rgba([255, 255, 0, 255]), 0.5);
        assert_eq!(&dst.0[..3], &[255, 255, 0]);
        assert!(dst.0[3] > 120 && dst.0[3] < 135);
    }

    #[test]
    fn polygon_fill_stays_inside_bounds() {
        let mut canvas = RgbaImage::from_pixel(20, 20, WHITE);
        fill_polygon(
            &mut canvas,
            &[(5.0, 5.0), (15.0, 5.0), (15.0, 15.0), (5.0, 15.0), (5.0, 5.0)],
            Rgba([0, 0, 0, 255]),
            1.0,
        );
        assert_eq!(canvas.get_pixel(10, 10), &Rgba([0, 0, 0, 255]));
        assert_eq!(canvas.get_pixel(1, 1), &WHITE);
        assert_eq!(canvas.get_pixel(18, 18), &WHITE);
    }

    #[test]
    fn overlapping_stroke_segments_do_not_stack_opacity() {
        let mut canvas = RgbaImage::from_pixel(40, 40, WHITE);
        let color = Rgba([0, 0, 0, 255]);
        stroke_polyline(&mut canvas, &[(5.0, 20.0), (35.0, 20.0), (5.0, 20.0)], 6.0, color, 0.5);
        let value = canvas.get_pixel(20, 20).0[0];
        assert!(value > 120 && value < 135, "got {}", value);
    }

    #[test]
    fn shapes_outside_canvas_are_ignored() {
        let mut canvas = RgbaImage::from_pixel(10, 10, WHITE);
        fill_polygon(
            &mut canvas,
            &[(50.0, 50.0), (60.0, 50.0), (60.0, 60.0)],
            Rgba([0, 0, 0, 255]),
            1.0,
        );
        assert!(canvas.pixels().all(|p| *p == WHITE));
    }

    #[test]
    fn even_odd_fill_leaves_nested_square_empty() {
        let square = |a: f32, b: f32| vec![(a, a), (b, a), (b, b), (a, b), (a, a)];
        let subpaths = vec![square(2.0, 28.0), square(10.0, 20.0)];
        let mut canvas = RgbaImage::from_pixel(30, 30, WHITE);
        let mut mask = Mask::covering(canvas.dimensions(), (0.0, 0.0, 30.0, 30.0)).unwrap();
        mask.fill_even_odd(&subpaths);
        mask.paint(&mut canvas, Rgba([0, 0, 0, 255]), 1.0);

        assert_eq!(canvas.get_pixel(15, 15), &WHITE);
        assert_eq!(canvas.get_pixel(5, 15), &Rgba([0, 0, 0, 255]));
        assert_eq!(canvas.get_pixel(0, 0), &WHITE);
    }

    #[test]
    fn huge_stroke_width_is_limited_to_the_canvas() {
        let mut canvas = RgbaImage::from_pixel(16, 16, WHITE);
        let color = Rgba([0, 0, 0, 255]);
        stroke_polyline(&mut canvas, &[(8.0, 8.0)], 1.0e12, color, 1.0);
        stroke_polyline(&mut canvas, &[(0.0, 0.0), (15.0, 15.0)], f32::MAX, color, 1.0);
        assert!(canvas.pixels().all(|p| *p == color));
    }

    #[test]
    fn draw_image_skips_targets_over_the_pixel_cap() {
        let mut canvas = RgbaImage::from_pixel(8, 8, WHITE);
        let red = RgbaImage::from_pixel(1, 1, Rgba([255, 0, 0, 255]));
        draw_image(&mut canvas, &red, 0.0, 0.0, 20_000.0, 20_000.0, 1.0);
        assert!(canvas.pixels().all(|p| *p == WHITE));
    }

    #[test]
    fn draw_image_scales_to_target_rect() {
        let mut canvas = RgbaImage::from_pixel(20, 20, WHITE);
        let red = RgbaImage::from_pixel(2, 2, Rgba([255, 0, 0, 255]));
        draw_image(&mut canvas, &red, 4.0, 4.0, 8.0, 8.0, 1.0);
        let inside = canvas.get_pixel(8, 8);
        assert!(inside.0[0] > 250 && inside.0[1] < 5, "got {:?}", inside);
        assert_eq!(canvas.get_pixel(14, 14), &WHITE);
    }

    #[test]
    fn draw_text_marks_pixels_and_reports_width() {
        let font = FontFamily::Arial.font().unwrap();
        let mut canvas = RgbaImage::from_pixel(120, 40, WHITE);
        let advance = draw_text(&mut canvas, &font, 24.0, 4.0, 30.0, Rgba([0, 0, 0, 255]), "Hello");
        assert!(advance > 30.0);
        assert!((advance - text_width(&font, 24.0, "Hello")).abs() < 0.01);
        assert!(canvas.pixels().any(|p| p.0[0] < 128));
    }
}
