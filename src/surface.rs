//! 2D drawing surfaces for overlays.

use image::{Rgba, RgbaImage};

use crate::types::{BoundingBox, Point, Size};

pub type Color = Rgba<u8>;

pub const TRANSPARENT: Color = Rgba([0, 0, 0, 0]);

/// Minimal drawing API the overlay renderer needs.
pub trait DrawingSurface {
    fn size(&self) -> Size;

    /// Reset every pixel to transparent.
    fn clear(&mut self);

    fn stroke_rect(&mut self, rect: &BoundingBox, color: Color, thickness: u32);

    fn fill_rect(&mut self, rect: &BoundingBox, color: Color);

    fn fill_circle(&mut self, center: Point, radius: f32, color: Color);

    fn draw_line(&mut self, from: Point, to: Point, color: Color);
}

/// An RGBA raster surface. Colors with alpha below 255 are blended over the
/// existing pixel.
#[derive(Debug, Clone)]
pub struct RasterSurface {
    image: RgbaImage,
}

impl RasterSurface {
    pub fn new(size: Size) -> Self {
        Self {
            image: RgbaImage::new(size.width, size.height),
        }
    }

    pub fn from_image(image: RgbaImage) -> Self {
        Self { image }
    }

    /// Blend another image on top, anchored at the top-left corner.
    pub fn draw_image(&mut self, top: &RgbaImage) {
        for (x, y, pixel) in top.enumerate_pixels() {
            self.blend(x as i32, y as i32, *pixel);
        }
    }

    pub fn image(&self) -> &RgbaImage {
        &self.image
    }

    pub fn into_image(self) -> RgbaImage {
        self.image
    }

    pub fn pixel(&self, x: u32, y: u32) -> Option<Color> {
        if x < self.image.width() && y < self.image.height() {
            Some(*self.image.get_pixel(x, y))
        } else {
            None
        }
    }

    /// True when no pixel has any opacity.
    pub fn is_blank(&self) -> bool {
        self.image.pixels().all(|p| p[3] == 0)
    }

    fn blend(&mut self, x: i32, y: i32, color: Color) {
        let (w, h) = self.image.dimensions();
        if x < 0 || y < 0 || x >= w as i32 || y >= h as i32 {
            return;
        }
        let dst = self.image.get_pixel_mut(x as u32, y as u32);
        *dst = blend_over(*dst, color);
    }
}

/// Porter-Duff "source over" for straight (non-premultiplied) alpha.
fn blend_over(dst: Color, src: Color) -> Color {
    let sa = src[3] as f32 / 255.0;
    if sa >= 1.0 {
        return src;
    }
    if sa <= 0.0 {
        return dst;
    }
    let da = dst[3] as f32 / 255.0;
    let out_a = sa + da * (1.0 - sa);
    let channel = |i: usize| {
        let c = (src[i] as f32 * sa + dst[i] as f32 * da * (1.0 - sa)) / out_a;
        c.round().clamp(0.0, 255.0) as u8
    };
    Rgba([channel(0), channel(1), channel(2), (out_a * 255.0).round() as u8])
}

impl DrawingSurface for RasterSurface {
    fn size(&self) -> Size {
        Size::new(self.image.width(), self.image.height())
    }

    fn clear(&mut self) {
        for p in self.image.pixels_mut() {
            *p = TRANSPARENT;
        }
    }

    fn stroke_rect(&mut self, rect: &BoundingBox, color: Color, thickness: u32) {
        let x = rect.x.round() as i32;
        let y = rect.y.round() as i32;
        let w = rect.width.round() as i32;
        let h = rect.height.round() as i32;
        if w <= 0 || h <= 0 {
            return;
        }
        let t = (thickness.max(1) as i32).min(w).min(h);

        // Top and bottom bands
        for dy in 0..t {
            for dx in 0..w {
                self.blend(x + dx, y + dy, color);
                self.blend(x + dx, y + h - 1 - dy, color);
            }
        }

        // Left and right bands, skipping rows already covered
        for dy in t..h - t {
            for dx in 0..t {
                self.blend(x + dx, y + dy, color);
                self.blend(x + w - 1 - dx, y + dy, color);
            }
        }
    }

    fn fill_rect(&mut self, rect: &BoundingBox, color: Color) {
        let x0 = rect.x.round() as i32;
        let y0 = rect.y.round() as i32;
        let x1 = rect.right().round() as i32;
        let y1 = rect.bottom().round() as i32;
        for y in y0..y1 {
            for x in x0..x1 {
                self.blend(x, y, color);
            }
        }
    }

    fn fill_circle(&mut self, center: Point, radius: f32, color: Color) {
        let cx = center.x.round() as i32;
        let cy = center.y.round() as i32;
        let r = radius.round().max(0.0) as i32;

        for dy in -r..=r {
            for dx in -r..=r {
                if dx * dx + dy * dy <= r * r {
                    self.blend(cx + dx, cy + dy, color);
                }
            }
        }
    }

    fn draw_line(&mut self, from: Point, to: Point, color: Color) {
        let (x0, y0) = (from.x.round() as i32, from.y.round() as i32);
        let (x1, y1) = (to.x.round() as i32, to.y.round() as i32);

        // Bresenham
        let dx = (x1 - x0).abs();
        let dy = (y1 - y0).abs();
        let sx = if x0 < x1 { 1 } else { -1 };
        let sy = if y0 < y1 { 1 } else { -1 };
        let mut err = dx - dy;

        let mut x = x0;
        let mut y = y0;

        loop {
            self.blend(x, y, color);

            if x == x1 && y == y1 {
                break;
            }

            let e2 = 2 * err;
            if e2 > -dy {
                err -= dy;
                x += sx;
            }
            if e2 < dx {
                err += dx;
                y += sy;
            }
        }
    }
}
