//! 8-connected ink components, shared by the detector and the recogniser.

use crate::geometry::BBox;
use crate::pipeline::ingest::Image;

/// One connected blob of ink pixels.
#[derive(Debug, Clone)]
pub struct InkComponent {
    /// Pixel-exclusive bounds (`x1`/`y1` one past the last ink pixel).
    pub bbox: BBox,
    /// Absolute image coordinates of every ink pixel.
    pub pixels: Vec<(u32, u32)>,
}

impl InkComponent {
    pub fn len(&self) -> usize {
        self.pixels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pixels.is_empty()
    }

    /// Share of the bounding box covered by ink.
    pub fn fill(&self) -> f32 {
        let area = self.bbox.area();
        if area <= 0.0 {
            0.0
        } else {
            self.pixels.len() as f32 / area
        }
    }
}

/// Integer pixel window, clamped to the image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    pub x0: u32,
    pub y0: u32,
    pub x1: u32,
    pub y1: u32,
}

impl Window {
    pub fn full(image: &Image) -> Self {
        Self {
            x0: 0,
            y0: 0,
            x1: image.width(),
            y1: image.height(),
        }
    }

    /// The pixels covered by `bbox`, clamped to the image bounds.
    pub fn from_bbox(image: &Image, bbox: &BBox) -> Self {
        let clamp = |v: f32, max: u32| (v.max(0.0) as u32).min(max);
        Self {
            x0: clamp(bbox.x0.floor(), image.width()),
            y0: clamp(bbox.y0.floor(), image.height()),
            x1: clamp(bbox.x1.ceil(), image.width()),
            y1: clamp(bbox.y1.ceil(), image.height()),
        }
    }

    fn width(&self) -> u32 {
        self.x1.saturating_sub(self.x0)
    }

    fn height(&self) -> u32 {
        self.y1.saturating_sub(self.y0)
    }
}

/// Extract the 8-connected components of pixels darker than `threshold`
/// inside `window`, dropping components smaller than `min_pixels`.
///
/// Components come out in raster order of their first pixel, which makes
/// the result deterministic for identical input.
pub fn ink_components(
    image: &Image,
    window: Window,
    threshold: u8,
    min_pixels: u32,
) -> Vec<InkComponent> {
    let (w, h) = (window.width(), window.height());
    if w == 0 || h == 0 {
        return Vec::new();
    }
    let idx = |x: u32, y: u32| ((y - window.y0) * w + (x - window.x0)) as usize;
    let is_ink = |x: u32, y: u32| image.luma(x, y) < threshold;

    let mut visited = vec![false; (w as usize) * (h as usize)];
    let mut out = Vec::new();
    let mut stack: Vec<(u32, u32)> = Vec::new();

    for y in window.y0..window.y1 {
        for x in window.x0..window.x1 {
            if visited[idx(x, y)] || !is_ink(x, y) {
                continue;
            }
            visited[idx(x, y)] = true;
            stack.push((x, y));
            let mut pixels = Vec::new();
            let (mut min_x, mut min_y, mut max_x, mut max_y) = (x, y, x, y);

            while let Some((cx, cy)) = stack.pop() {
                pixels.push((cx, cy));
                min_x = min_x.min(cx);
                min_y = min_y.min(cy);
                max_x = max_x.max(cx);
                max_y = max_y.max(cy);

                let nx0 = cx.saturating_sub(1).max(window.x0);
                let ny0 = cy.saturating_sub(1).max(window.y0);
                let nx1 = (cx + 1).min(window.x1 - 1);
                let ny1 = (cy + 1).min(window.y1 - 1);
                for ny in ny0..=ny1 {
                    for nx in nx0..=nx1 {
                        let i = idx(nx, ny);
                        if !visited[i] && is_ink(nx, ny) {
                            visited[i] = true;
                            stack.push((nx, ny));
                        }
                    }
                }
            }

            if pixels.len() as u32 >= min_pixels {
                out.push(InkComponent {
                    bbox: BBox::new(
                        min_x as f32,
                        min_y as f32,
                        (max_x + 1) as f32,
                        (max_y + 1) as f32,
                    ),
                    pixels,
                });
            }
        }
    }
    out
}
