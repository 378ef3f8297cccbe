//! Symbol recognition: turn one region's ink into ranked glyph hypotheses.
//!
//! ## Why a budget instead of cancellation?
//!
//! Recognition runs on a blocking thread. Dropping the future that awaits a
//! `spawn_blocking` task does not stop the thread, so the recogniser checks
//! a [`Budget`] between glyphs and bails out with
//! [`RegionError::RecognitionTimeout`] on its own. The async caller still
//! enforces the same deadline with `tokio::time::timeout`.

use crate::config::RecognizerConfig;
use crate::error::RegionError;
use crate::geometry::BBox;
use crate::pipeline::components::{ink_components, InkComponent, Window};
use crate::pipeline::detect::Region;
use crate::pipeline::ingest::Image;
use crate::pipeline::templates::{builtin_templates, GlyphTemplate, InkGrid};
use crate::symbols::Symbol;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::debug;

/// Time allowance for recognising one region.
#[derive(Debug, Clone, Copy)]
pub struct Budget {
    deadline: Option<Instant>,
    budget_ms: u64,
}

impl Budget {
    pub fn new(budget: Duration) -> Self {
        Self {
            deadline: Instant::now().checked_add(budget),
            budget_ms: budget.as_millis() as u64,
        }
    }

    /// A budget that never runs out.
    pub fn unlimited() -> Self {
        Self {
            deadline: None,
            budget_ms: u64::MAX,
        }
    }

    pub fn budget_ms(&self) -> u64 {
        self.budget_ms
    }

    pub fn is_expired(&self) -> bool {
        self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    pub fn check(&self, region: usize) -> Result<(), RegionError> {
        if self.is_expired() {
            Err(RegionError::RecognitionTimeout {
                region,
                budget_ms: self.budget_ms,
            })
        } else {
            Ok(())
        }
    }
}

/// One candidate reading of a glyph.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SymbolHypothesis {
    pub symbol: Symbol,
    /// Relative to the region's top-left corner.
    pub bbox: BBox,
    pub confidence: f32,
}

/// A glyph position with its hypotheses, best first. Never empty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Glyph {
    pub bbox: BBox,
    hypotheses: Vec<SymbolHypothesis>,
}

impl Glyph {
    /// Sorts `(symbol, confidence)` candidates by descending confidence with
    /// alphabet order breaking ties. Returns `None` when there are none.
    pub fn new(bbox: BBox, candidates: Vec<(Symbol, f32)>) -> Option<Self> {
        if candidates.is_empty() {
            return None;
        }
        let mut hypotheses: Vec<SymbolHypothesis> = candidates
            .into_iter()
            .map(|(symbol, confidence)| SymbolHypothesis {
                symbol,
                bbox,
                confidence: confidence.clamp(0.0, 1.0),
            })
            .collect();
        hypotheses.sort_by(|a, b| {
            b.confidence
                .total_cmp(&a.confidence)
                .then(a.symbol.cmp(&b.symbol))
        });
        Some(Self { bbox, hypotheses })
    }

    pub fn best(&self) -> &SymbolHypothesis {
        &self.hypotheses[0]
    }

    pub fn hypotheses(&self) -> &[SymbolHypothesis] {
        &self.hypotheses
    }

    pub fn alternates(&self) -> &[SymbolHypothesis] {
        &self.hypotheses[1..]
    }
}

/// Produces glyph hypotheses for one region.
///
/// Glyphs are returned left-to-right, then top-to-bottom, with bounding
/// boxes relative to the region.
pub trait SymbolRecognizer: Send + Sync {
    fn recognize(
        &self,
        image: &Image,
        region: &Region,
        config: &RecognizerConfig,
        budget: &Budget,
    ) -> Result<Vec<Glyph>, RegionError>;
}

/// Template-matching recogniser over 8-connected ink components.
#[derive(Debug, Clone)]
pub struct TemplateRecognizer {
    templates: Vec<GlyphTemplate>,
}

impl Default for TemplateRecognizer {
    fn default() -> Self {
        Self {
            templates: builtin_templates().to_vec(),
        }
    }
}

impl TemplateRecognizer {
    pub fn with_templates(templates: Vec<GlyphTemplate>) -> Self {
        Self { templates }
    }

    pub fn push(&mut self, template: GlyphTemplate) {
        self.templates.push(template);
    }

    /// Best score per symbol, top `k` kept.
    fn classify(&self, grid: &InkGrid, k: usize) -> Vec<(Symbol, f32)> {
        let mut best: HashMap<Symbol, f32> = HashMap::new();
        for t in &self.templates {
            let score = grid.similarity(t.grid());
            let slot = best.entry(t.symbol).or_insert(0.0);
            if score > *slot {
                *slot = score;
            }
        }
        let mut ranked: Vec<(Symbol, f32)> = best.into_iter().filter(|(_, s)| *s > 0.0).collect();
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
        ranked.truncate(k.max(1));
        ranked
    }
}

impl SymbolRecognizer for TemplateRecognizer {
    fn recognize(
        &self,
        image: &Image,
        region: &Region,
        config: &RecognizerConfig,
        budget: &Budget,
    ) -> Result<Vec<Glyph>, RegionError> {
        budget.check(region.index)?;
        let components = ink_components(
            image,
            Window::from_bbox(image, &region.bbox),
            config.ink_threshold,
            config.min_glyph_pixels.max(1),
        );
        let origin = (region.bbox.x0, region.bbox.y0);
        let relative = |b: &BBox| BBox::new(b.x0 - origin.0, b.y0 - origin.1, b.x1 - origin.0, b.y1 - origin.1);

        let bars: Vec<bool> = components.iter().map(|c| is_bar(c, config)).collect();
        let pairs = pair_equals(&components, &bars, config);

        let mut glyphs = Vec::with_capacity(components.len());
        let mut consumed = vec![false; components.len()];
        for &(top, bottom) in &pairs {
            consumed[top] = true;
            consumed[bottom] = true;
            let bbox = relative(&components[top].bbox.union(&components[bottom].bbox));
            let confidence = components[top].fill().min(components[bottom].fill());
            glyphs.extend(Glyph::new(bbox, vec![(Symbol::EQUALS, confidence)]));
        }

        for (i, comp) in components.iter().enumerate() {
            if consumed[i] {
                continue;
            }
            budget.check(region.index)?;
            let bbox = relative(&comp.bbox);
            let candidates = if bars[i] {
                vec![(Symbol::MINUS, comp.fill())]
            } else {
                self.classify(&component_grid(comp), config.top_k)
            };
            match Glyph::new(bbox, candidates) {
                Some(glyph) => glyphs.push(glyph),
                None => debug!(region = region.index, x = bbox.x0, y = bbox.y0, "Component matched no template"),
            }
        }

        glyphs.sort_by(|a, b| {
            a.bbox
                .x0
                .total_cmp(&b.bbox.x0)
                .then(a.bbox.y0.total_cmp(&b.bbox.y0))
        });
        debug!(
            region = region.index,
            components = components.len(),
            glyphs = glyphs.len(),
            "Region recognised"
        );
        Ok(glyphs)
    }
}

fn is_bar(comp: &InkComponent, config: &RecognizerConfig) -> bool {
    let (w, h) = (comp.bbox.width(), comp.bbox.height());
    h > 0.0 && w / h >= config.bar_aspect_ratio && comp.fill() >= config.min_bar_fill
}

/// Two bars of similar width stacked closely with nothing between them.
fn pair_equals(
    components: &[InkComponent],
    bars: &[bool],
    config: &RecognizerConfig,
) -> Vec<(usize, usize)> {
    let mut order: Vec<usize> = (0..components.len()).filter(|&i| bars[i]).collect();
    order.sort_by(|&a, &b| {
        let (a, b) = (&components[a].bbox, &components[b].bbox);
        a.y0.total_cmp(&b.y0).then(a.x0.total_cmp(&b.x0))
    });

    let mut used = vec![false; components.len()];
    let mut pairs = Vec::new();
    for (pos, &i) in order.iter().enumerate() {
        if used[i] {
            continue;
        }
        let top = &components[i].bbox;
        let partner = order[pos + 1..].iter().copied().find(|&j| {
            if used[j] {
                return false;
            }
            let bottom = &components[j].bbox;
            let widest = top.width().max(bottom.width());
            let gap = bottom.y0 - top.y1;
            gap >= 0.0
                && gap <= config.equals_gap_ratio * widest
                && top.horizontal_overlap(bottom) >= 0.5 * widest
                && !components.iter().enumerate().any(|(k, c)| {
                    k != i
                        && k != j
                        && c.bbox.y0 >= top.y1
                        && c.bbox.y1 <= bottom.y0
                        && c.bbox.horizontal_overlap(&top.union(bottom)) > 0.0
                })
        });
        if let Some(j) = partner {
            used[i] = true;
            used[j] = true;
            pairs.push((i, j));
        }
    }
    pairs
}

/// The component's own pixels resampled to the template grid. Other ink
/// inside its bounding box (a radicand under a radical sign) is ignored.
fn component_grid(comp: &InkComponent) -> InkGrid {
    let x0 = comp.bbox.x0 as u32;
    let y0 = comp.bbox.y0 as u32;
    let w = comp.bbox.width() as u32;
    let h = comp.bbox.height() as u32;
    let mut mask = vec![false; (w as usize) * (h as usize)];
    for &(x, y) in &comp.pixels {
        mask[((y - y0) * w + (x - x0)) as usize] = true;
    }
    InkGrid::sample(w, h, |x, y| mask[(y * w + x) as usize])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::templates::builtin_art;
    use image::{GrayImage, Luma};

    fn sym(name: &str) -> Symbol {
        Symbol::from_name(name).unwrap()
    }

    fn draw_art(img: &mut GrayImage, art: &[&str], x0: u32, y0: u32, scale: u32) {
        for (ry, row) in art.iter().enumerate() {
            for (rx, c) in row.chars().enumerate() {
                if c != '#' {
                    continue;
                }
                for dy in 0..scale {
                    for dx in 0..scale {
                        img.put_pixel(x0 + rx as u32 * scale + dx, y0 + ry as u32 * scale + dy, Luma([0]));
                    }
                }
            }
        }
    }

    fn draw_glyph(img: &mut GrayImage, name: &str, x0: u32, y0: u32, scale: u32) {
        draw_art(img, builtin_art(sym(name)).unwrap(), x0, y0, scale);
    }

    fn bar(img: &mut GrayImage, x0: u32, y0: u32, w: u32, h: u32) {
        for y in y0..y0 + h {
            for x in x0..x0 + w {
                img.put_pixel(x, y, Luma([0]));
            }
        }
    }

    fn whole(img: &GrayImage) -> Region {
        Region::new(BBox::new(0.0, 0.0, img.width() as f32, img.height() as f32), 1.0)
    }

    fn recognize(img: GrayImage) -> Vec<Glyph> {
        let region = whole(&img);
        TemplateRecognizer::default()
            .recognize(
                &Image::from_luma(img),
                &region,
                &RecognizerConfig::default(),
                &Budget::unlimited(),
            )
            .unwrap()
    }

    #[test]
    fn hypotheses_sort_by_confidence_then_alphabet() {
        let glyph = Glyph::new(
            BBox::new(0.0, 0.0, 1.0, 1.0),
            vec![(sym("b"), 0.5), (sym("a"), 0.5), (sym("c"), 0.9)],
        )
        .unwrap();
        let order: Vec<&str> = glyph.hypotheses().iter().map(|h| h.symbol.name()).collect();
        assert_eq!(order, vec!["c", "a", "b"]);
        assert_eq!(glyph.best().symbol, sym("c"));
        assert_eq!(glyph.alternates().len(), 2);
        assert!(Glyph::new(BBox::new(0.0, 0.0, 1.0, 1.0), Vec::new()).is_none());
    }

    #[test]
    fn recognises_scaled_templates() {
        let mut img = GrayImage::from_pixel(120, 40, Luma([255]));
        draw_glyph(&mut img, "x", 5, 5, 3);
        draw_glyph(&mut img, "plus", 40, 5, 3);
        draw_glyph(&mut img, "2", 75, 5, 4);
        let glyphs = recognize(img);
        let best: Vec<&str> = glyphs.iter().map(|g| g.best().symbol.name()).collect();
        assert_eq!(best, vec!["x", "plus", "2"]);
        assert!(glyphs.iter().all(|g| g.best().confidence == 1.0));
        assert!(glyphs.iter().all(|g| g.hypotheses().len() <= 3));
    }

    #[test]
    fn bars_become_minus_and_stacked_bars_equals() {
        let mut img = GrayImage::from_pixel(100, 40, Luma([255]));
        bar(&mut img, 5, 18, 20, 3);
        bar(&mut img, 40, 14, 20, 3);
        bar(&mut img, 40, 22, 20, 3);
        let glyphs = recognize(img);
        let best: Vec<Symbol> = glyphs.iter().map(|g| g.best().symbol).collect();
        assert_eq!(best, vec![Symbol::MINUS, Symbol::EQUALS]);
        assert_eq!(glyphs[1].bbox, BBox::new(40.0, 14.0, 60.0, 25.0));
    }

    #[test]
    fn fraction_bar_with_content_between_is_not_equals() {
        let mut img = GrayImage::from_pixel(60, 60, Luma([255]));
        bar(&mut img, 5, 5, 30, 2);
        draw_glyph(&mut img, "x", 12, 12, 2);
        bar(&mut img, 5, 30, 30, 2);
        let glyphs = recognize(img);
        let minus = glyphs.iter().filter(|g| g.best().symbol == Symbol::MINUS).count();
        assert_eq!(minus, 2);
    }

    #[test]
    fn glyph_boxes_are_region_relative() {
        let mut img = GrayImage::from_pixel(80, 80, Luma([255]));
        draw_glyph(&mut img, "x", 40, 30, 2);
        let region = Region::new(BBox::new(30.0, 20.0, 80.0, 80.0), 1.0);
        let glyphs = TemplateRecognizer::default()
            .recognize(
                &Image::from_luma(img),
                &region,
                &RecognizerConfig::default(),
                &Budget::unlimited(),
            )
            .unwrap();
        assert_eq!(glyphs[0].bbox, BBox::new(10.0, 10.0, 20.0, 20.0));
        assert_eq!(glyphs[0].best().bbox, glyphs[0].bbox);
    }

    #[test]
    fn expired_budget_times_out() {
        let mut img = GrayImage::from_pixel(20, 20, Luma([255]));
        draw_glyph(&mut img, "x", 2, 2, 2);
        let region = Region {
            index: 4,
            ..whole(&img)
        };
        let err = TemplateRecognizer::default()
            .recognize(
                &Image::from_luma(img),
                &region,
                &RecognizerConfig::default(),
                &Budget::new(Duration::ZERO),
            )
            .unwrap_err();
        assert_eq!(err, RegionError::RecognitionTimeout { region: 4, budget_ms: 0 });
    }

    #[test]
    fn recognition_is_deterministic() {
        let mut img = GrayImage::from_pixel(80, 40, Luma([255]));
        draw_glyph(&mut img, "a", 3, 3, 3);
        draw_glyph(&mut img, "7", 30, 3, 2);
        let a = recognize(img.clone());
        let b = recognize(img);
        assert_eq!(a, b);
    }
}
