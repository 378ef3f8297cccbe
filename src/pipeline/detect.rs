//! Region detection: find the rectangles that hold one formula each.
//!
//! ## Two halves
//!
//! A [`RegionDetector`] only proposes *candidates*. Every detector's output
//! then goes through [`finalize_regions`], which applies the same
//! post-processing regardless of where the candidates came from:
//!
//! 1. drop candidates below `min_confidence`;
//! 2. greedy IoU suppression in descending confidence order, so an
//!    overlapping pair collapses onto the higher-confidence box;
//! 3. keep at most `max_regions`;
//! 4. sort into reading order and assign indices.
//!
//! Keeping the post-processing out of the trait means a custom detector
//! cannot accidentally break the ordering guarantees downstream stages rely
//! on.
//!
//! ## Default detector
//!
//! [`InkRegionDetector`] binarises the page, extracts 8-connected ink
//! components and groups components that lie within a gap proportional to
//! the median component height. Each group becomes one candidate scored by
//! ink mass and density: tiny specks score low, and so do solid blobs
//! (smudges, shadows) that are far denser than pen strokes.

use crate::config::DetectorConfig;
use crate::geometry::BBox;
use crate::pipeline::components::{ink_components, InkComponent, Window};
use crate::pipeline::ingest::Image;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// A rectangle of the page expected to hold a single formula.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Region {
    /// Position in reading order, 0-based.
    pub index: usize,
    pub bbox: BBox,
    /// Detection confidence in `[0, 1]`.
    pub confidence: f32,
}

impl Region {
    pub fn new(bbox: BBox, confidence: f32) -> Self {
        Self {
            index: 0,
            bbox,
            confidence: confidence.clamp(0.0, 1.0),
        }
    }

    pub fn x(&self) -> f32 {
        self.bbox.x0
    }

    pub fn y(&self) -> f32 {
        self.bbox.y0
    }

    pub fn width(&self) -> f32 {
        self.bbox.width()
    }

    pub fn height(&self) -> f32 {
        self.bbox.height()
    }
}

/// Proposes candidate regions for an image.
///
/// Implementations must be deterministic: the same image and config always
/// yield the same candidates.
pub trait RegionDetector: Send + Sync {
    fn detect(&self, image: &Image, config: &DetectorConfig) -> Vec<Region>;
}

/// Connected-component ink grouping.
#[derive(Debug, Clone, Copy, Default)]
pub struct InkRegionDetector;

impl RegionDetector for InkRegionDetector {
    fn detect(&self, image: &Image, config: &DetectorConfig) -> Vec<Region> {
        let components = ink_components(
            image,
            Window::full(image),
            config.ink_threshold,
            config.min_component_pixels.max(1),
        );
        if components.is_empty() {
            return Vec::new();
        }

        let gap = grouping_gap(&components, config);
        let groups = group_components(&components, gap);
        debug!(
            components = components.len(),
            groups = groups.len(),
            gap,
            "Ink components grouped"
        );

        let page = BBox::new(0.0, 0.0, image.width() as f32, image.height() as f32);
        groups
            .iter()
            .map(|members| {
                let bbox = BBox::enclosing(members.iter().map(|&i| &components[i].bbox))
                    .unwrap_or(page);
                let ink: usize = members.iter().map(|&i| components[i].len()).sum();
                let confidence = score_group(ink, &bbox, config);
                let padded = clip(&bbox.expand(config.padding as f32), &page);
                Region::new(padded, confidence)
            })
            .collect()
    }
}

/// Grouping distance: `region_gap_ratio × median component height`, never
/// below `min_region_gap`.
fn grouping_gap(components: &[InkComponent], config: &DetectorConfig) -> f32 {
    let mut heights: Vec<f32> = components.iter().map(|c| c.bbox.height()).collect();
    heights.sort_by(f32::total_cmp);
    let median = heights[heights.len() / 2];
    (median * config.region_gap_ratio).max(config.min_region_gap as f32)
}

/// Union-find over components whose boxes are within `gap` on both axes.
/// Groups are returned in order of their first member.
fn group_components(components: &[InkComponent], gap: f32) -> Vec<Vec<usize>> {
    fn root(parent: &mut [usize], mut i: usize) -> usize {
        while parent[i] != i {
            parent[i] = parent[parent[i]];
            i = parent[i];
        }
        i
    }

    let n = components.len();
    let mut parent: Vec<usize> = (0..n).collect();
    for i in 0..n {
        let grown = components[i].bbox.expand(gap);
        for j in (i + 1)..n {
            if grown.touches(&components[j].bbox) {
                let (a, b) = (root(&mut parent, i), root(&mut parent, j));
                if a != b {
                    parent[a.max(b)] = a.min(b);
                }
            }
        }
    }

    let mut groups: Vec<Vec<usize>> = Vec::new();
    let mut slot = vec![usize::MAX; n];
    for i in 0..n {
        let r = root(&mut parent, i);
        if slot[r] == usize::MAX {
            slot[r] = groups.len();
            groups.push(Vec::new());
        }
        groups[slot[r]].push(i);
    }
    groups
}

/// Ink mass saturates quickly; density is only penalised above typical
/// stroke coverage.
fn score_group(ink_pixels: usize, bbox: &BBox, config: &DetectorConfig) -> f32 {
    let mass = ink_pixels as f32;
    let size_score = mass / (mass + config.score_half_mass);
    let density = if bbox.area() > 0.0 {
        mass / bbox.area()
    } else {
        1.0
    };
    let limit = config.max_ink_density;
    let density_score = if density <= limit {
        1.0
    } else {
        1.0 - (density - limit) / (1.0 - limit) * config.density_penalty
    };
    (size_score * density_score).clamp(0.0, 1.0)
}

fn clip(bbox: &BBox, page: &BBox) -> BBox {
    BBox::new(
        bbox.x0.max(page.x0),
        bbox.y0.max(page.y0),
        bbox.x1.min(page.x1),
        bbox.y1.min(page.y1),
    )
}

/// Shared post-processing for any detector's candidates.
pub fn finalize_regions(candidates: Vec<Region>, config: &DetectorConfig) -> Vec<Region> {
    let mut kept: Vec<Region> = candidates
        .into_iter()
        .filter(|r| r.confidence >= config.min_confidence)
        .collect();

    // Descending confidence, position as a deterministic tie-break.
    kept.sort_by(|a, b| {
        b.confidence
            .total_cmp(&a.confidence)
            .then(a.bbox.y0.total_cmp(&b.bbox.y0))
            .then(a.bbox.x0.total_cmp(&b.bbox.x0))
    });

    let mut suppressed = vec![false; kept.len()];
    let mut survivors: Vec<Region> = Vec::new();
    for i in 0..kept.len() {
        if suppressed[i] {
            continue;
        }
        if survivors.len() >= config.max_regions {
            break;
        }
        survivors.push(kept[i]);
        for j in (i + 1)..kept.len() {
            if !suppressed[j] && kept[i].bbox.iou(&kept[j].bbox) > config.iou_threshold {
                suppressed[j] = true;
            }
        }
    }

    let mut ordered = reading_order(survivors);
    for (index, region) in ordered.iter_mut().enumerate() {
        region.index = index;
    }
    ordered
}

/// Top-to-bottom by line, then left-to-right within a line. A region joins
/// the current line when its vertical centre falls inside the line's span.
fn reading_order(mut regions: Vec<Region>) -> Vec<Region> {
    regions.sort_by(|a, b| {
        a.bbox
            .y0
            .total_cmp(&b.bbox.y0)
            .then(a.bbox.x0.total_cmp(&b.bbox.x0))
    });

    let mut lines: Vec<(f32, f32, Vec<Region>)> = Vec::new();
    for region in regions {
        let cy = region.bbox.center_y();
        match lines.last_mut() {
            Some((top, bottom, members)) if cy >= *top && cy <= *bottom => {
                *bottom = bottom.max(region.bbox.y1);
                members.push(region);
            }
            _ => lines.push((region.bbox.y0, region.bbox.y1, vec![region])),
        }
    }

    lines
        .into_iter()
        .flat_map(|(_, _, mut members)| {
            members.sort_by(|a, b| a.bbox.x0.total_cmp(&b.bbox.x0));
            members
        })
        .collect()
}
