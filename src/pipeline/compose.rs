//! Structure composition: recognised glyphs → expression tree.
//!
//! The composer is a layout-driven recursive parse over *units*. A unit is
//! either a raw glyph or a finished sub-structure with a bounding box. Each
//! pass replaces a group of units with one composite unit, and the contents
//! of every composite are composed recursively with the same passes:
//!
//! 1. matrices (tall matching brackets around two or more rows);
//! 2. fractions (horizontal bars, widest first);
//! 3. radicals (widest sign first, so nested signs land in the radicand);
//! 4. big operators (right to left, so a body may contain another operator);
//! 5. a left-to-right baseline walk attaching superscripts and subscripts.
//!
//! ## Conservative bias
//!
//! When the layout is ambiguous the composer keeps units on the baseline. A
//! flat sequence with a wrong symbol is cheap to correct; a wrong structure
//! is not.

use crate::config::ComposerConfig;
use crate::geometry::BBox;
use crate::pipeline::recognize::Glyph;
use crate::symbols::Symbol;
use crate::tree::{Alternate, ExpressionNode, MatrixDelimiter};

#[derive(Debug, Clone)]
struct Unit {
    bbox: BBox,
    node: ExpressionNode,
    /// Set while the unit is still a bare glyph.
    raw: Option<Symbol>,
}

impl Unit {
    fn from_glyph(glyph: &Glyph) -> Self {
        let best = glyph.best();
        let alternates = glyph
            .alternates()
            .iter()
            .map(|h| Alternate {
                symbol: h.symbol,
                confidence: h.confidence,
            })
            .collect();
        Self {
            bbox: glyph.bbox,
            node: ExpressionNode::leaf_with_alternates(best.symbol, best.confidence, alternates),
            raw: Some(best.symbol),
        }
    }

    fn composite(bbox: BBox, node: ExpressionNode) -> Self {
        Self {
            bbox,
            node,
            raw: None,
        }
    }

    fn is(&self, symbol: Symbol) -> bool {
        self.raw == Some(symbol)
    }
}

/// Compose one region's glyphs into a formula root.
///
/// Zero glyphs compose to the empty sequence.
pub fn compose_region(glyphs: &[Glyph], config: &ComposerConfig) -> ExpressionNode {
    compose_units(glyphs.iter().map(Unit::from_glyph).collect(), config)
}

fn compose_units(mut units: Vec<Unit>, cfg: &ComposerConfig) -> ExpressionNode {
    if units.is_empty() {
        return ExpressionNode::empty();
    }
    while take_matrix(&mut units, cfg) {}
    while take_fraction(&mut units, cfg) {}
    while take_radical(&mut units, cfg) {}
    while take_big_operator(&mut units, cfg) {}
    baseline_walk(units, cfg)
}

/// Moves the units at `indices` out of `slots`, in index order.
fn drain(slots: &mut [Option<Unit>], indices: &[usize]) -> Vec<Unit> {
    indices.iter().filter_map(|&i| slots[i].take()).collect()
}

fn enclosing(bbox: BBox, units: &[&[Unit]]) -> BBox {
    units
        .iter()
        .flat_map(|group| group.iter())
        .fold(bbox, |acc, u| acc.union(&u.bbox))
}

fn median_height(units: &[Unit]) -> f32 {
    let mut heights: Vec<f32> = units.iter().map(|u| u.bbox.height()).collect();
    heights.sort_by(f32::total_cmp);
    heights.get(heights.len() / 2).copied().unwrap_or(0.0)
}

fn inside(outer: &BBox, u: &BBox) -> bool {
    let (cx, cy) = u.center();
    cx >= outer.x0 && cx <= outer.x1 && cy >= outer.y0 && cy <= outer.y1
}

// ── Matrices ─────────────────────────────────────────────────────────────

struct MatrixLayout {
    close: usize,
    /// `cells[row][column]` → unit indices.
    cells: Vec<Vec<Vec<usize>>>,
}

fn take_matrix(units: &mut Vec<Unit>, cfg: &ComposerConfig) -> bool {
    let median = median_height(units);
    let mut openers: Vec<usize> = (0..units.len())
        .filter(|&i| {
            units[i].raw.and_then(MatrixDelimiter::from_opening).is_some()
                && units[i].bbox.height() >= cfg.matrix_bracket_ratio * median
        })
        .collect();
    openers.sort_by(|&a, &b| {
        units[b]
            .bbox
            .height()
            .total_cmp(&units[a].bbox.height())
            .then(units[a].bbox.x0.total_cmp(&units[b].bbox.x0))
    });

    for open in openers {
        let Some(layout) = matrix_layout(units, open, median, cfg) else {
            continue;
        };
        let delimiter = units[open]
            .raw
            .and_then(MatrixDelimiter::from_opening)
            .unwrap_or(MatrixDelimiter::None);
        let bbox = units[open].bbox.union(&units[layout.close].bbox);

        let mut slots: Vec<Option<Unit>> = std::mem::take(units).into_iter().map(Some).collect();
        slots[open] = None;
        slots[layout.close] = None;
        let rows: Vec<Vec<ExpressionNode>> = layout
            .cells
            .iter()
            .map(|row| {
                row.iter()
                    .map(|cell| compose_units(drain(&mut slots, cell), cfg))
                    .collect()
            })
            .collect();
        *units = slots.into_iter().flatten().collect();
        units.push(Unit::composite(bbox, ExpressionNode::matrix(delimiter, rows)));
        return true;
    }
    false
}

fn matrix_layout(
    units: &[Unit],
    open: usize,
    median: f32,
    cfg: &ComposerConfig,
) -> Option<MatrixLayout> {
    let opener = units[open].bbox;
    let closing = units[open].raw?.closing_delimiter()?;
    let close = (0..units.len())
        .filter(|&j| {
            let b = &units[j].bbox;
            j != open
                && units[j].is(closing)
                && b.x0 >= opener.x1
                && b.height() >= cfg.matrix_closer_height_ratio * opener.height()
                && opener.vertical_overlap(b)
                    >= cfg.matrix_closer_overlap_ratio * opener.height().min(b.height())
        })
        .min_by(|&a, &b| units[a].bbox.x0.total_cmp(&units[b].bbox.x0))?;
    let closer = units[close].bbox;

    let mut interior: Vec<usize> = (0..units.len())
        .filter(|&k| {
            let (cx, cy) = units[k].bbox.center();
            k != open && k != close && cx > opener.x1 && cx < closer.x0 && cy >= opener.y0 && cy <= opener.y1
        })
        .collect();
    if interior.is_empty() {
        return None;
    }

    interior.sort_by(|&a, &b| units[a].bbox.y0.total_cmp(&units[b].bbox.y0));
    let mut rows: Vec<Vec<usize>> = Vec::new();
    let mut row_bottom = f32::NEG_INFINITY;
    for &k in &interior {
        let b = &units[k].bbox;
        match rows.last_mut() {
            Some(row) if b.y0 <= row_bottom => {
                row.push(k);
                row_bottom = row_bottom.max(b.y1);
            }
            _ => {
                rows.push(vec![k]);
                row_bottom = b.y1;
            }
        }
    }
    if rows.len() < 2
        || rows
            .iter()
            .any(|row| row.iter().all(|&k| units[k].is(Symbol::MINUS)))
    {
        return None;
    }

    interior.sort_by(|&a, &b| units[a].bbox.x0.total_cmp(&units[b].bbox.x0));
    let min_gap = cfg.matrix_column_gap * median;
    let mut columns: Vec<(f32, f32)> = Vec::new();
    for &k in &interior {
        let b = &units[k].bbox;
        match columns.last_mut() {
            Some((_, right)) if b.x0 - *right <= min_gap => *right = right.max(b.x1),
            _ => columns.push((b.x0, b.x1)),
        }
    }

    let cells = rows
        .iter()
        .map(|row| {
            columns
                .iter()
                .map(|&(left, right)| {
                    row.iter()
                        .copied()
                        .filter(|&k| {
                            let cx = units[k].bbox.center_x();
                            cx >= left && cx <= right
                        })
                        .collect()
                })
                .collect()
        })
        .collect();
    Some(MatrixLayout { close, cells })
}

// ── Fractions ────────────────────────────────────────────────────────────

fn take_fraction(units: &mut Vec<Unit>, cfg: &ComposerConfig) -> bool {
    let mut bars: Vec<usize> = (0..units.len())
        .filter(|&i| units[i].is(Symbol::MINUS))
        .collect();
    bars.sort_by(|&a, &b| {
        units[b]
            .bbox
            .width()
            .total_cmp(&units[a].bbox.width())
            .then(units[a].bbox.x0.total_cmp(&units[b].bbox.x0))
    });

    for bar_index in bars {
        let bar = units[bar_index].bbox;
        let mid = bar.center_y();
        let in_span = |u: &Unit| {
            let cx = u.bbox.center_x();
            cx >= bar.x0 && cx <= bar.x1
        };
        let above: Vec<usize> = (0..units.len())
            .filter(|&k| k != bar_index && in_span(&units[k]) && units[k].bbox.y1 <= mid)
            .collect();
        let below: Vec<usize> = (0..units.len())
            .filter(|&k| k != bar_index && in_span(&units[k]) && units[k].bbox.y0 >= mid)
            .collect();
        if above.is_empty() || below.is_empty() {
            continue;
        }

        let mut slots: Vec<Option<Unit>> = std::mem::take(units).into_iter().map(Some).collect();
        slots[bar_index] = None;
        let numerator = drain(&mut slots, &above);
        let denominator = drain(&mut slots, &below);
        let bbox = enclosing(bar, &[&numerator, &denominator]);
        let node = ExpressionNode::fraction(
            compose_units(numerator, cfg),
            compose_units(denominator, cfg),
        );
        *units = slots.into_iter().flatten().collect();
        units.push(Unit::composite(bbox, node));
        return true;
    }
    false
}

// ── Radicals ─────────────────────────────────────────────────────────────

fn take_radical(units: &mut Vec<Unit>, cfg: &ComposerConfig) -> bool {
    let Some(sign_index) = (0..units.len())
        .filter(|&i| units[i].is(Symbol::RADICAL))
        .max_by(|&a, &b| {
            units[a]
                .bbox
                .width()
                .total_cmp(&units[b].bbox.width())
                .then(units[b].bbox.x0.total_cmp(&units[a].bbox.x0))
        })
    else {
        return false;
    };
    let sign = units[sign_index].bbox;
    let hook_x = sign.x0 + cfg.radical_hook_ratio * sign.width();

    let radicand: Vec<usize> = (0..units.len())
        .filter(|&k| k != sign_index && inside(&sign, &units[k].bbox) && units[k].bbox.center_x() > hook_x)
        .collect();
    let index: Vec<usize> = (0..units.len())
        .filter(|&k| {
            let b = &units[k].bbox;
            k != sign_index
                && !radicand.contains(&k)
                && b.height() <= cfg.script_size_ratio * sign.height()
                && b.x1 <= hook_x
                && b.x0 >= sign.x0 - cfg.radical_index_reach * sign.width()
                && b.y1 <= sign.center_y()
                && b.y0 >= sign.y0 - cfg.radical_index_reach * sign.height()
        })
        .collect();

    let mut slots: Vec<Option<Unit>> = std::mem::take(units).into_iter().map(Some).collect();
    slots[sign_index] = None;
    let radicand = drain(&mut slots, &radicand);
    let index = drain(&mut slots, &index);
    let bbox = enclosing(sign, &[&radicand, &index]);
    let index = (!index.is_empty()).then(|| compose_units(index, cfg));
    let node = ExpressionNode::radical(index, compose_units(radicand, cfg));
    *units = slots.into_iter().flatten().collect();
    units.push(Unit::composite(bbox, node));
    true
}

// ── Big operators ────────────────────────────────────────────────────────

fn take_big_operator(units: &mut Vec<Unit>, cfg: &ComposerConfig) -> bool {
    let Some(op_index) = (0..units.len())
        .filter(|&i| units[i].raw.and_then(|s| s.big_operator()).is_some())
        .max_by(|&a, &b| units[a].bbox.x0.total_cmp(&units[b].bbox.x0))
    else {
        return false;
    };
    let Some(kind) = units[op_index].raw.and_then(|s| s.big_operator()) else {
        return false;
    };
    let op = units[op_index].bbox;
    let (w, h) = (op.width(), op.height());
    let overhang = cfg.operator_overhang_ratio * w;

    let (upper, lower): (Vec<usize>, Vec<usize>) = if kind.limits_beside() {
        let beside = |b: &BBox| {
            b.height() <= cfg.limit_size_ratio * h
                && b.x0 >= op.x1 - overhang
                && b.x0 - op.x1 <= w.max(cfg.side_limit_gap_ratio * h)
        };
        let band = cfg.side_limit_band_ratio * h;
        (
            (0..units.len())
                .filter(|&k| k != op_index && beside(&units[k].bbox) && units[k].bbox.center_y() < op.y0 + band)
                .collect(),
            (0..units.len())
                .filter(|&k| k != op_index && beside(&units[k].bbox) && units[k].bbox.center_y() > op.y1 - band)
                .collect(),
        )
    } else {
        let span = cfg.stacked_limit_span_ratio * w;
        let (tuck, reach) = (cfg.stacked_limit_tuck_ratio * h, cfg.stacked_limit_reach_ratio * h);
        let in_span = |b: &BBox| {
            let cx = b.center_x();
            cx >= op.x0 - span && cx <= op.x1 + span
        };
        (
            (0..units.len())
                .filter(|&k| {
                    let b = &units[k].bbox;
                    k != op_index && in_span(b) && b.y1 <= op.y0 + tuck && op.y0 - b.y1 <= reach
                })
                .collect(),
            (0..units.len())
                .filter(|&k| {
                    let b = &units[k].bbox;
                    k != op_index && in_span(b) && b.y0 >= op.y1 - tuck && b.y0 - op.y1 <= reach
                })
                .collect(),
        )
    };

    let mut candidates: Vec<usize> = (0..units.len())
        .filter(|&k| {
            let b = &units[k].bbox;
            let cy = b.center_y();
            k != op_index
                && !upper.contains(&k)
                && !lower.contains(&k)
                && b.x0 >= op.x1 - overhang
                && cy >= op.y0
                && cy <= op.y1
        })
        .collect();
    candidates.sort_by(|&a, &b| units[a].bbox.x0.total_cmp(&units[b].bbox.x0));
    let body: Vec<usize> = candidates
        .into_iter()
        .take_while(|&k| !units[k].raw.is_some_and(|s| s.is_relation()))
        .collect();

    let mut slots: Vec<Option<Unit>> = std::mem::take(units).into_iter().map(Some).collect();
    slots[op_index] = None;
    let upper = drain(&mut slots, &upper);
    let lower = drain(&mut slots, &lower);
    let body = drain(&mut slots, &body);
    let bbox = enclosing(op, &[&upper, &lower, &body]);
    let limit = |group: Vec<Unit>| (!group.is_empty()).then(|| compose_units(group, cfg));
    let node = ExpressionNode::big_operator(kind, limit(lower), limit(upper), compose_units(body, cfg));
    *units = slots.into_iter().flatten().collect();
    units.push(Unit::composite(bbox, node));
    true
}

// ── Scripts ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Placement {
    Baseline,
    Superscript,
    Subscript,
}

fn place(base: &BBox, unit: &BBox, cfg: &ComposerConfig) -> Placement {
    let base_h = base.height();
    let min_h = base_h.min(unit.height());
    if base_h <= 0.0 || min_h <= 0.0 {
        return Placement::Baseline;
    }
    if base.vertical_overlap(unit) / min_h >= cfg.baseline_overlap_ratio {
        return Placement::Baseline;
    }
    if unit.height() > cfg.script_size_ratio * base_h {
        return Placement::Baseline;
    }
    let offset = (base.center_y() - unit.center_y()) / base_h;
    if offset > cfg.superscript_offset {
        Placement::Superscript
    } else if offset < -cfg.subscript_offset {
        Placement::Subscript
    } else {
        Placement::Baseline
    }
}

fn baseline_walk(mut units: Vec<Unit>, cfg: &ComposerConfig) -> ExpressionNode {
    units.sort_by(|a, b| {
        a.bbox
            .x0
            .total_cmp(&b.bbox.x0)
            .then(a.bbox.y0.total_cmp(&b.bbox.y0))
    });

    let mut out = Vec::new();
    let mut rest = units.into_iter().peekable();
    while let Some(base) = rest.next() {
        let base_box = base.bbox;
        let mut node = base.node;
        loop {
            let placement = match rest.peek() {
                Some(next) => place(&base_box, &next.bbox, cfg),
                None => Placement::Baseline,
            };
            if placement == Placement::Baseline {
                break;
            }
            let mut script = Vec::new();
            while let Some(next) = rest.next_if(|u| place(&base_box, &u.bbox, cfg) == placement) {
                script.push(next);
            }
            let script = compose_units(script, cfg);
            node = match placement {
                Placement::Superscript => ExpressionNode::power(node, script),
                _ => ExpressionNode::subscript(node, script),
            };
        }
        out.push(node);
    }
    ExpressionNode::group(out)
}
