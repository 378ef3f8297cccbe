//! Built-in glyph templates and the normalised ink grid they are compared on.
//!
//! Templates are ASCII art (`#` = ink). Both templates and observed
//! components are cropped to their ink and resampled to a fixed
//! [`GRID`]×[`GRID`] bitmap by nearest-neighbour lookup at cell centres, so a
//! glyph drawn as an integer scaling of a template produces exactly the
//! template's grid.

use crate::symbols::Symbol;
use once_cell::sync::Lazy;

/// Side length of the normalised grid.
pub const GRID: usize = 16;

/// A glyph's ink, resampled to `GRID × GRID`, plus its original aspect.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InkGrid {
    rows: [u16; GRID],
    aspect: f32,
}

impl InkGrid {
    /// Resample a `width × height` ink mask.
    pub fn sample(width: u32, height: u32, ink: impl Fn(u32, u32) -> bool) -> Self {
        let mut rows = [0u16; GRID];
        if width > 0 && height > 0 {
            let g = GRID as u64;
            for (gy, row) in rows.iter_mut().enumerate() {
                let sy = ((2 * gy as u64 + 1) * height as u64 / (2 * g)) as u32;
                for gx in 0..GRID {
                    let sx = ((2 * gx as u64 + 1) * width as u64 / (2 * g)) as u32;
                    if ink(sx, sy) {
                        *row |= 1 << gx;
                    }
                }
            }
        }
        let aspect = if height == 0 {
            0.0
        } else {
            width as f32 / height as f32
        };
        Self { rows, aspect }
    }

    pub fn ink_cells(&self) -> u32 {
        self.rows.iter().map(|r| r.count_ones()).sum()
    }

    /// Jaccard overlap of the two grids weighted by aspect-ratio agreement,
    /// in `[0, 1]`.
    pub fn similarity(&self, other: &InkGrid) -> f32 {
        let (mut inter, mut union) = (0u32, 0u32);
        for (a, b) in self.rows.iter().zip(other.rows.iter()) {
            inter += (a & b).count_ones();
            union += (a | b).count_ones();
        }
        if union == 0 {
            return 0.0;
        }
        let jaccard = inter as f32 / union as f32;
        let (lo, hi) = if self.aspect < other.aspect {
            (self.aspect, other.aspect)
        } else {
            (other.aspect, self.aspect)
        };
        let aspect_sim = if hi > 0.0 { lo / hi } else { 0.0 };
        jaccard * (0.5 + 0.5 * aspect_sim)
    }
}

/// One reference shape for a symbol.
#[derive(Debug, Clone)]
pub struct GlyphTemplate {
    pub symbol: Symbol,
    grid: InkGrid,
}

impl GlyphTemplate {
    /// Build from ASCII art rows; blank margins are cropped.
    pub fn from_ascii(symbol: Symbol, art: &[&str]) -> Self {
        let cells: Vec<Vec<bool>> = art
            .iter()
            .map(|row| row.chars().map(|c| c == '#').collect())
            .collect();
        let ink = |x: usize, y: usize| cells.get(y).and_then(|r| r.get(x)).copied().unwrap_or(false);

        let height = cells.len();
        let width = cells.iter().map(Vec::len).max().unwrap_or(0);
        let (mut x0, mut y0, mut x1, mut y1) = (usize::MAX, usize::MAX, 0, 0);
        for y in 0..height {
            for x in 0..width {
                if ink(x, y) {
                    x0 = x0.min(x);
                    y0 = y0.min(y);
                    x1 = x1.max(x + 1);
                    y1 = y1.max(y + 1);
                }
            }
        }
        let grid = if x0 == usize::MAX {
            InkGrid::sample(0, 0, |_, _| false)
        } else {
            InkGrid::sample((x1 - x0) as u32, (y1 - y0) as u32, |x, y| {
                ink(x0 + x as usize, y0 + y as usize)
            })
        };
        Self { symbol, grid }
    }

    pub fn grid(&self) -> &InkGrid {
        &self.grid
    }
}

/// The built-in library, in symbol-name form.
const TEMPLATES: &[(&str, &[&str])] = &[
    ("0", &[".###.", "#...#", "#...#", "#...#", "#...#", "#...#", ".###."]),
    ("1", &["..#..", ".##..", "..#..", "..#..", "..#..", "..#..", ".###."]),
    ("2", &[".###.", "#...#", "....#", "...#.", "..#..", ".#...", "#####"]),
    ("3", &["####.", "....#", "....#", ".###.", "....#", "....#", "####."]),
    ("4", &["...#.", "..##.", ".#.#.", "#..#.", "#####", "...#.", "...#."]),
    ("5", &["#####", "#....", "####.", "....#", "....#", "#...#", ".###."]),
    ("6", &["..##.", ".#...", "#....", "####.", "#...#", "#...#", ".###."]),
    ("7", &["#####", "....#", "...#.", "..#..", ".#...", ".#...", ".#..."]),
    ("8", &[".###.", "#...#", "#...#", ".###.", "#...#", "#...#", ".###."]),
    ("9", &[".###.", "#...#", "#...#", ".####", "....#", "...#.", ".##.."]),
    ("a", &[".###.", "....#", ".####", "#...#", ".####"]),
    ("b", &["#....", "#....", "####.", "#...#", "#...#", "####."]),
    ("c", &[".###", "#...", "#...", "#...", ".###"]),
    ("d", &["....#", "....#", ".####", "#...#", "#...#", ".####"]),
    ("e", &[".###.", "#...#", "#####", "#....", ".###."]),
    ("n", &["#.##.", "##..#", "#...#", "#...#", "#...#"]),
    ("t", &[".#..", "####", ".#..", ".#..", ".#..", "..##"]),
    ("x", &["#...#", ".#.#.", "..#..", ".#.#.", "#...#"]),
    ("y", &["#...#", "#...#", ".#.#.", "..#..", ".#...", "#...."]),
    ("z", &["#####", "...#.", "..#..", ".#...", "#####"]),
    ("alpha", &[".##..#", "#..#.#", "#...#.", "#..#.#", ".##..#"]),
    ("pi", &["#####", ".#.#.", ".#.#.", ".#.#.", ".#.#."]),
    ("plus", &["..#..", "..#..", "#####", "..#..", "..#.."]),
    ("lt", &["...#", "..#.", ".#..", "#...", ".#..", "..#.", "...#"]),
    ("gt", &["#...", ".#..", "..#.", "...#", "..#.", ".#..", "#..."]),
    ("lparen", &["..#", ".#.", "#..", "#..", "#..", ".#.", "..#"]),
    ("rparen", &["#..", ".#.", "..#", "..#", "..#", ".#.", "#.."]),
    ("lbracket", &["###", "#..", "#..", "#..", "#..", "#..", "###"]),
    ("rbracket", &["###", "..#", "..#", "..#", "..#", "..#", "###"]),
    ("vbar", &["#", "#", "#", "#", "#", "#", "#"]),
    (
        "sqrt",
        &[
            ".....#######",
            ".....#......",
            "....#.......",
            "....#.......",
            "#..#........",
            ".#.#........",
            "..#.........",
        ],
    ),
    (
        "int",
        &["...##", "..#..", "..#..", "..#..", "..#..", "..#..", "..#..", "..#..", "##..."],
    ),
    (
        "oint",
        &["...##", "..#..", "..#..", ".###.", "#.#.#", ".###.", "..#..", "..#..", "##..."],
    ),
    ("sum", &["#####", "#....", ".#...", "..#..", ".#...", "#....", "#####"]),
    (
        "prod",
        &["#######", ".#...#.", ".#...#.", ".#...#.", ".#...#.", ".#...#.", ".#...#."],
    ),
];

static LIBRARY: Lazy<Vec<GlyphTemplate>> = Lazy::new(|| {
    TEMPLATES
        .iter()
        .filter_map(|(name, art)| Symbol::from_name(name).map(|s| GlyphTemplate::from_ascii(s, art)))
        .collect()
});

/// The built-in template library.
pub fn builtin_templates() -> &'static [GlyphTemplate] {
    &LIBRARY
}

/// ASCII art of the built-in template for `symbol`, for rendering synthetic
/// handwriting.
pub fn builtin_art(symbol: Symbol) -> Option<&'static [&'static str]> {
    TEMPLATES
        .iter()
        .find(|(name, _)| *name == symbol.name())
        .map(|(_, art)| *art)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_template_names_a_symbol() {
        assert_eq!(builtin_templates().len(), TEMPLATES.len());
    }

    #[test]
    fn templates_are_pairwise_distinct() {
        let lib = builtin_templates();
        for (i, a) in lib.iter().enumerate() {
            for b in &lib[i + 1..] {
                assert!(
                    a.grid().similarity(b.grid()) < 1.0,
                    "{:?} and {:?} are indistinguishable",
                    a.symbol,
                    b.symbol
                );
            }
        }
    }

    #[test]
    fn scaled_template_matches_exactly() {
        let art = builtin_art(Symbol::from_name("a").unwrap()).unwrap();
        let template = GlyphTemplate::from_ascii(Symbol::from_name("a").unwrap(), art);
        let scale = 3u32;
        let w = art[0].len() as u32 * scale;
        let h = art.len() as u32 * scale;
        let scaled = InkGrid::sample(w, h, |x, y| {
            art[(y / scale) as usize].as_bytes()[(x / scale) as usize] == b'#'
        });
        assert_eq!(scaled, *template.grid());
        assert_eq!(scaled.similarity(template.grid()), 1.0);
    }

    #[test]
    fn margins_are_cropped() {
        let sym = Symbol::from_name("vbar").unwrap();
        let padded = GlyphTemplate::from_ascii(sym, &["...", ".#.", ".#.", "..."]);
        let tight = GlyphTemplate::from_ascii(sym, &["#", "#"]);
        assert_eq!(padded.grid(), tight.grid());
    }

    #[test]
    fn empty_grids_never_match() {
        let empty = InkGrid::sample(0, 0, |_, _| false);
        assert_eq!(empty.ink_cells(), 0);
        assert_eq!(empty.similarity(&empty), 0.0);
    }
}
