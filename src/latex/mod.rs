//! LaTeX synthesis and the matching structural parser.
//!
//! [`synthesize`] is the only way trees become text; [`parse`] is its
//! inverse over the same grammar, so `parse(synthesize(t))` is isomorphic to
//! `t` for every well-formed tree.

pub mod parse;
pub mod synthesize;

pub use parse::{parse, LatexParseError};
pub use synthesize::{synthesize, synthesize_roots, synthesize_tree, UNRESOLVED_LATEX};
