//! Expression tree → LaTeX source.
//!
//! The mapping is fixed and total over well-formed trees, so two equal trees
//! always render to byte-identical output. The structural parser in
//! [`super::parse`] reads this output back into an isomorphic tree.

use crate::error::HandTexError;
use crate::tree::{ExpressionNode, ExpressionTree, NodeKind};
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::error;

/// Text emitted for a region whose recognition failed.
pub const UNRESOLVED_LATEX: &str = "\\text{[unresolved]}";

static TRAILING_CONTROL_WORD: Lazy<Regex> = Lazy::new(|| Regex::new(r"\\[A-Za-z]+$").unwrap());

/// Render one formula.
///
/// Fails with [`HandTexError::InvariantViolation`] for a leaf carrying a
/// structural marker or a matrix that is empty or ragged.
pub fn synthesize(node: &ExpressionNode) -> Result<String, HandTexError> {
    let mut out = String::new();
    write_node(node, &mut out).inspect_err(|e| error!(node = %node.id, "{e}"))?;
    Ok(out)
}

/// Render every formula root, one string per region.
pub fn synthesize_roots(tree: &ExpressionTree) -> Result<Vec<String>, HandTexError> {
    tree.roots.iter().map(synthesize).collect()
}

/// Render the document: formula roots joined by a newline.
pub fn synthesize_tree(tree: &ExpressionTree) -> Result<String, HandTexError> {
    Ok(synthesize_roots(tree)?.join("\n"))
}

fn write_node(node: &ExpressionNode, out: &mut String) -> Result<(), HandTexError> {
    match &node.kind {
        NodeKind::Leaf { symbol, .. } => {
            if symbol.is_marker() {
                return Err(HandTexError::InvariantViolation(format!(
                    "leaf {} carries structural marker '{}'",
                    node.id,
                    symbol.name()
                )));
            }
            push_token(out, symbol.latex());
        }
        NodeKind::Sequence { children } => {
            for child in children {
                let rendered = synthesize_child(child)?;
                push_token(out, &rendered);
            }
        }
        NodeKind::Fraction {
            numerator,
            denominator,
        } => {
            out.push_str("\\frac");
            write_group(numerator, out)?;
            write_group(denominator, out)?;
        }
        NodeKind::Power { base, exponent } => {
            write_base(base, out)?;
            out.push('^');
            write_group(exponent, out)?;
        }
        NodeKind::Subscript { base, subscript } => {
            write_base(base, out)?;
            out.push('_');
            write_group(subscript, out)?;
        }
        NodeKind::Radical { index, radicand } => {
            out.push_str("\\sqrt");
            if let Some(index) = index {
                let rendered = synthesize_child(index)?;
                // A bare `]` would close the optional argument early.
                if rendered.contains(']') {
                    out.push_str("[{");
                    out.push_str(&rendered);
                    out.push_str("}]");
                } else {
                    out.push('[');
                    out.push_str(&rendered);
                    out.push(']');
                }
            }
            write_group(radicand, out)?;
        }
        NodeKind::BigOperator {
            operator,
            lower,
            upper,
            body,
        } => {
            out.push_str(operator.latex());
            if let Some(lower) = lower {
                out.push('_');
                write_group(lower, out)?;
            }
            if let Some(upper) = upper {
                out.push('^');
                write_group(upper, out)?;
            }
            write_group(body, out)?;
        }
        NodeKind::Matrix { delimiter, rows } => {
            let width = rows.first().map(Vec::len).unwrap_or(0);
            if width == 0 {
                return Err(HandTexError::InvariantViolation(format!(
                    "matrix {} is empty",
                    node.id
                )));
            }
            if rows.iter().any(|r| r.len() != width) {
                return Err(HandTexError::InvariantViolation(format!(
                    "matrix {} has ragged rows",
                    node.id
                )));
            }
            let env = delimiter.environment();
            out.push_str("\\begin{");
            out.push_str(env);
            out.push('}');
            for (r, row) in rows.iter().enumerate() {
                if r > 0 {
                    out.push_str(" \\\\ ");
                }
                for (c, cell) in row.iter().enumerate() {
                    if c > 0 {
                        out.push_str(" & ");
                    }
                    write_node(cell, out)?;
                }
            }
            out.push_str("\\end{");
            out.push_str(env);
            out.push('}');
        }
        NodeKind::Unresolved { .. } => out.push_str(UNRESOLVED_LATEX),
    }
    Ok(())
}

fn synthesize_child(node: &ExpressionNode) -> Result<String, HandTexError> {
    let mut s = String::new();
    write_node(node, &mut s)?;
    Ok(s)
}

fn write_group(node: &ExpressionNode, out: &mut String) -> Result<(), HandTexError> {
    out.push('{');
    write_node(node, out)?;
    out.push('}');
    Ok(())
}

/// Leaves attach scripts directly; anything else is braced first.
fn write_base(node: &ExpressionNode, out: &mut String) -> Result<(), HandTexError> {
    if node.is_leaf() {
        write_node(node, out)
    } else {
        write_group(node, out)
    }
}

/// Append `token`, separating it from a preceding control word when it
/// starts with a letter (`\alpha x`, not `\alphax`).
fn push_token(out: &mut String, token: &str) {
    if token.starts_with(|c: char| c.is_ascii_alphabetic()) && TRAILING_CONTROL_WORD.is_match(out) {
        out.push(' ');
    }
    out.push_str(token);
}
