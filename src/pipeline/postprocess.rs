//! Post-processing: present synthesised formulas the way a person asked for
//! them.
//!
//! The synthesiser's output is canonical and is what the rest of the crate
//! stores and compares. Everything here is presentation only, applied to a
//! copy for the CLI and exported files:
//!
//! 1. Drop formulas that rendered empty (blank regions)
//! 2. Wrap each formula in the configured math mode
//! 3. Join formulas with the region separator
//! 4. Optionally embed the result in a compilable `.tex` document
//! 5. Ensure the text ends with exactly one newline when it is a document
//!
//! Rules are pure `&str → String` functions, independently testable.

use crate::config::OutputOptions;
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::warn;

/// Apply all presentation rules to per-region formulas.
pub fn format_document(formulas: &[String], options: &OutputOptions) -> String {
    let wrapped: Vec<String> = formulas
        .iter()
        .map(|f| f.trim())
        .filter(|f| !f.is_empty())
        .map(|f| options.math_mode.wrap(f))
        .collect();
    let body = wrapped.join(&options.region_separator);

    if options.standalone {
        ensure_final_newline(&standalone_document(&body, &options.packages))
    } else {
        body
    }
}

// ── Standalone document ──────────────────────────────────────────────────────

static PACKAGE_NAME: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z][A-Za-z0-9-]*$").unwrap());

/// Wrap `body` in `\documentclass{article}` with one `\usepackage` line per
/// valid, distinct package name.
pub fn standalone_document(body: &str, packages: &[String]) -> String {
    let mut seen: Vec<&str> = Vec::new();
    for p in packages.iter().map(|p| p.trim()) {
        if !PACKAGE_NAME.is_match(p) {
            warn!(package = p, "Skipping invalid LaTeX package name");
            continue;
        }
        if !seen.contains(&p) {
            seen.push(p);
        }
    }

    let mut doc = String::from("\\documentclass{article}\n");
    for p in seen {
        doc.push_str(&format!("\\usepackage{{{p}}}\n"));
    }
    doc.push_str("\\begin{document}\n");
    if !body.is_empty() {
        doc.push_str(body);
        doc.push('\n');
    }
    doc.push_str("\\end{document}");
    doc
}

// ── Final newline ────────────────────────────────────────────────────────────

fn ensure_final_newline(input: &str) -> String {
    let mut s = input.trim_end_matches('\n').to_string();
    s.push('\n');
    s
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MathMode;

    fn formulas(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn raw_output_joins_non_empty_formulas() {
        let out = format_document(&formulas(&["x^{2}", "", "y"]), &OutputOptions::default());
        assert_eq!(out, "x^{2}\ny");
    }

    #[test]
    fn math_mode_and_separator_apply_per_formula() {
        let options = OutputOptions {
            math_mode: MathMode::Inline,
            region_separator: ", ".to_string(),
            ..OutputOptions::default()
        };
        assert_eq!(format_document(&formulas(&["a", "b"]), &options), "$a$, $b$");
    }

    #[test]
    fn nothing_recognised_is_empty_text() {
        let options = OutputOptions {
            math_mode: MathMode::Display,
            ..OutputOptions::default()
        };
        assert_eq!(format_document(&formulas(&["", ""]), &options), "");
    }

    #[test]
    fn standalone_document_has_preamble() {
        let options = OutputOptions {
            math_mode: MathMode::Equation,
            standalone: true,
            ..OutputOptions::default()
        };
        let out = format_document(&formulas(&["\\frac{a}{b}"]), &options);
        assert_eq!(
            out,
            "\\documentclass{article}\n\\usepackage{amsmath}\n\\usepackage{amssymb}\n\
             \\begin{document}\n\\begin{equation}\n\\frac{a}{b}\n\\end{equation}\n\\end{document}\n"
        );
    }

    #[test]
    fn invalid_and_duplicate_packages_are_skipped() {
        let doc = standalone_document(
            "",
            &formulas(&["amsmath", "bad}name", " amsmath ", "mathtools"]),
        );
        assert_eq!(
            doc,
            "\\documentclass{article}\n\\usepackage{amsmath}\n\\usepackage{mathtools}\n\
             \\begin{document}\n\\end{document}"
        );
    }
}
