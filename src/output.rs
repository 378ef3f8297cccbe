//! Result types returned by the conversion entry points.

use crate::config::OutputOptions;
use crate::error::RegionError;
use crate::pipeline::detect::Region;
use crate::pipeline::postprocess;
use crate::tree::{ExpressionTree, NodeId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use uuid::Uuid;

/// The outcome of converting one image.
///
/// Immutable once built. Corrections never modify a result; a
/// [`crate::session::CorrectionSession`] produces new snapshots instead, and
/// shares [`ConversionResult::tree`] until its first edit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversionResult {
    pub id: Uuid,
    /// Raw LaTeX: one formula per region, newline-separated.
    pub latex: String,
    /// Per-region formulas, in reading order.
    pub formulas: Vec<String>,
    pub tree: Arc<ExpressionTree>,
    /// Aggregate confidence of every node in [`ConversionResult::tree`].
    pub confidence: BTreeMap<NodeId, f32>,
    pub regions: Vec<RegionResult>,
    pub stats: ConversionStats,
}

impl ConversionResult {
    /// LaTeX as presented to a person: math-mode wrapping, separators and an
    /// optional standalone document.
    pub fn formatted(&self, options: &OutputOptions) -> String {
        postprocess::format_document(&self.formulas, options)
    }

    /// Nodes a reviewer should look at first.
    pub fn low_confidence(&self, threshold: f32) -> Vec<NodeId> {
        self.tree.low_confidence(threshold)
    }

    /// True when every region was recognised.
    pub fn is_complete(&self) -> bool {
        self.regions.iter().all(|r| r.error.is_none())
    }
}

/// What happened to one detected region.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegionResult {
    pub region: Region,
    /// Root of this region's formula in the document tree.
    pub root: NodeId,
    /// Glyph positions the recogniser reported.
    pub glyphs: usize,
    /// Set when the region degraded to an unresolved placeholder.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RegionError>,
    pub duration_ms: u64,
}

/// Timing and counts for one conversion.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConversionStats {
    pub total_regions: usize,
    pub recognized_regions: usize,
    pub failed_regions: usize,
    pub total_glyphs: usize,
    pub ingest_duration_ms: u64,
    pub detect_duration_ms: u64,
    pub recognize_duration_ms: u64,
    pub compose_duration_ms: u64,
    pub total_duration_ms: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MathMode;
    use crate::geometry::BBox;
    use crate::symbols::Symbol;
    use crate::tree::ExpressionNode;

    fn sample() -> ConversionResult {
        let x = Symbol::from_name("x").unwrap();
        let tree = ExpressionTree::new(vec![
            ExpressionNode::leaf(x, 0.4),
            ExpressionNode::unresolved(1),
        ]);
        ConversionResult {
            id: Uuid::new_v4(),
            latex: "x\n\\text{[unresolved]}".to_string(),
            formulas: vec!["x".to_string(), "\\text{[unresolved]}".to_string()],
            confidence: tree.confidence_map(),
            tree: Arc::new(tree),
            regions: vec![
                RegionResult {
                    region: Region::new(BBox::new(0.0, 0.0, 10.0, 10.0), 0.9),
                    root: NodeId(1),
                    glyphs: 1,
                    error: None,
                    duration_ms: 1,
                },
                RegionResult {
                    region: Region::new(BBox::new(0.0, 20.0, 10.0, 30.0), 0.9),
                    root: NodeId(2),
                    glyphs: 0,
                    error: Some(RegionError::RecognitionTimeout {
                        region: 1,
                        budget_ms: 5,
                    }),
                    duration_ms: 5,
                },
            ],
            stats: ConversionStats::default(),
        }
    }

    #[test]
    fn formatted_wraps_each_formula() {
        let result = sample();
        let options = OutputOptions {
            math_mode: MathMode::Display,
            ..OutputOptions::default()
        };
        assert_eq!(
            result.formatted(&options),
            "$$x$$\n$$\\text{[unresolved]}$$"
        );
    }

    #[test]
    fn reports_incomplete_and_low_confidence_nodes() {
        let result = sample();
        assert!(!result.is_complete());
        assert_eq!(result.low_confidence(0.5), vec![NodeId(1), NodeId(2)]);
    }

    #[test]
    fn serialises_to_json() {
        let result = sample();
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["confidence"]["1"].as_f64().map(|v| v as f32), Some(0.4));
        assert_eq!(json["regions"][1]["error"]["kind"], "recognition_timeout");
        assert!(json["regions"][0].get("error").is_none());
        let back: ConversionResult = serde_json::from_value(json).unwrap();
        assert_eq!(back.id, result.id);
        assert!(back.tree.is_isomorphic(&result.tree));
    }
}
