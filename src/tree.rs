//! The structural expression tree produced by composition and consumed by
//! synthesis and correction.
//!
//! Children are owned (`Box`/`Vec`), so the tree is acyclic by construction.
//! Every node carries a [`NodeId`] that is unique within its
//! [`ExpressionTree`] and an aggregate confidence: the minimum over the leaves
//! beneath it.
//!
//! ## Why ids are assigned after construction
//! The composer and the LaTeX parser build nodes bottom-up, long before they
//! know where a subtree will land. Nodes are created with
//! [`NodeId::PENDING`] and numbered in one pre-order pass
//! ([`ExpressionTree::renumber`]) or, for subtrees grafted into an existing
//! tree, with ids above the current maximum ([`ExpressionTree::assign_fresh_ids`]).

use crate::symbols::{BigOperatorKind, Symbol};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Stable identifier of a node within one tree.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub u32);

impl NodeId {
    /// Placeholder carried by freshly built nodes until they are numbered.
    pub const PENDING: NodeId = NodeId(0);
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A hypothesis that lost to the selected symbol at composition time.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Alternate {
    pub symbol: Symbol,
    pub confidence: f32,
}

/// Delimiter drawn around a matrix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatrixDelimiter {
    Paren,
    Bracket,
    Bar,
    #[default]
    None,
}

impl MatrixDelimiter {
    /// LaTeX environment name (`pmatrix`, `bmatrix`, `vmatrix`, `matrix`).
    pub fn environment(&self) -> &'static str {
        match self {
            MatrixDelimiter::Paren => "pmatrix",
            MatrixDelimiter::Bracket => "bmatrix",
            MatrixDelimiter::Bar => "vmatrix",
            MatrixDelimiter::None => "matrix",
        }
    }

    pub fn from_environment(name: &str) -> Option<Self> {
        match name {
            "pmatrix" => Some(MatrixDelimiter::Paren),
            "bmatrix" => Some(MatrixDelimiter::Bracket),
            "vmatrix" => Some(MatrixDelimiter::Bar),
            "matrix" => Some(MatrixDelimiter::None),
            _ => None,
        }
    }

    /// Delimiter implied by an opening bracket glyph.
    pub fn from_opening(symbol: Symbol) -> Option<Self> {
        match symbol {
            Symbol::LPAREN => Some(MatrixDelimiter::Paren),
            Symbol::LBRACKET => Some(MatrixDelimiter::Bracket),
            Symbol::VBAR => Some(MatrixDelimiter::Bar),
            _ => None,
        }
    }
}

/// Node variants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NodeKind {
    Leaf {
        symbol: Symbol,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        alternates: Vec<Alternate>,
    },
    Fraction {
        numerator: Box<ExpressionNode>,
        denominator: Box<ExpressionNode>,
    },
    Power {
        base: Box<ExpressionNode>,
        exponent: Box<ExpressionNode>,
    },
    Subscript {
        base: Box<ExpressionNode>,
        subscript: Box<ExpressionNode>,
    },
    Radical {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        index: Option<Box<ExpressionNode>>,
        radicand: Box<ExpressionNode>,
    },
    BigOperator {
        operator: BigOperatorKind,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        lower: Option<Box<ExpressionNode>>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        upper: Option<Box<ExpressionNode>>,
        body: Box<ExpressionNode>,
    },
    Matrix {
        delimiter: MatrixDelimiter,
        rows: Vec<Vec<ExpressionNode>>,
    },
    Sequence {
        children: Vec<ExpressionNode>,
    },
    /// Placeholder for a region whose recognition failed.
    Unresolved {
        region: usize,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExpressionNode {
    pub id: NodeId,
    pub confidence: f32,
    #[serde(flatten)]
    pub kind: NodeKind,
}

impl ExpressionNode {
    pub fn new(kind: NodeKind) -> Self {
        Self {
            id: NodeId::PENDING,
            confidence: 1.0,
            kind,
        }
    }

    pub fn leaf(symbol: Symbol, confidence: f32) -> Self {
        Self::leaf_with_alternates(symbol, confidence, Vec::new())
    }

    pub fn leaf_with_alternates(symbol: Symbol, confidence: f32, alternates: Vec<Alternate>) -> Self {
        Self {
            id: NodeId::PENDING,
            confidence,
            kind: NodeKind::Leaf { symbol, alternates },
        }
    }

    pub fn sequence(children: Vec<ExpressionNode>) -> Self {
        Self::new(NodeKind::Sequence { children })
    }

    /// The empty sequence: renders as the empty string.
    pub fn empty() -> Self {
        Self::sequence(Vec::new())
    }

    /// Collapse a run of siblings: nothing becomes the empty sequence, a
    /// single node stands for itself, several become a sequence.
    pub fn group(mut nodes: Vec<ExpressionNode>) -> Self {
        if nodes.len() == 1 {
            nodes.remove(0)
        } else {
            Self::sequence(nodes)
        }
    }

    pub fn unresolved(region: usize) -> Self {
        Self {
            id: NodeId::PENDING,
            confidence: 0.0,
            kind: NodeKind::Unresolved { region },
        }
    }

    pub fn fraction(numerator: ExpressionNode, denominator: ExpressionNode) -> Self {
        Self::new(NodeKind::Fraction {
            numerator: Box::new(numerator),
            denominator: Box::new(denominator),
        })
    }

    pub fn power(base: ExpressionNode, exponent: ExpressionNode) -> Self {
        Self::new(NodeKind::Power {
            base: Box::new(base),
            exponent: Box::new(exponent),
        })
    }

    pub fn subscript(base: ExpressionNode, subscript: ExpressionNode) -> Self {
        Self::new(NodeKind::Subscript {
            base: Box::new(base),
            subscript: Box::new(subscript),
        })
    }

    pub fn radical(index: Option<ExpressionNode>, radicand: ExpressionNode) -> Self {
        Self::new(NodeKind::Radical {
            index: index.map(Box::new),
            radicand: Box::new(radicand),
        })
    }

    pub fn big_operator(
        operator: BigOperatorKind,
        lower: Option<ExpressionNode>,
        upper: Option<ExpressionNode>,
        body: ExpressionNode,
    ) -> Self {
        Self::new(NodeKind::BigOperator {
            operator,
            lower: lower.map(Box::new),
            upper: upper.map(Box::new),
            body: Box::new(body),
        })
    }

    pub fn matrix(delimiter: MatrixDelimiter, rows: Vec<Vec<ExpressionNode>>) -> Self {
        Self::new(NodeKind::Matrix { delimiter, rows })
    }

    pub fn is_leaf(&self) -> bool {
        matches!(self.kind, NodeKind::Leaf { .. })
    }

    pub fn is_sequence(&self) -> bool {
        matches!(self.kind, NodeKind::Sequence { .. })
    }

    pub fn is_empty_sequence(&self) -> bool {
        matches!(&self.kind, NodeKind::Sequence { children } if children.is_empty())
    }

    /// The selected symbol when this node is a leaf.
    pub fn symbol(&self) -> Option<Symbol> {
        match &self.kind {
            NodeKind::Leaf { symbol, .. } => Some(*symbol),
            _ => None,
        }
    }

    // ── Traversal ────────────────────────────────────────────────────────

    /// Direct children in document order.
    pub fn children(&self) -> Vec<&ExpressionNode> {
        match &self.kind {
            NodeKind::Leaf { .. } | NodeKind::Unresolved { .. } => Vec::new(),
            NodeKind::Fraction {
                numerator,
                denominator,
            } => vec![&**numerator, &**denominator],
            NodeKind::Power { base, exponent } => vec![&**base, &**exponent],
            NodeKind::Subscript { base, subscript } => vec![&**base, &**subscript],
            NodeKind::Radical { index, radicand } => {
                index.iter().map(|b| &**b).chain([&**radicand]).collect()
            }
            NodeKind::BigOperator {
                lower, upper, body, ..
            } => lower
                .iter()
                .chain(upper.iter())
                .map(|b| &**b)
                .chain([&**body])
                .collect(),
            NodeKind::Matrix { rows, .. } => rows.iter().flatten().collect(),
            NodeKind::Sequence { children } => children.iter().collect(),
        }
    }

    pub fn children_mut(&mut self) -> Vec<&mut ExpressionNode> {
        match &mut self.kind {
            NodeKind::Leaf { .. } | NodeKind::Unresolved { .. } => Vec::new(),
            NodeKind::Fraction {
                numerator,
                denominator,
            } => vec![&mut **numerator, &mut **denominator],
            NodeKind::Power { base, exponent } => vec![&mut **base, &mut **exponent],
            NodeKind::Subscript { base, subscript } => vec![&mut **base, &mut **subscript],
            NodeKind::Radical { index, radicand } => index
                .iter_mut()
                .map(|b| &mut **b)
                .chain([&mut **radicand])
                .collect(),
            NodeKind::BigOperator {
                lower, upper, body, ..
            } => lower
                .iter_mut()
                .chain(upper.iter_mut())
                .map(|b| &mut **b)
                .chain([&mut **body])
                .collect(),
            NodeKind::Matrix { rows, .. } => rows.iter_mut().flatten().collect(),
            NodeKind::Sequence { children } => children.iter_mut().collect(),
        }
    }

    /// Pre-order visit of this node and every descendant.
    pub fn visit<'a>(&'a self, f: &mut impl FnMut(&'a ExpressionNode)) {
        f(self);
        for child in self.children() {
            child.visit(f);
        }
    }

    pub fn visit_mut(&mut self, f: &mut impl FnMut(&mut ExpressionNode)) {
        f(self);
        for child in self.children_mut() {
            child.visit_mut(f);
        }
    }

    pub fn find(&self, id: NodeId) -> Option<&ExpressionNode> {
        if self.id == id {
            return Some(self);
        }
        self.children().into_iter().find_map(|c| c.find(id))
    }

    pub fn find_mut(&mut self, id: NodeId) -> Option<&mut ExpressionNode> {
        if self.id == id {
            return Some(self);
        }
        self.children_mut().into_iter().find_map(|c| c.find_mut(id))
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.find(id).is_some()
    }

    pub fn node_count(&self) -> usize {
        let mut n = 0;
        self.visit(&mut |_| n += 1);
        n
    }

    /// Every leaf beneath (or at) this node, in document order.
    pub fn leaves(&self) -> Vec<&ExpressionNode> {
        let mut out = Vec::new();
        self.visit(&mut |n| {
            if n.is_leaf() {
                out.push(n);
            }
        });
        out
    }

    fn max_id(&self) -> u32 {
        let mut max = self.id.0;
        self.visit(&mut |n| max = max.max(n.id.0));
        max
    }

    // ── Editing ──────────────────────────────────────────────────────────

    /// Remove the descendant `id` from this subtree and return it.
    ///
    /// A sequence child is removed outright, an optional slot (radical
    /// index, operator limits) becomes absent, and a required slot is filled
    /// with an empty sequence carrying `placeholder_id`.
    pub fn detach(&mut self, id: NodeId, placeholder_id: NodeId) -> Option<ExpressionNode> {
        match &mut self.kind {
            NodeKind::Sequence { children } => {
                if let Some(pos) = children.iter().position(|c| c.id == id) {
                    return Some(children.remove(pos));
                }
            }
            NodeKind::Radical { index, .. } => {
                if matches!(index, Some(i) if i.id == id) {
                    return index.take().map(|b| *b);
                }
            }
            NodeKind::BigOperator { lower, upper, .. } => {
                if matches!(lower, Some(l) if l.id == id) {
                    return lower.take().map(|b| *b);
                }
                if matches!(upper, Some(u) if u.id == id) {
                    return upper.take().map(|b| *b);
                }
            }
            _ => {}
        }
        for child in self.children_mut() {
            if child.id == id {
                let mut placeholder = ExpressionNode::empty();
                placeholder.id = placeholder_id;
                return Some(std::mem::replace(child, placeholder));
            }
        }
        self.children_mut()
            .into_iter()
            .find_map(|c| c.detach(id, placeholder_id))
    }

    // ── Confidence ───────────────────────────────────────────────────────

    /// Recompute aggregate confidences bottom-up and return this node's.
    ///
    /// Leaves keep their own score, unresolved placeholders score zero, and
    /// every other node takes the minimum of its children (an empty
    /// sequence scores one).
    pub fn recompute_confidence(&mut self) -> f32 {
        match self.kind {
            NodeKind::Leaf { .. } => self.confidence,
            NodeKind::Unresolved { .. } => {
                self.confidence = 0.0;
                0.0
            }
            _ => {
                let min = self
                    .children_mut()
                    .into_iter()
                    .map(|c| c.recompute_confidence())
                    .fold(1.0_f32, f32::min);
                self.confidence = min;
                min
            }
        }
    }

    // ── Isomorphism ──────────────────────────────────────────────────────

    /// Canonical form: nested sequences flattened, single-child sequences
    /// unwrapped.
    pub fn canonical(&self) -> ExpressionNode {
        self.clone().canonicalize()
    }

    fn canonicalize(self) -> ExpressionNode {
        let ExpressionNode {
            id,
            confidence,
            kind,
        } = self;
        let canon = |b: Box<ExpressionNode>| Box::new(b.canonicalize());
        let kind = match kind {
            NodeKind::Sequence { children } => {
                let mut flat = Vec::with_capacity(children.len());
                for child in children {
                    let child = child.canonicalize();
                    match child.kind {
                        NodeKind::Sequence { children: inner } => flat.extend(inner),
                        _ => flat.push(child),
                    }
                }
                if flat.len() == 1 {
                    return flat.remove(0);
                }
                NodeKind::Sequence { children: flat }
            }
            NodeKind::Fraction {
                numerator,
                denominator,
            } => NodeKind::Fraction {
                numerator: canon(numerator),
                denominator: canon(denominator),
            },
            NodeKind::Power { base, exponent } => NodeKind::Power {
                base: canon(base),
                exponent: canon(exponent),
            },
            NodeKind::Subscript { base, subscript } => NodeKind::Subscript {
                base: canon(base),
                subscript: canon(subscript),
            },
            NodeKind::Radical { index, radicand } => NodeKind::Radical {
                index: index.map(canon),
                radicand: canon(radicand),
            },
            NodeKind::BigOperator {
                operator,
                lower,
                upper,
                body,
            } => NodeKind::BigOperator {
                operator,
                lower: lower.map(canon),
                upper: upper.map(canon),
                body: canon(body),
            },
            NodeKind::Matrix { delimiter, rows } => NodeKind::Matrix {
                delimiter,
                rows: rows
                    .into_iter()
                    .map(|row| row.into_iter().map(|c| c.canonicalize()).collect())
                    .collect(),
            },
            leaf @ (NodeKind::Leaf { .. } | NodeKind::Unresolved { .. }) => leaf,
        };
        ExpressionNode {
            id,
            confidence,
            kind,
        }
    }

    /// Same variant shape and leaf symbols after canonicalisation. Ids,
    /// confidences, alternates and unresolved region indices are ignored.
    pub fn is_isomorphic(&self, other: &ExpressionNode) -> bool {
        shape_eq(&self.canonical(), &other.canonical())
    }
}

fn shape_eq(a: &ExpressionNode, b: &ExpressionNode) -> bool {
    fn opt_eq(a: &Option<Box<ExpressionNode>>, b: &Option<Box<ExpressionNode>>) -> bool {
        match (a, b) {
            (None, None) => true,
            (Some(x), Some(y)) => shape_eq(x, y),
            _ => false,
        }
    }
    fn all_eq(a: &[ExpressionNode], b: &[ExpressionNode]) -> bool {
        a.len() == b.len() && a.iter().zip(b).all(|(x, y)| shape_eq(x, y))
    }

    match (&a.kind, &b.kind) {
        (NodeKind::Leaf { symbol: x, .. }, NodeKind::Leaf { symbol: y, .. }) => x == y,
        (NodeKind::Unresolved { .. }, NodeKind::Unresolved { .. }) => true,
        (
            NodeKind::Fraction {
                numerator: n1,
                denominator: d1,
            },
            NodeKind::Fraction {
                numerator: n2,
                denominator: d2,
            },
        ) => shape_eq(n1, n2) && shape_eq(d1, d2),
        (
            NodeKind::Power {
                base: b1,
                exponent: e1,
            },
            NodeKind::Power {
                base: b2,
                exponent: e2,
            },
        ) => shape_eq(b1, b2) && shape_eq(e1, e2),
        (
            NodeKind::Subscript {
                base: b1,
                subscript: s1,
            },
            NodeKind::Subscript {
                base: b2,
                subscript: s2,
            },
        ) => shape_eq(b1, b2) && shape_eq(s1, s2),
        (
            NodeKind::Radical {
                index: i1,
                radicand: r1,
            },
            NodeKind::Radical {
                index: i2,
                radicand: r2,
            },
        ) => opt_eq(i1, i2) && shape_eq(r1, r2),
        (
            NodeKind::BigOperator {
                operator: k1,
                lower: l1,
                upper: u1,
                body: b1,
            },
            NodeKind::BigOperator {
                operator: k2,
                lower: l2,
                upper: u2,
                body: b2,
            },
        ) => k1 == k2 && opt_eq(l1, l2) && opt_eq(u1, u2) && shape_eq(b1, b2),
        (
            NodeKind::Matrix {
                delimiter: d1,
                rows: r1,
            },
            NodeKind::Matrix {
                delimiter: d2,
                rows: r2,
            },
        ) => d1 == d2 && r1.len() == r2.len() && r1.iter().zip(r2).all(|(x, y)| all_eq(x, y)),
        (NodeKind::Sequence { children: c1 }, NodeKind::Sequence { children: c2 }) => {
            all_eq(c1, c2)
        }
        _ => false,
    }
}

// ── Document tree ────────────────────────────────────────────────────────

/// Document-level tree: one formula root per detected region.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExpressionTree {
    pub roots: Vec<ExpressionNode>,
}

impl ExpressionTree {
    /// Wrap `roots`, number every node in pre-order and compute confidences.
    pub fn new(roots: Vec<ExpressionNode>) -> Self {
        let mut tree = Self { roots };
        tree.renumber();
        tree.recompute_confidence();
        tree
    }

    /// Number every node in pre-order, starting from 1.
    pub fn renumber(&mut self) {
        let mut next = 1u32;
        for root in &mut self.roots {
            root.visit_mut(&mut |n| {
                n.id = NodeId(next);
                next += 1;
            });
        }
    }

    /// Largest id in use (0 for an empty document).
    pub fn max_id(&self) -> NodeId {
        NodeId(self.roots.iter().map(|r| r.max_id()).max().unwrap_or(0))
    }

    /// Give every node of `node` an id not yet used in this tree.
    pub fn assign_fresh_ids(&self, node: &mut ExpressionNode) {
        let mut next = self.max_id().0 + 1;
        number_from(node, &mut next);
    }

    pub fn recompute_confidence(&mut self) {
        for root in &mut self.roots {
            root.recompute_confidence();
        }
    }

    pub fn find(&self, id: NodeId) -> Option<&ExpressionNode> {
        self.roots.iter().find_map(|r| r.find(id))
    }

    pub fn find_mut(&mut self, id: NodeId) -> Option<&mut ExpressionNode> {
        self.roots.iter_mut().find_map(|r| r.find_mut(id))
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.find(id).is_some()
    }

    /// Position of `id` among the formula roots, if it is one.
    pub fn root_position(&self, id: NodeId) -> Option<usize> {
        self.roots.iter().position(|r| r.id == id)
    }

    pub fn node_count(&self) -> usize {
        self.roots.iter().map(|r| r.node_count()).sum()
    }

    /// Per-node confidence, keyed by id.
    pub fn confidence_map(&self) -> BTreeMap<NodeId, f32> {
        let mut map = BTreeMap::new();
        for root in &self.roots {
            root.visit(&mut |n| {
                map.insert(n.id, n.confidence);
            });
        }
        map
    }

    /// Nodes whose confidence falls below `threshold`, in document order.
    pub fn low_confidence(&self, threshold: f32) -> Vec<NodeId> {
        let mut out = Vec::new();
        for root in &self.roots {
            root.visit(&mut |n| {
                if n.confidence < threshold {
                    out.push(n.id);
                }
            });
        }
        out
    }

    pub fn is_isomorphic(&self, other: &ExpressionTree) -> bool {
        self.roots.len() == other.roots.len()
            && self
                .roots
                .iter()
                .zip(&other.roots)
                .all(|(a, b)| a.is_isomorphic(b))
    }
}

/// Number `node` in pre-order starting at `*next`, leaving `*next` one past
/// the last id handed out.
pub fn number_from(node: &mut ExpressionNode, next: &mut u32) {
    node.visit_mut(&mut |n| {
        n.id = NodeId(*next);
        *next += 1;
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sym(name: &str) -> Symbol {
        Symbol::parse(name).unwrap()
    }

    fn sample() -> ExpressionTree {
        // x^{2} + \frac{a}{b}
        ExpressionTree::new(vec![ExpressionNode::sequence(vec![
            ExpressionNode::power(
                ExpressionNode::leaf(sym("x"), 0.9),
                ExpressionNode::leaf(sym("2"), 0.6),
            ),
            ExpressionNode::leaf(Symbol::PLUS, 0.95),
            ExpressionNode::fraction(
                ExpressionNode::leaf(sym("a"), 0.8),
                ExpressionNode::leaf(sym("b"), 0.7),
            ),
        ])])
    }

    #[test]
    fn ids_are_preorder_and_unique() {
        let tree = sample();
        let ids: Vec<u32> = tree.confidence_map().keys().map(|k| k.0).collect();
        assert_eq!(ids, (1..=8).collect::<Vec<_>>());
        assert_eq!(tree.roots[0].id, NodeId(1));
        assert_eq!(tree.max_id(), NodeId(8));
    }

    #[test]
    fn confidence_is_min_over_leaves() {
        let tree = sample();
        assert_eq!(tree.roots[0].confidence, 0.6);
        let frac = tree.find(NodeId(6)).unwrap();
        assert!(matches!(frac.kind, NodeKind::Fraction { .. }));
        assert_eq!(frac.confidence, 0.7);
        assert_eq!(tree.low_confidence(0.75), vec![NodeId(1), NodeId(2), NodeId(4), NodeId(6), NodeId(8)]);
    }

    #[test]
    fn empty_sequence_scores_one_and_unresolved_zero() {
        let tree = ExpressionTree::new(vec![ExpressionNode::empty(), ExpressionNode::unresolved(1)]);
        assert_eq!(tree.roots[0].confidence, 1.0);
        assert_eq!(tree.roots[1].confidence, 0.0);
    }

    #[test]
    fn canonical_form_flattens_sequences() {
        let nested = ExpressionNode::sequence(vec![
            ExpressionNode::leaf(sym("a"), 1.0),
            ExpressionNode::sequence(vec![
                ExpressionNode::leaf(sym("b"), 1.0),
                ExpressionNode::sequence(vec![ExpressionNode::leaf(sym("c"), 1.0)]),
            ]),
            ExpressionNode::empty(),
        ]);
        let flat = ExpressionNode::sequence(vec![
            ExpressionNode::leaf(sym("a"), 0.2),
            ExpressionNode::leaf(sym("b"), 0.3),
            ExpressionNode::leaf(sym("c"), 0.4),
        ]);
        assert!(nested.is_isomorphic(&flat));

        let single = ExpressionNode::sequence(vec![ExpressionNode::leaf(sym("a"), 1.0)]);
        assert!(single.is_isomorphic(&ExpressionNode::leaf(sym("a"), 0.5)));
        assert!(!single.is_isomorphic(&ExpressionNode::leaf(sym("b"), 0.5)));
    }

    #[test]
    fn detach_fills_required_slots_and_clears_optional_ones() {
        let mut tree = ExpressionTree::new(vec![ExpressionNode::radical(
            Some(ExpressionNode::leaf(sym("3"), 1.0)),
            ExpressionNode::fraction(
                ExpressionNode::leaf(sym("a"), 1.0),
                ExpressionNode::leaf(sym("b"), 1.0),
            ),
        )]);
        let mut node = tree.roots.remove(0);
        // ids: 1 radical, 2 index, 3 fraction, 4 a, 5 b
        let index = node.detach(NodeId(2), NodeId(100)).unwrap();
        assert_eq!(index.symbol(), Some(sym("3")));
        assert!(matches!(&node.kind, NodeKind::Radical { index: None, .. }));

        let a = node.detach(NodeId(4), NodeId(101)).unwrap();
        assert_eq!(a.symbol(), Some(sym("a")));
        let hole = node.find(NodeId(101)).unwrap();
        assert!(hole.is_empty_sequence());
        assert!(node.detach(NodeId(42), NodeId(102)).is_none());
    }

    #[test]
    fn fresh_ids_do_not_collide() {
        let tree = sample();
        let mut graft = ExpressionNode::sequence(vec![ExpressionNode::leaf(sym("y"), 1.0)]);
        tree.assign_fresh_ids(&mut graft);
        assert_eq!(graft.id, NodeId(9));
        assert_eq!(graft.children()[0].id, NodeId(10));
    }

    #[test]
    fn serialises_with_type_tag() {
        let tree = ExpressionTree::new(vec![ExpressionNode::leaf(sym("x"), 0.5)]);
        let json = serde_json::to_value(&tree).unwrap();
        assert_eq!(json["roots"][0]["type"], "leaf");
        assert_eq!(json["roots"][0]["symbol"], "x");
        let back: ExpressionTree = serde_json::from_value(json).unwrap();
        assert_eq!(back, tree);
    }
}
