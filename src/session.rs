//! Interactive correction of a conversion result.
//!
//! A [`CorrectionSession`] starts from a [`ConversionResult`] and accepts
//! batches of [`CorrectionEdit`]s. Each batch is applied to a private copy of
//! the current snapshot; only when every edit in the batch succeeds is the
//! copy re-synthesised and published as the new snapshot. A failing edit
//! returns [`HandTexError::InvalidEdit`] and the published snapshot is left
//! exactly as it was.
//!
//! ## Sharing
//!
//! The first snapshot is the result's own tree behind its `Arc`; nothing is
//! copied until the first accepted batch. Snapshots are never mutated after
//! publication, so the undo stack holds plain `Arc` clones.
//!
//! ## Lifecycle
//!
//! ```text
//! Open ──apply/undo──▶ Open ──commit──▶ Committed
//! ```
//!
//! `Committed` is terminal: `apply`, `undo` and `commit` all fail with
//! [`HandTexError::SessionClosed`].

use crate::error::HandTexError;
use crate::latex::{self, synthesize_roots};
use crate::output::ConversionResult;
use crate::symbols::Symbol;
use crate::tree::{number_from, Alternate, ExpressionNode, ExpressionTree, NodeId, NodeKind};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

// ── Edits ────────────────────────────────────────────────────────────────

/// One correction against a node of the current snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrectionEdit {
    pub node_id: NodeId,
    #[serde(flatten)]
    pub kind: EditKind,
}

impl CorrectionEdit {
    pub fn new(node_id: NodeId, kind: EditKind) -> Self {
        Self { node_id, kind }
    }
}

/// What to do to the target node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum EditKind {
    /// Swap the symbol of a leaf (or fill an unresolved placeholder).
    /// `symbol` is a symbol name (`alpha`) or its LaTeX (`\alpha`).
    ReplaceSymbol { symbol: String },
    /// Move the node under the sequence `new_parent` at `index`.
    Reparent { new_parent: NodeId, index: usize },
    Delete,
    /// Mark every leaf beneath the node as checked by a person.
    Confirm,
    /// Replace the subtree with the parse of `latex`.
    ReplaceLatex { latex: String },
}

/// An accepted batch, as recorded in the session history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppliedBatch {
    /// Snapshot version the batch produced.
    pub version: u64,
    pub edits: Vec<CorrectionEdit>,
}

// ── Snapshots ────────────────────────────────────────────────────────────

/// An immutable published state of the session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub version: u64,
    pub tree: Arc<ExpressionTree>,
    pub formulas: Vec<String>,
    pub latex: String,
}

impl Snapshot {
    fn from_tree(version: u64, tree: Arc<ExpressionTree>) -> Result<Self, HandTexError> {
        let formulas = synthesize_roots(&tree)?;
        Ok(Self {
            version,
            latex: formulas.join("\n"),
            formulas,
            tree,
        })
    }

    pub fn confidence(&self) -> BTreeMap<NodeId, f32> {
        self.tree.confidence_map()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Open,
    Committed,
}

/// Serialisable summary of a session, as returned by the HTTP service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionView {
    pub id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_id: Option<Uuid>,
    pub state: SessionState,
    pub snapshot: Snapshot,
    pub confidence: BTreeMap<NodeId, f32>,
    pub history: Vec<AppliedBatch>,
}

// ── Session ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct CorrectionSession {
    id: Uuid,
    result_id: Option<Uuid>,
    state: SessionState,
    current: Snapshot,
    undo_stack: Vec<Snapshot>,
    history: Vec<AppliedBatch>,
    /// Next id to hand out. Never decreases, so an id retired by an edit
    /// is never given to a later node, undo included.
    next_id: u32,
}

impl CorrectionSession {
    /// Open a session over `result`, sharing its tree.
    pub fn new(result: &ConversionResult) -> Self {
        let current = Snapshot {
            version: 0,
            tree: Arc::clone(&result.tree),
            formulas: result.formulas.clone(),
            latex: result.latex.clone(),
        };
        Self::with_snapshot(Some(result.id), current)
    }

    /// Open a session over a bare tree.
    pub fn from_tree(tree: ExpressionTree) -> Result<Self, HandTexError> {
        let current = Snapshot::from_tree(0, Arc::new(tree))?;
        Ok(Self::with_snapshot(None, current))
    }

    fn with_snapshot(result_id: Option<Uuid>, current: Snapshot) -> Self {
        let id = Uuid::new_v4();
        info!(session = %id, nodes = current.tree.node_count(), "Correction session opened");
        let next_id = current.tree.max_id().0 + 1;
        Self {
            id,
            result_id,
            state: SessionState::Open,
            current,
            undo_stack: Vec::new(),
            history: Vec::new(),
            next_id,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn result_id(&self) -> Option<Uuid> {
        self.result_id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn snapshot(&self) -> &Snapshot {
        &self.current
    }

    pub fn latex(&self) -> &str {
        &self.current.latex
    }

    pub fn history(&self) -> &[AppliedBatch] {
        &self.history
    }

    /// Nodes still worth a reviewer's attention.
    pub fn low_confidence(&self, threshold: f32) -> Vec<NodeId> {
        self.current.tree.low_confidence(threshold)
    }

    pub fn view(&self) -> SessionView {
        SessionView {
            id: self.id,
            result_id: self.result_id,
            state: self.state,
            confidence: self.current.confidence(),
            snapshot: self.current.clone(),
            history: self.history.clone(),
        }
    }

    /// Apply `edits` in order, all or nothing.
    ///
    /// An empty batch is accepted and changes nothing.
    pub fn apply(&mut self, edits: Vec<CorrectionEdit>) -> Result<&Snapshot, HandTexError> {
        self.ensure_open()?;
        if edits.is_empty() {
            return Ok(&self.current);
        }

        let mut tree = ExpressionTree::clone(&self.current.tree);
        let mut next_id = self.next_id;
        for (i, edit) in edits.iter().enumerate() {
            if let Err(e) = apply_edit(&mut tree, edit, &mut next_id) {
                warn!(session = %self.id, edit = i, "Rejected correction batch: {e}");
                return Err(e);
            }
        }

        let next = Snapshot::from_tree(self.current.version + 1, Arc::new(tree)).map_err(|e| {
            error!(session = %self.id, "Edited tree failed to synthesise: {e}");
            e
        })?;
        let previous = std::mem::replace(&mut self.current, next);
        self.undo_stack.push(previous);
        self.next_id = next_id;
        self.history.push(AppliedBatch {
            version: self.current.version,
            edits,
        });

        info!(
            session = %self.id,
            version = self.current.version,
            "Correction batch applied"
        );
        Ok(&self.current)
    }

    /// Restore the snapshot from before the last accepted batch.
    pub fn undo(&mut self) -> Result<&Snapshot, HandTexError> {
        self.ensure_open()?;
        let previous = self
            .undo_stack
            .pop()
            .ok_or_else(|| HandTexError::InvalidEdit("nothing to undo".to_string()))?;
        self.history.pop();
        self.current = previous;
        info!(session = %self.id, version = self.current.version, "Correction batch undone");
        Ok(&self.current)
    }

    /// Close the session and return the final LaTeX.
    pub fn commit(&mut self) -> Result<String, HandTexError> {
        self.ensure_open()?;
        self.state = SessionState::Committed;
        info!(
            session = %self.id,
            batches = self.history.len(),
            "Correction session committed"
        );
        Ok(self.current.latex.clone())
    }

    fn ensure_open(&self) -> Result<(), HandTexError> {
        match self.state {
            SessionState::Open => Ok(()),
            SessionState::Committed => Err(HandTexError::SessionClosed),
        }
    }
}

// ── Edit semantics ───────────────────────────────────────────────────────

fn invalid(message: impl Into<String>) -> HandTexError {
    HandTexError::InvalidEdit(message.into())
}

fn apply_edit(
    tree: &mut ExpressionTree,
    edit: &CorrectionEdit,
    next_id: &mut u32,
) -> Result<(), HandTexError> {
    let id = edit.node_id;
    if !tree.contains(id) {
        return Err(invalid(format!("node {id} does not exist")));
    }

    match &edit.kind {
        EditKind::ReplaceSymbol { symbol } => replace_symbol(tree, id, symbol)?,
        EditKind::Reparent { new_parent, index } => {
            reparent(tree, id, *new_parent, *index, next_id)?
        }
        EditKind::Delete => delete(tree, id, next_id),
        EditKind::Confirm => {
            if let Some(node) = tree.find_mut(id) {
                node.visit_mut(&mut |n| {
                    if n.is_leaf() {
                        n.confidence = 1.0;
                    }
                });
            }
        }
        EditKind::ReplaceLatex { latex } => {
            let mut replacement =
                latex::parse(latex).map_err(|e| invalid(format!("node {id}: {e}")))?;
            number_from(&mut replacement, next_id);
            if let Some(node) = tree.find_mut(id) {
                *node = replacement;
            }
        }
    }

    tree.recompute_confidence();
    Ok(())
}

fn replace_symbol(tree: &mut ExpressionTree, id: NodeId, name: &str) -> Result<(), HandTexError> {
    let symbol = Symbol::parse(name.trim())
        .ok_or_else(|| invalid(format!("unknown symbol '{name}'")))?;
    if symbol.is_marker() {
        return Err(invalid(format!(
            "'{name}' is a structural marker and cannot stand alone"
        )));
    }

    let node = tree
        .find_mut(id)
        .ok_or_else(|| invalid(format!("node {id} does not exist")))?;
    let previous_confidence = node.confidence;
    if matches!(node.kind, NodeKind::Unresolved { .. }) {
        node.kind = NodeKind::Leaf {
            symbol,
            alternates: Vec::new(),
        };
    } else if let NodeKind::Leaf {
        symbol: current,
        alternates,
    } = &mut node.kind
    {
        if *current != symbol {
            alternates.retain(|a| a.symbol != symbol);
            alternates.insert(
                0,
                Alternate {
                    symbol: *current,
                    confidence: previous_confidence,
                },
            );
            *current = symbol;
        }
    } else {
        return Err(invalid(format!("node {id} is not a leaf")));
    }
    node.confidence = 1.0;
    Ok(())
}

fn reparent(
    tree: &mut ExpressionTree,
    id: NodeId,
    new_parent: NodeId,
    index: usize,
    next_id: &mut u32,
) -> Result<(), HandTexError> {
    if tree.root_position(id).is_some() {
        return Err(invalid(format!("node {id} is a formula root")));
    }
    let parent = tree
        .find(new_parent)
        .ok_or_else(|| invalid(format!("node {new_parent} does not exist")))?;
    if tree.find(id).is_some_and(|n| n.contains(new_parent)) {
        return Err(invalid(format!(
            "node {new_parent} lies inside the moved node {id}"
        )));
    }
    if !parent.is_sequence() {
        return Err(invalid(format!("node {new_parent} is not a sequence")));
    }

    let placeholder = take_id(next_id);
    let moved = tree
        .roots
        .iter_mut()
        .find_map(|root| root.detach(id, placeholder))
        .ok_or_else(|| invalid(format!("node {id} could not be detached")))?;

    match tree.find_mut(new_parent).map(|n| &mut n.kind) {
        Some(NodeKind::Sequence { children }) => {
            if index > children.len() {
                return Err(invalid(format!(
                    "index {index} is past the {} children of node {new_parent}",
                    children.len()
                )));
            }
            children.insert(index, moved);
            Ok(())
        }
        _ => Err(invalid(format!("node {new_parent} is not a sequence"))),
    }
}

fn take_id(next_id: &mut u32) -> NodeId {
    let id = NodeId(*next_id);
    *next_id += 1;
    id
}

fn delete(tree: &mut ExpressionTree, id: NodeId, next_id: &mut u32) {
    let placeholder = take_id(next_id);
    if let Some(pos) = tree.root_position(id) {
        let mut empty = ExpressionNode::empty();
        empty.id = placeholder;
        tree.roots[pos] = empty;
        return;
    }
    for root in &mut tree.roots {
        if root.detach(id, placeholder).is_some() {
            return;
        }
    }
}
