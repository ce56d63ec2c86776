//! Side-by-side rendering of a compared pair.
//!
//! Both sides are parsed into [`HighlightTree`]s, diff entries are attached
//! to the nodes their locators name, and the trees are walked in lock-step
//! so that every row holds one node per side. Content present on one side
//! only is flattened and faced with a `HIDDEN` placeholder on the other.

pub mod builders;
pub mod tree;

pub use tree::{HighlightTree, HighlightView, HighlighterNode, NodeId};

use rverify_common::{ContentType, DiffEntry, EngineConfig, ResultType, VerifyError};
use serde::Serialize;
use std::collections::HashSet;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HighlightOptions {
    /// Nodes at this depth are flattened
    pub max_depth: usize,
    pub encode: bool,
    pub combined: bool,
    pub case_insensitive_keys: bool,
    pub column_prefix: String,
}

impl HighlightOptions {
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            max_depth: config.highlight_max_depth,
            encode: config.encode_highlight,
            combined: true,
            case_insensitive_keys: false,
            column_prefix: config.generated_column_prefix.clone(),
        }
    }
}

impl Default for HighlightOptions {
    fn default() -> Self {
        Self::from_config(&EngineConfig::default())
    }
}

/// One rendered row of the merged view
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CombinedRow {
    pub row: usize,
    pub depth: usize,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expected: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actual: Option<String>,
    pub status: ResultType,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HighlighterResult {
    pub er: HighlightView,
    pub ar: HighlightView,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub combined: Option<Vec<CombinedRow>>,
}

pub fn highlight(
    content_type: ContentType,
    diffs: &[DiffEntry],
    expected: &str,
    actual: &str,
    options: &HighlightOptions,
) -> Result<HighlighterResult, VerifyError> {
    let mut aligner = Aligner {
        er: builders::build(content_type, expected, "expected", options)?,
        ar: builders::build(content_type, actual, "actual", options)?,
        unpaired: HashSet::new(),
    };
    for diff in diffs {
        aligner.apply(diff)?;
    }
    cap_depth(&mut aligner.er, options.max_depth)?;
    cap_depth(&mut aligner.ar, options.max_depth)?;

    let rows = aligner.assign_rows()?;
    debug!("Highlighted {} diff(s) over {} row(s)", diffs.len(), rows.len());
    let combined = if options.combined {
        Some(aligner.combined(&rows)?)
    } else {
        None
    };

    let Aligner { mut er, mut ar, .. } = aligner;
    if options.encode {
        er.encode(HighlightTree::ROOT);
        ar.encode(HighlightTree::ROOT);
    }
    Ok(HighlighterResult {
        er: er.to_view(HighlightTree::ROOT),
        ar: ar.to_view(HighlightTree::ROOT),
        combined,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Side {
    Expected,
    Actual,
}

struct Aligner {
    er: HighlightTree,
    ar: HighlightTree,
    /// Nodes that exist on one side only; each faces a placeholder row
    unpaired: HashSet<(Side, NodeId)>,
}

impl Aligner {
    fn apply(&mut self, diff: &DiffEntry) -> Result<(), VerifyError> {
        let er_locator = diff.expected_name.as_deref().or(diff.path.as_deref());
        let ar_locator = diff.actual_name.as_deref().or(diff.path.as_deref());
        match diff.result {
            ResultType::Missed | ResultType::ErMissed => {
                if let Some(id) = er_locator.and_then(|l| self.er.find_by_path(l)) {
                    self.one_sided(Side::Expected, id, diff.result)?;
                }
            }
            ResultType::Extra | ResultType::ArMissed => {
                if let Some(id) = ar_locator.and_then(|l| self.ar.find_by_path(l)) {
                    self.one_sided(Side::Actual, id, diff.result)?;
                }
            }
            result => {
                if let Some(id) = er_locator.and_then(|l| self.er.find_by_path(l)) {
                    self.er.node_mut(id).mark(result);
                }
                if let Some(id) = ar_locator.and_then(|l| self.ar.find_by_path(l)) {
                    self.ar.node_mut(id).mark(result);
                }
            }
        }
        Ok(())
    }

    /// Flatten a node that exists on one side only. Its placeholder is placed
    /// while aligning, next to the counterpart of its preceding sibling.
    fn one_sided(&mut self, side: Side, id: NodeId, result: ResultType) -> Result<(), VerifyError> {
        let source = match side {
            Side::Expected => &mut self.er,
            Side::Actual => &mut self.ar,
        };
        source.node_mut(id).mark(result);
        source.convert_to_plain(id, false)?;
        self.unpaired.insert((side, id));
        Ok(())
    }

    /// Number both trees row by row, padding whatever still differs in shape.
    fn assign_rows(&mut self) -> Result<Vec<(NodeId, NodeId, usize)>, VerifyError> {
        let mut rows = Vec::new();
        self.align(HighlightTree::ROOT, HighlightTree::ROOT, 0, &mut rows)?;
        Ok(rows)
    }

    fn align(
        &mut self,
        e: NodeId,
        a: NodeId,
        depth: usize,
        rows: &mut Vec<(NodeId, NodeId, usize)>,
    ) -> Result<(), VerifyError> {
        let row = rows.len();
        for (tree, id) in [(&mut self.er, e), (&mut self.ar, a)] {
            let node = tree.node_mut(id);
            node.row = Some(row);
            if node.is_placeholder() {
                node.linked_row = Some(row);
            }
        }
        rows.push((e, a, depth));

        let er_leaf = self.er.children(e).is_empty();
        let ar_leaf = self.ar.children(a).is_empty();
        match (er_leaf, ar_leaf) {
            (true, true) => return Ok(()),
            (true, false) => return self.ar.convert_to_plain(a, false),
            (false, true) => return self.er.convert_to_plain(e, false),
            (false, false) => {}
        }

        let mut pairs = Vec::new();
        for (position, (ec, ac)) in self.pair_children(e, a).into_iter().enumerate() {
            let ec = match ec {
                Some(id) => id,
                None => self.er.insert_placeholder(e, position),
            };
            let ac = match ac {
                Some(id) => id,
                None => self.ar.insert_placeholder(a, position),
            };
            pairs.push((ec, ac));
        }
        for (ec, ac) in pairs {
            self.align(ec, ac, depth + 1, rows)?;
        }
        Ok(())
    }

    /// Walk both child lists in document order. An unpaired child takes its row
    /// opposite a placeholder; other children pair up in turn, and the shorter
    /// list is padded at the end.
    fn pair_children(&self, e: NodeId, a: NodeId) -> Vec<(Option<NodeId>, Option<NodeId>)> {
        let er_children = self.er.children(e);
        let ar_children = self.ar.children(a);
        let (mut i, mut j) = (0, 0);
        let mut pairs = Vec::with_capacity(er_children.len().max(ar_children.len()));
        loop {
            let ec = er_children.get(i).copied();
            let ac = ar_children.get(j).copied();
            let pair = match (ec, ac) {
                (None, None) => break,
                (Some(ec), Some(ac)) => {
                    if self.unpaired.contains(&(Side::Expected, ec)) {
                        (Some(ec), None)
                    } else if self.unpaired.contains(&(Side::Actual, ac)) {
                        (None, Some(ac))
                    } else {
                        (Some(ec), Some(ac))
                    }
                }
                other => other,
            };
            i += usize::from(pair.0.is_some());
            j += usize::from(pair.1.is_some());
            pairs.push(pair);
        }
        pairs
    }

    fn combined(&self, rows: &[(NodeId, NodeId, usize)]) -> Result<Vec<CombinedRow>, VerifyError> {
        rows.iter()
            .enumerate()
            .map(|(row, &(e, a, depth))| {
                let er = self.er.node(e);
                let ar = self.ar.node(a);
                let name = if er.is_placeholder() { &ar.name } else { &er.name };
                Ok(CombinedRow {
                    row,
                    depth,
                    name: name.clone(),
                    expected: row_value(&self.er, e)?,
                    actual: row_value(&self.ar, a)?,
                    status: ResultType::worst(er.status.into_iter().chain(ar.status)),
                })
            })
            .collect()
    }
}

fn row_value(tree: &HighlightTree, id: NodeId) -> Result<Option<String>, VerifyError> {
    let node = tree.node(id);
    if node.is_placeholder() || !node.children.is_empty() {
        return Ok(None);
    }
    tree.decode_value(id)
}

/// Flatten every node sitting at `max_depth` that still has children.
fn cap_depth(tree: &mut HighlightTree, max_depth: usize) -> Result<(), VerifyError> {
    let mut stack = vec![(HighlightTree::ROOT, 0)];
    while let Some((id, depth)) = stack.pop() {
        if tree.children(id).is_empty() {
            continue;
        }
        if depth >= max_depth {
            tree.convert_to_plain(id, false)?;
        } else {
            stack.extend(tree.children(id).iter().map(|c| (*c, depth + 1)));
        }
    }
    Ok(())
}
