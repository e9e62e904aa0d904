// Project an edit computed on a normalized tree back onto the student's
// original tree. Both trees share tree ids for the nodes they have in
// common, so each change is located by the id of the node it touches and
// replayed on copies of both trees in lockstep. Inserted payloads get fresh
// ids shared by both copies so later changes can reach inside them.

use std::collections::{HashMap, HashSet};

use hintgen_lang::{Kind, Node, TreeId, TreePath};
use tracing::debug;

use crate::abstraction::{NameMap, is_placeholder};
use crate::diff::{Change, ChangeVector, apply_change};
use crate::error::EngineError;

/// Restores student names in labels and payloads.
struct Renamer<'a> {
    names: &'a NameMap,
    invented: HashMap<String, String>,
    /// Every name the student's code already binds or mentions.
    taken: HashSet<String>,
}

impl<'a> Renamer<'a> {
    fn new(names: &'a NameMap, original: &Node) -> Self {
        let taken = original
            .walk()
            .filter(|n| matches!(n.kind, Kind::Name | Kind::Param | Kind::FunctionDef))
            .filter_map(|n| n.label.clone())
            .collect();
        Self {
            names,
            invented: HashMap::new(),
            taken,
        }
    }

    fn restore(&mut self, label: &str) -> String {
        if let Some(original) = self.names.original(label) {
            return original.to_string();
        }
        if !is_placeholder(label) {
            return label.to_string();
        }
        if let Some(name) = self.invented.get(label) {
            return name.clone();
        }
        let name = self.fresh_name();
        self.taken.insert(name.clone());
        self.invented.insert(label.to_string(), name.clone());
        name
    }

    /// `new_variable`, `new_variable2`, ... skipping names already in use.
    fn fresh_name(&self) -> String {
        (1..)
            .map(|n: usize| {
                if n == 1 {
                    "new_variable".to_string()
                } else {
                    format!("new_variable{n}")
                }
            })
            .find(|name| !self.taken.contains(name))
            .unwrap_or_default()
    }

    fn restore_tree(&mut self, node: &mut Node) {
        node.for_each_mut(&mut |n| {
            if matches!(n.kind, Kind::Name | Kind::Param | Kind::FunctionDef) {
                if let Some(label) = &n.label {
                    n.label = Some(self.restore(label));
                }
            }
        });
    }
}

fn mirror(op: &str) -> Option<&'static str> {
    Some(match op {
        "<" => ">",
        "<=" => ">=",
        ">" => "<",
        ">=" => "<=",
        _ => return None,
    })
}

fn max_id(tree: &Node) -> u32 {
    tree.walk().filter_map(|n| n.id).map(|id| id.0).max().unwrap_or(0)
}

/// Lockstep replay state.
struct Projection<'a> {
    norm: Node,
    orig: Node,
    renamer: Renamer<'a>,
    next_id: u32,
}

impl Projection<'_> {
    fn with_fresh_ids(&mut self, payload: &Node) -> Node {
        let mut copy = payload.clone();
        copy.for_each_mut(&mut |n| {
            n.id = Some(TreeId(self.next_id));
            self.next_id += 1;
            n.span = None;
        });
        copy
    }

    fn orig_path(&self, id: Option<TreeId>) -> Option<TreePath> {
        self.orig.find_path(id?)
    }

    /// Index in `parent` (an original node) after the child carrying
    /// `anchor`; 0 without an anchor.
    fn after_anchor(&self, parent: &Node, anchor: Option<&Node>) -> Option<usize> {
        match anchor {
            None => Some(0),
            Some(anchor) => {
                let id = anchor.id?;
                parent
                    .children
                    .iter()
                    .position(|c| c.id == Some(id))
                    .map(|p| p + 1)
            }
        }
    }

    /// Translate one change. Returns the change to replay on the normalized
    /// copy (with payload ids filled in) and the projected change, if any.
    fn translate(&mut self, cv: &ChangeVector) -> (ChangeVector, Option<ChangeVector>) {
        let Some(norm_node) = self.norm.get(&cv.path).cloned() else {
            return (cv.clone(), None);
        };
        let parent_path = self.orig_path(norm_node.id);

        match &cv.change {
            Change::Relabel { old, new } => {
                let Some(path) = parent_path else {
                    return (cv.clone(), None);
                };
                let Some(orig_node) = self.orig.get(&path) else {
                    return (cv.clone(), None);
                };
                let mut label = new.as_deref().map(|l| self.renamer.restore(l));
                if norm_node.kind == Kind::Op {
                    let mirrored = old
                        .as_deref()
                        .and_then(mirror)
                        .is_some_and(|m| Some(m) == orig_node.label.as_deref());
                    if mirrored {
                        label = label.map(|l| mirror(&l).map_or(l, str::to_string));
                    }
                }
                if label == orig_node.label {
                    return (cv.clone(), None);
                }
                let projected = ChangeVector {
                    path,
                    target: orig_node.id,
                    change: Change::Relabel {
                        old: orig_node.label.clone(),
                        new: label,
                    },
                    weight: cv.weight,
                };
                (cv.clone(), Some(projected))
            }
            Change::Replace { new, .. } => {
                let norm_payload = self.with_fresh_ids(new);
                let replay = ChangeVector {
                    change: Change::Replace {
                        old: norm_node.clone(),
                        new: norm_payload.clone(),
                    },
                    ..cv.clone()
                };
                let Some(path) = parent_path else {
                    return (replay, None);
                };
                let Some(orig_node) = self.orig.get(&path).cloned() else {
                    return (replay, None);
                };
                let mut payload = norm_payload;
                self.renamer.restore_tree(&mut payload);
                let projected = ChangeVector {
                    path,
                    target: orig_node.id,
                    change: Change::Replace {
                        old: orig_node,
                        new: payload,
                    },
                    weight: cv.weight,
                };
                (replay, Some(projected))
            }
            Change::Insert { index, node } => {
                let norm_payload = self.with_fresh_ids(node);
                let replay = ChangeVector {
                    change: Change::Insert {
                        index: *index,
                        node: norm_payload.clone(),
                    },
                    ..cv.clone()
                };
                let anchor = index.checked_sub(1).and_then(|i| norm_node.children.get(i));
                let Some(path) = parent_path else {
                    return (replay, None);
                };
                let Some(orig_parent) = self.orig.get(&path) else {
                    return (replay, None);
                };
                let Some(orig_index) = self.after_anchor(orig_parent, anchor) else {
                    return (replay, None);
                };
                let target = orig_parent.id;
                let mut payload = norm_payload;
                self.renamer.restore_tree(&mut payload);
                let projected = ChangeVector {
                    path,
                    target,
                    change: Change::Insert {
                        index: orig_index,
                        node: payload,
                    },
                    weight: cv.weight,
                };
                (replay, Some(projected))
            }
            Change::Delete { index, .. } => {
                let removed = norm_node.children.get(*index);
                let Some(mut path) = self.orig_path(removed.and_then(|n| n.id)) else {
                    return (cv.clone(), None);
                };
                let Some(orig_index) = path.pop() else {
                    return (cv.clone(), None);
                };
                let Some(orig_parent) = self.orig.get(&path) else {
                    return (cv.clone(), None);
                };
                let Some(removed) = orig_parent.children.get(orig_index).cloned() else {
                    return (cv.clone(), None);
                };
                let projected = ChangeVector {
                    path,
                    target: orig_parent.id,
                    change: Change::Delete {
                        index: orig_index,
                        node: removed,
                    },
                    weight: cv.weight,
                };
                (cv.clone(), Some(projected))
            }
            Change::Move { from, to, .. } => {
                let moved = norm_node.children.get(*from);
                let Some(mut path) = self.orig_path(moved.and_then(|n| n.id)) else {
                    return (cv.clone(), None);
                };
                let Some(orig_from) = path.pop() else {
                    return (cv.clone(), None);
                };
                // Anchor in the normalized list once the moved child is out.
                let mut remaining = norm_node.children.clone();
                if *from < remaining.len() {
                    remaining.remove(*from);
                }
                let anchor = to.checked_sub(1).and_then(|i| remaining.get(i));
                let Some(orig_parent) = self.orig.get(&path) else {
                    return (cv.clone(), None);
                };
                let mut orig_remaining = orig_parent.clone();
                if orig_from >= orig_remaining.children.len() {
                    return (cv.clone(), None);
                }
                let node = orig_remaining.children.remove(orig_from);
                let Some(orig_to) = self.after_anchor(&orig_remaining, anchor) else {
                    return (cv.clone(), None);
                };
                if orig_to == orig_from {
                    return (cv.clone(), None);
                }
                let projected = ChangeVector {
                    path,
                    target: orig_parent.id,
                    change: Change::Move {
                        from: orig_from,
                        to: orig_to,
                        node,
                    },
                    weight: cv.weight,
                };
                (cv.clone(), Some(projected))
            }
        }
    }
}

/// Translate `changes`, computed on `normalized`, onto `original`, whose
/// nodes share tree ids with `normalized`. Placeholder names are restored
/// from `names`; placeholders with no student name become `new_variable`,
/// `new_variable2`, and so on, skipping names the original already uses. Changes that touch nodes absent from the
/// original, or that would not change it, are dropped: an empty result
/// means the edit has no effect on the student's code.
pub fn map_edit(
    normalized: &Node,
    original: &Node,
    changes: &[ChangeVector],
    names: &NameMap,
) -> Result<Vec<ChangeVector>, EngineError> {
    let mut projection = Projection {
        norm: normalized.clone(),
        orig: original.clone(),
        renamer: Renamer::new(names, original),
        next_id: max_id(normalized).max(max_id(original)) + 1,
    };

    let mut out = Vec::new();
    for cv in changes {
        let (replay, projected) = projection.translate(cv);
        apply_change(&mut projection.norm, &replay)?;
        match projected {
            Some(projected) => {
                apply_change(&mut projection.orig, &projected)?;
                out.push(projected);
            }
            None => debug!(change = cv.change.name(), path = ?cv.path, "change dropped"),
        }
    }
    Ok(out)
}
