//! Weighted tree diff.
//!
//! [`diff`] computes a sequence of typed change vectors turning tree A into
//! tree B. Changes are emitted so that applying them one after another to A
//! (see [`apply_changes`]) yields B: every path is valid in the tree as it
//! stands after the preceding changes.
//!
//! Costs: inserting or deleting a subtree costs its weight, replacing costs
//! the weight of both subtrees, relabeling and moving cost 1. Identical
//! subtrees are recognized by structural hash and cost nothing; subtree pair
//! costs are memoized by hash pair.

use std::collections::HashMap;
use std::hash::{DefaultHasher, Hash, Hasher};

use hintgen_lang::{Node, TreeId, TreePath};
use serde::{Deserialize, Serialize};

use crate::error::EngineError;

/// One typed edit operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Change {
    /// Insert `node` as child `index` of the node at the vector's path.
    Insert { index: usize, node: Node },
    /// Remove child `index` (equal to `node`) of the node at the path.
    Delete { index: usize, node: Node },
    /// Remove child `from` of the node at the path and reinsert it at `to`
    /// of the shortened child list.
    Move { from: usize, to: usize, node: Node },
    /// Replace the node at the path.
    Replace { old: Node, new: Node },
    /// Change the label of the node at the path.
    Relabel {
        old: Option<String>,
        new: Option<String>,
    },
}

impl Change {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Insert { .. } => "insert",
            Self::Delete { .. } => "delete",
            Self::Move { .. } => "move",
            Self::Replace { .. } => "replace",
            Self::Relabel { .. } => "relabel",
        }
    }
}

/// A change located in the tree.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeVector {
    /// Path to the touched node (relabel/replace) or to the parent whose
    /// children change (insert/delete/move).
    pub path: TreePath,
    /// Tree id of the node at `path` in the tree the change was computed on.
    pub target: Option<TreeId>,
    pub change: Change,
    pub weight: u32,
}

impl ChangeVector {
    /// Same operation at the same place, regardless of ids and spans.
    pub fn same_edit(&self, other: &ChangeVector) -> bool {
        self.path == other.path
            && match (&self.change, &other.change) {
                (Change::Insert { index: i, node: a }, Change::Insert { index: j, node: b })
                | (Change::Delete { index: i, node: a }, Change::Delete { index: j, node: b }) => {
                    i == j && a.structurally_eq(b)
                }
                (
                    Change::Move { from: f1, to: t1, .. },
                    Change::Move { from: f2, to: t2, .. },
                ) => f1 == f2 && t1 == t2,
                (Change::Replace { old: o1, new: n1 }, Change::Replace { old: o2, new: n2 }) => {
                    o1.structurally_eq(o2) && n1.structurally_eq(n2)
                }
                (Change::Relabel { old: o1, new: n1 }, Change::Relabel { old: o2, new: n2 }) => {
                    o1 == o2 && n1 == n2
                }
                _ => false,
            }
    }
}

/// Weight charged for inserting or deleting a subtree.
pub fn subtree_weight(node: &Node) -> u32 {
    node.weight().max(1)
}

/// Total weight of a change sequence.
pub fn edit_weight(changes: &[ChangeVector]) -> u32 {
    changes.iter().map(|c| c.weight).sum()
}

// ── Digests ─────────────────────────────────────────────────────────

/// Per-node structural hash and weight, computed once per diff.
#[derive(Debug)]
struct Digest {
    hash: u64,
    weight: u32,
    children: Vec<Digest>,
}

impl Digest {
    fn of(node: &Node) -> Self {
        let children: Vec<Digest> = node.children.iter().map(Digest::of).collect();
        let mut hasher = DefaultHasher::new();
        node.kind.hash(&mut hasher);
        node.label.hash(&mut hasher);
        children.len().hash(&mut hasher);
        for child in &children {
            child.hash.hash(&mut hasher);
        }
        let weight =
            u32::from(!node.kind.is_container()) + children.iter().map(|c| c.weight).sum::<u32>();
        Self {
            hash: hasher.finish(),
            weight,
            children,
        }
    }

    fn cost(&self) -> u32 {
        self.weight.max(1)
    }
}

// ── Alignment ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    Match(usize, usize),
    Delete(usize),
    Insert(usize),
}

#[derive(Debug, Default)]
struct Differ {
    memo: HashMap<(u64, u64), u32>,
}

impl Differ {
    fn cost(&mut self, a: &Node, da: &Digest, b: &Node, db: &Digest) -> u32 {
        if da.hash == db.hash {
            return 0;
        }
        if let Some(&cached) = self.memo.get(&(da.hash, db.hash)) {
            return cached;
        }
        let replace = da.cost() + db.cost();
        let cost = if a.kind == b.kind {
            self.recursive_cost(a, da, b, db).min(replace)
        } else {
            replace
        };
        self.memo.insert((da.hash, db.hash), cost);
        cost
    }

    fn recursive_cost(&mut self, a: &Node, da: &Digest, b: &Node, db: &Digest) -> u32 {
        let label = u32::from(a.label != b.label);
        let children = if pairs_positionally(a, b) {
            a.children
                .iter()
                .zip(&da.children)
                .zip(b.children.iter().zip(&db.children))
                .map(|((ca, cda), (cb, cdb))| self.cost(ca, cda, cb, cdb))
                .sum()
        } else {
            self.align(a, da, b, db).0
        };
        label + children
    }

    /// Sequence alignment of two child lists. A pair is matched only when
    /// matching is strictly cheaper than deleting one and inserting the
    /// other.
    fn align(&mut self, a: &Node, da: &Digest, b: &Node, db: &Digest) -> (u32, Vec<Step>) {
        let (n, m) = (a.children.len(), b.children.len());
        // table[i][j]: cost of aligning a[i..] with b[j..]
        let mut table = vec![vec![0u32; m + 1]; n + 1];
        let mut sub = vec![vec![None; m]; n];
        for i in (0..n).rev() {
            table[i][m] = table[i + 1][m] + da.children[i].cost();
        }
        for j in (0..m).rev() {
            table[n][j] = table[n][j + 1] + db.children[j].cost();
        }
        for i in (0..n).rev() {
            for j in (0..m).rev() {
                let del = table[i + 1][j] + da.children[i].cost();
                let ins = table[i][j + 1] + db.children[j].cost();
                let mut best = del.min(ins);
                let pair = self.cost(
                    &a.children[i],
                    &da.children[i],
                    &b.children[j],
                    &db.children[j],
                );
                if pair < da.children[i].cost() + db.children[j].cost() {
                    sub[i][j] = Some(pair);
                    best = best.min(table[i + 1][j + 1] + pair);
                }
                table[i][j] = best;
            }
        }

        let mut steps = Vec::with_capacity(n.max(m));
        let (mut i, mut j) = (0, 0);
        while i < n || j < m {
            if i < n && j < m {
                if let Some(pair) = sub[i][j] {
                    if table[i][j] == table[i + 1][j + 1] + pair {
                        steps.push(Step::Match(i, j));
                        i += 1;
                        j += 1;
                        continue;
                    }
                }
            }
            if i < n && table[i][j] == table[i + 1][j] + da.children[i].cost() {
                steps.push(Step::Delete(i));
                i += 1;
            } else {
                steps.push(Step::Insert(j));
                j += 1;
            }
        }
        (table[0][0], steps)
    }

    // ── Emission ──

    fn emit(
        &mut self,
        a: &Node,
        da: &Digest,
        b: &Node,
        db: &Digest,
        path: &mut TreePath,
        out: &mut Vec<ChangeVector>,
    ) {
        if da.hash == db.hash {
            return;
        }
        let replace = da.cost() + db.cost();
        if a.kind != b.kind || self.recursive_cost(a, da, b, db) >= replace {
            out.push(ChangeVector {
                path: path.clone(),
                target: a.id,
                change: Change::Replace {
                    old: a.clone(),
                    new: b.clone(),
                },
                weight: replace,
            });
            return;
        }
        if a.label != b.label {
            out.push(ChangeVector {
                path: path.clone(),
                target: a.id,
                change: Change::Relabel {
                    old: a.label.clone(),
                    new: b.label.clone(),
                },
                weight: 1,
            });
        }
        if pairs_positionally(a, b) {
            for (i, (ca, cb)) in a.children.iter().zip(&b.children).enumerate() {
                path.push(i);
                self.emit(ca, &da.children[i], cb, &db.children[i], path, out);
                path.pop();
            }
        } else {
            self.emit_sequence(a, da, b, db, path, out);
        }
    }

    fn emit_sequence(
        &mut self,
        a: &Node,
        da: &Digest,
        b: &Node,
        db: &Digest,
        path: &mut TreePath,
        out: &mut Vec<ChangeVector>,
    ) {
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        enum Slot {
            Old(usize),
            New(usize),
        }

        let (_, steps) = self.align(a, da, b, db);
        let mut target_of: Vec<Option<usize>> = vec![None; a.children.len()];
        let mut deleted = Vec::new();
        let mut inserted = Vec::new();
        for step in &steps {
            match *step {
                Step::Match(i, j) => target_of[i] = Some(j),
                Step::Delete(i) => deleted.push(i),
                Step::Insert(j) => inserted.push(j),
            }
        }

        // Deleted-then-inserted identical subtrees are moves.
        let mut moved = vec![false; a.children.len()];
        let mut fresh = vec![true; b.children.len()];
        for &i in &deleted {
            if let Some(&j) = inserted
                .iter()
                .find(|&&j| fresh[j] && db.children[j].hash == da.children[i].hash)
            {
                fresh[j] = false;
                moved[i] = true;
                target_of[i] = Some(j);
            }
        }

        let parent = a.id;
        let mut slots: Vec<Slot> = (0..a.children.len()).map(Slot::Old).collect();

        for &i in deleted.iter().filter(|&&i| !moved[i]) {
            if let Some(index) = slots.iter().position(|s| *s == Slot::Old(i)) {
                slots.remove(index);
                out.push(ChangeVector {
                    path: path.clone(),
                    target: parent,
                    change: Change::Delete {
                        index,
                        node: a.children[i].clone(),
                    },
                    weight: da.children[i].cost(),
                });
            }
        }

        let mut source_of: Vec<Option<usize>> = vec![None; b.children.len()];
        for (i, target) in target_of.iter().enumerate() {
            if let Some(j) = target {
                source_of[*j] = Some(i);
            }
        }

        for j in 0..b.children.len() {
            let wanted = match source_of[j] {
                Some(i) => Slot::Old(i),
                None => Slot::New(j),
            };
            if slots.get(j) == Some(&wanted) {
                continue;
            }
            match wanted {
                Slot::New(_) => {
                    slots.insert(j, wanted);
                    out.push(ChangeVector {
                        path: path.clone(),
                        target: parent,
                        change: Change::Insert {
                            index: j,
                            node: b.children[j].clone(),
                        },
                        weight: db.children[j].cost(),
                    });
                }
                Slot::Old(i) => {
                    let Some(from) = slots.iter().position(|s| *s == wanted) else {
                        continue;
                    };
                    slots.remove(from);
                    slots.insert(j, wanted);
                    out.push(ChangeVector {
                        path: path.clone(),
                        target: parent,
                        change: Change::Move {
                            from,
                            to: j,
                            node: a.children[i].clone(),
                        },
                        weight: 1,
                    });
                }
            }
        }

        for (j, source) in source_of.iter().enumerate() {
            if let Some(i) = *source {
                if !moved[i] {
                    path.push(j);
                    self.emit(
                        &a.children[i],
                        &da.children[i],
                        &b.children[j],
                        &db.children[j],
                        path,
                        out,
                    );
                    path.pop();
                }
            }
        }
    }
}

fn pairs_positionally(a: &Node, b: &Node) -> bool {
    !a.kind.has_variable_arity() && a.children.len() == b.children.len()
}

// ── Public API ──────────────────────────────────────────────────────

/// Change vectors turning `a` into `b`, in application order.
pub fn diff(a: &Node, b: &Node) -> Vec<ChangeVector> {
    let (da, db) = (Digest::of(a), Digest::of(b));
    let mut differ = Differ::default();
    let mut out = Vec::new();
    differ.emit(a, &da, b, &db, &mut Vec::new(), &mut out);
    out
}

/// Normalized distance between two trees: total edit weight over the larger
/// tree weight, in `[0, 2]`. Zero exactly when the trees are structurally
/// identical.
pub fn distance(a: &Node, b: &Node) -> (f64, Vec<ChangeVector>) {
    distance_with_weights(a, b, subtree_weight(a), subtree_weight(b))
}

/// [`distance`] with caller-supplied (possibly cached) tree weights.
pub fn distance_with_weights(
    a: &Node,
    b: &Node,
    weight_a: u32,
    weight_b: u32,
) -> (f64, Vec<ChangeVector>) {
    let changes = diff(a, b);
    let total = edit_weight(&changes);
    let denominator = weight_a.max(weight_b).max(1);
    (f64::from(total) / f64::from(denominator), changes)
}

fn invalid(change: &ChangeVector, why: &str) -> EngineError {
    EngineError::InvalidEdit(format!(
        "{} at {:?}: {why}",
        change.change.name(),
        change.path
    ))
}

/// Apply one change in place.
pub fn apply_change(tree: &mut Node, change: &ChangeVector) -> Result<(), EngineError> {
    let node = tree
        .get_mut(&change.path)
        .ok_or_else(|| invalid(change, "no node at path"))?;
    match &change.change {
        Change::Insert { index, node: new } => {
            if *index > node.children.len() {
                return Err(invalid(change, "index out of range"));
            }
            node.children.insert(*index, new.clone());
        }
        Change::Delete { index, .. } => {
            if *index >= node.children.len() {
                return Err(invalid(change, "index out of range"));
            }
            node.children.remove(*index);
        }
        Change::Move { from, to, .. } => {
            if *from >= node.children.len() || *to >= node.children.len() {
                return Err(invalid(change, "index out of range"));
            }
            let child = node.children.remove(*from);
            node.children.insert(*to, child);
        }
        Change::Replace { new, .. } => *node = new.clone(),
        Change::Relabel { new, .. } => node.label.clone_from(new),
    }
    Ok(())
}

/// Apply changes in order to a copy of `tree`.
pub fn apply_changes(tree: &Node, changes: &[ChangeVector]) -> Result<Node, EngineError> {
    let mut out = tree.clone();
    for change in changes {
        apply_change(&mut out, change)?;
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use hintgen_lang::{parse, print_tree};
    use proptest::prelude::*;

    use super::*;

    fn tree(src: &str) -> Node {
        parse(src).unwrap()
    }

    fn roundtrip(a: &str, b: &str) -> Vec<ChangeVector> {
        let (ta, tb) = (tree(a), tree(b));
        let changes = diff(&ta, &tb);
        let applied = apply_changes(&ta, &changes).unwrap();
        assert_eq!(print_tree(&applied), print_tree(&tb), "changes: {changes:#?}");
        changes
    }

    #[test]
    fn identical_trees_have_no_changes() {
        let (d, changes) = distance(&tree("x = 1\n"), &tree("x  =  1 # same\n"));
        assert!(d.abs() < f64::EPSILON);
        assert!(changes.is_empty());
    }

    #[test]
    fn operator_change_is_one_relabel() {
        let changes = roundtrip(
            "def f(age):\n    return age > 21\n",
            "def f(age):\n    return age >= 21\n",
        );
        assert_eq!(changes.len(), 1);
        let change = &changes[0];
        assert_eq!(change.path, vec![0, 1, 0, 0, 1]);
        assert!(matches!(
            &change.change,
            Change::Relabel { old: Some(o), new: Some(n) } if o == ">" && n == ">="
        ));
        assert_eq!(change.weight, 1);
    }

    #[test]
    fn small_edit_has_small_distance() {
        let (d, _) = distance(
            &tree("def f(age):\n    return age > 21\n"),
            &tree("def f(age):\n    return age >= 21\n"),
        );
        assert!(d > 0.0 && d < 0.2, "distance {d}");
    }

    #[test]
    fn statement_insert_and_delete() {
        let changes = roundtrip("x = 1\nz = 3\n", "x = 1\ny = 2\nz = 3\n");
        assert!(matches!(changes.as_slice(), [ChangeVector { change: Change::Insert { index: 1, .. }, .. }]));
        let changes = roundtrip("x = 1\ny = 2\nz = 3\n", "x = 1\nz = 3\n");
        assert!(matches!(changes.as_slice(), [ChangeVector { change: Change::Delete { index: 1, .. }, .. }]));
    }

    #[test]
    fn reordered_statements_are_moves() {
        let changes = roundtrip(
            "if x:\n    y = 1\nprint(z)\n",
            "print(z)\nif x:\n    y = 1\n",
        );
        assert!(matches!(
            changes.as_slice(),
            [ChangeVector { change: Change::Move { from: 1, to: 0, .. }, weight: 1, .. }]
        ));
    }

    #[test]
    fn unrelated_kinds_are_replaced() {
        let changes = roundtrip("def f(x):\n    return x\n", "def f(x):\n    return [x, x]\n");
        assert_eq!(changes.len(), 1);
        assert!(matches!(changes[0].change, Change::Replace { .. }));
    }

    #[test]
    fn mixed_edits_apply_in_order() {
        roundtrip(
            "def f(x, y):\n    if x > y:\n        return x\n    total = 0\n    return total\n",
            "def f(x, y, z):\n    total = x + y\n    if x >= y:\n        print(x)\n        return x\n    return total * 2\n",
        );
        roundtrip("x = [1, 2, 3, 4]\n", "x = [4, 1, 3, 5, 2]\n");
        roundtrip("print(a, b)\n", "print()\n");
    }

    #[test]
    fn apply_rejects_bad_paths() {
        let mut t = tree("x = 1\n");
        let bogus = ChangeVector {
            path: vec![7],
            target: None,
            change: Change::Relabel { old: None, new: Some("y".into()) },
            weight: 1,
        };
        assert!(matches!(apply_change(&mut t, &bogus), Err(EngineError::InvalidEdit(_))));
    }

    fn arb_program() -> impl Strategy<Value = String> {
        let stmt = prop_oneof![
            "[a-c]".prop_map(|v| format!("{v} = 1")),
            ("[a-c]", "[a-c]").prop_map(|(v, w)| format!("{v} = {w} + 2")),
            ("[a-c]", 0..5i32).prop_map(|(v, n)| format!("if {v} > {n}:\n    {v} = {n}")),
            "[a-c]".prop_map(|v| format!("print({v})")),
        ];
        prop::collection::vec(stmt, 0..5).prop_map(|stmts| {
            let mut out = stmts.join("\n");
            out.push('\n');
            out
        })
    }

    proptest! {
        #[test]
        fn diff_applies_and_zero_verdict_is_symmetric(a in arb_program(), b in arb_program()) {
            let (ta, tb) = (tree(&a), tree(&b));
            let applied = apply_changes(&ta, &diff(&ta, &tb)).unwrap();
            prop_assert!(applied.structurally_eq(&tb));

            let (dab, _) = distance(&ta, &tb);
            let (dba, _) = distance(&tb, &ta);
            prop_assert_eq!(dab == 0.0, dba == 0.0);
            prop_assert!((0.0..=2.0).contains(&dab));
        }
    }
}
