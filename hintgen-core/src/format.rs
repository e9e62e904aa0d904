//! Render individualized edits as hint messages.
//!
//! `next_step` names the first change concretely. `structure` lists every
//! change with the new code reduced to its shape, `half_steps` reveals the
//! first half of that shape's names and literals, and `solution` shows every
//! change in full.

use hintgen_lang::{Kind, Node, Span, print_tree};

use crate::diff::{Change, ChangeVector, apply_change};
use crate::syntax::{SyntaxEdit, SyntaxEditKind};
use crate::types::{Hint, HintLevel, StateRecord};

pub const NO_HINT: &str = "Sorry, no hint is available for this code yet. Try making a change and asking again.";
pub const ALREADY_CORRECT: &str = "Your solution is already correct!";

const BLANK: &str = "_";

/// How much of inserted or replacement code to show.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Reveal {
    All,
    /// Show this many leaves, blank the rest.
    Leaves(usize),
}

fn is_blankable(node: &Node) -> bool {
    node.kind.is_literal() || node.kind == Kind::Name
}

/// Print `node` with all but the first `reveal` names and literals blanked.
fn template(node: &Node, reveal: Reveal) -> String {
    let Reveal::Leaves(keep) = reveal else {
        return snippet(node);
    };
    let mut copy = node.clone();
    let mut seen = 0usize;
    copy.for_each_mut(&mut |n| {
        if is_blankable(n) {
            if seen >= keep {
                *n = Node::name(BLANK);
            }
            seen += 1;
        }
    });
    snippet(&copy)
}

fn leaf_count(node: &Node) -> usize {
    node.walk().filter(|n| is_blankable(n)).count()
}

fn with_article(noun: &str) -> String {
    match noun.chars().next() {
        Some('a' | 'e' | 'i' | 'o' | 'u') => format!("an {noun}"),
        _ => format!("a {noun}"),
    }
}

fn snippet(node: &Node) -> String {
    print_tree(node).trim_end().to_string()
}

/// Span of the node at `path`, falling back to its nearest located ancestor.
fn span_at(tree: &Node, path: &[usize]) -> Span {
    (0..=path.len())
        .rev()
        .find_map(|end| tree.get(&path[..end]).and_then(Node::first_span))
        .unwrap_or(Span { line: 1, col: 0 })
}

fn child_path(path: &[usize], index: usize) -> Vec<usize> {
    let mut p = path.to_vec();
    p.push(index);
    p
}

/// Describe one change against `tree` as it stands before the change.
fn describe(tree: &Node, cv: &ChangeVector, reveal: Reveal) -> (Span, String) {
    let Some(node) = tree.get(&cv.path) else {
        return (Span { line: 1, col: 0 }, NO_HINT.to_string());
    };
    let structural = reveal != Reveal::All;

    match &cv.change {
        Change::Relabel { old, new } => {
            let old = old.as_deref().unwrap_or_default();
            let new = new.as_deref().unwrap_or_default();
            let (span, context) = if node.kind == Kind::Op && !cv.path.is_empty() {
                let parent = &cv.path[..cv.path.len() - 1];
                let described = tree.get(parent).map_or("expression", |p| p.kind.describe());
                (span_at(tree, parent), described)
            } else {
                (span_at(tree, &cv.path), node.kind.describe())
            };
            let line = span.line;
            let message = if structural {
                format!("On line {line}, change the {} `{old}` in the {context}.", node.kind.describe())
            } else {
                format!("On line {line}, replace `{old}` with `{new}`.")
            };
            (span, message)
        }
        Change::Replace { new, .. } => {
            let span = span_at(tree, &cv.path);
            let line = span.line;
            let message = if structural {
                format!(
                    "On line {line}, replace the {} with {} like `{}`.",
                    node.kind.describe(),
                    with_article(new.kind.describe()),
                    template(new, reveal)
                )
            } else {
                format!("On line {line}, replace `{}` with `{}`.", snippet(node), snippet(new))
            };
            (span, message)
        }
        Change::Insert { index, node: inserted } => {
            let text = template(inserted, reveal);
            if inserted.kind.is_statement() {
                let (span, message) = match index.checked_sub(1) {
                    Some(prev) => {
                        let span = span_at(tree, &child_path(&cv.path, prev));
                        (span, format!("After line {}, add `{text}`.", span.line))
                    }
                    None if !node.children.is_empty() => {
                        let span = span_at(tree, &child_path(&cv.path, 0));
                        (span, format!("Before line {}, add `{text}`.", span.line))
                    }
                    None => {
                        let span = span_at(tree, &cv.path);
                        (span, format!("On line {}, add `{text}`.", span.line))
                    }
                };
                (span, message)
            } else {
                let span = span_at(tree, &cv.path);
                let message = format!(
                    "On line {}, add `{text}` to the {}.",
                    span.line,
                    node.kind.describe()
                );
                (span, message)
            }
        }
        Change::Delete { index, node: removed } => {
            let span = span_at(tree, &child_path(&cv.path, *index));
            let message = if structural {
                format!("On line {}, remove {}.", span.line, with_article(removed.kind.describe()))
            } else {
                format!("On line {}, delete `{}`.", span.line, snippet(removed))
            };
            (span, message)
        }
        Change::Move { from, to, node: moved } => {
            let span = span_at(tree, &child_path(&cv.path, *from));
            let mut remaining = node.children.clone();
            if *from < remaining.len() {
                remaining.remove(*from);
            }
            let what = if structural {
                format!("the {}", moved.kind.describe())
            } else {
                format!("`{}`", snippet(moved))
            };
            let destination = match to.checked_sub(1).and_then(|i| remaining.get(i)) {
                Some(anchor) => match anchor.first_span() {
                    Some(at) => format!("so it comes after line {}", at.line),
                    None => format!("to position {} in the {}", to + 1, node.kind.describe()),
                },
                None => format!("to the start of the {}", node.kind.describe()),
            };
            (span, format!("On line {}, move {what} {destination}.", span.line))
        }
    }
}

fn reveal_for(level: HintLevel, cv: &ChangeVector) -> Reveal {
    let payload = match &cv.change {
        Change::Insert { node, .. } | Change::Replace { new: node, .. } => Some(node),
        _ => None,
    };
    match level {
        HintLevel::Structure => Reveal::Leaves(0),
        HintLevel::HalfSteps => Reveal::Leaves(payload.map_or(0, |n| leaf_count(n).div_ceil(2))),
        HintLevel::NextStep | HintLevel::Solution | HintLevel::Examples => Reveal::All,
    }
}

/// Render `changes` (individualized onto `orig_tree`) at `level`.
pub fn format_hints(changes: &[ChangeVector], level: HintLevel, orig_tree: &Node) -> Hint {
    let shown = if level == HintLevel::NextStep { &changes[..changes.len().min(1)] } else { changes };
    let mut tree = orig_tree.clone();
    let mut lines = Vec::with_capacity(shown.len());
    let mut location = None;

    for cv in shown {
        let (span, message) = describe(&tree, cv, reveal_for(level, cv));
        location.get_or_insert(span);
        lines.push(message);
        if apply_change(&mut tree, cv).is_err() {
            break;
        }
    }

    match location {
        Some(span) => Hint::new(level, lines.join("\n"), span.line, span.col),
        None => no_hint(level),
    }
}

pub fn no_hint(level: HintLevel) -> Hint {
    Hint::new(level, NO_HINT, 1, 0)
}

/// Hint for a submission that already passes every test.
pub fn examples_hint(examples: &[StateRecord]) -> Hint {
    let mut message = ALREADY_CORRECT.to_string();
    if !examples.is_empty() {
        message.push_str(" If you're interested, here are some other correct solutions:\n");
        for example in examples {
            message.push('\n');
            message.push_str(example.code.trim_end());
            message.push('\n');
        }
    }
    Hint::new(HintLevel::Examples, message, 1, 0)
}

/// Hint for unparseable code. `next_step` shows the first textual edit;
/// every other level shows all of them.
pub fn syntax_hint(edits: &[SyntaxEdit], level: HintLevel) -> Hint {
    let shown = if level == HintLevel::NextStep { &edits[..edits.len().min(1)] } else { edits };
    let Some(first) = shown.first() else {
        return Hint::new(
            level,
            "Your code has a syntax error, but no fix could be found. Check your indentation and brackets.",
            1,
            0,
        );
    };
    let lines: Vec<String> = shown
        .iter()
        .map(|edit| {
            let text = edit.text.escape_debug();
            match edit.kind {
                SyntaxEditKind::Insert => {
                    format!("Syntax error: on line {}, column {}, add `{text}`.", edit.line, edit.col)
                }
                SyntaxEditKind::Delete => {
                    format!("Syntax error: on line {}, column {}, delete `{text}`.", edit.line, edit.col)
                }
            }
        })
        .collect();
    Hint::new(level, lines.join("\n"), first.line, first.col)
}

#[cfg(test)]
mod tests {
    use hintgen_lang::parse;

    use super::*;
    use crate::diff::diff;
    use crate::types::{ExerciseId, StateRecord, Tier};

    const STUDENT: &str = "def canDrinkAlcohol(age, isDriving):\n    return age > 21 and not isDriving\n";

    fn changes_to(target: &str) -> (Node, Vec<ChangeVector>) {
        let tree = parse(STUDENT).unwrap();
        let changes = diff(&tree, &parse(target).unwrap());
        (tree, changes)
    }

    #[test]
    fn next_step_names_operator_replacement_at_comparison() {
        let (tree, changes) =
            changes_to("def canDrinkAlcohol(age, isDriving):\n    return age >= 21 and not isDriving\n");
        let hint = format_hints(&changes, HintLevel::NextStep, &tree);
        assert_eq!(hint.message, "On line 2, replace `>` with `>=`.");
        assert_eq!((hint.line, hint.col), (2, 11));
        assert_eq!(hint.level, HintLevel::NextStep);
    }

    #[test]
    fn levels_escalate_toward_the_full_edit() {
        let tree = parse("def canDrinkAlcohol(age, isDriving):\n    return age >= 21\n").unwrap();
        let target = parse(STUDENT.replace('>', ">=").as_str()).unwrap();
        let changes = diff(&tree, &target);

        let messages: Vec<String> = [HintLevel::NextStep, HintLevel::Structure, HintLevel::HalfSteps, HintLevel::Solution]
            .into_iter()
            .map(|level| format_hints(&changes, level, &tree).message)
            .collect();
        insta::assert_snapshot!(messages.join("\n"), @r"
        On line 2, replace `age >= 21` with `age >= 21 and not isDriving`.
        On line 2, replace the comparison with a boolean operation like `_ >= _ and not _`.
        On line 2, replace the comparison with a boolean operation like `age >= 21 and not _`.
        On line 2, replace `age >= 21` with `age >= 21 and not isDriving`.
        ");
    }

    #[test]
    fn inserted_statement_is_anchored_to_previous_line() {
        let tree = parse("def f(x):\n    y = x\n    return x\n").unwrap();
        let changes = diff(&tree, &parse("def f(x):\n    y = x\n    x = x + 1\n    return x\n").unwrap());
        let hint = format_hints(&changes, HintLevel::NextStep, &tree);
        assert_eq!(hint.message, "After line 2, add `x = x + 1`.");
        assert_eq!(hint.line, 2);
    }

    #[test]
    fn structure_blanks_names_and_literals() {
        let node = parse("x = y + 1\n").unwrap();
        assert_eq!(template(&node, Reveal::Leaves(0)), "_ = _ + _");
        assert_eq!(template(&node, Reveal::Leaves(2)), "x = y + _");
        assert_eq!(template(&node, Reveal::All), "x = y + 1");
    }

    #[test]
    fn empty_edit_gives_generic_message() {
        let tree = parse(STUDENT).unwrap();
        let hint = format_hints(&[], HintLevel::NextStep, &tree);
        assert_eq!(hint.message, NO_HINT);
    }

    #[test]
    fn examples_list_other_solutions() {
        let tree = parse("def f(x):\n    return x >= 21\n").unwrap();
        let example = StateRecord::new(ExerciseId(1), Tier::Cleaned, "def f(x):\n    return 21 <= x\n".into(), tree);
        let hint = examples_hint(&[example]);
        assert_eq!(hint.level, HintLevel::Examples);
        assert!(hint.message.starts_with(ALREADY_CORRECT));
        assert!(hint.message.contains("return 21 <= x"));
        assert_eq!(examples_hint(&[]).message, ALREADY_CORRECT);
    }

    #[test]
    fn syntax_hint_shows_first_edit_then_all() {
        let edits = vec![
            SyntaxEdit { kind: SyntaxEditKind::Insert, line: 1, col: 23, text: ")".into() },
            SyntaxEdit { kind: SyntaxEditKind::Delete, line: 2, col: 4, text: "x".into() },
        ];
        let first = syntax_hint(&edits, HintLevel::NextStep);
        assert_eq!(first.message, "Syntax error: on line 1, column 23, add `)`.");
        assert_eq!((first.line, first.col), (1, 23));
        assert_eq!(syntax_hint(&edits, HintLevel::Solution).message.lines().count(), 2);
    }
}
