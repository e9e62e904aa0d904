// Textual hints for code that does not parse. Edits come from a character
// diff against the most similar previously-seen parseable text, or from the
// parser's own error recovery when there is nothing to compare against.

use hintgen_lang::{SyntaxIssue, diagnose};
use serde::{Deserialize, Serialize};
use similar::{ChangeTag, TextDiff};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyntaxEditKind {
    Insert,
    Delete,
}

/// A plain text splice. `line` is 1-based, `col` a 0-based character
/// offset, both in the text the edit applies to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyntaxEdit {
    pub kind: SyntaxEditKind,
    pub line: usize,
    pub col: usize,
    pub text: String,
}

impl SyntaxEdit {
    pub fn chars(&self) -> usize {
        self.text.chars().count()
    }

    /// `other` undoes `self` at the same location.
    pub fn reverses(&self, other: &SyntaxEdit) -> bool {
        self.kind != other.kind && self.line == other.line && self.col == other.col && self.text == other.text
    }
}

/// The candidate most similar to `code`, by character diff ratio.
pub fn nearest<'a>(code: &str, candidates: impl IntoIterator<Item = &'a str>) -> Option<&'a str> {
    candidates
        .into_iter()
        .filter(|c| *c != code)
        .map(|c| (TextDiff::from_chars(code, c).ratio(), c))
        .max_by(|a, b| a.0.total_cmp(&b.0))
        .map(|(_, c)| c)
}

/// Edits turning `code` into `target`, grouped into runs of consecutive
/// inserted or deleted characters. Positions refer to `code`.
pub fn diff_text(code: &str, target: &str) -> Vec<SyntaxEdit> {
    let diff = TextDiff::from_chars(code, target);
    let mut edits: Vec<SyntaxEdit> = Vec::new();
    let (mut line, mut col) = (1usize, 0usize);
    // Whether the last edit is still open for extension.
    let mut open = false;

    for op in diff.ops() {
        for change in diff.iter_changes(op) {
            let value = change.value();
            match change.tag() {
                ChangeTag::Equal => open = false,
                tag => {
                    let kind = if tag == ChangeTag::Insert { SyntaxEditKind::Insert } else { SyntaxEditKind::Delete };
                    match edits.last_mut() {
                        Some(last) if open && last.kind == kind => last.text.push_str(value),
                        _ => {
                            edits.push(SyntaxEdit {
                                kind,
                                line,
                                col,
                                text: value.to_string(),
                            });
                            open = true;
                        }
                    }
                    if tag == ChangeTag::Insert {
                        continue;
                    }
                }
            }
            for ch in value.chars() {
                if ch == '\n' {
                    line += 1;
                    col = 0;
                } else {
                    col += 1;
                }
            }
        }
    }
    edits
}

/// Edits suggested by the parser's error recovery: missing tokens are
/// inserted and unexpected text is deleted.
pub fn recovery_edits(code: &str) -> Vec<SyntaxEdit> {
    diagnose(code)
        .into_iter()
        .filter_map(|issue| {
            let span = issue.span();
            let (kind, text) = match issue {
                SyntaxIssue::Missing { token, .. } => (SyntaxEditKind::Insert, token),
                SyntaxIssue::Unexpected { text, .. } => (SyntaxEditKind::Delete, text),
            };
            (!text.is_empty()).then(|| SyntaxEdit {
                kind,
                line: span.line,
                col: char_column(code, span.line, span.col),
                text,
            })
        })
        .collect()
}

/// Character column of a parser byte column on `line` (1-based).
fn char_column(code: &str, line: usize, byte_col: usize) -> usize {
    let text = code.lines().nth(line.saturating_sub(1)).unwrap_or_default();
    text.char_indices().take_while(|(i, _)| *i < byte_col).count()
        + byte_col.saturating_sub(text.len())
}

/// Textual edits for unparseable `code`: a diff against the nearest
/// candidate when there is one, otherwise parser recovery.
pub fn syntax_edits<'a>(code: &str, candidates: impl IntoIterator<Item = &'a str>) -> Vec<SyntaxEdit> {
    match nearest(code, candidates) {
        Some(target) => diff_text(code, target),
        None => recovery_edits(code),
    }
}

/// Byte offset of a line/column position, clamped to the end of the text.
fn offset(code: &str, line: usize, col: usize) -> usize {
    let mut current = 1;
    let mut start = 0;
    if line > 1 {
        let found = code.match_indices('\n').find(|_| {
            current += 1;
            current == line
        });
        match found {
            Some((i, _)) => start = i + 1,
            None => return code.len(),
        }
    }
    code[start..]
        .char_indices()
        .take_while(|(_, ch)| *ch != '\n')
        .nth(col)
        .map_or_else(
            || start + code[start..].find('\n').unwrap_or(code.len() - start),
            |(i, _)| start + i,
        )
}

/// Apply textual edits whose positions all refer to `code`.
pub fn apply_changes(code: &str, edits: &[SyntaxEdit]) -> String {
    let mut ordered: Vec<&SyntaxEdit> = edits.iter().collect();
    ordered.sort_by_key(|e| (e.line, e.col));

    let mut out = code.to_string();
    for edit in ordered.into_iter().rev() {
        let at = offset(code, edit.line, edit.col);
        match edit.kind {
            SyntaxEditKind::Insert => out.insert_str(at, &edit.text),
            SyntaxEditKind::Delete => {
                let end = out[at..]
                    .char_indices()
                    .nth(edit.chars())
                    .map_or(out.len(), |(i, _)| at + i);
                out.replace_range(at..end, "");
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn diff_finds_missing_paren() {
        let code = "def f(x:\n    return x\n";
        let target = "def f(x):\n    return x\n";
        let edits = diff_text(code, target);
        assert_eq!(
            edits,
            vec![SyntaxEdit {
                kind: SyntaxEditKind::Insert,
                line: 1,
                col: 7,
                text: ")".into(),
            }]
        );
        assert_eq!(apply_changes(code, &edits), target);
    }

    #[test]
    fn diff_positions_follow_lines() {
        let code = "x = 1\ny = 2 +\nz = 3\n";
        let target = "x = 1\ny = 2\nz = 3\n";
        let edits = diff_text(code, target);
        assert_eq!(edits.len(), 1);
        assert_eq!((edits[0].kind, edits[0].line, edits[0].col), (SyntaxEditKind::Delete, 2, 5));
        assert_eq!(apply_changes(code, &edits), target);
    }

    #[test]
    fn replacement_applies_cleanly() {
        let code = "if x = 1:\n    pass\n";
        let target = "if x == 1:\n    pass\n";
        assert_eq!(apply_changes(code, &diff_text(code, target)), target);

        let code = "print('a'\nprint('b')\n";
        let target = "print('a')\nprint('b')\n";
        assert_eq!(apply_changes(code, &diff_text(code, target)), target);
    }

    #[test]
    fn nearest_prefers_most_similar() {
        let code = "def f(x:\n    return x + 1\n";
        let candidates = ["def g(a, b):\n    return a * b\n", "def f(x):\n    return x + 1\n"];
        assert_eq!(nearest(code, candidates), Some(candidates[1]));
        assert_eq!(nearest(code, []), None);
    }

    #[test]
    fn empty_corpus_uses_parser_recovery() {
        let edits = syntax_edits("def f(x):\n    return (x + 1\n", []);
        assert!(!edits.is_empty());
        assert!(edits.iter().all(|e| e.line >= 1));
    }

    #[test]
    fn parser_columns_count_characters() {
        let code = "x = 1\ns = \"é\" + (x\n";
        assert_eq!(char_column(code, 2, 11), 10);
        assert_eq!(char_column(code, 2, 4), 4);
        assert_eq!(char_column(code, 1, 5), 5);

        for edit in recovery_edits(code) {
            let line = code.lines().nth(edit.line - 1).unwrap_or_default();
            assert!(edit.col <= line.chars().count(), "{edit:?}");
        }
    }

    #[test]
    fn reversing_edits_are_detected() {
        let add = SyntaxEdit { kind: SyntaxEditKind::Insert, line: 1, col: 3, text: ":".into() };
        let remove = SyntaxEdit { kind: SyntaxEditKind::Delete, ..add.clone() };
        assert!(add.reverses(&remove));
        assert!(!add.reverses(&add));
    }

    #[test]
    fn offsets_clamp_past_the_end() {
        assert_eq!(offset("ab\ncd", 2, 1), 4);
        assert_eq!(offset("ab\ncd", 2, 9), 5);
        assert_eq!(offset("ab\ncd", 7, 0), 5);
        assert_eq!(offset("ab\ncd", 1, 5), 2);
    }
}
