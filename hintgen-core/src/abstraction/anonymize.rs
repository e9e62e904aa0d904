use std::collections::{BTreeMap, BTreeSet, HashMap};

use hintgen_lang::names::{imported_names, is_builtin};
use hintgen_lang::{Kind, Node};

/// Placeholder-to-original name mapping produced by [`anonymize`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NameMap {
    originals: BTreeMap<String, String>,
}

impl NameMap {
    /// The student's name behind a placeholder.
    pub fn original(&self, placeholder: &str) -> Option<&str> {
        self.originals.get(placeholder).map(String::as_str)
    }
}

/// Whether a label looks like a placeholder this module produces.
pub fn is_placeholder(label: &str) -> bool {
    let mut chars = label.chars();
    matches!(chars.next(), Some('v' | 'f'))
        && !chars.as_str().is_empty()
        && chars.all(|c| c.is_ascii_digit())
}

struct Namer<'a> {
    reserved: &'a BTreeSet<String>,
    forward: HashMap<String, String>,
    next_var: usize,
    next_fn: usize,
}

impl Namer<'_> {
    fn fresh(&mut self, prefix: char) -> String {
        loop {
            let counter = if prefix == 'f' {
                &mut self.next_fn
            } else {
                &mut self.next_var
            };
            let candidate = format!("{prefix}{counter}");
            *counter += 1;
            if !self.reserved.contains(&candidate) {
                return candidate;
            }
        }
    }

    fn rename(&mut self, name: &str, prefix: char) -> String {
        if let Some(placeholder) = self.forward.get(name) {
            return placeholder.clone();
        }
        let placeholder = self.fresh(prefix);
        self.forward.insert(name.to_string(), placeholder.clone());
        placeholder
    }
}

/// Replace every non-reserved identifier with a positional placeholder:
/// functions become `f0, f1, …` and variables `v0, v1, …`, numbered by first
/// appearance in preorder. Builtins, imported names, and `reserved` are
/// kept. Attribute, keyword, and import labels are never touched.
///
/// Node ids and spans are preserved, so the result maps node-for-node onto
/// the input.
pub fn anonymize(tree: &Node, reserved: &BTreeSet<String>) -> (Node, NameMap) {
    let mut keep = reserved.clone();
    keep.extend(imported_names(tree));

    let mut namer = Namer {
        reserved: &keep,
        forward: HashMap::new(),
        next_var: 0,
        next_fn: 0,
    };

    // Function names first, so calls before the definition resolve.
    let functions: Vec<String> = tree
        .walk()
        .filter(|n| n.kind == Kind::FunctionDef)
        .map(|n| n.label().to_string())
        .filter(|name| !keep.contains(name))
        .collect();
    for name in &functions {
        namer.rename(name, 'f');
    }

    let mut out = tree.clone();
    out.for_each_mut(&mut |node| {
        let renamed = match node.kind {
            Kind::FunctionDef if !keep.contains(node.label()) => {
                Some(namer.rename(node.label(), 'f'))
            }
            Kind::Param => Some(namer.rename(node.label(), 'v')),
            Kind::Name if !keep.contains(node.label()) && !is_builtin(node.label()) => {
                Some(namer.rename(node.label(), 'v'))
            }
            _ => None,
        };
        if let Some(label) = renamed {
            node.label = Some(label);
        }
    });

    let originals = namer
        .forward
        .into_iter()
        .map(|(original, placeholder)| (placeholder, original))
        .collect();
    (out, NameMap { originals })
}
