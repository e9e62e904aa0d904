// Reserved names: interpreter builtins and names bound by imports. Renaming
// passes must leave these untouched.

use std::collections::BTreeSet;

use crate::ast::{Kind, Node};

pub const BUILTIN_FUNCTIONS: &[&str] = &[
    "abs", "all", "any", "bool", "dict", "enumerate", "float", "int", "isinstance", "len",
    "list", "max", "min", "print", "range", "reversed", "round", "sorted", "str", "sum",
    "tuple", "zip",
];

pub const BUILTIN_CONSTANTS: &[&str] = &["True", "False", "None"];

pub fn is_builtin(name: &str) -> bool {
    BUILTIN_FUNCTIONS.contains(&name) || BUILTIN_CONSTANTS.contains(&name)
}

/// Names an import statement makes visible: `import a.b` binds `a`,
/// `import a as b` binds `b`, `from m import x` binds `x`.
pub fn imported_names(tree: &Node) -> BTreeSet<String> {
    let mut names = BTreeSet::new();
    for node in tree.walk() {
        if !matches!(node.kind, Kind::Import | Kind::ImportFrom) {
            continue;
        }
        for alias in &node.children {
            let bound = match alias.children.first() {
                Some(as_name) => as_name.label().to_string(),
                None if node.kind == Kind::Import => {
                    alias.label().split('.').next().unwrap_or_default().to_string()
                }
                None => alias.label().to_string(),
            };
            if bound != "*" {
                names.insert(bound);
            }
        }
    }
    names
}

/// Names of all functions defined anywhere in the tree.
pub fn defined_functions(tree: &Node) -> BTreeSet<String> {
    tree.walk()
        .filter(|n| n.kind == Kind::FunctionDef)
        .map(|n| n.label().to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse::parse;

    #[test]
    fn import_bindings() {
        let tree = parse("import os.path\nimport random as r\nfrom math import sqrt, pi as p\n").unwrap();
        let names: Vec<_> = imported_names(&tree).into_iter().collect();
        assert_eq!(names, ["os", "p", "r", "sqrt"]);
    }

    #[test]
    fn defined_function_names() {
        let tree = parse("def helper(x):\n    return x\n\ndef main():\n    return helper(1)\n").unwrap();
        let names: Vec<_> = defined_functions(&tree).into_iter().collect();
        assert_eq!(names, ["helper", "main"]);
    }

    #[test]
    fn builtins() {
        assert!(is_builtin("len"));
        assert!(is_builtin("None"));
        assert!(!is_builtin("age"));
    }
}
