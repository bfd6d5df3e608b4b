//! Template Placeholder References
//!
//! Walks a template's command stream and collects the field paths it
//! references. Loop aliases are resolved back to the collection they iterate,
//! through any number of nested loops.

use regex::Regex;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::LazyLock;

use crate::engine::{Command, CommandKind};

/// `<alias> IN <path>`, nested loops may write the path as `$alias.more`
static LOOP_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^\s*(\w+)\s+IN\s+\$?([\w.]+)").expect("invalid loop regex"));

/// `fn('id', 'field.path')` image calls
static IMAGE_CALL_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"^\w+\s*\(\s*[^,]+,\s*['"]\$?([^'"]+)['"]"#).expect("invalid image call regex")
});

static PATH_TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_]\w*(?:\.\w+)*").expect("invalid path token regex"));

/// Loop alias bindings, owned by whoever walks the commands.
#[derive(Debug, Clone, Default)]
pub struct AliasScope {
    bindings: HashMap<String, String>,
}

impl AliasScope {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bind(&mut self, alias: impl Into<String>, path: impl Into<String>) {
        self.bindings.insert(alias.into(), path.into());
    }

    pub fn get(&self, alias: &str) -> Option<&str> {
        self.bindings.get(alias).map(String::as_str)
    }

    /// Replace a leading alias with its bound path until no alias remains.
    /// Each alias is expanded at most once, so cycles terminate.
    pub fn resolve(&self, path: &str) -> String {
        let mut current = path.to_string();
        let mut visited = HashSet::new();

        loop {
            let (head, rest) = match current.split_once('.') {
                Some((head, rest)) => (head, Some(rest)),
                None => (current.as_str(), None),
            };
            let Some(target) = self.bindings.get(head) else {
                break;
            };
            if !visited.insert(head.to_string()) {
                break;
            }

            let next = match rest {
                Some(rest) => format!("{target}.{rest}"),
                None => target.clone(),
            };
            if next == current {
                break;
            }
            current = next;
        }

        current
    }
}

pub fn extract_references(commands: &[Command]) -> BTreeSet<String> {
    let mut scope = AliasScope::new();
    extract_references_with(commands, &mut scope)
}

/// As [`extract_references`], binding loop aliases into a caller-owned scope.
pub fn extract_references_with(commands: &[Command], scope: &mut AliasScope) -> BTreeSet<String> {
    let mut references = BTreeSet::new();

    for command in commands {
        match command.kind {
            CommandKind::LoopStart => {
                let Some(caps) = LOOP_PATTERN.captures(command.code.trim()) else {
                    continue;
                };
                let path = caps[2].trim_end_matches('.');
                let path = path.strip_suffix(".items").unwrap_or(path);
                let resolved = scope.resolve(path);

                references.insert(resolved.clone());
                scope.bind(&caps[1], resolved);
            }
            CommandKind::Insert | CommandKind::ImageInsert => {
                if let Some(token) = reference_token(&command.code, command.kind) {
                    references.insert(scope.resolve(&token));
                }
            }
            // conditionals only toggle visibility
            CommandKind::LoopEnd | CommandKind::Conditional | CommandKind::ConditionalEnd | CommandKind::Other => {}
        }
    }

    references
}

/// The base field path an insert command reads, before alias resolution.
fn reference_token(code: &str, kind: CommandKind) -> Option<String> {
    let code = code.trim();

    if kind == CommandKind::ImageInsert {
        if let Some(caps) = IMAGE_CALL_PATTERN.captures(code) {
            return Some(caps[1].to_string());
        }
    }

    let code = code.trim_start_matches('$');
    let token = PATH_TOKEN.find(code)?;
    let after = code[token.end()..].trim_start();

    if !after.starts_with('(') {
        return Some(token.as_str().to_string());
    }

    match token.as_str().rsplit_once('.') {
        // method call on a path: `name.toUpperCase()`
        Some((receiver, _method)) => Some(receiver.to_string()),
        // plain function call: the first path argument is the reference
        None => {
            let args = after[1..].trim_start().trim_start_matches('$');
            PATH_TOKEN.find(args).map(|m| m.as_str().to_string())
        }
    }
}
