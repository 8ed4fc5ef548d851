//! Static dependency analysis.
//!
//! Finds `import ... from`, `export ... from`, side-effect `import '...'`,
//! `require(...)` and dynamic `import(...)` specifiers, classifies each one
//! and reports what is missing from the installed set. Analysis is textual
//! and never executes anything.

use std::collections::{BTreeSet, HashSet};
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::language::Language;

/// Modules provided by the runtime itself.
pub const NATIVE_MODULES: &[&str] = &[
    "assert", "async_hooks", "buffer", "child_process", "cluster", "console",
    "constants", "crypto", "dgram", "diagnostics_channel", "dns", "domain",
    "events", "fs", "http", "http2", "https", "inspector", "module", "net",
    "os", "path", "perf_hooks", "process", "punycode", "querystring",
    "readline", "repl", "stream", "string_decoder", "sys", "timers", "tls",
    "trace_events", "tty", "url", "util", "v8", "vm", "wasi",
    "worker_threads", "zlib",
];

/// Packages known to resolve from the registry, used to mark a missing
/// package as a confident install suggestion.
const KNOWN_PACKAGES: &[&str] = &[
    "axios", "chalk", "commander", "date-fns", "dayjs", "express", "fastify",
    "immer", "jest", "jotai", "koa", "left-pad", "lodash", "lodash-es",
    "luxon", "mobx", "mocha", "moment", "nanoid", "node-fetch", "ramda",
    "react", "react-dom", "redux", "rxjs", "superagent", "underscore", "uuid",
    "vitest", "yup", "zod", "zustand",
];

/// Packages that overlap in purpose. Referencing two from one group raises
/// an advisory conflict.
const CONFLICT_GROUPS: &[(&str, &[&str])] = &[
    ("date", &["moment", "dayjs", "date-fns", "luxon"]),
    ("http", &["axios", "node-fetch", "superagent", "got", "ky"]),
    ("utility", &["lodash", "lodash-es", "underscore", "ramda"]),
    ("test", &["jest", "mocha", "vitest", "ava"]),
    ("state", &["redux", "mobx", "zustand", "jotai", "recoil"]),
    ("id", &["uuid", "nanoid", "shortid"]),
];

// ============================================================================
// REPORT TYPES
// ============================================================================

/// Kind of a module reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SpecifierKind {
    Native,
    Local,
    ThirdParty,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MissingDependency {
    pub name: String,
    pub suggested: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyConflict {
    pub packages: Vec<String>,
    #[serde(rename = "type")]
    pub kind: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SuggestionCategory {
    Types,
    Framework,
    Conflict,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencySuggestion {
    pub name: String,
    pub category: SuggestionCategory,
    pub reason: String,
}

/// Result of analyzing one source text.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyReport {
    /// Native and third-party package roots referenced by the code.
    pub found: BTreeSet<String>,
    pub missing: Vec<MissingDependency>,
    pub conflicts: Vec<DependencyConflict>,
    pub suggestions: Vec<DependencySuggestion>,
}

impl DependencyReport {
    pub fn has_missing(&self) -> bool {
        !self.missing.is_empty()
    }

    pub fn missing_names(&self) -> Vec<String> {
        self.missing.iter().map(|m| m.name.clone()).collect()
    }
}

// ============================================================================
// EXTRACTION
// ============================================================================

/// Specifier patterns: `import/export ... from`, bare `import '...'`,
/// `require(...)` and dynamic `import(...)`. Group 1 is the specifier.
static SPECIFIER_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r#"(?m)\b(?:import|export)\s+(?:type\s+)?[^'";]*?\bfrom\s*['"]([^'"\n]+)['"]"#,
        r#"(?m)(?:^|[;{}\s])import\s*['"]([^'"\n]+)['"]"#,
        r#"(?:^|[^\w$.])require\s*\(\s*['"`]([^'"`\n]+)['"`]\s*\)"#,
        r#"(?:^|[^\w$.])import\s*\(\s*['"`]([^'"`\n]+)['"`]\s*\)"#,
    ]
    .iter()
    .filter_map(|pattern| Regex::new(pattern).ok())
    .collect()
});

/// Remove `//` and `/* */` comments, leaving string and template literals
/// intact so specifiers inside them survive.
pub fn strip_comments(code: &str) -> String {
    let mut out = String::with_capacity(code.len());
    let mut chars = code.chars().peekable();
    let mut quote: Option<char> = None;

    while let Some(c) = chars.next() {
        if let Some(q) = quote {
            out.push(c);
            if c == '\\' {
                if let Some(escaped) = chars.next() {
                    out.push(escaped);
                }
            } else if c == q {
                quote = None;
            }
            continue;
        }
        match c {
            '\'' | '"' | '`' => {
                quote = Some(c);
                out.push(c);
            }
            '/' if chars.peek() == Some(&'/') => {
                for next in chars.by_ref() {
                    if next == '\n' {
                        out.push('\n');
                        break;
                    }
                }
            }
            '/' if chars.peek() == Some(&'*') => {
                chars.next();
                let mut prev = '\0';
                for next in chars.by_ref() {
                    if next == '\n' {
                        out.push('\n');
                    }
                    if prev == '*' && next == '/' {
                        break;
                    }
                    prev = next;
                }
                out.push(' ');
            }
            _ => out.push(c),
        }
    }
    out
}

/// Every module specifier referenced by `code`, in first-seen order.
pub fn extract_specifiers(code: &str) -> Vec<String> {
    let code = strip_comments(code);
    let mut seen = HashSet::new();
    let mut specifiers = Vec::new();
    for pattern in SPECIFIER_PATTERNS.iter() {
        for captures in pattern.captures_iter(&code) {
            if let Some(m) = captures.get(1) {
                let specifier = m.as_str().trim().to_string();
                if !specifier.is_empty() && seen.insert(specifier.clone()) {
                    specifiers.push(specifier);
                }
            }
        }
    }
    specifiers
}

/// Classify a raw specifier.
pub fn classify_specifier(specifier: &str) -> SpecifierKind {
    if specifier.starts_with('.')
        || specifier.starts_with('/')
        || specifier.starts_with('#')
        || specifier.contains("://")
        || specifier.starts_with("data:")
        || specifier.starts_with("file:")
    {
        return SpecifierKind::Local;
    }
    if specifier.starts_with("node:") {
        return SpecifierKind::Native;
    }
    let root = package_root(specifier);
    if NATIVE_MODULES.contains(&root.as_str()) {
        SpecifierKind::Native
    } else {
        SpecifierKind::ThirdParty
    }
}

/// Package root of a bare specifier: `lodash/fp` → `lodash`,
/// `@scope/pkg/sub` → `@scope/pkg`, `node:fs/promises` → `fs`.
pub fn package_root(specifier: &str) -> String {
    let specifier = specifier.strip_prefix("node:").unwrap_or(specifier);
    let mut parts = specifier.split('/');
    match (parts.next(), parts.next()) {
        (Some(scope), Some(name)) if scope.starts_with('@') && !name.is_empty() => {
            format!("{}/{}", scope, name)
        }
        (Some(first), _) => first.to_string(),
        (None, _) => specifier.to_string(),
    }
}

/// Keys of `dependencies`, `devDependencies`, `peerDependencies` and
/// `optionalDependencies` in a `package.json` document.
pub fn parse_installed(package_json: &str) -> Result<HashSet<String>, serde_json::Error> {
    let manifest: serde_json::Value = serde_json::from_str(package_json)?;
    let mut installed = HashSet::new();
    for section in [
        "dependencies",
        "devDependencies",
        "peerDependencies",
        "optionalDependencies",
    ] {
        if let Some(map) = manifest.get(section).and_then(|v| v.as_object()) {
            installed.extend(map.keys().cloned());
        }
    }
    Ok(installed)
}

// ============================================================================
// ANALYZER
// ============================================================================

/// Stateless analyzer. Cheap to construct and share.
#[derive(Debug, Clone, Default)]
pub struct DependencyAnalyzer;

impl DependencyAnalyzer {
    pub fn new() -> Self {
        Self
    }

    /// Analyze against an empty installed set.
    pub fn analyze(&self, code: &str, language: Language) -> DependencyReport {
        self.analyze_with_installed(code, language, &HashSet::new())
    }

    pub fn analyze_with_installed(
        &self,
        code: &str,
        language: Language,
        installed: &HashSet<String>,
    ) -> DependencyReport {
        let mut found = BTreeSet::new();
        let mut third_party = BTreeSet::new();

        for specifier in extract_specifiers(code) {
            match classify_specifier(&specifier) {
                SpecifierKind::Local => {}
                SpecifierKind::Native => {
                    found.insert(package_root(&specifier));
                }
                SpecifierKind::ThirdParty => {
                    let root = package_root(&specifier);
                    found.insert(root.clone());
                    third_party.insert(root);
                }
            }
        }

        let missing = third_party
            .iter()
            .filter(|name| !installed.contains(*name))
            .map(|name| MissingDependency {
                name: name.clone(),
                suggested: KNOWN_PACKAGES.contains(&name.as_str()),
            })
            .collect();

        let conflicts = conflicts_for(&third_party);
        let mut suggestions = Vec::new();
        suggest_types(language, &third_party, installed, &mut suggestions);
        suggest_framework(language, &third_party, installed, &mut suggestions);
        for conflict in &conflicts {
            suggestions.push(DependencySuggestion {
                name: conflict.packages.join(", "),
                category: SuggestionCategory::Conflict,
                reason: format!(
                    "{} serve the same {} purpose; consider keeping one",
                    conflict.packages.join(" and "),
                    conflict.kind
                ),
            });
        }

        DependencyReport {
            found,
            missing,
            conflicts,
            suggestions,
        }
    }
}

fn conflicts_for(third_party: &BTreeSet<String>) -> Vec<DependencyConflict> {
    CONFLICT_GROUPS
        .iter()
        .filter_map(|(kind, group)| {
            let packages: Vec<String> = group
                .iter()
                .filter(|p| third_party.contains(**p))
                .map(|p| p.to_string())
                .collect();
            (packages.len() > 1).then(|| DependencyConflict {
                packages,
                kind: kind.to_string(),
            })
        })
        .collect()
}

/// `@types/<pkg>` name for a package, following DefinitelyTyped's scoped
/// naming (`@scope/pkg` → `@types/scope__pkg`).
pub fn types_package(name: &str) -> String {
    match name.strip_prefix('@').and_then(|rest| rest.split_once('/')) {
        Some((scope, pkg)) => format!("@types/{}__{}", scope, pkg),
        None => format!("@types/{}", name),
    }
}

fn suggest_types(
    language: Language,
    third_party: &BTreeSet<String>,
    installed: &HashSet<String>,
    out: &mut Vec<DependencySuggestion>,
) {
    if !language.has_types() {
        return;
    }
    for name in third_party {
        if name.starts_with("@types/") {
            continue;
        }
        let types = types_package(name);
        if !installed.contains(&types) && !third_party.contains(&types) {
            out.push(DependencySuggestion {
                name: types,
                category: SuggestionCategory::Types,
                reason: format!("type declarations for {}", name),
            });
        }
    }
}

fn suggest_framework(
    language: Language,
    third_party: &BTreeSet<String>,
    installed: &HashSet<String>,
    out: &mut Vec<DependencySuggestion>,
) {
    if !language.has_jsx() {
        return;
    }
    for name in ["react", "react-dom"] {
        if !installed.contains(name) && !third_party.contains(name) {
            out.push(DependencySuggestion {
                name: name.to_string(),
                category: SuggestionCategory::Framework,
                reason: format!("JSX code usually renders with {}", name),
            });
        }
    }
    if language.has_types() {
        for name in ["@types/react", "@types/react-dom"] {
            if !installed.contains(name) && !out.iter().any(|s| s.name == name) {
                out.push(DependencySuggestion {
                    name: name.to_string(),
                    category: SuggestionCategory::Types,
                    reason: "type declarations for React".to_string(),
                });
            }
        }
    }
}
