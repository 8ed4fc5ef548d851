//! Instrumentation wrapper.
//!
//! Turns transformed JavaScript into an entry file the runtime can execute
//! directly:
//!
//! ```text
//! <hoisted static imports>           (ES modules only)
//! <createRequire shim>               (ES modules only)
//! <console / error prelude>
//! <element factory polyfill>         (jsx / tsx only)
//! (async () => { try { <body> } catch (e) { __pg.fail(e) } })();
//! ```
//!
//! The body runs inside an async function so top-level `await` works in
//! both module kinds. Static imports cannot live inside a function, so they
//! are lifted out and force the ES module kind.

mod module;

use std::path::Path;

use serde::Serialize;

use crate::language::DetectionResult;
use crate::transform::{JsxOptions, TransformError};
use module::split_module;

const PRELUDE: &str = include_str!("prelude.js");

/// Default number of characters of a function's source shown in output.
pub const DEFAULT_FUNCTION_PREVIEW_LEN: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ModuleKind {
    /// `.mjs`
    Esm,
    /// `.cjs`
    CommonJs,
}

impl ModuleKind {
    pub fn extension(&self) -> &'static str {
        match self {
            ModuleKind::Esm => "mjs",
            ModuleKind::CommonJs => "cjs",
        }
    }
}

/// Ready-to-run entry file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutableUnit {
    pub code: String,
    pub entry_filename: String,
    pub module_kind: ModuleKind,
}

#[derive(Debug, Clone)]
pub struct InstrumentationWrapper {
    jsx: JsxOptions,
    function_preview_len: usize,
}

impl Default for InstrumentationWrapper {
    fn default() -> Self {
        Self::new(JsxOptions::default(), DEFAULT_FUNCTION_PREVIEW_LEN)
    }
}

impl InstrumentationWrapper {
    pub fn new(jsx: JsxOptions, function_preview_len: usize) -> Self {
        Self {
            jsx,
            function_preview_len,
        }
    }

    /// Build the entry file for already-transformed `code`. Fails when the
    /// code does not parse as a module.
    pub fn wrap(
        &self,
        code: &str,
        detection: &DetectionResult,
        filename: &str,
    ) -> Result<ExecutableUnit, TransformError> {
        let split = split_module(code, filename, detection.language)?;
        let module_kind = if split.has_imports || split.body.contains("import.meta") {
            ModuleKind::Esm
        } else {
            ModuleKind::CommonJs
        };

        let mut out = String::with_capacity(code.len() + PRELUDE.len() + 512);
        if module_kind == ModuleKind::Esm {
            out.push_str(&split.imports);
            out.push_str("import { createRequire as __pgCreateRequire } from 'module';\n");
            out.push_str("const require = __pgCreateRequire(import.meta.url);\n");
        }

        out.push_str(&PRELUDE.replace(
            "__PG_PREVIEW_LEN__",
            &self.function_preview_len.to_string(),
        ));

        if detection.language.has_jsx() {
            out.push_str(&self.jsx_polyfill());
        }

        out.push_str("(async () => {\ntry {\n");
        out.push_str(&split.body);
        if !split.body.ends_with('\n') {
            out.push('\n');
        }
        out.push_str("} catch (__pgError) {\n__pg.fail(__pgError);\n}\n})();\n");

        Ok(ExecutableUnit {
            code: out,
            entry_filename: entry_filename(filename, module_kind),
            module_kind,
        })
    }

    /// Minimal element factory installed only where nothing is defined yet.
    fn jsx_polyfill(&self) -> String {
        let factory = serde_json::Value::String(self.jsx.factory.clone());
        let fragment = serde_json::Value::String(self.jsx.fragment.clone());
        format!(
            r#"(() => {{
  const define = (path, value) => {{
    const parts = path.split('.');
    let target = globalThis;
    for (const part of parts.slice(0, -1)) {{
      if (target[part] == null) target[part] = {{}};
      target = target[part];
    }}
    const leaf = parts[parts.length - 1];
    if (target[leaf] === undefined) target[leaf] = value;
  }};
  define({fragment}, Symbol.for('playground.fragment'));
  define({factory}, (type, props, ...children) => ({{
    $$typeof: Symbol.for('playground.element'),
    type,
    props: {{ ...(props || {{}}), children: children.length === 1 ? children[0] : children }},
  }}));
}})();
"#
        )
    }
}

fn entry_filename(filename: &str, kind: ModuleKind) -> String {
    let stem = Path::new(filename)
        .file_stem()
        .and_then(|s| s.to_str())
        .filter(|s| !s.is_empty())
        .unwrap_or("index");
    format!("{}.{}", stem, kind.extension())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::language::Language;

    fn wrap(code: &str, language: Language) -> ExecutableUnit {
        InstrumentationWrapper::default()
            .wrap(code, &DetectionResult::new(language, 0.9), "index.js")
            .unwrap()
    }

    #[test]
    fn test_plain_script_is_commonjs() {
        let unit = wrap("console.log(\"hi\");", Language::JavaScript);
        assert_eq!(unit.module_kind, ModuleKind::CommonJs);
        assert_eq!(unit.entry_filename, "index.cjs");
        assert!(unit.code.contains("console.log(\"hi\");"));
        assert!(unit.code.contains("__pg.fail(__pgError)"));
        assert!(unit.code.contains("uncaughtException"));
        assert!(unit.code.contains("const PREVIEW_LEN = 100;"));
        assert!(!unit.code.contains("createRequire"));
    }

    #[test]
    fn test_imports_are_hoisted() {
        let code = "import fs from 'fs';\nimport {\n  join\n} from \"path\";\nconsole.log(join(fs.name));\n";
        let unit = wrap(code, Language::JavaScript);
        assert_eq!(unit.module_kind, ModuleKind::Esm);
        assert_eq!(unit.entry_filename, "index.mjs");
        assert!(unit.code.starts_with("import fs from"));
        let body_start = unit.code.find("(async () => {").unwrap();
        assert!(unit.code[..body_start].contains("join"));
        assert!(!unit.code[body_start..].contains("import fs"));
        assert!(unit.code.contains("createRequire"));
    }

    #[test]
    fn test_import_on_same_line_as_code() {
        let unit = wrap("import path from 'path'; console.log(path.sep)", Language::JavaScript);
        assert_eq!(unit.module_kind, ModuleKind::Esm);
        let body_start = unit.code.find("(async () => {").unwrap();
        assert!(unit.code[..body_start].contains("import path from"));
        assert!(!unit.code[body_start..].contains("import path"));
        assert!(unit.code[body_start..].contains("console.log(path.sep)"));
    }

    #[test]
    fn test_import_meta_forces_esm() {
        let unit = wrap("console.log(import.meta.url);", Language::JavaScript);
        assert_eq!(unit.module_kind, ModuleKind::Esm);
        assert!(unit.code.contains("createRequire"));
    }

    #[test]
    fn test_export_text_in_template_is_kept() {
        let unit = wrap("const s = `a\nexport default 1`;\nconsole.log(s);", Language::JavaScript);
        assert_eq!(unit.module_kind, ModuleKind::CommonJs);
        assert!(unit.code.contains("`a\nexport default 1`"));
        assert!(!unit.code.contains("__pgDefaultExport"));
    }

    #[test]
    fn test_syntax_error_fails_wrap() {
        let err = InstrumentationWrapper::default()
            .wrap("console.log((", &DetectionResult::new(Language::JavaScript, 1.0), "a.js")
            .unwrap_err();
        assert!(matches!(err, TransformError::Syntax { language: Language::JavaScript, .. }));
    }

    #[test]
    fn test_jsx_gets_polyfill() {
        let unit = wrap("console.log(React.createElement('div', null));", Language::Jsx);
        assert!(unit.code.contains("define(\"React.createElement\""));
        assert!(unit.code.contains("define(\"React.Fragment\""));
        let plain = wrap("console.log(1)", Language::TypeScript);
        assert!(!plain.code.contains("playground.element"));
    }

    #[test]
    fn test_custom_preview_len() {
        let unit = InstrumentationWrapper::new(JsxOptions::default(), 12)
            .wrap("1", &DetectionResult::new(Language::JavaScript, 1.0), "x.ts")
            .unwrap();
        assert!(unit.code.contains("const PREVIEW_LEN = 12;"));
        assert_eq!(unit.entry_filename, "x.cjs");
    }
}
