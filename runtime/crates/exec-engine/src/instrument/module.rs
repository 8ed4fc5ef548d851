//! Static import hoisting and export lowering.
//!
//! The body ends up inside an async function, where neither `import`
//! declarations nor `export` syntax are allowed. Working on the parsed
//! module keeps strings, template literals and comments out of the way.

use swc_common::{sync::Lrc, SourceMap, DUMMY_SP, GLOBALS};
use swc_ecma_ast::{
    BindingIdent, ClassDecl, ClassExpr, Decl, DefaultDecl, Expr, FnDecl, FnExpr, Ident, ImportDecl,
    Module, ModuleDecl, ModuleItem, Pat, Stmt, VarDecl, VarDeclKind, VarDeclarator,
};
use swc_ecma_parser::{EsSyntax, Syntax};

use crate::language::Language;
use crate::transform::syntax;
use crate::transform::TransformError;

/// Binding that receives an anonymous `export default` value.
pub(crate) const DEFAULT_EXPORT_BINDING: &str = "__pgDefaultExport";

#[derive(Debug, Default, PartialEq, Eq)]
pub(crate) struct SplitModule {
    /// Emitted import declarations, empty when there are none.
    pub imports: String,
    pub has_imports: bool,
    pub body: String,
}

/// Lift static imports out of `code` and lower `export` syntax to plain
/// declarations. `language` only labels errors; `code` is JavaScript.
pub(crate) fn split_module(
    code: &str,
    filename: &str,
    language: Language,
) -> Result<SplitModule, TransformError> {
    GLOBALS.set(&Default::default(), || {
        let cm: Lrc<SourceMap> = Default::default();
        let module = syntax::parse_module(
            &cm,
            Syntax::Es(EsSyntax::default()),
            code,
            filename,
            language,
        )?;

        let mut imports = Vec::new();
        let mut body = Vec::new();
        for item in module.body {
            match item {
                ModuleItem::Stmt(stmt) => body.push(ModuleItem::Stmt(stmt)),
                ModuleItem::ModuleDecl(decl) => lower(decl, &mut imports, &mut body),
            }
        }

        let has_imports = !imports.is_empty();
        Ok(SplitModule {
            imports: emit(&cm, imports, language)?,
            has_imports,
            body: emit(&cm, body, language)?,
        })
    })
}

fn lower(decl: ModuleDecl, imports: &mut Vec<ModuleItem>, body: &mut Vec<ModuleItem>) {
    match decl {
        ModuleDecl::Import(import) if !import.type_only => {
            imports.push(ModuleItem::ModuleDecl(ModuleDecl::Import(import)));
        }
        ModuleDecl::ExportDecl(export) => body.push(ModuleItem::Stmt(Stmt::Decl(export.decl))),
        ModuleDecl::ExportDefaultDecl(export) => {
            let stmt = match export.decl {
                DefaultDecl::Fn(FnExpr {
                    ident: Some(ident),
                    function,
                }) => Stmt::Decl(Decl::Fn(FnDecl {
                    ident,
                    declare: false,
                    function,
                })),
                DefaultDecl::Class(ClassExpr {
                    ident: Some(ident),
                    class,
                }) => Stmt::Decl(Decl::Class(ClassDecl {
                    ident,
                    declare: false,
                    class,
                })),
                DefaultDecl::Fn(function) => default_binding(Expr::Fn(function)),
                DefaultDecl::Class(class) => default_binding(Expr::Class(class)),
                DefaultDecl::TsInterfaceDecl(_) => return,
            };
            body.push(ModuleItem::Stmt(stmt));
        }
        ModuleDecl::ExportDefaultExpr(export) => {
            body.push(ModuleItem::Stmt(default_binding(*export.expr)));
        }
        // Re-exports still load their source module.
        ModuleDecl::ExportNamed(export) if !export.type_only => {
            if let Some(src) = export.src {
                imports.push(side_effect_import(src, export.with));
            }
        }
        ModuleDecl::ExportAll(export) if !export.type_only => {
            imports.push(side_effect_import(export.src, export.with));
        }
        _ => {}
    }
}

fn default_binding(expr: Expr) -> Stmt {
    Stmt::Decl(Decl::Var(Box::new(VarDecl {
        span: DUMMY_SP,
        ctxt: Default::default(),
        kind: VarDeclKind::Const,
        declare: false,
        decls: vec![VarDeclarator {
            span: DUMMY_SP,
            name: Pat::Ident(BindingIdent {
                id: Ident::new_no_ctxt(DEFAULT_EXPORT_BINDING.into(), DUMMY_SP),
                type_ann: None,
            }),
            init: Some(Box::new(expr)),
            definite: false,
        }],
    })))
}

fn side_effect_import(
    src: Box<swc_ecma_ast::Str>,
    with: Option<Box<swc_ecma_ast::ObjectLit>>,
) -> ModuleItem {
    ModuleItem::ModuleDecl(ModuleDecl::Import(ImportDecl {
        span: DUMMY_SP,
        specifiers: vec![],
        src,
        type_only: false,
        with,
        phase: Default::default(),
    }))
}

fn emit(
    cm: &Lrc<SourceMap>,
    items: Vec<ModuleItem>,
    language: Language,
) -> Result<String, TransformError> {
    if items.is_empty() {
        return Ok(String::new());
    }
    let module = Module {
        span: DUMMY_SP,
        body: items,
        shebang: None,
    };
    syntax::emit_module(cm, &module, language)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn split(code: &str) -> SplitModule {
        split_module(code, "index.js", Language::JavaScript).unwrap()
    }

    #[test]
    fn test_import_followed_by_code_on_one_line() {
        let split = split("import path from 'path'; console.log(path.sep)");
        assert!(split.has_imports);
        assert!(split.imports.contains("import path from"));
        assert!(!split.body.contains("import"));
        assert!(split.body.contains("console.log(path.sep)"));
    }

    #[test]
    fn test_import_with_trailing_comment() {
        let split = split("import fs from 'fs'; // read files\nconsole.log(typeof fs);\n");
        assert!(split.imports.contains("import fs from"));
        assert!(!split.body.contains("import"));
        assert!(!split.body.contains("read files"));
    }

    #[test]
    fn test_multiline_import_is_hoisted() {
        let split = split("import {\n  join\n} from \"path\";\nconsole.log(join(\"a\"));\n");
        assert!(split.imports.contains("join"));
        assert!(split.imports.contains("path"));
        assert!(split.body.contains("console.log(join(\"a\"))"));
    }

    #[test]
    fn test_dynamic_import_stays_in_body() {
        let split = split("const m = await import(\"x\");\nconsole.log(import.meta.url);\n");
        assert!(!split.has_imports);
        assert!(split.imports.is_empty());
        assert!(split.body.contains("await import(\"x\")"));
        assert!(split.body.contains("import.meta.url"));
    }

    #[test]
    fn test_exports_are_lowered() {
        let split = split(
            "export const a = 1;\nexport function main() {}\nexport class Box {}\nexport { a };\nexport * from './b';\nexport { c } from './c';\n",
        );
        assert!(split.imports.contains("import './b'") || split.imports.contains("import \"./b\""));
        assert!(split.imports.contains("./c"));
        assert!(!split.imports.contains("{ c }"));
        assert!(split.body.contains("const a = 1"));
        assert!(split.body.contains("function main()"));
        assert!(split.body.contains("class Box"));
        assert!(!split.body.contains("export"));
    }

    #[test]
    fn test_default_exports() {
        let named = split("export default function main() { return 1; }\nmain();\n");
        assert!(named.body.contains("function main()"));
        assert!(!named.body.contains(DEFAULT_EXPORT_BINDING));

        let anonymous = split("export default class {}\n");
        assert!(anonymous.body.contains("const __pgDefaultExport = class"));

        let expr = split("export default 42;\n");
        assert!(expr.body.contains("const __pgDefaultExport = 42"));
        assert!(!expr.body.contains("export"));
    }

    #[test]
    fn test_template_text_is_untouched() {
        let split = split("const s = `a\nexport default 1`;\nconsole.log(s);\n");
        assert!(!split.has_imports);
        assert!(split.body.contains("`a\nexport default 1`"));
        assert!(!split.body.contains(DEFAULT_EXPORT_BINDING));
    }

    #[test]
    fn test_import_text_in_string_stays_in_body() {
        let split = split("const help = \"import x from 'y'\";\nconsole.log(help);\n");
        assert!(!split.has_imports);
        assert!(split.body.contains("import x from 'y'"));
    }

    #[test]
    fn test_syntax_error_is_reported() {
        let err = split_module("const x = {", "index.js", Language::JavaScript).unwrap_err();
        match err {
            TransformError::Syntax { language, message } => {
                assert_eq!(language, Language::JavaScript);
                assert!(message.contains("line 1"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
