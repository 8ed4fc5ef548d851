//! SWC-backed transformer.
//!
//! 1. Parse with the dialect's syntax (TypeScript or ECMAScript+JSX)
//! 2. Rewrite JSX into factory calls (jsx / tsx)
//! 3. Strip TypeScript types (typescript / tsx)
//! 4. Emit JavaScript
//!
//! JSX is rewritten before stripping so imports only referenced by JSX
//! (`import React from 'react'`) are still seen as used.

use swc_common::{sync::Lrc, Mark, SourceMap, GLOBALS};
use swc_ecma_ast::{Pass, Program};
use swc_ecma_parser::{EsSyntax, Syntax, TsSyntax};
use swc_ecma_transforms_typescript::strip;
use swc_ecma_visit::VisitMutWith;

use super::jsx::JsxToFactory;
use super::syntax;
use super::{JsxOptions, TransformError, Transformer};
use crate::language::Language;

/// One SWC pipeline configured for a single dialect.
#[derive(Debug, Clone)]
pub struct SwcTransformer {
    language: Language,
    jsx: JsxOptions,
}

impl SwcTransformer {
    pub fn new(language: Language, jsx: JsxOptions) -> Self {
        Self { language, jsx }
    }

    fn syntax(&self) -> Syntax {
        match self.language {
            Language::TypeScript | Language::Tsx => Syntax::Typescript(TsSyntax {
                tsx: self.language == Language::Tsx,
                decorators: true,
                ..Default::default()
            }),
            Language::JavaScript | Language::Jsx => Syntax::Es(EsSyntax {
                jsx: self.language == Language::Jsx,
                ..Default::default()
            }),
        }
    }

    fn transform_inner(&self, code: &str, filename: &str) -> Result<String, TransformError> {
        let language = self.language;
        let cm: Lrc<SourceMap> = Default::default();
        let module = syntax::parse_module(&cm, self.syntax(), code, filename, language)?;
        let mut program = Program::Module(module);

        if language.has_jsx() {
            let mut rewriter = JsxToFactory::new(cm.clone(), &self.jsx);
            program.visit_mut_with(&mut rewriter);
            if let Some(message) = rewriter.take_error() {
                return Err(TransformError::Syntax { language, message });
            }
        }

        if language.has_types() {
            let unresolved_mark = Mark::new();
            let top_level_mark = Mark::new();
            let mut pass = strip(unresolved_mark, top_level_mark);
            pass.process(&mut program);
        }

        match program {
            Program::Module(module) => syntax::emit_module(&cm, &module, language),
            _ => Err(TransformError::Emit {
                language,
                message: "expected module".to_string(),
            }),
        }
    }
}

impl Transformer for SwcTransformer {
    fn transform(&self, code: &str, filename: &str) -> Result<String, TransformError> {
        // SWC requires GLOBALS to be set for marks and hygiene
        GLOBALS.set(&Default::default(), || self.transform_inner(code, filename))
    }
}
