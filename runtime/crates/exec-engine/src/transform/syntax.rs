//! Parse and emit helpers shared by the transformers and the wrapper.

use swc_common::{sync::Lrc, FileName, SourceMap, Spanned};
use swc_ecma_ast::{EsVersion, Module};
use swc_ecma_codegen::{text_writer::JsWriter, Config as CodegenConfig, Emitter};
use swc_ecma_parser::{lexer::Lexer, Parser, StringInput, Syntax};

use super::TransformError;
use crate::language::Language;

/// Parse `code` as an ES module, failing on the first recoverable error too.
pub(crate) fn parse_module(
    cm: &Lrc<SourceMap>,
    syntax: Syntax,
    code: &str,
    filename: &str,
    language: Language,
) -> Result<Module, TransformError> {
    let fm = cm.new_source_file(
        Lrc::new(FileName::Custom(filename.to_string())),
        code.to_string(),
    );
    let lexer = Lexer::new(syntax, EsVersion::Es2022, StringInput::from(&*fm), None);
    let mut parser = Parser::new_from(lexer);

    let module = parser.parse_module().map_err(|e| TransformError::Syntax {
        language,
        message: format_parse_error(code, e),
    })?;

    if let Some(err) = parser.take_errors().into_iter().next() {
        return Err(TransformError::Syntax {
            language,
            message: format_parse_error(code, err),
        });
    }
    Ok(module)
}

pub(crate) fn emit_module(
    cm: &Lrc<SourceMap>,
    module: &Module,
    language: Language,
) -> Result<String, TransformError> {
    let mut buf = vec![];
    {
        let mut emitter = Emitter {
            cfg: CodegenConfig::default(),
            cm: cm.clone(),
            comments: None,
            wr: JsWriter::new(cm.clone(), "\n", &mut buf, None),
        };
        emitter.emit_module(module).map_err(|e| TransformError::Emit {
            language,
            message: e.to_string(),
        })?;
    }

    String::from_utf8(buf).map_err(|e| TransformError::Emit {
        language,
        message: format!("UTF-8 error: {}", e),
    })
}

/// Format a parse error with the offending line and a caret.
pub(crate) fn format_parse_error(source: &str, err: swc_ecma_parser::error::Error) -> String {
    let lo = (err.span().lo.0 as usize).saturating_sub(1);

    let mut line_num = 1;
    let mut line_start = 0;
    for (i, c) in source.char_indices() {
        if i >= lo {
            break;
        }
        if c == '\n' {
            line_num += 1;
            line_start = i + 1;
        }
    }
    let col = lo.saturating_sub(line_start);
    let line_content = source[line_start..].lines().next().unwrap_or("");
    let caret = format!("{}^", " ".repeat(col));

    format!(
        "line {}: {}\n  {}\n  {}",
        line_num,
        err.kind().msg(),
        line_content,
        caret
    )
}
