//! Classic-runtime JSX lowering: `<a b="c">d</a>` becomes
//! `factory("a", { b: "c" }, "d")`.
//!
//! Names, string attributes and text are read back from the source map so
//! the rewrite works from exactly what the user typed.

use swc_common::{sync::Lrc, SourceMap, Span, Spanned, DUMMY_SP};
use swc_ecma_ast::*;
use swc_ecma_visit::{VisitMut, VisitMutWith};

use super::JsxOptions;

pub(crate) struct JsxToFactory {
    cm: Lrc<SourceMap>,
    factory: String,
    fragment: String,
    error: Option<String>,
}

impl JsxToFactory {
    pub(crate) fn new(cm: Lrc<SourceMap>, options: &JsxOptions) -> Self {
        Self {
            cm,
            factory: options.factory.clone(),
            fragment: options.fragment.clone(),
            error: None,
        }
    }

    /// First failure seen while rewriting, if any.
    pub(crate) fn take_error(&mut self) -> Option<String> {
        self.error.take()
    }

    fn snippet(&mut self, span: Span) -> String {
        match self.cm.span_to_snippet(span) {
            Ok(text) => text,
            Err(err) => {
                if self.error.is_none() {
                    self.error = Some(format!("cannot read JSX source: {:?}", err));
                }
                String::new()
            }
        }
    }

    fn element(&mut self, el: JSXElement) -> Expr {
        let JSXElement {
            span,
            opening,
            children,
            ..
        } = el;

        let name = self.snippet(opening.name.span());
        let tag = element_type(&name);

        let props = if opening.attrs.is_empty() {
            null()
        } else {
            let props = opening
                .attrs
                .into_iter()
                .filter_map(|attr| self.attr(attr))
                .collect();
            Expr::Object(ObjectLit { span: DUMMY_SP, props })
        };

        self.call(span, tag, props, children)
    }

    fn fragment(&mut self, frag: JSXFragment) -> Expr {
        let tag = dotted(&self.fragment);
        self.call(frag.span, tag, null(), frag.children)
    }

    fn call(&mut self, span: Span, tag: Expr, props: Expr, children: Vec<JSXElementChild>) -> Expr {
        let mut args = vec![arg(tag), arg(props)];
        for child in children {
            if let Some(child) = self.child(child) {
                args.push(child);
            }
        }
        Expr::Call(CallExpr {
            span,
            callee: Callee::Expr(Box::new(dotted(&self.factory))),
            args,
            ..Default::default()
        })
    }

    fn attr(&mut self, attr: JSXAttrOrSpread) -> Option<PropOrSpread> {
        match attr {
            JSXAttrOrSpread::SpreadElement(spread) => Some(PropOrSpread::Spread(spread)),
            JSXAttrOrSpread::JSXAttr(attr) => {
                let key = self.snippet(attr.name.span());
                let value = match attr.value {
                    None => Expr::Lit(Lit::Bool(Bool {
                        span: DUMMY_SP,
                        value: true,
                    })),
                    Some(JSXAttrValue::JSXExprContainer(container)) => match container.expr {
                        JSXExpr::Expr(expr) => *expr,
                        JSXExpr::JSXEmptyExpr(_) => return None,
                    },
                    Some(JSXAttrValue::JSXElement(el)) => self.element(*el),
                    Some(JSXAttrValue::JSXFragment(frag)) => self.fragment(frag),
                    Some(other) => {
                        let raw = self.snippet(other.span());
                        string(&decode_entities(unquote(&raw)))
                    }
                };
                Some(PropOrSpread::Prop(Box::new(Prop::KeyValue(KeyValueProp {
                    key: prop_name(&key),
                    value: Box::new(value),
                }))))
            }
        }
    }

    fn child(&mut self, child: JSXElementChild) -> Option<ExprOrSpread> {
        match child {
            JSXElementChild::JSXText(text) => {
                let raw = self.snippet(text.span);
                let cleaned = clean_text(&raw)?;
                Some(arg(string(&decode_entities(&cleaned))))
            }
            JSXElementChild::JSXExprContainer(container) => match container.expr {
                JSXExpr::Expr(expr) => Some(ExprOrSpread { spread: None, expr }),
                JSXExpr::JSXEmptyExpr(_) => None,
            },
            JSXElementChild::JSXSpreadChild(spread) => Some(ExprOrSpread {
                spread: Some(spread.span),
                expr: spread.expr,
            }),
            JSXElementChild::JSXElement(el) => Some(arg(self.element(*el))),
            JSXElementChild::JSXFragment(frag) => Some(arg(self.fragment(frag))),
        }
    }
}

impl VisitMut for JsxToFactory {
    fn visit_mut_expr(&mut self, expr: &mut Expr) {
        expr.visit_mut_children_with(self);

        let rewritten = match expr {
            Expr::JSXElement(el) => {
                let el = std::mem::replace(el, Box::new(placeholder_element()));
                Some(self.element(*el))
            }
            Expr::JSXFragment(frag) => {
                let frag = std::mem::replace(frag, placeholder_fragment());
                Some(self.fragment(frag))
            }
            _ => None,
        };
        if let Some(call) = rewritten {
            *expr = call;
        }
    }
}

// ============================================================================
// AST HELPERS
// ============================================================================

fn arg(expr: Expr) -> ExprOrSpread {
    ExprOrSpread {
        spread: None,
        expr: Box::new(expr),
    }
}

fn null() -> Expr {
    Expr::Lit(Lit::Null(Null { span: DUMMY_SP }))
}

fn string(value: &str) -> Expr {
    Expr::Lit(Lit::Str(Str {
        span: DUMMY_SP,
        value: value.into(),
        raw: None,
    }))
}

fn ident(name: &str) -> Expr {
    Expr::Ident(Ident::new_no_ctxt(name.into(), DUMMY_SP))
}

/// `a.b.c` as a member chain.
fn dotted(path: &str) -> Expr {
    let mut segments = path.split('.').map(str::trim).filter(|s| !s.is_empty());
    let Some(first) = segments.next() else {
        return ident(path);
    };
    segments.fold(ident(first), |obj, segment| {
        Expr::Member(MemberExpr {
            span: DUMMY_SP,
            obj: Box::new(obj),
            prop: MemberProp::Ident(IdentName::new(segment.into(), DUMMY_SP)),
        })
    })
}

/// Intrinsic tags (`div`, `svg:path`) are strings; components are references.
fn element_type(name: &str) -> Expr {
    let intrinsic = name.contains(':')
        || (!name.contains('.') && name.chars().next().is_some_and(|c| c.is_ascii_lowercase()));
    if intrinsic {
        string(name)
    } else {
        dotted(name)
    }
}

fn prop_name(key: &str) -> PropName {
    let is_ident = key
        .chars()
        .next()
        .is_some_and(|c| c.is_alphabetic() || c == '_' || c == '$')
        && key.chars().all(|c| c.is_alphanumeric() || c == '_' || c == '$');
    if is_ident {
        PropName::Ident(IdentName::new(key.into(), DUMMY_SP))
    } else {
        PropName::Str(Str {
            span: DUMMY_SP,
            value: key.into(),
            raw: None,
        })
    }
}

fn unquote(raw: &str) -> &str {
    let raw = raw.trim();
    let quoted = raw.len() >= 2
        && ((raw.starts_with('"') && raw.ends_with('"'))
            || (raw.starts_with('\'') && raw.ends_with('\'')));
    if quoted {
        &raw[1..raw.len() - 1]
    } else {
        raw
    }
}

/// JSX whitespace rules: trim each line, drop blank lines, join with a
/// single space. Pure whitespace yields nothing.
fn clean_text(raw: &str) -> Option<String> {
    let lines: Vec<&str> = raw.split('\n').collect();
    let last = lines.len().saturating_sub(1);
    let mut out = String::new();
    for (i, line) in lines.iter().enumerate() {
        let mut line = line.replace('\t', " ");
        if i != 0 {
            line = line.trim_start().to_string();
        }
        if i != last {
            line = line.trim_end().to_string();
        }
        if line.is_empty() {
            continue;
        }
        if !out.is_empty() && lines.len() > 1 {
            out.push(' ');
        }
        out.push_str(&line);
    }
    if out.is_empty() {
        None
    } else {
        Some(out)
    }
}

fn decode_entities(text: &str) -> String {
    if !text.contains('&') {
        return text.to_string();
    }
    text.replace("&nbsp;", "\u{a0}")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

fn placeholder_element() -> JSXElement {
    JSXElement {
        span: DUMMY_SP,
        opening: JSXOpeningElement {
            name: JSXElementName::Ident(Ident::new_no_ctxt("div".into(), DUMMY_SP)),
            span: DUMMY_SP,
            attrs: vec![],
            self_closing: true,
            type_args: None,
        },
        children: vec![],
        closing: None,
    }
}

fn placeholder_fragment() -> JSXFragment {
    JSXFragment {
        span: DUMMY_SP,
        opening: JSXOpeningFragment { span: DUMMY_SP },
        children: vec![],
        closing: JSXClosingFragment { span: DUMMY_SP },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_text_collapses_lines() {
        assert_eq!(clean_text("\n    Hello\n    world\n  "), Some("Hello world".to_string()));
        assert_eq!(clean_text("  \n   \n"), None);
        assert_eq!(clean_text("Count: "), Some("Count: ".to_string()));
    }

    #[test]
    fn test_unquote_and_entities() {
        assert_eq!(unquote("\"a b\""), "a b");
        assert_eq!(unquote("'x'"), "x");
        assert_eq!(decode_entities("a &amp; b &lt;c&gt;"), "a & b <c>");
    }

    #[test]
    fn test_prop_name_kinds() {
        assert!(matches!(prop_name("className"), PropName::Ident(_)));
        assert!(matches!(prop_name("data-id"), PropName::Str(_)));
        assert!(matches!(prop_name("aria:label"), PropName::Str(_)));
    }

    #[test]
    fn test_element_type_kinds() {
        assert!(matches!(element_type("div"), Expr::Lit(Lit::Str(_))));
        assert!(matches!(element_type("App"), Expr::Ident(_)));
        assert!(matches!(element_type("ui.Button"), Expr::Member(_)));
    }
}
