//! Filesystem template source.
//!
//! Each page renders from `<pages_dir>/<page>.html`, read on every render so
//! template edits take effect without a restart. Templates use a mustache
//! subset: `{{name}}` interpolation, `{{#name}}...{{/name}}` sections
//! (repeated per array element, entered once for truthy values), and
//! `{{^name}}...{{/name}}` inverted sections. Inside an array section, `{{.}}`
//! is the current element.

use liveframe_core::error::LiveframeError;
use liveframe_core::render::TemplateRenderer;
use serde_json::{Map, Value};
use std::path::PathBuf;
use std::sync::Arc;

/// Context handed to a template rewriter.
pub struct RewriteContext<'a> {
    pub page: &'a str,
    pub variables: &'a Map<String, Value>,
}

/// Hook applied to raw template text before rendering, e.g. for layout
/// wrapping or environment-specific asset paths.
pub type TemplateRewriter = Arc<dyn Fn(String, &RewriteContext<'_>) -> String + Send + Sync>;

/// Template source reading `<page>.html` files from a directory.
pub struct FsTemplates {
    dir: PathBuf,
    rewriter: Option<TemplateRewriter>,
}

impl FsTemplates {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        FsTemplates {
            dir: dir.into(),
            rewriter: None,
        }
    }

    pub fn with_rewriter(mut self, rewriter: TemplateRewriter) -> Self {
        self.rewriter = Some(rewriter);
        self
    }
}

impl TemplateRenderer for FsTemplates {
    fn render(&self, page: &str, variables: &Map<String, Value>) -> Result<String, LiveframeError> {
        // page names come from the URL path segment; never let them escape
        // the template directory
        if page.contains(['/', '\\']) || page.contains("..") {
            return Err(LiveframeError::TemplateNotFound(page.to_string()));
        }
        let path = self.dir.join(format!("{page}.html"));
        if !path.is_file() {
            return Err(LiveframeError::TemplateNotFound(page.to_string()));
        }
        let mut template =
            std::fs::read_to_string(&path).map_err(|err| LiveframeError::Render {
                page: page.to_string(),
                message: err.to_string(),
            })?;

        if let Some(rewriter) = &self.rewriter {
            template = rewriter(template, &RewriteContext { page, variables });
        }

        Ok(render_template(&template, variables))
    }
}

/// Render a mustache-subset template against a variables mapping.
pub fn render_template(template: &str, variables: &Map<String, Value>) -> String {
    let root = Value::Object(variables.clone());
    render_block(template, &[&root])
}

fn render_block(template: &str, stack: &[&Value]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find("}}") else {
            out.push_str(&rest[start..]);
            return out;
        };
        let tag = after[..end].trim();
        rest = &after[end + 2..];

        match tag.chars().next() {
            Some('#') | Some('^') => {
                let inverted = tag.starts_with('^');
                let name = tag[1..].trim();
                let close = format!("{{{{/{name}}}}}");
                let Some(close_pos) = rest.find(&close) else {
                    continue;
                };
                let body = &rest[..close_pos];
                rest = &rest[close_pos + close.len()..];

                let value = lookup(stack, name);
                match (inverted, value) {
                    (false, Some(Value::Array(items))) => {
                        for item in items {
                            let mut inner: Vec<&Value> = stack.to_vec();
                            inner.push(item);
                            out.push_str(&render_block(body, &inner));
                        }
                    }
                    (false, Some(value)) if truthy(value) => {
                        let mut inner: Vec<&Value> = stack.to_vec();
                        inner.push(value);
                        out.push_str(&render_block(body, &inner));
                    }
                    (false, _) => {}
                    (true, value) => {
                        if !value.is_some_and(truthy) {
                            out.push_str(&render_block(body, stack));
                        }
                    }
                }
            }
            Some('/') | Some('!') => {}
            _ => {
                if let Some(value) = lookup(stack, tag) {
                    match value {
                        Value::String(s) => out.push_str(s),
                        Value::Null => {}
                        other => out.push_str(&other.to_string()),
                    }
                }
            }
        }
    }
    out.push_str(rest);
    out
}

/// Resolve a name against the context stack, innermost scope first.
fn lookup<'a>(stack: &[&'a Value], name: &str) -> Option<&'a Value> {
    if name == "." {
        return stack.last().copied();
    }
    for value in stack.iter().rev() {
        if let Value::Object(map) = value
            && let Some(found) = map.get(name)
        {
            return Some(found);
        }
    }
    None
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::String(s) => !s.is_empty(),
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::Array(items) => !items.is_empty(),
        Value::Object(_) => true,
    }
}
