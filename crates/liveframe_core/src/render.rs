//! Delta rendering: full-document render, head metadata extraction, body
//! fragment extraction, and initial-load script/include injection.
//!
//! The template engine itself is an external collaborator behind
//! [`TemplateRenderer`]; it is assumed correct and side-effect-free. This
//! module only carves its output into the minimal payload the client needs.

use crate::error::LiveframeError;
use crate::protocol::{Delta, HeadData};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;

/// Path the server serves the embedded client runtime from. Its presence in
/// a document marks injection as already done.
pub const CLIENT_RUNTIME_PATH: &str = "/liveframe/client.js";

/// Renders a page template against a variables mapping.
///
/// Rendering is synchronous and CPU-bound; long renders must not stall
/// unrelated sessions (callers run on a multi-threaded runtime).
pub trait TemplateRenderer: Send + Sync {
    fn render(&self, page: &str, variables: &Map<String, Value>) -> Result<String, LiveframeError>;
}

/// In-memory template source keyed by page name, with `{{name}}`
/// placeholder substitution. Useful for embedders and tests that have no
/// template directory.
#[derive(Debug, Default)]
pub struct MemoryTemplates {
    templates: HashMap<String, String>,
}

impl MemoryTemplates {
    pub fn new() -> Self {
        MemoryTemplates::default()
    }

    pub fn insert(&mut self, page: impl Into<String>, template: impl Into<String>) {
        self.templates.insert(page.into(), template.into());
    }
}

impl TemplateRenderer for MemoryTemplates {
    fn render(&self, page: &str, variables: &Map<String, Value>) -> Result<String, LiveframeError> {
        let template = self
            .templates
            .get(page)
            .ok_or_else(|| LiveframeError::TemplateNotFound(page.to_string()))?;
        Ok(substitute(template, variables))
    }
}

/// Replace `{{name}}` placeholders with stringified variable values.
/// Unknown names render as empty strings.
pub fn substitute(template: &str, variables: &Map<String, Value>) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find("}}") {
            Some(end) => {
                let name = after[..end].trim();
                if let Some(value) = variables.get(name) {
                    match value {
                        Value::String(s) => out.push_str(s),
                        Value::Null => {}
                        other => out.push_str(&other.to_string()),
                    }
                }
                rest = &after[end + 2..];
            }
            None => {
                out.push_str(&rest[start..]);
                return out;
            }
        }
    }
    out.push_str(rest);
    out
}

/// A caller-declared head include injected on initial page load.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Include {
    Stylesheet {
        href: String,
    },
    Script {
        src: String,
        #[serde(default)]
        defer: bool,
        #[serde(default, rename = "async")]
        r#async: bool,
    },
    InlineCss {
        content: String,
    },
    InlineJs {
        content: String,
    },
}

impl Include {
    fn to_tag(&self) -> String {
        match self {
            Include::Stylesheet { href } => {
                format!("  <link rel=\"stylesheet\" href=\"{href}\">\n")
            }
            Include::Script { src, defer, r#async } => {
                let defer = if *defer { " defer" } else { "" };
                let asynk = if *r#async { " async" } else { "" };
                format!("  <script src=\"{src}\"{defer}{asynk}></script>\n")
            }
            Include::InlineCss { content } => format!("  <style>{content}</style>\n"),
            Include::InlineJs { content } => format!("  <script>{content}</script>\n"),
        }
    }
}

/// Per-page include provider, consulted on initial document renders only.
pub type IncludeFn = Arc<dyn Fn(&str) -> Vec<Include> + Send + Sync>;

/// Renders pages and carves the output into transmissible deltas.
#[derive(Clone)]
pub struct DeltaRenderer {
    templates: Arc<dyn TemplateRenderer>,
    includes: Option<IncludeFn>,
}

impl DeltaRenderer {
    pub fn new(templates: Arc<dyn TemplateRenderer>) -> Self {
        DeltaRenderer {
            templates,
            includes: None,
        }
    }

    /// Attach a per-page include provider for initial loads.
    pub fn with_includes(mut self, includes: IncludeFn) -> Self {
        self.includes = Some(includes);
        self
    }

    /// Render the delta payload for a live update: body fragment plus head
    /// metadata, no script injection (the runtime is already loaded).
    pub fn render_delta(
        &self,
        page: &str,
        variables: &Map<String, Value>,
    ) -> Result<Delta, LiveframeError> {
        let html = self.templates.render(page, variables)?;
        let head = extract_head(&html);
        let body = match extract_body(&html) {
            Some(body) => body.to_string(),
            None => {
                // Degraded mode for templates without body markers; the
                // client reconciles against the whole document instead.
                warn!("Template for '{}' has no <body> markers, sending whole document", page);
                html.clone()
            }
        };
        Ok(Delta { body, head })
    }

    /// Render the full document for an initial (non-live) page load,
    /// injecting the bootstrap script, caller includes, and the client
    /// runtime reference into the head exactly once.
    pub fn render_document(
        &self,
        page: &str,
        variables: &Map<String, Value>,
        session_id: &str,
    ) -> Result<String, LiveframeError> {
        let html = self.templates.render(page, variables)?;
        let includes = self
            .includes
            .as_ref()
            .map(|f| f(page))
            .unwrap_or_default();
        Ok(inject_head(&html, session_id, &includes))
    }
}

/// Extract title, meta mapping, and style blocks from a rendered document.
pub fn extract_head(html: &str) -> HeadData {
    let lower = html.to_ascii_lowercase();
    let mut head = HeadData::default();

    if let Some(start) = lower.find("<title")
        && let Some(open_end) = lower[start..].find('>')
        && let Some(close) = lower[start + open_end + 1..].find("</title")
    {
        let text_start = start + open_end + 1;
        head.title = Some(html[text_start..text_start + close].to_string());
    }

    let mut meta = HashMap::new();
    let mut from = 0;
    while let Some(pos) = lower[from..].find("<meta") {
        let tag_start = from + pos;
        let Some(tag_end) = lower[tag_start..].find('>') else {
            break;
        };
        let tag = &html[tag_start..tag_start + tag_end];
        let name = attr_value(tag, "name").or_else(|| attr_value(tag, "property"));
        let content = attr_value(tag, "content");
        if let (Some(name), Some(content)) = (name, content) {
            // later duplicates overwrite earlier, standard mapping semantics
            meta.insert(name, content);
        }
        from = tag_start + tag_end + 1;
    }
    if !meta.is_empty() {
        head.meta = Some(meta);
    }

    let mut styles = Vec::new();
    let mut from = 0;
    while let Some(pos) = lower[from..].find("<style") {
        let tag_start = from + pos;
        let Some(open_end) = lower[tag_start..].find('>') else {
            break;
        };
        let content_start = tag_start + open_end + 1;
        let Some(close) = lower[content_start..].find("</style") else {
            break;
        };
        styles.push(html[content_start..content_start + close].to_string());
        from = content_start + close + 1;
    }
    if !styles.is_empty() {
        head.styles = Some(styles);
    }

    head
}

/// Content between the `<body ...>` and the last `</body>` marker, or `None`
/// when either marker is missing.
pub fn extract_body(html: &str) -> Option<&str> {
    let lower = html.to_ascii_lowercase();
    let start = lower.find("<body")?;
    let open_end = lower[start..].find('>')?;
    let content_start = start + open_end + 1;
    let close = lower.rfind("</body")?;
    if close < content_start {
        return None;
    }
    Some(&html[content_start..close])
}

/// Value of a quoted attribute inside a single tag's text.
fn attr_value(tag: &str, name: &str) -> Option<String> {
    let lower = tag.to_ascii_lowercase();
    let mut from = 0;
    loop {
        let pos = lower[from..].find(name)? + from;
        // must be a standalone attribute name preceded by whitespace
        let preceded_ok = tag[..pos]
            .chars()
            .next_back()
            .is_some_and(|c| c.is_ascii_whitespace());
        let after = &tag[pos + name.len()..];
        let trimmed = after.trim_start();
        if preceded_ok && trimmed.starts_with('=') {
            let value_part = trimmed[1..].trim_start();
            let quote = value_part.chars().next()?;
            if quote == '"' || quote == '\'' {
                let rest = &value_part[1..];
                let end = rest.find(quote)?;
                return Some(rest[..end].to_string());
            }
        }
        from = pos + name.len();
        if from >= lower.len() {
            return None;
        }
    }
}

/// Inline bootstrap injected right after `<head>`: exposes the session id
/// and queues events triggered before the runtime script loads.
fn bootstrap_script(session_id: &str) -> String {
    format!(
        "<script>\n\
         window._sessionId = '{session_id}';\n\
         window.triggerEvent = window.triggerEvent || function () {{\n\
         window._eventQueue = window._eventQueue || [];\n\
         window._eventQueue.push({{ eventType: arguments[0], payload: arguments[1] || {{}} }});\n\
         }};\n\
         </script>\n"
    )
}

/// Inject the bootstrap script, includes, and client runtime reference into
/// the document head. Idempotent: a document already referencing the
/// runtime is returned unchanged.
pub fn inject_head(html: &str, session_id: &str, includes: &[Include]) -> String {
    if html.contains(CLIENT_RUNTIME_PATH) {
        return html.to_string();
    }
    let lower = html.to_ascii_lowercase();
    let mut out = html.to_string();

    // runtime reference goes last, after caller includes, before </head>
    if let Some(head_close) = lower.find("</head") {
        let mut tags = String::new();
        for include in includes {
            tags.push_str(&include.to_tag());
        }
        tags.push_str(&format!(
            "  <script src=\"{CLIENT_RUNTIME_PATH}\"></script>\n"
        ));
        out.insert_str(head_close, &tags);
    }

    let lower = out.to_ascii_lowercase();
    if let Some(head_open) = lower.find("<head")
        && let Some(open_end) = lower[head_open..].find('>')
    {
        out.insert_str(head_open + open_end + 1, &format!("\n{}", bootstrap_script(session_id)));
    }

    out
}
