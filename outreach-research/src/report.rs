//! Report rendering
//!
//! Converts the step 3 narrative (markdown) into a standalone HTML document.
//! Raw HTML embedded by the model is rendered as text, never passed through.

use anyhow::{bail, Result};
use pulldown_cmark::{html, Event, Options, Parser};

pub trait ReportRenderer: Send + Sync {
    fn render(&self, subject_name: &str, narrative: &str) -> Result<String>;
}

/// Markdown to HTML renderer
#[derive(Debug, Clone, Default)]
pub struct HtmlReportRenderer;

impl ReportRenderer for HtmlReportRenderer {
    fn render(&self, subject_name: &str, narrative: &str) -> Result<String> {
        if narrative.trim().is_empty() {
            bail!("cannot render an empty report");
        }
        Ok(wrap_document(subject_name, &markdown_to_html(narrative)))
    }
}

/// Degraded rendering: the escaped narrative inside `<pre>`
pub fn plain_text_report(subject_name: &str, narrative: &str) -> String {
    let body = format!("<pre>{}</pre>", escape_html(narrative));
    wrap_document(subject_name, &body)
}

fn wrap_document(subject_name: &str, body: &str) -> String {
    format!(
        "<!DOCTYPE html>\n<html lang=\"en\">\n<head>\n<meta charset=\"utf-8\">\n<title>{} Research Report</title>\n</head>\n<body>\n<article class=\"research-report\">\n{}</article>\n</body>\n</html>\n",
        escape_html(subject_name),
        body
    )
}

pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

/// Render markdown (tables, strikethrough and task lists enabled) to an HTML fragment
pub fn markdown_to_html(markdown: &str) -> String {
    let options = Options::ENABLE_TABLES | Options::ENABLE_STRIKETHROUGH | Options::ENABLE_TASKLISTS;

    let events = Parser::new_ext(markdown, options).map(|event| match event {
        Event::Html(raw) | Event::InlineHtml(raw) => Event::Text(raw),
        other => other,
    });

    let mut out = String::with_capacity(markdown.len() * 3 / 2);
    html::push_html(&mut out, events);
    out
}
