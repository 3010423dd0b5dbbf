//! HTML rendering per envelope kind.
//!
//! Renderers never fail: a missing variable falls back to a neutral default so
//! a half-filled envelope still produces a readable email.

use std::collections::BTreeMap;

use tracker_common::types::{Envelope, MessageKind};

const DEFAULT_NAME: &str = "there";
const NO_COMPLETED_TASKS: &str = "No tasks completed in the last 24 hours.";
const NO_PENDING_TASKS: &str = "No pending tasks.";

/// HTML body for `envelope`. Kinds without a dedicated template reuse the plain
/// body as-is.
pub fn render_html(envelope: &Envelope) -> String {
    match envelope.kind() {
        MessageKind::DailyDigest => render_digest(envelope.variables()),
        MessageKind::Welcome | MessageKind::Other(_) => envelope.plain_body().to_string(),
    }
}

/// Name shown next to the recipient address: `name`, else `email`, else the
/// address itself.
pub fn display_name(envelope: &Envelope) -> &str {
    envelope
        .variable("name")
        .or_else(|| envelope.variable("email"))
        .unwrap_or_else(|| envelope.recipient())
}

pub fn render_digest(variables: &BTreeMap<String, String>) -> String {
    let get = |key: &str| variables.get(key).map(String::as_str).filter(|v| !v.is_empty());

    let name = escape(get("name").unwrap_or(DEFAULT_NAME));
    let completed_count = escape(get("completedCount").unwrap_or("0"));
    let pending_count = escape(get("pendingCount").unwrap_or("0"));
    let completed = task_list(get("completedTasks"), NO_COMPLETED_TASKS);
    let pending = task_list(get("pendingTasks"), NO_PENDING_TASKS);

    format!(
        r#"<html>
<head>
<style>
body {{ font-family: Arial, sans-serif; line-height: 1.6; color: #333; }}
.container {{ max-width: 600px; margin: 0 auto; padding: 20px; }}
h1 {{ color: #2c3e50; }}
h2 {{ color: #3498db; }}
.stats {{ background-color: #f9f9f9; padding: 15px; border-radius: 5px; margin: 20px 0; }}
.footer {{ margin-top: 30px; font-size: 12px; color: #7f8c8d; text-align: center; }}
ul {{ padding-left: 20px; }}
</style>
</head>
<body>
<div class="container">
<h1>Hello {name}!</h1>
<p>Here's your daily task summary:</p>
<div class="stats">
<p><strong>Completed tasks:</strong> {completed_count}</p>
<p><strong>Pending tasks:</strong> {pending_count}</p>
</div>
<h2>Completed Tasks</h2>
{completed}
<h2>Pending Tasks</h2>
{pending}
<div class="footer">
<p>This is an automated message from TaskTracker. Please do not reply.</p>
</div>
</div>
</body>
</html>"#
    )
}

/// `<ul>` of the comma-joined titles, or the fallback sentence.
fn task_list(joined: Option<&str>, empty: &str) -> String {
    let items: Vec<String> = joined
        .unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|title| !title.is_empty())
        .map(|title| format!("<li>{}</li>", escape(title)))
        .collect();

    if items.is_empty() {
        format!("<p>{empty}</p>")
    } else {
        format!("<ul>{}</ul>", items.concat())
    }
}

fn escape(text: &str) -> String {
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

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn envelope(kind: MessageKind, variables: BTreeMap<String, String>) -> Envelope {
        Envelope::new(kind, "a@example.com", "Subject", "Plain body", variables).unwrap()
    }

    #[test]
    fn test_digest_defaults_when_variables_missing() {
        let html = render_digest(&BTreeMap::new());
        assert!(html.contains("Hello there!"));
        assert!(html.contains("<strong>Completed tasks:</strong> 0"));
        assert!(html.contains("<p>No tasks completed in the last 24 hours.</p>"));
        assert!(html.contains("<p>No pending tasks.</p>"));
    }

    #[test]
    fn test_digest_lists_titles() {
        let html = render_digest(&vars(&[
            ("name", "Ann"),
            ("completedCount", "6"),
            ("pendingCount", "1"),
            ("completedTasks", "T6, T5, T4"),
            ("pendingTasks", "Write report"),
        ]));
        assert!(html.contains("Hello Ann!"));
        assert!(html.contains("<strong>Completed tasks:</strong> 6"));
        assert!(html.contains("<ul><li>T6</li><li>T5</li><li>T4</li></ul>"));
        assert!(html.contains("<ul><li>Write report</li></ul>"));
        assert!(!html.contains("No pending tasks."));
    }

    #[test]
    fn test_digest_escapes_user_text() {
        let html = render_digest(&vars(&[("pendingTasks", "<script>alert(1)</script>")]));
        assert!(!html.contains("<script>"));
        assert!(html.contains("&lt;script&gt;"));
    }

    #[test]
    fn test_unknown_kind_reuses_plain_body() {
        let e = envelope(MessageKind::Other("password_reset".into()), BTreeMap::new());
        assert_eq!(render_html(&e), "Plain body");

        let welcome = envelope(MessageKind::Welcome, BTreeMap::new());
        assert_eq!(render_html(&welcome), "Plain body");
    }

    #[test]
    fn test_display_name_resolution() {
        let named = envelope(
            MessageKind::Welcome,
            vars(&[("name", "Ann"), ("email", "ann@example.com")]),
        );
        assert_eq!(display_name(&named), "Ann");

        let by_email = envelope(MessageKind::Welcome, vars(&[("name", ""), ("email", "ann@example.com")]));
        assert_eq!(display_name(&by_email), "ann@example.com");

        let bare = envelope(MessageKind::Welcome, BTreeMap::new());
        assert_eq!(display_name(&bare), "a@example.com");
    }
}
