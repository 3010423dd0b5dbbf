//! MIME composition.
//!
//! Every message is `multipart/alternative` with a text part followed by an
//! HTML part, separated by the fixed boundary `BOUNDARY`. The header set is
//! exactly From, To, Subject, MIME-Version and Content-Type, in that order.

pub const BOUNDARY: &str = "BOUNDARY";

/// `"Name" <address>` for the From header.
pub fn from_header(name: &str, email: &str) -> String {
    let name = header_value(name).replace('\\', "\\\\").replace('"', "\\\"");
    format!("\"{name}\" <{email}>")
}

/// `Name <address>` when a distinct display name is known, else the bare
/// address. Names with special characters are quoted.
pub fn to_header(display_name: &str, email: &str) -> String {
    let name = header_value(display_name);
    let name = name.trim();
    if name.is_empty() || name == email {
        return email.to_string();
    }
    if name.contains(|c: char| "()<>[]:;@\\,.\"".contains(c)) {
        let quoted = name.replace('\\', "\\\\").replace('"', "\\\"");
        format!("\"{quoted}\" <{email}>")
    } else {
        format!("{name} <{email}>")
    }
}

/// Full message text, ready for `DATA`.
pub fn compose(from: &str, to: &str, subject: &str, text: &str, html: &str) -> String {
    let mut msg = String::with_capacity(text.len() + html.len() + 512);

    msg.push_str(&format!("From: {}\r\n", header_value(from)));
    msg.push_str(&format!("To: {}\r\n", header_value(to)));
    msg.push_str(&format!("Subject: {}\r\n", header_value(subject)));
    msg.push_str("MIME-Version: 1.0\r\n");
    msg.push_str(&format!(
        "Content-Type: multipart/alternative; boundary=\"{BOUNDARY}\"\r\n"
    ));

    msg.push_str(&format!("\r\n--{BOUNDARY}\r\n"));
    msg.push_str("Content-Type: text/plain; charset=\"utf-8\"\r\n\r\n");
    msg.push_str(&crlf(text));
    msg.push_str(&format!("\r\n--{BOUNDARY}\r\n"));
    msg.push_str("Content-Type: text/html; charset=\"utf-8\"\r\n\r\n");
    msg.push_str(&crlf(html));
    msg.push_str(&format!("\r\n--{BOUNDARY}--\r\n"));

    msg
}

/// Header values are single-line; a CR or LF would start a new header.
fn header_value(value: &str) -> String {
    value.replace(['\r', '\n'], " ")
}

fn crlf(body: &str) -> String {
    body.replace("\r\n", "\n").replace('\n', "\r\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_order_and_boundary() {
        let msg = compose(
            &from_header("TaskTracker", "noreply@example.com"),
            "a@example.com",
            "Hi",
            "text",
            "<p>html</p>",
        );

        let headers: Vec<&str> = msg
            .split("\r\n\r\n")
            .next()
            .unwrap()
            .split("\r\n")
            .map(|line| line.split(':').next().unwrap())
            .collect();
        assert_eq!(
            headers,
            vec!["From", "To", "Subject", "MIME-Version", "Content-Type"]
        );
        assert!(msg.starts_with("From: \"TaskTracker\" <noreply@example.com>\r\n"));
        assert!(msg.contains("Content-Type: multipart/alternative; boundary=\"BOUNDARY\"\r\n"));

        let text_at = msg.find("text/plain").unwrap();
        let html_at = msg.find("text/html").unwrap();
        assert!(text_at < html_at);
        assert!(msg.ends_with("\r\n--BOUNDARY--\r\n"));
    }

    #[test]
    fn test_bodies_use_crlf() {
        let msg = compose("f", "t", "s", "line one\nline two", "<p>\r\n</p>");
        assert!(msg.contains("line one\r\nline two"));
        assert!(!msg.replace("\r\n", "").contains('\n'));
    }

    #[test]
    fn test_header_injection_neutralised() {
        let msg = compose("f", "t", "Hi\r\nBcc: evil@example.com", "x", "y");
        assert!(msg.contains("Subject: Hi  Bcc: evil@example.com\r\n"));
        assert!(!msg.contains("\r\nBcc:"));
    }

    #[test]
    fn test_to_header_display_name() {
        assert_eq!(to_header("Ann Lee", "ann@example.com"), "Ann Lee <ann@example.com>");
        assert_eq!(to_header("ann@example.com", "ann@example.com"), "ann@example.com");
        assert_eq!(to_header("", "ann@example.com"), "ann@example.com");
        assert_eq!(
            to_header("Lee, Ann", "ann@example.com"),
            "\"Lee, Ann\" <ann@example.com>"
        );
    }
}
