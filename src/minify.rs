//! Content-type keyed response minification.
//!
//! Minification is a best-effort size optimization: callers fall back to the
//! original bytes whenever [`minify`] returns an error.
//!
//! # HTML
//!
//! A streaming rewrite that
//!
//! - removes comments, except conditional comments (`<!--[if IE]>`),
//! - collapses each run of whitespace in text to a single space,
//! - leaves `<pre>`, `<textarea>`, `<script>` and `<style>` content untouched,
//! - keeps every tag, including `<html>`, `<head>` and `<body>`.
//!
//! # JSON
//!
//! Validated, then stripped of the whitespace between tokens. Tokens are
//! copied byte-for-byte: numbers keep their exact spelling, repeated keys
//! survive and escapes inside strings are not rewritten.

use std::cell::Cell;
use std::rc::Rc;

use bytes::Bytes;
use lol_html::html_content::{Comment, ContentType, Element, EndTag, TextChunk, TextType};
use lol_html::{RewriteStrSettings, doc_comments, doc_text, element, rewrite_str};
use serde::de::IgnoredAny;
use thiserror::Error;

/// Errors raised while minifying a response body.
#[derive(Debug, Error)]
pub enum MinifyError {
    #[error("body is not valid UTF-8")]
    InvalidUtf8(#[from] std::str::Utf8Error),

    #[error("HTML rewrite failed: {0}")]
    Html(#[from] lol_html::errors::RewritingError),

    #[error("malformed JSON: {0}")]
    Json(#[from] serde_json::Error),
}

impl MinifyError {
    /// Short label for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            MinifyError::InvalidUtf8(_) => "invalid_utf8",
            MinifyError::Html(_) => "html",
            MinifyError::Json(_) => "json",
        }
    }
}

/// Response body formats that have a minifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentKind {
    Html,
    Json,
}

impl ContentKind {
    /// Map a `Content-Type` header value to a minifiable kind.
    ///
    /// Parameters such as `charset` are ignored and matching is
    /// case-insensitive. `application/json` and any `+json` suffix type
    /// (e.g. `application/problem+json`) are JSON.
    pub fn from_content_type(content_type: &str) -> Option<Self> {
        let essence = content_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();

        match essence.as_str() {
            "text/html" => Some(ContentKind::Html),
            "application/json" => Some(ContentKind::Json),
            other if other.contains('/') && other.ends_with("+json") => Some(ContentKind::Json),
            _ => None,
        }
    }

    /// Label for logs and metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentKind::Html => "html",
            ContentKind::Json => "json",
        }
    }
}

/// Minify `input` as `kind`.
pub fn minify(kind: ContentKind, input: &[u8]) -> Result<Bytes, MinifyError> {
    match kind {
        ContentKind::Html => {
            let html = std::str::from_utf8(input)?;
            Ok(Bytes::from(minify_html(html)?))
        }
        ContentKind::Json => minify_json(input).map(Bytes::from),
    }
}

fn minify_json(input: &[u8]) -> Result<Vec<u8>, MinifyError> {
    // Reject malformed documents before touching a byte
    serde_json::from_slice::<IgnoredAny>(input)?;

    let mut out = Vec::with_capacity(input.len());
    let mut in_string = false;
    let mut escaped = false;

    for &byte in input {
        if in_string {
            out.push(byte);
            if escaped {
                escaped = false;
            } else if byte == b'\\' {
                escaped = true;
            } else if byte == b'"' {
                in_string = false;
            }
        } else if !is_json_whitespace(byte) {
            in_string = byte == b'"';
            out.push(byte);
        }
    }

    Ok(out)
}

fn is_json_whitespace(byte: u8) -> bool {
    matches!(byte, b' ' | b'\t' | b'\n' | b'\r')
}

fn minify_html(input: &str) -> Result<String, MinifyError> {
    // Open <pre> elements; their text is emitted verbatim
    let pre_depth = Rc::new(Cell::new(0usize));
    // Whether the text emitted so far in the current text node ends in a space
    let in_space = Rc::new(Cell::new(false));

    let output = rewrite_str(
        input,
        RewriteStrSettings {
            element_content_handlers: vec![element!("pre", {
                let pre_depth = Rc::clone(&pre_depth);
                move |el: &mut Element<'_, '_>| {
                    if let Some(handlers) = el.end_tag_handlers() {
                        pre_depth.set(pre_depth.get() + 1);
                        let pre_depth = Rc::clone(&pre_depth);
                        handlers.push(Box::new(move |_end: &mut EndTag<'_>| {
                            pre_depth.set(pre_depth.get().saturating_sub(1));
                            Ok(())
                        }));
                    }
                    Ok(())
                }
            })],
            document_content_handlers: vec![
                doc_comments!(|comment: &mut Comment<'_>| {
                    if !is_conditional_comment(&comment.text()) {
                        comment.remove();
                    }
                    Ok(())
                }),
                doc_text!({
                    let pre_depth = Rc::clone(&pre_depth);
                    let in_space = Rc::clone(&in_space);
                    move |chunk: &mut TextChunk<'_>| {
                        // RCDATA/RAWTEXT/script text belongs to <textarea>,
                        // <title>, <style>, <script> and friends
                        let collapsible =
                            pre_depth.get() == 0 && matches!(chunk.text_type(), TextType::Data);

                        if collapsible {
                            let collapsed = collapse_whitespace(chunk.as_str(), &in_space);
                            if collapsed != chunk.as_str() {
                                chunk.replace(&collapsed, ContentType::Html);
                            }
                        }

                        if chunk.last_in_text_node() {
                            in_space.set(false);
                        }
                        Ok(())
                    }
                }),
            ],
            ..RewriteStrSettings::default()
        },
    )?;

    Ok(output)
}

/// Collapse whitespace runs in `text` to one space, continuing a run that
/// began in the previous chunk of the same text node.
fn collapse_whitespace(text: &str, in_space: &Cell<bool>) -> String {
    let mut out = String::with_capacity(text.len());
    let mut space = in_space.get();

    for ch in text.chars() {
        if ch.is_ascii_whitespace() {
            if !space {
                out.push(' ');
                space = true;
            }
        } else {
            out.push(ch);
            space = false;
        }
    }

    in_space.set(space);
    out
}

fn is_conditional_comment(text: &str) -> bool {
    let text = text.trim_start();
    text.starts_with("[if") || text.starts_with("<![endif]") || text.ends_with("<![endif]")
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn html(input: &str) -> String {
        String::from_utf8(minify(ContentKind::Html, input.as_bytes()).unwrap().to_vec()).unwrap()
    }

    #[test]
    fn test_content_kind_html() {
        assert_eq!(
            ContentKind::from_content_type("text/html"),
            Some(ContentKind::Html)
        );
        assert_eq!(
            ContentKind::from_content_type("text/html; charset=utf-8"),
            Some(ContentKind::Html)
        );
        assert_eq!(
            ContentKind::from_content_type("Text/HTML"),
            Some(ContentKind::Html)
        );
    }

    #[test]
    fn test_content_kind_json() {
        assert_eq!(
            ContentKind::from_content_type("application/json"),
            Some(ContentKind::Json)
        );
        assert_eq!(
            ContentKind::from_content_type("application/problem+json; charset=utf-8"),
            Some(ContentKind::Json)
        );
    }

    #[test]
    fn test_content_kind_unsupported() {
        assert_eq!(ContentKind::from_content_type("text/plain"), None);
        assert_eq!(ContentKind::from_content_type("image/png"), None);
        assert_eq!(ContentKind::from_content_type(""), None);
        assert_eq!(ContentKind::from_content_type("+json"), None);
    }

    #[test]
    fn test_html_collapses_whitespace() {
        let out = html("<html>\n  <body>\n    <p>Hello,     world</p>\n  </body>\n</html>");
        assert_eq!(out, "<html> <body> <p>Hello, world</p> </body> </html>");
    }

    #[test]
    fn test_html_single_newline_becomes_space() {
        assert_eq!(html("<p>a\nb</p>"), "<p>a b</p>");
    }

    #[test]
    fn test_html_removes_comments() {
        let out = html("<p>a<!-- secret note -->b</p>");
        assert_eq!(out, "<p>ab</p>");
    }

    #[test]
    fn test_html_keeps_conditional_comments() {
        let input = "<!--[if IE]><p>old</p><![endif]--><p>new</p>";
        assert_eq!(html(input), input);
    }

    #[test]
    fn test_html_preserves_pre_content() {
        let out = html("<div>\n  <pre>  keep\n    this  </pre>\n</div>");
        assert_eq!(out, "<div> <pre>  keep\n    this  </pre> </div>");
    }

    #[test]
    fn test_html_preserves_nested_pre_content() {
        let out = html("<pre><code>fn main() {\n    run();\n}</code></pre>  <p>x  y</p>");
        assert_eq!(
            out,
            "<pre><code>fn main() {\n    run();\n}</code></pre> <p>x y</p>"
        );
    }

    #[test]
    fn test_html_preserves_script_and_style() {
        let input = "<script>\nlet a = 1\nlet b = 2\n</script><style>\n  p {  color: red; }\n</style>";
        assert_eq!(html(input), input);
    }

    #[test]
    fn test_html_preserves_textarea() {
        let input = "<textarea>\n  line one\n  line two\n</textarea>";
        assert_eq!(html(input), input);
    }

    #[test]
    fn test_html_keeps_document_tags_and_attributes() {
        let input = "<!DOCTYPE html><html lang=\"en\"><head><title>T</title></head><body class=\"x\"></body></html>";
        assert_eq!(html(input), input);
    }

    #[test]
    fn test_html_keeps_entities() {
        assert_eq!(html("<p>a  &amp;   b</p>"), "<p>a &amp; b</p>");
    }

    #[test]
    fn test_html_rejects_invalid_utf8() {
        let err = minify(ContentKind::Html, &[0x3c, 0x70, 0xff, 0xfe]).unwrap_err();
        assert!(matches!(err, MinifyError::InvalidUtf8(_)));
        assert_eq!(err.kind(), "invalid_utf8");
    }

    #[test]
    fn test_json_is_compacted() {
        let out = minify(
            ContentKind::Json,
            b"{\n  \"name\": \"edge\",\n  \"tags\": [ 1, 2, 3 ]\n}",
        )
        .unwrap();
        assert_eq!(&out[..], br#"{"name":"edge","tags":[1,2,3]}"#);
    }

    #[test]
    fn test_json_preserves_key_order() {
        let out = minify(ContentKind::Json, br#"{ "zeta": 1, "alpha": 2 }"#).unwrap();
        assert_eq!(&out[..], br#"{"zeta":1,"alpha":2}"#);
    }

    #[test]
    fn test_json_keeps_whitespace_inside_strings() {
        let out = minify(ContentKind::Json, br#"{ "msg": "a   b" }"#).unwrap();
        assert_eq!(&out[..], br#"{"msg":"a   b"}"#);
    }

    #[test]
    fn test_json_tokens_are_copied_verbatim() {
        let input = br#"{ "id": 12345678901234567890123, "price": 0.10000000000000000555, "dup": 1, "dup": 2 }"#;
        let out = minify(ContentKind::Json, input).unwrap();
        assert_eq!(
            &out[..],
            br#"{"id":12345678901234567890123,"price":0.10000000000000000555,"dup":1,"dup":2}"#
        );
    }

    #[test]
    fn test_json_escapes_are_left_alone() {
        let input = b"[ \"quote \\\" inside\", \"back\\\\\" , \"\\u00e9 \\n\" , 1e5 , -0.0 ]";
        let out = minify(ContentKind::Json, input).unwrap();
        assert_eq!(
            &out[..],
            b"[\"quote \\\" inside\",\"back\\\\\",\"\\u00e9 \\n\",1e5,-0.0]".as_slice()
        );
    }

    #[test]
    fn test_json_scalar_document() {
        let out = minify(ContentKind::Json, b"  \"  padded  \"\n").unwrap();
        assert_eq!(&out[..], b"\"  padded  \"".as_slice());
    }

    #[test]
    fn test_json_trailing_garbage_is_an_error() {
        let err = minify(ContentKind::Json, b"{\"a\": 1} x").unwrap_err();
        assert!(matches!(err, MinifyError::Json(_)));
    }

    #[test]
    fn test_malformed_json_is_an_error() {
        let err = minify(ContentKind::Json, b"{\"unterminated\": ").unwrap_err();
        assert!(matches!(err, MinifyError::Json(_)));
        assert_eq!(err.kind(), "json");
    }
}
