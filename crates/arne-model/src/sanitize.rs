// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Outgoing-request sanitization.
//!
//! Providers reject requests over details that accumulate naturally in a long
//! session: empty text blocks, thinking blocks whose signature was lost,
//! images sent to text-only models, and lone UTF-16 surrogate escapes inside
//! raw JSON fragments.  Everything here is applied when a request is built;
//! the session log keeps the original content untouched.

use crate::types::{ContentBlock, ContentPart, Message, ToolContentPart, UserContent};

const IMAGE_OMITTED: &str = "[image omitted: model does not support image input]";

/// Prepare a message list for submission to a provider.
///
/// - empty text blocks are dropped;
/// - a prior assistant `thinking` block without its signature is demoted to a
///   plain text block (providers verify signatures on resubmission and reject
///   unsigned thinking);
/// - image parts are replaced with a text placeholder when the model is
///   text-only.
pub fn sanitize_outgoing(messages: Vec<Message>, supports_images: bool) -> Vec<Message> {
    messages
        .into_iter()
        .map(|m| {
            let m = sanitize_message(m);
            if supports_images {
                m
            } else {
                strip_images(m)
            }
        })
        .collect()
}

fn sanitize_message(mut m: Message) -> Message {
    if let Message::Assistant(a) = &mut m {
        a.content = std::mem::take(&mut a.content)
            .into_iter()
            .filter_map(|block| match block {
                ContentBlock::Text { text } if text.is_empty() => None,
                ContentBlock::Thinking { thinking, signature: None } => {
                    if thinking.is_empty() {
                        None
                    } else {
                        Some(ContentBlock::Text { text: thinking })
                    }
                }
                other => Some(other),
            })
            .collect();
    }
    m
}

fn strip_images(mut m: Message) -> Message {
    match &mut m {
        Message::User(u) => {
            if let UserContent::Parts(parts) = &mut u.content {
                for p in parts.iter_mut() {
                    if matches!(p, ContentPart::Image { .. }) {
                        *p = ContentPart::Text { text: IMAGE_OMITTED.to_string() };
                    }
                }
            }
        }
        Message::ToolResult(r) => {
            for p in r.content.iter_mut() {
                if matches!(p, ToolContentPart::Image { .. }) {
                    *p = ToolContentPart::Text { text: IMAGE_OMITTED.to_string() };
                }
            }
        }
        _ => {}
    }
    m
}

/// Replace unpaired UTF-16 surrogate escapes (`\uD800`–`\uDFFF`) inside a raw
/// JSON fragment with the replacement character escape.
///
/// Rust strings cannot hold lone surrogates, so the only place they can
/// appear is inside not-yet-decoded JSON text received from (or forwarded
/// to) a provider.  A paired high+low sequence is left untouched.
pub fn scrub_lone_surrogates(input: &str) -> String {
    let bytes = input.as_bytes();
    let mut out = String::with_capacity(input.len());
    let mut i = 0;
    while i < bytes.len() {
        if let Some((code, len)) = unicode_escape_at(input, i) {
            if (0xD800..0xDC00).contains(&code) {
                // High surrogate: valid only when a low surrogate follows.
                match unicode_escape_at(input, i + len) {
                    Some((low, low_len)) if (0xDC00..0xE000).contains(&low) => {
                        out.push_str(&input[i..i + len + low_len]);
                        i += len + low_len;
                        continue;
                    }
                    _ => {
                        out.push_str("\\uFFFD");
                        i += len;
                        continue;
                    }
                }
            }
            if (0xDC00..0xE000).contains(&code) {
                out.push_str("\\uFFFD");
                i += len;
                continue;
            }
            out.push_str(&input[i..i + len]);
            i += len;
            continue;
        }
        // Skip over an escaped backslash so `\\uD800` is not misread as an
        // escape sequence.
        if bytes[i] == b'\\' && i + 1 < bytes.len() && bytes[i + 1] == b'\\' {
            out.push_str("\\\\");
            i += 2;
            continue;
        }
        let c = input[i..].chars().next().unwrap_or('\u{FFFD}');
        out.push(c);
        i += c.len_utf8();
    }
    out
}

/// Returns `Some((code_unit, byte_len))` when `input[i..]` starts with a
/// `\uXXXX` escape.
fn unicode_escape_at(input: &str, i: usize) -> Option<(u32, usize)> {
    let rest = input.get(i..)?;
    let hex = rest.strip_prefix("\\u")?.get(..4)?;
    let code = u32::from_str_radix(hex, 16).ok()?;
    Some((code, 6))
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::AssistantMessage;

    #[test]
    fn empty_text_blocks_are_dropped() {
        let mut a = AssistantMessage::started("p", "m", "api");
        a.content.push(ContentBlock::text(""));
        a.content.push(ContentBlock::text("keep"));
        let out = sanitize_outgoing(vec![Message::Assistant(a)], true);
        match &out[0] {
            Message::Assistant(a) => {
                assert_eq!(a.content.len(), 1);
                assert_eq!(a.text(), "keep");
            }
            other => panic!("wrong variant: {other:?}"),
        }
    }

    #[test]
    fn unsigned_thinking_is_demoted_to_text() {
        let mut a = AssistantMessage::started("p", "m", "api");
        a.content.push(ContentBlock::Thinking { thinking: "chain".into(), signature: None });
        let out = sanitize_outgoing(vec![Message::Assistant(a)], true);
        match &out[0] {
            Message::Assistant(a) => {
                assert!(matches!(&a.content[0], ContentBlock::Text { text } if text == "chain"));
            }
            other => panic!("wrong variant: {other:?}"),
        }
    }

    #[test]
    fn signed_thinking_is_preserved() {
        let mut a = AssistantMessage::started("p", "m", "api");
        a.content.push(ContentBlock::Thinking {
            thinking: "chain".into(),
            signature: Some("sig".into()),
        });
        let out = sanitize_outgoing(vec![Message::Assistant(a)], true);
        match &out[0] {
            Message::Assistant(a) => {
                assert!(matches!(&a.content[0], ContentBlock::Thinking { .. }));
            }
            other => panic!("wrong variant: {other:?}"),
        }
    }

    #[test]
    fn images_stripped_for_text_only_models() {
        let m = Message::user_with_parts(vec![
            ContentPart::Text { text: "what is this".into() },
            ContentPart::Image { image_url: "data:image/png;base64,AA".into() },
        ]);
        let out = sanitize_outgoing(vec![m], false);
        match &out[0] {
            Message::User(u) => match &u.content {
                UserContent::Parts(parts) => {
                    assert!(matches!(&parts[1], ContentPart::Text { text } if text == IMAGE_OMITTED));
                }
                other => panic!("wrong content: {other:?}"),
            },
            other => panic!("wrong variant: {other:?}"),
        }
    }

    #[test]
    fn images_kept_for_vision_models() {
        let m = Message::user_with_parts(vec![ContentPart::Image {
            image_url: "data:image/png;base64,AA".into(),
        }]);
        let out = sanitize_outgoing(vec![m], true);
        match &out[0] {
            Message::User(u) => match &u.content {
                UserContent::Parts(parts) => {
                    assert!(matches!(&parts[0], ContentPart::Image { .. }));
                }
                other => panic!("wrong content: {other:?}"),
            },
            other => panic!("wrong variant: {other:?}"),
        }
    }

    // ── Surrogate scrubbing ───────────────────────────────────────────────────

    #[test]
    fn lone_high_surrogate_is_replaced() {
        assert_eq!(scrub_lone_surrogates("a\\ud800b"), "a\\uFFFDb");
    }

    #[test]
    fn lone_low_surrogate_is_replaced() {
        assert_eq!(scrub_lone_surrogates("a\\udc00b"), "a\\uFFFDb");
    }

    #[test]
    fn valid_surrogate_pair_is_preserved() {
        assert_eq!(scrub_lone_surrogates("\\ud83d\\ude00"), "\\ud83d\\ude00");
    }

    #[test]
    fn escaped_backslash_is_not_an_escape() {
        // `\\uD800` is a literal backslash followed by "uD800".
        assert_eq!(scrub_lone_surrogates(r#"\\ud800"#), r#"\\ud800"#);
    }

    #[test]
    fn plain_text_passes_through() {
        assert_eq!(scrub_lone_surrogates("hello \\n world"), "hello \\n world");
    }
}
