// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Tolerant parser for streamed JSON fragments.
//!
//! Tool-call arguments arrive as an incrementally growing JSON string.  The
//! UI wants to render arguments while they stream, so every prefix of a valid
//! document must produce *some* value: open strings and containers are closed,
//! dangling keys and half-written tokens are dropped.  Once the document is
//! complete, [`parse_partial`] agrees exactly with `serde_json::from_str`.

use serde_json::{Map, Value};

/// Parse a possibly-incomplete JSON document.
///
/// Guarantees:
/// - for any valid JSON document `S` and any prefix `P` of `S`,
///   `parse_partial(P)` returns a value (never panics, never fails);
/// - `parse_partial(S)` equals the strict `serde_json` parse of `S`.
///
/// Content outside those guarantees (arbitrary garbage) yields a best-effort
/// value, usually `Null`.
pub fn parse_partial(input: &str) -> Value {
    // Fast path: complete documents take the strict parser, which also
    // guarantees exact agreement with it.
    if let Ok(v) = serde_json::from_str::<Value>(input) {
        return v;
    }
    let mut p = Parser { s: input, pos: 0 };
    p.skip_ws();
    p.parse_value().unwrap_or(Value::Null)
}

struct Parser<'a> {
    s: &'a str,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn rest(&self) -> &'a str {
        &self.s[self.pos..]
    }

    fn peek(&self) -> Option<char> {
        self.rest().chars().next()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    fn skip_ws(&mut self) {
        while matches!(self.peek(), Some(' ' | '\t' | '\n' | '\r')) {
            self.bump();
        }
    }

    /// Parse one value.  Returns `None` when the input ends before any part
    /// of a value was seen (the caller drops the surrounding key or element).
    fn parse_value(&mut self) -> Option<Value> {
        match self.peek()? {
            '{' => Some(self.parse_object()),
            '[' => Some(self.parse_array()),
            '"' => self.parse_string().map(Value::String),
            '0'..='9' | '-' => self.parse_number(),
            't' | 'f' | 'n' => self.parse_literal(),
            _ => None,
        }
    }

    fn parse_object(&mut self) -> Value {
        self.bump(); // '{'
        let mut map = Map::new();
        loop {
            self.skip_ws();
            match self.peek() {
                None => break,
                Some('}') => {
                    self.bump();
                    break;
                }
                Some('"') => {}
                // Complete input never reaches this arm; for garbage, stop.
                Some(_) => break,
            }
            // A key whose string is still open at EOF is dangling: there is
            // no value to pair it with, so it is dropped.
            let Some(key) = self.parse_string() else { break };
            self.skip_ws();
            match self.peek() {
                Some(':') => {
                    self.bump();
                }
                // EOF between key and colon — drop the key.
                _ => break,
            }
            self.skip_ws();
            match self.parse_value() {
                Some(v) => {
                    map.insert(key, v);
                }
                // EOF right after the colon — drop the key.
                None => break,
            }
            self.skip_ws();
            match self.peek() {
                Some(',') => {
                    self.bump();
                }
                Some('}') => {
                    self.bump();
                    break;
                }
                _ => break,
            }
        }
        Value::Object(map)
    }

    fn parse_array(&mut self) -> Value {
        self.bump(); // '['
        let mut items = Vec::new();
        loop {
            self.skip_ws();
            match self.peek() {
                None => break,
                Some(']') => {
                    self.bump();
                    break;
                }
                _ => {}
            }
            match self.parse_value() {
                Some(v) => items.push(v),
                None => break,
            }
            self.skip_ws();
            match self.peek() {
                Some(',') => {
                    self.bump();
                }
                Some(']') => {
                    self.bump();
                    break;
                }
                _ => break,
            }
        }
        Value::Array(items)
    }

    /// Parse a string.  An unterminated string yields the content seen so
    /// far; a half-written escape sequence at EOF is dropped.  Returns `None`
    /// only when the cursor is not on a quote.
    fn parse_string(&mut self) -> Option<String> {
        if self.peek() != Some('"') {
            return None;
        }
        self.bump();
        let mut out = String::new();
        loop {
            match self.bump() {
                None => break,
                Some('"') => break,
                Some('\\') => match self.bump() {
                    None => break, // escape cut off at EOF
                    Some('"') => out.push('"'),
                    Some('\\') => out.push('\\'),
                    Some('/') => out.push('/'),
                    Some('b') => out.push('\u{0008}'),
                    Some('f') => out.push('\u{000C}'),
                    Some('n') => out.push('\n'),
                    Some('r') => out.push('\r'),
                    Some('t') => out.push('\t'),
                    Some('u') => match self.parse_unicode_escape() {
                        Some(c) => out.push(c),
                        None => break, // \uXX.. cut off at EOF
                    },
                    // Invalid escape; keep the raw character so partial
                    // output stays readable.
                    Some(other) => out.push(other),
                },
                Some(c) => out.push(c),
            }
        }
        Some(out)
    }

    /// Decode `\uXXXX`, pairing surrogates when a low surrogate follows.
    /// Lone surrogates decode to U+FFFD rather than failing the stream.
    fn parse_unicode_escape(&mut self) -> Option<char> {
        let first = self.take_hex4()?;
        if (0xD800..0xDC00).contains(&first) {
            // High surrogate: require a following \uDC00–\uDFFF.
            let mark = self.pos;
            if self.peek() == Some('\\') {
                self.bump();
                if self.peek() == Some('u') {
                    self.bump();
                    if let Some(second) = self.take_hex4() {
                        if (0xDC00..0xE000).contains(&second) {
                            let combined =
                                0x10000 + ((first - 0xD800) << 10) + (second - 0xDC00);
                            return char::from_u32(combined).or(Some('\u{FFFD}'));
                        }
                        // Not a low surrogate: rewind so it parses on its own.
                        self.pos = mark;
                        return Some('\u{FFFD}');
                    }
                    return None; // second escape cut off at EOF
                }
            }
            if self.pos == self.s.len() {
                return None; // cannot tell yet whether a pair follows
            }
            self.pos = mark;
            return Some('\u{FFFD}');
        }
        if (0xDC00..0xE000).contains(&first) {
            return Some('\u{FFFD}'); // lone low surrogate
        }
        char::from_u32(first)
    }

    fn take_hex4(&mut self) -> Option<u32> {
        let mut v = 0u32;
        for _ in 0..4 {
            let c = self.peek()?;
            let d = c.to_digit(16)?;
            self.bump();
            v = v * 16 + d;
        }
        Some(v)
    }

    /// Parse a number token, trimming half-written exponents or decimal
    /// points (`12.`, `3e+`) back to the longest valid prefix.
    fn parse_number(&mut self) -> Option<Value> {
        let start = self.pos;
        while matches!(
            self.peek(),
            Some('0'..='9' | '-' | '+' | '.' | 'e' | 'E')
        ) {
            self.bump();
        }
        let mut token = &self.s[start..self.pos];
        while !token.is_empty() {
            if let Ok(v) = serde_json::from_str::<Value>(token) {
                return Some(v);
            }
            token = &token[..token.len() - 1];
        }
        None
    }

    /// Parse `true` / `false` / `null`, completing a half-written literal at
    /// EOF (`tru` → `true`).
    fn parse_literal(&mut self) -> Option<Value> {
        for (word, value) in [
            ("true", Value::Bool(true)),
            ("false", Value::Bool(false)),
            ("null", Value::Null),
        ] {
            let rest = self.rest();
            if rest.starts_with(word) {
                self.pos += word.len();
                return Some(value);
            }
            if !rest.is_empty() && word.starts_with(rest) {
                // Literal cut off at EOF.
                self.pos = self.s.len();
                return Some(value);
            }
        }
        None
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
