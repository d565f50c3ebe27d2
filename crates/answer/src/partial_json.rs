//! Tolerant reader for JSON documents that are still being generated.
//!
//! A model streaming a schema-constrained object produces a growing prefix of
//! one JSON document. [`parse_partial`] reads such a prefix and returns the
//! value it describes so far:
//!
//! - an unterminated string yields the text received so far (an incomplete
//!   escape sequence at the end is dropped, never guessed)
//! - unterminated arrays and objects are closed
//! - an object key whose value has not started is dropped
//! - a number or literal cut off at the end is dropped
//!
//! Anything that can never become valid JSON is an error. Text that is
//! emitted for a prefix is stable: a longer prefix of the same document only
//! ever appends to a string, it never rewrites what was already returned.

use serde_json::{Map, Value};
use thiserror::Error;

/// A prefix that cannot be completed into valid JSON.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unexpected {found} at byte {offset}")]
pub struct PartialJsonError {
    pub offset: usize,
    pub found: String,
}

/// Parse a (possibly incomplete) JSON document.
///
/// Returns `Ok(None)` when no value has started yet.
pub fn parse_partial(input: &str) -> Result<Option<Value>, PartialJsonError> {
    let mut reader = Reader { src: input, pos: 0 };
    match reader.value()? {
        Parsed::Truncated(value) => Ok(value),
        Parsed::Complete(value) => {
            reader.skip_ws();
            if reader.pos < input.len() {
                Err(reader.unexpected(reader.pos))
            } else {
                Ok(Some(value))
            }
        }
    }
}

enum Parsed<T> {
    /// The value was closed in the input.
    Complete(T),
    /// Input ended inside the value; carries what is known so far.
    Truncated(Option<T>),
}

impl<T> Parsed<T> {
    fn map<U>(self, f: impl FnOnce(T) -> U) -> Parsed<U> {
        match self {
            Self::Complete(v) => Parsed::Complete(f(v)),
            Self::Truncated(v) => Parsed::Truncated(v.map(f)),
        }
    }
}

type ReadResult<T> = Result<Parsed<T>, PartialJsonError>;

struct Reader<'a> {
    src: &'a str,
    pos: usize,
}

impl Reader<'_> {
    fn peek(&self) -> Option<char> {
        self.src[self.pos..].chars().next()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    fn skip_ws(&mut self) {
        while matches!(self.peek(), Some(' ' | '\n' | '\r' | '\t')) {
            self.pos += 1;
        }
    }

    fn unexpected(&self, offset: usize) -> PartialJsonError {
        let found = match self.src[offset..].chars().next() {
            Some(c) => format!("'{}'", c.escape_debug()),
            None => "end of input".to_string(),
        };
        PartialJsonError { offset, found }
    }

    /// Error for the character most recently consumed by `bump`.
    fn unexpected_prev(&self, c: char) -> PartialJsonError {
        self.unexpected(self.pos - c.len_utf8())
    }

    fn value(&mut self) -> ReadResult<Value> {
        self.skip_ws();
        match self.peek() {
            None => Ok(Parsed::Truncated(None)),
            Some('{') => self.object(),
            Some('[') => self.array(),
            Some('"') => Ok(self.string()?.map(Value::String)),
            Some('t') => self.literal("true", Value::Bool(true)),
            Some('f') => self.literal("false", Value::Bool(false)),
            Some('n') => self.literal("null", Value::Null),
            Some(c) if c == '-' || c.is_ascii_digit() => self.number(),
            Some(_) => Err(self.unexpected(self.pos)),
        }
    }

    fn object(&mut self) -> ReadResult<Value> {
        self.bump(); // '{'
        let mut map = Map::new();

        self.skip_ws();
        if self.peek() == Some('}') {
            self.bump();
            return Ok(Parsed::Complete(Value::Object(map)));
        }

        loop {
            self.skip_ws();
            match self.peek() {
                None => return Ok(Parsed::Truncated(Some(Value::Object(map)))),
                Some('"') => {}
                Some(_) => return Err(self.unexpected(self.pos)),
            }

            let key = match self.string()? {
                Parsed::Complete(key) => key,
                Parsed::Truncated(_) => return Ok(Parsed::Truncated(Some(Value::Object(map)))),
            };

            self.skip_ws();
            match self.bump() {
                None => return Ok(Parsed::Truncated(Some(Value::Object(map)))),
                Some(':') => {}
                Some(c) => return Err(self.unexpected_prev(c)),
            }

            match self.value()? {
                Parsed::Complete(value) => {
                    map.insert(key, value);
                }
                Parsed::Truncated(value) => {
                    if let Some(value) = value {
                        map.insert(key, value);
                    }
                    return Ok(Parsed::Truncated(Some(Value::Object(map))));
                }
            }

            self.skip_ws();
            match self.bump() {
                None => return Ok(Parsed::Truncated(Some(Value::Object(map)))),
                Some(',') => continue,
                Some('}') => return Ok(Parsed::Complete(Value::Object(map))),
                Some(c) => return Err(self.unexpected_prev(c)),
            }
        }
    }

    fn array(&mut self) -> ReadResult<Value> {
        self.bump(); // '['
        let mut items = Vec::new();

        self.skip_ws();
        if self.peek() == Some(']') {
            self.bump();
            return Ok(Parsed::Complete(Value::Array(items)));
        }

        loop {
            match self.value()? {
                Parsed::Complete(value) => items.push(value),
                Parsed::Truncated(value) => {
                    items.extend(value);
                    return Ok(Parsed::Truncated(Some(Value::Array(items))));
                }
            }

            self.skip_ws();
            match self.bump() {
                None => return Ok(Parsed::Truncated(Some(Value::Array(items)))),
                Some(',') => continue,
                Some(']') => return Ok(Parsed::Complete(Value::Array(items))),
                Some(c) => return Err(self.unexpected_prev(c)),
            }
        }
    }

    fn string(&mut self) -> ReadResult<String> {
        self.bump(); // opening quote
        let mut out = String::new();

        loop {
            let Some(c) = self.bump() else {
                return Ok(Parsed::Truncated(Some(out)));
            };
            match c {
                '"' => return Ok(Parsed::Complete(out)),
                '\\' => match self.escape()? {
                    Some(ch) => out.push(ch),
                    None => return Ok(Parsed::Truncated(Some(out))),
                },
                c if (c as u32) < 0x20 => return Err(self.unexpected_prev(c)),
                c => out.push(c),
            }
        }
    }

    /// Decode the escape after a backslash. `None` means the input ended
    /// inside the escape.
    fn escape(&mut self) -> Result<Option<char>, PartialJsonError> {
        let Some(c) = self.bump() else {
            return Ok(None);
        };
        let ch = match c {
            '"' => '"',
            '\\' => '\\',
            '/' => '/',
            'b' => '\u{8}',
            'f' => '\u{c}',
            'n' => '\n',
            'r' => '\r',
            't' => '\t',
            'u' => return self.unicode_escape(),
            other => return Err(self.unexpected_prev(other)),
        };
        Ok(Some(ch))
    }

    fn unicode_escape(&mut self) -> Result<Option<char>, PartialJsonError> {
        let start = self.pos;
        let Some(high) = self.hex4()? else {
            return Ok(None);
        };

        if (0xD800..0xDC00).contains(&high) {
            // A high surrogate must be followed by `\u` and a low surrogate.
            match self.bump() {
                None => return Ok(None),
                Some('\\') => {}
                Some(c) => return Err(self.unexpected_prev(c)),
            }
            match self.bump() {
                None => return Ok(None),
                Some('u') => {}
                Some(c) => return Err(self.unexpected_prev(c)),
            }
            let Some(low) = self.hex4()? else {
                return Ok(None);
            };
            if !(0xDC00..0xE000).contains(&low) {
                return Err(self.unexpected(start));
            }
            let code = 0x10000 + ((high - 0xD800) << 10) + (low - 0xDC00);
            return char::from_u32(code)
                .map(Some)
                .ok_or_else(|| self.unexpected(start));
        }

        // Lone low surrogates are not characters.
        char::from_u32(high)
            .map(Some)
            .ok_or_else(|| self.unexpected(start))
    }

    fn hex4(&mut self) -> Result<Option<u32>, PartialJsonError> {
        let mut code = 0u32;
        for _ in 0..4 {
            let Some(c) = self.bump() else {
                return Ok(None);
            };
            let digit = c.to_digit(16).ok_or_else(|| self.unexpected_prev(c))?;
            code = code * 16 + digit;
        }
        Ok(Some(code))
    }

    fn number(&mut self) -> ReadResult<Value> {
        let start = self.pos;
        while matches!(self.peek(), Some(c) if c.is_ascii_digit() || matches!(c, '-' | '+' | '.' | 'e' | 'E'))
        {
            self.pos += 1;
        }

        // More digits may follow.
        if self.pos == self.src.len() {
            return Ok(Parsed::Truncated(None));
        }

        match serde_json::from_str::<Value>(&self.src[start..self.pos]) {
            Ok(number @ Value::Number(_)) => Ok(Parsed::Complete(number)),
            _ => Err(self.unexpected(start)),
        }
    }

    fn literal(&mut self, word: &'static str, value: Value) -> ReadResult<Value> {
        let rest = &self.src[self.pos..];
        if rest.starts_with(word) {
            self.pos += word.len();
            Ok(Parsed::Complete(value))
        } else if word.starts_with(rest) {
            self.pos = self.src.len();
            Ok(Parsed::Truncated(None))
        } else {
            Err(self.unexpected(self.pos))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parse(input: &str) -> Option<Value> {
        parse_partial(input).unwrap()
    }

    #[test]
    fn nothing_started() {
        assert_eq!(parse(""), None);
        assert_eq!(parse("  \n"), None);
    }

    #[test]
    fn open_object_and_partial_key() {
        assert_eq!(parse("{"), Some(json!({})));
        assert_eq!(parse(r#"{"answer_mark"#), Some(json!({})));
        assert_eq!(parse(r#"{"answer_markdown""#), Some(json!({})));
        assert_eq!(parse(r#"{"answer_markdown": "#), Some(json!({})));
    }

    #[test]
    fn partial_string_value() {
        assert_eq!(
            parse(r#"{"answer_markdown": "**Loan"#),
            Some(json!({"answer_markdown": "**Loan"}))
        );
        assert_eq!(
            parse(r#"{"answer_markdown": ""#),
            Some(json!({"answer_markdown": ""}))
        );
    }

    #[test]
    fn incomplete_escapes_are_dropped() {
        assert_eq!(parse(r#"{"a": "line\"#), Some(json!({"a": "line"})));
        assert_eq!(parse(r#"{"a": "line\n"#), Some(json!({"a": "line\n"})));
        assert_eq!(parse(r#"{"a": "caf\u00"#), Some(json!({"a": "caf"})));
        assert_eq!(parse(r#"{"a": "café"#), Some(json!({"a": "café"})));
    }

    #[test]
    fn surrogate_pairs() {
        assert_eq!(parse(r#"["\ud83c"#), Some(json!([""])));
        assert_eq!(parse(r#"["\ud83c\u"#), Some(json!([""])));
        assert_eq!(parse(r#"["🏠 home"]"#), Some(json!(["🏠 home"])));
        assert!(parse_partial(r#"["\udfe0"]"#).is_err());
    }

    #[test]
    fn nested_partial_array_of_objects() {
        let value = parse(
            r#"{"answer_markdown": "Use 70%.", "assumptions": [{"text": "Cap rate 5.5%", "source": "industry"}, {"text": "NOI"#,
        );
        assert_eq!(
            value,
            Some(json!({
                "answer_markdown": "Use 70%.",
                "assumptions": [
                    {"text": "Cap rate 5.5%", "source": "industry"},
                    {"text": "NOI"}
                ]
            }))
        );
    }

    #[test]
    fn truncated_numbers_and_literals_are_dropped() {
        assert_eq!(parse(r#"{"n": 12"#), Some(json!({})));
        assert_eq!(parse(r#"{"n": 12,"#), Some(json!({"n": 12})));
        assert_eq!(parse(r#"{"c": nu"#), Some(json!({})));
        assert_eq!(parse(r#"{"c": null"#), Some(json!({"c": null})));
        assert_eq!(parse(r#"[true, fa"#), Some(json!([true])));
    }

    #[test]
    fn complete_document() {
        assert_eq!(
            parse(r#" {"answer_markdown": "done", "assumptions": []} "#),
            Some(json!({"answer_markdown": "done", "assumptions": []}))
        );
    }

    #[test]
    fn malformed_input_is_an_error() {
        assert!(parse_partial("Sure! Here is").is_err());
        assert!(parse_partial(r#"{"a": 1 "b"#).is_err());
        assert!(parse_partial(r#"{answer: 1}"#).is_err());
        assert!(parse_partial(r#"[1,]"#).is_err());
        assert!(parse_partial(r#"{"a": tru }"#).is_err());
    }

    #[test]
    fn trailing_text_after_document_is_an_error() {
        let err = parse_partial(r#"{"a": "b"} extra"#).unwrap_err();
        assert_eq!(err.offset, 11);
    }

    #[test]
    fn prefixes_only_append() {
        let doc = r#"{"answer_markdown": "Line one\nLine \"two\" café 🏠", "assumptions": []}"#;
        let mut previous = String::new();
        for end in (0..=doc.len()).filter(|i| doc.is_char_boundary(*i)) {
            let Some(value) = parse(&doc[..end]) else { continue };
            let text = value["answer_markdown"].as_str().unwrap_or("").to_string();
            assert!(
                text.starts_with(&previous),
                "prefix {end}: {text:?} does not extend {previous:?}"
            );
            previous = text;
        }
        assert_eq!(previous, "Line one\nLine \"two\" café 🏠");
    }
}
