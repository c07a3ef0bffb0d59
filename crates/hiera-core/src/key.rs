//! Dotted and quoted lookup keys
//!
//! A key like `users.'pete.smith'.uid` addresses a value nested inside the
//! answer for `users`. Segments are separated by `.`; a segment wrapped in
//! matching single or double quotes may contain dots.

use crate::error::{Error, Result};

/// Split a key into its segments.
///
/// A key wrapped entirely in matching quotes is a single segment and is not
/// split any further. The empty key yields one empty segment.
pub fn split_key(key: &str) -> Result<Vec<String>> {
    if key.is_empty() {
        return Ok(vec![String::new()]);
    }

    if let Some(whole) = fully_quoted(key) {
        return Ok(vec![whole.to_string()]);
    }

    KeyScanner::new(key).segments()
}

/// Returns the inner text of a key wrapped in one matching pair of quotes
fn fully_quoted(key: &str) -> Option<&str> {
    for quote in ['"', '\''] {
        if let Some(inner) = key
            .strip_prefix(quote)
            .and_then(|rest| rest.strip_suffix(quote))
        {
            if !inner.is_empty() && !inner.contains(quote) {
                return Some(inner);
            }
        }
    }
    None
}

struct KeyScanner<'a> {
    key: &'a str,
    pos: usize,
}

impl<'a> KeyScanner<'a> {
    fn new(key: &'a str) -> Self {
        Self { key, pos: 0 }
    }

    fn current(&self) -> Option<char> {
        self.key[self.pos..].chars().next()
    }

    fn advance(&mut self) {
        if let Some(c) = self.current() {
            self.pos += c.len_utf8();
        }
    }

    fn error(&self) -> Error {
        Error::key_syntax(self.key)
    }

    fn segments(mut self) -> Result<Vec<String>> {
        let mut segments = Vec::new();

        loop {
            let segment = match self.current() {
                Some(q @ ('"' | '\'')) => self.quoted(q)?,
                Some(_) => self.unquoted()?,
                // Trailing dot
                None => return Err(self.error()),
            };
            segments.push(segment);

            match self.current() {
                None => break,
                Some('.') => self.advance(),
                Some(_) => return Err(self.error()),
            }
        }

        Ok(segments)
    }

    fn quoted(&mut self, quote: char) -> Result<String> {
        self.advance();
        let start = self.pos;
        while let Some(c) = self.current() {
            if c == quote {
                let inner = &self.key[start..self.pos];
                self.advance();
                if inner.is_empty() {
                    return Err(self.error());
                }
                return Ok(inner.to_string());
            }
            self.advance();
        }
        // Unterminated quote
        Err(self.error())
    }

    fn unquoted(&mut self) -> Result<String> {
        let start = self.pos;
        while let Some(c) = self.current() {
            match c {
                '.' => break,
                '"' | '\'' => return Err(self.error()),
                _ => self.advance(),
            }
        }
        if self.pos == start {
            return Err(self.error());
        }
        Ok(self.key[start..self.pos].to_string())
    }
}
