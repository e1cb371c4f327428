//! `WWW-Authenticate` parsing.
//!
//! A header value may carry several challenges, each a scheme followed by
//! comma-separated `name=value` parameters where values are tokens or quoted
//! strings. A new challenge starts at a token that is not followed by `=`.

use tracing::debug;

use super::digest::DigestChallenge;

/// One challenge offered by a server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Challenge {
    Basic { realm: Option<String> },
    Digest(DigestChallenge),
    /// A scheme this client cannot answer, or a Digest challenge it cannot satisfy.
    Other { scheme: String },
}

/// Parse every challenge in one `WWW-Authenticate` header value.
pub fn parse_challenges(value: &str) -> Vec<Challenge> {
    let mut cursor = Cursor::new(value);
    let mut challenges = Vec::new();

    loop {
        cursor.skip_separators();
        let Some(scheme) = cursor.token() else {
            break;
        };
        let params = cursor.params();
        challenges.push(build(scheme, &params));
    }
    challenges
}

fn build(scheme: &str, params: &[(String, String)]) -> Challenge {
    if scheme.eq_ignore_ascii_case("basic") {
        return Challenge::Basic {
            realm: param(params, "realm").map(str::to_string),
        };
    }
    if scheme.eq_ignore_ascii_case("digest") {
        return match DigestChallenge::from_params(params) {
            Ok(challenge) => Challenge::Digest(challenge),
            Err(reason) => {
                debug!(%reason, "ignoring digest challenge");
                Challenge::Other {
                    scheme: scheme.to_string(),
                }
            }
        };
    }
    Challenge::Other {
        scheme: scheme.to_string(),
    }
}

/// Case-insensitive parameter lookup.
pub(crate) fn param<'a>(params: &'a [(String, String)], name: &str) -> Option<&'a str> {
    params
        .iter()
        .find(|(n, _)| n.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}

struct Cursor<'a> {
    input: &'a str,
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(input: &'a str) -> Self {
        Self { input, pos: 0 }
    }

    fn peek(&self) -> Option<u8> {
        self.input.as_bytes().get(self.pos).copied()
    }

    fn skip_whitespace(&mut self) {
        while matches!(self.peek(), Some(b' ' | b'\t')) {
            self.pos += 1;
        }
    }

    fn skip_separators(&mut self) {
        while matches!(self.peek(), Some(b' ' | b'\t' | b',')) {
            self.pos += 1;
        }
    }

    fn token(&mut self) -> Option<&'a str> {
        let start = self.pos;
        while let Some(b) = self.peek() {
            if matches!(b, b' ' | b'\t' | b',' | b'=' | b'"') {
                break;
            }
            self.pos += 1;
        }
        (self.pos > start).then(|| &self.input[start..self.pos])
    }

    /// Parameters up to the start of the next challenge or the end of input.
    fn params(&mut self) -> Vec<(String, String)> {
        let mut params = Vec::new();
        loop {
            let checkpoint = self.pos;
            self.skip_separators();
            let Some(name) = self.token() else {
                break;
            };
            self.skip_whitespace();
            if self.peek() != Some(b'=') {
                // A bare token is the next scheme.
                self.pos = checkpoint;
                break;
            }
            self.pos += 1;
            self.skip_whitespace();
            let value = if self.peek() == Some(b'"') {
                self.quoted()
            } else {
                self.token().unwrap_or_default().to_string()
            };
            params.push((name.to_ascii_lowercase(), value));
        }
        params
    }

    fn quoted(&mut self) -> String {
        // Opening quote.
        self.pos += 1;
        let mut value = String::new();
        let mut chars = self.input[self.pos..].char_indices();
        while let Some((offset, c)) = chars.next() {
            match c {
                '"' => {
                    self.pos += offset + 1;
                    return value;
                }
                '\\' => {
                    if let Some((_, escaped)) = chars.next() {
                        value.push(escaped);
                    }
                }
                _ => value.push(c),
            }
        }
        // Unterminated: take the rest.
        self.pos = self.input.len();
        value
    }
}
