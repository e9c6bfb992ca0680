//! SMTP reply parsing.

use crate::error::{ClientError, Result};

/// One line of a (possibly multi-line) reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseLine {
    pub code: u16,
    /// `false` for `250-...` continuation lines
    pub is_last: bool,
    pub message: String,
}

/// A complete reply: one code and every line of text that came with it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub code: u16,
    pub lines: Vec<String>,
}

impl Response {
    #[must_use]
    pub const fn new(code: u16, lines: Vec<String>) -> Self {
        Self { code, lines }
    }

    /// All reply text joined with newlines
    #[must_use]
    pub fn message(&self) -> String {
        self.lines.join("\n")
    }

    /// 2xx
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.code >= 200 && self.code < 300
    }

    /// 3xx, e.g. `354` after DATA or `334` during AUTH
    #[must_use]
    pub const fn is_intermediate(&self) -> bool {
        self.code >= 300 && self.code < 400
    }

    /// Whether the server advertised `keyword` in an EHLO reply
    #[must_use]
    pub fn advertises(&self, keyword: &str) -> bool {
        self.lines.iter().skip(1).any(|line| {
            line.split_whitespace()
                .next()
                .is_some_and(|word| word.eq_ignore_ascii_case(keyword))
        })
    }

    /// Parse a single reply line (without its line terminator)
    ///
    /// # Errors
    /// If the line does not start with a three digit code followed by
    /// nothing, a space or a dash.
    pub fn parse_line(line: &str) -> Result<ResponseLine> {
        let Some(code) = line.get(..3) else {
            return Err(ClientError::ParseError(format!(
                "Response line too short: '{line}'"
            )));
        };

        let code = code
            .parse::<u16>()
            .map_err(|_| ClientError::ParseError(format!("Invalid status code: '{code}'")))?;

        let rest = &line[3..];
        let is_last = match rest.chars().next() {
            None | Some(' ') => true,
            Some('-') => false,
            Some(c) => {
                return Err(ClientError::ParseError(format!(
                    "Invalid separator character: '{c}'"
                )));
            }
        };

        Ok(ResponseLine {
            code,
            is_last,
            message: rest.get(1..).unwrap_or_default().to_string(),
        })
    }

    /// Parse one complete reply from the front of `buffer`
    ///
    /// Returns the reply and how many bytes it used, or `None` if the buffer
    /// does not yet hold a full reply.
    ///
    /// # Errors
    /// If a line is malformed or the lines of a multi-line reply disagree on
    /// the code.
    pub fn parse_response(buffer: &[u8]) -> Result<Option<(Self, usize)>> {
        let mut consumed = 0;
        let mut code = None;
        let mut lines = Vec::new();

        while let Some(end) = buffer[consumed..].iter().position(|&b| b == b'\n') {
            let raw = &buffer[consumed..consumed + end];
            consumed += end + 1;

            let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
            if raw.is_empty() {
                continue;
            }

            let line = Self::parse_line(std::str::from_utf8(raw)?)?;
            match code {
                Some(expected) if expected != line.code => {
                    return Err(ClientError::ParseError(format!(
                        "Status code mismatch in multi-line response: expected {expected}, got {}",
                        line.code
                    )));
                }
                _ => code = Some(line.code),
            }

            lines.push(line.message);

            if line.is_last {
                return Ok(code.map(|code| (Self::new(code, lines), consumed)));
            }
        }

        Ok(None)
    }
}
