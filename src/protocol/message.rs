//! Protocol message types
//!
//! Defines the word-list message and its line tokeniser/packer.

use std::fmt;

use thiserror::Error;

/// Read a resource: `read TAG PATH`
pub const READ: &str = "read";
/// Write a resource: `write TAG PATH VALUE`
pub const WRITE: &str = "write";
/// Delete a resource: `delete TAG PATH`
pub const DELETE: &str = "delete";
/// End the session: `quit`
pub const QUIT: &str = "quit";

/// Acknowledgement: `ACK OK|FAIL REASON WORDS...`
pub const ACK: &str = "ACK";
/// One flattened resource: `RES TAG PATH KIND VALUE`
pub const RES: &str = "RES";

/// Tag carried by resources pushed to every client rather than a requester.
pub const BROADCAST_TAG: &str = "!";

/// Error tokenising a single line
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("unterminated {0} quote")]
    UnterminatedQuote(char),

    #[error("escape at end of line")]
    DanglingEscape,

    #[error("line is not valid UTF-8")]
    InvalidUtf8,
}

/// Outcome reported in an `ACK`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckStatus {
    Ok,
    Fail,
}

impl AckStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            AckStatus::Ok => "OK",
            AckStatus::Fail => "FAIL",
        }
    }
}

impl fmt::Display for AckStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A command or response word followed by its arguments
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    word: String,
    args: Vec<String>,
}

impl Message {
    pub fn new(word: impl Into<String>) -> Self {
        Self {
            word: word.into(),
            args: Vec::new(),
        }
    }

    /// Append one argument
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Append several arguments in order
    pub fn args_from<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn word(&self) -> &str {
        &self.word
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// The word followed by every argument
    pub fn words(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.word.as_str()).chain(self.args.iter().map(String::as_str))
    }

    /// Build an acknowledgement echoing the request it answers
    pub fn ack(status: AckStatus, reason: impl Into<String>, request: &Message) -> Self {
        Message::new(ACK)
            .arg(status.as_str())
            .arg(reason)
            .args_from(request.words())
    }

    /// Parse one line (without its terminator).
    ///
    /// Returns `Ok(None)` for a line containing no words.
    pub fn parse(line: &str) -> Result<Option<Self>, ParseError> {
        let mut words = tokenise(line)?.into_iter();
        Ok(words.next().map(|word| Message {
            word,
            args: words.collect(),
        }))
    }

    /// Pack into a line, without the terminator
    pub fn pack(&self) -> String {
        let mut line = String::new();
        for (i, word) in self.words().enumerate() {
            if i > 0 {
                line.push(' ');
            }
            push_quoted(&mut line, word);
        }
        line
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.pack())
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Quote {
    None,
    Single,
    Double,
}

/// Split a line into words.
///
/// Single quotes are literal, double quotes honour `\` escapes, and a bare
/// `\` escapes the next character.
fn tokenise(line: &str) -> Result<Vec<String>, ParseError> {
    let mut words = Vec::new();
    let mut word = String::new();
    let mut in_word = false;
    let mut quote = Quote::None;
    let mut chars = line.chars();

    while let Some(c) = chars.next() {
        match quote {
            Quote::Single => match c {
                '\'' => quote = Quote::None,
                _ => word.push(c),
            },
            Quote::Double => match c {
                '"' => quote = Quote::None,
                '\\' => word.push(chars.next().ok_or(ParseError::DanglingEscape)?),
                _ => word.push(c),
            },
            Quote::None => match c {
                c if c.is_ascii_whitespace() => {
                    if in_word {
                        words.push(std::mem::take(&mut word));
                        in_word = false;
                    }
                }
                '\'' => {
                    quote = Quote::Single;
                    in_word = true;
                }
                '"' => {
                    quote = Quote::Double;
                    in_word = true;
                }
                '\\' => {
                    word.push(chars.next().ok_or(ParseError::DanglingEscape)?);
                    in_word = true;
                }
                _ => {
                    word.push(c);
                    in_word = true;
                }
            },
        }
    }

    match quote {
        Quote::Single => return Err(ParseError::UnterminatedQuote('\'')),
        Quote::Double => return Err(ParseError::UnterminatedQuote('"')),
        Quote::None => {}
    }
    if in_word {
        words.push(word);
    }
    Ok(words)
}

fn needs_quoting(word: &str) -> bool {
    word.is_empty()
        || word
            .chars()
            .any(|c| c.is_ascii_whitespace() || matches!(c, '\'' | '"' | '\\'))
}

fn push_quoted(line: &mut String, word: &str) {
    if !needs_quoting(word) {
        line.push_str(word);
        return;
    }
    line.push('\'');
    for c in word.chars() {
        if c == '\'' {
            // close, escaped quote, reopen
            line.push_str(r"'\''");
        } else {
            line.push(c);
        }
    }
    line.push('\'');
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_plain_words() {
        let msg = Message::parse("read T1 /tracks/42").unwrap().unwrap();
        assert_eq!(msg.word(), "read");
        assert_eq!(msg.args(), &["T1".to_string(), "/tracks/42".to_string()]);
    }

    #[test]
    fn test_parse_blank_line() {
        assert_eq!(Message::parse("").unwrap(), None);
        assert_eq!(Message::parse("   \t ").unwrap(), None);
    }

    #[test]
    fn test_parse_quotes_and_escapes() {
        let msg = Message::parse(r#"write T2 /a 'two words' "say \"hi\"" back\ slash"#)
            .unwrap()
            .unwrap();
        assert_eq!(
            msg.args(),
            &[
                "T2".to_string(),
                "/a".to_string(),
                "two words".to_string(),
                "say \"hi\"".to_string(),
                "back slash".to_string(),
            ]
        );
    }

    #[test]
    fn test_parse_empty_quoted_word() {
        let msg = Message::parse("write T '' x").unwrap().unwrap();
        assert_eq!(msg.args(), &["T".to_string(), String::new(), "x".to_string()]);
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!(
            Message::parse("read 'T1").unwrap_err(),
            ParseError::UnterminatedQuote('\'')
        );
        assert_eq!(
            Message::parse("read \"T1").unwrap_err(),
            ParseError::UnterminatedQuote('"')
        );
        assert_eq!(Message::parse("read T1\\").unwrap_err(), ParseError::DanglingEscape);
    }

    #[test]
    fn test_pack_quotes_when_needed() {
        let msg = Message::new(RES)
            .arg("T1")
            .arg("/tracks/42/title")
            .arg("entry")
            .arg("It's Here");
        assert_eq!(msg.pack(), r"RES T1 /tracks/42/title entry 'It'\''s Here'");
        assert_eq!(Message::parse(&msg.pack()).unwrap().unwrap(), msg);
    }

    #[test]
    fn test_ack_echoes_request() {
        let request = Message::new(READ).arg("T1").arg("/tracks/42");
        let ack = Message::ack(AckStatus::Ok, "Success", &request);
        assert_eq!(ack.pack(), "ACK OK Success read T1 /tracks/42");
    }
}
