//! Lexical analysis of assembly source.
//!
//! Splits source text into a stream of typed [`Token`]s, each carrying its
//! source location (1-based line and column, plus the byte offset into the
//! source). Whitespace and comments are dropped during the scan, so the
//! parser sees a noise-free stream.

use crate::arch::{RegisterAccess, RegisterSet};
use crate::errors::AsmError;

/// A position within the source text.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Location {
    /// 1-based line number.
    pub line: usize,
    /// 1-based column number.
    pub column: usize,
    /// Byte offset from the start of the source.
    pub offset: usize,
}

/// Categories of tokens the lexer produces.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TokenKind {
    /// `.function:`, `.label:`, `.end` (text includes the dot and colon).
    Directive,
    /// `[[name]]`; the token text is the inner name.
    Attribute,
    /// Mnemonics, label names, atom literals.
    Name,
    /// `%1`, `%2.l`, `*3.l`, `void`; pre-parsed into a register access.
    Register,
    /// Integer literal (decimal or 0x hex, optional leading minus).
    Integer,
    /// Float literal.
    Float,
    /// String literal; the token text is the decoded contents.
    String,
    /// `*` used as the repetition operator in label bodies.
    Star,
    /// `,`
    Comma,
}

/// One lexeme with its decoded text and source location.
#[derive(Clone, Debug)]
pub struct Token {
    pub kind: TokenKind,
    pub text: String,
    /// Register tokens carry their decoded access here.
    pub register: Option<RegisterAccess>,
    pub location: Location,
}

impl Token {
    fn new(kind: TokenKind, text: impl Into<String>, location: Location) -> Self {
        Self {
            kind,
            text: text.into(),
            register: None,
            location,
        }
    }
}

struct Scanner<'a> {
    source: &'a str,
    bytes: &'a [u8],
    pos: usize,
    line: usize,
    column: usize,
}

impl<'a> Scanner<'a> {
    fn new(source: &'a str) -> Self {
        Self {
            source,
            bytes: source.as_bytes(),
            pos: 0,
            line: 1,
            column: 1,
        }
    }

    fn location(&self) -> Location {
        Location {
            line: self.line,
            column: self.column,
            offset: self.pos,
        }
    }

    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn peek_at(&self, ahead: usize) -> Option<u8> {
        self.bytes.get(self.pos + ahead).copied()
    }

    fn advance(&mut self) -> Option<u8> {
        let b = self.peek()?;
        self.pos += 1;
        if b == b'\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(b)
    }

    fn skip_noise(&mut self) {
        while let Some(b) = self.peek() {
            match b {
                b' ' | b'\t' | b'\r' | b'\n' => {
                    self.advance();
                }
                b';' => {
                    while let Some(b) = self.peek() {
                        if b == b'\n' {
                            break;
                        }
                        self.advance();
                    }
                }
                _ => break,
            }
        }
    }

    fn take_while(&mut self, pred: impl Fn(u8) -> bool) -> &'a str {
        let start = self.pos;
        while let Some(b) = self.peek() {
            if !pred(b) {
                break;
            }
            self.advance();
        }
        &self.source[start..self.pos]
    }
}

fn is_name_start(b: u8) -> bool {
    b.is_ascii_alphabetic() || b == b'_'
}

fn is_name_continue(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_' || b == b'.'
}

fn is_digit_continue(b: u8) -> bool {
    b.is_ascii_hexdigit() || b == b'x' || b == b'X' || b == b'.'
}

/// Produces the token stream for a whole source text.
pub fn lex(source: &str) -> Result<Vec<Token>, AsmError> {
    let mut scanner = Scanner::new(source);
    let mut tokens = Vec::new();

    loop {
        scanner.skip_noise();
        let location = scanner.location();
        let Some(b) = scanner.peek() else {
            break;
        };

        match b {
            b',' => {
                scanner.advance();
                tokens.push(Token::new(TokenKind::Comma, ",", location));
            }
            b'.' => {
                scanner.advance();
                let word = scanner.take_while(|b| is_name_continue(b) || b == b':');
                tokens.push(Token::new(
                    TokenKind::Directive,
                    format!(".{word}"),
                    location,
                ));
            }
            b'[' if scanner.peek_at(1) == Some(b'[') => {
                scanner.advance();
                scanner.advance();
                let name = scanner.take_while(is_name_continue);
                if scanner.peek() != Some(b']') || scanner.peek_at(1) != Some(b']') {
                    return Err(AsmError::UnexpectedToken {
                        line: location.line,
                        column: location.column,
                        offset: location.offset,
                        expected: "]] closing an attribute",
                        actual: format!("[[{name}"),
                    });
                }
                scanner.advance();
                scanner.advance();
                tokens.push(Token::new(TokenKind::Attribute, name, location));
            }
            b'"' => {
                tokens.push(lex_string(&mut scanner, location)?);
            }
            b'%' => {
                scanner.advance();
                let body = scanner.take_while(|b| b.is_ascii_digit() || b == b'.' || b == b'l' || b == b'a' || b == b'p');
                tokens.push(register_token(body, true, location)?);
            }
            b'*' => {
                // `*3.l` is an indirect register access; a bare `*` is the
                // repetition operator of string label bodies.
                if scanner.peek_at(1).is_some_and(|n| n.is_ascii_digit()) {
                    let mark = (scanner.pos, scanner.line, scanner.column);
                    scanner.advance();
                    let body = scanner.take_while(|b| {
                        b.is_ascii_digit() || b == b'.' || b == b'l' || b == b'a' || b == b'p'
                    });
                    if body.contains('.') {
                        tokens.push(register_token(body, false, location)?);
                    } else {
                        // No set suffix: back out and emit a Star, leaving
                        // the digits to be lexed as an integer.
                        (scanner.pos, scanner.line, scanner.column) = mark;
                        scanner.advance();
                        tokens.push(Token::new(TokenKind::Star, "*", location));
                    }
                } else {
                    scanner.advance();
                    tokens.push(Token::new(TokenKind::Star, "*", location));
                }
            }
            b'-' => {
                scanner.advance();
                let body = scanner.take_while(is_digit_continue);
                tokens.push(number_token(&format!("-{body}"), location)?);
            }
            b if b.is_ascii_digit() => {
                let body = scanner.take_while(is_digit_continue);
                tokens.push(number_token(body, location)?);
            }
            b if is_name_start(b) => {
                let word = scanner.take_while(is_name_continue);
                if word == "void" {
                    let mut token = Token::new(TokenKind::Register, word, location);
                    token.register = Some(RegisterAccess::void());
                    tokens.push(token);
                } else {
                    tokens.push(Token::new(TokenKind::Name, word, location));
                }
            }
            other => {
                return Err(AsmError::IllegalCharacter {
                    line: location.line,
                    column: location.column,
                    offset: location.offset,
                    character: other as char,
                });
            }
        }
    }

    Ok(tokens)
}

/// Lexes a string literal, decoding escapes into the token text.
fn lex_string(scanner: &mut Scanner, location: Location) -> Result<Token, AsmError> {
    scanner.advance(); // opening quote
    let mut decoded = String::new();

    loop {
        let Some(b) = scanner.peek() else {
            return Err(AsmError::UnterminatedString {
                line: location.line,
                column: location.column,
                offset: location.offset,
            });
        };
        match b {
            b'"' => {
                scanner.advance();
                return Ok(Token::new(TokenKind::String, decoded, location));
            }
            b'\n' => {
                return Err(AsmError::UnterminatedString {
                    line: location.line,
                    column: location.column,
                    offset: location.offset,
                });
            }
            b'\\' => {
                scanner.advance();
                let escape = scanner.advance().ok_or(AsmError::UnterminatedString {
                    line: location.line,
                    column: location.column,
                    offset: location.offset,
                })?;
                decoded.push(match escape {
                    b'n' => '\n',
                    b't' => '\t',
                    b'r' => '\r',
                    b'0' => '\0',
                    b'\\' => '\\',
                    b'"' => '"',
                    other => {
                        return Err(AsmError::UnexpectedToken {
                            line: location.line,
                            column: location.column,
                            offset: location.offset,
                            expected: "a string escape (\\n, \\t, \\r, \\0, \\\\, \\\")",
                            actual: format!("\\{}", other as char),
                        });
                    }
                });
            }
            _ => {
                let start = scanner.pos;
                scanner.advance();
                // Multi-byte UTF-8 sequences pass through undecoded.
                while scanner
                    .peek()
                    .is_some_and(|b| b >= 0x80)
                {
                    scanner.advance();
                }
                decoded.push_str(&scanner.source[start..scanner.pos]);
            }
        }
    }
}

/// Builds a register token from the body after `%` or `*`.
fn register_token(body: &str, direct: bool, location: Location) -> Result<Token, AsmError> {
    let bad = |actual: String| AsmError::UnexpectedToken {
        line: location.line,
        column: location.column,
        offset: location.offset,
        expected: "a register access like %1, %2.l, or *3.l",
        actual,
    };

    let (index_text, set) = match body.split_once('.') {
        None => (body, RegisterSet::Local),
        Some((index, "l")) => (index, RegisterSet::Local),
        Some((index, "a")) => (index, RegisterSet::Argument),
        Some((index, "p")) => (index, RegisterSet::Parameter),
        Some(_) => return Err(bad(body.to_string())),
    };

    let index: u8 = index_text.parse().map_err(|_| bad(body.to_string()))?;

    let sigil = if direct { '%' } else { '*' };
    let mut token = Token::new(TokenKind::Register, format!("{sigil}{body}"), location);
    token.register = Some(RegisterAccess {
        set,
        direct,
        index,
    });
    Ok(token)
}

/// Builds an integer or float token, validating the literal.
fn number_token(text: &str, location: Location) -> Result<Token, AsmError> {
    let bad = || AsmError::UnexpectedToken {
        line: location.line,
        column: location.column,
        offset: location.offset,
        expected: "an integer or float literal",
        actual: text.to_string(),
    };

    let unsigned = text.strip_prefix('-').unwrap_or(text);
    if let Some(hex) = unsigned
        .strip_prefix("0x")
        .or_else(|| unsigned.strip_prefix("0X"))
    {
        u64::from_str_radix(hex, 16).map_err(|_| bad())?;
        return Ok(Token::new(TokenKind::Integer, text, location));
    }

    if unsigned.contains('.') {
        unsigned.parse::<f64>().map_err(|_| bad())?;
        return Ok(Token::new(TokenKind::Float, text, location));
    }

    unsigned.parse::<u64>().map_err(|_| bad())?;
    Ok(Token::new(TokenKind::Integer, text, location))
}

/// Parses the raw bits of an integer token's text.
///
/// Negative literals are parsed as i64 and reinterpreted; hex and large
/// decimal literals are parsed as u64.
pub fn integer_bits(text: &str) -> Option<(u64, bool)> {
    let negative = text.starts_with('-');
    let unsigned = text.strip_prefix('-').unwrap_or(text);

    let magnitude = if let Some(hex) = unsigned
        .strip_prefix("0x")
        .or_else(|| unsigned.strip_prefix("0X"))
    {
        u64::from_str_radix(hex, 16).ok()?
    } else {
        unsigned.parse::<u64>().ok()?
    };

    let bits = if negative {
        (magnitude as i64).wrapping_neg() as u64
    } else {
        magnitude
    };
    Some((bits, negative))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<TokenKind> {
        lex(source).unwrap().into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn lex_empty_source() {
        assert!(lex("").unwrap().is_empty());
        assert!(lex("  \n\t ; only a comment\n").unwrap().is_empty());
    }

    #[test]
    fn lex_instruction_line() {
        let tokens = lex("addi %1, void, 7").unwrap();
        assert_eq!(
            tokens.iter().map(|t| t.kind).collect::<Vec<_>>(),
            vec![
                TokenKind::Name,
                TokenKind::Register,
                TokenKind::Comma,
                TokenKind::Register,
                TokenKind::Comma,
                TokenKind::Integer,
            ]
        );
        assert_eq!(tokens[0].text, "addi");
        assert_eq!(tokens[1].register, Some(RegisterAccess::local(1)));
        assert_eq!(tokens[3].register, Some(RegisterAccess::void()));
    }

    #[test]
    fn lex_register_sets() {
        let tokens = lex("%1.l %2.a %3.p").unwrap();
        assert_eq!(tokens[0].register.unwrap().set, RegisterSet::Local);
        assert_eq!(tokens[1].register.unwrap().set, RegisterSet::Argument);
        assert_eq!(tokens[2].register.unwrap().set, RegisterSet::Parameter);
        assert!(tokens.iter().all(|t| t.register.unwrap().direct));
    }

    #[test]
    fn lex_indirect_register() {
        let tokens = lex("*3.l").unwrap();
        let access = tokens[0].register.unwrap();
        assert!(!access.direct);
        assert_eq!(access.index, 3);
    }

    #[test]
    fn lex_star_repetition() {
        // A star without a set suffix is the repetition operator.
        assert_eq!(
            kinds("\"hi\" * 3"),
            vec![TokenKind::String, TokenKind::Star, TokenKind::Integer]
        );
        assert_eq!(
            kinds("\"hi\" *3"),
            vec![TokenKind::String, TokenKind::Star, TokenKind::Integer]
        );
    }

    #[test]
    fn lex_directives_and_attributes() {
        let tokens = lex(".function: [[entry_point]] main\n.end").unwrap();
        assert_eq!(tokens[0].kind, TokenKind::Directive);
        assert_eq!(tokens[0].text, ".function:");
        assert_eq!(tokens[1].kind, TokenKind::Attribute);
        assert_eq!(tokens[1].text, "entry_point");
        assert_eq!(tokens[2].kind, TokenKind::Name);
        assert_eq!(tokens[3].text, ".end");
    }

    #[test]
    fn lex_string_escapes() {
        let tokens = lex(r#""a\nb\t\"c\\""#).unwrap();
        assert_eq!(tokens[0].text, "a\nb\t\"c\\");
    }

    #[test]
    fn lex_unterminated_string() {
        assert!(matches!(
            lex("\"oops"),
            Err(AsmError::UnterminatedString { line: 1, .. })
        ));
        assert!(matches!(
            lex("\"oops\nmore"),
            Err(AsmError::UnterminatedString { .. })
        ));
    }

    #[test]
    fn lex_numbers() {
        let tokens = lex("42 -1 0xdeadbeefdeadbeef 3.14").unwrap();
        assert_eq!(tokens[0].kind, TokenKind::Integer);
        assert_eq!(tokens[1].kind, TokenKind::Integer);
        assert_eq!(tokens[2].kind, TokenKind::Integer);
        assert_eq!(tokens[3].kind, TokenKind::Float);
    }

    #[test]
    fn lex_illegal_character() {
        assert!(matches!(
            lex("addi @1"),
            Err(AsmError::IllegalCharacter { character: '@', .. })
        ));
    }

    #[test]
    fn locations_track_lines_and_columns() {
        let tokens = lex("noop\n  halt").unwrap();
        assert_eq!(tokens[0].location, Location { line: 1, column: 1, offset: 0 });
        assert_eq!(
            tokens[1].location,
            Location {
                line: 2,
                column: 3,
                offset: 7
            }
        );
    }

    #[test]
    fn integer_bits_parses_all_forms() {
        assert_eq!(integer_bits("42"), Some((42, false)));
        assert_eq!(integer_bits("-1"), Some((u64::MAX, true)));
        assert_eq!(
            integer_bits("0xdeadbeefdeadbeef"),
            Some((0xdead_beef_dead_beef, false))
        );
        assert_eq!(integer_bits("fish"), None);
    }

    #[test]
    fn greedy_mnemonic_is_one_name() {
        let tokens = lex("g.addiu %1, void, 1").unwrap();
        assert_eq!(tokens[0].kind, TokenKind::Name);
        assert_eq!(tokens[0].text, "g.addiu");
    }
}
