/*
 * token.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! Tokenizer for template script code.

use std::fmt;

/// A script token.
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Ident(String),
    Number(f64),
    Str(String),
    Punct(&'static str),
    /// A non-statement template segment spliced into the statement stream.
    /// The index refers to the code generator's table of prepared segments.
    Segment(usize),
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Ident(name) => write!(f, "{name}"),
            Token::Number(n) => write!(f, "{n}"),
            Token::Str(s) => write!(f, "{s:?}"),
            Token::Punct(p) => write!(f, "{p}"),
            Token::Segment(_) => write!(f, "template text"),
        }
    }
}

/// A token with the source line it starts on.
#[derive(Debug, Clone, PartialEq)]
pub struct Spanned {
    pub token: Token,
    pub line: usize,
}

/// A tokenizer failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LexError {
    pub message: String,
    pub line: usize,
}

// Longest first, so that prefixes never shadow longer operators.
const PUNCTUATORS: &[&str] = &[
    "===", "!==", "=>", "==", "!=", "<=", ">=", "&&", "||", "++", "--", "+=", "-=", "*=", "/=",
    "(", ")", "{", "}", "[", "]", ",", ";", ".", "?", ":", "=", "<", ">", "+", "-", "*", "/", "%",
    "!",
];

/// Tokenize `code`, numbering lines from `first_line`.
pub fn tokenize(code: &str, first_line: usize) -> Result<Vec<Spanned>, LexError> {
    let mut tokens = Vec::new();
    let mut line = first_line;
    let mut rest = code;

    while let Some(c) = rest.chars().next() {
        if c == '\n' {
            line += 1;
            rest = &rest[1..];
            continue;
        }
        if c.is_whitespace() {
            rest = &rest[c.len_utf8()..];
            continue;
        }

        // Comments
        if rest.starts_with("//") {
            let end = rest.find('\n').unwrap_or(rest.len());
            rest = &rest[end..];
            continue;
        }
        if let Some(body) = rest.strip_prefix("/*") {
            let end = body.find("*/").ok_or_else(|| LexError {
                message: "Unterminated comment".to_string(),
                line,
            })?;
            line += body[..end].matches('\n').count();
            rest = &body[end + 2..];
            continue;
        }

        let start_line = line;
        let token = if c == '"' || c == '\'' || c == '`' {
            let (value, consumed, newlines) = lex_string(rest, c).ok_or_else(|| LexError {
                message: "Invalid or unexpected token".to_string(),
                line,
            })?;
            rest = &rest[consumed..];
            line += newlines;
            Token::Str(value)
        } else if c.is_ascii_digit()
            || (c == '.' && rest[1..].starts_with(|n: char| n.is_ascii_digit()))
        {
            let (value, consumed) = lex_number(rest).ok_or_else(|| LexError {
                message: "Invalid or unexpected token".to_string(),
                line,
            })?;
            rest = &rest[consumed..];
            Token::Number(value)
        } else if is_ident_start(c) {
            let end = rest
                .find(|ch: char| !is_ident_part(ch))
                .unwrap_or(rest.len());
            let ident = &rest[..end];
            rest = &rest[end..];
            Token::Ident(ident.to_string())
        } else if let Some(p) = PUNCTUATORS.iter().find(|p| rest.starts_with(**p)) {
            rest = &rest[p.len()..];
            Token::Punct(p)
        } else {
            return Err(LexError {
                message: format!("Invalid or unexpected token '{c}'"),
                line,
            });
        };

        tokens.push(Spanned {
            token,
            line: start_line,
        });
    }

    Ok(tokens)
}

fn is_ident_start(c: char) -> bool {
    c.is_alphabetic() || c == '_' || c == '$'
}

fn is_ident_part(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '$'
}

/// Returns the decoded string, the bytes consumed and the newlines crossed.
fn lex_string(text: &str, quote: char) -> Option<(String, usize, usize)> {
    let mut value = String::new();
    let mut newlines = 0;
    let mut chars = text.char_indices().skip(1);
    while let Some((i, c)) = chars.next() {
        match c {
            c if c == quote => return Some((value, i + 1, newlines)),
            '\n' if quote != '`' => return None,
            '\n' => {
                newlines += 1;
                value.push('\n');
            }
            '\\' => {
                let (_, escaped) = chars.next()?;
                match escaped {
                    'n' => value.push('\n'),
                    't' => value.push('\t'),
                    'r' => value.push('\r'),
                    'b' => value.push('\u{8}'),
                    'f' => value.push('\u{c}'),
                    'v' => value.push('\u{b}'),
                    '0' => value.push('\0'),
                    'u' => {
                        let mut code = String::new();
                        for _ in 0..4 {
                            code.push(chars.next()?.1);
                        }
                        let code = u32::from_str_radix(&code, 16).ok()?;
                        value.push(char::from_u32(code).unwrap_or('\u{fffd}'));
                    }
                    '\n' => newlines += 1,
                    other => value.push(other),
                }
            }
            c => value.push(c),
        }
    }
    None
}

/// Returns the number and the bytes consumed.
fn lex_number(text: &str) -> Option<(f64, usize)> {
    if let Some(hex) = text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        let end = hex
            .find(|c: char| !c.is_ascii_hexdigit())
            .unwrap_or(hex.len());
        let value = u64::from_str_radix(&hex[..end], 16).ok()?;
        return Some((value as f64, end + 2));
    }

    let bytes = text.as_bytes();
    let mut end = 0;
    let digits = |end: &mut usize| {
        while *end < bytes.len() && bytes[*end].is_ascii_digit() {
            *end += 1;
        }
    };
    digits(&mut end);
    // `items[0].name`: a dot not followed by a digit is member access.
    if end + 1 < bytes.len() && bytes[end] == b'.' && bytes[end + 1].is_ascii_digit() {
        end += 1;
        digits(&mut end);
    }
    if end < bytes.len() && (bytes[end] == b'e' || bytes[end] == b'E') {
        let mut exp = end + 1;
        if exp < bytes.len() && (bytes[exp] == b'+' || bytes[exp] == b'-') {
            exp += 1;
        }
        if exp < bytes.len() && bytes[exp].is_ascii_digit() {
            end = exp;
            digits(&mut end);
        }
    }
    if end < bytes.len() && is_ident_start(bytes[end] as char) {
        return None;
    }
    text[..end].parse().ok().map(|value| (value, end))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn tokens(code: &str) -> Vec<Token> {
        tokenize(code, 1)
            .unwrap()
            .into_iter()
            .map(|t| t.token)
            .collect()
    }

    #[test]
    fn test_basic_tokens() {
        assert_eq!(
            tokens("if (user.age >= 18) { x += 1; }"),
            vec![
                Token::Ident("if".into()),
                Token::Punct("("),
                Token::Ident("user".into()),
                Token::Punct("."),
                Token::Ident("age".into()),
                Token::Punct(">="),
                Token::Number(18.0),
                Token::Punct(")"),
                Token::Punct("{"),
                Token::Ident("x".into()),
                Token::Punct("+="),
                Token::Number(1.0),
                Token::Punct(";"),
                Token::Punct("}"),
            ]
        );
    }

    #[test]
    fn test_strings() {
        assert_eq!(
            tokens(r#"'it\'s' "a\"b" "A\n""#),
            vec![
                Token::Str("it's".into()),
                Token::Str("a\"b".into()),
                Token::Str("A\n".into()),
            ]
        );
        assert!(tokenize("'open", 1).is_err());
    }

    #[test]
    fn test_numbers() {
        assert_eq!(
            tokens("3 2.5 .5 1e3 0x1F"),
            vec![
                Token::Number(3.0),
                Token::Number(2.5),
                Token::Number(0.5),
                Token::Number(1000.0),
                Token::Number(31.0),
            ]
        );
        assert!(tokenize("3abc", 1).is_err());
    }

    #[test]
    fn test_comments_and_lines() {
        let spanned = tokenize("a // one\n/* two\nthree */ b\nc", 4).unwrap();
        let lines: Vec<(Token, usize)> = spanned.into_iter().map(|t| (t.token, t.line)).collect();
        assert_eq!(
            lines,
            vec![
                (Token::Ident("a".into()), 4),
                (Token::Ident("b".into()), 6),
                (Token::Ident("c".into()), 7),
            ]
        );
    }

    #[test]
    fn test_invalid_character() {
        let err = tokenize("a # b", 2).unwrap_err();
        assert_eq!(err.line, 2);
    }
}
