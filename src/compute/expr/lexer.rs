//! Tokenizer for custom formulas.

use crate::compute::ledger::ComputationError;

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Number(f64),
    Str(String),
    Ident(String),
    LParen,
    RParen,
    LBracket,
    RBracket,
    Comma,
    Dot,
    Question,
    Colon,
    Semicolon,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Bang,
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
    StrictEq,
    StrictNe,
    And,
    Or,
}

/// A token and the byte offset it starts at.
#[derive(Debug, Clone, PartialEq)]
pub struct Spanned {
    pub token: Token,
    pub offset: usize,
}

fn error(offset: usize, message: impl Into<String>) -> ComputationError {
    ComputationError::Parse { offset, message: message.into() }
}

pub fn tokenize(src: &str) -> Result<Vec<Spanned>, ComputationError> {
    let bytes = src.as_bytes();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        let c = bytes[i];
        let start = i;

        if c.is_ascii_whitespace() {
            i += 1;
            continue;
        }

        // Comments
        if c == b'/' && bytes.get(i + 1) == Some(&b'/') {
            while i < bytes.len() && bytes[i] != b'\n' {
                i += 1;
            }
            continue;
        }
        if c == b'/' && bytes.get(i + 1) == Some(&b'*') {
            match src[i + 2..].find("*/") {
                Some(end) => i += end + 4,
                None => return Err(error(start, "unterminated comment")),
            }
            continue;
        }

        if c.is_ascii_digit() || (c == b'.' && bytes.get(i + 1).is_some_and(u8::is_ascii_digit)) {
            i = scan_number(bytes, i);
            let text = &src[start..i];
            let n = text.parse::<f64>().map_err(|_| error(start, format!("invalid number '{}'", text)))?;
            tokens.push(Spanned { token: Token::Number(n), offset: start });
            continue;
        }

        if c.is_ascii_alphabetic() || c == b'_' || c == b'$' {
            while i < bytes.len() && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'_' || bytes[i] == b'$') {
                i += 1;
            }
            tokens.push(Spanned { token: Token::Ident(src[start..i].to_string()), offset: start });
            continue;
        }

        if c == b'"' || c == b'\'' {
            let (s, next) = scan_string(src, i)?;
            tokens.push(Spanned { token: Token::Str(s), offset: start });
            i = next;
            continue;
        }

        let rest = &src[i..];
        let (token, len) = if rest.starts_with("===") {
            (Token::StrictEq, 3)
        } else if rest.starts_with("!==") {
            (Token::StrictNe, 3)
        } else if rest.starts_with("==") {
            (Token::Eq, 2)
        } else if rest.starts_with("!=") {
            (Token::Ne, 2)
        } else if rest.starts_with("<=") {
            (Token::Le, 2)
        } else if rest.starts_with(">=") {
            (Token::Ge, 2)
        } else if rest.starts_with("&&") {
            (Token::And, 2)
        } else if rest.starts_with("||") {
            (Token::Or, 2)
        } else {
            let single = match c {
                b'(' => Token::LParen,
                b')' => Token::RParen,
                b'[' => Token::LBracket,
                b']' => Token::RBracket,
                b',' => Token::Comma,
                b'.' => Token::Dot,
                b'?' => Token::Question,
                b':' => Token::Colon,
                b';' => Token::Semicolon,
                b'+' => Token::Plus,
                b'-' => Token::Minus,
                b'*' => Token::Star,
                b'/' => Token::Slash,
                b'%' => Token::Percent,
                b'!' => Token::Bang,
                b'<' => Token::Lt,
                b'>' => Token::Gt,
                _ => {
                    let ch = rest.chars().next().unwrap_or('?');
                    return Err(error(start, format!("unexpected character '{}'", ch)));
                }
            };
            (single, 1)
        };
        tokens.push(Spanned { token, offset: start });
        i += len;
    }

    Ok(tokens)
}

fn scan_number(bytes: &[u8], mut i: usize) -> usize {
    while i < bytes.len() && bytes[i].is_ascii_digit() {
        i += 1;
    }
    if i < bytes.len() && bytes[i] == b'.' {
        i += 1;
        while i < bytes.len() && bytes[i].is_ascii_digit() {
            i += 1;
        }
    }
    if i < bytes.len() && (bytes[i] == b'e' || bytes[i] == b'E') {
        let mut j = i + 1;
        if j < bytes.len() && (bytes[j] == b'+' || bytes[j] == b'-') {
            j += 1;
        }
        if j < bytes.len() && bytes[j].is_ascii_digit() {
            i = j;
            while i < bytes.len() && bytes[i].is_ascii_digit() {
                i += 1;
            }
        }
    }
    i
}

/// Scans a quoted string starting at the opening quote. Returns the unescaped
/// contents and the offset just past the closing quote.
fn scan_string(src: &str, start: usize) -> Result<(String, usize), ComputationError> {
    let mut chars = src[start..].char_indices();
    let (_, quote) = chars.next().ok_or_else(|| error(start, "expected string"))?;
    let mut out = String::new();

    while let Some((idx, ch)) = chars.next() {
        match ch {
            c if c == quote => return Ok((out, start + idx + c.len_utf8())),
            '\\' => {
                let (_, esc) = chars.next().ok_or_else(|| error(start, "unterminated string"))?;
                out.push(match esc {
                    'n' => '\n',
                    't' => '\t',
                    'r' => '\r',
                    '0' => '\0',
                    other => other,
                });
            }
            '\n' => return Err(error(start, "unterminated string")),
            other => out.push(other),
        }
    }
    Err(error(start, "unterminated string"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<Token> {
        tokenize(src).unwrap().into_iter().map(|s| s.token).collect()
    }

    #[test]
    fn test_operators_and_literals() {
        assert_eq!(
            kinds("a[0] !== 'x\\'y' && 1.5e2 >= .5"),
            vec![
                Token::Ident("a".into()),
                Token::LBracket,
                Token::Number(0.0),
                Token::RBracket,
                Token::StrictNe,
                Token::Str("x'y".into()),
                Token::And,
                Token::Number(150.0),
                Token::Ge,
                Token::Number(0.5),
            ]
        );
    }

    #[test]
    fn test_comments_skipped() {
        assert_eq!(kinds("// note\nreturn /* inline */ 1;"), vec![
            Token::Ident("return".into()),
            Token::Number(1.0),
            Token::Semicolon,
        ]);
    }

    #[test]
    fn test_errors_carry_offset() {
        assert_eq!(
            tokenize("1 # 2"),
            Err(ComputationError::Parse { offset: 2, message: "unexpected character '#'".into() })
        );
        assert!(matches!(tokenize("'open"), Err(ComputationError::Parse { offset: 0, .. })));
    }
}
