use crate::error::PredicateError;

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
    Colon,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

/// A token with the byte offset it started at.
#[derive(Debug, Clone, PartialEq)]
pub struct Spanned {
    pub token: Token,
    pub offset: usize,
}

pub fn tokenize(source: &str) -> Result<Vec<Spanned>, PredicateError> {
    let bytes = source.as_bytes();
    let mut tokens = Vec::new();
    let mut pos = 0;

    while pos < bytes.len() {
        let c = bytes[pos];
        let start = pos;

        if c.is_ascii_whitespace() {
            pos += 1;
            continue;
        }

        let token = match c {
            b'(' => single(&mut pos, Token::LParen),
            b')' => single(&mut pos, Token::RParen),
            b'[' => single(&mut pos, Token::LBracket),
            b']' => single(&mut pos, Token::RBracket),
            b',' => single(&mut pos, Token::Comma),
            b':' => single(&mut pos, Token::Colon),
            b'+' => single(&mut pos, Token::Plus),
            b'-' => single(&mut pos, Token::Minus),
            b'*' => single(&mut pos, Token::Star),
            b'/' => single(&mut pos, Token::Slash),
            b'%' => single(&mut pos, Token::Percent),
            b'=' | b'!' | b'<' | b'>' => {
                let followed_by_eq = bytes.get(pos + 1) == Some(&b'=');
                pos += if followed_by_eq { 2 } else { 1 };
                match (c, followed_by_eq) {
                    (b'=', true) => Token::Eq,
                    (b'!', true) => Token::Ne,
                    (b'<', true) => Token::Le,
                    (b'>', true) => Token::Ge,
                    (b'<', false) => Token::Lt,
                    (b'>', false) => Token::Gt,
                    _ => return Err(syntax(start, "expected '=='")),
                }
            }
            b'\'' | b'"' => lex_string(source, &mut pos)?,
            b'.' if !bytes.get(pos + 1).is_some_and(u8::is_ascii_digit) => {
                single(&mut pos, Token::Dot)
            }
            b'0'..=b'9' | b'.' => lex_number(source, &mut pos)?,
            c if c == b'_' || c.is_ascii_alphabetic() => {
                while pos < bytes.len() && (bytes[pos] == b'_' || bytes[pos].is_ascii_alphanumeric())
                {
                    pos += 1;
                }
                Token::Ident(source[start..pos].to_string())
            }
            _ => return Err(syntax(start, "unexpected character")),
        };

        tokens.push(Spanned {
            token,
            offset: start,
        });
    }

    Ok(tokens)
}

fn single(pos: &mut usize, token: Token) -> Token {
    *pos += 1;
    token
}

fn lex_number(source: &str, pos: &mut usize) -> Result<Token, PredicateError> {
    let bytes = source.as_bytes();
    let start = *pos;
    while *pos < bytes.len() && (bytes[*pos].is_ascii_digit() || bytes[*pos] == b'.') {
        *pos += 1;
    }
    if *pos < bytes.len() && matches!(bytes[*pos], b'e' | b'E') {
        let mut probe = *pos + 1;
        if probe < bytes.len() && matches!(bytes[probe], b'+' | b'-') {
            probe += 1;
        }
        if probe < bytes.len() && bytes[probe].is_ascii_digit() {
            *pos = probe;
            while *pos < bytes.len() && bytes[*pos].is_ascii_digit() {
                *pos += 1;
            }
        }
    }
    source[start..*pos]
        .parse()
        .map(Token::Number)
        .map_err(|_| syntax(start, "invalid number"))
}

fn lex_string(source: &str, pos: &mut usize) -> Result<Token, PredicateError> {
    let start = *pos;
    let mut chars = source[start..].char_indices();
    let (_, quote) = chars.next().ok_or_else(|| syntax(start, "expected string"))?;
    let mut out = String::new();

    while let Some((i, c)) = chars.next() {
        match c {
            c if c == quote => {
                *pos = start + i + c.len_utf8();
                return Ok(Token::Str(out));
            }
            '\\' => {
                let (_, escaped) = chars
                    .next()
                    .ok_or_else(|| syntax(start, "unterminated string"))?;
                out.push(match escaped {
                    'n' => '\n',
                    't' => '\t',
                    'r' => '\r',
                    '0' => '\0',
                    other => other,
                });
            }
            c => out.push(c),
        }
    }

    Err(syntax(start, "unterminated string"))
}

fn syntax(offset: usize, message: &str) -> PredicateError {
    PredicateError::Syntax {
        offset,
        message: message.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<Token> {
        tokenize(source)
            .unwrap()
            .into_iter()
            .map(|s| s.token)
            .collect()
    }

    #[test]
    fn test_lambda_header() {
        assert_eq!(
            kinds("lambda pub: pub['temp'] >= 30.5"),
            vec![
                Token::Ident("lambda".into()),
                Token::Ident("pub".into()),
                Token::Colon,
                Token::Ident("pub".into()),
                Token::LBracket,
                Token::Str("temp".into()),
                Token::RBracket,
                Token::Ge,
                Token::Number(30.5),
            ]
        );
    }

    #[test]
    fn test_method_call_and_escapes() {
        assert_eq!(
            kinds(r#"x.get("a\"b") != .5"#),
            vec![
                Token::Ident("x".into()),
                Token::Dot,
                Token::Ident("get".into()),
                Token::LParen,
                Token::Str("a\"b".into()),
                Token::RParen,
                Token::Ne,
                Token::Number(0.5),
            ]
        );
    }

    #[test]
    fn test_exponent() {
        assert_eq!(kinds("1e3"), vec![Token::Number(1000.0)]);
    }

    #[test]
    fn test_errors_report_offset() {
        assert_eq!(
            tokenize("a = 1"),
            Err(PredicateError::Syntax {
                offset: 2,
                message: "expected '=='".into()
            })
        );
        assert!(matches!(
            tokenize("'open"),
            Err(PredicateError::Syntax { offset: 0, .. })
        ));
        assert!(tokenize("a ; b").is_err());
    }
}
