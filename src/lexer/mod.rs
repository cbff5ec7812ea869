use logos::Logos;

use crate::ast::Span;

#[derive(Logos, Debug, PartialEq, Clone)]
#[logos(skip r"[ \t\r\n]+")]
#[logos(skip(r"//[^\n]*", allow_greedy = true))]
pub enum Token {
    // Type keywords
    #[token("int")]
    IntKw,
    #[token("float")]
    FloatKw,
    #[token("string")]
    StringKw,
    #[token("char")]
    CharKw,
    #[token("bool")]
    BoolKw,
    #[token("void")]
    VoidKw,

    #[token("if")]
    If,
    #[token("else")]
    Else,
    #[token("return")]
    Return,

    // Literals
    #[token("true", |_| true)]
    #[token("false", |_| false)]
    Bool(bool),

    #[regex(r"[0-9]+\.[0-9]+", |lex| lex.slice().parse::<f32>().ok())]
    Float(f32),

    #[regex(r"[0-9]+", |lex| lex.slice().parse::<i32>().ok())]
    Int(i32),

    #[regex(r#""([^"\\\n]|\\.)*""#, |lex| {
        let s = lex.slice();
        unescape(&s[1..s.len() - 1])
    })]
    Str(String),

    #[regex(r"'([^'\\\n]|\\.)'", |lex| char_literal(lex.slice()))]
    Char(char),

    #[regex(r"[A-Za-z_][A-Za-z0-9_]*", |lex| lex.slice().to_string())]
    Ident(String),

    // Operators
    #[token("+")]
    Plus,
    #[token("-")]
    Minus,
    #[token("*")]
    Star,
    #[token("/")]
    Slash,
    #[token("%")]
    Percent,
    #[token("==")]
    EqEq,
    #[token("!=")]
    NotEq,
    #[token("<")]
    Lt,
    #[token("<=")]
    Le,
    #[token(">")]
    Gt,
    #[token(">=")]
    Ge,
    #[token("=")]
    Assign,

    // Punctuation
    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
    #[token("{")]
    LBrace,
    #[token("}")]
    RBrace,
    #[token(",")]
    Comma,
    #[token(";")]
    Semi,
}

fn unescape(body: &str) -> Option<String> {
    let mut out = String::with_capacity(body.len());
    let mut chars = body.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        out.push(match chars.next()? {
            'n' => '\n',
            't' => '\t',
            'r' => '\r',
            '0' => '\0',
            '\\' => '\\',
            '"' => '"',
            '\'' => '\'',
            _ => return None,
        });
    }
    Some(out)
}

/// `'a'` or `'\n'`; must fit in one byte.
fn char_literal(slice: &str) -> Option<char> {
    let text = unescape(&slice[1..slice.len() - 1])?;
    let mut chars = text.chars();
    let c = chars.next()?;
    (chars.next().is_none() && (c as u32) <= 0xFF).then_some(c)
}

/// Lex source code into a stream of tokens with their byte spans.
pub fn lex(source: &str) -> Result<Vec<(Token, Span)>, LexError> {
    let mut lexer = Token::lexer(source);
    let mut tokens = Vec::new();

    while let Some(result) = lexer.next() {
        let range = lexer.span();
        let span = Span { start: range.start, end: range.end };
        match result {
            Ok(token) => tokens.push((token, span)),
            Err(()) => {
                let snippet = source[range].to_string();
                return Err(LexError {
                    position: span.start,
                    span,
                    suggestion: suggest_fix(&snippet),
                    snippet,
                });
            }
        }
    }

    Ok(tokens)
}

fn suggest_fix(bad: &str) -> String {
    match bad.chars().next() {
        Some('"') => "close the string literal with '\"'; supported escapes are \\n \\t \\r \\0 \\\\ \\\"".into(),
        Some('\'') => "char literals hold one Latin-1 character, e.g. 'a' or '\\n'".into(),
        Some(c) if c.is_ascii_digit() => "integer literals must fit in 32 bits".into(),
        Some('!') => "'!' is only valid as part of '!='".into(),
        _ => format!("unexpected character(s) '{}'", bad),
    }
}

#[derive(Debug, thiserror::Error)]
#[error("Lex error at position {position}: '{snippet}'. {suggestion}")]
pub struct LexError {
    pub position: usize,
    pub span: Span,
    pub snippet: String,
    pub suggestion: String,
}
