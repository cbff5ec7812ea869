use crate::ast::*;
use crate::lexer::Token;
use crate::value::{BinaryOp, TypeTag};

pub struct Parser {
    tokens: Vec<(Token, Span)>,
    pos: usize,
}

#[derive(Debug, thiserror::Error)]
#[error("Parse error at token {position}: {message}")]
pub struct ParseError {
    pub code: &'static str,
    pub position: usize,
    pub span: Span,
    pub message: String,
}

type Result<T> = std::result::Result<T, ParseError>;

/// What ends an expression's token list.
#[derive(Clone, Copy, PartialEq)]
enum Terminator {
    /// `;` at depth 0, consumed
    Semi,
    /// the `)` closing an already-consumed `(`, consumed
    CloseParen,
}

impl Parser {
    pub fn new(tokens: Vec<(Token, Span)>) -> Self {
        Parser { tokens, pos: 0 }
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|(t, _)| t)
    }

    fn peek_span(&self) -> Span {
        self.tokens
            .get(self.pos)
            .or_else(|| self.tokens.last())
            .map(|(_, s)| *s)
            .unwrap_or(Span::UNKNOWN)
    }

    fn prev_span(&self) -> Span {
        self.pos
            .checked_sub(1)
            .and_then(|i| self.tokens.get(i))
            .map(|(_, s)| *s)
            .unwrap_or(Span::UNKNOWN)
    }

    fn token_at(&self, idx: usize) -> Option<&Token> {
        self.tokens.get(idx).map(|(t, _)| t)
    }

    fn advance(&mut self) -> Option<&Token> {
        let tok = self.tokens.get(self.pos).map(|(t, _)| t);
        if tok.is_some() {
            self.pos += 1;
        }
        tok
    }

    fn expect(&mut self, expected: &Token) -> Result<Span> {
        match self.peek() {
            Some(tok) if tok == expected => {
                let span = self.peek_span();
                self.advance();
                Ok(span)
            }
            Some(tok) => Err(self.error("MC-P001", format!("expected {:?}, got {:?}", expected, tok))),
            None => Err(self.error("MC-P002", format!("expected {:?}, got EOF", expected))),
        }
    }

    fn expect_ident(&mut self) -> Result<String> {
        match self.peek().cloned() {
            Some(Token::Ident(name)) => {
                self.advance();
                Ok(name)
            }
            Some(tok) => Err(self.error("MC-P003", format!("expected identifier, got {:?}", tok))),
            None => Err(self.error("MC-P004", "expected identifier, got EOF".into())),
        }
    }

    fn error(&self, code: &'static str, message: String) -> ParseError {
        ParseError {
            code,
            position: self.pos,
            span: self.peek_span(),
            message,
        }
    }

    fn at_end(&self) -> bool {
        self.pos >= self.tokens.len()
    }

    fn type_keyword(tok: Option<&Token>) -> Option<TypeTag> {
        Some(match tok? {
            Token::IntKw => TypeTag::Int,
            Token::FloatKw => TypeTag::Float,
            Token::StringKw => TypeTag::String,
            Token::CharKw => TypeTag::Char,
            Token::BoolKw => TypeTag::Bool,
            Token::VoidKw => TypeTag::Void,
            _ => return None,
        })
    }

    // ---- Top-level parsing ----

    pub fn parse_program(&mut self) -> (Program, Vec<ParseError>) {
        let mut items = Vec::new();
        let mut errors: Vec<ParseError> = Vec::new();
        const MAX_ERRORS: usize = 20;

        while !self.at_end() {
            if errors.len() >= MAX_ERRORS {
                break;
            }
            match self.parse_item() {
                Ok(item) => items.push(item),
                Err(e) => {
                    errors.push(e);
                    self.sync_to_item_boundary();
                }
            }
        }

        (Program { items }, errors)
    }

    /// Skip past the rest of a broken item: up to a `;` or a balancing `}`.
    fn sync_to_item_boundary(&mut self) {
        let mut depth: usize = 0;
        while let Some(tok) = self.peek() {
            match tok {
                Token::LBrace => depth += 1,
                Token::RBrace => {
                    depth = depth.saturating_sub(1);
                    if depth == 0 {
                        self.advance();
                        return;
                    }
                }
                Token::Semi if depth == 0 => {
                    self.advance();
                    return;
                }
                _ => {}
            }
            self.advance();
        }
    }

    fn parse_item(&mut self) -> Result<Item> {
        let start = self.peek_span();
        let Some(ty) = Self::type_keyword(self.peek()) else {
            return Ok(Item::Stmt(self.parse_stmt()?));
        };
        if self.token_at(self.pos + 2) == Some(&Token::LParen) {
            self.advance();
            let name = self.expect_ident()?;
            return Ok(Item::Function(self.parse_function(ty, name, start)?));
        }
        Ok(Item::Global(self.parse_var_decl()?))
    }

    fn parse_function(&mut self, ret: TypeTag, name: String, start: Span) -> Result<Function> {
        self.expect(&Token::LParen)?;
        let mut params = Vec::new();
        if self.peek() != Some(&Token::RParen) {
            loop {
                let Some(ty) = Self::type_keyword(self.peek()) else {
                    return Err(self.error("MC-P005", format!("expected parameter type, got {:?}", self.peek())));
                };
                self.advance();
                let name = self.expect_ident()?;
                params.push(Param { ty, name });
                if self.peek() == Some(&Token::Comma) {
                    self.advance();
                } else {
                    break;
                }
            }
        }
        self.expect(&Token::RParen)?;
        let header = start.merge(self.prev_span());
        let body = self.parse_block()?;
        Ok(Function { ret, name, params, body, span: header })
    }

    fn parse_block(&mut self) -> Result<Vec<Stmt>> {
        self.expect(&Token::LBrace)?;
        let mut stmts = Vec::new();
        loop {
            match self.peek() {
                Some(Token::RBrace) => {
                    self.advance();
                    return Ok(stmts);
                }
                None => return Err(self.error("MC-P006", "unclosed block, expected '}'".into())),
                Some(_) => stmts.push(self.parse_stmt()?),
            }
        }
    }

    // ---- Statements ----

    fn parse_stmt(&mut self) -> Result<Stmt> {
        let start = self.peek_span();
        match self.peek() {
            Some(t) if Self::type_keyword(Some(t)).is_some() => {
                if self.token_at(self.pos + 2) == Some(&Token::LParen) {
                    return Err(self.error("MC-P007", "functions can only be defined at the top level".into()));
                }
                Ok(Stmt::Decl(self.parse_var_decl()?))
            }
            Some(Token::If) => self.parse_if(),
            Some(Token::Return) => {
                self.advance();
                let value = if self.peek() == Some(&Token::Semi) {
                    self.advance();
                    None
                } else {
                    Some(self.parse_expr_tokens(Terminator::Semi)?)
                };
                Ok(Stmt::Return { value, span: start.merge(self.prev_span()) })
            }
            Some(Token::Ident(_)) => match self.token_at(self.pos + 1) {
                Some(Token::Assign) => {
                    let name = self.expect_ident()?;
                    self.advance();
                    let value = self.parse_expr_tokens(Terminator::Semi)?;
                    Ok(Stmt::Assign { name, value, span: start.merge(self.prev_span()) })
                }
                Some(Token::LParen) => {
                    let tokens = self.parse_expr_tokens(Terminator::Semi)?;
                    Ok(Stmt::Call { tokens, span: start.merge(self.prev_span()) })
                }
                _ => {
                    self.advance();
                    Err(self.error("MC-P008", "expected '=' or '(' after identifier".into()))
                }
            },
            Some(tok) => Err(self.error("MC-P009", format!("expected a statement, got {:?}", tok))),
            None => Err(self.error("MC-P010", "expected a statement, got EOF".into())),
        }
    }

    fn parse_var_decl(&mut self) -> Result<VarDecl> {
        let start = self.peek_span();
        let ty = Self::type_keyword(self.peek())
            .ok_or_else(|| self.error("MC-P005", format!("expected a type, got {:?}", self.peek())))?;
        self.advance();
        let name = self.expect_ident()?;
        let init = match self.peek() {
            Some(Token::Semi) => {
                self.advance();
                Vec::new()
            }
            Some(Token::Assign) => {
                self.advance();
                self.parse_expr_tokens(Terminator::Semi)?
            }
            _ => return Err(self.error("MC-P011", format!("expected '=' or ';' after '{}'", name))),
        };
        Ok(VarDecl { ty, name, init, span: start.merge(self.prev_span()) })
    }

    fn parse_if(&mut self) -> Result<Stmt> {
        let start = self.peek_span();
        self.expect(&Token::If)?;
        self.expect(&Token::LParen)?;
        let cond = self.parse_expr_tokens(Terminator::CloseParen)?;
        if cond.is_empty() {
            return Err(self.error("MC-P012", "empty if condition".into()));
        }
        let header = start.merge(self.prev_span());
        let then_body = self.parse_block()?;
        let else_body = if self.peek() == Some(&Token::Else) {
            self.advance();
            if self.peek() == Some(&Token::If) {
                Some(vec![self.parse_if()?])
            } else {
                Some(self.parse_block()?)
            }
        } else {
            None
        };
        Ok(Stmt::If { cond, then_body, else_body, span: header })
    }

    // ---- Expressions ----

    /// Collect the flat token list of an expression, tracking parenthesis
    /// depth so the terminator is only recognised at the outer level.
    fn parse_expr_tokens(&mut self, until: Terminator) -> Result<Vec<ExprToken>> {
        let mut out = Vec::new();
        let mut depth: usize = 0;
        loop {
            let Some(tok) = self.peek().cloned() else {
                return Err(self.error("MC-P013", "unexpected EOF in expression".into()));
            };
            let et = match tok {
                Token::Semi if until == Terminator::Semi && depth == 0 => {
                    self.advance();
                    return Ok(out);
                }
                Token::RParen if until == Terminator::CloseParen && depth == 0 => {
                    self.advance();
                    return Ok(out);
                }
                Token::LParen => {
                    depth += 1;
                    ExprToken::LParen
                }
                Token::RParen => {
                    depth = depth.checked_sub(1).ok_or_else(|| self.error("MC-P014", "unmatched ')'".into()))?;
                    ExprToken::RParen
                }
                Token::Comma => ExprToken::Comma,
                Token::Int(n) => ExprToken::Int(n),
                Token::Float(f) => ExprToken::Float(f),
                Token::Str(s) => ExprToken::Str(s),
                Token::Char(c) => ExprToken::Char(c),
                Token::Bool(b) => ExprToken::Bool(b),
                Token::Ident(name) => ExprToken::Ident(name),
                Token::Plus => ExprToken::Op(BinaryOp::Add),
                Token::Minus => ExprToken::Op(BinaryOp::Sub),
                Token::Star => ExprToken::Op(BinaryOp::Mul),
                Token::Slash => ExprToken::Op(BinaryOp::Div),
                Token::Percent => ExprToken::Op(BinaryOp::Mod),
                Token::EqEq => ExprToken::Op(BinaryOp::Eq),
                Token::NotEq => ExprToken::Op(BinaryOp::Ne),
                Token::Lt => ExprToken::Op(BinaryOp::Lt),
                Token::Le => ExprToken::Op(BinaryOp::Le),
                Token::Gt => ExprToken::Op(BinaryOp::Gt),
                Token::Ge => ExprToken::Op(BinaryOp::Ge),
                other => {
                    return Err(self.error("MC-P015", format!("unexpected {:?} in expression", other)));
                }
            };
            self.advance();
            out.push(et);
        }
    }
}

pub fn parse(tokens: Vec<(Token, Span)>) -> (Program, Vec<ParseError>) {
    let mut parser = Parser::new(tokens);
    parser.parse_program()
}
