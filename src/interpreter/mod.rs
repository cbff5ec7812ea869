//! Tree-walking evaluator over expression token lists.
//!
//! Shares the arithmetic and coercion rules in [`crate::value`] with the VM,
//! so for any call-free expression both must agree on the result.

use std::collections::HashMap;

use crate::ast::ExprToken;
use crate::value::{self, BinaryOp, Value};

#[derive(Debug, thiserror::Error)]
#[error("Runtime error: {message}")]
pub struct RuntimeError {
    pub message: String,
}

impl RuntimeError {
    fn new(msg: impl Into<String>) -> Self {
        RuntimeError { message: msg.into() }
    }
}

type Result<T> = std::result::Result<T, RuntimeError>;

/// Variables visible to an expression. Missing names evaluate to `Void`,
/// as an unresolved load does on the machine.
pub type Env = HashMap<String, Value>;

pub fn evaluate(tokens: &[ExprToken], env: &Env) -> Result<Value> {
    let mut parser = Evaluator { tokens, pos: 0, env };
    let value = parser.expr(0)?;
    match parser.tokens.get(parser.pos) {
        None => Ok(value),
        Some(tok) => Err(RuntimeError::new(format!("unexpected {:?} after expression", tok))),
    }
}

struct Evaluator<'a> {
    tokens: &'a [ExprToken],
    pos: usize,
    env: &'a Env,
}

fn binding_power(op: BinaryOp) -> u8 {
    match op {
        BinaryOp::Mul | BinaryOp::Div | BinaryOp::Mod => 3,
        BinaryOp::Add | BinaryOp::Sub => 2,
        _ => 1,
    }
}

impl Evaluator<'_> {
    fn next(&mut self) -> Option<&ExprToken> {
        let tok = self.tokens.get(self.pos);
        if tok.is_some() {
            self.pos += 1;
        }
        tok
    }

    /// Precedence climbing: fold operators binding tighter than `min`.
    fn expr(&mut self, min: u8) -> Result<Value> {
        let mut left = self.unary()?;
        while let Some(ExprToken::Op(op)) = self.tokens.get(self.pos) {
            let op = *op;
            let bp = binding_power(op);
            if bp <= min {
                break;
            }
            self.pos += 1;
            let right = self.expr(bp)?;
            left = value::binary(op, &left, &right).unwrap_or_else(|e| e.substitute());
        }
        Ok(left)
    }

    fn unary(&mut self) -> Result<Value> {
        if self.tokens.get(self.pos) == Some(&ExprToken::Op(BinaryOp::Sub)) {
            self.pos += 1;
            let v = self.unary()?;
            return Ok(value::negate(&v).unwrap_or_else(|e| e.substitute()));
        }
        self.primary()
    }

    fn primary(&mut self) -> Result<Value> {
        let env = self.env;
        let Some(tok) = self.next().cloned() else {
            return Err(RuntimeError::new("unexpected end of expression"));
        };
        match tok {
            ExprToken::Int(n) => Ok(Value::Int(n)),
            ExprToken::Float(f) => Ok(Value::Float(f)),
            ExprToken::Str(s) => Ok(Value::Str(s)),
            ExprToken::Char(c) => Ok(Value::Char(c)),
            ExprToken::Bool(b) => Ok(Value::Bool(b)),
            ExprToken::Ident(name) => {
                if self.tokens.get(self.pos) == Some(&ExprToken::LParen) {
                    return Err(RuntimeError::new(format!("calls are not supported: '{}'", name)));
                }
                Ok(env.get(&name).cloned().unwrap_or(Value::Void))
            }
            ExprToken::LParen => {
                let v = self.expr(0)?;
                match self.next() {
                    Some(ExprToken::RParen) => Ok(v),
                    _ => Err(RuntimeError::new("expected ')'")),
                }
            }
            other => Err(RuntimeError::new(format!("unexpected {:?}", other))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer;

    /// Lex `source` as a bare expression.
    fn tokens(source: &str) -> Vec<ExprToken> {
        let src = format!("int _ = {};", source);
        let (prog, errors) = crate::parser::parse(lexer::lex(&src).unwrap());
        assert!(errors.is_empty(), "{:?}", errors);
        match prog.items.into_iter().next() {
            Some(crate::ast::Item::Global(d)) => d.init,
            other => panic!("expected declaration, got {:?}", other),
        }
    }

    fn eval(source: &str) -> Value {
        evaluate(&tokens(source), &Env::new()).unwrap()
    }

    #[test]
    fn eval_precedence() {
        assert_eq!(eval("1 + 2 * 3"), Value::Int(7));
        assert_eq!(eval("(1 + 2) * 3"), Value::Int(9));
        assert_eq!(eval("10 - 4 - 3"), Value::Int(3));
        assert_eq!(eval("-2 * -3"), Value::Int(6));
    }

    #[test]
    fn eval_comparison_binds_loosest() {
        assert_eq!(eval("1 + 1 == 2"), Value::Bool(true));
        assert_eq!(eval("3 < 2 + 2"), Value::Bool(true));
    }

    #[test]
    fn eval_uses_env() {
        let mut env = Env::new();
        env.insert("x".into(), Value::Float(1.5));
        assert_eq!(evaluate(&tokens("x * 2"), &env).unwrap(), Value::Float(3.0));
        assert_eq!(evaluate(&tokens("missing"), &env).unwrap(), Value::Void);
    }

    #[test]
    fn eval_substitutes_like_the_vm() {
        assert_eq!(eval("1 / 0"), Value::Float(f32::INFINITY));
        assert_eq!(eval("true + 1"), Value::Int(0));
        assert_eq!(eval("\"a\" + 1 + 2"), Value::Str("a12".into()));
    }

    #[test]
    fn eval_rejects_calls() {
        let err = evaluate(&tokens("f(1)"), &Env::new()).unwrap_err();
        assert!(err.message.contains("not supported"));
    }

    #[test]
    fn eval_unbalanced() {
        let toks = vec![ExprToken::LParen, ExprToken::Int(1)];
        assert!(evaluate(&toks, &Env::new()).is_err());
        assert!(evaluate(&[ExprToken::Int(1), ExprToken::Int(2)], &Env::new()).is_err());
    }
}
