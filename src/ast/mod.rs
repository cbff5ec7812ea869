use serde::Serialize;

use crate::value::{BinaryOp, TypeTag};

pub mod source_map;
pub use source_map::SourceMap;

// ---- Span infrastructure ----

/// Byte range within source text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub const UNKNOWN: Span = Span { start: 0, end: 0 };

    pub fn merge(self, other: Span) -> Span {
        Span {
            start: self.start.min(other.start),
            end: self.end.max(other.end),
        }
    }
}

// ---- Syntax tree ----
//
// Expressions are kept as flat token lists: the emitter does its own
// precedence handling (shunting-yard) over them.

/// One token of an expression's right-hand side.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum ExprToken {
    Int(i32),
    Float(f32),
    Str(String),
    Char(char),
    Bool(bool),
    Ident(String),
    /// `-` doubles as unary negation when it appears in prefix position.
    Op(BinaryOp),
    LParen,
    RParen,
    Comma,
}

pub use crate::bytecode::Param;

/// `type name;` or `type name = expr;`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VarDecl {
    pub ty: TypeTag,
    pub name: String,
    pub init: Vec<ExprToken>,
    #[serde(skip)]
    pub span: Span,
}

/// `type name(type a, ...) { body }`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Function {
    pub ret: TypeTag,
    pub name: String,
    pub params: Vec<Param>,
    pub body: Vec<Stmt>,
    #[serde(skip)]
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Stmt {
    Decl(VarDecl),

    /// `name = expr;`
    Assign {
        name: String,
        value: Vec<ExprToken>,
        #[serde(skip)]
        span: Span,
    },

    /// `name(args);` — tokens include the callee and both parentheses
    Call {
        tokens: Vec<ExprToken>,
        #[serde(skip)]
        span: Span,
    },

    /// `if (cond) { .. } else { .. }`; `else if` nests a single `If`
    If {
        cond: Vec<ExprToken>,
        then_body: Vec<Stmt>,
        else_body: Option<Vec<Stmt>>,
        #[serde(skip)]
        span: Span,
    },

    /// `return;` or `return expr;`
    Return {
        value: Option<Vec<ExprToken>>,
        #[serde(skip)]
        span: Span,
    },
}

impl Stmt {
    pub fn span(&self) -> Span {
        match self {
            Stmt::Decl(d) => d.span,
            Stmt::Assign { span, .. }
            | Stmt::Call { span, .. }
            | Stmt::If { span, .. }
            | Stmt::Return { span, .. } => *span,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Item {
    Global(VarDecl),
    Function(Function),
    Stmt(Stmt),
}

#[derive(Debug, Clone, PartialEq, Serialize, Default)]
pub struct Program {
    pub items: Vec<Item>,
}

impl Program {
    pub fn functions(&self) -> impl Iterator<Item = &Function> {
        self.items.iter().filter_map(|item| match item {
            Item::Function(f) => Some(f),
            _ => None,
        })
    }

    pub fn globals(&self) -> impl Iterator<Item = &VarDecl> {
        self.items.iter().filter_map(|item| match item {
            Item::Global(d) => Some(d),
            _ => None,
        })
    }
}
