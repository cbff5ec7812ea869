//! Expression and statement emission.
//!
//! Infix token lists are converted to RPN with an operator stack and emitted
//! straight into an [`Assembler`]: every operand becomes a load, every
//! operator its opcode, and assignments end in exactly one store.

use crate::ast::ExprToken;
use crate::bytecode::{Assembler, Bytecode, EncodeError, Instruction, Label, Param, Scope};
use crate::symbols::{SymbolKind, SymbolTable};
use crate::value::{BinaryOp, TypeTag, Value};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CompileError {
    // expression shape
    #[error("call to '{0}' is missing its closing ')'")]
    MissingCloseParen(String),
    #[error("argument {position} of '{call}' must be a single literal or identifier")]
    MultiTokenArgument { call: String, position: usize },
    #[error("argument {position} of '{call}' is empty")]
    EmptyArgument { call: String, position: usize },
    #[error("unexpected {0} in expression")]
    UnexpectedToken(String),
    #[error("operator '{0}' is missing an operand")]
    DanglingOperator(BinaryOp),
    #[error("unbalanced parentheses")]
    UnbalancedParens,
    #[error("empty expression")]
    EmptyExpression,
    #[error(transparent)]
    Encode(#[from] EncodeError),

    // program checks
    #[error("function '{0}' is defined more than once")]
    DuplicateFunction(String),
    #[error("'{0}' is already declared in this scope")]
    DuplicateGlobal(String),
    #[error("variable '{0}' cannot have type void")]
    VoidVariable(String),
    #[error("'{name}' takes {expected} argument(s), {found} given")]
    ArityMismatch { name: String, expected: usize, found: usize },
    #[error("undefined identifier '{name}'")]
    Undefined { name: String, suggestion: Option<String> },
    #[error("'{0}' is a function, not a variable")]
    NotAVariable(String),
    #[error("'{0}' is not a function")]
    NotAFunction(String),
    #[error("void function '{0}' cannot return a value")]
    ReturnValueInVoid(String),
    #[error("function '{0}' must return a value")]
    MissingReturnValue(String),
    #[error("'{0}' returns no value and cannot be used in an expression")]
    VoidValue(String),
}

impl CompileError {
    pub fn code(&self) -> &'static str {
        match self {
            CompileError::MissingCloseParen(_) => "MC-C001",
            CompileError::MultiTokenArgument { .. } => "MC-C002",
            CompileError::EmptyArgument { .. } => "MC-C003",
            CompileError::UnexpectedToken(_) => "MC-C004",
            CompileError::DanglingOperator(_) => "MC-C005",
            CompileError::UnbalancedParens => "MC-C006",
            CompileError::EmptyExpression => "MC-C007",
            CompileError::Encode(_) => "MC-C008",
            CompileError::DuplicateFunction(_) => "MC-C010",
            CompileError::DuplicateGlobal(_) => "MC-C011",
            CompileError::VoidVariable(_) => "MC-C012",
            CompileError::ArityMismatch { .. } => "MC-C013",
            CompileError::Undefined { .. } => "MC-C014",
            CompileError::NotAVariable(_) => "MC-C015",
            CompileError::NotAFunction(_) => "MC-C016",
            CompileError::ReturnValueInVoid(_) => "MC-C017",
            CompileError::MissingReturnValue(_) => "MC-C018",
            CompileError::VoidValue(_) => "MC-C019",
        }
    }

    pub fn hint(&self) -> Option<String> {
        match self {
            CompileError::Undefined { suggestion: Some(s), .. } => Some(format!("did you mean '{}'?", s)),
            CompileError::MultiTokenArgument { .. } => {
                Some("store the value in a variable first and pass the variable".into())
            }
            _ => None,
        }
    }
}

type Result<T> = std::result::Result<T, CompileError>;

/// Operator-stack entries.
#[derive(Debug, Clone, Copy, PartialEq)]
enum Pending {
    Binary(BinaryOp),
    Negate,
    Open,
}

fn precedence(op: BinaryOp) -> u8 {
    match op {
        BinaryOp::Mul | BinaryOp::Div | BinaryOp::Mod => 3,
        BinaryOp::Add | BinaryOp::Sub => 2,
        BinaryOp::Eq | BinaryOp::Ne | BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => 1,
    }
}

const NEGATE_PRECEDENCE: u8 = 4;

fn describe(tok: &ExprToken) -> String {
    match tok {
        ExprToken::Int(n) => format!("literal {}", n),
        ExprToken::Float(f) => format!("literal {}", f),
        ExprToken::Str(s) => format!("literal \"{}\"", s),
        ExprToken::Char(c) => format!("literal '{}'", c),
        ExprToken::Bool(b) => format!("literal {}", b),
        ExprToken::Ident(name) => format!("identifier '{}'", name),
        ExprToken::Op(op) => format!("operator '{}'", op),
        ExprToken::LParen => "'('".into(),
        ExprToken::RParen => "')'".into(),
        ExprToken::Comma => "','".into(),
    }
}

pub struct Emitter<'a, S: SymbolTable + ?Sized> {
    asm: &'a mut Assembler,
    symbols: &'a S,
}

impl<'a, S: SymbolTable + ?Sized> Emitter<'a, S> {
    pub fn new(asm: &'a mut Assembler, symbols: &'a S) -> Self {
        Emitter { asm, symbols }
    }

    /// Evaluate `tokens` and store the result into `target`.
    pub fn assignment(&mut self, ty: TypeTag, target: &str, scope: Scope, tokens: &[ExprToken]) -> Result<()> {
        if tokens.is_empty() {
            self.emit(Instruction::LoadConst { value: ty.default_value() })?;
        } else {
            self.expression(tokens)?;
        }
        self.emit(Instruction::Store { scope, ty, name: target.to_string() })?;
        Ok(())
    }

    /// Evaluate `tokens`, leaving the result (if any) on the stack.
    pub fn expression(&mut self, tokens: &[ExprToken]) -> Result<()> {
        if tokens.is_empty() {
            return Err(CompileError::EmptyExpression);
        }
        let mut ops: Vec<Pending> = Vec::new();
        let mut expect_operand = true;
        let mut i = 0;

        while i < tokens.len() {
            let tok = &tokens[i];
            match tok {
                ExprToken::Ident(name) if tokens.get(i + 1) == Some(&ExprToken::LParen) => {
                    if !expect_operand {
                        return Err(CompileError::UnexpectedToken(describe(tok)));
                    }
                    i = self.call(name, tokens, i + 1)?;
                    expect_operand = false;
                    continue;
                }
                ExprToken::Int(_)
                | ExprToken::Float(_)
                | ExprToken::Str(_)
                | ExprToken::Char(_)
                | ExprToken::Bool(_)
                | ExprToken::Ident(_) => {
                    if !expect_operand {
                        return Err(CompileError::UnexpectedToken(describe(tok)));
                    }
                    self.operand(tok)?;
                    expect_operand = false;
                }
                ExprToken::Op(BinaryOp::Sub) if expect_operand => ops.push(Pending::Negate),
                ExprToken::Op(op) => {
                    if expect_operand {
                        return Err(CompileError::DanglingOperator(*op));
                    }
                    let prec = precedence(*op);
                    while let Some(&top) = ops.last() {
                        let top_prec = match top {
                            Pending::Binary(t) => precedence(t),
                            Pending::Negate => NEGATE_PRECEDENCE,
                            Pending::Open => break,
                        };
                        if top_prec < prec {
                            break;
                        }
                        ops.pop();
                        self.pending(top);
                    }
                    ops.push(Pending::Binary(*op));
                    expect_operand = true;
                }
                ExprToken::LParen => {
                    if !expect_operand {
                        return Err(CompileError::UnexpectedToken(describe(tok)));
                    }
                    ops.push(Pending::Open);
                }
                ExprToken::RParen => {
                    if expect_operand {
                        return Err(self.missing_operand(&ops));
                    }
                    loop {
                        match ops.pop() {
                            Some(Pending::Open) => break,
                            Some(p) => self.pending(p),
                            None => return Err(CompileError::UnbalancedParens),
                        }
                    }
                }
                ExprToken::Comma => return Err(CompileError::UnexpectedToken(describe(tok))),
            }
            i += 1;
        }

        if expect_operand {
            return Err(self.missing_operand(&ops));
        }
        while let Some(p) = ops.pop() {
            if p == Pending::Open {
                return Err(CompileError::UnbalancedParens);
            }
            self.pending(p);
        }
        Ok(())
    }

    fn missing_operand(&self, ops: &[Pending]) -> CompileError {
        match ops.last() {
            Some(Pending::Binary(op)) => CompileError::DanglingOperator(*op),
            Some(Pending::Negate) => CompileError::DanglingOperator(BinaryOp::Sub),
            _ => CompileError::UnbalancedParens,
        }
    }

    fn pending(&mut self, p: Pending) {
        match p {
            Pending::Binary(kind) => self.asm.push(Instruction::Binary { kind }),
            Pending::Negate => self.asm.push(Instruction::Negate),
            Pending::Open => {}
        }
    }

    /// One load for a literal or identifier.
    fn operand(&mut self, tok: &ExprToken) -> Result<()> {
        let instr = match tok {
            ExprToken::Int(n) => Instruction::LoadConst { value: Value::Int(*n) },
            ExprToken::Float(f) => Instruction::LoadConst { value: Value::Float(*f) },
            ExprToken::Str(s) => Instruction::LoadConst { value: Value::Str(s.clone()) },
            ExprToken::Char(c) => Instruction::LoadConst { value: Value::Char(*c) },
            ExprToken::Bool(b) => Instruction::LoadConst { value: Value::Bool(*b) },
            ExprToken::Ident(name) => Instruction::Load { scope: self.load_scope(name), name: name.clone() },
            other => return Err(CompileError::UnexpectedToken(describe(other))),
        };
        self.emit(instr)
    }

    /// Push `instr` after checking its operands fit the byte format, so an
    /// oversized name or constant is reported against its statement.
    fn emit(&mut self, instr: Instruction) -> Result<()> {
        instr.encode(&mut Vec::with_capacity(instr.encoded_len()))?;
        self.asm.push(instr);
        Ok(())
    }

    fn load_scope(&self, name: &str) -> Scope {
        match self.symbols.get(name).map(|s| s.kind) {
            Some(SymbolKind::Global) => Scope::Global,
            Some(SymbolKind::Local | SymbolKind::Parameter) => Scope::Local,
            Some(SymbolKind::Function) | None => Scope::Resolve,
        }
    }

    /// `name ( a , b )` with `open` at the `(`. Returns the index after the `)`.
    fn call(&mut self, name: &str, tokens: &[ExprToken], open: usize) -> Result<usize> {
        let mut depth = 0usize;
        let mut close = None;
        for (j, tok) in tokens.iter().enumerate().skip(open) {
            match tok {
                ExprToken::LParen => depth += 1,
                ExprToken::RParen => {
                    depth -= 1;
                    if depth == 0 {
                        close = Some(j);
                        break;
                    }
                }
                _ => {}
            }
        }
        let close = close.ok_or_else(|| CompileError::MissingCloseParen(name.to_string()))?;
        let inner = &tokens[open + 1..close];

        let args: Vec<&[ExprToken]> = if inner.is_empty() {
            Vec::new()
        } else {
            split_arguments(inner)
        };
        for (position, arg) in args.iter().enumerate() {
            match arg.len() {
                0 => return Err(CompileError::EmptyArgument { call: name.to_string(), position: position + 1 }),
                1 => {}
                _ => {
                    return Err(CompileError::MultiTokenArgument { call: name.to_string(), position: position + 1 });
                }
            }
        }
        let argc = u8::try_from(args.len()).map_err(|_| EncodeError::TooManyArgs(name.to_string()))?;

        // last argument first, so the first pop yields the first argument
        for arg in args.iter().rev() {
            self.operand(&arg[0])?;
        }
        self.emit(Instruction::Call { name: name.to_string(), argc })?;
        Ok(close + 1)
    }

    /// `Mark name; Enter ret params`
    pub fn prologue(&mut self, name: &str, ret: TypeTag, params: &[Param]) -> Result<()> {
        self.emit(Instruction::Mark { name: name.to_string() })?;
        self.emit(Instruction::Enter { ret, params: params.to_vec() })
    }

    /// Evaluate `cond` and jump past the block that follows when it is false.
    /// The caller binds the returned label after the block.
    pub fn branch(&mut self, cond: &[ExprToken]) -> Result<Label> {
        self.expression(cond)?;
        let skip = self.asm.new_label();
        self.asm.jump_if_false(skip);
        Ok(skip)
    }
}

/// Split on commas at parenthesis depth zero.
fn split_arguments(tokens: &[ExprToken]) -> Vec<&[ExprToken]> {
    let mut args = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;
    for (j, tok) in tokens.iter().enumerate() {
        match tok {
            ExprToken::LParen => depth += 1,
            ExprToken::RParen => depth = depth.saturating_sub(1),
            ExprToken::Comma if depth == 0 => {
                args.push(&tokens[start..j]);
                start = j + 1;
            }
            _ => {}
        }
    }
    args.push(&tokens[start..]);
    args
}

/// Compile one assignment on its own into a runnable stream.
pub fn compile_assignment<S: SymbolTable + ?Sized>(
    symbols: &S,
    ty: TypeTag,
    target: &str,
    scope: Scope,
    tokens: &[ExprToken],
) -> Result<Bytecode> {
    let mut asm = Assembler::new();
    Emitter::new(&mut asm, symbols).assignment(ty, target, scope, tokens)?;
    Ok(asm.assemble()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::symbols::Registry;
    use ExprToken::*;

    fn op(o: BinaryOp) -> ExprToken {
        ExprToken::Op(o)
    }

    fn ident(s: &str) -> ExprToken {
        Ident(s.into())
    }

    fn emit(reg: &Registry, tokens: &[ExprToken]) -> Vec<Instruction> {
        let code = compile_assignment(reg, TypeTag::Int, "x", Scope::Global, tokens).unwrap();
        code.instructions().unwrap().into_iter().map(|(_, i)| i).collect()
    }

    fn emit_err(tokens: &[ExprToken]) -> CompileError {
        compile_assignment(&Registry::new(), TypeTag::Int, "x", Scope::Global, tokens).unwrap_err()
    }

    fn int(n: i32) -> Instruction {
        Instruction::LoadConst { value: Value::Int(n) }
    }

    fn bin(kind: BinaryOp) -> Instruction {
        Instruction::Binary { kind }
    }

    fn store_x() -> Instruction {
        Instruction::Store { scope: Scope::Global, ty: TypeTag::Int, name: "x".into() }
    }

    #[test]
    fn empty_rhs_loads_default() {
        let reg = Registry::new();
        let code = compile_assignment(&reg, TypeTag::String, "s", Scope::Local, &[]).unwrap();
        let instrs: Vec<_> = code.instructions().unwrap().into_iter().map(|(_, i)| i).collect();
        assert_eq!(
            instrs,
            vec![
                Instruction::LoadConst { value: Value::Str(String::new()) },
                Instruction::Store { scope: Scope::Local, ty: TypeTag::String, name: "s".into() },
            ]
        );
    }

    #[test]
    fn single_literal_is_one_load() {
        assert_eq!(emit(&Registry::new(), &[Int(7)]), vec![int(7), store_x()]);
    }

    #[test]
    fn precedence_multiplication_first() {
        // 1 + 2 * 3  =>  1 2 3 * +
        let instrs = emit(&Registry::new(), &[Int(1), op(BinaryOp::Add), Int(2), op(BinaryOp::Mul), Int(3)]);
        assert_eq!(instrs, vec![int(1), int(2), int(3), bin(BinaryOp::Mul), bin(BinaryOp::Add), store_x()]);
    }

    #[test]
    fn left_associative_subtraction() {
        // 8 - 3 - 2  =>  8 3 - 2 -
        let instrs = emit(&Registry::new(), &[Int(8), op(BinaryOp::Sub), Int(3), op(BinaryOp::Sub), Int(2)]);
        assert_eq!(instrs, vec![int(8), int(3), bin(BinaryOp::Sub), int(2), bin(BinaryOp::Sub), store_x()]);
    }

    #[test]
    fn parentheses_override_precedence() {
        // (1 + 2) * 3
        let tokens = [LParen, Int(1), op(BinaryOp::Add), Int(2), RParen, op(BinaryOp::Mul), Int(3)];
        let instrs = emit(&Registry::new(), &tokens);
        assert_eq!(instrs, vec![int(1), int(2), bin(BinaryOp::Add), int(3), bin(BinaryOp::Mul), store_x()]);
    }

    #[test]
    fn comparison_binds_loosest() {
        // 1 + 2 < 4
        let tokens = [Int(1), op(BinaryOp::Add), Int(2), op(BinaryOp::Lt), Int(4)];
        let instrs = emit(&Registry::new(), &tokens);
        assert_eq!(instrs, vec![int(1), int(2), bin(BinaryOp::Add), int(4), bin(BinaryOp::Lt), store_x()]);
    }

    #[test]
    fn unary_minus_binds_tightest() {
        // -2 * 3  =>  2 neg 3 *
        let tokens = [op(BinaryOp::Sub), Int(2), op(BinaryOp::Mul), Int(3)];
        let instrs = emit(&Registry::new(), &tokens);
        assert_eq!(instrs, vec![int(2), Instruction::Negate, int(3), bin(BinaryOp::Mul), store_x()]);
        // 1 - -2
        let tokens = [Int(1), op(BinaryOp::Sub), op(BinaryOp::Sub), Int(2)];
        let instrs = emit(&Registry::new(), &tokens);
        assert_eq!(instrs, vec![int(1), int(2), Instruction::Negate, bin(BinaryOp::Sub), store_x()]);
    }

    #[test]
    fn load_variant_follows_registry() {
        let mut reg = Registry::new();
        reg.declare_global("g", TypeTag::Int).unwrap();
        reg.enter_function(&[Param { ty: TypeTag::Int, name: "p".into() }]);
        reg.declare_local("l", TypeTag::Int).unwrap();
        let tokens = [ident("g"), op(BinaryOp::Add), ident("p"), op(BinaryOp::Add), ident("l"), op(BinaryOp::Add), ident("u")];
        let instrs = emit(&reg, &tokens);
        let scopes: Vec<Scope> = instrs
            .iter()
            .filter_map(|i| match i {
                Instruction::Load { scope, .. } => Some(*scope),
                _ => None,
            })
            .collect();
        assert_eq!(scopes, vec![Scope::Global, Scope::Local, Scope::Local, Scope::Resolve]);
    }

    #[test]
    fn call_arguments_emitted_in_reverse() {
        let tokens = [ident("f"), LParen, Int(1), Comma, Int(2), Comma, Int(3), RParen];
        let instrs = emit(&Registry::new(), &tokens);
        assert_eq!(
            instrs,
            vec![int(3), int(2), int(1), Instruction::Call { name: "f".into(), argc: 3 }, store_x()]
        );
    }

    #[test]
    fn call_inside_arithmetic() {
        // f() + 1
        let tokens = [ident("f"), LParen, RParen, op(BinaryOp::Add), Int(1)];
        let instrs = emit(&Registry::new(), &tokens);
        assert_eq!(
            instrs,
            vec![Instruction::Call { name: "f".into(), argc: 0 }, int(1), bin(BinaryOp::Add), store_x()]
        );
    }

    #[test]
    fn string_literal_argument_is_single_token() {
        let tokens = [ident("print"), LParen, Str("a, b".into()), RParen];
        let instrs = emit(&Registry::new(), &tokens);
        assert_eq!(instrs[1], Instruction::Call { name: "print".into(), argc: 1 });
    }

    #[test]
    fn multi_token_argument_is_fatal() {
        let err = emit_err(&[ident("f"), LParen, Int(1), op(BinaryOp::Add), Int(2), RParen]);
        assert_eq!(err, CompileError::MultiTokenArgument { call: "f".into(), position: 1 });
        assert!(err.hint().is_some());
    }

    #[test]
    fn missing_close_paren_is_fatal() {
        let err = emit_err(&[ident("f"), LParen, Int(1)]);
        assert_eq!(err, CompileError::MissingCloseParen("f".into()));
    }

    #[test]
    fn empty_argument_is_fatal() {
        let err = emit_err(&[ident("f"), LParen, Int(1), Comma, RParen]);
        assert_eq!(err, CompileError::EmptyArgument { call: "f".into(), position: 2 });
    }

    #[test]
    fn malformed_expressions() {
        assert_eq!(emit_err(&[Int(1), op(BinaryOp::Add)]), CompileError::DanglingOperator(BinaryOp::Add));
        assert_eq!(emit_err(&[op(BinaryOp::Mul), Int(1)]), CompileError::DanglingOperator(BinaryOp::Mul));
        assert_eq!(emit_err(&[LParen, Int(1)]), CompileError::UnbalancedParens);
        assert_eq!(emit_err(&[Int(1), RParen]), CompileError::UnbalancedParens);
        assert!(matches!(emit_err(&[Int(1), Int(2)]), CompileError::UnexpectedToken(_)));
        assert!(matches!(emit_err(&[Int(1), Comma, Int(2)]), CompileError::UnexpectedToken(_)));
    }

    #[test]
    fn oversized_string_is_an_encode_error() {
        let err = emit_err(&[Str("y".repeat(300))]);
        assert_eq!(err, CompileError::Encode(EncodeError::StringTooLong));
    }

    #[test]
    fn expression_has_no_store() {
        let mut asm = Assembler::new();
        let reg = Registry::new();
        Emitter::new(&mut asm, &reg).expression(&[Int(1), op(BinaryOp::Add), Int(2)]).unwrap();
        let code = asm.assemble().unwrap();
        assert_eq!(code.instructions().unwrap().len(), 3);
        let mut asm = Assembler::new();
        assert_eq!(Emitter::new(&mut asm, &reg).expression(&[]), Err(CompileError::EmptyExpression));
    }

    #[test]
    fn branch_skips_block_on_false() {
        let mut asm = Assembler::new();
        let reg = Registry::new();
        let skip = Emitter::new(&mut asm, &reg).branch(&[Bool(false)]).unwrap();
        asm.push(int(1));
        asm.bind(skip);
        asm.push(Instruction::Halt);
        let instrs = asm.assemble().unwrap().instructions().unwrap();
        assert_eq!(instrs[1].1, Instruction::JumpIfFalse { len: 6 });
    }
}
