//! Syntax tree → instruction stream.
//!
//! Layout: each function is wrapped in a `Jump` over its body so straight-line
//! execution never falls into it. With an entry function present, top-level
//! statements are hoisted into it right after its prologue; otherwise they run
//! in source order from offset 0. The stream always ends in `Halt`.

use tracing::debug;

use crate::ast::{ExprToken, Function, Item, Program, Span, Stmt, VarDecl};
use crate::bytecode::{Assembler, Bytecode, Instruction, Scope};
use crate::emitter::{CompileError, Emitter};
use crate::symbols::{DeclareError, Registry, SymbolKind, SymbolTable, is_builtin};
use crate::value::TypeTag;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{error}")]
pub struct LocatedError {
    pub error: CompileError,
    pub span: Span,
}

/// What the statement being compiled sits inside.
struct Frame<'p> {
    name: &'p str,
    ret: TypeTag,
    /// Return also halts: the entry function and top-level code.
    halts: bool,
    scope: Scope,
}

pub struct Compiler {
    entry: String,
    registry: Registry,
    errors: Vec<LocatedError>,
}

pub fn compile(program: &Program) -> Result<Bytecode, Vec<LocatedError>> {
    Compiler::new("main").compile(program)
}

impl Compiler {
    pub fn new(entry: &str) -> Self {
        Compiler { entry: entry.to_string(), registry: Registry::new(), errors: Vec::new() }
    }

    fn err(&mut self, error: CompileError, span: Span) {
        self.errors.push(LocatedError { error, span });
    }

    pub fn compile(mut self, program: &Program) -> Result<Bytecode, Vec<LocatedError>> {
        self.declare(program);

        let has_entry = program.functions().any(|f| f.name == self.entry);
        let top_frame = Frame { name: "<top level>", ret: TypeTag::Void, halts: true, scope: Scope::Global };

        let mut hoisted = None;
        if has_entry {
            let mut top = Assembler::new();
            for item in &program.items {
                self.top_level(item, &top_frame, &mut top);
            }
            hoisted = Some(top);
        }

        let mut out = Assembler::new();
        let mut seen = std::collections::HashSet::new();
        for item in &program.items {
            match item {
                Item::Function(f) => {
                    if !seen.insert(f.name.as_str()) {
                        // reported by `declare`
                        continue;
                    }
                    let top = if f.name == self.entry { hoisted.take() } else { None };
                    let asm = self.function(f, top);
                    out.append(asm);
                }
                other if !has_entry => self.top_level(other, &top_frame, &mut out),
                _ => {}
            }
        }
        out.push(Instruction::Halt);

        if !self.errors.is_empty() {
            return Err(self.errors);
        }
        out.assemble().map_err(|e| vec![LocatedError { error: e.into(), span: Span::UNKNOWN }])
    }

    /// Pre-declare every function and global so bodies may refer forward.
    fn declare(&mut self, program: &Program) {
        for f in program.functions() {
            if let Err(DeclareError::Duplicate(name)) =
                self.registry.declare_function(&f.name, f.ret, f.params.clone())
            {
                self.err(CompileError::DuplicateFunction(name), f.span);
            }
        }
        for d in program.globals() {
            if d.ty == TypeTag::Void {
                self.err(CompileError::VoidVariable(d.name.clone()), d.span);
                continue;
            }
            if let Err(DeclareError::Duplicate(name)) = self.registry.declare_global(&d.name, d.ty) {
                self.err(CompileError::DuplicateGlobal(name), d.span);
            }
        }
    }

    fn top_level(&mut self, item: &Item, frame: &Frame, asm: &mut Assembler) {
        match item {
            Item::Global(d) if d.ty != TypeTag::Void => self.initializer(d, Scope::Global, asm),
            Item::Global(_) | Item::Function(_) => {}
            Item::Stmt(s) => self.stmt(s, frame, asm),
        }
    }

    fn function(&mut self, f: &Function, hoisted: Option<Assembler>) -> Assembler {
        let mut asm = Assembler::new();
        let over = asm.new_label();
        asm.jump(over);

        for p in &f.params {
            if p.ty == TypeTag::Void {
                self.err(CompileError::VoidVariable(p.name.clone()), f.span);
            }
        }
        let prologue = Emitter::new(&mut asm, &self.registry).prologue(&f.name, f.ret, &f.params);
        if let Err(error) = prologue {
            self.err(error, f.span);
        }
        if let Some(top) = hoisted {
            asm.append(top);
        }

        let frame = Frame { name: &f.name, ret: f.ret, halts: f.name == self.entry, scope: Scope::Local };
        self.registry.enter_function(&f.params);
        for stmt in &f.body {
            self.stmt(stmt, &frame, &mut asm);
        }
        self.registry.leave_function();

        if f.ret != TypeTag::Void {
            asm.push(Instruction::LoadConst { value: f.ret.default_value() });
        }
        asm.push(Instruction::Return);
        if frame.halts {
            asm.push(Instruction::Halt);
        }
        asm.bind(over);
        debug!(function = %f.name, params = f.params.len(), "function compiled");
        asm
    }

    fn stmt(&mut self, stmt: &Stmt, frame: &Frame, asm: &mut Assembler) {
        if let Err(error) = self.try_stmt(stmt, frame, asm) {
            self.err(error, stmt.span());
        }
    }

    fn try_stmt(&mut self, stmt: &Stmt, frame: &Frame, asm: &mut Assembler) -> Result<(), CompileError> {
        match stmt {
            Stmt::Decl(d) => {
                if d.ty == TypeTag::Void {
                    return Err(CompileError::VoidVariable(d.name.clone()));
                }
                self.check_value(&d.init)?;
                let mut emitter = Emitter::new(asm, &self.registry);
                emitter.assignment(d.ty, &d.name, frame.scope, &d.init)?;
                // declared after its initializer: `int x = x;` reads the outer x
                self.registry
                    .declare_local(&d.name, d.ty)
                    .map_err(|DeclareError::Duplicate(name)| CompileError::DuplicateGlobal(name))
            }
            Stmt::Assign { name, value, .. } => {
                let (scope, ty) = match self.registry.get(name) {
                    None => return Err(self.undefined(name)),
                    Some(sym) => match sym.kind {
                        SymbolKind::Function => return Err(CompileError::NotAVariable(name.clone())),
                        SymbolKind::Global => (Scope::Global, sym.ty),
                        SymbolKind::Local | SymbolKind::Parameter => (Scope::Local, sym.ty),
                    },
                };
                self.check_value(value)?;
                Emitter::new(asm, &self.registry).assignment(ty, name, scope, value)
            }
            Stmt::Call { tokens, .. } => {
                let single = match tokens.first() {
                    Some(ExprToken::Ident(_)) => matching_paren(tokens, 1) == Some(tokens.len() - 1),
                    _ => false,
                };
                if single {
                    self.check_tokens(tokens, true)?;
                } else {
                    self.check_value(tokens)?;
                }
                Emitter::new(asm, &self.registry).expression(tokens)?;
                if !single || self.leaves_value(tokens) {
                    asm.push(Instruction::Pop);
                }
                Ok(())
            }
            Stmt::If { cond, then_body, else_body, .. } => {
                self.check_value(cond)?;
                let skip = Emitter::new(asm, &self.registry).branch(cond)?;
                for s in then_body {
                    self.stmt(s, frame, asm);
                }
                match else_body {
                    Some(else_body) => {
                        let end = asm.new_label();
                        asm.jump(end);
                        asm.bind(skip);
                        for s in else_body {
                            self.stmt(s, frame, asm);
                        }
                        asm.bind(end);
                    }
                    None => asm.bind(skip),
                }
                Ok(())
            }
            Stmt::Return { value, .. } => {
                match (value, frame.ret) {
                    (Some(_), TypeTag::Void) => return Err(CompileError::ReturnValueInVoid(frame.name.to_string())),
                    (None, TypeTag::Void) => {}
                    (None, _) => return Err(CompileError::MissingReturnValue(frame.name.to_string())),
                    (Some(tokens), _) => {
                        self.check_value(tokens)?;
                        Emitter::new(asm, &self.registry).expression(tokens)?;
                    }
                }
                asm.push(Instruction::Return);
                if frame.halts {
                    asm.push(Instruction::Halt);
                }
                Ok(())
            }
        }
    }

    fn initializer(&mut self, d: &VarDecl, scope: Scope, asm: &mut Assembler) {
        let result = self
            .check_value(&d.init)
            .and_then(|()| Emitter::new(asm, &self.registry).assignment(d.ty, &d.name, scope, &d.init));
        if let Err(error) = result {
            self.err(error, d.span);
        }
    }

    /// A call statement to a user function with a result leaves it on the stack.
    fn leaves_value(&self, tokens: &[ExprToken]) -> bool {
        match tokens.first() {
            Some(ExprToken::Ident(name)) => self.registry.function(name).is_some_and(|f| f.ty != TypeTag::Void),
            _ => false,
        }
    }

    fn undefined(&self, name: &str) -> CompileError {
        CompileError::Undefined { name: name.to_string(), suggestion: self.registry.closest(name) }
    }

    fn check_value(&self, tokens: &[ExprToken]) -> Result<(), CompileError> {
        self.check_tokens(tokens, false)
    }

    /// Resolve every identifier in `tokens`. When `statement` is set the call
    /// at the head of the list may be void.
    fn check_tokens(&self, tokens: &[ExprToken], statement: bool) -> Result<(), CompileError> {
        for (i, tok) in tokens.iter().enumerate() {
            let ExprToken::Ident(name) = tok else { continue };
            if tokens.get(i + 1) != Some(&ExprToken::LParen) {
                match self.registry.get(name) {
                    None => return Err(self.undefined(name)),
                    Some(sym) if sym.kind == SymbolKind::Function => {
                        return Err(CompileError::NotAVariable(name.clone()));
                    }
                    Some(_) => continue,
                }
            }
            let as_value = !(statement && i == 0);
            if is_builtin(name) {
                if as_value {
                    return Err(CompileError::VoidValue(name.clone()));
                }
                continue;
            }
            let Some(func) = self.registry.function(name) else {
                return Err(match self.registry.get(name) {
                    Some(_) => CompileError::NotAFunction(name.clone()),
                    None => self.undefined(name),
                });
            };
            if as_value && func.ty == TypeTag::Void {
                return Err(CompileError::VoidValue(name.clone()));
            }
            // an unclosed call is reported by the emitter
            if let Some(close) = matching_paren(tokens, i + 1) {
                let found = count_arguments(&tokens[i + 2..close]);
                if found != func.params.len() {
                    return Err(CompileError::ArityMismatch { name: name.clone(), expected: func.params.len(), found });
                }
            }
        }
        Ok(())
    }
}

/// Index of the `)` matching the `(` at `open`.
fn matching_paren(tokens: &[ExprToken], open: usize) -> Option<usize> {
    if tokens.get(open) != Some(&ExprToken::LParen) {
        return None;
    }
    let mut depth = 0usize;
    for (j, tok) in tokens.iter().enumerate().skip(open) {
        match tok {
            ExprToken::LParen => depth += 1,
            ExprToken::RParen => {
                depth -= 1;
                if depth == 0 {
                    return Some(j);
                }
            }
            _ => {}
        }
    }
    None
}

fn count_arguments(inner: &[ExprToken]) -> usize {
    if inner.is_empty() {
        return 0;
    }
    let mut depth = 0usize;
    let mut count = 1;
    for tok in inner {
        match tok {
            ExprToken::LParen => depth += 1,
            ExprToken::RParen => depth = depth.saturating_sub(1),
            ExprToken::Comma if depth == 0 => count += 1,
            _ => {}
        }
    }
    count
}
