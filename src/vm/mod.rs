use std::collections::HashMap;
use std::fmt;
use std::io::Write;

use tracing::{debug, trace, warn};

use crate::bytecode::{Bytecode, DecodeError, Instruction, OP_HALT, OP_MARK, Scope, opcode_name};
use crate::value::{self, ArithError, CoerceError, TypeTag, Value};

pub mod builtins;
pub mod scope;

use scope::Scopes;

// ── Errors ───────────────────────────────────────────────────────────

/// Conditions that stop the machine.
#[derive(Debug, thiserror::Error)]
pub enum VmError {
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error("JUMP_IF_FALSE at offset {offset} found no guard value on the stack")]
    GuardUnderflow { offset: usize },
    #[error("jump at offset {offset} targets {target}, past the end of the stream ({len} bytes)")]
    JumpOutOfRange { offset: usize, target: usize, len: usize },
    #[error("jump at offset {offset} lands at {target}, which is not an instruction boundary")]
    MisalignedJump { offset: usize, target: usize },
    #[error("output error: {0}")]
    Output(#[from] std::io::Error),
}

impl VmError {
    pub fn offset(&self) -> Option<usize> {
        match self {
            VmError::Decode(e) => Some(e.offset()),
            VmError::GuardUnderflow { offset }
            | VmError::JumpOutOfRange { offset, .. }
            | VmError::MisalignedJump { offset, .. } => Some(*offset),
            VmError::Output(_) => None,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            VmError::Decode(_) => "MC-R001",
            VmError::GuardUnderflow { .. } => "MC-R002",
            VmError::JumpOutOfRange { .. } => "MC-R003",
            VmError::MisalignedJump { .. } => "MC-R004",
            VmError::Output(_) => "MC-R005",
        }
    }
}

/// Conditions the machine reports and steps over with a substitute value.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FaultKind {
    #[error("operand stack underflow")]
    StackUnderflow,
    #[error("unresolved variable '{0}'")]
    Unresolved(String),
    #[error("local access to '{0}' with no active call context")]
    NoLocalContext(String),
    #[error("unknown function '{0}'")]
    UnknownFunction(String),
    #[error(transparent)]
    Arith(#[from] ArithError),
    #[error(transparent)]
    Coerce(#[from] CoerceError),
    #[error("function '{0}' is marked more than once; the first mark is kept")]
    DuplicateMark(String),
    #[error("{0} value(s) left on the stack at return")]
    Leftover(usize),
}

impl FaultKind {
    pub fn code(&self) -> &'static str {
        match self {
            FaultKind::StackUnderflow => "MC-W001",
            FaultKind::Unresolved(_) => "MC-W002",
            FaultKind::NoLocalContext(_) => "MC-W003",
            FaultKind::UnknownFunction(_) => "MC-W004",
            FaultKind::Arith(ArithError::DivisionByZero) => "MC-W005",
            FaultKind::Arith(_) => "MC-W006",
            FaultKind::Coerce(_) => "MC-W007",
            FaultKind::DuplicateMark(_) => "MC-W008",
            FaultKind::Leftover(_) => "MC-W009",
        }
    }
}

/// Values shown from the top of the stack in a fault report.
const SNAPSHOT_DEPTH: usize = 8;

#[derive(Debug, Clone, PartialEq)]
pub struct Fault {
    pub kind: FaultKind,
    pub offset: usize,
    pub opcode: u8,
    /// Top of the operand stack when the fault was raised, bottom first.
    pub stack: Vec<Value>,
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} at offset {} ({})", self.kind, self.offset, opcode_name(self.opcode))
    }
}

// ── Configuration ────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct VmConfig {
    /// Function to start in when the stream marks it.
    pub entry: String,
    /// Reject jumps that land between instructions.
    pub validate_jumps: bool,
    /// Emit a `trace!` event per executed instruction.
    pub trace: bool,
}

impl Default for VmConfig {
    fn default() -> Self {
        VmConfig { entry: "main".into(), validate_jumps: cfg!(debug_assertions), trace: false }
    }
}

impl VmConfig {
    pub fn new() -> Self {
        VmConfig::default()
    }

    pub fn entry(mut self, name: &str) -> Self {
        self.entry = name.to_string();
        self
    }

    pub fn validate_jumps(mut self, on: bool) -> Self {
        self.validate_jumps = on;
        self
    }

    pub fn trace(mut self, on: bool) -> Self {
        self.trace = on;
        self
    }
}

// ── Machine ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exit {
    Halted,
    EndOfStream,
}

pub struct Vm<'c, W: Write> {
    code: &'c [u8],
    config: VmConfig,
    ip: usize,
    stack: Vec<Value>,
    scopes: Scopes,
    calls: Vec<usize>,
    functions: HashMap<String, usize>,
    /// `boundaries[i]` is set when an instruction starts at `i`; the end of
    /// the stream counts as one.
    boundaries: Vec<bool>,
    faults: Vec<Fault>,
    out: W,
    at: usize,
    op: u8,
}

impl<'c, W: Write> Vm<'c, W> {
    /// Scan the stream and position the machine at its entry point.
    pub fn new(code: &'c Bytecode, out: W, config: VmConfig) -> Result<Self, VmError> {
        let bytes = code.as_bytes();
        let mut vm = Vm {
            code: bytes,
            config,
            ip: 0,
            stack: Vec::new(),
            scopes: Scopes::new(),
            calls: Vec::new(),
            functions: HashMap::new(),
            boundaries: vec![false; bytes.len() + 1],
            faults: Vec::new(),
            out,
            at: 0,
            op: OP_HALT,
        };
        vm.scan()?;

        if let Some(&entry) = vm.functions.get(&vm.config.entry) {
            vm.ip = entry;
            vm.scopes.push_local(&vm.config.entry, 0);
            debug!(entry = %vm.config.entry, offset = entry, "entering at function");
        } else {
            debug!("no entry function; starting at offset 0");
        }
        Ok(vm)
    }

    /// One pass over the whole stream before anything runs.
    fn scan(&mut self) -> Result<(), VmError> {
        let mut offset = 0;
        while offset < self.code.len() {
            let (instr, next) = Instruction::decode(self.code, offset)?;
            self.boundaries[offset] = true;
            match instr {
                Instruction::Mark { name } => {
                    if self.functions.contains_key(&name) {
                        self.at = offset;
                        self.op = OP_MARK;
                        self.fault(FaultKind::DuplicateMark(name));
                    } else {
                        debug!(function = %name, offset, "function registered");
                        self.functions.insert(name, offset);
                    }
                }
                Instruction::Store { scope: Scope::Global, ty, name } => self.scopes.init_global(&name, ty),
                _ => {}
            }
            offset = next;
        }
        self.boundaries[self.code.len()] = true;
        debug!(bytes = self.code.len(), functions = self.functions.len(), "scan complete");
        Ok(())
    }

    pub fn run(&mut self) -> Result<Exit, VmError> {
        loop {
            if let Some(exit) = self.step()? {
                debug!(?exit, ip = self.ip, faults = self.faults.len(), "run finished");
                return Ok(exit);
            }
        }
    }

    /// Execute the instruction at the current offset.
    pub fn step(&mut self) -> Result<Option<Exit>, VmError> {
        if self.ip >= self.code.len() {
            return Ok(Some(Exit::EndOfStream));
        }
        let (instr, next) = Instruction::decode(self.code, self.ip)?;
        self.at = self.ip;
        self.op = instr.opcode();
        if self.config.trace {
            trace!(offset = self.ip, ?instr, depth = self.stack.len(), "exec");
        }

        match instr {
            Instruction::Halt => return Ok(Some(Exit::Halted)),
            Instruction::LoadConst { value } => self.stack.push(value),
            Instruction::Load { scope, name } => {
                let value = self.scopes.load(scope, &name).unwrap_or_else(|kind| {
                    self.fault(kind);
                    Value::Void
                });
                self.stack.push(value);
            }
            Instruction::Store { scope, ty, name } => {
                let value = self.pop_or(ty.default_value());
                let value = self.coerce(value, ty);
                if let Err(kind) = self.scopes.store(scope, &name, value) {
                    self.fault(kind);
                }
            }
            Instruction::Binary { kind } => {
                let right = self.pop_or(Value::Int(0));
                let left = self.pop_or(Value::Int(0));
                let result = value::binary(kind, &left, &right).unwrap_or_else(|e| {
                    let sub = e.substitute();
                    self.fault(e.into());
                    sub
                });
                self.stack.push(result);
            }
            Instruction::Negate => {
                let v = self.pop_or(Value::Int(0));
                let result = value::negate(&v).unwrap_or_else(|e| {
                    let sub = e.substitute();
                    self.fault(e.into());
                    sub
                });
                self.stack.push(result);
            }
            Instruction::Pop => {
                if self.stack.pop().is_none() {
                    self.fault(FaultKind::StackUnderflow);
                }
            }
            Instruction::Jump { len } => {
                self.ip = self.jump_target(next, len)?;
                return Ok(None);
            }
            Instruction::JumpIfFalse { len } => {
                let guard = self.stack.pop().ok_or(VmError::GuardUnderflow { offset: self.at })?;
                if !guard.is_truthy() {
                    self.ip = self.jump_target(next, len)?;
                    return Ok(None);
                }
            }
            Instruction::Call { name, argc } => {
                // first pop is the first argument
                let args: Vec<Value> = (0..argc).map(|_| self.pop_or(Value::Void)).collect();
                if let Some(&entry) = self.functions.get(&name) {
                    self.calls.push(next);
                    self.scopes.push_local(&name, self.stack.len());
                    self.stack.extend(args.into_iter().rev());
                    self.ip = entry;
                    return Ok(None);
                }
                match builtins::call(&name, &args, &mut self.out) {
                    Some(result) => result?,
                    None => self.fault(FaultKind::UnknownFunction(name)),
                }
            }
            Instruction::Mark { .. } => {}
            Instruction::Enter { ret, params } => {
                // parameters never reach below the depth recorded at `Call`
                let base = self.scopes.innermost().map_or(0, |ctx| ctx.stack_base);
                let mut bound = Vec::with_capacity(params.len());
                for p in params {
                    let v = if self.stack.len() > base {
                        self.pop_or(p.ty.default_value())
                    } else {
                        self.fault(FaultKind::StackUnderflow);
                        p.ty.default_value()
                    };
                    bound.push((p.name, self.coerce(v, p.ty)));
                }
                match self.scopes.innermost_mut() {
                    Some(ctx) => {
                        for (name, v) in bound {
                            ctx.set(&name, v);
                        }
                        ctx.ret = ret;
                    }
                    None => {
                        for (name, v) in bound {
                            if let Err(kind) = self.scopes.store(Scope::Local, &name, v) {
                                self.fault(kind);
                            }
                        }
                    }
                }
            }
            Instruction::Return => {
                if let Some(ret_to) = self.calls.pop() {
                    self.ret(ret_to);
                    return Ok(None);
                }
            }
        }
        self.ip = next;
        Ok(None)
    }

    fn ret(&mut self, ret_to: usize) {
        let (ret, base) = match self.scopes.pop_local() {
            Some(ctx) => (ctx.ret, ctx.stack_base.min(self.stack.len())),
            None => (TypeTag::Void, self.stack.len()),
        };
        let result = if ret == TypeTag::Void {
            None
        } else if self.stack.len() > base {
            let v = self.pop_or(Value::Void);
            Some(self.coerce(v, ret))
        } else {
            self.fault(FaultKind::StackUnderflow);
            Some(ret.default_value())
        };
        let leftover = self.stack.len() - base;
        if leftover > 0 {
            self.fault(FaultKind::Leftover(leftover));
            self.stack.truncate(base);
        }
        self.stack.extend(result);
        self.ip = ret_to;
    }

    fn jump_target(&self, next: usize, len: u32) -> Result<usize, VmError> {
        let target = next.saturating_add(len as usize);
        if target > self.code.len() {
            return Err(VmError::JumpOutOfRange { offset: self.at, target, len: self.code.len() });
        }
        if self.config.validate_jumps && !self.boundaries[target] {
            return Err(VmError::MisalignedJump { offset: self.at, target });
        }
        Ok(target)
    }

    fn pop_or(&mut self, default: Value) -> Value {
        match self.stack.pop() {
            Some(v) => v,
            None => {
                self.fault(FaultKind::StackUnderflow);
                default
            }
        }
    }

    fn coerce(&mut self, v: Value, ty: TypeTag) -> Value {
        v.coerce(ty).unwrap_or_else(|e| {
            let sub = e.substitute();
            self.fault(e.into());
            sub
        })
    }

    fn fault(&mut self, kind: FaultKind) {
        let from = self.stack.len().saturating_sub(SNAPSHOT_DEPTH);
        let fault = Fault { kind, offset: self.at, opcode: self.op, stack: self.stack[from..].to_vec() };
        warn!(offset = fault.offset, opcode = opcode_name(fault.opcode), stack = ?fault.stack, "{}", fault.kind);
        self.faults.push(fault);
    }

    // ── Inspection ──

    pub fn faults(&self) -> &[Fault] {
        &self.faults
    }

    pub fn global(&self, name: &str) -> Option<&Value> {
        self.scopes.global().get(name)
    }

    pub fn stack(&self) -> &[Value] {
        &self.stack
    }

    pub fn ip(&self) -> usize {
        self.ip
    }

    pub fn call_depth(&self) -> usize {
        self.calls.len()
    }

    pub fn local_depth(&self) -> usize {
        self.scopes.depth()
    }

    pub fn function_offset(&self, name: &str) -> Option<usize> {
        self.functions.get(name).copied()
    }

    pub fn into_output(self) -> W {
        self.out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::{Assembler, Param};
    use crate::{compiler, lexer, parser};

    fn build(source: &str) -> Bytecode {
        let (prog, errors) = parser::parse(lexer::lex(source).unwrap());
        assert!(errors.is_empty(), "parse errors: {:?}", errors);
        compiler::compile(&prog).unwrap()
    }

    fn run_vm(code: &Bytecode) -> Vm<'_, Vec<u8>> {
        let mut vm = Vm::new(code, Vec::new(), VmConfig::new().validate_jumps(true)).unwrap();
        vm.run().unwrap();
        vm
    }

    fn stdout(vm: Vm<'_, Vec<u8>>) -> String {
        String::from_utf8(vm.into_output()).unwrap()
    }

    fn assemble(instrs: Vec<Instruction>) -> Bytecode {
        let mut asm = Assembler::new();
        for i in instrs {
            asm.push(i);
        }
        asm.assemble().unwrap()
    }

    fn int(n: i32) -> Instruction {
        Instruction::LoadConst { value: Value::Int(n) }
    }

    #[test]
    fn integer_addition() {
        let code = build("int a = 20; int b = 22; int x = a + b;");
        let vm = run_vm(&code);
        assert_eq!(vm.global("x"), Some(&Value::Int(42)));
        assert!(vm.faults().is_empty());
    }

    #[test]
    fn string_concatenation() {
        let code = build("string s1 = \"foo\"; string s2 = \"bar\"; string x = s1 + s2;");
        let vm = run_vm(&code);
        assert_eq!(vm.global("x"), Some(&Value::Str("foobar".into())));
    }

    #[test]
    fn division_by_zero_continues() {
        let code = build("float x = 1 / 0; int after = 7;");
        let vm = run_vm(&code);
        assert_eq!(vm.global("x"), Some(&Value::Float(f32::INFINITY)));
        assert_eq!(vm.global("after"), Some(&Value::Int(7)));
        assert_eq!(vm.faults().len(), 1);
        assert_eq!(vm.faults()[0].kind, FaultKind::Arith(ArithError::DivisionByZero));
        assert_eq!(vm.faults()[0].opcode, crate::bytecode::OP_DIV);
    }

    #[test]
    fn arguments_bind_in_declared_order() {
        let code = build(
            "int ga; int gb; int gc;
             void f(int a, int b, int c) { ga = a; gb = b; gc = c; }
             void main() { f(1, 2, 3); }",
        );
        let vm = run_vm(&code);
        assert_eq!(vm.global("ga"), Some(&Value::Int(1)));
        assert_eq!(vm.global("gb"), Some(&Value::Int(2)));
        assert_eq!(vm.global("gc"), Some(&Value::Int(3)));
    }

    #[test]
    fn return_with_empty_call_stack_is_a_no_op() {
        let code = assemble(vec![int(4), Instruction::Return, Instruction::Halt]);
        let mut vm = Vm::new(&code, Vec::new(), VmConfig::new()).unwrap();
        vm.step().unwrap();
        let before = (vm.local_depth(), vm.stack().to_vec());
        assert_eq!(vm.step().unwrap(), None);
        assert_eq!(vm.ip(), 7);
        assert_eq!((vm.local_depth(), vm.stack().to_vec()), before);
        assert_eq!(vm.step().unwrap(), Some(Exit::Halted));
    }

    #[test]
    fn false_guard_skips_exactly_the_block() {
        let mut asm = Assembler::new();
        let skip = asm.new_label();
        asm.push(Instruction::LoadConst { value: Value::Bool(false) });
        asm.jump_if_false(skip);
        asm.push(int(1));
        asm.push(int(2));
        asm.push(int(3));
        asm.bind(skip);
        asm.push(Instruction::Halt);
        let code = asm.assemble().unwrap();
        let mut vm = Vm::new(&code, Vec::new(), VmConfig::new().validate_jumps(true)).unwrap();
        vm.step().unwrap();
        vm.step().unwrap();
        // guard at 3, length field ends at 8, block is three 6-byte loads
        assert_eq!(vm.ip(), 8 + 18);
        assert!(vm.stack().is_empty());
    }

    #[test]
    fn true_guard_falls_through() {
        let code = build("int x; if (1 < 2) { x = 1; } else { x = 2; }");
        assert_eq!(run_vm(&code).global("x"), Some(&Value::Int(1)));
        let code = build("int x; if (2 < 1) { x = 1; } else if (false) { x = 2; } else { x = 3; }");
        assert_eq!(run_vm(&code).global("x"), Some(&Value::Int(3)));
    }

    #[test]
    fn local_shadows_global() {
        let code = build("int x = 1; int f() { int x = 2; return x; } int r = f();");
        let vm = run_vm(&code);
        assert_eq!(vm.global("r"), Some(&Value::Int(2)));
        assert_eq!(vm.global("x"), Some(&Value::Int(1)));
    }

    #[test]
    fn main_is_entered_directly() {
        let code = build("void main() { println(\"in main\"); } println(\"top\");");
        let vm = run_vm(&code);
        assert_eq!(stdout(vm), "top\nin main\n");
    }

    #[test]
    fn top_level_runs_without_main() {
        let code = build("void hello() { println(\"hi\"); } println(\"start\"); hello(); println(\"end\");");
        assert_eq!(stdout(run_vm(&code)), "start\nhi\nend\n");
    }

    #[test]
    fn recursion_with_temporaries() {
        let code = build(
            "int fact(int n) { if (n <= 1) { return 1; } int m = n - 1; return n * fact(m); }
             int r;
             void main() { r = fact(10); }",
        );
        let vm = run_vm(&code);
        assert_eq!(vm.global("r"), Some(&Value::Int(3628800)));
        assert_eq!(vm.call_depth(), 0);
        assert!(vm.faults().is_empty(), "{:?}", vm.faults());
    }

    #[test]
    fn return_value_is_coerced() {
        let code = build("int half(float f) { return f / 2; } int r = half(7);");
        let vm = run_vm(&code);
        assert_eq!(vm.global("r"), Some(&Value::Int(3)));
    }

    #[test]
    fn unknown_function_falls_through() {
        let code = assemble(vec![int(1), Instruction::Call { name: "nope".into(), argc: 1 }, int(2), Instruction::Halt]);
        let vm = run_vm(&code);
        assert_eq!(vm.stack(), &[Value::Int(2)]);
        assert_eq!(vm.faults()[0].kind, FaultKind::UnknownFunction("nope".into()));
    }

    #[test]
    fn unresolved_load_yields_void() {
        let code = assemble(vec![Instruction::Load { scope: Scope::Resolve, name: "ghost".into() }]);
        let mut vm = Vm::new(&code, Vec::new(), VmConfig::new()).unwrap();
        assert_eq!(vm.run().unwrap(), Exit::EndOfStream);
        assert_eq!(vm.stack(), &[Value::Void]);
        assert_eq!(vm.faults()[0].kind, FaultKind::Unresolved("ghost".into()));
    }

    #[test]
    fn arithmetic_underflow_substitutes() {
        let code = assemble(vec![Instruction::Binary { kind: crate::value::BinaryOp::Add }]);
        let vm = run_vm(&code);
        assert_eq!(vm.stack(), &[Value::Int(0)]);
        assert_eq!(vm.faults().len(), 2);
    }

    #[test]
    fn guard_underflow_is_fatal() {
        let code = assemble(vec![Instruction::JumpIfFalse { len: 0 }]);
        let mut vm = Vm::new(&code, Vec::new(), VmConfig::new()).unwrap();
        assert!(matches!(vm.run(), Err(VmError::GuardUnderflow { offset: 0 })));
    }

    #[test]
    fn jump_past_end_is_fatal() {
        let code = assemble(vec![Instruction::Jump { len: 100 }]);
        let mut vm = Vm::new(&code, Vec::new(), VmConfig::new()).unwrap();
        assert!(matches!(vm.run(), Err(VmError::JumpOutOfRange { target: 105, len: 5, .. })));
    }

    #[test]
    fn misaligned_jump_rejected_when_validating() {
        // lands inside the LoadConst operand
        let code = assemble(vec![Instruction::Jump { len: 1 }, int(9), Instruction::Halt]);
        let mut vm = Vm::new(&code, Vec::new(), VmConfig::new().validate_jumps(true)).unwrap();
        assert!(matches!(vm.run(), Err(VmError::MisalignedJump { offset: 0, target: 6 })));
    }

    #[test]
    fn decode_error_in_scan_is_fatal() {
        let code = Bytecode::new(vec![0x01, 0x00, 0x01, 0xEE]);
        let err = Vm::new(&code, Vec::new(), VmConfig::new()).err().unwrap();
        assert!(matches!(err, VmError::Decode(DecodeError::Truncated { offset: 0, .. })));
    }

    #[test]
    fn duplicate_mark_keeps_first() {
        let code = assemble(vec![
            Instruction::Mark { name: "f".into() },
            Instruction::Halt,
            Instruction::Mark { name: "f".into() },
        ]);
        let vm = Vm::new(&code, Vec::new(), VmConfig::new()).unwrap();
        assert_eq!(vm.function_offset("f"), Some(0));
        assert_eq!(vm.faults()[0].kind, FaultKind::DuplicateMark("f".into()));
        assert_eq!(vm.faults()[0].offset, 4);
    }

    #[test]
    fn scan_initialises_globals() {
        let code = assemble(vec![
            Instruction::Halt,
            Instruction::Store { scope: Scope::Global, ty: TypeTag::String, name: "later".into() },
        ]);
        let mut vm = Vm::new(&code, Vec::new(), VmConfig::new()).unwrap();
        vm.run().unwrap();
        assert_eq!(vm.global("later"), Some(&Value::Str(String::new())));
    }

    #[test]
    fn store_coerces_to_declared_type() {
        let code = build("int i = 3.9; string s = 12; bool b = \"\"; char c = 65;");
        let vm = run_vm(&code);
        assert_eq!(vm.global("i"), Some(&Value::Int(3)));
        assert_eq!(vm.global("s"), Some(&Value::Str("12".into())));
        assert_eq!(vm.global("b"), Some(&Value::Bool(false)));
        assert_eq!(vm.global("c"), Some(&Value::Char('A')));
    }

    #[test]
    fn failed_coercion_stores_default() {
        let code = build("int i = \"twelve\";");
        let vm = run_vm(&code);
        assert_eq!(vm.global("i"), Some(&Value::Int(0)));
        assert!(matches!(vm.faults()[0].kind, FaultKind::Coerce(_)));
    }

    #[test]
    fn missing_parameters_default() {
        let code = assemble(vec![
            Instruction::Mark { name: "main".into() },
            Instruction::Enter { ret: TypeTag::Void, params: vec![Param { ty: TypeTag::Float, name: "p".into() }] },
            Instruction::Load { scope: Scope::Local, name: "p".into() },
            Instruction::Halt,
        ]);
        let vm = run_vm(&code);
        assert_eq!(vm.stack(), &[Value::Float(0.0)]);
        assert_eq!(vm.faults()[0].kind, FaultKind::StackUnderflow);
    }

    #[test]
    fn leftover_values_are_dropped_at_return() {
        let code = assemble(vec![
            Instruction::Call { name: "f".into(), argc: 0 },
            Instruction::Halt,
            Instruction::Mark { name: "f".into() },
            Instruction::Enter { ret: TypeTag::Int, params: vec![] },
            int(1),
            int(2),
            Instruction::Return,
        ]);
        let vm = run_vm(&code);
        assert_eq!(vm.stack(), &[Value::Int(2)]);
        assert_eq!(vm.faults()[0].kind, FaultKind::Leftover(1));
    }

    fn call_f(argc: u8, params: &[&str]) -> Bytecode {
        let params = params.iter().map(|n| Param { ty: TypeTag::Int, name: n.to_string() }).collect();
        assemble(vec![
            int(100),
            int(1),
            int(2),
            Instruction::Call { name: "f".into(), argc },
            Instruction::Halt,
            Instruction::Mark { name: "f".into() },
            Instruction::Enter { ret: TypeTag::Int, params },
            int(7),
            Instruction::Return,
        ])
    }

    #[test]
    fn surplus_arguments_do_not_leak_into_caller() {
        let code = call_f(2, &["a"]);
        let vm = run_vm(&code);
        assert_eq!(vm.stack(), &[Value::Int(100), Value::Int(7)]);
        assert_eq!(vm.faults().len(), 1);
        assert_eq!(vm.faults()[0].kind, FaultKind::Leftover(1));
    }

    #[test]
    fn missing_arguments_do_not_consume_caller_operands() {
        let code = call_f(1, &["a", "b"]);
        let vm = run_vm(&code);
        assert_eq!(vm.stack(), &[Value::Int(100), Value::Int(1), Value::Int(7)]);
        assert_eq!(vm.faults().len(), 1);
        assert_eq!(vm.faults()[0].kind, FaultKind::StackUnderflow);
    }

    #[test]
    fn oversized_repetition_faults_and_continues() {
        let code = build("string s = \"abcdefgh\" * 2147483647; println(\"after\");");
        let vm = run_vm(&code);
        assert_eq!(vm.faults().len(), 1);
        assert!(matches!(vm.faults()[0].kind, FaultKind::Arith(ArithError::StringTooLong(_))));
        assert_eq!(vm.global("s"), Some(&Value::Str(String::new())));
        assert_eq!(stdout(vm), "after\n");
    }

    #[test]
    fn builtin_output_order() {
        let code = build("print(\"a\"); print(1, 2.5); println(true);");
        assert_eq!(stdout(run_vm(&code)), "a1 2.5true\n");
    }

    #[test]
    fn string_repetition_and_mixed_math() {
        let code = build("string s = \"ab\" * 3; float f = 1 + 0.5; int w = 2147483647 + 1;");
        let vm = run_vm(&code);
        assert_eq!(vm.global("s"), Some(&Value::Str("ababab".into())));
        assert_eq!(vm.global("f"), Some(&Value::Float(1.5)));
        assert_eq!(vm.global("w"), Some(&Value::Int(i32::MIN)));
    }
}
