use serde::Serialize;

use crate::value::{BinaryOp, TypeTag, Value};

pub mod assembler;
pub use assembler::{Assembler, Label};

// ── Opcodes ─────────────────────────────────────────────────────────
//
// Every instruction is one opcode byte followed by its operands. Names and
// string constants are length-prefixed with one byte; jump block lengths are
// four little-endian bytes counted from the byte after the length field.

pub const OP_HALT: u8 = 0x00;
pub const OP_LOAD_CONST: u8 = 0x01;
pub const OP_LOAD_VAR: u8 = 0x02;
pub const OP_LOAD_GLOBAL: u8 = 0x03;
pub const OP_LOAD_LOCAL: u8 = 0x04;
pub const OP_STORE_VAR: u8 = 0x05;
pub const OP_STORE_GLOBAL: u8 = 0x06;
pub const OP_STORE_LOCAL: u8 = 0x07;

pub const OP_ADD: u8 = 0x10;
pub const OP_SUB: u8 = 0x11;
pub const OP_MUL: u8 = 0x12;
pub const OP_DIV: u8 = 0x13;
pub const OP_MOD: u8 = 0x14;
pub const OP_NEG: u8 = 0x15;
pub const OP_EQ: u8 = 0x18;
pub const OP_NE: u8 = 0x19;
pub const OP_LT: u8 = 0x1A;
pub const OP_LE: u8 = 0x1B;
pub const OP_GT: u8 = 0x1C;
pub const OP_GE: u8 = 0x1D;
pub const OP_POP: u8 = 0x1F;

pub const OP_JUMP: u8 = 0x20;
pub const OP_JUMP_IF_FALSE: u8 = 0x21;

pub const OP_CALL: u8 = 0x30;
pub const OP_MARK: u8 = 0x31;
pub const OP_ENTER: u8 = 0x32;
pub const OP_RETURN: u8 = 0x33;

/// Encoded size of `Jump`/`JumpIfFalse`: opcode + 4-byte length.
pub const JUMP_SIZE: usize = 5;

pub fn opcode_name(op: u8) -> &'static str {
    match op {
        OP_HALT => "HALT",
        OP_LOAD_CONST => "LOAD_CONST",
        OP_LOAD_VAR => "LOAD_VAR",
        OP_LOAD_GLOBAL => "LOAD_GLOBAL",
        OP_LOAD_LOCAL => "LOAD_LOCAL",
        OP_STORE_VAR => "STORE_VAR",
        OP_STORE_GLOBAL => "STORE_GLOBAL",
        OP_STORE_LOCAL => "STORE_LOCAL",
        OP_ADD => "ADD",
        OP_SUB => "SUB",
        OP_MUL => "MUL",
        OP_DIV => "DIV",
        OP_MOD => "MOD",
        OP_NEG => "NEG",
        OP_EQ => "EQ",
        OP_NE => "NE",
        OP_LT => "LT",
        OP_LE => "LE",
        OP_GT => "GT",
        OP_GE => "GE",
        OP_POP => "POP",
        OP_JUMP => "JUMP",
        OP_JUMP_IF_FALSE => "JUMP_IF_FALSE",
        OP_CALL => "CALL",
        OP_MARK => "MARK",
        OP_ENTER => "ENTER",
        OP_RETURN => "RETURN",
        _ => "?",
    }
}

fn op_label(op: &u8) -> &'static str {
    opcode_name(*op)
}

fn binary_opcode(op: BinaryOp) -> u8 {
    match op {
        BinaryOp::Add => OP_ADD,
        BinaryOp::Sub => OP_SUB,
        BinaryOp::Mul => OP_MUL,
        BinaryOp::Div => OP_DIV,
        BinaryOp::Mod => OP_MOD,
        BinaryOp::Eq => OP_EQ,
        BinaryOp::Ne => OP_NE,
        BinaryOp::Lt => OP_LT,
        BinaryOp::Le => OP_LE,
        BinaryOp::Gt => OP_GT,
        BinaryOp::Ge => OP_GE,
    }
}

fn binary_from_opcode(op: u8) -> Option<BinaryOp> {
    Some(match op {
        OP_ADD => BinaryOp::Add,
        OP_SUB => BinaryOp::Sub,
        OP_MUL => BinaryOp::Mul,
        OP_DIV => BinaryOp::Div,
        OP_MOD => BinaryOp::Mod,
        OP_EQ => BinaryOp::Eq,
        OP_NE => BinaryOp::Ne,
        OP_LT => BinaryOp::Lt,
        OP_LE => BinaryOp::Le,
        OP_GT => BinaryOp::Gt,
        OP_GE => BinaryOp::Ge,
        _ => return None,
    })
}

// ── Instructions ────────────────────────────────────────────────────

/// Which context a load or store addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    /// Innermost local context first, then the global one.
    Resolve,
    Global,
    Local,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Param {
    pub ty: TypeTag,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Instruction {
    Halt,
    LoadConst { value: Value },
    Load { scope: Scope, name: String },
    Store { scope: Scope, ty: TypeTag, name: String },
    Binary { kind: BinaryOp },
    Negate,
    Pop,
    Jump { len: u32 },
    JumpIfFalse { len: u32 },
    Call { name: String, argc: u8 },
    Mark { name: String },
    Enter { ret: TypeTag, params: Vec<Param> },
    Return,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EncodeError {
    #[error("name '{0}' is longer than 255 bytes")]
    NameTooLong(String),
    #[error("string constant is longer than 255 bytes")]
    StringTooLong,
    #[error("char '{0}' does not fit in one byte")]
    CharOutOfRange(char),
    #[error("'{0}' takes more than 255 arguments or parameters")]
    TooManyArgs(String),
    #[error("jump label was never bound")]
    UnboundLabel,
    #[error("jump to a label behind it (offset {target} < {from})")]
    BackwardJump { from: usize, target: usize },
    #[error("block of {0} bytes does not fit a jump length")]
    BlockTooLarge(usize),
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DecodeError {
    #[error("unknown opcode 0x{op:02x} at offset {offset}")]
    UnknownOpcode { offset: usize, op: u8 },
    #[error("unknown type tag {tag} in {} at offset {offset}", op_label(.op))]
    UnknownTag { offset: usize, op: u8, tag: u8 },
    #[error("{} at offset {offset} runs past the end of the stream", op_label(.op))]
    Truncated { offset: usize, op: u8 },
    #[error("invalid UTF-8 in {} at offset {offset}", op_label(.op))]
    InvalidUtf8 { offset: usize, op: u8 },
}

impl DecodeError {
    pub fn offset(&self) -> usize {
        match self {
            DecodeError::UnknownOpcode { offset, .. }
            | DecodeError::UnknownTag { offset, .. }
            | DecodeError::Truncated { offset, .. }
            | DecodeError::InvalidUtf8 { offset, .. } => *offset,
        }
    }
}

impl Instruction {
    pub fn opcode(&self) -> u8 {
        match self {
            Instruction::Halt => OP_HALT,
            Instruction::LoadConst { .. } => OP_LOAD_CONST,
            Instruction::Load { scope: Scope::Resolve, .. } => OP_LOAD_VAR,
            Instruction::Load { scope: Scope::Global, .. } => OP_LOAD_GLOBAL,
            Instruction::Load { scope: Scope::Local, .. } => OP_LOAD_LOCAL,
            Instruction::Store { scope: Scope::Resolve, .. } => OP_STORE_VAR,
            Instruction::Store { scope: Scope::Global, .. } => OP_STORE_GLOBAL,
            Instruction::Store { scope: Scope::Local, .. } => OP_STORE_LOCAL,
            Instruction::Binary { kind } => binary_opcode(*kind),
            Instruction::Negate => OP_NEG,
            Instruction::Pop => OP_POP,
            Instruction::Jump { .. } => OP_JUMP,
            Instruction::JumpIfFalse { .. } => OP_JUMP_IF_FALSE,
            Instruction::Call { .. } => OP_CALL,
            Instruction::Mark { .. } => OP_MARK,
            Instruction::Enter { .. } => OP_ENTER,
            Instruction::Return => OP_RETURN,
        }
    }

    /// Number of bytes `encode` appends.
    pub fn encoded_len(&self) -> usize {
        1 + match self {
            Instruction::Halt
            | Instruction::Binary { .. }
            | Instruction::Negate
            | Instruction::Pop
            | Instruction::Return => 0,
            Instruction::LoadConst { value } => 1 + match value {
                Value::Int(_) | Value::Float(_) => 4,
                Value::Str(s) => 1 + s.len(),
                Value::Char(_) | Value::Bool(_) => 1,
                Value::Void => 0,
            },
            Instruction::Load { name, .. } | Instruction::Mark { name } => 1 + name.len(),
            Instruction::Store { name, .. } => 2 + name.len(),
            Instruction::Jump { .. } | Instruction::JumpIfFalse { .. } => 4,
            Instruction::Call { name, .. } => 2 + name.len(),
            Instruction::Enter { params, .. } => {
                2 + params.iter().map(|p| 2 + p.name.len()).sum::<usize>()
            }
        }
    }

    pub fn encode(&self, out: &mut Vec<u8>) -> Result<(), EncodeError> {
        out.push(self.opcode());
        match self {
            Instruction::Halt
            | Instruction::Binary { .. }
            | Instruction::Negate
            | Instruction::Pop
            | Instruction::Return => {}
            Instruction::LoadConst { value } => {
                out.push(value.tag().as_byte());
                match value {
                    Value::Int(n) => out.extend_from_slice(&n.to_le_bytes()),
                    Value::Float(f) => out.extend_from_slice(&f.to_le_bytes()),
                    Value::Str(s) => {
                        let len = u8::try_from(s.len()).map_err(|_| EncodeError::StringTooLong)?;
                        out.push(len);
                        out.extend_from_slice(s.as_bytes());
                    }
                    Value::Char(c) => {
                        let b = u8::try_from(u32::from(*c)).map_err(|_| EncodeError::CharOutOfRange(*c))?;
                        out.push(b);
                    }
                    Value::Bool(b) => out.push(u8::from(*b)),
                    Value::Void => {}
                }
            }
            Instruction::Load { name, .. } | Instruction::Mark { name } => push_name(out, name)?,
            Instruction::Store { ty, name, .. } => {
                out.push(ty.as_byte());
                push_name(out, name)?;
            }
            Instruction::Jump { len } | Instruction::JumpIfFalse { len } => {
                out.extend_from_slice(&len.to_le_bytes());
            }
            Instruction::Call { name, argc } => {
                push_name(out, name)?;
                out.push(*argc);
            }
            Instruction::Enter { ret, params } => {
                out.push(ret.as_byte());
                let count = u8::try_from(params.len()).map_err(|_| EncodeError::TooManyArgs("enter".into()))?;
                out.push(count);
                for p in params {
                    out.push(p.ty.as_byte());
                    push_name(out, &p.name)?;
                }
            }
        }
        Ok(())
    }

    /// Decode the instruction starting at `offset`. Returns it with the offset
    /// of the next instruction.
    pub fn decode(code: &[u8], offset: usize) -> Result<(Instruction, usize), DecodeError> {
        let mut r = Reader::new(code, offset)?;
        let instr = match r.op {
            OP_HALT => Instruction::Halt,
            OP_LOAD_CONST => {
                let value = match r.tag()? {
                    TypeTag::Int => Value::Int(i32::from_le_bytes(r.array()?)),
                    TypeTag::Float => Value::Float(f32::from_le_bytes(r.array()?)),
                    TypeTag::String => Value::Str(r.string()?),
                    TypeTag::Char => Value::Char(char::from(r.u8()?)),
                    TypeTag::Bool => Value::Bool(r.u8()? != 0),
                    TypeTag::Void => Value::Void,
                };
                Instruction::LoadConst { value }
            }
            OP_LOAD_VAR => Instruction::Load { scope: Scope::Resolve, name: r.string()? },
            OP_LOAD_GLOBAL => Instruction::Load { scope: Scope::Global, name: r.string()? },
            OP_LOAD_LOCAL => Instruction::Load { scope: Scope::Local, name: r.string()? },
            OP_STORE_VAR | OP_STORE_GLOBAL | OP_STORE_LOCAL => {
                let scope = match r.op {
                    OP_STORE_GLOBAL => Scope::Global,
                    OP_STORE_LOCAL => Scope::Local,
                    _ => Scope::Resolve,
                };
                let ty = r.tag()?;
                Instruction::Store { scope, ty, name: r.string()? }
            }
            OP_NEG => Instruction::Negate,
            OP_POP => Instruction::Pop,
            OP_JUMP => Instruction::Jump { len: u32::from_le_bytes(r.array()?) },
            OP_JUMP_IF_FALSE => Instruction::JumpIfFalse { len: u32::from_le_bytes(r.array()?) },
            OP_CALL => {
                let name = r.string()?;
                Instruction::Call { name, argc: r.u8()? }
            }
            OP_MARK => Instruction::Mark { name: r.string()? },
            OP_ENTER => {
                let ret = r.tag()?;
                let count = r.u8()?;
                let mut params = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    let ty = r.tag()?;
                    params.push(Param { ty, name: r.string()? });
                }
                Instruction::Enter { ret, params }
            }
            OP_RETURN => Instruction::Return,
            op => match binary_from_opcode(op) {
                Some(kind) => Instruction::Binary { kind },
                None => return Err(DecodeError::UnknownOpcode { offset, op }),
            },
        };
        Ok((instr, r.pos))
    }
}

fn push_name(out: &mut Vec<u8>, name: &str) -> Result<(), EncodeError> {
    let len = u8::try_from(name.len()).map_err(|_| EncodeError::NameTooLong(name.to_string()))?;
    out.push(len);
    out.extend_from_slice(name.as_bytes());
    Ok(())
}

/// Bounds-checked operand reader for one instruction.
struct Reader<'a> {
    code: &'a [u8],
    start: usize,
    pos: usize,
    op: u8,
}

impl<'a> Reader<'a> {
    fn new(code: &'a [u8], offset: usize) -> Result<Self, DecodeError> {
        let op = *code.get(offset).ok_or(DecodeError::Truncated { offset, op: OP_HALT })?;
        Ok(Reader { code, start: offset, pos: offset + 1, op })
    }

    fn truncated(&self) -> DecodeError {
        DecodeError::Truncated { offset: self.start, op: self.op }
    }

    fn u8(&mut self) -> Result<u8, DecodeError> {
        let b = *self.code.get(self.pos).ok_or_else(|| self.truncated())?;
        self.pos += 1;
        Ok(b)
    }

    fn bytes(&mut self, n: usize) -> Result<&'a [u8], DecodeError> {
        let end = self.pos.checked_add(n).ok_or_else(|| self.truncated())?;
        let slice = self.code.get(self.pos..end).ok_or_else(|| self.truncated())?;
        self.pos = end;
        Ok(slice)
    }

    fn array(&mut self) -> Result<[u8; 4], DecodeError> {
        let slice = self.bytes(4)?;
        Ok([slice[0], slice[1], slice[2], slice[3]])
    }

    fn tag(&mut self) -> Result<TypeTag, DecodeError> {
        let tag = self.u8()?;
        TypeTag::from_byte(tag).ok_or(DecodeError::UnknownTag { offset: self.start, op: self.op, tag })
    }

    fn string(&mut self) -> Result<String, DecodeError> {
        let len = self.u8()? as usize;
        let bytes = self.bytes(len)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|_| DecodeError::InvalidUtf8 { offset: self.start, op: self.op })
    }
}

/// An assembled, immutable instruction stream.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Bytecode {
    code: Vec<u8>,
}

impl Bytecode {
    pub fn new(code: Vec<u8>) -> Self {
        Bytecode { code }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.code
    }

    pub fn len(&self) -> usize {
        self.code.len()
    }

    pub fn is_empty(&self) -> bool {
        self.code.is_empty()
    }

    /// Decode the whole stream in order, pairing each instruction with its offset.
    pub fn instructions(&self) -> Result<Vec<(usize, Instruction)>, DecodeError> {
        let mut out = Vec::new();
        let mut offset = 0;
        while offset < self.code.len() {
            let (instr, next) = Instruction::decode(&self.code, offset)?;
            out.push((offset, instr));
            offset = next;
        }
        Ok(out)
    }
}

// ── Tests ────────────────────────────────────────────────────────────
