//! Intermediate instruction list with symbolic jump targets.
//!
//! Jumps are recorded against a [`Label`] and resolved to byte lengths in one
//! backpatching pass, so the emitter never counts block bytes by hand.

use super::{Bytecode, EncodeError, Instruction, JUMP_SIZE};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Label(usize);

#[derive(Debug, Clone, PartialEq)]
enum Item {
    Instr(Instruction),
    Jump { conditional: bool, target: Label },
    Bind(Label),
}

#[derive(Debug, Default)]
pub struct Assembler {
    items: Vec<Item>,
    labels: usize,
}

impl Assembler {
    pub fn new() -> Self {
        Assembler::default()
    }

    pub fn push(&mut self, instr: Instruction) {
        self.items.push(Item::Instr(instr));
    }

    pub fn new_label(&mut self) -> Label {
        let label = Label(self.labels);
        self.labels += 1;
        label
    }

    /// Unconditional `Jump` to `target`.
    pub fn jump(&mut self, target: Label) {
        self.items.push(Item::Jump { conditional: false, target });
    }

    /// `JumpIfFalse` to `target`.
    pub fn jump_if_false(&mut self, target: Label) {
        self.items.push(Item::Jump { conditional: true, target });
    }

    /// Bind `label` to the offset of whatever is pushed next.
    pub fn bind(&mut self, label: Label) {
        self.items.push(Item::Bind(label));
    }

    /// Move every item of `other` onto the end of `self`, renumbering its labels.
    pub fn append(&mut self, other: Assembler) {
        let base = self.labels;
        self.labels += other.labels;
        self.items.extend(other.items.into_iter().map(|item| match item {
            Item::Jump { conditional, target } => Item::Jump { conditional, target: Label(base + target.0) },
            Item::Bind(label) => Item::Bind(Label(base + label.0)),
            instr => instr,
        }));
    }

    /// Resolve labels and encode. Every jump must point forward to a bound label.
    pub fn assemble(self) -> Result<Bytecode, EncodeError> {
        let mut offsets: Vec<Option<usize>> = vec![None; self.labels];
        let mut pos = 0usize;
        for item in &self.items {
            match item {
                Item::Instr(instr) => pos += instr.encoded_len(),
                Item::Jump { .. } => pos += JUMP_SIZE,
                Item::Bind(label) => offsets[label.0] = Some(pos),
            }
        }

        let mut code = Vec::with_capacity(pos);
        for item in &self.items {
            match item {
                Item::Instr(instr) => instr.encode(&mut code)?,
                Item::Jump { conditional, target } => {
                    let target = offsets[target.0].ok_or(EncodeError::UnboundLabel)?;
                    let from = code.len() + JUMP_SIZE;
                    if target < from {
                        return Err(EncodeError::BackwardJump { from, target });
                    }
                    let len = u32::try_from(target - from).map_err(|_| EncodeError::BlockTooLarge(target - from))?;
                    let instr = if *conditional {
                        Instruction::JumpIfFalse { len }
                    } else {
                        Instruction::Jump { len }
                    };
                    instr.encode(&mut code)?;
                }
                Item::Bind(_) => {}
            }
        }
        Ok(Bytecode::new(code))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;

    fn load(n: i32) -> Instruction {
        Instruction::LoadConst { value: Value::Int(n) }
    }

    #[test]
    fn forward_jump_skips_exactly_the_block() {
        let mut asm = Assembler::new();
        let end = asm.new_label();
        asm.jump_if_false(end);
        asm.push(load(1));
        asm.push(load(2));
        asm.bind(end);
        asm.push(Instruction::Halt);
        let code = asm.assemble().unwrap();
        let listing = code.instructions().unwrap();
        // two 6-byte loads between the length field and the label
        assert_eq!(listing[0].1, Instruction::JumpIfFalse { len: 12 });
        let target = listing[0].0 + JUMP_SIZE + 12;
        assert_eq!(listing[3], (target, Instruction::Halt));
    }

    #[test]
    fn empty_block_has_zero_length() {
        let mut asm = Assembler::new();
        let end = asm.new_label();
        asm.jump(end);
        asm.bind(end);
        let code = asm.assemble().unwrap();
        assert_eq!(code.as_bytes(), &[super::super::OP_JUMP, 0, 0, 0, 0]);
    }

    #[test]
    fn backward_jump_rejected() {
        let mut asm = Assembler::new();
        let top = asm.new_label();
        asm.bind(top);
        asm.push(load(1));
        asm.jump(top);
        assert_eq!(asm.assemble().unwrap_err(), EncodeError::BackwardJump { from: 11, target: 0 });
    }

    #[test]
    fn unbound_label_rejected() {
        let mut asm = Assembler::new();
        let nowhere = asm.new_label();
        asm.jump(nowhere);
        assert_eq!(asm.assemble().unwrap_err(), EncodeError::UnboundLabel);
    }

    #[test]
    fn append_renumbers_labels() {
        let mut inner = Assembler::new();
        let skip = inner.new_label();
        inner.jump(skip);
        inner.push(load(7));
        inner.bind(skip);

        let mut outer = Assembler::new();
        let end = outer.new_label();
        outer.jump_if_false(end);
        outer.append(inner);
        outer.bind(end);
        let code = outer.assemble().unwrap();
        let listing = code.instructions().unwrap();
        assert_eq!(listing[0].1, Instruction::JumpIfFalse { len: 11 });
        assert_eq!(listing[1].1, Instruction::Jump { len: 6 });
    }
}
