use serde::Serialize;

use crate::bytecode::{Bytecode, DecodeError, Instruction, JUMP_SIZE, opcode_name};

/// Human-readable listing: one instruction per line with its offset, jumps
/// shown with their absolute target.
pub fn listing(code: &Bytecode) -> Result<String, DecodeError> {
    let mut out = String::new();
    for (offset, instr) in code.instructions()? {
        let name = opcode_name(instr.opcode());
        let operands = match &instr {
            Instruction::Halt
            | Instruction::Binary { .. }
            | Instruction::Negate
            | Instruction::Pop
            | Instruction::Return => String::new(),
            Instruction::LoadConst { value } => format!("{} {:?}", value.tag(), value),
            Instruction::Load { name, .. } | Instruction::Mark { name } => name.clone(),
            Instruction::Store { ty, name, .. } => format!("{} {}", ty, name),
            Instruction::Jump { len } | Instruction::JumpIfFalse { len } => {
                format!("+{} -> {:04}", len, offset + JUMP_SIZE + *len as usize)
            }
            Instruction::Call { name, argc } => format!("{}/{}", name, argc),
            Instruction::Enter { ret, params } => {
                let params: Vec<String> = params.iter().map(|p| format!("{} {}", p.ty, p.name)).collect();
                format!("{} ({})", ret, params.join(", "))
            }
        };
        let line = if operands.is_empty() {
            format!("{:04}  {}\n", offset, name)
        } else {
            format!("{:04}  {:<14}{}\n", offset, name, operands)
        };
        out.push_str(&line);
    }
    Ok(out)
}

#[derive(Serialize)]
struct Entry<'a> {
    offset: usize,
    opcode: &'static str,
    #[serde(flatten)]
    instr: &'a Instruction,
    #[serde(skip_serializing_if = "Option::is_none")]
    target: Option<usize>,
}

/// The decoded stream as a JSON array.
pub fn to_json(code: &Bytecode) -> Result<serde_json::Value, DecodeError> {
    let decoded = code.instructions()?;
    let entries: Vec<Entry> = decoded
        .iter()
        .map(|(offset, instr)| {
            let target = match instr {
                Instruction::Jump { len } | Instruction::JumpIfFalse { len } => {
                    Some(offset + JUMP_SIZE + *len as usize)
                }
                _ => None,
            };
            Entry { offset: *offset, opcode: opcode_name(instr.opcode()), instr, target }
        })
        .collect();
    Ok(serde_json::to_value(&entries).unwrap_or(serde_json::Value::Null))
}

/// Space-separated hex bytes, sixteen per line.
pub fn hex(code: &Bytecode) -> String {
    code.as_bytes()
        .chunks(16)
        .map(|row| row.iter().map(|b| format!("{:02x}", b)).collect::<Vec<_>>().join(" "))
        .collect::<Vec<_>>()
        .join("\n")
}
