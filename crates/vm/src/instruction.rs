use std::fmt;

use crate::opcode::{Opcode, Operand};

/// One parsed instruction: the opcode plus its present parameters.
///
/// The loader produces these; the kernel concatenates their encodings to
/// build a process's memory image. An absent parameter encodes to nothing;
/// the interpreter knows from the opcode how many bytes to consume.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Instruction {
    pub opcode: Opcode,
    pub param1: Option<u32>,
    pub param2: Option<u32>,
}

impl Instruction {
    pub fn new(opcode: Opcode, param1: Option<u32>, param2: Option<u32>) -> Self {
        Self {
            opcode,
            param1,
            param2,
        }
    }

    /// Append this instruction's encoding: 1 opcode byte, then 4 little-endian
    /// bytes for each present parameter.
    pub fn encode_into(&self, image: &mut Vec<u8>) {
        image.push(self.opcode as u8);
        for param in [self.param1, self.param2].into_iter().flatten() {
            image.extend_from_slice(&param.to_le_bytes());
        }
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.opcode)?;
        let kinds = self.opcode.operands();
        for (i, param) in [self.param1, self.param2].into_iter().flatten().enumerate() {
            let sep = if i == 0 { " " } else { ", " };
            match kinds.get(i) {
                Some(Operand::Reg) => write!(f, "{}r{}", sep, param)?,
                _ => write!(f, "{}${}", sep, param as i32)?,
            }
        }
        Ok(())
    }
}

/// Build a process memory image from an instruction sequence.
pub fn image(instructions: &[Instruction]) -> Vec<u8> {
    let mut bytes = Vec::new();
    for instruction in instructions {
        instruction.encode_into(&mut bytes);
    }
    bytes
}
