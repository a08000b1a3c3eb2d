pub mod cpu;
pub mod instruction;
pub mod opcode;

pub use cpu::CpuState;
pub use instruction::Instruction;
pub use opcode::{Opcode, Operand};
