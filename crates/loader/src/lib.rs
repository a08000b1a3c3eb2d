//! Parser for the assembly-like program files.
//!
//! One instruction per line: an opcode integer followed by its arguments,
//! `r<digit>` for a register or `$<signed-int>` for a constant. Comments
//! start with `;` and run to end of line; blank lines, commas, and extra
//! whitespace are ignored.
//!
//! ```text
//! 6 r1, $5    ; Movi r1, $5
//! 2 r1, $3    ; Addi r1, $3
//! 11 r1       ; Printr r1
//! 27          ; Exit
//! ```

use std::fs;
use std::path::Path;

use anyhow::{bail, Context, Result};
use regex::Regex;
use vm::instruction;
use vm::opcode::{Opcode, Operand};
use vm::Instruction;

/// A parsed program, ready for the kernel to turn into a process.
#[derive(Debug, Clone)]
pub struct Program {
    pub name: String,
    pub instructions: Vec<Instruction>,
}

impl Program {
    /// The process memory image: for each instruction, the opcode byte
    /// followed by the little-endian bytes of each present parameter.
    pub fn image(&self) -> Vec<u8> {
        instruction::image(&self.instructions)
    }
}

/// Load and parse one program file.
pub fn load_file(path: &Path) -> Result<Program> {
    let source = fs::read_to_string(path)
        .with_context(|| format!("failed to read program file {}", path.display()))?;
    let name = path
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());
    parse_str(&name, &source).with_context(|| format!("in program file {}", path.display()))
}

/// Parse program text. `name` only labels diagnostics.
pub fn parse_str(name: &str, source: &str) -> Result<Program> {
    let register_re = Regex::new(r"^r(\d+)$")?;
    let constant_re = Regex::new(r"^\$(-?\d+)$")?;

    let mut instructions = Vec::new();
    for (line_index, raw_line) in source.lines().enumerate() {
        let line_number = line_index + 1;
        // Everything after ';' is comment.
        let line = raw_line.split(';').next().unwrap_or("").trim();
        if line.is_empty() {
            continue;
        }

        let mut tokens = line.split([' ', '\t', ',']).filter(|t| !t.is_empty());
        let opcode_token = match tokens.next() {
            Some(token) => token,
            None => continue, // separators only
        };
        let opcode_byte: u8 = opcode_token
            .parse()
            .with_context(|| format!("line {}: bad opcode `{}`", line_number, opcode_token))?;
        let opcode = match Opcode::from_u8(opcode_byte) {
            Some(opcode) => opcode,
            None => bail!("line {}: unknown opcode {}", line_number, opcode_byte),
        };

        let args: Vec<&str> = tokens.collect();
        let kinds = opcode.operands();
        if args.len() != kinds.len() {
            bail!(
                "line {}: {} takes {} argument(s), got {}",
                line_number,
                opcode,
                kinds.len(),
                args.len()
            );
        }

        let mut params = [None, None];
        for (i, (&arg, &kind)) in args.iter().zip(kinds).enumerate() {
            params[i] = Some(match kind {
                Operand::Reg => {
                    let captures = register_re.captures(arg).with_context(|| {
                        format!(
                            "line {}: {} argument {} must be a register, got `{}`",
                            line_number,
                            opcode,
                            i + 1,
                            arg
                        )
                    })?;
                    let register: u32 = captures[1].parse()?;
                    if !(1..=11).contains(&register) {
                        bail!("line {}: register r{} out of range", line_number, register);
                    }
                    register
                }
                Operand::Val => {
                    let captures = constant_re.captures(arg).with_context(|| {
                        format!(
                            "line {}: {} argument {} must be a constant, got `{}`",
                            line_number,
                            opcode,
                            i + 1,
                            arg
                        )
                    })?;
                    let value: i64 = captures[1].parse()?;
                    value as i32 as u32
                }
            });
        }

        instructions.push(Instruction::new(opcode, params[0], params[1]));
    }

    Ok(Program {
        name: name.to_string(),
        instructions,
    })
}
