use std::fmt;

/// What an operand slot holds: a register number or a raw constant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operand {
    Reg,
    Val,
}

/// The instruction set. One byte of opcode followed by zero, one, or two
/// 4-byte little-endian operands; the opcode alone fixes how many operands
/// follow and whether each names a register or carries a constant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Opcode {
    Noop = 0,
    Incr = 1,
    Addi = 2,
    Addr = 3,
    Pushr = 4,
    Pushi = 5,
    Movi = 6,
    Movr = 7,
    Movmr = 8,
    Movrm = 9,
    Movmm = 10,
    Printr = 11,
    Printm = 12,
    Jmp = 13,
    Cmpi = 14,
    Cmpr = 15,
    Jlt = 16,
    Jgt = 17,
    Je = 18,
    Call = 19,
    Callm = 20,
    Ret = 21,
    Alloc = 22,
    AcquireLock = 23,
    ReleaseLock = 24,
    Sleep = 25,
    SetPriority = 26,
    Exit = 27,
    FreeMemory = 28,
    MapSharedMem = 29,
    SignalEvent = 30,
    WaitEvent = 31,
    Input = 32,
    MemoryClear = 33,
    TerminateProcess = 34,
    Popr = 35,
    Popm = 36,
}

impl Opcode {
    pub fn from_u8(byte: u8) -> Option<Self> {
        use Opcode::*;
        Some(match byte {
            0 => Noop,
            1 => Incr,
            2 => Addi,
            3 => Addr,
            4 => Pushr,
            5 => Pushi,
            6 => Movi,
            7 => Movr,
            8 => Movmr,
            9 => Movrm,
            10 => Movmm,
            11 => Printr,
            12 => Printm,
            13 => Jmp,
            14 => Cmpi,
            15 => Cmpr,
            16 => Jlt,
            17 => Jgt,
            18 => Je,
            19 => Call,
            20 => Callm,
            21 => Ret,
            22 => Alloc,
            23 => AcquireLock,
            24 => ReleaseLock,
            25 => Sleep,
            26 => SetPriority,
            27 => Exit,
            28 => FreeMemory,
            29 => MapSharedMem,
            30 => SignalEvent,
            31 => WaitEvent,
            32 => Input,
            33 => MemoryClear,
            34 => TerminateProcess,
            35 => Popr,
            36 => Popm,
            _ => return None,
        })
    }

    /// Operand layout for this opcode.
    pub fn operands(&self) -> &'static [Operand] {
        use Opcode::*;
        use Operand::*;
        match self {
            Noop | Ret | Exit => &[],
            Pushi => &[Val],
            Incr | Pushr | Printr | Printm | Jmp | Jlt | Jgt | Je | Call | Callm
            | AcquireLock | ReleaseLock | Sleep | SetPriority | FreeMemory | SignalEvent
            | WaitEvent | Input | TerminateProcess | Popr | Popm => &[Reg],
            Addi | Movi | Cmpi => &[Reg, Val],
            Addr | Movr | Movmr | Movrm | Movmm | Cmpr | Alloc | MapSharedMem
            | MemoryClear => &[Reg, Reg],
        }
    }

    pub fn operand_count(&self) -> usize {
        self.operands().len()
    }

    /// Encoded instruction length in bytes: opcode byte plus 4 per operand.
    pub fn encoded_len(&self) -> u32 {
        1 + 4 * self.operand_count() as u32
    }
}

impl fmt::Display for Opcode {
    // The variant names are the canonical mnemonic spellings.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_every_opcode_byte() {
        for byte in 0..=36u8 {
            let opcode = Opcode::from_u8(byte).expect("valid opcode");
            assert_eq!(opcode as u8, byte);
        }
        assert_eq!(Opcode::from_u8(37), None);
        assert_eq!(Opcode::from_u8(255), None);
    }

    #[test]
    fn operand_layouts() {
        assert_eq!(Opcode::Noop.operand_count(), 0);
        assert_eq!(Opcode::Incr.operands(), &[Operand::Reg]);
        assert_eq!(Opcode::Addi.operands(), &[Operand::Reg, Operand::Val]);
        assert_eq!(Opcode::Pushi.operands(), &[Operand::Val]);
        assert_eq!(Opcode::Movmm.operands(), &[Operand::Reg, Operand::Reg]);
        assert_eq!(Opcode::Exit.operand_count(), 0);
    }

    #[test]
    fn encoded_lengths() {
        assert_eq!(Opcode::Noop.encoded_len(), 1);
        assert_eq!(Opcode::Printr.encoded_len(), 5);
        assert_eq!(Opcode::Movi.encoded_len(), 9);
    }
}
