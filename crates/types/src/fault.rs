use std::fmt;

use crate::Pid;

/// A process-fatal fault raised while executing one opcode.
///
/// Faults are values, not panics: the interpreter returns them from its step
/// function and the dispatcher terminates the offending process. They never
/// take down the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// The process touched an offset outside every page it owns or shares.
    Memory { pid: Pid, address: u32 },
    /// A push would move SP below the stack floor.
    Stack { pid: Pid, overflow: u32 },
    /// No contiguous run of free heap pages covers the request.
    Heap { pid: Pid, requested: u32 },
    /// The byte at IP is not a known opcode.
    IllegalOpcode { pid: Pid, opcode: u8 },
}

impl Fault {
    pub fn pid(&self) -> Pid {
        match *self {
            Fault::Memory { pid, .. }
            | Fault::Stack { pid, .. }
            | Fault::Heap { pid, .. }
            | Fault::IllegalOpcode { pid, .. } => pid,
        }
    }
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Fault::Memory { pid, address } => {
                write!(f, "pid {} accessed unmapped address 0x{:08x}", pid, address)
            }
            Fault::Stack { pid, overflow } => {
                write!(f, "pid {} overflowed its stack by {} bytes", pid, overflow)
            }
            Fault::Heap { pid, requested } => {
                write!(f, "pid {} failed to allocate {} heap bytes", pid, requested)
            }
            Fault::IllegalOpcode { pid, opcode } => {
                write!(f, "pid {} hit illegal opcode {}", pid, opcode)
            }
        }
    }
}

impl std::error::Error for Fault {}

/// Host-fatal: the virtual address space cannot cover a process map request.
/// The virtual space is sized at boot and never grows, so the binary reports
/// this and exits with status 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutOfMemory {
    pub pid: Pid,
    pub requested_pages: u32,
    pub free_pages: u32,
}

impl fmt::Display for OutOfMemory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "out of virtual memory mapping pid {}: {} pages requested, {} free",
            self.pid, self.requested_pages, self.free_pages
        )
    }
}

impl std::error::Error for OutOfMemory {}
