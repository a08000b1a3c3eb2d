use types::Pid;
use vm::CpuState;

/// Opcodes a process may execute in one dispatch before it yields.
pub const TIME_QUANTUM: u64 = 5;

pub const MAX_PRIORITY: u32 = 31;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    NewProcess,
    Ready,
    Running,
    WaitingAsleep,
    WaitingOnLock,
    WaitingOnEvent,
    Terminated,
}

/// A process: its saved register context plus the control-block bookkeeping
/// the scheduler and interpreter maintain.
///
/// Only two actors ever mutate a process: the interpreter while it is the
/// current one, and the scheduler (wake, preempt, reap).
#[derive(Debug, Clone)]
pub struct Process {
    pub pid: Pid,
    /// Total bytes of address space this process owns. Immutable.
    pub memory_size: u32,

    // Saved context, restored into the CPU on dispatch. Slot 10 is SP,
    // slot 11 is IP.
    pub registers: [u32; 12],
    pub sign_flag: bool,
    pub zero_flag: bool,

    pub state: ProcessState,
    pub priority: u32,

    /// Opcodes executed across all dispatches.
    pub clock_cycles: u64,
    /// Incremented once per dispatch-out.
    pub context_switches: u64,
    /// 0 while WaitingAsleep means sleep forever.
    pub sleep_counter: u32,
    /// Lock id 1..=10 this process is blocked on, or 0.
    pub waiting_lock: u32,
    /// Event id 1..=10 this process is blocked on, or 0.
    pub waiting_event: u32,

    /// Page-table indices of the pages backing [heap_start, heap_end).
    pub heap_pages: Vec<usize>,

    // Address-space layout.
    pub code_size: u32,
    pub data_size: u32,
    pub stack_size: u32,
}

impl Process {
    pub fn heap_start(&self) -> u32 {
        self.code_size + self.data_size
    }

    pub fn heap_end(&self) -> u32 {
        self.memory_size - self.stack_size
    }

    /// Lowest offset a push may store to.
    pub fn stack_floor(&self) -> u32 {
        self.memory_size - 1 - self.stack_size
    }

    pub fn set_priority(&mut self, priority: u32) {
        self.priority = priority.min(MAX_PRIORITY);
    }

    pub fn is_dispatchable(&self) -> bool {
        matches!(self.state, ProcessState::NewProcess | ProcessState::Ready)
    }

    pub fn is_waiting(&self) -> bool {
        matches!(
            self.state,
            ProcessState::WaitingAsleep | ProcessState::WaitingOnLock | ProcessState::WaitingOnEvent
        )
    }

    /// Restore this process's saved context into the CPU.
    pub fn load_into(&self, cpu: &mut CpuState) {
        cpu.regs = self.registers;
        cpu.sign_flag = self.sign_flag;
        cpu.zero_flag = self.zero_flag;
    }

    /// Capture the CPU back into the saved context.
    pub fn save_from(&mut self, cpu: &CpuState) {
        self.registers = cpu.regs;
        self.sign_flag = cpu.sign_flag;
        self.zero_flag = cpu.zero_flag;
    }
}
