use std::cell::RefCell;
use std::fmt::Write as _;
use std::io::BufRead;
use std::rc::Rc;

use colored::Colorize;
use loader::Program;
use memory::MemoryManager;
use types::fault::OutOfMemory;
use types::{Config, Pid};
use vm::CpuState;

use crate::dump;
use crate::interpreter::{self, ExecCtx};
use crate::process::{Process, ProcessState, TIME_QUANTUM};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventState {
    NonSignaled,
    Signaled,
}

/// Where `Printr`/`Printm` output goes. A run writes to stdout; tests hand
/// in a shared buffer and assert on it afterwards.
#[derive(Clone)]
pub enum OutputSink {
    Stdout,
    Buffer(Rc<RefCell<String>>),
}

impl OutputSink {
    pub fn buffer() -> (Self, Rc<RefCell<String>>) {
        let buffer = Rc::new(RefCell::new(String::new()));
        (OutputSink::Buffer(Rc::clone(&buffer)), buffer)
    }

    pub fn emit_line(&self, value: impl std::fmt::Display) {
        match self {
            OutputSink::Stdout => println!("{}", value),
            OutputSink::Buffer(buffer) => {
                let _ = writeln!(buffer.borrow_mut(), "{}", value);
            }
        }
    }
}

/// The operating system: process table, synchronization primitives, the one
/// CPU, and the master scheduling loop.
///
/// Scheduling is strictly serial. A dispatch loads a process's context into
/// the CPU, runs opcodes until the time quantum elapses, the process leaves
/// the Running state, or a wake preempts it, then saves the context back.
pub struct Os {
    pub config: Config,
    pub memory: MemoryManager,
    cpu: CpuState,
    pub processes: Vec<Process>,
    /// locks[1..=10]; 0 = free, otherwise the holder's pid. Slot 0 unused.
    pub locks: [Pid; 11],
    /// events[1..=10]; consumed by the first waiter to wake. Slot 0 unused.
    pub events: [EventState; 11],
    next_pid: Pid,
    output: OutputSink,
}

impl Os {
    pub fn new(config: Config, memory: MemoryManager) -> Self {
        Self::with_output(config, memory, OutputSink::Stdout)
    }

    /// Build an OS whose process output goes to `output` instead of stdout.
    pub fn with_output(config: Config, memory: MemoryManager, output: OutputSink) -> Self {
        Self {
            config,
            memory,
            cpu: CpuState::new(),
            processes: Vec::new(),
            locks: [0; 11],
            events: [EventState::NonSignaled; 11],
            next_pid: 1,
            output,
        }
    }

    /// Create a process from a parsed program: map its address space, copy
    /// the memory image in, and lay out code/data/heap/stack.
    ///
    /// Failure to map is host-fatal (the virtual space was sized at boot)
    /// and bubbles up so the binary can exit with status 1.
    pub fn create_process(
        &mut self,
        program: &Program,
        memory_size: u32,
    ) -> Result<Pid, OutOfMemory> {
        let memory_size = self.config.round_to_page(memory_size);
        let pid = self.next_pid;
        self.next_pid += 1;

        if self.config.dump_program {
            dump::program(program);
        }

        self.memory.map_process(memory_size, pid)?;

        let image = program.image();
        assert!(
            (image.len() as u32) <= memory_size,
            "program {} does not fit its memory budget ({} > {} bytes)",
            program.name,
            image.len(),
            memory_size
        );
        for (offset, &byte) in image.iter().enumerate() {
            self.memory
                .write(pid, offset as u32, byte)
                .expect("freshly mapped image bytes must translate");
        }

        let code_size = self.config.round_to_page(image.len() as u32);
        let data_size = self.config.data_size;
        let stack_size = self.config.stack_size;

        let mut registers = [0u32; 12];
        registers[9] = code_size; // R9 points at the data segment
        registers[10] = memory_size - 1; // SP starts at end of memory
        registers[11] = 0; // IP

        let mut process = Process {
            pid,
            memory_size,
            registers,
            sign_flag: false,
            zero_flag: false,
            state: ProcessState::NewProcess,
            priority: 1,
            clock_cycles: 0,
            context_switches: 0,
            sleep_counter: 0,
            waiting_lock: 0,
            waiting_event: 0,
            heap_pages: Vec::new(),
            code_size,
            data_size,
            stack_size,
        };
        process.heap_pages =
            self.memory
                .heap_page_indices(pid, process.heap_start(), process.heap_end());

        self.processes.push(process);
        Ok(pid)
    }

    /// The master loop: reap, sort, dispatch, until the table empties.
    pub fn run(&mut self) {
        loop {
            self.reap();
            self.sort_by_priority();
            if self.processes.is_empty() {
                break;
            }
            if self.config.dump_physical_memory {
                dump::physical_memory(&self.memory);
            }

            let order: Vec<Pid> = self.processes.iter().map(|p| p.pid).collect();
            let mut dispatched = false;
            for pid in order {
                let index = match self.processes.iter().position(|p| p.pid == pid) {
                    Some(index) => index,
                    None => continue,
                };
                if self.processes[index].is_dispatchable() {
                    self.dispatch(index);
                    dispatched = true;
                }
            }

            // Everyone is blocked: tick the wake pass once anyway so sleep
            // counters keep counting down and the loop can converge.
            if !dispatched {
                self.wake_pass();
            }
        }

        println!("{}", "No processes left, host exiting".dimmed());
        if self.config.pause_on_exit {
            let mut line = String::new();
            let _ = std::io::stdin().lock().read_line(&mut line);
        }
    }

    /// Priority descending; equal priorities ordered by fewest clock cycles
    /// first so a starved process rises.
    fn sort_by_priority(&mut self) {
        self.processes.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then(a.clock_cycles.cmp(&b.clock_cycles))
        });
    }

    /// Run one process until its quantum elapses, it blocks, it faults, or a
    /// wake preempts it.
    fn dispatch(&mut self, index: usize) {
        {
            let process = &mut self.processes[index];
            process.load_into(&mut self.cpu);
            process.state = ProcessState::Running;
        }
        if self.config.dump_context_switch {
            dump::context_switch_in(&self.processes[index]);
        }

        let mut preempt = false;
        while self.processes[index].state == ProcessState::Running {
            let step = {
                let mut ctx = ExecCtx {
                    cpu: &mut self.cpu,
                    mem: &mut self.memory,
                    procs: &mut self.processes,
                    locks: &mut self.locks,
                    events: &mut self.events,
                    current: index,
                    output: &self.output,
                    dump_instruction: self.config.dump_instruction,
                };
                interpreter::step(&mut ctx)
            };

            if let Err(fault) = step {
                eprintln!("{} {}", "process fault:".red().bold(), fault);
                self.processes[index].state = ProcessState::Terminated;
                break;
            }

            self.processes[index].clock_cycles += 1;
            if self.config.dump_registers {
                dump::registers(&self.cpu);
            }

            if self.wake_pass() {
                preempt = true;
            }

            // Quantum check happens on the cumulative cycle count.
            if preempt || self.processes[index].clock_cycles % TIME_QUANTUM == 0 {
                break;
            }
        }

        let process = &mut self.processes[index];
        if process.state != ProcessState::Terminated && !process.is_waiting() {
            process.state = ProcessState::Ready;
        }
        process.context_switches += 1;
        process.save_from(&self.cpu);
        self.cpu.zero();
        if self.config.dump_context_switch {
            dump::context_switch_out(&self.processes[index]);
        }
    }

    /// One deterministic pass over the table: tick sleepers, hand signaled
    /// events to their first waiter, hand freed locks to their first waiter.
    /// Returns true if anything became Ready.
    fn wake_pass(&mut self) -> bool {
        let mut woke = false;
        for process in self.processes.iter_mut() {
            match process.state {
                ProcessState::WaitingAsleep => {
                    // sleep_counter 0 means sleep forever.
                    if process.sleep_counter != 0 {
                        process.sleep_counter -= 1;
                        if process.sleep_counter == 0 {
                            process.state = ProcessState::Ready;
                            woke = true;
                        }
                    }
                }
                ProcessState::WaitingOnEvent => {
                    let slot = process.waiting_event as usize;
                    if (1..=10).contains(&slot) && self.events[slot] == EventState::Signaled {
                        // Edge-triggered: the first waiter consumes the signal.
                        self.events[slot] = EventState::NonSignaled;
                        process.waiting_event = 0;
                        process.state = ProcessState::Ready;
                        woke = true;
                    }
                }
                ProcessState::WaitingOnLock => {
                    let slot = process.waiting_lock as usize;
                    if (1..=10).contains(&slot) && self.locks[slot] == 0 {
                        // The woken process becomes the recorded holder.
                        self.locks[slot] = process.pid;
                        process.waiting_lock = 0;
                        process.state = ProcessState::Ready;
                        woke = true;
                    }
                }
                _ => {}
            }
        }
        woke
    }

    /// Remove terminated processes: emit their statistics, release their
    /// memory and heap registrations, and free every lock they still hold.
    fn reap(&mut self) {
        let dead: Vec<Pid> = self
            .processes
            .iter()
            .filter(|p| p.state == ProcessState::Terminated)
            .map(|p| p.pid)
            .collect();
        for pid in dead {
            let index = self
                .processes
                .iter()
                .position(|p| p.pid == pid)
                .expect("terminated pid is in the table");
            let page_faults = self.memory.page_faults_for_process(pid);
            dump::process_stats(&self.processes[index], page_faults);

            self.memory.release_process(pid);
            self.processes[index].heap_pages.clear();
            for slot in 1..=10 {
                if self.locks[slot] == pid {
                    self.locks[slot] = 0;
                }
            }
            self.processes.remove(index);
        }
    }
}
