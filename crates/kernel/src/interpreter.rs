use std::io::BufRead;

use memory::MemoryManager;
use types::{Fault, Pid};
use vm::cpu::register_index;
use vm::opcode::Opcode;
use vm::{CpuState, Instruction};

use crate::process::{Process, ProcessState};
use crate::scheduler::{EventState, OutputSink};

/// Everything one opcode may touch, borrowed from the scheduler for exactly
/// one step. The CPU and memory manager are the hot paths; the process
/// table, locks, and events back the system-call opcodes.
pub struct ExecCtx<'a> {
    pub cpu: &'a mut CpuState,
    pub mem: &'a mut MemoryManager,
    pub procs: &'a mut [Process],
    pub locks: &'a mut [Pid; 11],
    pub events: &'a mut [EventState; 11],
    /// Index of the current process in `procs`.
    pub current: usize,
    pub output: &'a OutputSink,
    pub dump_instruction: bool,
}

/// Lock and event ids are meaningful in 1..=10 only; anything else turns the
/// opcode into a no-op.
fn valid_sync_id(id: u32) -> bool {
    (1..=10).contains(&id)
}

/// Fetch, decode, and execute exactly one opcode for the current process.
///
/// The fetch reads the opcode byte at IP and advances IP by 1, then reads
/// 4 little-endian bytes per operand, advancing IP by 4 each. By the time
/// an opcode executes, IP already points past the whole instruction, and
/// every relative jump is relative to that post-operand IP.
///
/// Any fault escapes as a value; the dispatcher terminates the process. A
/// fault leaves no partial scheduler bookkeeping behind: `clock_cycles` is
/// only bumped by the dispatcher on a successful return.
pub fn step(ctx: &mut ExecCtx) -> Result<(), Fault> {
    let pid = ctx.procs[ctx.current].pid;

    let opcode_byte = ctx.mem.read(pid, ctx.cpu.ip())?;
    let opcode = Opcode::from_u8(opcode_byte).ok_or(Fault::IllegalOpcode {
        pid,
        opcode: opcode_byte,
    })?;
    ctx.cpu.set_ip(ctx.cpu.ip().wrapping_add(1));

    let mut params = [None, None];
    for slot in params.iter_mut().take(opcode.operand_count()) {
        *slot = Some(ctx.mem.read_u32(pid, ctx.cpu.ip())?);
        ctx.cpu.set_ip(ctx.cpu.ip().wrapping_add(4));
    }

    if ctx.dump_instruction {
        let decoded = Instruction::new(opcode, params[0], params[1]);
        println!("[pid {}] {}", pid, decoded);
    }

    execute(ctx, pid, opcode, params[0].unwrap_or(0), params[1].unwrap_or(0))
}

fn execute(ctx: &mut ExecCtx, pid: Pid, opcode: Opcode, p1: u32, p2: u32) -> Result<(), Fault> {
    // An operand that must name a register but doesn't fit R1..R11 makes the
    // whole instruction illegal.
    let reg = |value: u32| {
        register_index(value).ok_or(Fault::IllegalOpcode {
            pid,
            opcode: opcode as u8,
        })
    };

    match opcode {
        Opcode::Noop => {}

        // Arithmetic and register moves.
        Opcode::Incr => {
            let a = reg(p1)?;
            ctx.cpu.regs[a] = ctx.cpu.regs[a].wrapping_add(1);
        }
        Opcode::Addi => {
            let a = reg(p1)?;
            ctx.cpu.regs[a] = ctx.cpu.regs[a].wrapping_add(p2);
        }
        Opcode::Addr => {
            let (a, b) = (reg(p1)?, reg(p2)?);
            ctx.cpu.regs[a] = ctx.cpu.regs[a].wrapping_add(ctx.cpu.regs[b]);
        }
        Opcode::Movi => {
            let a = reg(p1)?;
            ctx.cpu.regs[a] = p2;
        }
        Opcode::Movr => {
            let (a, b) = (reg(p1)?, reg(p2)?);
            ctx.cpu.regs[a] = ctx.cpu.regs[b];
        }

        // Memory moves. All addresses are process-virtual and byte-checked
        // by the memory manager.
        Opcode::Movmr => {
            let (a, b) = (reg(p1)?, reg(p2)?);
            ctx.cpu.regs[a] = ctx.mem.read_u32(pid, ctx.cpu.regs[b])?;
        }
        Opcode::Movrm => {
            let (a, b) = (reg(p1)?, reg(p2)?);
            ctx.mem.write_u32(pid, ctx.cpu.regs[a], ctx.cpu.regs[b])?;
        }
        Opcode::Movmm => {
            let (a, b) = (reg(p1)?, reg(p2)?);
            let value = ctx.mem.read_u32(pid, ctx.cpu.regs[b])?;
            ctx.mem.write_u32(pid, ctx.cpu.regs[a], value)?;
        }
        Opcode::MemoryClear => {
            let (a, b) = (reg(p1)?, reg(p2)?);
            ctx.mem
                .set_range(pid, ctx.cpu.regs[a], ctx.cpu.regs[b], 0)?;
        }

        // Stack.
        Opcode::Pushr => {
            let a = reg(p1)?;
            let value = ctx.cpu.regs[a];
            push(ctx, pid, value)?;
        }
        Opcode::Pushi => push(ctx, pid, p1)?,
        Opcode::Popr => {
            let a = reg(p1)?;
            ctx.cpu.regs[a] = pop(ctx, pid)?;
        }
        Opcode::Popm => {
            let a = reg(p1)?;
            let value = pop(ctx, pid)?;
            ctx.mem.write_u32(pid, ctx.cpu.regs[a], value)?;
        }

        // Output and input.
        Opcode::Printr => {
            let a = reg(p1)?;
            ctx.output.emit_line(ctx.cpu.regs[a]);
        }
        Opcode::Printm => {
            let a = reg(p1)?;
            let byte = ctx.mem.read(pid, ctx.cpu.regs[a])?;
            ctx.output.emit_line(byte);
        }
        Opcode::Input => {
            let a = reg(p1)?;
            ctx.cpu.regs[a] = read_u32_from_stdin();
        }

        // Compares and relative jumps. Jump distances are signed 32-bit
        // values; wrapping add does the two's-complement arithmetic.
        Opcode::Cmpi => {
            let a = reg(p1)?;
            ctx.cpu.compare(ctx.cpu.regs[a], p2);
        }
        Opcode::Cmpr => {
            let (a, b) = (reg(p1)?, reg(p2)?);
            ctx.cpu.compare(ctx.cpu.regs[a], ctx.cpu.regs[b]);
        }
        Opcode::Jmp => {
            let a = reg(p1)?;
            ctx.cpu.jump_relative(ctx.cpu.regs[a]);
        }
        Opcode::Jlt => {
            let a = reg(p1)?;
            if ctx.cpu.sign_flag {
                ctx.cpu.jump_relative(ctx.cpu.regs[a]);
            }
        }
        Opcode::Jgt => {
            let a = reg(p1)?;
            if !ctx.cpu.sign_flag {
                ctx.cpu.jump_relative(ctx.cpu.regs[a]);
            }
        }
        Opcode::Je => {
            let a = reg(p1)?;
            if ctx.cpu.zero_flag {
                ctx.cpu.jump_relative(ctx.cpu.regs[a]);
            }
        }

        // Calls push the post-operand IP; Ret pops it back.
        Opcode::Call => {
            let a = reg(p1)?;
            let return_ip = ctx.cpu.ip();
            push(ctx, pid, return_ip)?;
            ctx.cpu.jump_relative(ctx.cpu.regs[a]);
        }
        Opcode::Callm => {
            let a = reg(p1)?;
            let return_ip = ctx.cpu.ip();
            push(ctx, pid, return_ip)?;
            let offset = ctx.mem.read(pid, ctx.cpu.regs[a])?;
            ctx.cpu.jump_relative(offset as u32);
        }
        Opcode::Ret => {
            let target = pop(ctx, pid)?;
            ctx.cpu.set_ip(target);
        }

        // Heap.
        Opcode::Alloc => {
            let (a, b) = (reg(p1)?, reg(p2)?);
            let bytes = ctx.cpu.regs[a];
            let address = ctx
                .mem
                .heap_alloc(pid, &ctx.procs[ctx.current].heap_pages, bytes)?;
            ctx.cpu.regs[b] = address;
        }
        Opcode::FreeMemory => {
            let a = reg(p1)?;
            let address = ctx.cpu.regs[a];
            ctx.mem
                .heap_free(address, &ctx.procs[ctx.current].heap_pages);
        }

        // Shared memory.
        Opcode::MapSharedMem => {
            let (a, b) = (reg(p1)?, reg(p2)?);
            let region = ctx.cpu.regs[a];
            if valid_sync_id(region) {
                if let Some(start) = ctx.mem.map_shared_to_process(region, pid) {
                    ctx.cpu.regs[b] = start;
                }
            }
        }

        // Locks.
        Opcode::AcquireLock => {
            let a = reg(p1)?;
            let lock = ctx.cpu.regs[a];
            if valid_sync_id(lock) {
                let slot = lock as usize;
                if ctx.locks[slot] == 0 {
                    ctx.locks[slot] = pid;
                } else if ctx.locks[slot] != pid {
                    // Held elsewhere: block until the wake pass hands it over.
                    let current = &mut ctx.procs[ctx.current];
                    current.waiting_lock = lock;
                    current.state = ProcessState::WaitingOnLock;
                }
                // Held by us already: re-entrant no-op.
            }
        }
        Opcode::ReleaseLock => {
            let a = reg(p1)?;
            let lock = ctx.cpu.regs[a];
            if valid_sync_id(lock) && ctx.locks[lock as usize] == pid {
                ctx.locks[lock as usize] = 0;
            }
        }

        // Events.
        Opcode::SignalEvent => {
            let a = reg(p1)?;
            let event = ctx.cpu.regs[a];
            if valid_sync_id(event) {
                ctx.events[event as usize] = EventState::Signaled;
            }
        }
        Opcode::WaitEvent => {
            let a = reg(p1)?;
            let event = ctx.cpu.regs[a];
            if valid_sync_id(event) {
                let current = &mut ctx.procs[ctx.current];
                current.waiting_event = event;
                current.state = ProcessState::WaitingOnEvent;
            }
        }

        // Scheduling.
        Opcode::Sleep => {
            let a = reg(p1)?;
            let current = &mut ctx.procs[ctx.current];
            current.sleep_counter = ctx.cpu.regs[a];
            current.state = ProcessState::WaitingAsleep;
        }
        Opcode::SetPriority => {
            let a = reg(p1)?;
            let priority = ctx.cpu.regs[a];
            ctx.procs[ctx.current].set_priority(priority);
        }
        Opcode::Exit => {
            ctx.procs[ctx.current].state = ProcessState::Terminated;
        }
        Opcode::TerminateProcess => {
            let a = reg(p1)?;
            let target = ctx.cpu.regs[a];
            for process in ctx.procs.iter_mut() {
                if process.pid == target {
                    process.state = ProcessState::Terminated;
                }
            }
        }
    }
    Ok(())
}

/// Push one 32-bit value. SP moves down by 4 first; crossing the stack floor
/// is a stack fault and nothing is stored.
fn push(ctx: &mut ExecCtx, pid: Pid, value: u32) -> Result<(), Fault> {
    let floor = ctx.procs[ctx.current].stack_floor();
    let new_sp = ctx.cpu.sp().wrapping_sub(4);
    if new_sp < floor || new_sp > ctx.cpu.sp() {
        return Err(Fault::Stack {
            pid,
            overflow: floor.wrapping_sub(new_sp),
        });
    }
    ctx.cpu.set_sp(new_sp);
    ctx.mem.write_u32(pid, new_sp, value)
}

/// Pop one 32-bit value and zero the vacated slot.
fn pop(ctx: &mut ExecCtx, pid: Pid) -> Result<u32, Fault> {
    let sp = ctx.cpu.sp();
    let value = ctx.mem.read_u32(pid, sp)?;
    ctx.mem.write_u32(pid, sp, 0)?;
    ctx.cpu.set_sp(sp.wrapping_add(4));
    Ok(value)
}

/// One line from stdin, parsed as unsigned 32-bit; garbage reads as 0.
fn read_u32_from_stdin() -> u32 {
    let mut line = String::new();
    if std::io::stdin().lock().read_line(&mut line).is_err() {
        return 0;
    }
    line.trim().parse().unwrap_or(0)
}
