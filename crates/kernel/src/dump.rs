//! Console diagnostics behind the `Dump*` config toggles. Nothing here is
//! contractual; the format exists for humans watching a run.

use colored::Colorize;
use loader::Program;
use memory::MemoryManager;
use vm::CpuState;

use crate::process::Process;

/// Hexdump of all physical memory, 16 bytes per line with an ASCII column.
pub fn physical_memory(memory: &MemoryManager) {
    let bytes = memory.physical_bytes();
    println!("{}", "--- Physical Memory Dump ---".blue());
    for (line, chunk) in bytes.chunks(16).enumerate() {
        let hex: Vec<String> = chunk.iter().map(|b| format!("{:02x}", b)).collect();
        let ascii: String = chunk
            .iter()
            .map(|&b| if b.is_ascii_graphic() { b as char } else { '.' })
            .collect();
        println!("{:08x}  {:<47}  |{}|", line * 16, hex.join(" "), ascii);
    }
    println!("{}", "----------------------------".blue());
}

/// Register file and flags after an opcode.
pub fn registers(cpu: &CpuState) {
    println!("{}", "--- Register Dump ---".blue());
    for r in 1..=9 {
        println!("r{:02}  = 0x{:08x} ({})", r, cpu.regs[r], cpu.regs[r]);
    }
    println!("r10 (sp) = 0x{:08x} ({})", cpu.sp(), cpu.sp());
    println!("r11 (ip) = 0x{:08x} ({})", cpu.ip(), cpu.ip());
    println!("sign = {}  zero = {}", cpu.sign_flag, cpu.zero_flag);
    println!("{}", "---------------------".blue());
}

pub fn context_switch_in(process: &Process) {
    println!(
        "{} pid {} (priority {}, {} cycles so far)",
        "dispatch ->".cyan(),
        process.pid,
        process.priority,
        process.clock_cycles
    );
}

pub fn context_switch_out(process: &Process) {
    println!(
        "{} pid {} ({:?}, ip 0x{:08x})",
        "save    <-".cyan(),
        process.pid,
        process.state,
        process.registers[11]
    );
}

/// Parsed program listing, one decoded instruction per line.
pub fn program(program: &Program) {
    println!("{} {}", "program:".bold(), program.name);
    for (index, instruction) in program.instructions.iter().enumerate() {
        println!("  {:3}: {}", index, instruction);
    }
}

/// Final statistics block, printed once as a process is reaped.
pub fn process_stats(process: &Process, page_faults: u32) {
    println!("{}", "=== Process Statistics ===".green().bold());
    println!("  pid:              {}", process.pid);
    println!("  priority:         {}", process.priority);
    println!("  memory size:      {} bytes", process.memory_size);
    println!("  clock cycles:     {}", process.clock_cycles);
    println!("  context switches: {}", process.context_switches);
    println!("  page faults:      {}", page_faults);
    println!("{}", "==========================".green());
}
