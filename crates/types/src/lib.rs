pub mod config;
pub mod fault;

pub use config::Config;
pub use fault::Fault;

/// Process identifier. Pid 0 is reserved for the OS itself; real processes
/// are numbered from 1 by the kernel's pid pool.
pub type Pid = u32;

pub const OS_PID: Pid = 0;
