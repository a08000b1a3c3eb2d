pub mod dump;
pub mod interpreter;
pub mod process;
pub mod scheduler;

pub use process::{Process, ProcessState, TIME_QUANTUM};
pub use scheduler::{EventState, Os, OutputSink};
