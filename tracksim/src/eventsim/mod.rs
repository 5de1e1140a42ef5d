//! Single-threaded periodic event loop.

pub mod simulation;
pub mod observable;

pub use self::simulation::{Process, ProcessId, Scheduler, Simulation};
pub use self::observable::Observable;
