pub mod engine;
pub mod shutdown;
pub mod supervisor;
pub mod sweep;
pub mod worker;

pub use engine::{EngineError, ExecutionEngine, TokenMeter};
pub use shutdown::{install_signal_handler, RunningJobs, ShutdownCoordinator};
pub use supervisor::{Supervisor, SupervisorConfig, INTERRUPTED_MESSAGE};
pub use sweep::run_sweeper;
pub use worker::{WorkerLoop, WorkerLoopConfig};
