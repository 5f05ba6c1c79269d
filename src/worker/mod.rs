//! Refresh engine: the shared context, the pending counter, the fan-out/fan-in
//! refresh pipeline and the scheduler that drives it.

mod context;
mod pending;
mod pipeline;
mod scheduler;

pub use context::WorkerContext;
pub use pending::PendingCounter;
pub use pipeline::{run_cycle, CycleReport, FetchResult};
pub use scheduler::{RefreshOutcome, Worker};
