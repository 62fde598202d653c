//! Splice Executor
//!
//! A dedicated worker thread that sleeps on a run loop until a wakeable
//! queue source is signaled, then drains a FIFO command queue one command
//! per wake.
//!
//! # Architecture
//!
//! ```text
//!  any thread                         worker thread
//! ┌───────────────┐   push    ┌──────────────────────────────┐
//! │ CommandSender │──────────▶│ CommandQueue (FIFO, mutex)   │
//! └───────┬───────┘           └──────────────┬───────────────┘
//!         │ signal                           │ pop one
//!         ▼                                  ▼
//! ┌───────────────┐  wake     ┌──────────────────────────────┐
//! │ QueueSource   │──────────▶│ RunLoop ─▶ CommandHandler    │
//! └───────┬───────┘           └──────────────────────────────┘
//!         │ register / remove
//!         ▼
//! ┌───────────────┐
//! │ SourceRegistry│  (single-entry slot)
//! └───────────────┘
//! ```

pub mod executor;
pub mod source;

pub use executor::*;
pub use source::{QueueSource, RunLoop, RunLoopId, RunResult, SourceContext, SourceRegistry};
