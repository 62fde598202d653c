//! Splice Script Runtime
//!
//! A script session owns one command executor. `load`, `execute`, and `log`
//! are queued as commands and run on the executor's worker thread, where
//! the live script context is kept. Results are posted back to the caller's
//! own execution context.

pub mod caller;
pub mod engine;
pub mod loader;
pub mod session;

pub use caller::{CallerContext, InlineContext, Mailbox, MailboxContext, RuntimeContext};
pub use engine::{JsonEngine, ScriptContext, ScriptEngine};
pub use loader::{FileLoader, MemoryLoader, ResourceLoader};
pub use session::{ScriptCommand, ScriptResult, ScriptSession};
