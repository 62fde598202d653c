//! Script runtime session.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use splice_common::config::ExecutorConfig;
use splice_common::error::SpliceResult;
use splice_executor::{CommandExecutor, CommandHandler, CommandSender, ExecutorState};

use crate::caller::CallerContext;
use crate::engine::{ScriptContext, ScriptEngine};
use crate::loader::ResourceLoader;

/// Work items executed on the session's worker thread.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptCommand {
    Log(String),
    Load(String),
    Execute(String),
}

/// Outcome of one `execute` call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScriptResult {
    /// Resource the evaluating context was loaded from.
    pub resource: String,
    pub script: String,
    pub value: Value,
}

type ResultCallback = Arc<dyn Fn(ScriptResult) + Send + Sync + 'static>;

struct LoadedContext {
    resource: String,
    context: Box<dyn ScriptContext>,
}

struct ScriptWorker {
    loader: Box<dyn ResourceLoader>,
    engine: Box<dyn ScriptEngine>,
    loaded: Option<LoadedContext>,
    caller: Arc<dyn CallerContext>,
    on_result: ResultCallback,
}

impl CommandHandler<ScriptCommand> for ScriptWorker {
    fn handle(
        &mut self,
        command: ScriptCommand,
        _sender: &CommandSender<ScriptCommand>,
    ) -> anyhow::Result<()> {
        match command {
            ScriptCommand::Log(text) => {
                tracing::info!(target: "splice::script", text = %text, "Script log");
            }
            ScriptCommand::Load(resource) => {
                let bytes = self.loader.load(&resource)?;
                let context = self.engine.create_context(&bytes)?;
                if let Some(previous) = self.loaded.replace(LoadedContext {
                    resource: resource.clone(),
                    context,
                }) {
                    tracing::debug!(previous = %previous.resource, "Replacing script context");
                }
                tracing::info!(%resource, bytes = bytes.len(), "Script context loaded");
            }
            ScriptCommand::Execute(script) => {
                let Some(loaded) = self.loaded.as_mut() else {
                    tracing::debug!("No script context loaded; ignoring execute");
                    return Ok(());
                };
                let value = loaded.context.evaluate(&script)?;
                let result = ScriptResult {
                    resource: loaded.resource.clone(),
                    script,
                    value,
                };
                let on_result = Arc::clone(&self.on_result);
                self.caller.post(Box::new(move || on_result(result)));
            }
        }
        Ok(())
    }
}

/// Loads and evaluates scripts on a dedicated worker thread.
pub struct ScriptSession {
    executor: CommandExecutor<ScriptCommand>,
}

impl ScriptSession {
    /// Create a session. Results of `execute` are posted to `caller`, which
    /// runs `on_result` on the caller's context.
    pub fn new(
        config: ExecutorConfig,
        loader: impl ResourceLoader,
        engine: impl ScriptEngine,
        caller: Arc<dyn CallerContext>,
        on_result: impl Fn(ScriptResult) + Send + Sync + 'static,
    ) -> Self {
        let worker = ScriptWorker {
            loader: Box::new(loader),
            engine: Box::new(engine),
            loaded: None,
            caller,
            on_result: Arc::new(on_result),
        };
        Self {
            executor: CommandExecutor::new(config, worker),
        }
    }

    pub fn start(&self) -> SpliceResult<()> {
        self.executor.start()
    }

    pub fn stop(&self) {
        self.executor.stop();
    }

    pub fn state(&self) -> ExecutorState {
        self.executor.state()
    }

    /// Load a resource, replacing the live context once it succeeds.
    pub fn load(&self, resource: impl Into<String>) {
        self.executor.enqueue(ScriptCommand::Load(resource.into()));
    }

    /// Evaluate against the most recently loaded context.
    ///
    /// Without a loaded context this produces no result.
    pub fn execute(&self, script: impl Into<String>) {
        self.executor.enqueue(ScriptCommand::Execute(script.into()));
    }

    pub fn log(&self, value: impl Into<String>) {
        self.executor.enqueue(ScriptCommand::Log(value.into()));
    }

    /// Wait until every queued command has run.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        self.executor.wait_idle(timeout)
    }
}
