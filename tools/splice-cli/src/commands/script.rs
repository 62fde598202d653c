//! Evaluate statements against a loaded script resource.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use splice_common::config::AppConfig;
use splice_script::{FileLoader, JsonEngine, RuntimeContext, ScriptSession};

pub async fn run(
    config: &AppConfig,
    resource: String,
    root: Option<PathBuf>,
    statements: Vec<String>,
) -> anyhow::Result<()> {
    let root = match root {
        Some(root) => root,
        None => std::env::current_dir()?,
    };

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let session = ScriptSession::new(
        config.executor.clone(),
        FileLoader::new(root),
        JsonEngine,
        Arc::new(RuntimeContext::current()),
        move |result| {
            let _ = tx.send(result);
        },
    );
    session.start()?;
    session.log(format!("loading {resource}"));
    session.load(resource);
    for statement in &statements {
        session.execute(statement.clone());
    }

    let idle = tokio::task::spawn_blocking(move || {
        let idle = session.wait_idle(Duration::from_secs(30));
        session.stop();
        idle
    })
    .await?;
    if !idle {
        anyhow::bail!("script session did not drain its queue in time");
    }

    // The session is gone; the channel closes once every posted result ran.
    let mut delivered = 0;
    while let Some(result) = rx.recv().await {
        println!("{} => {}", result.script, serde_json::to_string(&result.value)?);
        delivered += 1;
    }
    if delivered < statements.len() {
        println!(
            "{} statement(s) produced no result; run with -v for details",
            statements.len() - delivered
        );
    }
    Ok(())
}
