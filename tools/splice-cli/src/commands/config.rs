//! Show or initialize the configuration file.

use splice_common::config::{config_file_path, AppConfig};

pub fn run(config: &AppConfig, init: bool) -> anyhow::Result<()> {
    if init {
        let path = AppConfig::default().save()?;
        println!("Wrote default configuration to {}", path.display());
        return Ok(());
    }

    let path = config_file_path();
    let source = if path.exists() { "file" } else { "defaults" };
    println!("# {} ({source})", path.display());
    println!("{}", serde_json::to_string_pretty(config)?);
    Ok(())
}
