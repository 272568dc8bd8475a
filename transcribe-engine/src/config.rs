//! Startup configuration resolution for transcribe-engine.

use std::path::PathBuf;
use transcribe_common::config::{resolve_engine_config, resolve_workspace_root, EngineConfig};
use transcribe_common::Result;

/// Fully resolved engine configuration for one process lifetime.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub workspace_root: PathBuf,
    pub db_path: PathBuf,
    pub engine: EngineConfig,
    pub bind_addr: String,
}

impl AppConfig {
    /// Resolves the workspace root (CLI arg > `TRANSCRIBE_WORKSPACE_ROOT`
    /// env var > TOML config > OS default), the sqlite mirror path
    /// beneath it, and the engine tuning knobs.
    pub fn resolve(workspace_root_arg: Option<&str>, bind_addr: Option<&str>) -> Result<Self> {
        let workspace_root =
            resolve_workspace_root(workspace_root_arg, "TRANSCRIBE_WORKSPACE_ROOT")?;
        let db_path = workspace_root.join("jobs.db");
        let engine = resolve_engine_config();
        let bind_addr = bind_addr
            .map(str::to_string)
            .or_else(|| std::env::var("TRANSCRIBE_BIND_ADDR").ok())
            .unwrap_or_else(|| "127.0.0.1:5824".to_string());

        Ok(Self {
            workspace_root,
            db_path,
            engine,
            bind_addr,
        })
    }
}
