//! Configuration loading and workspace root resolution.
//!
//! Root resolution follows the same priority order the rest of the
//! workspace uses for init-time settings:
//! 1. Command-line argument (highest priority)
//! 2. Environment variable
//! 3. TOML config file
//! 4. OS-dependent compiled default (fallback)

use crate::{Error, Result};
use serde::Deserialize;
use std::path::PathBuf;

/// Tunable knobs for the transcription pipeline stages (C2-C6).
///
/// Loaded from TOML with field-level defaults, so an empty or partial
/// config file is always valid.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Ensemble voter weight for the generalist model (C4).
    pub voter_weight_generalist: f32,
    /// Ensemble voter weight for the piano specialist model (C4).
    pub voter_weight_specialist: f32,
    /// Onset bucket tolerance, in milliseconds, used when grouping
    /// candidate notes across ensemble members and TTA passes.
    pub onset_tolerance_ms: u32,
    /// Number of augmented passes run per source by the TTA aggregator (C5).
    pub tta_pass_count: u32,
    /// Optional safety-rail: drop notes supported by fewer than this many
    /// raw votes before TTA confidence aggregation. `None` (the default)
    /// disables the filter, since the primary gate is the confidence sum,
    /// not a vote count.
    pub min_votes: Option<usize>,
    /// Confidence threshold below which the refiner (C6) discards a cell
    /// of the rasterized note roll.
    pub refiner_threshold: f32,
    /// Minimum RMS energy, in the separator's normalized scale, below
    /// which a stem is treated as silent and skipped (C2).
    pub separator_energy_floor: f32,
    /// Per-stage timeout ceiling, in seconds, applied by the orchestrator (C7).
    pub stage_timeout_secs: u64,
    /// Maximum accepted source duration, in seconds, before a job is
    /// rejected at intake with `SourceTooLong`.
    pub max_source_duration_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            voter_weight_generalist: 0.4,
            voter_weight_specialist: 0.6,
            onset_tolerance_ms: 50,
            tta_pass_count: 5,
            min_votes: None,
            refiner_threshold: 0.5,
            separator_energy_floor: 0.01,
            stage_timeout_secs: 300,
            max_source_duration_secs: 900,
        }
    }
}

/// On-disk TOML shape for `transcribe-engine`'s configuration file.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct TomlConfig {
    pub workspace_root: Option<String>,
    #[serde(default)]
    pub engine: EngineConfig,
}

/// Resolve the workspace root directory (where job artifacts, staged
/// audio, and the sqlite mirror live) using the standard priority order.
pub fn resolve_workspace_root(
    cli_arg: Option<&str>,
    env_var_name: &str,
) -> Result<PathBuf> {
    if let Some(path) = cli_arg {
        return Ok(PathBuf::from(path));
    }

    if let Ok(path) = std::env::var(env_var_name) {
        return Ok(PathBuf::from(path));
    }

    if let Some(config) = load_toml_config().ok().flatten() {
        if let Some(root) = config.workspace_root {
            return Ok(PathBuf::from(root));
        }
    }

    Ok(default_workspace_root())
}

/// Load `transcribe-engine`'s TOML config file, if one exists.
///
/// Returns `Ok(None)` when no config file is present; that is not an
/// error, just an empty-defaults configuration.
pub fn load_toml_config() -> Result<Option<TomlConfig>> {
    let Some(path) = config_file_path() else {
        return Ok(None);
    };
    if !path.exists() {
        return Ok(None);
    }
    let content = std::fs::read_to_string(&path)?;
    let config: TomlConfig = toml::from_str(&content)
        .map_err(|e| Error::Config(format!("parse {}: {e}", path.display())))?;
    Ok(Some(config))
}

/// Resolve the engine tuning knobs, applying TOML overrides on top of
/// built-in defaults. Missing or unparsable config files fall back to
/// `EngineConfig::default()` rather than failing startup.
pub fn resolve_engine_config() -> EngineConfig {
    load_toml_config()
        .ok()
        .flatten()
        .map(|c| c.engine)
        .unwrap_or_default()
}

fn config_file_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("transcribe").join("engine.toml"))
}

fn default_workspace_root() -> PathBuf {
    if cfg!(target_os = "linux") {
        dirs::data_local_dir()
            .map(|d| d.join("transcribe"))
            .unwrap_or_else(|| PathBuf::from("/var/lib/transcribe"))
    } else if cfg!(target_os = "macos") {
        dirs::data_dir()
            .map(|d| d.join("transcribe"))
            .unwrap_or_else(|| PathBuf::from("/Library/Application Support/transcribe"))
    } else if cfg!(target_os = "windows") {
        dirs::data_local_dir()
            .map(|d| d.join("transcribe"))
            .unwrap_or_else(|| PathBuf::from("C:\\ProgramData\\transcribe"))
    } else {
        PathBuf::from("./transcribe_data")
    }
}
