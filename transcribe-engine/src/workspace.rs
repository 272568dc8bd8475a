//! Per-job workspace directory layout.
//!
//! ```text
//! <workspace_root>/<job_id>/
//!   source.{wav|mp3|...}
//!   stems/<instrument>.wav
//!   transcriptions/<instrument>/{a,b,ensemble,refined}.mid + *_confidence.json
//!   artifacts/<instrument>.mid + <instrument>_confidence.json
//! ```

use std::path::{Path, PathBuf};
use transcribe_common::model::{Instrument, JobId};

pub struct JobWorkspace {
    root: PathBuf,
}

impl JobWorkspace {
    pub fn new(workspace_root: &Path, job_id: JobId) -> Self {
        Self {
            root: workspace_root.join(job_id.to_string()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn source_path(&self, extension: &str) -> PathBuf {
        self.root.join(format!("source.{extension}"))
    }

    pub fn stems_dir(&self) -> PathBuf {
        self.root.join("stems")
    }

    pub fn stem_path(&self, instrument: Instrument) -> PathBuf {
        self.stems_dir().join(format!("{}.wav", instrument.as_tag()))
    }

    pub fn transcriptions_dir(&self, instrument: Instrument) -> PathBuf {
        self.root.join("transcriptions").join(instrument.as_tag())
    }

    pub fn artifacts_dir(&self) -> PathBuf {
        self.root.join("artifacts")
    }

    pub fn artifact_midi_path(&self, instrument: Instrument) -> PathBuf {
        self.artifacts_dir().join(format!("{}.mid", instrument.as_tag()))
    }

    pub fn artifact_confidence_path(&self, instrument: Instrument) -> PathBuf {
        self.artifacts_dir()
            .join(format!("{}_confidence.json", instrument.as_tag()))
    }

    /// Creates every directory this workspace will write into. Safe to
    /// call repeatedly.
    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.root)?;
        std::fs::create_dir_all(self.stems_dir())?;
        std::fs::create_dir_all(self.artifacts_dir())?;
        Ok(())
    }

    /// Removes the whole job directory, including stems and
    /// intermediate transcriptions. Called on job termination per the
    /// data model's stated stem lifetime.
    pub fn remove_stems(&self) -> std::io::Result<()> {
        let dir = self.stems_dir();
        if dir.exists() {
            std::fs::remove_dir_all(dir)?;
        }
        Ok(())
    }
}
