//! Persistence for recurring purchase schedules

use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::debug;

use super::types::DcaSchedule;
use crate::common::errors::{PortfolioError, Result};

/// Where schedules survive process restarts
pub trait ScheduleStore: Send + Sync {
    /// Everything saved so far; empty when nothing was ever saved
    fn load(&self) -> Result<Vec<DcaSchedule>>;

    /// Replace the stored set with `schedules`
    fn save(&self, schedules: &[DcaSchedule]) -> Result<()>;
}

/// Keeps schedules for the life of the process only
#[derive(Debug, Default)]
pub struct MemoryScheduleStore {
    schedules: Mutex<Vec<DcaSchedule>>,
}

impl MemoryScheduleStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn guard(&self) -> Result<std::sync::MutexGuard<'_, Vec<DcaSchedule>>> {
        self.schedules
            .lock()
            .map_err(|_| PortfolioError::Internal("schedule store lock poisoned".into()))
    }
}

impl ScheduleStore for MemoryScheduleStore {
    fn load(&self) -> Result<Vec<DcaSchedule>> {
        Ok(self.guard()?.clone())
    }

    fn save(&self, schedules: &[DcaSchedule]) -> Result<()> {
        *self.guard()? = schedules.to_vec();
        Ok(())
    }
}

/// A pretty-printed JSON array on disk
///
/// Writes go to a sibling temp file which is then renamed over the target, so
/// a crash mid-write leaves the previous state intact.
#[derive(Debug, Clone)]
pub struct JsonFileScheduleStore {
    path: PathBuf,
}

impl JsonFileScheduleStore {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self.path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

impl ScheduleStore for JsonFileScheduleStore {
    fn load(&self) -> Result<Vec<DcaSchedule>> {
        let bytes = match std::fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        serde_json::from_slice(&bytes).map_err(|e| {
            PortfolioError::Persistence(format!("corrupt schedule file {}: {}", self.path.display(), e))
        })
    }

    fn save(&self, schedules: &[DcaSchedule]) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_vec_pretty(schedules)?;
        let temp = self.temp_path();
        std::fs::write(&temp, json)?;
        std::fs::rename(&temp, &self.path)?;
        debug!("Saved {} schedules to {}", schedules.len(), self.path.display());
        Ok(())
    }
}
