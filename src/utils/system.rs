// src/utils/system.rs: System functions

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Result;
use log::warn;
use sysinfo::{CpuRefreshKind, RefreshKind, System};
use tempfile::TempDir;
use tokio::time::sleep;

use crate::config::defs::PipelineError;


/// Determines number of cores that can be handed to external tools
///
/// # Arguments
///
/// * `args_threads` - Upper bound from the command line.
///
/// # Returns
///
/// Result<usize, f32> maximum cores, current cpu usage
pub async fn detect_cores_and_load(args_threads: usize) -> Result<(usize, f32)> {
    let refresh_kind = RefreshKind::nothing().with_cpu(Default::default());
    let mut system = System::new_with_specifics(refresh_kind);
    system.refresh_cpu_all();
    let physical_cores = System::physical_core_count().unwrap_or(1);
    system.refresh_cpu_specifics(CpuRefreshKind::nothing().with_cpu_usage());
    sleep(Duration::from_millis(100)).await;
    let cpu_load = system.global_cpu_usage();
    let max_cores = physical_cores.min(args_threads).max(1);
    Ok((max_cores, cpu_load))
}


/// Searches for a directory for RAM temp files.
/// Prefers /dev/shm (RAM disk) for linux, otherwise returns the standard temp dir.
///
/// # Returns
/// PathBuf: temp dir for RAM files.
pub fn get_ram_temp_dir() -> PathBuf {
    #[cfg(any(target_os = "linux", target_os = "macos"))]
    {
        if let Ok(metadata) = fs::metadata("/dev/shm") {
            if metadata.is_dir() {
                return PathBuf::from("/dev/shm");
            }
        }
        std::env::temp_dir()
    }

    #[cfg(not(any(target_os = "linux", target_os = "macos")))]
    {
        std::env::temp_dir()
    }
}


/// Scratch directory under the RAM temp root. Removed by `cleanup`, or on
/// drop when a stage exits early; a failed removal only warns.
#[derive(Debug)]
pub struct ScratchDir {
    dir: Option<TempDir>,
    path: PathBuf,
}

impl ScratchDir {
    pub fn create(root: &Path, label: &str) -> Result<Self, PipelineError> {
        let dir = tempfile::Builder::new()
            .prefix(&format!("nanotax_{}_", label))
            .tempdir_in(root)
            .map_err(|e| PipelineError::IOError(format!("Cannot create scratch dir in {}: {}", root.display(), e)))?;
        let path = dir.path().to_path_buf();
        Ok(ScratchDir { dir: Some(dir), path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Copies `files` from `source` into the scratch directory.
    pub fn stage_files(&self, source: &Path, files: &[&str]) -> Result<PathBuf, PipelineError> {
        for name in files {
            let from = source.join(name);
            if !from.is_file() {
                return Err(PipelineError::InvalidConfig(format!(
                    "{} is missing {}",
                    source.display(),
                    name
                )));
            }
            fs::copy(&from, self.path.join(name))?;
        }
        Ok(self.path.clone())
    }

    pub fn cleanup(mut self) -> Result<(), PipelineError> {
        match self.dir.take() {
            Some(dir) => dir.close().map_err(|e| PipelineError::ScratchCleanup {
                path: self.path.display().to_string(),
                error: e.to_string(),
            }),
            None => Ok(()),
        }
    }
}

impl Drop for ScratchDir {
    fn drop(&mut self) {
        if let Some(dir) = self.dir.take() {
            if let Err(e) = dir.close() {
                warn!("Failed to clean scratch directory {}: {}", self.path.display(), e);
            }
        }
    }
}
