//! Flash command implementation

use buddyflash_core::{FlashJob, JobState};
use buddyflash_jobs::{FlashRequest, JobRegistry};
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

/// Progress display for one job, fed from its snapshots
struct JobProgress {
    bar: ProgressBar,
    state: Option<JobState>,
}

impl JobProgress {
    fn new() -> Self {
        let bar = ProgressBar::new(100);
        bar.set_style(
            ProgressStyle::default_bar()
                .template(
                    "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos:>3}% {msg}",
                )
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("#>-"),
        );
        bar.enable_steady_tick(Duration::from_millis(100));
        Self { bar, state: None }
    }

    fn update(&mut self, job: &FlashJob) {
        if self.state != Some(job.state) {
            self.bar.set_message(phase_message(job.state));
            self.state = Some(job.state);
        }
        self.bar.set_position(job.progress as u64);
    }

    fn finish(&self, job: &FlashJob) {
        match job.state {
            JobState::Done => self.bar.finish_with_message("Flash complete"),
            JobState::Cancelled => self.bar.abandon_with_message("Cancelled"),
            _ => self.bar.abandon_with_message("Failed"),
        }
    }
}

fn phase_message(state: JobState) -> &'static str {
    match state {
        JobState::Queued => "Queued",
        JobState::Connecting => "Connecting...",
        JobState::Erasing => "Erasing...",
        JobState::Writing => "Writing",
        JobState::Verifying => "Verifying",
        JobState::Done => "Done",
        JobState::Failed => "Failed",
        JobState::Cancelled => "Cancelled",
    }
}

/// Start a job and follow it to its end
///
/// Ctrl-C cancels the job instead of killing the process, so the device is
/// released cleanly before we exit.
pub async fn run_flash(
    registry: &JobRegistry,
    request: &FlashRequest,
) -> Result<FlashJob, Box<dyn std::error::Error>> {
    let id = registry.create_job(request).await?;
    log::info!("Started job {} on {}", id, request.device_id);

    let mut updates = registry.subscribe(id)?;
    let mut progress = JobProgress::new();
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut interrupted = false;

    let job = loop {
        let job = updates.borrow_and_update().clone();
        progress.update(&job);
        if job.is_terminal() {
            break job;
        }

        tokio::select! {
            changed = updates.changed() => {
                if changed.is_err() {
                    break registry.get_status(id)?;
                }
            }
            _ = &mut ctrl_c, if !interrupted => {
                log::warn!("Interrupted, cancelling job {}", id);
                registry.cancel_job(id);
                interrupted = true;
            }
        }
    };

    progress.finish(&job);
    registry.acknowledge(id);

    match job.state {
        JobState::Done => {
            println!("Flashed {} to {}", job.descriptor, job.device_id);
            Ok(job)
        }
        JobState::Cancelled => Err(format!("Job {} cancelled at {}%", id, job.progress).into()),
        _ => {
            let reason = job
                .error
                .as_ref()
                .map(|e| e.to_string())
                .unwrap_or_else(|| "unknown error".to_string());
            Err(format!("Job {} failed: {}", id, reason).into())
        }
    }
}

#[cfg(all(test, feature = "dummy"))]
mod tests {
    use super::*;
    use crate::connectors::Connectors;
    use buddyflash_jobs::{DirectoryFetcher, RegistryConfig, Resolver};
    use std::sync::Arc;

    fn registry(dir: &std::path::Path) -> JobRegistry {
        let resolver = Arc::new(Resolver::new(
            Arc::new(DirectoryFetcher::new(dir)),
            Duration::from_millis(1),
        ));
        JobRegistry::new(
            resolver,
            Arc::new(Connectors::default()),
            RegistryConfig::default(),
        )
    }

    #[tokio::test]
    async fn test_flash_from_mirror_to_dummy() {
        let dir = tempfile::tempdir().unwrap();
        let image: Vec<u8> = (0..10_000).map(|i| (i % 13) as u8).collect();
        std::fs::write(dir.path().join("x9d-v2.9.0.bin"), &image).unwrap();

        let registry = registry(dir.path());
        let job = run_flash(&registry, &FlashRequest::new("x9d", "v2.9.0", "dummy"))
            .await
            .unwrap();
        assert_eq!(job.state, JobState::Done);
        assert_eq!(job.progress, 100);
        assert!(registry.get_status(job.id).is_err());
    }

    #[tokio::test]
    async fn test_missing_firmware_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let registry = registry(dir.path());
        let err = run_flash(&registry, &FlashRequest::new("x9d", "v0.0.1", "dummy"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("x9d"), "{}", err);
        assert!(registry.list().is_empty());
    }
}
