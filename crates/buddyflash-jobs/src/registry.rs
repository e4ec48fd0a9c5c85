//! Job registry
//!
//! This module handles creating flash jobs, tracking them by id and
//! enforcing that a device runs at most one unfinished job at a time.
//! Callers only ever see [`FlashJob`] snapshots; the running job owns the
//! record and publishes every change.

use crate::config::RegistryConfig;
use crate::machine::JobRunner;
use crate::resolver::Resolver;
use buddyflash_core::error::{Error, Result};
use buddyflash_core::{DeviceConnector, FirmwareDescriptor, FlashJob, JobId};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// What a caller asks for when starting a job
///
/// Fields are optional the way a form leaves them; they are validated by
/// [`JobRegistry::create_job`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlashRequest {
    /// Device target code, e.g. `x9d`
    pub target: Option<String>,
    /// Release version or `pr-<prId>@<commitId>`
    pub version: Option<String>,
    /// Device id or connection string
    pub device_id: String,
}

impl FlashRequest {
    /// Build a request from its parts
    pub fn new(
        target: impl Into<String>,
        version: impl Into<String>,
        device_id: impl Into<String>,
    ) -> Self {
        Self {
            target: Some(target.into()),
            version: Some(version.into()),
            device_id: device_id.into(),
        }
    }

    /// Decode and validate the firmware descriptor
    pub fn descriptor(&self) -> Result<FirmwareDescriptor> {
        FirmwareDescriptor::from_parts(self.target.as_deref(), self.version.as_deref())
    }
}

struct JobEntry {
    /// Connector key of the device, see [`DeviceConnector::device_key`]
    device_key: String,
    snapshot: watch::Receiver<FlashJob>,
    cancel: CancellationToken,
    created: Instant,
    finished: Option<Instant>,
}

impl JobEntry {
    fn is_terminal(&self) -> bool {
        self.snapshot.borrow().is_terminal()
    }
}

#[derive(Default)]
struct Jobs {
    entries: HashMap<JobId, JobEntry>,
    /// Keys of devices whose firmware is still being resolved
    reserved: HashSet<String>,
}

impl Jobs {
    fn device_busy(&self, device_key: &str) -> bool {
        self.reserved.contains(device_key)
            || self
                .entries
                .values()
                .any(|e| e.device_key == device_key && !e.is_terminal())
    }

    /// Drop finished jobs older than `retention`
    fn evict_expired(&mut self, retention: std::time::Duration) {
        let now = Instant::now();
        self.entries.retain(|id, entry| {
            let expired = entry
                .finished
                .is_some_and(|at| now.duration_since(at) >= retention);
            if expired {
                log::debug!("job {}: evicted after retention period", id);
            }
            !expired
        });
    }
}

/// Releases a device reservation when dropped
struct Reservation {
    jobs: Arc<Mutex<Jobs>>,
    device_key: String,
}

impl Drop for Reservation {
    fn drop(&mut self) {
        self.jobs.lock().reserved.remove(&self.device_key);
    }
}

/// Tracks flash jobs and starts them
///
/// Cloning is cheap; clones share the same jobs.
#[derive(Clone)]
pub struct JobRegistry {
    jobs: Arc<Mutex<Jobs>>,
    resolver: Arc<Resolver>,
    connector: Arc<dyn DeviceConnector>,
    config: RegistryConfig,
}

impl JobRegistry {
    /// Create a registry that resolves firmware with `resolver` and opens
    /// devices with `connector`
    pub fn new(
        resolver: Arc<Resolver>,
        connector: Arc<dyn DeviceConnector>,
        config: RegistryConfig,
    ) -> Self {
        Self {
            jobs: Arc::new(Mutex::new(Jobs::default())),
            resolver,
            connector,
            config,
        }
    }

    /// Get the configuration
    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    fn lock(&self) -> parking_lot::MutexGuard<'_, Jobs> {
        let mut jobs = self.jobs.lock();
        jobs.evict_expired(self.config.retention);
        jobs
    }

    /// Resolve the firmware and start flashing it to the device
    ///
    /// Returns as soon as the job is running. The device is reserved before
    /// the firmware is fetched, so a concurrent request for the same device
    /// fails with [`Error::DeviceBusy`] even while resolution is in flight.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidDescriptor`] if target, version or device id are
    ///   missing or malformed
    /// - [`Error::DeviceBusy`] if the device has an unfinished job, under
    ///   this id or any other id the connector maps to the same device
    /// - any resolver error ([`Error::NotFound`], [`Error::Corrupt`],
    ///   [`Error::Unavailable`])
    ///
    /// No job is recorded when an error is returned.
    pub async fn create_job(&self, request: &FlashRequest) -> Result<JobId> {
        let descriptor = request.descriptor()?;
        let device_id = request.device_id.trim();
        if device_id.is_empty() {
            return Err(Error::InvalidDescriptor("device id is missing".into()));
        }

        let device_key = self.connector.device_key(device_id);
        let reservation = {
            let mut jobs = self.lock();
            if jobs.device_busy(&device_key) {
                return Err(Error::DeviceBusy(device_id.to_string()));
            }
            jobs.reserved.insert(device_key.clone());
            Reservation {
                jobs: Arc::clone(&self.jobs),
                device_key: device_key.clone(),
            }
        };

        let binary = self.resolver.resolve(&descriptor).await?;

        let id = JobId::new();
        let (tx, rx) = watch::channel(FlashJob::new(id, descriptor.clone(), device_id));
        let cancel = CancellationToken::new();
        {
            let mut jobs = self.jobs.lock();
            jobs.entries.insert(
                id,
                JobEntry {
                    device_key,
                    snapshot: rx,
                    cancel: cancel.clone(),
                    created: Instant::now(),
                    finished: None,
                },
            );
        }
        // The queued job now holds the device
        drop(reservation);

        log::info!(
            "job {}: flashing {} to {} ({} bytes)",
            id,
            descriptor,
            device_id,
            binary.size_bytes()
        );

        let runner = JobRunner::new(
            tx,
            binary,
            Arc::clone(&self.connector),
            cancel,
            self.config.flash_options(),
        );
        let jobs = Arc::clone(&self.jobs);
        tokio::spawn(async move {
            let job = runner.run().await;
            if let Some(entry) = jobs.lock().entries.get_mut(&job.id) {
                entry.finished = Some(Instant::now());
            }
        });

        Ok(id)
    }

    /// Request cancellation of a job
    ///
    /// The job stops at its next checkpoint and ends `Cancelled`. Cancelling
    /// a finished or unknown job does nothing.
    pub fn cancel_job(&self, id: JobId) {
        let jobs = self.lock();
        match jobs.entries.get(&id) {
            Some(entry) if !entry.is_terminal() => {
                if !entry.cancel.is_cancelled() {
                    log::info!("job {}: cancellation requested", id);
                    entry.cancel.cancel();
                }
            }
            Some(_) => log::debug!("job {}: already finished, cancel ignored", id),
            None => log::debug!("job {}: unknown, cancel ignored", id),
        }
    }

    /// Current snapshot of a job
    ///
    /// # Errors
    ///
    /// [`Error::NotFound`] for an unknown or evicted id.
    pub fn get_status(&self, id: JobId) -> Result<FlashJob> {
        let jobs = self.lock();
        jobs.entries
            .get(&id)
            .map(|entry| entry.snapshot.borrow().clone())
            .ok_or_else(|| Error::NotFound(format!("job {}", id)))
    }

    /// Live updates for a job
    ///
    /// The receiver sees the current snapshot immediately and every change
    /// after it.
    pub fn subscribe(&self, id: JobId) -> Result<watch::Receiver<FlashJob>> {
        let jobs = self.lock();
        jobs.entries
            .get(&id)
            .map(|entry| entry.snapshot.clone())
            .ok_or_else(|| Error::NotFound(format!("job {}", id)))
    }

    /// Snapshots of all retained jobs, oldest first
    pub fn list(&self) -> Vec<FlashJob> {
        let jobs = self.lock();
        let mut entries: Vec<_> = jobs.entries.values().collect();
        entries.sort_by_key(|e| e.created);
        entries
            .into_iter()
            .map(|e| e.snapshot.borrow().clone())
            .collect()
    }

    /// Forget a finished job
    ///
    /// Returns `true` if the job was removed. Unfinished and unknown jobs
    /// are left alone.
    pub fn acknowledge(&self, id: JobId) -> bool {
        let mut jobs = self.lock();
        let finished = jobs.entries.get(&id).is_some_and(|e| e.is_terminal());
        if finished {
            jobs.entries.remove(&id);
            log::debug!("job {}: acknowledged", id);
        }
        finished
    }
}
