//! Flash job state machine
//!
//! One [`JobRunner`] drives one job from `Queued` to a terminal state. It
//! is the only writer of the job record; every change is published on a
//! `watch` channel that the registry and subscribers read.

use buddyflash_core::error::{Error, Result, Step};
use buddyflash_core::flash::{flash, FlashObserver, FlashOptions, FlashStats};
use buddyflash_core::{DeviceConnector, DeviceProtocol, FirmwareBinary, FlashJob, JobState};
use std::sync::Arc;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// Publishes job changes to pollers and subscribers
struct Publisher {
    job: FlashJob,
    tx: watch::Sender<FlashJob>,
}

impl Publisher {
    fn publish(&self) {
        self.tx.send_replace(self.job.clone());
    }

    fn enter(&mut self, state: JobState) {
        let from = self.job.state;
        if self.job.transition(state) {
            log::info!("job {}: {} -> {}", self.job.id, from, state);
            self.publish();
        }
    }
}

impl FlashObserver for Publisher {
    fn phase(&mut self, state: JobState) {
        self.enter(state);
    }

    fn progress(&mut self, percent: u8) {
        let before = self.job.progress;
        self.job.advance(percent);
        if self.job.progress != before {
            self.publish();
        }
    }
}

/// Runs one flash job to completion
pub(crate) struct JobRunner {
    publisher: Publisher,
    binary: FirmwareBinary,
    connector: Arc<dyn DeviceConnector>,
    cancel: CancellationToken,
    options: FlashOptions,
}

impl JobRunner {
    pub(crate) fn new(
        tx: watch::Sender<FlashJob>,
        binary: FirmwareBinary,
        connector: Arc<dyn DeviceConnector>,
        cancel: CancellationToken,
        options: FlashOptions,
    ) -> Self {
        let job = tx.borrow().clone();
        Self {
            publisher: Publisher { job, tx },
            binary,
            connector,
            cancel,
            options,
        }
    }

    /// Drive the job to a terminal state and return the final record
    ///
    /// The driver is always closed before the terminal state is published,
    /// so the device is free by the time anyone sees the job finish.
    pub(crate) async fn run(mut self) -> FlashJob {
        if self.cancel.is_cancelled() {
            return self.finish(Err(Error::Cancelled));
        }

        self.publisher.enter(JobState::Connecting);
        let device_id = self.publisher.job.device_id.clone();
        let mut driver = match self.connect(&device_id).await {
            Ok(driver) => driver,
            Err(e) => return self.finish(Err(e)),
        };

        let result = flash(
            driver.as_mut(),
            &self.binary,
            &mut self.publisher,
            &self.cancel,
            &self.options,
        )
        .await;

        driver.close().await;
        log::debug!("job {}: released {}", self.publisher.job.id, device_id);

        self.finish(result)
    }

    async fn connect(&self, device_id: &str) -> Result<Box<dyn DeviceProtocol>> {
        let deadline = self.options.deadlines.connect;
        match tokio::time::timeout(deadline, self.connector.connect(device_id)).await {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout(Step::Connect)),
        }
    }

    fn finish(mut self, result: Result<FlashStats>) -> FlashJob {
        let id = self.publisher.job.id;
        match result {
            Ok(stats) => {
                log::info!(
                    "job {}: wrote and verified {} bytes in {} chunks",
                    id,
                    stats.bytes_verified,
                    stats.chunks
                );
                self.publisher.enter(JobState::Done);
            }
            Err(Error::Cancelled) => {
                log::info!("job {}: cancelled at {}%", id, self.publisher.job.progress);
                self.publisher.enter(JobState::Cancelled);
            }
            Err(e) => {
                log::error!("job {}: {}", id, e);
                let from = self.publisher.job.state;
                if self.publisher.job.fail(&e) {
                    log::info!("job {}: {} -> {}", id, from, JobState::Failed);
                    self.publisher.publish();
                }
            }
        }
        self.publisher.job
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use buddyflash_core::{ErrorKind, FirmwareDescriptor, JobId};
    use buddyflash_dummy::{DummyConnector, DummyFaults};

    fn runner(
        connector: &DummyConnector,
        image_len: usize,
        cancel: CancellationToken,
    ) -> (JobRunner, watch::Receiver<FlashJob>) {
        let desc = FirmwareDescriptor::from_parts(Some("x9d"), Some("v2.9.0")).unwrap();
        let (tx, rx) = watch::channel(FlashJob::new(JobId::new(), desc, "dev1"));
        let bytes = (0..image_len).map(|i| (i % 251) as u8).collect();
        let binary = FirmwareBinary::new(bytes, None).unwrap();
        let runner = JobRunner::new(
            tx,
            binary,
            Arc::new(connector.clone()),
            cancel,
            FlashOptions::default(),
        );
        (runner, rx)
    }

    #[tokio::test]
    async fn test_run_to_done() {
        let connector = DummyConnector::default();
        let (runner, rx) = runner(&connector, 20_000, CancellationToken::new());
        let job = runner.run().await;

        assert_eq!(job.state, JobState::Done);
        assert_eq!(job.progress, 100);
        assert!(job.error.is_none());
        assert_eq!(*rx.borrow(), job);
        assert!(!connector.radio("dev1").is_open());
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let connector = DummyConnector::default();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let (runner, _rx) = runner(&connector, 1024, cancel);
        let job = runner.run().await;

        assert_eq!(job.state, JobState::Cancelled);
        assert!(job.error.is_none());
        assert_eq!(connector.radio("dev1").write_count(), 0);
    }

    #[tokio::test]
    async fn test_unplugged_device_fails_from_connecting() {
        let connector = DummyConnector::default();
        connector.unplug("dev1");
        let (runner, _rx) = runner(&connector, 1024, CancellationToken::new());
        let job = runner.run().await;

        assert_eq!(job.state, JobState::Failed);
        assert_eq!(job.error.as_ref().map(|e| e.kind), Some(ErrorKind::NotFound));
    }

    #[tokio::test]
    async fn test_failure_keeps_detail_and_releases_device() {
        let connector = DummyConnector::default();
        connector.radio("dev1").set_faults(DummyFaults {
            nak_write_at: Some(5000),
            ..DummyFaults::default()
        });
        let (runner, _rx) = runner(&connector, 20_000, CancellationToken::new());
        let job = runner.run().await;

        assert_eq!(job.state, JobState::Failed);
        let error = job.error.unwrap();
        assert_eq!(error.kind, ErrorKind::ProtocolError);
        assert!(error.message.contains("program failed"), "{}", error.message);
        assert!(job.progress < 50);
        assert!(!connector.radio("dev1").is_open());
    }
}
