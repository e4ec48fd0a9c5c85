//! The flashing sequence
//!
//! [`flash`] drives a [`DeviceProtocol`] through handshake, erase, write and
//! verify. Steps run strictly in order and each one has its own deadline.
//! Cancellation is cooperative: the token is only looked at between steps
//! and between chunks, so a chunk write that has started always completes.
//!
//! Progress is one counter over write and verify together: writing covers
//! 0-50%, verifying 50-100%, so it never goes backwards within a job.

use crate::error::{Error, Result, Step};
use crate::firmware::FirmwareBinary;
use crate::job::JobState;
use crate::protocol::{DeviceInfo, DeviceProtocol};
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Default chunk size for writing and verifying (4 KiB)
pub const DEFAULT_CHUNK_SIZE: usize = 4096;

/// Per-step deadlines
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepDeadlines {
    /// Opening the transport
    pub connect: Duration,
    /// Bootloader synchronization and identification
    pub handshake: Duration,
    /// Erasing the whole image range
    pub erase: Duration,
    /// Writing a single chunk
    pub write_chunk: Duration,
    /// Reading back a single chunk
    pub verify_chunk: Duration,
}

impl StepDeadlines {
    /// Use the same deadline for every step
    pub fn uniform(deadline: Duration) -> Self {
        Self {
            connect: deadline,
            handshake: deadline,
            erase: deadline,
            write_chunk: deadline,
            verify_chunk: deadline,
        }
    }

    /// Deadline for `step`
    pub fn for_step(&self, step: Step) -> Duration {
        match step {
            Step::Connect => self.connect,
            Step::Handshake => self.handshake,
            Step::Erase => self.erase,
            Step::Write => self.write_chunk,
            Step::Verify => self.verify_chunk,
        }
    }
}

impl Default for StepDeadlines {
    fn default() -> Self {
        Self {
            connect: Duration::from_secs(5),
            handshake: Duration::from_secs(5),
            erase: Duration::from_secs(60),
            write_chunk: Duration::from_secs(5),
            verify_chunk: Duration::from_secs(5),
        }
    }
}

/// Options for one flashing run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlashOptions {
    /// Preferred chunk size, clamped to what the device accepts
    pub chunk_size: usize,
    /// Per-step deadlines
    pub deadlines: StepDeadlines,
}

impl Default for FlashOptions {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            deadlines: StepDeadlines::default(),
        }
    }
}

/// Receives phase changes and progress from [`flash`]
pub trait FlashObserver: Send {
    /// Called when the sequence enters a new phase
    fn phase(&mut self, state: JobState);

    /// Called with the overall percentage after each chunk
    fn progress(&mut self, percent: u8);
}

/// An observer that ignores everything
pub struct NoObserver;

impl FlashObserver for NoObserver {
    fn phase(&mut self, _state: JobState) {}
    fn progress(&mut self, _percent: u8) {}
}

/// Statistics about a completed run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlashStats {
    /// Bytes programmed
    pub bytes_written: usize,
    /// Bytes read back and compared
    pub bytes_verified: usize,
    /// Number of chunks written
    pub chunks: usize,
}

/// Overall percentage for `processed` bytes out of `2 * total`
fn percent(processed: usize, total: usize) -> u8 {
    if total == 0 {
        return 100;
    }
    ((processed as u64 * 100) / (2 * total as u64)).min(100) as u8
}

/// Run `fut` under the deadline for `step`
async fn with_deadline<T, F>(step: Step, deadlines: &StepDeadlines, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(deadlines.for_step(step), fut).await {
        Ok(result) => result,
        Err(_) => Err(Error::Timeout(step)),
    }
}

fn checkpoint(cancel: &CancellationToken) -> Result<()> {
    if cancel.is_cancelled() {
        Err(Error::Cancelled)
    } else {
        Ok(())
    }
}

/// Flash `binary` to the device behind `protocol`
///
/// The transport must already be open. The caller owns the job state
/// around this call: it enters `Connecting` before calling and maps the
/// result to `Done`, `Failed` or `Cancelled` afterwards. Inside, the
/// observer is told about `Erasing`, `Writing` and `Verifying`.
///
/// # Errors
///
/// - [`Error::Cancelled`] if `cancel` fired at a checkpoint
/// - [`Error::Timeout`] if a step exceeded its deadline
/// - [`Error::ProtocolError`] on a malformed response, an image larger than
///   the device, or a verify mismatch
pub async fn flash<P, O>(
    protocol: &mut P,
    binary: &FirmwareBinary,
    observer: &mut O,
    cancel: &CancellationToken,
    options: &FlashOptions,
) -> Result<FlashStats>
where
    P: DeviceProtocol + ?Sized,
    O: FlashObserver + ?Sized,
{
    let deadlines = &options.deadlines;
    let image = binary.bytes();
    let total = image.len();
    let mut stats = FlashStats::default();

    checkpoint(cancel)?;
    protocol.set_step_timeout(deadlines.handshake);
    let info = with_deadline(Step::Handshake, deadlines, protocol.handshake()).await?;
    log::info!(
        "Connected to \"{}\" (protocol v{}, {} bytes of flash)",
        info.name,
        info.protocol_version,
        info.capacity
    );
    check_fits(&info, total)?;

    checkpoint(cancel)?;
    observer.phase(JobState::Erasing);
    protocol.set_step_timeout(deadlines.erase);
    with_deadline(Step::Erase, deadlines, protocol.erase(0, total as u32)).await?;
    log::debug!("Erased {} bytes", total);

    checkpoint(cancel)?;
    observer.phase(JobState::Writing);
    protocol.set_step_timeout(deadlines.write_chunk);
    let write_chunk = options.chunk_size.clamp(1, info.max_write_len.max(1));
    for (i, chunk) in image.chunks(write_chunk).enumerate() {
        let addr = (i * write_chunk) as u32;
        with_deadline(Step::Write, deadlines, protocol.write_chunk(addr, chunk)).await?;
        stats.bytes_written += chunk.len();
        stats.chunks += 1;
        log::trace!("Wrote {} bytes at 0x{:08X}", chunk.len(), addr);
        observer.progress(percent(stats.bytes_written, total));
        checkpoint(cancel)?;
    }

    observer.phase(JobState::Verifying);
    protocol.set_step_timeout(deadlines.verify_chunk);
    let read_chunk = options.chunk_size.clamp(1, info.max_read_len.max(1));
    let mut buf = vec![0u8; read_chunk];
    for (i, expected) in image.chunks(read_chunk).enumerate() {
        let addr = (i * read_chunk) as u32;
        let readback = &mut buf[..expected.len()];
        with_deadline(Step::Verify, deadlines, protocol.read_chunk(addr, readback)).await?;
        compare_chunk(addr, expected, readback)?;
        stats.bytes_verified += expected.len();
        observer.progress(percent(total + stats.bytes_verified, total));
        checkpoint(cancel)?;
    }
    log::info!("Verified {} bytes", stats.bytes_verified);

    if let Err(e) = protocol.reset().await {
        log::warn!("Image verified but the device did not reset: {}", e);
    }

    Ok(stats)
}

fn check_fits(info: &DeviceInfo, total: usize) -> Result<()> {
    if total as u64 > info.capacity as u64 {
        return Err(Error::ProtocolError(format!(
            "image is {} bytes but the device only has {} bytes of flash",
            total, info.capacity
        )));
    }
    Ok(())
}

fn compare_chunk(addr: u32, expected: &[u8], actual: &[u8]) -> Result<()> {
    if let Some(pos) = expected.iter().zip(actual).position(|(e, a)| e != a) {
        return Err(Error::ProtocolError(format!(
            "verify mismatch at 0x{:08X}: expected 0x{:02X}, read 0x{:02X}",
            addr as usize + pos,
            expected[pos],
            actual[pos]
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use async_trait::async_trait;

    /// A device that keeps its flash in memory and records calls
    struct MockDevice {
        memory: Vec<u8>,
        max_write: usize,
        writes: Vec<(u32, usize)>,
        corrupt_after_write: Option<usize>,
        stall_handshake: bool,
        reset_called: bool,
        cancel_on_write: Option<(usize, CancellationToken)>,
        step_timeouts: Vec<Duration>,
    }

    impl MockDevice {
        fn new(capacity: usize) -> Self {
            Self {
                memory: vec![0xFF; capacity],
                max_write: 256,
                writes: Vec::new(),
                corrupt_after_write: None,
                stall_handshake: false,
                reset_called: false,
                cancel_on_write: None,
                step_timeouts: Vec::new(),
            }
        }
    }

    #[async_trait]
    impl DeviceProtocol for MockDevice {
        fn set_step_timeout(&mut self, timeout: Duration) {
            self.step_timeouts.push(timeout);
        }

        async fn handshake(&mut self) -> Result<DeviceInfo> {
            if self.stall_handshake {
                std::future::pending::<()>().await;
            }
            Ok(DeviceInfo {
                name: "mock".into(),
                protocol_version: 1,
                capacity: self.memory.len() as u32,
                max_write_len: self.max_write,
                max_read_len: 1024,
            })
        }

        async fn erase(&mut self, addr: u32, len: u32) -> Result<()> {
            let start = addr as usize;
            self.memory[start..start + len as usize].fill(0xFF);
            Ok(())
        }

        async fn write_chunk(&mut self, addr: u32, data: &[u8]) -> Result<()> {
            let start = addr as usize;
            self.memory[start..start + data.len()].copy_from_slice(data);
            self.writes.push((addr, data.len()));
            if let Some((after, token)) = &self.cancel_on_write {
                if self.writes.len() == *after {
                    token.cancel();
                }
            }
            if let Some(offset) = self.corrupt_after_write {
                if offset >= start && offset < start + data.len() {
                    self.memory[offset] ^= 0x01;
                }
            }
            Ok(())
        }

        async fn read_chunk(&mut self, addr: u32, buf: &mut [u8]) -> Result<()> {
            let start = addr as usize;
            buf.copy_from_slice(&self.memory[start..start + buf.len()]);
            Ok(())
        }

        async fn reset(&mut self) -> Result<()> {
            self.reset_called = true;
            Ok(())
        }

        async fn close(&mut self) {}
    }

    #[derive(Default)]
    struct Recorder {
        phases: Vec<JobState>,
        progress: Vec<u8>,
    }

    impl FlashObserver for Recorder {
        fn phase(&mut self, state: JobState) {
            self.phases.push(state);
        }
        fn progress(&mut self, percent: u8) {
            self.progress.push(percent);
        }
    }

    fn image(len: usize) -> FirmwareBinary {
        let bytes = (0..len).map(|i| (i * 7 + 3) as u8).collect();
        FirmwareBinary::new(bytes, None).unwrap()
    }

    #[tokio::test]
    async fn test_flash_writes_and_verifies() {
        let mut dev = MockDevice::new(8192);
        let bin = image(3000);
        let mut rec = Recorder::default();
        let stats = flash(
            &mut dev,
            &bin,
            &mut rec,
            &CancellationToken::new(),
            &FlashOptions::default(),
        )
        .await
        .unwrap();

        assert_eq!(stats.bytes_written, 3000);
        assert_eq!(stats.bytes_verified, 3000);
        // Chunk size is clamped to the device maximum
        assert_eq!(stats.chunks, 12);
        assert!(dev.writes.iter().all(|&(_, len)| len <= 256));
        assert_eq!(&dev.memory[..3000], bin.bytes());
        assert_eq!(
            rec.phases,
            vec![JobState::Erasing, JobState::Writing, JobState::Verifying]
        );
        assert!(rec.progress.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(rec.progress.last(), Some(&100));
        assert!(dev.reset_called);
    }

    #[tokio::test]
    async fn test_single_byte_corruption_is_detected() {
        let mut dev = MockDevice::new(8192);
        dev.corrupt_after_write = Some(1234);
        let err = flash(
            &mut dev,
            &image(3000),
            &mut NoObserver,
            &CancellationToken::new(),
            &FlashOptions::default(),
        )
        .await
        .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::ProtocolError);
        assert!(err.to_string().contains("0x000004D2"), "{err}");
        assert!(!dev.reset_called);
    }

    #[tokio::test]
    async fn test_image_larger_than_device() {
        let mut dev = MockDevice::new(1024);
        let err = flash(
            &mut dev,
            &image(2048),
            &mut NoObserver,
            &CancellationToken::new(),
            &FlashOptions::default(),
        )
        .await
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ProtocolError);
        assert!(dev.writes.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_handshake_deadline() {
        let mut dev = MockDevice::new(1024);
        dev.stall_handshake = true;
        let err = flash(
            &mut dev,
            &image(16),
            &mut NoObserver,
            &CancellationToken::new(),
            &FlashOptions::default(),
        )
        .await
        .unwrap_err();
        assert_eq!(err, Error::Timeout(Step::Handshake));
    }

    #[tokio::test]
    async fn test_cancel_stops_after_current_chunk() {
        let token = CancellationToken::new();
        let mut dev = MockDevice::new(8192);
        dev.cancel_on_write = Some((3, token.clone()));
        let mut rec = Recorder::default();
        let err = flash(&mut dev, &image(3000), &mut rec, &token, &FlashOptions::default())
            .await
            .unwrap_err();

        assert_eq!(err, Error::Cancelled);
        // The chunk in flight when cancel fired was completed, nothing after it
        assert_eq!(dev.writes.len(), 3);
        assert_eq!(dev.writes[2], (512, 256));
        assert_eq!(rec.phases.last(), Some(&JobState::Writing));
    }

    #[tokio::test]
    async fn test_driver_gets_each_step_deadline() {
        let mut dev = MockDevice::new(8192);
        let options = FlashOptions {
            deadlines: StepDeadlines {
                erase: Duration::from_secs(90),
                verify_chunk: Duration::from_secs(7),
                ..StepDeadlines::default()
            },
            ..FlashOptions::default()
        };
        flash(
            &mut dev,
            &image(1000),
            &mut NoObserver,
            &CancellationToken::new(),
            &options,
        )
        .await
        .unwrap();

        assert_eq!(
            dev.step_timeouts,
            vec![
                Duration::from_secs(5),
                Duration::from_secs(90),
                Duration::from_secs(5),
                Duration::from_secs(7),
            ]
        );
    }

    #[tokio::test]
    async fn test_cancel_before_start() {
        let token = CancellationToken::new();
        token.cancel();
        let mut dev = MockDevice::new(1024);
        let err = flash(&mut dev, &image(16), &mut NoObserver, &token, &FlashOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err, Error::Cancelled);
        assert!(dev.writes.is_empty());
    }

    #[test]
    fn test_percent() {
        assert_eq!(percent(0, 1000), 0);
        assert_eq!(percent(1000, 1000), 50);
        assert_eq!(percent(2000, 1000), 100);
    }
}
