//! Serial port and TCP transports
//!
//! Both implement [`buddyflash_core::Transport`]. Serial ports are blocking
//! handles, so every call runs on tokio's blocking pool with the port's own
//! timeout set to the call's deadline. TCP uses tokio sockets directly.

pub mod serial {
    //! Serial port transport implementation

    use async_trait::async_trait;
    use buddyflash_core::{Transport, TransportError, TransportResult};
    use parking_lot::Mutex;
    use serialport::{DataBits, FlowControl, Parity, SerialPort, StopBits};
    use std::io::{Read, Write};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::oneshot;
    use tokio::task::JoinHandle;

    /// Baud rate used when none is given
    pub const DEFAULT_BAUD: u32 = 115200;

    /// Runs blocking port calls one at a time on tokio's blocking pool
    ///
    /// A call whose future is dropped (a step deadline fired) keeps running
    /// until the port timeout ends it. The worker remembers it so
    /// [`PortWorker::finish`] can wait for it.
    #[derive(Default)]
    pub(crate) struct PortWorker {
        inflight: Option<JoinHandle<()>>,
    }

    impl PortWorker {
        /// Run `op` on the blocking pool and wait for its result
        pub(crate) async fn run<T, F>(&mut self, op: F) -> TransportResult<T>
        where
            T: Send + 'static,
            F: FnOnce() -> TransportResult<T> + Send + 'static,
        {
            self.finish().await;
            let (tx, rx) = oneshot::channel();
            self.inflight = Some(tokio::task::spawn_blocking(move || {
                let _ = tx.send(op());
            }));
            let result = rx
                .await
                .map_err(|_| TransportError::Io("serial worker failed".to_string()))?;
            self.inflight = None;
            result
        }

        /// Wait for an abandoned call to return
        pub(crate) async fn finish(&mut self) {
            if let Some(handle) = self.inflight.take() {
                if let Err(e) = handle.await {
                    log::warn!("serial worker failed: {}", e);
                }
            }
        }
    }

    /// Serial port transport
    pub struct SerialTransport {
        port: Option<Arc<Mutex<Box<dyn SerialPort>>>>,
        device: String,
        worker: PortWorker,
    }

    impl SerialTransport {
        /// Open a serial port with the specified baud rate
        pub fn open(device: &str, baud: Option<u32>) -> TransportResult<Self> {
            let baud_rate = baud.unwrap_or(DEFAULT_BAUD);

            let port = serialport::new(device, baud_rate)
                .data_bits(DataBits::Eight)
                .parity(Parity::None)
                .stop_bits(StopBits::One)
                .flow_control(FlowControl::None)
                .timeout(Duration::from_secs(5))
                .open()
                .map_err(|e| TransportError::Open {
                    device: device.to_string(),
                    reason: e.to_string(),
                })?;

            log::info!("Opened serial port {} at {} baud", device, baud_rate);

            Ok(Self {
                port: Some(Arc::new(Mutex::new(port))),
                device: device.to_string(),
                worker: PortWorker::default(),
            })
        }

        fn port(&self) -> TransportResult<Arc<Mutex<Box<dyn SerialPort>>>> {
            self.port.clone().ok_or(TransportError::Closed)
        }

        /// Run `op` on the blocking pool with the port timeout set to `timeout`
        async fn blocking<T, F>(&mut self, timeout: Duration, op: F) -> TransportResult<T>
        where
            T: Send + 'static,
            F: FnOnce(&mut dyn SerialPort) -> std::io::Result<T> + Send + 'static,
        {
            let port = self.port()?;
            self.worker
                .run(move || {
                    let mut port = port.lock();
                    port.set_timeout(timeout)
                        .map_err(|e| TransportError::Io(e.to_string()))?;
                    op(port.as_mut()).map_err(TransportError::from)
                })
                .await
        }
    }

    #[async_trait]
    impl Transport for SerialTransport {
        async fn write(&mut self, data: &[u8], timeout: Duration) -> TransportResult<()> {
            let data = data.to_vec();
            self.blocking(timeout, move |port| {
                port.write_all(&data)?;
                port.flush()
            })
            .await
        }

        async fn read(&mut self, buf: &mut [u8], timeout: Duration) -> TransportResult<()> {
            let len = buf.len();
            let data = self
                .blocking(timeout, move |port| {
                    let mut data = vec![0u8; len];
                    port.read_exact(&mut data)?;
                    Ok(data)
                })
                .await?;
            buf.copy_from_slice(&data);
            Ok(())
        }

        async fn read_available(
            &mut self,
            buf: &mut [u8],
            timeout: Duration,
        ) -> TransportResult<usize> {
            let len = buf.len();
            let result = self
                .blocking(timeout, move |port| {
                    let mut data = vec![0u8; len];
                    let n = port.read(&mut data)?;
                    data.truncate(n);
                    Ok(data)
                })
                .await;

            match result {
                Ok(data) => {
                    buf[..data.len()].copy_from_slice(&data);
                    Ok(data.len())
                }
                Err(TransportError::Timeout) => Ok(0),
                Err(e) => Err(e),
            }
        }

        async fn close(&mut self) -> TransportResult<()> {
            // The port handle is only released once no call holds it
            self.worker.finish().await;
            if self.port.take().is_some() {
                log::debug!("Closed serial port {}", self.device);
            }
            Ok(())
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;
        use std::time::Instant;

        #[tokio::test]
        async fn test_finish_waits_for_abandoned_call() {
            let handle = Arc::new(());
            let mut worker = PortWorker::default();

            let held = Arc::clone(&handle);
            let call = worker.run(move || {
                let _held = held;
                std::thread::sleep(Duration::from_millis(200));
                Ok(())
            });
            let started = Instant::now();
            assert!(tokio::time::timeout(Duration::from_millis(10), call)
                .await
                .is_err());
            assert_eq!(Arc::strong_count(&handle), 2);

            worker.finish().await;
            assert!(started.elapsed() >= Duration::from_millis(150));
            assert_eq!(Arc::strong_count(&handle), 1);
        }

        #[tokio::test]
        async fn test_run_returns_result() {
            let mut worker = PortWorker::default();
            let value = worker.run(|| Ok(42)).await.unwrap();
            assert_eq!(value, 42);
            assert!(worker.inflight.is_none());

            let err = worker
                .run(|| Err::<(), _>(TransportError::Timeout))
                .await
                .unwrap_err();
            assert_eq!(err, TransportError::Timeout);
        }
    }
}

pub mod tcp {
    //! TCP socket transport implementation

    use async_trait::async_trait;
    use buddyflash_core::{Transport, TransportError, TransportResult};
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;

    /// TCP socket transport
    pub struct TcpTransport {
        stream: Option<TcpStream>,
        addr: String,
    }

    impl TcpTransport {
        /// Connect to a bootloader bridge at the specified host and port
        pub async fn connect(host: &str, port: u16, timeout: Duration) -> TransportResult<Self> {
            let addr = format!("{}:{}", host, port);
            log::info!("Connecting to bootloader bridge at {}", addr);

            let stream = match tokio::time::timeout(timeout, TcpStream::connect(&addr)).await {
                Ok(Ok(stream)) => stream,
                Ok(Err(e)) => {
                    return Err(TransportError::Open {
                        device: addr,
                        reason: e.to_string(),
                    })
                }
                Err(_) => return Err(TransportError::Timeout),
            };

            // Set TCP_NODELAY to reduce latency
            stream.set_nodelay(true).map_err(|e| TransportError::Open {
                device: addr.clone(),
                reason: format!("Failed to set TCP_NODELAY: {}", e),
            })?;

            log::info!("Connected to bootloader bridge at {}", addr);

            Ok(Self {
                stream: Some(stream),
                addr,
            })
        }

        fn stream(&mut self) -> TransportResult<&mut TcpStream> {
            self.stream.as_mut().ok_or(TransportError::Closed)
        }
    }

    #[async_trait]
    impl Transport for TcpTransport {
        async fn write(&mut self, data: &[u8], timeout: Duration) -> TransportResult<()> {
            let stream = self.stream()?;
            match tokio::time::timeout(timeout, stream.write_all(data)).await {
                Ok(result) => result.map_err(TransportError::from),
                Err(_) => Err(TransportError::Timeout),
            }
        }

        async fn read(&mut self, buf: &mut [u8], timeout: Duration) -> TransportResult<()> {
            let stream = self.stream()?;
            match tokio::time::timeout(timeout, stream.read_exact(buf)).await {
                Ok(result) => result.map(|_| ()).map_err(TransportError::from),
                Err(_) => Err(TransportError::Timeout),
            }
        }

        async fn read_available(
            &mut self,
            buf: &mut [u8],
            timeout: Duration,
        ) -> TransportResult<usize> {
            let stream = self.stream()?;
            match tokio::time::timeout(timeout, stream.read(buf)).await {
                Ok(Ok(0)) => Err(TransportError::Closed),
                Ok(Ok(n)) => Ok(n),
                Ok(Err(e)) => Err(TransportError::from(e)),
                Err(_) => Ok(0),
            }
        }

        async fn close(&mut self) -> TransportResult<()> {
            if let Some(mut stream) = self.stream.take() {
                let _ = stream.shutdown().await;
                log::debug!("Closed connection to {}", self.addr);
            }
            Ok(())
        }
    }
}
