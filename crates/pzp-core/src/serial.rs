//! Serial port plumbing and the serial base Piece parts.
//!
//! # Types
//!
//! - [`SerialPortIO`]: AsyncRead + AsyncWrite bound for serial ports
//! - [`DynSerial`]: type-erased boxed serial port
//! - [`SerialBase`]: `port` dropdown, `connected` checkbox and the ensurer
//!
//! Any `AsyncRead + AsyncWrite` stream can stand in for a real port, so tests
//! attach one end of `tokio::io::duplex` and script the device on the other.

use crate::error::{PieceError, PieceResult};
use crate::param;
use crate::parameter::Parameter;
use crate::puzzle::PuzzleContext;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::Mutex;

/// Baud rate used by the serial Pieces.
pub const DEFAULT_BAUD: u32 = 9600;

/// Read timeout used by the serial Pieces.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(3);

/// Bound for async serial port I/O.
///
/// Implemented by `tokio_serial::SerialStream` and by `tokio::io::DuplexStream`.
pub trait SerialPortIO: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> SerialPortIO for T {}

/// Type-erased boxed serial port.
pub type DynSerial = Box<dyn SerialPortIO>;

/// Open a serial port (8N1, no flow control) off the async runtime.
pub async fn open_serial_async(
    port_path: &str,
    baud_rate: u32,
    device_name: &str,
) -> PieceResult<tokio_serial::SerialStream> {
    use tokio_serial::SerialPortBuilderExt;

    let port_path_owned = port_path.to_string();
    let stream = tokio::task::spawn_blocking(move || {
        tokio_serial::new(&port_path_owned, baud_rate)
            .data_bits(tokio_serial::DataBits::Eight)
            .parity(tokio_serial::Parity::None)
            .stop_bits(tokio_serial::StopBits::One)
            .flow_control(tokio_serial::FlowControl::None)
            .open_native_async()
    })
    .await
    .map_err(|e| PieceError::Other(anyhow::anyhow!("serial open task failed: {e}")))?;

    stream.map_err(|e| {
        tracing::warn!(device = device_name, port = port_path, error = %e, "failed to open serial port");
        PieceError::Serial(e)
    })
}

/// Names of the serial ports present on the system.
pub fn list_ports() -> PieceResult<Vec<String>> {
    Ok(tokio_serial::available_ports()?
        .into_iter()
        .map(|p| p.port_name)
        .collect())
}

/// Serial connection shared by a Piece's parameters.
///
/// Cloning shares the same port.
#[derive(Clone)]
pub struct SerialBase {
    ctx: PuzzleContext,
    device: String,
    port: Parameter<String>,
    connected: Parameter<bool>,
    link: Arc<Mutex<Option<BufReader<DynSerial>>>>,
    timeout: Duration,
}

impl std::fmt::Debug for SerialBase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialBase")
            .field("device", &self.device)
            .field("port", &self.port.value())
            .field("connected", &self.connected.value())
            .finish_non_exhaustive()
    }
}

impl SerialBase {
    /// Build the `port` and `connected` parameters for `device`
    /// (used in the "<device> not connected" message).
    pub fn new(ctx: PuzzleContext, device: impl Into<String>) -> Self {
        let base = Self {
            ctx,
            device: device.into(),
            port: param::dropdown("port", ""),
            connected: param::connected(),
            link: Arc::new(Mutex::new(None)),
            timeout: DEFAULT_TIMEOUT,
        };
        base.wire();
        base
    }

    fn wire(&self) {
        let debug = self.ctx.debug();
        self.port.set_options_loader(move || async move {
            if debug {
                return Ok(Vec::new());
            }
            list_ports()
        });

        let (open, close) = (self.clone(), self.clone());
        param::wire_connection(
            &self.connected,
            move || {
                let base = open.clone();
                async move { base.connect().await }
            },
            move || {
                let base = close.clone();
                async move { base.disconnect().await }
            },
        );
    }

    async fn connect(&self) -> PieceResult<()> {
        if self.ctx.debug() {
            return Ok(());
        }
        let path = self.port.get_value().await?;
        let stream = open_serial_async(&path, DEFAULT_BAUD, &self.device).await?;
        *self.link.lock().await = Some(BufReader::new(Box::new(stream)));
        tracing::info!(device = %self.device, port = %path, "serial port opened");
        Ok(())
    }

    async fn disconnect(&self) -> PieceResult<()> {
        if self.ctx.debug() {
            return Ok(());
        }
        if self.link.lock().await.take().is_some() {
            tracing::info!(device = %self.device, "serial port closed");
        }
        Ok(())
    }

    /// Use an already open stream as the port and mark the Piece connected.
    pub async fn attach(&self, port: DynSerial) {
        *self.link.lock().await = Some(BufReader::new(port));
        self.connected.inner().replace(true);
    }

    /// The `port` parameter, for registration.
    pub fn port(&self) -> &Parameter<String> {
        &self.port
    }

    /// The `connected` parameter, for registration.
    pub fn connected(&self) -> &Parameter<bool> {
        &self.connected
    }

    /// Override the read timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Fail with "<device> not connected" unless a port is open.
    /// Always passes in debug mode.
    pub async fn ensure(&self) -> PieceResult<()> {
        if self.ctx.debug() || self.link.lock().await.is_some() {
            return Ok(());
        }
        Err(PieceError::not_connected(format!("{} not connected", self.device)))
    }

    /// [`ensure`](Self::ensure) without the error.
    pub async fn ensure_captured(&self) -> bool {
        self.ensure().await.is_ok()
    }

    /// Write a command and read the reply up to and including `terminator`.
    pub async fn query(&self, command: &[u8], terminator: u8) -> PieceResult<Vec<u8>> {
        let mut guard = self.lock_port().await?;
        let link = connected_link(&mut guard, &self.device)?;
        write_all(link, command).await?;
        read_until(link, terminator, self.timeout, &self.device).await
    }

    /// Write a command and read `lines` replies, each ending with `terminator`.
    pub async fn query_lines(
        &self,
        command: &[u8],
        terminator: u8,
        lines: usize,
    ) -> PieceResult<Vec<Vec<u8>>> {
        let mut guard = self.lock_port().await?;
        let link = connected_link(&mut guard, &self.device)?;
        write_all(link, command).await?;
        let mut replies = Vec::with_capacity(lines);
        for _ in 0..lines {
            replies.push(read_until(link, terminator, self.timeout, &self.device).await?);
        }
        Ok(replies)
    }

    async fn lock_port(
        &self,
    ) -> PieceResult<tokio::sync::MutexGuard<'_, Option<BufReader<DynSerial>>>> {
        let mut guard = self.link.lock().await;
        connected_link(&mut guard, &self.device)?;
        Ok(guard)
    }
}

fn connected_link<'a>(
    link: &'a mut Option<BufReader<DynSerial>>,
    device: &str,
) -> PieceResult<&'a mut BufReader<DynSerial>> {
    link.as_mut()
        .ok_or_else(|| PieceError::not_connected(format!("{device} not connected")))
}

async fn write_all(link: &mut BufReader<DynSerial>, command: &[u8]) -> PieceResult<()> {
    let port = link.get_mut();
    port.write_all(command).await?;
    port.flush().await?;
    Ok(())
}

async fn read_until(
    link: &mut BufReader<DynSerial>,
    terminator: u8,
    timeout: Duration,
    device: &str,
) -> PieceResult<Vec<u8>> {
    let mut buf = Vec::new();
    let read = tokio::time::timeout(timeout, link.read_until(terminator, &mut buf))
        .await
        .map_err(|_| PieceError::Timeout(format!("a reply from the {device}")))??;
    if read == 0 {
        return Err(PieceError::Io(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            format!("{device} closed the connection"),
        )));
    }
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn test_ensure_reports_device() {
        let base = SerialBase::new(PuzzleContext::new(false), "Shutter");
        let err = base.ensure().await.unwrap_err();
        assert_eq!(err.to_string(), "Shutter not connected");
        assert!(!base.ensure_captured().await);

        let debug = SerialBase::new(PuzzleContext::new(true), "Shutter");
        assert!(debug.ensure_captured().await);
    }

    #[tokio::test]
    async fn test_query_over_duplex() {
        let (host, mut device) = tokio::io::duplex(64);
        let base = SerialBase::new(PuzzleContext::new(false), "Shutter");
        base.attach(Box::new(host)).await;
        assert!(base.connected().value());

        let responder = tokio::spawn(async move {
            let mut cmd = [0u8; 5];
            device.read_exact(&mut cmd).await.unwrap();
            assert_eq!(&cmd, b"ens?\r");
            device.write_all(b"ens?\r1\r").await.unwrap();
        });

        let replies = base.query_lines(b"ens?\r", b'\r', 2).await.unwrap();
        assert_eq!(replies, vec![b"ens?\r".to_vec(), b"1\r".to_vec()]);
        responder.await.unwrap();
    }

    #[tokio::test]
    async fn test_read_timeout() {
        let (host, _device) = tokio::io::duplex(64);
        let base = SerialBase::new(PuzzleContext::new(false), "Shutter")
            .with_timeout(Duration::from_millis(50));
        base.attach(Box::new(host)).await;
        assert!(matches!(
            base.query(b"ens?\r", b'\r').await,
            Err(PieceError::Timeout(_))
        ));
    }

    #[tokio::test]
    async fn test_disconnect_drops_port() {
        let (host, _device) = tokio::io::duplex(64);
        let base = SerialBase::new(PuzzleContext::new(false), "Shutter");
        base.attach(Box::new(host)).await;
        base.connected().set(false).await.unwrap();
        assert!(!base.ensure_captured().await);
    }

    #[tokio::test]
    async fn test_debug_ports_empty() {
        let base = SerialBase::new(PuzzleContext::new(true), "Shutter");
        assert!(base.port().refresh_options().await.unwrap().is_empty());
        assert!(base.connected().set(true).await.unwrap());
    }
}
