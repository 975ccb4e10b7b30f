//! Byte-stream links to the peer device.

use std::io::{self, ErrorKind, Read, Write};
use std::net::{Shutdown, TcpStream};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use serialport::{DataBits, FlowControl, Parity, SerialPortType, StopBits};
use thiserror::Error;
use tracing::{debug, info};

const READ_CHUNK: usize = 256;

/// Upper bound on how long a device or dry-run read blocks before the reader
/// gets a chance to notice it should stop.
pub const READ_POLL: Duration = Duration::from_millis(50);

pub const DEFAULT_BAUD_RATE: u32 = 9600;

/// Device paths tried, in order, when no port is configured.
const CANDIDATE_PORTS: [&str; 5] = [
    "/dev/ttyACM0",
    "/dev/ttyUSB0",
    "/dev/cu.usbmodem1401",
    "/dev/cu.usbmodem1301",
    "/dev/cu.usbmodem14201",
];

#[derive(Debug, Error)]
pub enum LinkError {
    #[error("could not open {target}: {source}")]
    Open {
        target: String,
        #[source]
        source: io::Error,
    },
    #[error("could not start the link reader: {0}")]
    Reader(#[source] io::Error),
    #[error("read failed: {0}")]
    Read(#[source] io::Error),
    #[error("write failed: {0}")]
    Write(#[source] io::Error),
    #[error("link is not open")]
    NotOpen,
}

pub trait ChunkRead: Send {
    /// Blocks for the next chunk. `Ok(None)` is end of stream; an empty
    /// chunk means nothing arrived within the transport's read timeout.
    ///
    /// Must return within a bounded time once the paired writer is closed.
    fn read_chunk(&mut self) -> Result<Option<Vec<u8>>, LinkError>;
}

pub trait ChunkWrite: Send {
    fn write_chunk(&mut self, bytes: &[u8]) -> Result<(), LinkError>;

    /// Releases the write side. Where the transport allows it, a read
    /// blocked on the paired reader returns end of stream.
    fn close(&mut self);
}

/// The two halves of an open link.
pub struct Link {
    pub reader: Box<dyn ChunkRead>,
    pub writer: Box<dyn ChunkWrite>,
}

pub trait Transport {
    fn describe(&self) -> String;
    fn open(&self) -> Result<Link, LinkError>;
}

pub struct IoReader<R> {
    inner: R,
}

impl<R> IoReader<R> {
    pub fn new(inner: R) -> Self {
        Self { inner }
    }
}

impl<R: Read + Send> ChunkRead for IoReader<R> {
    fn read_chunk(&mut self) -> Result<Option<Vec<u8>>, LinkError> {
        let mut buf = [0u8; READ_CHUNK];
        loop {
            match self.inner.read(&mut buf) {
                Ok(0) => return Ok(None),
                Ok(n) => return Ok(Some(buf[..n].to_vec())),
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) if matches!(err.kind(), ErrorKind::TimedOut | ErrorKind::WouldBlock) => {
                    return Ok(Some(Vec::new()))
                }
                Err(err) => return Err(LinkError::Read(err)),
            }
        }
    }
}

pub struct IoWriter<W> {
    inner: Option<W>,
}

impl<W> IoWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner: Some(inner) }
    }
}

impl<W: Write + Send> ChunkWrite for IoWriter<W> {
    fn write_chunk(&mut self, bytes: &[u8]) -> Result<(), LinkError> {
        let inner = self.inner.as_mut().ok_or(LinkError::NotOpen)?;
        inner.write_all(bytes).map_err(LinkError::Write)?;
        inner.flush().map_err(LinkError::Write)
    }

    fn close(&mut self) {
        if let Some(mut inner) = self.inner.take() {
            let _ = inner.flush();
        }
    }
}

struct TcpWriter {
    stream: Option<TcpStream>,
}

impl ChunkWrite for TcpWriter {
    fn write_chunk(&mut self, bytes: &[u8]) -> Result<(), LinkError> {
        let stream = self.stream.as_mut().ok_or(LinkError::NotOpen)?;
        stream.write_all(bytes).map_err(LinkError::Write)
    }

    fn close(&mut self) {
        if let Some(stream) = self.stream.take() {
            let _ = stream.shutdown(Shutdown::Both);
        }
    }
}

pub struct TcpTransport {
    addr: String,
}

impl TcpTransport {
    pub fn new(addr: impl Into<String>) -> Self {
        Self { addr: addr.into() }
    }
}

impl Transport for TcpTransport {
    fn describe(&self) -> String {
        format!("tcp:{}", self.addr)
    }

    fn open(&self) -> Result<Link, LinkError> {
        let open_err = |source| LinkError::Open {
            target: self.describe(),
            source,
        };
        let stream = TcpStream::connect(&self.addr).map_err(open_err)?;
        stream.set_nodelay(true).map_err(open_err)?;
        let reader = stream.try_clone().map_err(open_err)?;
        Ok(Link {
            reader: Box::new(IoReader::new(reader)),
            writer: Box::new(TcpWriter {
                stream: Some(stream),
            }),
        })
    }
}

/// A serial port such as `/dev/ttyACM0`, opened at `baud_rate` 8N1 without
/// flow control.
pub struct DeviceTransport {
    path: PathBuf,
    baud_rate: u32,
}

impl DeviceTransport {
    pub fn new(path: impl Into<PathBuf>, baud_rate: u32) -> Self {
        Self {
            path: path.into(),
            baud_rate,
        }
    }
}

impl Transport for DeviceTransport {
    fn describe(&self) -> String {
        format!("{} @ {} baud", self.path.display(), self.baud_rate)
    }

    fn open(&self) -> Result<Link, LinkError> {
        let open_err = |err: serialport::Error| LinkError::Open {
            target: self.describe(),
            source: io::Error::from(err),
        };
        let port = serialport::new(self.path.to_string_lossy(), self.baud_rate)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .timeout(READ_POLL)
            .open()
            .map_err(open_err)?;
        let reader = port.try_clone().map_err(open_err)?;
        Ok(Link {
            reader: Box::new(IoReader::new(reader)),
            writer: Box::new(IoWriter::new(port)),
        })
    }
}

/// Finds a likely microcontroller port: first by what the OS reports about
/// attached USB devices, then by probing the usual device names.
pub fn detect_device() -> Option<PathBuf> {
    match serialport::available_ports() {
        Ok(ports) => {
            for port in ports {
                let description = match &port.port_type {
                    SerialPortType::UsbPort(usb) => {
                        let names = [usb.manufacturer.as_deref(), usb.product.as_deref()];
                        names.into_iter().flatten().collect::<Vec<_>>().join(" ")
                    }
                    _ => String::new(),
                };
                debug!(port = %port.port_name, %description, "serial port");
                if looks_like_board(&port.port_name, &description) {
                    info!(port = %port.port_name, %description, "found serial device");
                    return Some(PathBuf::from(port.port_name));
                }
            }
        }
        Err(err) => debug!(%err, "could not list serial ports"),
    }

    CANDIDATE_PORTS
        .iter()
        .map(Path::new)
        .find(|path| path.exists())
        .map(Path::to_path_buf)
}

fn looks_like_board(port_name: &str, description: &str) -> bool {
    description.contains("Arduino") || port_name.contains("usbmodem") || port_name.contains("/cu.")
}

/// Stands in for a device: every outbound line is logged, nothing is read.
pub struct DryRunTransport;

struct DryRunReader {
    closed: Arc<AtomicBool>,
}

impl ChunkRead for DryRunReader {
    fn read_chunk(&mut self) -> Result<Option<Vec<u8>>, LinkError> {
        if self.closed.load(Ordering::Acquire) {
            return Ok(None);
        }
        thread::sleep(READ_POLL);
        Ok(Some(Vec::new()))
    }
}

struct DryRunWriter {
    closed: Arc<AtomicBool>,
}

impl ChunkWrite for DryRunWriter {
    fn write_chunk(&mut self, bytes: &[u8]) -> Result<(), LinkError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(LinkError::NotOpen);
        }
        for line in String::from_utf8_lossy(bytes).lines() {
            info!(%line, "dry run: would send");
        }
        Ok(())
    }

    fn close(&mut self) {
        self.closed.store(true, Ordering::Release);
    }
}

impl Transport for DryRunTransport {
    fn describe(&self) -> String {
        "dry run".to_string()
    }

    fn open(&self) -> Result<Link, LinkError> {
        let closed = Arc::new(AtomicBool::new(false));
        Ok(Link {
            reader: Box::new(DryRunReader {
                closed: Arc::clone(&closed),
            }),
            writer: Box::new(DryRunWriter { closed }),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkTarget {
    Tcp(String),
    Device(PathBuf),
    DryRun,
}

impl LinkTarget {
    /// `tcp:<host>:<port>` selects a socket, `dry-run` logs instead of
    /// sending, anything else is a device path.
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return None;
        }
        if raw == "dry-run" {
            return Some(LinkTarget::DryRun);
        }
        match raw.strip_prefix("tcp:") {
            Some(addr) => Some(LinkTarget::Tcp(addr.to_string())),
            None => Some(LinkTarget::Device(PathBuf::from(raw))),
        }
    }

    pub fn transport(&self, baud_rate: u32) -> Box<dyn Transport> {
        match self {
            LinkTarget::Tcp(addr) => Box::new(TcpTransport::new(addr.clone())),
            LinkTarget::Device(path) => Box::new(DeviceTransport::new(path.clone(), baud_rate)),
            LinkTarget::DryRun => Box::new(DryRunTransport),
        }
    }
}
