use std::io::{Read, Write};
use std::time::Duration;

use serialport::SerialPort;

use crate::error::Result;

/// A connected device link; implements Read + Write.
///
/// This is the fundamental I/O type handed to the frame layer.
/// For real hardware it wraps a serial port; on Unix it can also wrap a
/// socket connected to a device simulator.
pub struct LinkStream {
    inner: LinkStreamInner,
}

enum LinkStreamInner {
    Serial(Box<dyn SerialPort>),
    #[cfg(unix)]
    Unix(std::os::unix::net::UnixStream),
}

impl Read for LinkStream {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match &mut self.inner {
            LinkStreamInner::Serial(port) => port.read(buf),
            #[cfg(unix)]
            LinkStreamInner::Unix(stream) => stream.read(buf),
        }
    }
}

impl Write for LinkStream {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match &mut self.inner {
            LinkStreamInner::Serial(port) => port.write(buf),
            #[cfg(unix)]
            LinkStreamInner::Unix(stream) => stream.write(buf),
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        match &mut self.inner {
            LinkStreamInner::Serial(port) => port.flush(),
            #[cfg(unix)]
            LinkStreamInner::Unix(stream) => stream.flush(),
        }
    }
}

impl LinkStream {
    /// Wrap an opened serial port.
    pub fn from_serial(port: Box<dyn SerialPort>) -> Self {
        Self {
            inner: LinkStreamInner::Serial(port),
        }
    }

    /// Wrap a connected Unix domain socket.
    #[cfg(unix)]
    pub fn from_unix(stream: std::os::unix::net::UnixStream) -> Self {
        Self {
            inner: LinkStreamInner::Unix(stream),
        }
    }

    /// Bound how long a single read may block.
    ///
    /// Serial ports share one timeout between reads and writes.
    pub fn set_read_timeout(&mut self, timeout: Duration) -> Result<()> {
        match &mut self.inner {
            LinkStreamInner::Serial(port) => port.set_timeout(timeout).map_err(Into::into),
            #[cfg(unix)]
            LinkStreamInner::Unix(stream) => {
                stream.set_read_timeout(Some(timeout)).map_err(Into::into)
            }
        }
    }

    /// Bound how long a single write may block.
    pub fn set_write_timeout(&mut self, timeout: Duration) -> Result<()> {
        match &mut self.inner {
            // Shared with the read timeout; leave whatever the reader configured.
            LinkStreamInner::Serial(_) => Ok(()),
            #[cfg(unix)]
            LinkStreamInner::Unix(stream) => {
                stream.set_write_timeout(Some(timeout)).map_err(Into::into)
            }
        }
    }

    /// Try to clone this stream (a second handle on the same link).
    pub fn try_clone(&self) -> Result<Self> {
        match &self.inner {
            LinkStreamInner::Serial(port) => Ok(Self::from_serial(port.try_clone()?)),
            #[cfg(unix)]
            LinkStreamInner::Unix(stream) => Ok(Self::from_unix(stream.try_clone()?)),
        }
    }

    /// Link kind for diagnostics.
    pub fn kind(&self) -> &'static str {
        match &self.inner {
            LinkStreamInner::Serial(_) => "serial",
            #[cfg(unix)]
            LinkStreamInner::Unix(_) => "unix",
        }
    }
}

impl std::fmt::Debug for LinkStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.inner {
            LinkStreamInner::Serial(port) => f
                .debug_struct("LinkStream")
                .field("type", &"serial")
                .field("name", &port.name())
                .finish(),
            #[cfg(unix)]
            LinkStreamInner::Unix(_) => f.debug_struct("LinkStream").field("type", &"unix").finish(),
        }
    }
}

/// Opens (and re-opens) the link to a device.
///
/// Every call to [`Connector::open`] is an independent attempt; callers use it
/// both for the first connection and to reconnect after the device went away.
pub trait Connector: Send + Sync {
    /// Attempt to open the link.
    fn open(&self) -> Result<LinkStream>;

    /// Human-readable description of the endpoint, for logs.
    fn describe(&self) -> String;
}

impl<F> Connector for F
where
    F: Fn() -> Result<LinkStream> + Send + Sync,
{
    fn open(&self) -> Result<LinkStream> {
        self()
    }

    fn describe(&self) -> String {
        "custom connector".to_string()
    }
}

#[cfg(all(test, unix))]
mod tests {
    use std::os::unix::net::UnixStream;

    use super::*;
    use crate::error::LinkError;

    #[test]
    fn unix_stream_read_write() {
        let (left, right) = UnixStream::pair().unwrap();
        let mut host = LinkStream::from_unix(left);
        let mut device = LinkStream::from_unix(right);

        host.write_all(b"ping").unwrap();
        let mut buf = [0u8; 4];
        device.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"ping");
        assert_eq!(host.kind(), "unix");
    }

    #[test]
    fn clone_shares_the_link() {
        let (left, right) = UnixStream::pair().unwrap();
        let host = LinkStream::from_unix(left);
        let mut writer = host.try_clone().unwrap();
        let mut device = LinkStream::from_unix(right);

        writer.write_all(b"via-clone").unwrap();
        let mut buf = [0u8; 9];
        device.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"via-clone");
    }

    #[test]
    fn read_timeout_surfaces_as_would_block() {
        let (left, _right) = UnixStream::pair().unwrap();
        let mut host = LinkStream::from_unix(left);
        host.set_read_timeout(Duration::from_millis(5)).unwrap();

        let mut buf = [0u8; 1];
        let err = host.read(&mut buf).unwrap_err();
        assert!(matches!(
            err.kind(),
            std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
        ));
    }

    #[test]
    fn closure_acts_as_connector() {
        let connector = || -> Result<LinkStream> {
            Err(LinkError::Io(std::io::Error::other("no device")))
        };
        assert!(connector.open().is_err());
        assert_eq!(connector.describe(), "custom connector");
    }

    #[test]
    fn debug_names_link_type() {
        let (left, _right) = UnixStream::pair().unwrap();
        let host = LinkStream::from_unix(left);
        assert!(format!("{host:?}").contains("unix"));
    }
}
