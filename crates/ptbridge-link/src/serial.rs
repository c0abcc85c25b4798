use std::time::Duration;

use serialport::ClearBuffer;
use tracing::{debug, info};

use crate::error::{LinkError, Result};
use crate::traits::{Connector, LinkStream};

/// Default line rate. USB CDC devices ignore it, UART bridges do not.
pub const DEFAULT_BAUD_RATE: u32 = 115_200;

/// Timeout applied when the port is first opened; the frame layer
/// tightens it to its own poll bound afterwards.
const DEFAULT_OPEN_TIMEOUT: Duration = Duration::from_millis(100);

/// Serial / USB CDC link to the bridge microcontroller.
#[derive(Debug, Clone)]
pub struct SerialConnector {
    path: String,
    baud_rate: u32,
    timeout: Duration,
}

impl SerialConnector {
    /// Describe a serial port at `path` using the default baud rate.
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            baud_rate: DEFAULT_BAUD_RATE,
            timeout: DEFAULT_OPEN_TIMEOUT,
        }
    }

    /// Override the line rate.
    pub fn with_baud_rate(mut self, baud_rate: u32) -> Self {
        self.baud_rate = baud_rate;
        self
    }

    /// Override the initial I/O timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// The device path this connector opens.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// The configured line rate.
    pub fn baud_rate(&self) -> u32 {
        self.baud_rate
    }
}

impl Connector for SerialConnector {
    fn open(&self) -> Result<LinkStream> {
        let port = serialport::new(&self.path, self.baud_rate)
            .timeout(self.timeout)
            .open()
            .map_err(|source| LinkError::Open {
                path: self.path.clone(),
                source,
            })?;

        // Bytes left over from a previous session would desynchronise framing.
        if let Err(err) = port.clear(ClearBuffer::All) {
            debug!(path = %self.path, %err, "could not clear serial buffers");
        }

        info!(path = %self.path, baud = self.baud_rate, "opened serial link");
        Ok(LinkStream::from_serial(port))
    }

    fn describe(&self) -> String {
        format!("serial:{}@{}", self.path, self.baud_rate)
    }
}
