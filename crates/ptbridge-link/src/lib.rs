//! Raw byte link to a passthru bridge device.
//!
//! Provides a unified stream over the ways a bridge device can be reached:
//! - A USB CDC / serial port (the real microcontroller)
//! - A Unix domain socket (device simulators, test rigs)
//!
//! This is the lowest layer of ptbridge. Everything else builds on top of
//! the [`LinkStream`] type and the [`Connector`] trait provided here.

pub mod error;
pub mod serial;
pub mod traits;

#[cfg(unix)]
pub mod unix;

pub use error::{LinkError, Result};
pub use serial::{SerialConnector, DEFAULT_BAUD_RATE};
pub use traits::{Connector, LinkStream};

#[cfg(unix)]
pub use unix::UnixConnector;
