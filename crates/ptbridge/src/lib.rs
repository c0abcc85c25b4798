//! Host-side bridge to a J2534-style passthru vehicle interface.
//!
//! ptbridge talks to a microcontroller that sits on a vehicle network
//! (CAN, ISO 9141 K-line, ISO 15765) over a USB serial link, and exposes
//! logical channels with filters and timed reads and writes.
//!
//! # Crate Structure
//!
//! - [`link`]: Raw byte link (serial port, Unix socket for simulators)
//! - [`frame`]: Fixed 512-byte command frames and their payload layouts
//! - [`server`]: Channels, heartbeat, lifecycle, and the [`server::Bridge`]
//!   facade (behind the `server` feature)

/// Re-export link types.
pub mod link {
    pub use ptbridge_link::*;
}

/// Re-export frame types.
pub mod frame {
    pub use ptbridge_frame::*;
}

/// Re-export bridge engine types (requires `server` feature).
#[cfg(feature = "server")]
pub mod server {
    pub use ptbridge_server::*;
}
