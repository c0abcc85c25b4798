/// Errors that can occur during frame encoding/decoding.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The declared or supplied argument length exceeds the frame capacity.
    #[error("argument area too large ({size} bytes, max {max})")]
    ArgsTooLarge { size: usize, max: usize },

    /// A command payload is shorter than its fixed layout requires.
    #[error("truncated {command} payload ({actual} bytes, need {expected})")]
    Truncated {
        command: &'static str,
        expected: usize,
        actual: usize,
    },

    /// A payload decoder was handed a frame carrying another command.
    #[error("unexpected command 0x{actual:02x} (expected 0x{expected:02x})")]
    UnexpectedCommand { expected: u16, actual: u16 },

    /// The link accepted only part of a frame before stalling.
    #[error("incomplete write ({written} of {total} bytes)")]
    IncompleteWrite { written: usize, total: usize },

    /// An I/O error occurred while reading or writing frames.
    #[error("frame I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The link could not be configured.
    #[error("link error: {0}")]
    Link(#[from] ptbridge_link::LinkError),

    /// The link was closed before a complete frame was received.
    #[error("connection closed (incomplete frame)")]
    ConnectionClosed,
}

impl FrameError {
    /// Whether the error means the link itself is gone, as opposed to one bad frame.
    ///
    /// A write that stalled before its first byte leaves framing intact and
    /// is not a link failure; one that stalled mid-frame is.
    pub fn is_link_failure(&self) -> bool {
        match self {
            FrameError::ConnectionClosed | FrameError::Link(_) => true,
            FrameError::IncompleteWrite { written, .. } => *written > 0,
            FrameError::Io(err) => !matches!(
                err.kind(),
                std::io::ErrorKind::WouldBlock
                    | std::io::ErrorKind::TimedOut
                    | std::io::ErrorKind::Interrupted
            ),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, FrameError>;
