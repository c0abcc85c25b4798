use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{LinkError, Result};
use crate::traits::{Connector, LinkStream};

/// Unix domain socket link, used to reach device simulators.
#[derive(Debug, Clone)]
pub struct UnixConnector {
    path: PathBuf,
}

impl UnixConnector {
    /// Maximum socket path length.
    /// Unix `sockaddr_un.sun_path` is typically 108 bytes on Linux, 104 on macOS.
    #[cfg(target_os = "linux")]
    const MAX_PATH_LEN: usize = 108;
    #[cfg(not(target_os = "linux"))]
    const MAX_PATH_LEN: usize = 104;

    /// Describe a socket endpoint at `path`.
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    /// The socket path this connector dials.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Connector for UnixConnector {
    fn open(&self) -> Result<LinkStream> {
        let len = self.path.as_os_str().len();
        if len >= Self::MAX_PATH_LEN {
            return Err(LinkError::PathTooLong {
                path: self.path.clone(),
                len,
                max: Self::MAX_PATH_LEN,
            });
        }

        let stream = UnixStream::connect(&self.path).map_err(|source| LinkError::Connect {
            path: self.path.clone(),
            source,
        })?;
        debug!(path = ?self.path, "connected to unix socket link");
        Ok(LinkStream::from_unix(stream))
    }

    fn describe(&self) -> String {
        format!("unix:{}", self.path.display())
    }
}

#[cfg(test)]
mod tests {
    use std::io::{Read, Write};
    use std::os::unix::net::UnixListener;

    use super::*;

    #[test]
    fn connects_to_listening_socket() {
        let dir = std::env::temp_dir().join(format!("ptbridge-link-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let sock_path = dir.join("device.sock");
        let _ = std::fs::remove_file(&sock_path);
        let listener = UnixListener::bind(&sock_path).unwrap();

        let handle = std::thread::spawn(move || {
            let (mut device, _) = listener.accept().unwrap();
            let mut buf = [0u8; 5];
            device.read_exact(&mut buf).unwrap();
            buf
        });

        let connector = UnixConnector::new(&sock_path);
        let mut link = connector.open().unwrap();
        link.write_all(b"hello").unwrap();

        assert_eq!(&handle.join().unwrap(), b"hello");
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn missing_socket_reports_connect_error() {
        let connector = UnixConnector::new("/tmp/ptbridge-no-such-device.sock");
        assert!(matches!(connector.open(), Err(LinkError::Connect { .. })));
    }

    #[test]
    fn path_too_long() {
        let long_path = "/tmp/".to_string() + &"a".repeat(200) + ".sock";
        let connector = UnixConnector::new(&long_path);
        assert!(matches!(connector.open(), Err(LinkError::PathTooLong { .. })));
    }
}
