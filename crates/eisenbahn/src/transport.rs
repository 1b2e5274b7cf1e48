use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::EisenbahnError;

/// Directory holding IPC socket files.
const IPC_DIR: &str = "/tmp/dpip";

/// Transport layer for ZeroMQ connections.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "address")]
pub enum Transport {
    /// Inter-process communication via Unix domain sockets.
    Ipc(String),

    /// TCP transport for distributed deployment.
    Tcp { host: String, port: u16 },
}

impl Transport {
    /// Create an IPC transport with the given socket name.
    ///
    /// The name is used as a path component under `/tmp/dpip/`.
    pub fn ipc(name: &str) -> Self {
        Self::Ipc(name.to_string())
    }

    /// Create a TCP transport with the given host and port.
    pub fn tcp(host: impl Into<String>, port: u16) -> Self {
        Self::Tcp {
            host: host.into(),
            port,
        }
    }

    /// Parse an endpoint string.
    ///
    /// Accepts `tcp://host:port`, `ipc:///tmp/dpip/name.sock`, and a bare
    /// `host:port` which is taken as TCP (the form workers historically
    /// advertised for their RPC address). IPC sockets elsewhere are
    /// rejected rather than moved under `/tmp/dpip`.
    pub fn from_endpoint(endpoint: &str) -> Result<Self, EisenbahnError> {
        let endpoint = endpoint.trim();
        if let Some(path) = endpoint.strip_prefix("ipc://") {
            let invalid = || EisenbahnError::InvalidEndpoint(endpoint.to_string());
            let path = Path::new(path);
            if path.parent() != Some(Path::new(IPC_DIR)) || path.extension().and_then(|e| e.to_str()) != Some("sock") {
                return Err(invalid());
            }
            let name = path
                .file_stem()
                .and_then(|s| s.to_str())
                .filter(|s| !s.is_empty())
                .ok_or_else(invalid)?;
            return Ok(Transport::ipc(name));
        }

        let addr = endpoint.strip_prefix("tcp://").unwrap_or(endpoint);
        let (host, port) = addr
            .rsplit_once(':')
            .ok_or_else(|| EisenbahnError::InvalidEndpoint(endpoint.to_string()))?;
        let port = port
            .parse::<u16>()
            .map_err(|_| EisenbahnError::InvalidEndpoint(endpoint.to_string()))?;
        if host.is_empty() || host.contains('/') {
            return Err(EisenbahnError::InvalidEndpoint(endpoint.to_string()));
        }
        Ok(Transport::tcp(host, port))
    }

    /// Generate the ZeroMQ endpoint address string.
    pub fn endpoint(&self) -> String {
        match self {
            Self::Ipc(name) => format!("ipc://{IPC_DIR}/{name}.sock"),
            Self::Tcp { host, port } => format!("tcp://{host}:{port}"),
        }
    }

    /// For IPC transports, ensure the parent directory exists.
    ///
    /// ZeroMQ requires the directory to exist before binding an IPC socket.
    /// This is a no-op for TCP transports.
    pub fn ensure_ipc_dir(&self) -> std::io::Result<()> {
        if let Self::Ipc(_) = self {
            let endpoint = self.endpoint();
            let path = endpoint.strip_prefix("ipc://").unwrap_or(&endpoint);
            if let Some(parent) = Path::new(path).parent() {
                std::fs::create_dir_all(parent)?;
            }
        }
        Ok(())
    }

    /// Remove a stale IPC socket file left over from a previous run.
    ///
    /// A `.sock` file survives an unclean exit and causes `EADDRINUSE` on
    /// the next bind. No-op for TCP or when the file does not exist.
    pub fn remove_stale_socket(&self) -> std::io::Result<()> {
        if let Self::Ipc(_) = self {
            let endpoint = self.endpoint();
            let path = endpoint.strip_prefix("ipc://").unwrap_or(&endpoint);
            match std::fs::remove_file(path) {
                Ok(()) => {
                    tracing::debug!(path, "removed stale IPC socket");
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// Prepare the filesystem for binding (IPC only).
    pub(crate) fn prepare_bind(&self) -> Result<(), EisenbahnError> {
        self.ensure_ipc_dir()
            .map_err(|e| EisenbahnError::Transport(e.to_string()))?;
        self.remove_stale_socket()
            .map_err(|e| EisenbahnError::Transport(e.to_string()))
    }
}

impl std::fmt::Display for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.endpoint())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ipc_endpoint() {
        let t = Transport::ipc("registry");
        assert_eq!(t.endpoint(), "ipc:///tmp/dpip/registry.sock");
    }

    #[test]
    fn tcp_endpoint() {
        let t = Transport::tcp("127.0.0.1", 40901);
        assert_eq!(t.endpoint(), "tcp://127.0.0.1:40901");
        assert_eq!(t.to_string(), t.endpoint());
    }

    #[test]
    fn parse_tcp_and_bare_addresses() {
        assert_eq!(
            Transport::from_endpoint("tcp://localhost:40899").unwrap(),
            Transport::tcp("localhost", 40899)
        );
        assert_eq!(
            Transport::from_endpoint("localhost:50051").unwrap(),
            Transport::tcp("localhost", 50051)
        );
    }

    #[test]
    fn parse_ipc_endpoint_roundtrips() {
        let t = Transport::from_endpoint("ipc:///tmp/dpip/jobs.sock").unwrap();
        assert_eq!(t, Transport::ipc("jobs"));
        assert_eq!(t.endpoint(), "ipc:///tmp/dpip/jobs.sock");
    }

    #[test]
    fn parse_rejects_ipc_paths_outside_the_socket_dir() {
        for bad in ["ipc:///var/run/dpip/jobs.sock", "ipc:///tmp/jobs.sock", "ipc://jobs.sock", "ipc:///tmp/dpip/jobs.ipc"] {
            assert!(
                matches!(Transport::from_endpoint(bad), Err(EisenbahnError::InvalidEndpoint(_))),
                "{bad} should be rejected"
            );
        }
    }

    #[test]
    fn parse_rejects_garbage() {
        for bad in ["", "tcp://host", "tcp://:80", "host:notaport", "ipc://", "http://x/y:1"] {
            assert!(
                matches!(Transport::from_endpoint(bad), Err(EisenbahnError::InvalidEndpoint(_))),
                "{bad} should be rejected"
            );
        }
    }
}
