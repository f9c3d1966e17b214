//! Endpoint allocation.
//!
//! TCP endpoints take an OS-assigned ephemeral port: bind to port 0 on the
//! loopback host, read the port back and release it. Another process may grab
//! the port before the server binds it; that race is accepted.
//!
//! Socket endpoints are `<sockets_dir>/<token>.sock` with a 128-bit random hex
//! token. The sockets directory is shared, the file names are not.

use config::{AddressingMode, MongodConfig};
use errors::{MongodError, Result};
use mongodb::options::ServerAddress;
use std::path::{Path, PathBuf};

/// Portable upper bound for `sun_path` (104 bytes on macOS including NUL).
pub const MAX_SOCKET_PATH_LEN: usize = 103;

/// Where a server instance listens.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Endpoint {
    Tcp { host: String, port: u16 },
    Socket { path: PathBuf }
}

impl Endpoint {
    pub fn tcp(host: impl Into<String>, port: u16) -> Self {
        Self::Tcp {
            host: host.into(),
            port
        }
    }

    pub fn socket(path: impl Into<PathBuf>) -> Self {
        Self::Socket { path: path.into() }
    }

    /// Socket file backing this endpoint, if any.
    pub fn socket_path(&self) -> Option<&Path> {
        match self {
            Self::Tcp { .. } => None,
            Self::Socket { path } => Some(path)
        }
    }

    /// Driver address for this endpoint.
    pub fn server_address(&self) -> Result<ServerAddress> {
        match self {
            Self::Tcp { host, port } => Ok(ServerAddress::Tcp {
                host: host.clone(),
                port: Some(*port)
            }),
            #[cfg(unix)]
            Self::Socket { path } => Ok(ServerAddress::Unix { path: path.clone() }),
            #[cfg(not(unix))]
            Self::Socket { path } => Err(MongodError::EndpointAllocation {
                reason: format!(
                    "unix sockets are not supported on this platform: {}",
                    path.display()
                )
            })
        }
    }

    /// `mongodb://` connection string for this endpoint.
    ///
    /// Socket paths are percent-encoded as the URI host.
    pub fn connection_string(&self, replica_set: Option<&str>) -> String {
        let host = match self {
            Self::Tcp { host, port } => format!("{host}:{port}"),
            Self::Socket { path } => urlencoding::encode(&path.to_string_lossy()).into_owned()
        };
        match replica_set {
            Some(name) => format!("mongodb://{host}/?directConnection=true&replicaSet={name}"),
            None => format!("mongodb://{host}/?directConnection=true")
        }
    }
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Tcp { host, port } => write!(f, "{host}:{port}"),
            Self::Socket { path } => write!(f, "{}", path.display())
        }
    }
}

/// Random 128-bit hex token.
pub fn random_token() -> String {
    hex::encode(rand::random::<[u8; 16]>())
}

/// Produces unique endpoints for new instances.
#[derive(Debug, Clone)]
pub struct EndpointAllocator {
    mode: AddressingMode,
    bind_host: String,
    sockets_dir: PathBuf
}

impl EndpointAllocator {
    pub fn tcp(bind_host: impl Into<String>) -> Self {
        Self {
            mode: AddressingMode::Tcp,
            bind_host: bind_host.into(),
            sockets_dir: PathBuf::new()
        }
    }

    pub fn socket(sockets_dir: impl Into<PathBuf>) -> Self {
        Self {
            mode: AddressingMode::Socket,
            bind_host: String::new(),
            sockets_dir: sockets_dir.into()
        }
    }

    pub fn from_config(config: &MongodConfig) -> Self {
        match config.addressing {
            AddressingMode::Tcp => Self::tcp(config.bind_host.clone()),
            AddressingMode::Socket => Self::socket(config.sockets_dir())
        }
    }

    pub fn mode(&self) -> AddressingMode {
        self.mode
    }

    pub async fn allocate(&self) -> Result<Endpoint> {
        match self.mode {
            AddressingMode::Tcp => self.allocate_port().await,
            AddressingMode::Socket => self.allocate_socket().await
        }
    }

    async fn allocate_port(&self) -> Result<Endpoint> {
        let listener = tokio::net::TcpListener::bind((self.bind_host.as_str(), 0))
            .await
            .map_err(|e| MongodError::EndpointAllocation {
                reason: format!("bind {}:0: {e}", self.bind_host)
            })?;
        let port = listener
            .local_addr()
            .map_err(|e| MongodError::EndpointAllocation {
                reason: e.to_string()
            })?
            .port();
        drop(listener);

        tracing::debug!(host = %self.bind_host, port, "Allocated TCP endpoint");
        Ok(Endpoint::tcp(self.bind_host.clone(), port))
    }

    async fn allocate_socket(&self) -> Result<Endpoint> {
        if cfg!(not(unix)) {
            return Err(MongodError::EndpointAllocation {
                reason: "unix sockets are not supported on this platform".to_string()
            });
        }

        tokio::fs::create_dir_all(&self.sockets_dir)
            .await
            .map_err(|e| MongodError::EndpointAllocation {
                reason: format!("create {}: {e}", self.sockets_dir.display())
            })?;
        let dir = std::path::absolute(&self.sockets_dir).map_err(|e| {
            MongodError::EndpointAllocation {
                reason: e.to_string()
            }
        })?;

        let path = dir.join(format!("{}.sock", random_token()));
        let length = path.as_os_str().len();
        if length > MAX_SOCKET_PATH_LEN {
            return Err(MongodError::SocketPathTooLong {
                path: path.display().to_string(),
                length,
                max: MAX_SOCKET_PATH_LEN
            });
        }

        tracing::debug!(socket = %path.display(), "Allocated socket endpoint");
        Ok(Endpoint::Socket { path })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::future::join_all;
    use std::collections::HashSet;

    #[test]
    fn test_random_token_shape() {
        let token = random_token();
        assert_eq!(token.len(), 32);
        assert!(token.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(token, random_token());
    }

    #[test]
    fn test_endpoint_display() {
        assert_eq!(Endpoint::tcp("127.0.0.1", 27017).to_string(), "127.0.0.1:27017");
        assert_eq!(
            Endpoint::socket("/tmp/a.sock").to_string(),
            "/tmp/a.sock"
        );
    }

    #[test]
    fn test_connection_string() {
        let tcp = Endpoint::tcp("127.0.0.1", 27017);
        assert_eq!(
            tcp.connection_string(Some("rs0")),
            "mongodb://127.0.0.1:27017/?directConnection=true&replicaSet=rs0"
        );
        assert_eq!(
            tcp.connection_string(None),
            "mongodb://127.0.0.1:27017/?directConnection=true"
        );

        let socket = Endpoint::socket("/tmp/a.sock");
        assert_eq!(
            socket.connection_string(None),
            "mongodb://%2Ftmp%2Fa.sock/?directConnection=true"
        );
    }

    #[tokio::test]
    async fn test_tcp_port_is_released() {
        let allocator = EndpointAllocator::tcp("127.0.0.1");
        let endpoint = allocator.allocate().await.unwrap();
        let Endpoint::Tcp { host, port } = endpoint else {
            panic!("expected a TCP endpoint");
        };
        assert_ne!(port, 0);
        // The port must be free for the server to bind.
        tokio::net::TcpListener::bind((host.as_str(), port))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_concurrent_tcp_allocations_are_distinct() {
        let allocator = EndpointAllocator::tcp("127.0.0.1");
        let endpoints = join_all((0..4).map(|_| allocator.allocate())).await;
        let unique: HashSet<_> = endpoints.into_iter().map(Result::unwrap).collect();
        assert_eq!(unique.len(), 4);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_concurrent_socket_allocations_are_distinct() {
        let dir = tempfile::TempDir::new().unwrap();
        let sockets = dir.path().join(".mongod-sockets");
        let allocator = EndpointAllocator::socket(&sockets);

        let endpoints = join_all((0..32).map(|_| allocator.allocate())).await;
        let unique: HashSet<_> = endpoints.into_iter().map(Result::unwrap).collect();

        assert_eq!(unique.len(), 32);
        assert!(sockets.is_dir());
        for endpoint in &unique {
            let path = endpoint.socket_path().unwrap();
            assert!(path.is_absolute());
            assert_eq!(path.parent().unwrap(), sockets.as_path());
            assert_eq!(path.extension().unwrap(), "sock");
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_socket_path_too_long() {
        let dir = tempfile::TempDir::new().unwrap();
        let deep = dir.path().join("d".repeat(90));
        let allocator = EndpointAllocator::socket(&deep);

        let result = allocator.allocate().await;
        assert!(matches!(
            result,
            Err(MongodError::SocketPathTooLong { .. })
        ));
    }
}
