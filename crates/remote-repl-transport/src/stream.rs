//! TCP and Unix socket plumbing behind a single boxed stream type.

use std::io;
#[cfg(unix)]
use std::path::PathBuf;

use remote_repl_core::{ConnectionAddress, Transport};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::{TcpListener, TcpStream},
};

pub type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

#[cfg(not(unix))]
fn unsupported() -> io::Error {
    io::Error::new(
        io::ErrorKind::Unsupported,
        "unix domain sockets are not supported on this platform",
    )
}

/// Open a connection to `address`.
///
/// # Errors
/// Returns error if the endpoint cannot be reached.
pub async fn connect(address: &ConnectionAddress) -> io::Result<(BoxedReader, BoxedWriter)> {
    match address.transport() {
        Transport::Tcp { .. } => {
            let target = address.socket_addr().unwrap_or_default();
            let stream = TcpStream::connect(target).await?;
            stream.set_nodelay(true)?;
            let (r, w) = stream.into_split();
            Ok((Box::new(r), Box::new(w)))
        }
        #[cfg(unix)]
        Transport::Unix { path } => {
            let stream = tokio::net::UnixStream::connect(path).await?;
            let (r, w) = stream.into_split();
            Ok((Box::new(r), Box::new(w)))
        }
        #[cfg(not(unix))]
        Transport::Unix { .. } => Err(unsupported()),
    }
}

/// Bound listening socket.
pub enum Listener {
    Tcp(TcpListener),
    #[cfg(unix)]
    Unix(tokio::net::UnixListener, PathBuf),
}

impl Listener {
    /// Bind to `address`, returning the listener and the address actually
    /// bound (an OS-assigned TCP port replaces port 0).
    ///
    /// # Errors
    /// Returns error if the socket cannot be bound.
    pub async fn bind(address: &ConnectionAddress) -> io::Result<(Self, ConnectionAddress)> {
        match address.transport() {
            Transport::Tcp { .. } => {
                let target = address.socket_addr().unwrap_or_default();
                let listener = TcpListener::bind(target).await?;
                let port = listener.local_addr()?.port();
                Ok((Self::Tcp(listener), address.with_port(port)))
            }
            #[cfg(unix)]
            Transport::Unix { path } => {
                let listener = tokio::net::UnixListener::bind(path)?;
                Ok((Self::Unix(listener, path.clone()), address.clone()))
            }
            #[cfg(not(unix))]
            Transport::Unix { .. } => Err(unsupported()),
        }
    }

    /// Accept the next connection. Returns the stream halves and a peer description.
    ///
    /// # Errors
    /// Returns error if accepting fails.
    pub async fn accept(&self) -> io::Result<(BoxedReader, BoxedWriter, String)> {
        match self {
            Self::Tcp(listener) => {
                let (stream, peer) = listener.accept().await?;
                stream.set_nodelay(true)?;
                let (r, w) = stream.into_split();
                Ok((Box::new(r), Box::new(w), peer.to_string()))
            }
            #[cfg(unix)]
            Self::Unix(listener, path) => {
                let (stream, _) = listener.accept().await?;
                let (r, w) = stream.into_split();
                Ok((Box::new(r), Box::new(w), path.display().to_string()))
            }
        }
    }

    /// Socket file to remove when the listener goes away.
    #[must_use]
    pub fn socket_path(&self) -> Option<std::path::PathBuf> {
        match self {
            Self::Tcp(_) => None,
            #[cfg(unix)]
            Self::Unix(_, path) => Some(path.clone()),
        }
    }
}
