use crate::{Endpoint, Error};
use socket2::SockRef;
use std::{
    fs,
    io::{self, IoSlice},
    os::unix::fs::FileTypeExt as _,
    path::Path,
    pin::Pin,
    task::{Context, Poll},
};
use tokio::{
    io::{AsyncRead, AsyncWrite, ReadBuf},
    net::{TcpListener, TcpStream, UnixListener, UnixStream},
};
use tracing::{debug, warn};

/// Implementation of [crate::Socket] for the [tokio] runtime.
#[derive(Debug)]
pub enum Socket {
    Tcp(TcpStream),
    Unix(UnixStream),
}

impl crate::Socket for Socket {
    fn set_keepalive(&self, enabled: bool) -> Result<(), io::Error> {
        match self {
            Self::Tcp(stream) => SockRef::from(stream).set_keepalive(enabled),
            Self::Unix(stream) => SockRef::from(stream).set_keepalive(enabled),
        }
    }
}

impl AsyncRead for Socket {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Tcp(stream) => Pin::new(stream).poll_read(cx, buf),
            Self::Unix(stream) => Pin::new(stream).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for Socket {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            Self::Tcp(stream) => Pin::new(stream).poll_write(cx, buf),
            Self::Unix(stream) => Pin::new(stream).poll_write(cx, buf),
        }
    }

    fn poll_write_vectored(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        bufs: &[IoSlice<'_>],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            Self::Tcp(stream) => Pin::new(stream).poll_write_vectored(cx, bufs),
            Self::Unix(stream) => Pin::new(stream).poll_write_vectored(cx, bufs),
        }
    }

    fn is_write_vectored(&self) -> bool {
        match self {
            Self::Tcp(stream) => stream.is_write_vectored(),
            Self::Unix(stream) => stream.is_write_vectored(),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Tcp(stream) => Pin::new(stream).poll_flush(cx),
            Self::Unix(stream) => Pin::new(stream).poll_flush(cx),
        }
    }

    /// Shuts down the write side only.
    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Tcp(stream) => Pin::new(stream).poll_shutdown(cx),
            Self::Unix(stream) => Pin::new(stream).poll_shutdown(cx),
        }
    }
}

/// Implementation of [crate::Listener] using the [tokio] runtime.
pub enum Listener {
    Tcp(TcpListener),
    Unix(UnixListener),
}

impl crate::Listener for Listener {
    type Socket = Socket;

    async fn accept(&mut self) -> Result<Self::Socket, Error> {
        match self {
            Self::Tcp(listener) => {
                let (stream, addr) = listener.accept().await?;
                debug!(?addr, "accepted tcp connection");
                Ok(Socket::Tcp(stream))
            }
            Self::Unix(listener) => {
                let (stream, _) = listener.accept().await?;
                debug!("accepted unix connection");
                Ok(Socket::Unix(stream))
            }
        }
    }

    fn local_endpoint(&self) -> Result<Endpoint, io::Error> {
        match self {
            Self::Tcp(listener) => listener.local_addr().map(Endpoint::Tcp),
            Self::Unix(listener) => listener
                .local_addr()?
                .as_pathname()
                .map(|path| Endpoint::Unix(path.to_path_buf()))
                .ok_or_else(|| io::Error::other("unnamed unix socket")),
        }
    }
}

/// Remove a socket file left behind by a previous listener. Anything other than a
/// socket is left alone (and will make the bind fail).
fn remove_stale_socket(path: &Path) {
    let Ok(metadata) = fs::symlink_metadata(path) else {
        return;
    };
    if !metadata.file_type().is_socket() {
        return;
    }
    if let Err(err) = fs::remove_file(path) {
        warn!(?err, path = %path.display(), "failed to remove stale socket");
    }
}

/// [crate::Network] implementation that uses the [tokio] runtime.
#[derive(Clone, Debug, Default)]
pub struct Network;

impl crate::Network for Network {
    type Socket = Socket;
    type Listener = Listener;

    async fn bind(&self, endpoint: &Endpoint) -> Result<Self::Listener, Error> {
        let bind_failed = |err| Error::BindFailed(endpoint.clone(), err);
        match endpoint {
            Endpoint::Tcp(addr) => TcpListener::bind(addr)
                .await
                .map(Listener::Tcp)
                .map_err(bind_failed),
            Endpoint::Unix(path) => {
                remove_stale_socket(path);
                UnixListener::bind(path)
                    .map(Listener::Unix)
                    .map_err(bind_failed)
            }
        }
    }

    async fn dial(&self, endpoint: &Endpoint) -> Result<Self::Socket, Error> {
        let result = match endpoint {
            Endpoint::Tcp(addr) => TcpStream::connect(addr).await.map(Socket::Tcp),
            Endpoint::Unix(path) => UnixStream::connect(path).await.map(Socket::Unix),
        };
        result.map_err(|err| {
            debug!(%endpoint, ?err, "connect failed");
            Error::ConnectionFailed
        })
    }
}
