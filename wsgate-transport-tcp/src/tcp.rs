//! TCP transport implementation for wsgate
//!
//! This module provides TCP-based transport implementation for WebSocket connections.

use async_trait::async_trait;
use std::net::SocketAddr;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream as TokioTcpStream};
use wsgate_core::{
    transport::{Transport, TransportStream},
    Error, Result,
};

/// TCP transport implementation
#[derive(Debug)]
pub struct TcpTransport {
    listener: TcpListener,
    local_addr: SocketAddr,
    nodelay: bool,
}

impl TcpTransport {
    /// Create a new TCP transport bound to the given address
    pub async fn bind(addr: SocketAddr) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Self::from_listener(listener)
    }

    /// Wrap an already bound listener
    pub fn from_listener(listener: TcpListener) -> Result<Self> {
        let local_addr = listener.local_addr()?;
        Ok(Self {
            listener,
            local_addr,
            nodelay: true,
        })
    }

    /// Set `TCP_NODELAY` on accepted sockets (on by default)
    pub fn nodelay(mut self, nodelay: bool) -> Self {
        self.nodelay = nodelay;
        self
    }
}

#[async_trait]
impl Transport for TcpTransport {
    type Stream = TcpStream;

    async fn accept(&self) -> Result<Self::Stream> {
        let (stream, addr) = self.listener.accept().await?;
        if let Err(e) = stream.set_nodelay(self.nodelay) {
            tracing::debug!(remote = %addr, error = %e, "failed to set TCP_NODELAY");
        }
        tracing::trace!(remote = %addr, "accepted TCP connection");
        Ok(TcpStream::with_addr(stream, addr))
    }

    fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.local_addr)
    }
}

/// TCP stream implementation
#[derive(Debug)]
pub struct TcpStream {
    stream: Option<TokioTcpStream>,
    remote_addr: Option<SocketAddr>,
}

impl TcpStream {
    /// Create a new TCP stream from a tokio TCP stream
    pub fn from_tokio(stream: TokioTcpStream) -> Self {
        let remote_addr = stream.peer_addr().ok();
        Self {
            stream: Some(stream),
            remote_addr,
        }
    }

    fn with_addr(stream: TokioTcpStream, remote_addr: SocketAddr) -> Self {
        Self {
            stream: Some(stream),
            remote_addr: Some(remote_addr),
        }
    }

    /// Connect to a remote address
    pub async fn connect(addr: SocketAddr) -> Result<Self> {
        let stream = TokioTcpStream::connect(addr).await?;
        Ok(Self::from_tokio(stream))
    }

    /// Get the local address of the socket
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.connected()?.local_addr()?)
    }

    fn connected(&self) -> Result<&TokioTcpStream> {
        self.stream.as_ref().ok_or(Error::ConnectionClosed)
    }

    fn connected_mut(&mut self) -> Result<&mut TokioTcpStream> {
        self.stream.as_mut().ok_or(Error::ConnectionClosed)
    }
}

#[async_trait]
impl TransportStream for TcpStream {
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        Ok(self.connected_mut()?.read(buf).await?)
    }

    async fn write_all(&mut self, buf: &[u8]) -> Result<()> {
        Ok(self.connected_mut()?.write_all(buf).await?)
    }

    async fn flush(&mut self) -> Result<()> {
        Ok(self.connected_mut()?.flush().await?)
    }

    async fn close(&mut self) -> Result<()> {
        if let Some(mut stream) = self.stream.take() {
            stream.shutdown().await?;
        }
        Ok(())
    }

    fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote_addr
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_err, assert_ok};

    async fn loopback() -> TcpTransport {
        TcpTransport::bind("127.0.0.1:0".parse().unwrap())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_tcp_transport_binds_ephemeral_port() {
        let transport = loopback().await;
        let addr = transport.local_addr().unwrap();
        assert!(addr.ip().is_loopback());
        assert_ne!(addr.port(), 0);
    }

    #[tokio::test]
    async fn test_tcp_accept_and_exchange() {
        let transport = loopback().await;
        let addr = transport.local_addr().unwrap();

        let client = tokio::spawn(async move {
            let mut stream = TcpStream::connect(addr).await.unwrap();
            stream.write_all(b"ping").await.unwrap();
            let mut buf = [0u8; 4];
            let n = stream.read(&mut buf).await.unwrap();
            buf[..n].to_vec()
        });

        let mut server = transport.accept().await.unwrap();
        assert!(server.remote_addr().is_some());
        let mut buf = [0u8; 4];
        let n = server.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"ping");
        server.write_all(b"pong").await.unwrap();
        server.flush().await.unwrap();

        assert_eq!(client.await.unwrap(), b"pong".to_vec());
    }

    #[tokio::test]
    async fn test_tcp_stream_closed_after_close() {
        let transport = loopback().await;
        let addr = transport.local_addr().unwrap();

        let mut client = TcpStream::connect(addr).await.unwrap();
        let _server = transport.accept().await.unwrap();

        assert_ok!(client.local_addr());
        assert_ok!(client.close().await);
        assert_ok!(client.close().await);
        assert_err!(client.write_all(b"late").await);
        assert_err!(client.local_addr());
    }
}
