//! Transport layer abstraction
//!
//! The connection state machine talks to its socket only through
//! [`TransportStream`], so TCP, TLS or in-memory pipes can carry a
//! WebSocket session. Listeners implement [`Transport`].

use crate::error::Result;
use std::net::SocketAddr;

/// Transport trait for abstracting different listener types
#[async_trait::async_trait]
pub trait Transport: Send + Sync + 'static {
    /// The stream type produced by this transport
    type Stream: TransportStream + 'static;

    /// Accept an incoming connection
    async fn accept(&self) -> Result<Self::Stream>;

    /// Get the local address
    fn local_addr(&self) -> Result<SocketAddr>;
}

/// Trait for transport streams
#[async_trait::async_trait]
pub trait TransportStream: Send {
    /// Read available data; `Ok(0)` means the peer closed the stream
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize>;

    /// Write all data to the stream
    async fn write_all(&mut self, buf: &[u8]) -> Result<()>;

    /// Flush the stream
    async fn flush(&mut self) -> Result<()>;

    /// Shut down the write side and release the stream
    async fn close(&mut self) -> Result<()>;

    /// Get the remote address, when the stream has one
    fn remote_addr(&self) -> Option<SocketAddr>;
}

#[async_trait::async_trait]
impl TransportStream for Box<dyn TransportStream> {
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        (**self).read(buf).await
    }

    async fn write_all(&mut self, buf: &[u8]) -> Result<()> {
        (**self).write_all(buf).await
    }

    async fn flush(&mut self) -> Result<()> {
        (**self).flush().await
    }

    async fn close(&mut self) -> Result<()> {
        (**self).close().await
    }

    fn remote_addr(&self) -> Option<SocketAddr> {
        (**self).remote_addr()
    }
}

#[cfg(feature = "tokio-runtime")]
pub use io_stream::IoStream;

#[cfg(feature = "tokio-runtime")]
mod io_stream {
    use super::*;
    use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

    /// Adapts any tokio byte stream (TLS streams, `tokio::io::duplex`
    /// halves, Unix sockets) to [`TransportStream`].
    #[derive(Debug)]
    pub struct IoStream<T> {
        io: Option<T>,
        remote_addr: Option<SocketAddr>,
    }

    impl<T> IoStream<T> {
        /// Wrap a stream with no known peer address
        pub fn new(io: T) -> Self {
            Self {
                io: Some(io),
                remote_addr: None,
            }
        }

        /// Record the peer address
        pub fn with_remote_addr(mut self, addr: SocketAddr) -> Self {
            self.remote_addr = Some(addr);
            self
        }

        /// Whether the stream has been closed
        pub fn is_closed(&self) -> bool {
            self.io.is_none()
        }

        fn io_mut(&mut self) -> Result<&mut T> {
            self.io.as_mut().ok_or(crate::Error::ConnectionClosed)
        }
    }

    #[async_trait::async_trait]
    impl<T> TransportStream for IoStream<T>
    where
        T: AsyncRead + AsyncWrite + Unpin + Send,
    {
        async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
            Ok(self.io_mut()?.read(buf).await?)
        }

        async fn write_all(&mut self, buf: &[u8]) -> Result<()> {
            Ok(self.io_mut()?.write_all(buf).await?)
        }

        async fn flush(&mut self) -> Result<()> {
            Ok(self.io_mut()?.flush().await?)
        }

        async fn close(&mut self) -> Result<()> {
            if let Some(mut io) = self.io.take() {
                io.shutdown().await?;
            }
            Ok(())
        }

        fn remote_addr(&self) -> Option<SocketAddr> {
            self.remote_addr
        }
    }
}

#[cfg(all(test, feature = "tokio-runtime"))]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn test_io_stream_round_trip() {
        let (server, mut client) = tokio::io::duplex(64);
        let mut stream = IoStream::new(server);

        client.write_all(b"hello").await.unwrap();
        let mut buf = [0u8; 16];
        let n = stream.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"hello");

        stream.write_all(b"world").await.unwrap();
        stream.flush().await.unwrap();
        let n = client.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"world");
    }

    #[tokio::test]
    async fn test_io_stream_close_releases_stream() {
        let (server, mut client) = tokio::io::duplex(64);
        let mut stream = IoStream::new(server).with_remote_addr("127.0.0.1:9000".parse().unwrap());
        assert_eq!(stream.remote_addr(), Some("127.0.0.1:9000".parse().unwrap()));

        stream.close().await.unwrap();
        assert!(stream.is_closed());
        tokio_test::assert_err!(stream.write_all(b"late").await);

        let mut buf = [0u8; 4];
        assert_eq!(client.read(&mut buf).await.unwrap(), 0);
    }
}
