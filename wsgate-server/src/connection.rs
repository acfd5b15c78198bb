//! WebSocket connection handling
//!
//! Each accepted socket is owned by one [`Connection`] actor. The actor runs
//! the opening handshake, then decodes inbound frames and dispatches them to
//! the [`Handler`]. Outbound requests reach it through cloned
//! [`ConnectionHandle`]s over an unbounded channel, and the actor publishes
//! its [`ConnectionState`] back to those handles over a watch channel.
//!
//! ```text
//! AwaitingHandshake --101--> Open --close--> Closing --> Closed
//!         |                    |                           ^
//!         +--400 / timeout-----+--- EOF, error ------------+
//! ```

use crate::config::ConnectionConfig;
use crate::handler::Handler;
use bytes::{Bytes, BytesMut};
use std::net::SocketAddr;
use std::sync::{Arc, OnceLock};
use tokio::sync::{mpsc, watch};
use tracing::{debug, trace, warn};
use wsgate_core::{
    frame::{Frame, FrameParser, LengthEncoding},
    handshake::{self, HandshakeHeaders, HandshakeProcessor},
    transport::TransportStream,
    Error, Opcode, Result,
};

/// Connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Waiting for the client's upgrade request
    AwaitingHandshake,
    /// Handshake done, frames flow both ways
    Open,
    /// A close was requested or received; sends are rejected
    Closing,
    /// The stream has been released
    Closed,
}

#[derive(Debug)]
enum Command {
    Text(Bytes),
    Binary(Bytes),
    Pong,
    Close,
}

#[derive(Debug)]
struct Shared {
    id: u64,
    remote_addr: Option<SocketAddr>,
    path: OnceLock<String>,
    state: watch::Sender<ConnectionState>,
}

/// Cloneable handle for talking to a running [`Connection`]
///
/// Send methods enqueue a request for the actor and return immediately.
/// Errors known at request time (closing, closed, unrepresentable length)
/// are returned; write failures surface as the connection closing.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    shared: Arc<Shared>,
    commands: mpsc::UnboundedSender<Command>,
}

impl ConnectionHandle {
    /// Get the connection ID
    pub fn id(&self) -> u64 {
        self.shared.id
    }

    /// Peer address, when the transport knows it
    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.shared.remote_addr
    }

    /// Request path from the upgrade request, once the handshake completed
    pub fn path(&self) -> Option<&str> {
        self.shared.path.get().map(String::as_str)
    }

    /// Current state
    pub fn state(&self) -> ConnectionState {
        *self.shared.state.borrow()
    }

    /// Check if the connection is open
    pub fn is_open(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    /// Queue a text frame
    pub fn send_text(&self, payload: impl Into<Bytes>) -> Result<()> {
        let payload = payload.into();
        LengthEncoding::for_len(payload.len())?;
        self.enqueue(Command::Text(payload))
    }

    /// Queue a binary frame
    pub fn send_binary(&self, payload: impl Into<Bytes>) -> Result<()> {
        let payload = payload.into();
        LengthEncoding::for_len(payload.len())?;
        self.enqueue(Command::Binary(payload))
    }

    /// Queue an empty pong frame
    pub fn send_pong(&self) -> Result<()> {
        self.enqueue(Command::Pong)
    }

    /// Start closing the connection.
    ///
    /// The state moves to [`ConnectionState::Closing`] immediately; the close
    /// frame is written after every send queued before it.
    pub fn send_close(&self) -> Result<()> {
        let mut outcome = Ok(());
        self.shared.state.send_if_modified(|state| match *state {
            ConnectionState::AwaitingHandshake | ConnectionState::Open => {
                *state = ConnectionState::Closing;
                true
            }
            ConnectionState::Closing => {
                outcome = Err(Error::ConnectionClosing);
                false
            }
            ConnectionState::Closed => {
                outcome = Err(Error::ConnectionClosed);
                false
            }
        });
        outcome?;
        self.commands
            .send(Command::Close)
            .map_err(|_| Error::ConnectionClosed)
    }

    /// Wait until the connection reaches [`ConnectionState::Closed`]
    pub async fn closed(&self) {
        let mut state = self.shared.state.subscribe();
        let _ = state.wait_for(|s| *s == ConnectionState::Closed).await;
    }

    fn enqueue(&self, command: Command) -> Result<()> {
        match self.state() {
            ConnectionState::Closing => return Err(Error::ConnectionClosing),
            ConnectionState::Closed => return Err(Error::ConnectionClosed),
            ConnectionState::AwaitingHandshake | ConnectionState::Open => {}
        }
        self.commands
            .send(command)
            .map_err(|_| Error::ConnectionClosed)
    }

    fn transition(&self, from: ConnectionState, to: ConnectionState) {
        self.shared.state.send_if_modified(|state| {
            if *state == from {
                *state = to;
                true
            } else {
                false
            }
        });
    }

    fn set_state(&self, to: ConnectionState) {
        self.shared.state.send_if_modified(|state| {
            let changed = *state != to;
            *state = to;
            changed
        });
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Stop,
}

enum Event {
    Command(Command),
    Read(Result<usize>),
}

/// Per-socket protocol actor
pub struct Connection {
    stream: Option<Box<dyn TransportStream>>,
    parser: FrameParser,
    handler: Arc<dyn Handler>,
    config: ConnectionConfig,
    commands: mpsc::UnboundedReceiver<Command>,
    handle: ConnectionHandle,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.handle.id())
            .field("state", &self.handle.state())
            .field("config", &self.config)
            .field("buffered", &self.parser.buffered_bytes())
            .field("stream", &"<stream>")
            .finish()
    }
}

impl Connection {
    /// Create an actor for a freshly accepted stream
    pub fn new<S>(
        id: u64,
        stream: S,
        handler: Arc<dyn Handler>,
        config: ConnectionConfig,
    ) -> Self
    where
        S: TransportStream + 'static,
    {
        let (tx, rx) = mpsc::unbounded_channel();
        let (state, _) = watch::channel(ConnectionState::AwaitingHandshake);
        let shared = Shared {
            id,
            remote_addr: stream.remote_addr(),
            path: OnceLock::new(),
            state,
        };

        Self {
            stream: Some(Box::new(stream)),
            parser: FrameParser::server(config.max_frame_size),
            handler,
            config,
            commands: rx,
            handle: ConnectionHandle {
                shared: Arc::new(shared),
                commands: tx,
            },
        }
    }

    /// Get a handle to this connection
    pub fn handle(&self) -> ConnectionHandle {
        self.handle.clone()
    }

    /// Drive the connection until it closes.
    ///
    /// The stream is shut down and released on every exit path. The handler's
    /// `on_close` runs only if the handshake succeeded.
    #[tracing::instrument(
        name = "connection",
        skip(self),
        fields(id = self.handle.id(), remote = ?self.handle.remote_addr())
    )]
    pub async fn run(mut self) -> Result<()> {
        let result = match self.accept_handshake().await {
            Ok(()) => {
                debug!(path = self.handle.path().unwrap_or("/"), "connection open");
                let result = self.serve().await;
                self.handle.set_state(ConnectionState::Closing);
                self.release().await;
                self.handler.on_close(&self.handle).await;
                result
            }
            Err(e) => {
                warn!(error = %e, "handshake rejected");
                self.reject(&e).await;
                self.release().await;
                Err(e)
            }
        };

        self.handle.set_state(ConnectionState::Closed);
        match &result {
            Ok(()) => debug!("connection closed"),
            Err(e) => debug!(error = %e, "connection closed with error"),
        }
        result
    }

    async fn accept_handshake(&mut self) -> Result<()> {
        let limit = self.config.handshake_timeout;
        let (headers, remainder) = tokio::time::timeout(limit, self.read_handshake())
            .await
            .map_err(|_| Error::Timeout(limit))??;

        let response = handshake::upgrade_response(&headers)?;
        let _ = self.handle.shared.path.set(headers.path().to_string());

        let stream = self.stream_mut()?;
        stream.write_all(response.as_bytes()).await?;
        stream.flush().await?;

        self.parser.feed(&remainder);
        self.handle
            .transition(ConnectionState::AwaitingHandshake, ConnectionState::Open);
        Ok(())
    }

    async fn read_handshake(&mut self) -> Result<(HandshakeHeaders, BytesMut)> {
        let mut processor = HandshakeProcessor::new(self.config.max_handshake_size);
        let mut chunk = vec![0u8; self.config.read_chunk_size];
        let stream = self.stream_mut()?;

        loop {
            let n = stream.read(&mut chunk).await?;
            if n == 0 {
                return Err(processor.incomplete());
            }
            if let Some(headers) = processor.feed(&chunk[..n])? {
                return Ok((headers, processor.into_remainder()));
            }
        }
    }

    /// Best-effort `400 Bad Request` for a refused upgrade
    async fn reject(&mut self, error: &Error) {
        if matches!(error, Error::Transport(_)) {
            return;
        }
        let Some(stream) = self.stream.as_mut() else {
            return;
        };

        let response = handshake::render_bad_request(&error.to_string());
        let written = match stream.write_all(response.as_bytes()).await {
            Ok(()) => stream.flush().await,
            Err(e) => Err(e),
        };
        if let Err(e) = written {
            debug!(error = %e, "failed to write 400 response");
        }
    }

    async fn serve(&mut self) -> Result<()> {
        self.handler.on_open(&self.handle).await;
        let mut chunk = vec![0u8; self.config.read_chunk_size];

        loop {
            if self.dispatch_frames().await? == Flow::Stop {
                return Ok(());
            }

            let event = {
                let stream = self.stream.as_mut().ok_or(Error::ConnectionClosed)?;
                tokio::select! {
                    biased;
                    Some(command) = self.commands.recv() => Event::Command(command),
                    read = stream.read(&mut chunk) => Event::Read(read),
                }
            };

            match event {
                Event::Command(command) => {
                    if self.execute(command).await? == Flow::Stop {
                        return Ok(());
                    }
                }
                Event::Read(Ok(0)) => {
                    debug!("peer closed the stream");
                    self.handle.set_state(ConnectionState::Closing);
                    // Sends accepted before the state changed still go out
                    if let Err(e) = self.drain_commands().await {
                        debug!(error = %e, "failed to flush queued frames");
                    }
                    return Ok(());
                }
                Event::Read(Ok(n)) => {
                    #[cfg(feature = "metrics")]
                    metrics::counter!("wsgate_server_bytes_received_total").increment(n as u64);
                    self.parser.feed(&chunk[..n]);
                }
                Event::Read(Err(e)) => {
                    self.handle.set_state(ConnectionState::Closing);
                    return Err(e);
                }
            }
        }
    }

    /// Dispatch every complete frame in the buffer, in order.
    async fn dispatch_frames(&mut self) -> Result<Flow> {
        if self.handle.state() == ConnectionState::Closing {
            return self.drain_commands().await;
        }

        while let Some(frame) = self.parser.next_frame().map_err(|e| {
            warn!(error = %e, "protocol violation");
            self.handle.set_state(ConnectionState::Closing);
            e
        })? {
            if self.dispatch(frame).await? == Flow::Stop {
                return Ok(Flow::Stop);
            }
            // Replies queued by the handler go out before the next frame
            if self.drain_commands().await? == Flow::Stop {
                return Ok(Flow::Stop);
            }
        }
        Ok(Flow::Continue)
    }

    async fn dispatch(&mut self, frame: Frame) -> Result<Flow> {
        trace!(
            opcode = ?frame.opcode,
            fin = frame.fin,
            len = frame.payload_len(),
            "frame received"
        );
        #[cfg(feature = "metrics")]
        metrics::counter!("wsgate_server_frames_received_total").increment(1);

        let flow = match frame.opcode {
            Opcode::Text => {
                self.handler
                    .on_text(&self.handle, frame.payload)
                    .await;
                Flow::Continue
            }
            Opcode::Binary => {
                self.handler
                    .on_binary(&self.handle, frame.payload)
                    .await;
                Flow::Continue
            }
            Opcode::Ping => {
                self.write_frame(&Frame::pong(Bytes::new())).await?;
                Flow::Continue
            }
            Opcode::Pong => Flow::Continue,
            Opcode::Continuation => {
                debug!(len = frame.payload_len(), "continuation frame ignored");
                Flow::Continue
            }
            Opcode::Close => {
                self.handle.set_state(ConnectionState::Closing);
                // Echo the status code; a body too short to hold one gets an empty reply
                let reply = if frame.payload.len() >= 2 {
                    Frame::new(Opcode::Close, frame.payload.slice(..2))
                } else {
                    Frame::close()
                };
                if let Err(e) = self.write_frame(&reply).await {
                    debug!(error = %e, "failed to write close reply");
                }
                Flow::Stop
            }
        };

        Ok(flow)
    }

    async fn drain_commands(&mut self) -> Result<Flow> {
        while let Ok(command) = self.commands.try_recv() {
            if self.execute(command).await? == Flow::Stop {
                return Ok(Flow::Stop);
            }
        }
        Ok(Flow::Continue)
    }

    async fn execute(&mut self, command: Command) -> Result<Flow> {
        match command {
            Command::Text(payload) => self.write_frame(&Frame::text(payload)).await?,
            Command::Binary(payload) => self.write_frame(&Frame::binary(payload)).await?,
            Command::Pong => self.write_frame(&Frame::pong(Bytes::new())).await?,
            Command::Close => {
                debug!("closing on request");
                if let Err(e) = self.write_frame(&Frame::close()).await {
                    debug!(error = %e, "failed to write close frame");
                }
                return Ok(Flow::Stop);
            }
        }
        Ok(Flow::Continue)
    }

    async fn write_frame(&mut self, frame: &Frame) -> Result<()> {
        let bytes = frame.to_bytes()?;
        let stream = self.stream_mut()?;
        stream.write_all(&bytes).await?;
        stream.flush().await?;

        trace!(opcode = ?frame.opcode, len = frame.payload_len(), "frame sent");
        #[cfg(feature = "metrics")]
        {
            metrics::counter!("wsgate_server_frames_sent_total").increment(1);
            metrics::counter!("wsgate_server_bytes_sent_total").increment(bytes.len() as u64);
        }
        Ok(())
    }

    async fn release(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            if let Err(e) = stream.close().await {
                debug!(error = %e, "error while closing stream");
            }
        }
    }

    fn stream_mut(&mut self) -> Result<&mut Box<dyn TransportStream>> {
        self.stream.as_mut().ok_or(Error::ConnectionClosed)
    }
}
