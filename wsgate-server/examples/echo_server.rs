//! Echo server example
//!
//! Listens on ws://127.0.0.1:8080 and echoes every text and binary frame
//! back to its sender. Set `RUST_LOG=debug` to watch connections come and go.

use wsgate_server::{EchoHandler, ServerBuilder};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    wsgate_server::logging::init_logging()?;

    let server = ServerBuilder::new()
        .bind("127.0.0.1:8080")?
        .max_connections(1000)
        .handshake_timeout(std::time::Duration::from_secs(10))
        .build_with_handler(EchoHandler::new())?;

    tracing::info!("WebSocket echo server listening on ws://127.0.0.1:8080");

    // Start the server
    server.serve().await?;

    Ok(())
}
