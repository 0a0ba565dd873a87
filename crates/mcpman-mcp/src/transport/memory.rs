//! In-memory duplex transport for wire-level tests.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::DuplexStream;

use super::LineTransport;

/// Create a connected (client transport, raw server stream) pair.
///
/// The returned stream is the "server side": tests read client lines from it
/// and write JSON-RPC lines back, playing the upstream.
pub fn memory_pair(timeout: Duration) -> (Arc<LineTransport>, DuplexStream) {
    let (client_stream, server_stream) = tokio::io::duplex(64 * 1024);
    let (read, write) = tokio::io::split(client_stream);
    let transport = LineTransport::start(read, write, timeout);
    (transport, server_stream)
}
