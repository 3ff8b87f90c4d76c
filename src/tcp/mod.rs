//! The `~`-prefixed line protocol on the command port.

pub mod dispatch;

use std::{net::SocketAddr, time::Duration};

use anyhow::{Context, Result};
use flashforge::command::Command;
use tokio::{
    io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader},
    net::{TcpListener, TcpStream},
    task::JoinHandle,
};

use crate::{
    fault::{FaultInjector, Outcome},
    state::SharedState,
};

/// A connection with no command for this long is closed.
pub const READ_TIMEOUT: Duration = Duration::from_secs(60);

/// Longest command line accepted, newline included. Longer lines close the
/// connection.
pub const MAX_LINE_BYTES: usize = 4096;

/// Sent before closing a connection whose line overran [`MAX_LINE_BYTES`].
pub const LINE_TOO_LONG_REPLY: &[u8] = b"Error: command too long\nok\n";

/// A running command listener.
#[derive(Debug)]
pub struct CommandServer {
    local_addr: SocketAddr,
    accept_loop: JoinHandle<()>,
}

impl CommandServer {
    /// Bind and start accepting clients.
    pub async fn start(bind: SocketAddr, state: SharedState) -> Result<Self> {
        let listener = TcpListener::bind(bind)
            .await
            .with_context(|| format!("binding command port {bind}"))?;
        let local_addr = listener.local_addr()?;
        tracing::info!(addr = %local_addr, "command server listening");

        let accept_loop = tokio::spawn(accept_loop(listener, state));
        Ok(CommandServer { local_addr, accept_loop })
    }

    /// The bound address.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Close the listening socket. Open connections are left to finish on
    /// their own.
    pub fn stop(self) {
        self.accept_loop.abort();
        tracing::info!(addr = %self.local_addr, "command server stopped");
    }
}

async fn accept_loop(listener: TcpListener, state: SharedState) {
    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                tracing::info!(peer = %peer, "command client connected");
                tokio::spawn(handle_client(stream, peer, state.clone()));
            }
            Err(err) => {
                tracing::warn!(error = %err, "accept failed");
            }
        }
    }
}

async fn handle_client(stream: TcpStream, peer: SocketAddr, state: SharedState) {
    if let Err(err) = serve_client(stream, peer, state).await {
        tracing::debug!(peer = %peer, error = %err, "command client error");
    }
    tracing::info!(peer = %peer, "command client disconnected");
}

async fn serve_client(stream: TcpStream, peer: SocketAddr, state: SharedState) -> std::io::Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut injector = FaultInjector::new();
    let mut buf = Vec::new();

    loop {
        buf.clear();
        let mut line_reader = (&mut reader).take(MAX_LINE_BYTES as u64);
        let read = match tokio::time::timeout(READ_TIMEOUT, line_reader.read_until(b'\n', &mut buf)).await {
            Ok(read) => read?,
            Err(_) => {
                tracing::info!(peer = %peer, "command client idle, closing");
                return Ok(());
            }
        };
        if read == 0 {
            return Ok(());
        }
        if read == MAX_LINE_BYTES && !buf.ends_with(b"\n") {
            tracing::warn!(peer = %peer, limit = MAX_LINE_BYTES, "command line too long, closing");
            writer.write_all(LINE_TOO_LONG_REPLY).await?;
            writer.flush().await?;
            return Ok(());
        }

        let line = String::from_utf8_lossy(&buf);
        let Some(command) = Command::parse(&line) else {
            continue;
        };
        tracing::debug!(peer = %peer, command = %line.trim(), "command received");

        let (reply, network) = {
            let mut state = state.lock().await;
            let reply = dispatch::execute(&mut state, &command);
            (reply, state.network().clone())
        };

        if injector.deliver(&network, &reply, &mut writer).await? == Outcome::Close {
            return Ok(());
        }
    }
}

#[cfg(test)]
mod tests {
    use flashforge::mode::PrinterMode;
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::state::tests::state;

    async fn read_reply(stream: &mut TcpStream) -> String {
        let mut reply = Vec::new();
        let mut chunk = [0u8; 1024];
        while !reply.ends_with(b"ok\n") {
            let n = stream.read(&mut chunk).await.unwrap();
            assert!(n > 0, "connection closed mid-reply");
            reply.extend_from_slice(&chunk[..n]);
        }
        String::from_utf8(reply).unwrap()
    }

    #[tokio::test]
    async fn test_session_shares_state() {
        let shared = SharedState::new(state(PrinterMode::FiveM));
        let server = CommandServer::start("127.0.0.1:0".parse().unwrap(), shared.clone())
            .await
            .unwrap();

        let mut first = TcpStream::connect(server.local_addr()).await.unwrap();
        let mut second = TcpStream::connect(server.local_addr()).await.unwrap();

        first.write_all(b"~M601 S1\r\n").await.unwrap();
        assert_eq!(
            read_reply(&mut first).await,
            "CMD M601 Received.\nControl Success v2.1.\nok\n"
        );

        first.write_all(b"~M140 S60\n").await.unwrap();
        read_reply(&mut first).await;

        second.write_all(b"~M105\n").await.unwrap();
        assert!(read_reply(&mut second).await.contains("/60.0\n"));
        assert_eq!(shared.lock().await.thermal().bed.target, 60.0);

        server.stop();
    }

    #[tokio::test]
    async fn test_oversized_line_closes_connection() {
        let shared = SharedState::new(state(PrinterMode::FiveM));
        let server = CommandServer::start("127.0.0.1:0".parse().unwrap(), shared).await.unwrap();

        let mut client = TcpStream::connect(server.local_addr()).await.unwrap();
        let mut line = b"~".to_vec();
        line.resize(1 + 4 * MAX_LINE_BYTES, b'A');
        // The server may hang up before it has all of it.
        let _ = client.write_all(&line).await;

        let mut received = Vec::new();
        let mut chunk = [0u8; 1024];
        loop {
            match tokio::time::timeout(Duration::from_secs(5), client.read(&mut chunk)).await {
                Ok(Ok(0)) | Ok(Err(_)) => break,
                Ok(Ok(n)) => received.extend_from_slice(&chunk[..n]),
                Err(_) => panic!("connection left open after an oversized line"),
            }
        }
        assert!(received.is_empty() || received == LINE_TOO_LONG_REPLY, "{received:?}");

        // Other clients are unaffected.
        let mut next = TcpStream::connect(server.local_addr()).await.unwrap();
        next.write_all(b"~M602\n").await.unwrap();
        assert_eq!(read_reply(&mut next).await, "CMD M602 Received.\nControl Release.\nok\n");

        server.stop();
    }

    #[tokio::test]
    async fn test_line_at_the_limit_is_served() {
        let shared = SharedState::new(state(PrinterMode::FiveM));
        let server = CommandServer::start("127.0.0.1:0".parse().unwrap(), shared).await.unwrap();

        let mut client = TcpStream::connect(server.local_addr()).await.unwrap();
        let mut line = b"~M602 ".to_vec();
        line.resize(MAX_LINE_BYTES - 1, b' ');
        line.push(b'\n');
        client.write_all(&line).await.unwrap();
        assert_eq!(read_reply(&mut client).await, "CMD M602 Received.\nControl Release.\nok\n");

        server.stop();
    }

    #[tokio::test]
    async fn test_blank_lines_are_skipped() {
        let shared = SharedState::new(state(PrinterMode::FiveM));
        let server = CommandServer::start("127.0.0.1:0".parse().unwrap(), shared).await.unwrap();

        let mut client = TcpStream::connect(server.local_addr()).await.unwrap();
        client.write_all(b"\n\n~G28\n").await.unwrap();
        assert_eq!(read_reply(&mut client).await, "CMD G28 Received.\nok\n");

        server.stop();
    }
}
