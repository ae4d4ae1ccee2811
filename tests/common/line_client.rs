//! Line protocol client for integration tests

use std::net::SocketAddr;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;

use super::test_server::TIMEOUT;

pub struct LineClient {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl LineClient {
    pub async fn connect(addr: SocketAddr) -> Self {
        let stream = TcpStream::connect(addr)
            .await
            .expect("Failed to connect to test server");
        let (reader, writer) = stream.into_split();
        Self {
            reader: BufReader::new(reader),
            writer,
        }
    }

    pub async fn send(&mut self, line: &str) {
        self.writer
            .write_all(format!("{}\n", line).as_bytes())
            .await
            .expect("Failed to send line");
    }

    /// Next line from the server, or `None` once it has closed the connection
    pub async fn recv(&mut self) -> Option<String> {
        let mut line = String::new();
        let read = tokio::time::timeout(TIMEOUT, self.reader.read_line(&mut line))
            .await
            .expect("Timed out waiting for a line");
        match read {
            Ok(0) | Err(_) => None,
            Ok(_) => Some(line.trim_end_matches(['\r', '\n']).to_string()),
        }
    }

    pub async fn expect_line(&mut self) -> String {
        self.recv().await.expect("Connection closed early")
    }

    /// Every line up to and including the next `ACK`
    pub async fn until_ack(&mut self) -> Vec<String> {
        let mut lines = Vec::new();
        loop {
            let line = self.expect_line().await;
            let done = line.starts_with("ACK ");
            lines.push(line);
            if done {
                return lines;
            }
        }
    }

    /// Send a request and collect everything up to its `ACK`
    pub async fn request(&mut self, line: &str) -> Vec<String> {
        self.send(line).await;
        self.until_ack().await
    }

    /// Read until the server closes the connection, returning what arrived
    pub async fn until_closed(&mut self) -> Vec<String> {
        let mut lines = Vec::new();
        while let Some(line) = self.recv().await {
            lines.push(line);
        }
        lines
    }
}
