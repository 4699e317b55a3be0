//! Test helpers for running an in-process server and speaking raw RESP.

use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::thread::JoinHandle;
use std::time::Duration;

use bytes::BytesMut;
use cinder_protocol::{encode_command, Resp, RespReader};
use cinder_server::{Server, ServerConfig, ShutdownHandle};

/// A server running on its own reactor thread, stopped on drop.
pub struct TestServer {
    addr: SocketAddr,
    handle: ShutdownHandle,
    thread: Option<JoinHandle<()>>,
}

impl TestServer {
    /// Starts a server with default options on an ephemeral port.
    pub fn start() -> Self {
        Self::start_with(ServerConfig::default())
    }

    /// Starts a server with custom options; the port is always
    /// ephemeral.
    pub fn start_with(config: ServerConfig) -> Self {
        let config = ServerConfig { port: 0, ..config };
        let server = Server::new(config).expect("failed to bind test server");
        let addr = server.local_addr();
        let handle = server.shutdown_handle();

        let thread = std::thread::spawn(move || {
            if let Err(e) = server.run() {
                eprintln!("test server terminated with error: {e}");
            }
        });

        Self {
            addr,
            handle,
            thread: Some(thread),
        }
    }

    pub fn connect(&self) -> TestClient {
        TestClient::connect(self.addr)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.stop();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

/// A blocking RESP client for tests.
pub struct TestClient {
    stream: TcpStream,
    reader: RespReader,
}

impl TestClient {
    fn connect(addr: SocketAddr) -> Self {
        let stream = TcpStream::connect(addr)
            .unwrap_or_else(|e| panic!("failed to connect to {addr}: {e}"));
        stream
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();
        Self {
            stream,
            reader: RespReader::new(),
        }
    }

    /// Sends a command and returns the parsed reply.
    pub fn cmd(&mut self, args: &[&str]) -> Resp {
        let (name, rest) = args.split_first().expect("command name required");
        let arg_bytes: Vec<&[u8]> = rest.iter().map(|a| a.as_bytes()).collect();

        let mut buf = BytesMut::new();
        encode_command(name, &arg_bytes, &mut buf);
        self.stream.write_all(&buf).unwrap();

        self.read_reply()
    }

    /// Reads the next reply, pulling bytes from the socket as needed.
    pub fn read_reply(&mut self) -> Resp {
        loop {
            match self.reader.next_reply() {
                Ok(Some(reply)) => return reply,
                Ok(None) => {}
                Err(e) => panic!("protocol error from server: {e}"),
            }
            let mut chunk = [0u8; 4096];
            let n = self.stream.read(&mut chunk).expect("socket read");
            if n == 0 {
                panic!("server closed the connection while a reply was expected");
            }
            self.reader.feed(&chunk[..n]);
        }
    }

    /// Writes raw bytes without any framing.
    pub fn send_raw(&mut self, bytes: &[u8]) {
        self.stream.write_all(bytes).unwrap();
    }

    /// Writes raw bytes, tolerating a mid-write disconnect (used when
    /// the server is expected to slam the door).
    pub fn send_raw_lossy(&mut self, bytes: &[u8]) {
        let _ = self.stream.write_all(bytes);
    }

    /// Reads exactly `n` raw bytes.
    pub fn read_raw(&mut self, n: usize) -> Vec<u8> {
        let mut out = vec![0u8; n];
        self.stream.read_exact(&mut out).expect("raw read");
        out
    }

    /// Reads everything until the server closes the connection. A reset
    /// counts as closed — the server may discard unread input when it
    /// force-closes a misbehaving client.
    pub fn read_until_close(&mut self) -> Vec<u8> {
        let mut out = Vec::new();
        let mut chunk = [0u8; 4096];
        loop {
            match self.stream.read(&mut chunk) {
                Ok(0) => return out,
                Ok(n) => out.extend_from_slice(&chunk[..n]),
                Err(e) if e.kind() == std::io::ErrorKind::ConnectionReset => return out,
                Err(e) => panic!("read failed while draining: {e}"),
            }
        }
    }

    /// Sends a command and expects `+OK`.
    pub fn ok(&mut self, args: &[&str]) {
        match self.cmd(args) {
            Resp::Simple(s) if s == "OK" => {}
            other => panic!("expected OK for {args:?}, got {other:?}"),
        }
    }

    /// Sends a command and returns the error message.
    pub fn err(&mut self, args: &[&str]) -> String {
        match self.cmd(args) {
            Resp::Error(msg) => msg,
            other => panic!("expected error for {args:?}, got {other:?}"),
        }
    }

    /// Sends a command and extracts a bulk string (None for null).
    pub fn get_bulk(&mut self, args: &[&str]) -> Option<String> {
        match self.cmd(args) {
            Resp::Bulk(data) => Some(String::from_utf8_lossy(&data).into_owned()),
            Resp::Null => None,
            other => panic!("expected bulk or null for {args:?}, got {other:?}"),
        }
    }

    /// Sends a command and extracts an integer.
    pub fn get_int(&mut self, args: &[&str]) -> i64 {
        match self.cmd(args) {
            Resp::Integer(n) => n,
            other => panic!("expected integer for {args:?}, got {other:?}"),
        }
    }
}
