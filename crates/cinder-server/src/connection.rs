//! Buffered non-blocking connection.
//!
//! Thin wrapper over a non-blocking `TcpStream`: reads drain the socket
//! until it would block, writes report how far they got so the caller
//! can keep the remainder queued and re-arm write interest.

use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, RawFd};

use bytes::BytesMut;

/// Read chunk size per syscall.
const READ_CHUNK: usize = 16 * 1024;

pub struct Connection {
    stream: TcpStream,
    addr: SocketAddr,
}

impl Connection {
    pub fn new(stream: TcpStream, addr: SocketAddr) -> Self {
        Self { stream, addr }
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn raw_fd(&self) -> RawFd {
        self.stream.as_raw_fd()
    }

    /// Reads everything currently available into `buf`.
    ///
    /// Returns `(bytes_read, eof)`; `eof` is set when the peer closed
    /// its end. A would-block simply ends the loop.
    pub fn read_into(&mut self, buf: &mut BytesMut) -> io::Result<(usize, bool)> {
        let mut total = 0;
        let mut chunk = [0u8; READ_CHUNK];
        loop {
            match self.stream.read(&mut chunk) {
                Ok(0) => return Ok((total, true)),
                Ok(n) => {
                    buf.extend_from_slice(&chunk[..n]);
                    total += n;
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok((total, false)),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
    }

    /// Writes as much of `data` as the socket accepts right now.
    /// Returns the number of bytes written; 0 means the socket is full.
    pub fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        loop {
            match self.stream.write(data) {
                Ok(n) => return Ok(n),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(0),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
    }
}

impl AsFd for Connection {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.stream.as_fd()
    }
}
