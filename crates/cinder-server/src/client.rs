//! Per-connection client state machine.
//!
//! Each client owns its query buffer, the resumable multibulk/inline
//! decoding state, the parsed argument vector, and a queue of
//! serialized reply buffers. The parsing loop runs whenever new bytes
//! arrive and executes as many complete requests as the buffer holds,
//! so pipelined commands issued in one write all resolve in order.

use bytes::{BufMut, Bytes, BytesMut};
use cinder_core::{time, List, Object};
use cinder_protocol::{inline, Resp};

use crate::command;
use crate::connection::Connection;
use crate::server::ServerContext;
use crate::shared;

/// Largest accepted inline request.
pub const PROTO_INLINE_MAX_SIZE: usize = 64 * 1024;

/// Largest accepted multibulk element count.
const PROTO_MAX_MULTIBULK_LEN: i64 = 1024 * 1024;

/// Largest accepted bulk argument (512 MB).
const PROTO_MAX_BULK_LEN: i64 = 512 * 1024 * 1024;

/// Query buffer hard cap; a client exceeding it is disconnected.
const PROTO_MAX_QUERYBUF_LEN: usize = 64 * 1024 * 1024;

/// Client mode bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ClientFlags(u32);

impl ClientFlags {
    pub const NONE: ClientFlags = ClientFlags(0);
    /// Connection from a master (replication link).
    pub const MASTER: ClientFlags = ClientFlags(1 << 0);
    /// Inside MULTI/EXEC.
    pub const MULTI: ClientFlags = ClientFlags(1 << 1);
    /// Parked on a blocking operation.
    pub const BLOCKED: ClientFlags = ClientFlags(1 << 2);
    /// Close once the pending replies drain.
    pub const CLOSE_AFTER_REPLY: ClientFlags = ClientFlags(1 << 3);
    /// Close without writing anything further.
    pub const CLOSE_ASAP: ClientFlags = ClientFlags(1 << 4);
    /// A fully-parsed command is waiting for execution.
    pub const PENDING_COMMAND: ClientFlags = ClientFlags(1 << 5);
    /// Currently inside a command handler.
    pub const EXECUTING_COMMAND: ClientFlags = ClientFlags(1 << 6);
    /// CLIENT REPLY OFF.
    pub const REPLY_OFF: ClientFlags = ClientFlags(1 << 7);
    /// Suppress exactly this reply.
    pub const REPLY_SKIP: ClientFlags = ClientFlags(1 << 8);
    /// Suppress the next reply.
    pub const REPLY_SKIP_NEXT: ClientFlags = ClientFlags(1 << 9);
    /// Masters get replies only when forced.
    pub const MASTER_FORCE_REPLY: ClientFlags = ClientFlags(1 << 10);
    /// Subscribed to pub/sub channels.
    pub const PUBSUB: ClientFlags = ClientFlags(1 << 11);
    /// Issued ASKING.
    pub const ASKING: ClientFlags = ClientFlags(1 << 12);
    /// CLIENT CACHING yes/no window.
    pub const TRACKING_CACHING: ClientFlags = ClientFlags(1 << 13);
    /// Emitting a push message (overrides reply silencing).
    pub const PUSHING: ClientFlags = ClientFlags(1 << 14);

    pub fn contains(self, other: ClientFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn intersects(self, other: ClientFlags) -> bool {
        self.0 & other.0 != 0
    }

    pub fn insert(&mut self, other: ClientFlags) {
        self.0 |= other.0;
    }

    pub fn remove(&mut self, other: ClientFlags) {
        self.0 &= !other.0;
    }
}

impl std::ops::BitOr for ClientFlags {
    type Output = ClientFlags;
    fn bitor(self, rhs: ClientFlags) -> ClientFlags {
        ClientFlags(self.0 | rhs.0)
    }
}

/// Framing of the request currently being parsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RequestType {
    Unknown,
    Inline,
    MultiBulk,
}

/// Result of one parse attempt.
enum ParseStatus {
    /// A full request is in `argv`.
    Complete,
    /// More bytes are needed; state is saved for re-entry.
    Incomplete,
    /// Protocol error: the error reply is queued and the connection is
    /// flagged to close once it drains.
    Fatal,
}

pub struct Client {
    pub id: u64,
    pub conn: Connection,
    pub flags: ClientFlags,
    /// Currently SELECTed database.
    pub db_index: usize,
    /// Negotiated protocol version (2 until HELLO 3).
    pub resp: u8,
    pub query_buf: BytesMut,
    /// Consumer cursor into `query_buf`.
    pub query_pos: usize,
    /// For master links: prefix already applied to the dataset.
    pub repl_applied: usize,
    req_type: RequestType,
    /// Remaining multibulk elements; 0 when between requests.
    multibulk_len: i64,
    /// Declared length of the bulk being read; -1 when between bulks.
    bulk_len: i64,
    pub argv: Vec<Bytes>,
    /// Cluster slot of the current command; -1 when unused.
    pub slot: i64,
    pub authenticated: bool,
    pub name: Option<Bytes>,
    /// Serialized replies waiting to be written.
    pub replies: List<Bytes>,
    /// Bytes of the front reply already written to the socket.
    pub reply_offset: usize,
    /// Canonical name of the previously executed command.
    pub last_cmd_name: Option<&'static str>,
    pub last_interaction_ms: u64,
}

impl Client {
    pub fn new(id: u64, conn: Connection) -> Self {
        Self {
            id,
            conn,
            flags: ClientFlags::NONE,
            db_index: 0,
            resp: 2,
            query_buf: BytesMut::with_capacity(4096),
            query_pos: 0,
            repl_applied: 0,
            req_type: RequestType::Unknown,
            multibulk_len: 0,
            bulk_len: -1,
            argv: Vec::new(),
            slot: -1,
            authenticated: false,
            name: None,
            replies: List::new(),
            reply_offset: 0,
            last_cmd_name: None,
            last_interaction_ms: time::mstime(),
        }
    }

    pub fn argc(&self) -> usize {
        self.argv.len()
    }

    pub fn has_pending_replies(&self) -> bool {
        !self.replies.is_empty()
    }

    /// Gate called before queueing any reply bytes.
    fn prepare_to_write(&self) -> bool {
        if self.flags.contains(ClientFlags::CLOSE_ASAP) {
            return false;
        }
        if self
            .flags
            .intersects(ClientFlags::REPLY_OFF | ClientFlags::REPLY_SKIP)
            && !self.flags.contains(ClientFlags::PUSHING)
        {
            return false;
        }
        if self.flags.contains(ClientFlags::MASTER)
            && !self.flags.contains(ClientFlags::MASTER_FORCE_REPLY)
        {
            return false;
        }
        true
    }

    /// Queues raw preserialized reply bytes.
    pub fn add_reply(&mut self, proto: &[u8]) {
        if !self.prepare_to_write() {
            return;
        }
        self.replies.push_back(Bytes::copy_from_slice(proto));
    }

    /// Queues an owned serialized reply without copying.
    pub fn add_reply_bytes(&mut self, proto: Bytes) {
        if !self.prepare_to_write() {
            return;
        }
        self.replies.push_back(proto);
    }

    /// Serializes a protocol value into the reply queue.
    pub fn add_reply_value(&mut self, value: &Resp) {
        if !self.prepare_to_write() {
            return;
        }
        let mut buf = BytesMut::new();
        value.serialize(&mut buf);
        self.replies.push_back(buf.freeze());
    }

    /// Queues an error reply. CR/LF are mapped to spaces, and messages
    /// without their own error code get the generic `ERR` prefix.
    pub fn add_reply_error(&mut self, msg: &str) {
        if !self.prepare_to_write() {
            return;
        }
        let sanitized: String = msg
            .chars()
            .map(|c| if c == '\r' || c == '\n' { ' ' } else { c })
            .collect();

        let mut buf = BytesMut::with_capacity(sanitized.len() + 8);
        if !sanitized.starts_with('-') {
            buf.put_slice(b"-ERR ");
        } else {
            buf.put_u8(b'-');
            // the caller-provided '-' is consumed; keep the code
            buf.put_slice(&sanitized.as_bytes()[1..]);
            buf.put_slice(b"\r\n");
            self.replies.push_back(buf.freeze());
            return;
        }
        buf.put_slice(sanitized.as_bytes());
        buf.put_slice(b"\r\n");
        self.replies.push_back(buf.freeze());
    }

    /// Queues a bulk string reply.
    pub fn add_reply_bulk(&mut self, data: &[u8]) {
        if !self.prepare_to_write() {
            return;
        }
        let mut buf = BytesMut::with_capacity(data.len() + 16);
        buf.put_u8(b'$');
        let mut itoa_buf = itoa::Buffer::new();
        buf.put_slice(itoa_buf.format(data.len()).as_bytes());
        buf.put_slice(b"\r\n");
        buf.put_slice(data);
        buf.put_slice(b"\r\n");
        self.replies.push_back(buf.freeze());
    }

    /// Queues a stored object as a bulk reply, formatting integer
    /// encodings to ASCII on the way out.
    pub fn add_reply_bulk_obj(&mut self, obj: &Object) {
        match obj.string_bytes() {
            Some(data) => self.add_reply_bulk(&data),
            None => self.add_reply(shared::WRONGTYPE_ERR),
        }
    }

    pub fn add_reply_integer(&mut self, n: i64) {
        if !self.prepare_to_write() {
            return;
        }
        let mut buf = BytesMut::with_capacity(24);
        buf.put_u8(b':');
        let mut itoa_buf = itoa::Buffer::new();
        buf.put_slice(itoa_buf.format(n).as_bytes());
        buf.put_slice(b"\r\n");
        self.replies.push_back(buf.freeze());
    }

    /// Queues the protocol-appropriate null reply.
    pub fn add_reply_null(&mut self) {
        self.add_reply(shared::null(self.resp));
    }

    /// Prepares for the next request: parse state is cleared and the
    /// sticky flag transitions run. The previous command name governs
    /// which one-shot flags survive.
    pub fn reset(&mut self) {
        self.req_type = RequestType::Unknown;
        self.multibulk_len = 0;
        self.bulk_len = -1;
        self.slot = -1;
        self.argv.clear();
        self.flags.remove(ClientFlags::EXECUTING_COMMAND);

        let prev = self.last_cmd_name.unwrap_or("");
        if !self.flags.contains(ClientFlags::MULTI) && prev != "asking" {
            self.flags.remove(ClientFlags::ASKING);
        }
        if !self.flags.contains(ClientFlags::MULTI) && prev != "client" {
            self.flags.remove(ClientFlags::TRACKING_CACHING);
        }

        self.flags.remove(ClientFlags::REPLY_SKIP);
        if self.flags.contains(ClientFlags::REPLY_SKIP_NEXT) {
            self.flags.insert(ClientFlags::REPLY_SKIP);
            self.flags.remove(ClientFlags::REPLY_SKIP_NEXT);
        }
    }

    /// Queues a protocol error and flags the connection to close once
    /// the reply drains.
    fn protocol_error(&mut self, msg: &str) {
        tracing::debug!(id = self.id, msg, "protocol error, closing client");
        self.add_reply_error(msg);
        self.flags.insert(ClientFlags::CLOSE_AFTER_REPLY);
    }

    /// Parses one multibulk request, resuming from saved state across
    /// partial reads.
    fn process_multibulk_buffer(&mut self) -> ParseStatus {
        if self.multibulk_len == 0 {
            let buf = &self.query_buf[self.query_pos..];
            let Some(nl) = memchr::memchr(b'\n', buf) else {
                if buf.len() > PROTO_INLINE_MAX_SIZE {
                    self.protocol_error("Protocol error: too big mbulk count string");
                    return ParseStatus::Fatal;
                }
                return ParseStatus::Incomplete;
            };

            // line is "*N" plus an optional \r before the \n
            let line = trim_cr(&buf[1..nl]);
            let count = match parse_i64(line) {
                Some(n) if n <= PROTO_MAX_MULTIBULK_LEN => n,
                _ => {
                    self.protocol_error("Protocol error: invalid multibulk length");
                    return ParseStatus::Fatal;
                }
            };

            self.query_pos += nl + 1;
            if count <= 0 {
                // empty request; the caller resets and keeps going
                return ParseStatus::Complete;
            }
            self.multibulk_len = count;
            self.argv.clear();
            self.argv.reserve(count as usize);
        }

        while self.multibulk_len > 0 {
            if self.bulk_len == -1 {
                let buf = &self.query_buf[self.query_pos..];
                let Some(nl) = memchr::memchr(b'\n', buf) else {
                    if buf.len() > PROTO_INLINE_MAX_SIZE {
                        self.protocol_error("Protocol error: too big bulk count string");
                        return ParseStatus::Fatal;
                    }
                    return ParseStatus::Incomplete;
                };

                if buf[0] != b'$' {
                    let msg =
                        format!("Protocol error: expected '$', got '{}'", buf[0] as char);
                    self.protocol_error(&msg);
                    return ParseStatus::Fatal;
                }

                let line = trim_cr(&buf[1..nl]);
                let len = match parse_i64(line) {
                    Some(n) if (0..=PROTO_MAX_BULK_LEN).contains(&n) => n,
                    _ => {
                        self.protocol_error("Protocol error: invalid bulk length");
                        return ParseStatus::Fatal;
                    }
                };

                self.query_pos += nl + 1;
                self.bulk_len = len;
            }

            // wait for the payload plus its CRLF
            let available = self.query_buf.len() - self.query_pos;
            if (available as i64) < self.bulk_len + 2 {
                return ParseStatus::Incomplete;
            }

            let len = self.bulk_len as usize;
            let start = self.query_pos;
            self.argv
                .push(Bytes::copy_from_slice(&self.query_buf[start..start + len]));
            self.query_pos += len + 2;
            self.bulk_len = -1;
            self.multibulk_len -= 1;
        }

        ParseStatus::Complete
    }

    /// Parses one inline request line.
    fn process_inline_buffer(&mut self) -> ParseStatus {
        let buf = &self.query_buf[self.query_pos..];
        let Some(nl) = memchr::memchr(b'\n', buf) else {
            if buf.len() >= PROTO_INLINE_MAX_SIZE {
                self.protocol_error("Protocol error: too big inline request");
                return ParseStatus::Fatal;
            }
            return ParseStatus::Incomplete;
        };

        let line_end = if nl > 0 && buf[nl - 1] == b'\r' {
            nl - 1
        } else {
            nl
        };

        match inline::split_args(&buf[..line_end]) {
            Ok(args) => {
                self.query_pos += nl + 1;
                self.argv = args;
                ParseStatus::Complete
            }
            Err(_) => {
                self.protocol_error("Protocol error: unbalanced quotes in request");
                ParseStatus::Fatal
            }
        }
    }
}

/// Runs the parsing loop over whatever is buffered, executing every
/// complete request. Called when new bytes arrive.
pub fn process_input_buffer(ctx: &mut ServerContext, client: &mut Client) {
    if client.query_buf.len() > PROTO_MAX_QUERYBUF_LEN {
        client.protocol_error("Protocol error: query buffer too large");
        return;
    }

    while client.query_pos < client.query_buf.len() {
        if client
            .flags
            .intersects(ClientFlags::BLOCKED | ClientFlags::PENDING_COMMAND)
        {
            break;
        }
        // don't grow the reply stream of a client on its way out
        if client
            .flags
            .intersects(ClientFlags::CLOSE_AFTER_REPLY | ClientFlags::CLOSE_ASAP)
        {
            break;
        }

        if client.req_type == RequestType::Unknown {
            client.req_type = if client.query_buf[client.query_pos] == b'*' {
                RequestType::MultiBulk
            } else {
                RequestType::Inline
            };
        }

        let status = match client.req_type {
            RequestType::MultiBulk => client.process_multibulk_buffer(),
            RequestType::Inline => client.process_inline_buffer(),
            RequestType::Unknown => unreachable!("request type resolved above"),
        };

        match status {
            ParseStatus::Incomplete => break,
            ParseStatus::Fatal => break,
            ParseStatus::Complete => {
                if client.argv.is_empty() {
                    client.reset();
                } else {
                    command::execute_command(ctx, client);
                    client.reset();
                    if client.flags.contains(ClientFlags::CLOSE_ASAP) {
                        break;
                    }
                }
            }
        }
    }

    // compact the consumed prefix; master links must preserve the
    // not-yet-applied replication tail addressed by repl_applied
    if client.flags.contains(ClientFlags::MASTER) {
        if client.repl_applied > 0 {
            let _ = client.query_buf.split_to(client.repl_applied);
            client.query_pos -= client.repl_applied;
            client.repl_applied = 0;
        }
    } else if client.query_pos > 0 {
        let _ = client.query_buf.split_to(client.query_pos);
        client.query_pos = 0;
    }
}

/// Writes pending replies to the socket until the queue drains or the
/// socket stops accepting bytes. A short write leaves the remainder at
/// the front of the queue with `reply_offset` recording progress.
pub fn flush_client(client: &mut Client) -> std::io::Result<()> {
    loop {
        let front_len;
        let written;
        {
            let Some(front) = client.replies.front() else {
                break;
            };
            front_len = front.len();
            if client.reply_offset >= front_len {
                client.replies.pop_front();
                client.reply_offset = 0;
                continue;
            }
            written = client.conn.write(&front[client.reply_offset..])?;
        }
        if written == 0 {
            // socket buffer full; the reactor re-arms write interest
            break;
        }
        client.reply_offset += written;
        if client.reply_offset == front_len {
            client.replies.pop_front();
            client.reply_offset = 0;
        }
    }
    Ok(())
}

fn trim_cr(line: &[u8]) -> &[u8] {
    match line.last() {
        Some(b'\r') => &line[..line.len() - 1],
        _ => line,
    }
}

fn parse_i64(line: &[u8]) -> Option<i64> {
    std::str::from_utf8(line).ok()?.parse().ok()
}
