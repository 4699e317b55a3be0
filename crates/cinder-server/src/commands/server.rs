//! Server introspection: the COMMAND container.

use bytes::Bytes;
use cinder_protocol::Resp;

use crate::client::Client;
use crate::command::{CmdFlags, COMMAND_TABLE};
use crate::server::ServerContext;

/// COMMAND — one info entry per table entry.
pub fn cmd_command(_ctx: &mut ServerContext, client: &mut Client) {
    let entries: Vec<Resp> = COMMAND_TABLE.iter().map(command_info).collect();
    client.add_reply_value(&Resp::Array(entries));
}

/// COMMAND COUNT
pub fn cmd_command_count(_ctx: &mut ServerContext, client: &mut Client) {
    client.add_reply_integer(COMMAND_TABLE.len() as i64);
}

/// COMMAND DOCS [name ...] — minimal form: an empty document set, in
/// the shape the client's protocol version expects.
pub fn cmd_command_docs(_ctx: &mut ServerContext, client: &mut Client) {
    let reply = if client.resp >= 3 {
        Resp::Map(Vec::new())
    } else {
        Resp::Array(Vec::new())
    };
    client.add_reply_value(&reply);
}

fn command_info(spec: &crate::command::CommandSpec) -> Resp {
    let flags = spec
        .flag_names()
        .into_iter()
        .map(|name| Resp::Simple(name.into()))
        .collect();

    // keyed commands report the conventional (1, 1, 1) key range
    let keyed = spec.flags.contains(CmdFlags::WRITE) || spec.flags.contains(CmdFlags::READONLY);
    let (first, last, step) = if keyed { (1, 1, 1) } else { (0, 0, 0) };

    Resp::Array(vec![
        Resp::Bulk(Bytes::copy_from_slice(spec.name.as_bytes())),
        Resp::Integer(spec.arity as i64),
        Resp::Array(flags),
        Resp::Integer(first),
        Resp::Integer(last),
        Resp::Integer(step),
    ])
}
