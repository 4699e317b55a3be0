//! Connection-level commands: HELLO, AUTH, SELECT, PING, ECHO, QUIT,
//! and the CLIENT container.

use bytes::Bytes;
use cinder_protocol::Resp;

use crate::client::{Client, ClientFlags};
use crate::server::ServerContext;
use crate::shared;

/// PING [message]
pub fn cmd_ping(_ctx: &mut ServerContext, client: &mut Client) {
    match client.argc() {
        1 => client.add_reply(shared::PONG),
        2 => {
            let msg = client.argv[1].clone();
            client.add_reply_bulk(&msg);
        }
        _ => client.add_reply_error("wrong number of arguments for 'ping' command"),
    }
}

/// ECHO message
pub fn cmd_echo(_ctx: &mut ServerContext, client: &mut Client) {
    let msg = client.argv[1].clone();
    client.add_reply_bulk(&msg);
}

/// QUIT — acknowledge, then close once the reply drains.
pub fn cmd_quit(_ctx: &mut ServerContext, client: &mut Client) {
    client.add_reply(shared::OK);
    client.flags.insert(ClientFlags::CLOSE_AFTER_REPLY);
}

/// SELECT index
pub fn cmd_select(ctx: &mut ServerContext, client: &mut Client) {
    let Some(index) = parse_i64(&client.argv[1]) else {
        client.add_reply_error("value is not an integer or out of range");
        return;
    };
    if index < 0 || index as usize >= ctx.dbs.len() {
        client.add_reply_error("DB index is out of range");
        return;
    }
    client.db_index = index as usize;
    client.add_reply(shared::OK);
}

/// AUTH [username] password
pub fn cmd_auth(ctx: &mut ServerContext, client: &mut Client) {
    if client.argc() > 3 {
        client.add_reply(shared::SYNTAX_ERR);
        return;
    }

    if !ctx.auth.has_password() {
        client.add_reply_error(
            "Client sent AUTH, but no password is set. \
             Did you mean AUTH <username> <password>?",
        );
        return;
    }

    let password = if client.argc() == 3 {
        // only the default user exists on a single node
        if !client.argv[1].eq_ignore_ascii_case(b"default") {
            client.add_reply(shared::WRONGPASS_ERR);
            return;
        }
        client.argv[2].clone()
    } else {
        client.argv[1].clone()
    };

    if ctx.auth.check_password(&password) {
        client.authenticated = true;
        client.add_reply(shared::OK);
    } else {
        client.add_reply(shared::WRONGPASS_ERR);
    }
}

/// HELLO [protover [AUTH username password] [SETNAME clientname]]
pub fn cmd_hello(ctx: &mut ServerContext, client: &mut Client) {
    let mut proto = client.resp;

    if client.argc() >= 2 {
        match parse_i64(&client.argv[1]) {
            Some(v @ (2 | 3)) => proto = v as u8,
            _ => {
                client.add_reply_error(
                    "-NOPROTO unsupported protocol version",
                );
                return;
            }
        }

        let mut j = 2;
        while j < client.argc() {
            let opt = client.argv[j].clone();
            if opt.eq_ignore_ascii_case(b"AUTH") && j + 2 < client.argc() {
                let user = client.argv[j + 1].clone();
                let pass = client.argv[j + 2].clone();
                if !user.eq_ignore_ascii_case(b"default") || !ctx.auth.check_password(&pass) {
                    client.add_reply(shared::WRONGPASS_ERR);
                    return;
                }
                client.authenticated = true;
                j += 3;
            } else if opt.eq_ignore_ascii_case(b"SETNAME") && j + 1 < client.argc() {
                client.name = Some(client.argv[j + 1].clone());
                j += 2;
            } else {
                client.add_reply(shared::SYNTAX_ERR);
                return;
            }
        }
    }

    if ctx.auth.authentication_required(client.authenticated) {
        client.add_reply_error(
            "-NOAUTH HELLO must be called with the client already authenticated, \
             otherwise the HELLO <proto> AUTH <user> <pass> option can be used to \
             authenticate the client and select the RESP protocol version at the same time",
        );
        return;
    }

    client.resp = proto;

    let fields: Vec<(Resp, Resp)> = vec![
        (
            Resp::Simple("server".into()),
            Resp::Bulk(Bytes::from_static(b"redis")),
        ),
        (
            Resp::Simple("version".into()),
            Resp::Bulk(Bytes::from_static(env!("CARGO_PKG_VERSION").as_bytes())),
        ),
        (
            Resp::Simple("proto".into()),
            Resp::Integer(client.resp as i64),
        ),
        (Resp::Simple("id".into()), Resp::Integer(client.id as i64)),
        (
            Resp::Simple("mode".into()),
            Resp::Bulk(Bytes::from_static(b"standalone")),
        ),
        (
            Resp::Simple("role".into()),
            Resp::Bulk(Bytes::from_static(b"master")),
        ),
        (Resp::Simple("modules".into()), Resp::Array(Vec::new())),
    ];

    // RESP2 clients must not see the map type byte
    let reply = if client.resp >= 3 {
        Resp::Map(fields)
    } else {
        let mut flat = Vec::with_capacity(fields.len() * 2);
        for (k, v) in fields {
            flat.push(k);
            flat.push(v);
        }
        Resp::Array(flat)
    };
    client.add_reply_value(&reply);
}

/// CLIENT — container; reached only when argv[1] matches no subcommand.
pub fn cmd_client(_ctx: &mut ServerContext, client: &mut Client) {
    let sub = String::from_utf8_lossy(&client.argv[1]).into_owned();
    client.add_reply_error(&format!(
        "Unknown subcommand or wrong number of arguments for '{sub}'. Try CLIENT HELP."
    ));
}

/// CLIENT ID
pub fn cmd_client_id(_ctx: &mut ServerContext, client: &mut Client) {
    client.add_reply_integer(client.id as i64);
}

/// CLIENT GETNAME
pub fn cmd_client_getname(_ctx: &mut ServerContext, client: &mut Client) {
    match client.name.clone() {
        Some(name) => client.add_reply_bulk(&name),
        None => client.add_reply(shared::EMPTY_BULK),
    }
}

/// CLIENT SETNAME name
pub fn cmd_client_setname(_ctx: &mut ServerContext, client: &mut Client) {
    let name = client.argv[2].clone();
    if name.iter().any(|&b| b < b'!' || b > b'~') {
        client.add_reply_error(
            "Client names cannot contain spaces, newlines or special characters.",
        );
        return;
    }
    client.name = Some(name);
    client.add_reply(shared::OK);
}

fn parse_i64(data: &[u8]) -> Option<i64> {
    std::str::from_utf8(data).ok()?.parse().ok()
}
