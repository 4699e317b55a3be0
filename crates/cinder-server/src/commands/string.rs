//! String commands: SET with its extended argument grammar, and GET.

use bytes::Bytes;
use cinder_core::{time, Db, Object, ObjectKind, SetFlags};

use crate::client::Client;
use crate::server::ServerContext;
use crate::shared;

// SET/GET option bits
const OPT_NX: u16 = 1 << 0;
const OPT_XX: u16 = 1 << 1;
const OPT_EX: u16 = 1 << 2;
const OPT_PX: u16 = 1 << 3;
const OPT_KEEPTTL: u16 = 1 << 4;
const OPT_GET: u16 = 1 << 5;
const OPT_EXAT: u16 = 1 << 6;
const OPT_PXAT: u16 = 1 << 7;
const OPT_PERSIST: u16 = 1 << 8;

/// Unit of a parsed expire argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ExpireUnit {
    Seconds,
    Milliseconds,
}

/// Which command the extended-argument parser is serving.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StrCommand {
    Set,
    Get,
}

/// SET key value [NX | XX] [GET] [EX s | PX ms | EXAT ts | PXAT ts | KEEPTTL]
pub fn cmd_set(ctx: &mut ServerContext, client: &mut Client) {
    let Some((flags, expire_arg, unit)) = parse_extended_string_arguments(client, StrCommand::Set)
    else {
        return;
    };

    let mut deadline_ms = None;
    if let Some(arg) = expire_arg {
        let Some(when) = expire_deadline_ms(client, &arg, flags, unit, "set") else {
            return;
        };
        deadline_ms = Some(when);
    }

    let key = client.argv[1].clone();
    let value = client.argv[2].clone();
    let clock = ctx.lru.value();
    let db = &mut ctx.dbs[client.db_index];

    // GET runs first so the old value is captured before the write;
    // a wrong-type key aborts the whole command
    if flags & OPT_GET != 0 && !reply_with_current(db, client, &key, clock) {
        return;
    }

    let exists = db.lookup_write(&key, clock).is_some();
    if (flags & OPT_XX != 0 && !exists) || (flags & OPT_NX != 0 && exists) {
        if flags & OPT_GET == 0 {
            client.add_reply_null();
        }
        return;
    }

    // when an expire accompanies the write the TTL is overwritten right
    // after set_key rather than cleared and re-created
    let mut set_flags = SetFlags::NONE;
    if flags & OPT_KEEPTTL != 0 || deadline_ms.is_none() {
        set_flags = set_flags | SetFlags::KEEP_TTL;
    }
    set_flags = set_flags
        | if exists {
            SetFlags::ALREADY_EXISTS
        } else {
            SetFlags::DOES_NOT_EXIST
        };

    db.set_key(&key, Object::string(value, clock), set_flags, clock);
    if let Some(when) = deadline_ms {
        db.set_expire(&key, when);
    }

    if flags & OPT_GET == 0 {
        client.add_reply(shared::OK);
    }
}

/// GET key
pub fn cmd_get(ctx: &mut ServerContext, client: &mut Client) {
    let key = client.argv[1].clone();
    let clock = ctx.lru.value();
    let db = &mut ctx.dbs[client.db_index];
    reply_with_current(db, client, &key, clock);
}

/// GETEX key [EX s | PX ms | EXAT ts | PXAT ts | PERSIST]
///
/// Like GET, but the option group mutates the key's TTL after the value
/// is read.
pub fn cmd_getex(ctx: &mut ServerContext, client: &mut Client) {
    let Some((flags, expire_arg, unit)) = parse_extended_string_arguments(client, StrCommand::Get)
    else {
        return;
    };

    let mut deadline_ms = None;
    if let Some(arg) = expire_arg {
        let Some(when) = expire_deadline_ms(client, &arg, flags, unit, "getex") else {
            return;
        };
        deadline_ms = Some(when);
    }

    let key = client.argv[1].clone();
    let clock = ctx.lru.value();
    let db = &mut ctx.dbs[client.db_index];

    match db.lookup_read(&key, clock) {
        None => {
            client.add_reply_null();
            return;
        }
        Some(obj) if obj.kind() != ObjectKind::String => {
            client.add_reply(shared::WRONGTYPE_ERR);
            return;
        }
        Some(obj) => {
            let data = obj.string_bytes().expect("string object has bytes");
            client.add_reply_bulk(&data);
        }
    }

    if flags & OPT_PERSIST != 0 {
        db.remove_expire(&key);
    } else if let Some(when) = deadline_ms {
        db.set_expire(&key, when);
    }
}

/// Replies with the key's current string value (or null). Returns
/// `false` after a wrong-type error.
fn reply_with_current(db: &mut Db, client: &mut Client, key: &[u8], clock: u32) -> bool {
    match db.lookup_read(key, clock) {
        None => {
            client.add_reply_null();
            true
        }
        Some(obj) if obj.kind() != ObjectKind::String => {
            client.add_reply(shared::WRONGTYPE_ERR);
            false
        }
        Some(obj) => {
            client.add_reply_bulk_obj(obj);
            true
        }
    }
}

/// Parses the extended options shared by SET and GET variants, starting
/// at argv\[3\] for SET and argv\[2\] for GET. Mutually-exclusive
/// combinations are a syntax error.
fn parse_extended_string_arguments(
    client: &mut Client,
    command: StrCommand,
) -> Option<(u16, Option<Bytes>, ExpireUnit)> {
    let mut flags: u16 = 0;
    let mut unit = ExpireUnit::Seconds;
    let mut expire: Option<Bytes> = None;

    let mut j = match command {
        StrCommand::Set => 3,
        StrCommand::Get => 2,
    };

    while j < client.argc() {
        let opt = client.argv[j].clone();
        let next = client.argv.get(j + 1).cloned();

        if opt.eq_ignore_ascii_case(b"NX") && flags & OPT_XX == 0 && command == StrCommand::Set {
            flags |= OPT_NX;
        } else if opt.eq_ignore_ascii_case(b"XX")
            && flags & OPT_NX == 0
            && command == StrCommand::Set
        {
            flags |= OPT_XX;
        } else if opt.eq_ignore_ascii_case(b"GET") && command == StrCommand::Set {
            flags |= OPT_GET;
        } else if opt.eq_ignore_ascii_case(b"KEEPTTL")
            && flags & (OPT_PERSIST | OPT_EX | OPT_EXAT | OPT_PX | OPT_PXAT) == 0
            && command == StrCommand::Set
        {
            flags |= OPT_KEEPTTL;
        } else if opt.eq_ignore_ascii_case(b"PERSIST")
            && flags & (OPT_EX | OPT_EXAT | OPT_PX | OPT_PXAT | OPT_KEEPTTL) == 0
            && command == StrCommand::Get
        {
            flags |= OPT_PERSIST;
        } else if opt.eq_ignore_ascii_case(b"EX")
            && flags & (OPT_KEEPTTL | OPT_PERSIST | OPT_EXAT | OPT_PX | OPT_PXAT) == 0
            && next.is_some()
        {
            flags |= OPT_EX;
            expire = next;
            j += 1;
        } else if opt.eq_ignore_ascii_case(b"PX")
            && flags & (OPT_KEEPTTL | OPT_PERSIST | OPT_EX | OPT_EXAT | OPT_PXAT) == 0
            && next.is_some()
        {
            flags |= OPT_PX;
            unit = ExpireUnit::Milliseconds;
            expire = next;
            j += 1;
        } else if opt.eq_ignore_ascii_case(b"EXAT")
            && flags & (OPT_KEEPTTL | OPT_PERSIST | OPT_EX | OPT_PX | OPT_PXAT) == 0
            && next.is_some()
        {
            flags |= OPT_EXAT;
            expire = next;
            j += 1;
        } else if opt.eq_ignore_ascii_case(b"PXAT")
            && flags & (OPT_KEEPTTL | OPT_PERSIST | OPT_EX | OPT_EXAT | OPT_PX) == 0
            && next.is_some()
        {
            flags |= OPT_PXAT;
            unit = ExpireUnit::Milliseconds;
            expire = next;
            j += 1;
        } else {
            client.add_reply(shared::SYNTAX_ERR);
            return None;
        }
        j += 1;
    }

    Some((flags, expire, unit))
}

/// Converts a raw expire argument into an absolute unix-ms deadline,
/// enforcing the per-unit bounds. Replies and returns `None` on error.
fn expire_deadline_ms(
    client: &mut Client,
    arg: &[u8],
    flags: u16,
    unit: ExpireUnit,
    cmd: &str,
) -> Option<u64> {
    let Some(value) = parse_i64(arg) else {
        client.add_reply_error("value is not an integer or out of range");
        return None;
    };

    if value <= 0 {
        client.add_reply_error(&format!("invalid expire time in '{cmd}' command"));
        return None;
    }

    // seconds above this overflow once scaled to milliseconds
    let in_range = match unit {
        ExpireUnit::Seconds => value <= 9_223_372_036,
        ExpireUnit::Milliseconds => value <= 9_223_372_036_854_775,
    };
    if !in_range {
        client.add_reply_error(&format!("invalid expire time in '{cmd}' command"));
        return None;
    }

    let ms = match unit {
        ExpireUnit::Seconds => value * 1000,
        ExpireUnit::Milliseconds => value,
    } as u64;

    let absolute = flags & (OPT_EXAT | OPT_PXAT) != 0;
    Some(if absolute {
        ms
    } else {
        time::mstime().saturating_add(ms)
    })
}

fn parse_i64(data: &[u8]) -> Option<i64> {
    std::str::from_utf8(data).ok()?.parse().ok()
}
