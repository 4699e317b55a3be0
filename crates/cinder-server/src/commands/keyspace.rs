//! Generic keyspace commands: DEL, EXISTS, EXPIRE, TTL, DBSIZE, FLUSHDB.

use cinder_core::{time, LookupFlags};

use crate::client::Client;
use crate::server::ServerContext;
use crate::shared;

/// DEL key [key ...]
pub fn cmd_del(ctx: &mut ServerContext, client: &mut Client) {
    let clock = ctx.lru.value();
    let db = &mut ctx.dbs[client.db_index];

    let mut removed = 0i64;
    for i in 1..client.argc() {
        let key = &client.argv[i];
        // reap a lazily-expired key first so it doesn't count
        db.lookup(
            key,
            LookupFlags::NO_TOUCH | LookupFlags::NO_STATS,
            clock,
        );
        if db.delete(key) {
            removed += 1;
        }
    }
    client.add_reply_integer(removed);
}

/// EXISTS key [key ...] — counts repeats.
pub fn cmd_exists(ctx: &mut ServerContext, client: &mut Client) {
    let clock = ctx.lru.value();
    let db = &mut ctx.dbs[client.db_index];

    let mut count = 0i64;
    for i in 1..client.argc() {
        if db
            .lookup(&client.argv[i], LookupFlags::NO_TOUCH, clock)
            .is_some()
        {
            count += 1;
        }
    }
    client.add_reply_integer(count);
}

/// EXPIRE key seconds
pub fn cmd_expire(ctx: &mut ServerContext, client: &mut Client) {
    let clock = ctx.lru.value();

    let Some(seconds) = parse_i64(&client.argv[2]) else {
        client.add_reply_error("value is not an integer or out of range");
        return;
    };

    let now = time::mstime();
    // scaled to ms this must stay inside u64/i64 range
    if seconds > 9_223_372_036 || seconds.checked_mul(1000).is_none() {
        client.add_reply_error("invalid expire time in 'expire' command");
        return;
    }

    let key = client.argv[1].clone();
    let db = &mut ctx.dbs[client.db_index];
    if db
        .lookup(&key, LookupFlags::NO_TOUCH | LookupFlags::NO_STATS, clock)
        .is_none()
    {
        client.add_reply(shared::CZERO);
        return;
    }

    if seconds <= 0 {
        // a deadline in the past deletes the key outright
        db.delete(&key);
    } else {
        db.set_expire(&key, now.saturating_add(seconds as u64 * 1000));
    }
    client.add_reply(shared::CONE);
}

/// TTL key — remaining seconds, -1 without expiry, -2 when missing.
pub fn cmd_ttl(ctx: &mut ServerContext, client: &mut Client) {
    let clock = ctx.lru.value();
    let key = client.argv[1].clone();
    let db = &mut ctx.dbs[client.db_index];

    if db
        .lookup(&key, LookupFlags::NO_TOUCH, clock)
        .is_none()
    {
        client.add_reply_integer(-2);
        return;
    }

    let deadline = db.get_expire(&key);
    if deadline < 0 {
        client.add_reply_integer(-1);
        return;
    }

    let remaining_ms = (deadline as u64).saturating_sub(time::mstime());
    client.add_reply_integer(((remaining_ms + 500) / 1000) as i64);
}

/// DBSIZE
pub fn cmd_dbsize(ctx: &mut ServerContext, client: &mut Client) {
    let len = ctx.dbs[client.db_index].len();
    client.add_reply_integer(len as i64);
}

/// FLUSHDB [ASYNC|SYNC] — both forms flush synchronously here.
pub fn cmd_flushdb(ctx: &mut ServerContext, client: &mut Client) {
    if client.argc() > 2 {
        client.add_reply(shared::SYNTAX_ERR);
        return;
    }
    if client.argc() == 2 {
        let mode = &client.argv[1];
        if !mode.eq_ignore_ascii_case(b"ASYNC") && !mode.eq_ignore_ascii_case(b"SYNC") {
            client.add_reply(shared::SYNTAX_ERR);
            return;
        }
    }
    ctx.dbs[client.db_index].flush();
    client.add_reply(shared::OK);
}

fn parse_i64(data: &[u8]) -> Option<i64> {
    std::str::from_utf8(data).ok()?.parse().ok()
}
