//! Slot routing: picks the key a command routes on and hashes it to one of
//! the cluster's 16384 slots.

use crate::transport::Command;

pub const SLOT_COUNT: u16 = 16384;

/// Extracts the substring between the first balanced `{...}` pair in a key,
/// per the hash-tag rule: `{user1000}.following` and `{user1000}.followers`
/// must land on the same slot. An empty tag (`{}`) is not a tag at all and
/// the whole key is used, matching the reference client's behavior.
fn hash_tag(key: &[u8]) -> &[u8] {
    if let Some(open) = key.iter().position(|&b| b == b'{') {
        if let Some(len) = key[open + 1..].iter().position(|&b| b == b'}') {
            if len != 0 {
                return &key[open + 1..open + 1 + len];
            }
        }
    }
    key
}

/// Hashes a key to its slot with CRC16-CCITT/XMODEM, the same variant the
/// server uses. This crate never reimplements the checksum, only calls it.
pub fn slot_of(key: &[u8]) -> u16 {
    let tag = hash_tag(key);
    crc16::State::<crc16::XMODEM>::calculate(tag) % SLOT_COUNT
}

fn ascii_upper(bytes: &[u8]) -> Vec<u8> {
    bytes.iter().map(u8::to_ascii_uppercase).collect()
}

/// Picks the argument a command routes on, if it has one.
///
/// This recognizes a small, deliberately partial set of commands with
/// unusual key positions (`EVAL`/`EVALSHA` put the key after the numkeys
/// argument; a handful of admin commands carry no key at all). Everything
/// else falls back to "the first argument after the command name", which
/// covers the common single-key commands (`GET`, `SET`, `MGET`'s first key,
/// ...). A full per-command routing table is a much larger undertaking
/// (redis-rs's own `RoutingInfo::for_routable` runs to hundreds of cases)
/// and is out of scope here.
pub fn key_of(command: &Command) -> Option<&[u8]> {
    let name = command.first()?;
    match ascii_upper(name).as_slice() {
        b"PING" | b"INFO" | b"CLUSTER" | b"CLIENT" | b"COMMAND" | b"TIME" | b"CONFIG"
        | b"ECHO" | b"ASKING" | b"AUTH" | b"HELLO" | b"DBSIZE" | b"SCAN" => None,
        b"EVAL" | b"EVALSHA" => command.get(2).map(Vec::as_slice),
        _ => command.get(1).map(Vec::as_slice),
    }
}

/// `true` if every sub-command in the pipeline that has a key hashes to the
/// same slot. A mismatch isn't rejected, only logged: the engine dispatches
/// the pipeline through a single connection regardless and lets the
/// classifier redirect whichever sub-commands come back `MOVED`.
pub fn check_same_slot(pipeline: &[Command]) -> bool {
    let mut slots = pipeline.iter().filter_map(key_of).map(slot_of);
    match slots.next() {
        None => true,
        Some(first) => slots.all(|slot| slot == first),
    }
}
