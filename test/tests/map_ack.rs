/// MASTER MAP ACKNOWLEDGEMENTS
///
/// A master map keeps every change pending until the counterpart acknowledges its
/// exact version; plain changes arriving for a pending key are ignored.
use std::sync::Arc;

use replica_shared::{RdMap, RdProperty};
use replica_test::LoopbackPair;

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn bound_maps(pair: &LoopbackPair) -> (Arc<RdMap<String, i32>>, Arc<RdMap<String, i32>>) {
    let client = RdMap::<String, i32>::new();
    let server = RdMap::<String, i32>::new();
    client.set_master(true);
    pair.bind_both(&*client, &*server, "map").unwrap();
    (client, server)
}

fn key(value: &str) -> String {
    value.to_string()
}

#[test]
fn stale_remote_change_before_ack_is_ignored() {
    init_logger();
    let pair = LoopbackPair::new();
    let (client, server) = bound_maps(&pair);

    client.set(key("k"), 1).unwrap();
    assert_eq!(client.pending_ack_count(), 1);

    // the server changes the same key before it hears about version 1
    server.set(key("k"), 2).unwrap();
    assert_eq!(pair.server_wire.flush(), 1);
    assert_eq!(client.get(&key("k")), Some(1));
    assert_eq!(client.pending_ack_count(), 1);

    // version 1 reaches the server, which applies it and acknowledges
    assert_eq!(pair.client_wire.flush(), 1);
    assert_eq!(server.get(&key("k")), Some(1));
    assert_eq!(pair.server_wire.pending(), 1);
    assert_eq!(client.pending_ack_count(), 1);

    assert_eq!(pair.server_wire.flush(), 1);
    assert_eq!(client.pending_ack_count(), 0);
    assert_eq!(pair.pump(), 0);
}

#[test]
fn only_the_latest_version_is_acknowledged() {
    init_logger();
    let pair = LoopbackPair::new();
    let (client, server) = bound_maps(&pair);

    client.set(key("k"), 1).unwrap();
    client.set(key("k"), 3).unwrap();
    assert_eq!(pair.client_wire.flush(), 2);
    assert_eq!(server.get(&key("k")), Some(3));

    // ack for version 1 arrives while version 2 is pending
    assert_eq!(pair.server_wire.pending(), 2);
    pair.server_wire.flush();
    assert_eq!(client.pending_ack_count(), 0);
    assert_eq!(client.get(&key("k")), Some(3));
}

#[test]
fn pending_key_accepts_changes_after_ack() {
    init_logger();
    let pair = LoopbackPair::new();
    let (client, server) = bound_maps(&pair);

    client.set(key("a"), 1).unwrap();
    pair.pump();
    assert_eq!(client.pending_ack_count(), 0);

    server.set(key("a"), 5).unwrap();
    server.remove(&key("a")).unwrap();
    server.set(key("b"), 6).unwrap();
    pair.pump();

    assert_eq!(client.get(&key("a")), None);
    assert_eq!(client.get(&key("b")), Some(6));
    assert_eq!(client.len(), 1);
}

#[test]
fn slave_maps_exchange_without_versions() {
    init_logger();
    let pair = LoopbackPair::new();
    let client = RdMap::<i32, String>::new();
    let server = RdMap::<i32, String>::new();
    pair.bind_both(&*client, &*server, "plain").unwrap();

    client.set(1, "one".to_string()).unwrap();
    server.set(2, "two".to_string()).unwrap();
    pair.pump();

    let mut client_entries = client.entries();
    let mut server_entries = server.entries();
    client_entries.sort();
    server_entries.sort();
    assert_eq!(client_entries, vec![(1, "one".to_string()), (2, "two".to_string())]);
    assert_eq!(client_entries, server_entries);
    assert_eq!(client.pending_ack_count(), 0);
    assert_eq!(server.pending_ack_count(), 0);
}

#[test]
fn entries_set_before_bind_are_sent_at_bind() {
    init_logger();
    let pair = LoopbackPair::new();
    let client = RdMap::<i32, Arc<RdProperty<i32>>>::new();
    let server = RdMap::<i32, Arc<RdProperty<i32>>>::new();
    let nested = RdProperty::with_value(7);
    client.set(1, nested.clone()).unwrap();

    pair.bind_both(&*client, &*server, "early").unwrap();
    pair.pump();

    let remote = server.get(&1).expect("entry sent at bind");
    assert_eq!(remote.value(), Some(7));
    nested.set(8).unwrap();
    pair.pump();
    assert_eq!(remote.value(), Some(8));
}
