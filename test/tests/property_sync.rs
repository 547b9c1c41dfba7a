/// PROPERTY SYNCHRONIZATION OVER A LOOPBACK PAIR
///
/// Covers the basic exchange between a master and a non-master property,
/// version based rejection on the master side and echo suppression.
use std::sync::{Arc, Mutex};

use replica_shared::{BindState, BufferWriter, RdBindable, RdId, RdProperty, Serde, Wire};
use replica_test::LoopbackPair;

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn bound_pair(pair: &LoopbackPair) -> (Arc<RdProperty<i32>>, Arc<RdProperty<i32>>) {
    let client = RdProperty::<i32>::new();
    let server = RdProperty::<i32>::new();
    pair.bind_both(&*client, &*server, "property").unwrap();
    assert_eq!(pair.pump(), 0);
    (client, server)
}

#[test]
fn master_and_slave_exchange_values() {
    init_logger();
    let pair = LoopbackPair::new();
    let (client, server) = bound_pair(&pair);
    client.set_master(true);
    assert_eq!(client.rd_id(), server.rd_id());

    client.set(5).unwrap();
    assert_eq!(client.master_version(), 1);
    assert_eq!(server.value(), None);

    pair.pump();
    assert_eq!(server.value(), Some(5));
    assert_eq!(server.master_version(), 1);

    // a slave keeps the version it last saw, the master accepts an equal version
    server.set(7).unwrap();
    assert_eq!(server.master_version(), 1);
    pair.pump();
    assert_eq!(client.value(), Some(7));
    assert_eq!(client.master_version(), 1);
}

#[test]
fn master_rejects_older_versions() {
    init_logger();
    let pair = LoopbackPair::new();
    let (client, server) = bound_pair(&pair);
    client.set_master(true);
    for value in 1..=3 {
        client.set(value).unwrap();
    }
    pair.pump();
    assert_eq!(client.master_version(), 3);
    assert_eq!(server.value(), Some(3));

    let id = client.rd_id();
    pair.server_wire.send(id, &mut |writer: &mut BufferWriter| {
        writer.write_i32(2);
        writer.write_i32(100);
    });
    pair.pump();
    assert_eq!(client.value(), Some(3));
    assert_eq!(client.master_version(), 3);

    pair.server_wire.send(id, &mut |writer: &mut BufferWriter| {
        writer.write_i32(4);
        writer.write_i32(200);
    });
    pair.pump();
    assert_eq!(client.value(), Some(200));
    assert_eq!(client.master_version(), 4);
}

#[test]
fn master_wins_concurrent_changes() {
    init_logger();
    let pair = LoopbackPair::new();
    let (client, server) = bound_pair(&pair);
    client.set_master(true);
    client.set(5).unwrap();
    pair.pump();

    // both change before either side hears from the other
    server.set(11).unwrap();
    client.set(9).unwrap();
    pair.pump();

    assert_eq!(client.value(), Some(9));
    assert_eq!(server.value(), Some(9));
    assert_eq!(client.master_version(), 2);
}

#[test]
fn remote_change_is_not_echoed() {
    init_logger();
    let pair = LoopbackPair::new();
    let (client, server) = bound_pair(&pair);

    let changes = Arc::new(Mutex::new(Vec::new()));
    let sink = changes.clone();
    server.advise(pair.lifetime(), move |value| sink.lock().unwrap().push(*value));

    client.set(42).unwrap();
    assert_eq!(pair.client_wire.pending(), 1);
    assert_eq!(pair.client_wire.flush(), 1);

    assert_eq!(server.value(), Some(42));
    assert_eq!(pair.server_wire.pending(), 0);
    assert_eq!(*changes.lock().unwrap(), vec![42]);
}

#[test]
fn setting_the_same_value_sends_nothing() {
    init_logger();
    let pair = LoopbackPair::new();
    let (client, _server) = bound_pair(&pair);

    client.set(1).unwrap();
    client.set(1).unwrap();
    assert_eq!(pair.client_wire.pending(), 1);
}

#[test]
fn value_set_before_bind_is_kept_local() {
    init_logger();
    let pair = LoopbackPair::new();
    let client = RdProperty::with_value(3);
    let server = RdProperty::<i32>::new();
    pair.bind_both(&*client, &*server, "early").unwrap();

    assert_eq!(pair.pump(), 0);
    assert_eq!(client.value(), Some(3));
    assert_eq!(server.value(), None);

    client.set(4).unwrap();
    pair.pump();
    assert_eq!(server.value(), Some(4));
}

#[test]
fn nested_property_follows_its_parent() {
    init_logger();
    let pair = LoopbackPair::new();
    let client = RdProperty::<Arc<RdProperty<i32>>>::new();
    let server = RdProperty::<Arc<RdProperty<i32>>>::new();
    pair.bind_both(&*client, &*server, "outer").unwrap();

    let inner = RdProperty::with_value(1);
    client.set(inner.clone()).unwrap();
    pair.pump();

    let remote_inner = server.value().expect("nested value arrived");
    assert_eq!(remote_inner.rd_id(), inner.rd_id());
    assert_eq!(remote_inner.value(), Some(1));

    inner.set(2).unwrap();
    pair.pump();
    assert_eq!(remote_inner.value(), Some(2));

    // replacing the nested value unbinds the previous one on both sides
    client.set(RdProperty::with_value(10)).unwrap();
    pair.pump();
    assert!(inner.rd_id().is_null());
    assert!(remote_inner.rd_id().is_null());
    assert_eq!(server.value().and_then(|value| value.value()), Some(10));
}

#[test]
fn received_nested_value_is_bound_before_listeners_run() {
    init_logger();
    let pair = LoopbackPair::new();
    let client = RdProperty::<Arc<RdProperty<i32>>>::new();
    let server = RdProperty::<Arc<RdProperty<i32>>>::new();
    pair.bind_both(&*client, &*server, "outer").unwrap();

    let states = Arc::new(Mutex::new(Vec::new()));
    let sink = states.clone();
    server.advise(pair.lifetime(), move |value| {
        sink.lock().unwrap().push(value.bind_state())
    });

    client.set(RdProperty::with_value(1)).unwrap();
    pair.pump();
    assert_eq!(*states.lock().unwrap(), vec![BindState::Bound]);
}

#[test]
fn rejected_nested_value_is_dropped() {
    init_logger();
    let pair = LoopbackPair::new();
    let client = RdProperty::<Arc<RdProperty<i32>>>::new();
    let server = RdProperty::<Arc<RdProperty<i32>>>::new();
    pair.bind_both(&*client, &*server, "outer").unwrap();
    client.set_master(true);
    for value in 1..=3 {
        client.set(RdProperty::with_value(value)).unwrap();
    }
    pair.pump();
    let kept = client.value().expect("latest nested value");
    let subscriptions = pair.client.wire().broker().subscription_count();

    // stale version from the other side carrying a nested property
    let stale = RdId::new(0x7000_0001);
    pair.server_wire.send(client.rd_id(), &mut |writer: &mut BufferWriter| {
        writer.write_i32(2);
        stale.ser(writer);
        writer.write_bool(true);
        writer.write_i32(100);
    });
    pair.pump();

    assert!(Arc::ptr_eq(&client.value().unwrap(), &kept));
    assert_eq!(kept.bind_state(), BindState::Bound);
    assert!(pair.client.wire().broker().try_get_by_id(stale).is_none());
    assert_eq!(pair.client.wire().broker().subscription_count(), subscriptions);
}
