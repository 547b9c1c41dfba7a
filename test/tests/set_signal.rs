/// SETS AND SIGNALS
use std::sync::{Arc, Mutex};

use replica_shared::{RdSet, RdSignal, SetEvent};
use replica_test::LoopbackPair;

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

#[test]
fn set_changes_replicate_both_ways() {
    init_logger();
    let pair = LoopbackPair::new();
    let client = RdSet::<String>::new();
    let server = RdSet::<String>::new();
    pair.bind_both(&*client, &*server, "set").unwrap();

    assert!(client.add("a".to_string()));
    assert!(!client.add("a".to_string()));
    assert!(client.add("b".to_string()));
    assert_eq!(pair.client_wire.pending(), 2);
    pair.pump();
    assert_eq!(server.to_vec(), vec!["a".to_string(), "b".to_string()]);
    assert_eq!(pair.server_wire.pending(), 0);

    assert!(server.remove(&"a".to_string()));
    pair.pump();
    assert!(!client.contains(&"a".to_string()));
    assert_eq!(client.len(), 1);
}

#[test]
fn set_advise_replays_current_elements() {
    init_logger();
    let pair = LoopbackPair::new();
    let set = RdSet::<i32>::new();
    set.add(1);
    set.add(2);

    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = events.clone();
    set.advise(pair.lifetime(), move |event| sink.lock().unwrap().push(event.clone()));
    set.remove(&1);

    assert_eq!(
        *events.lock().unwrap(),
        vec![SetEvent::Add(1), SetEvent::Add(2), SetEvent::Remove(1)]
    );
}

#[test]
fn set_keeps_insertion_order_across_removals() {
    init_logger();
    let set = RdSet::<i32>::new();
    for value in (0..5_000).rev() {
        assert!(set.add(value));
    }
    assert!(!set.add(42));
    assert!(set.remove(&4_999));
    assert!(!set.remove(&4_999));
    assert!(set.add(4_999));

    let items = set.to_vec();
    assert_eq!(items.len(), 5_000);
    assert_eq!(items[0], 4_998);
    assert_eq!(items[4_999], 4_999);
    assert!((0..5_000).all(|value| set.contains(&value)));
    assert!(!set.contains(&5_000));
}

#[test]
fn elements_added_before_bind_reach_the_counterpart() {
    init_logger();
    let pair = LoopbackPair::new();
    let client = RdSet::<i64>::new();
    let server = RdSet::<i64>::new();
    client.add(10);
    pair.bind_both(&*client, &*server, "early").unwrap();
    pair.pump();
    assert_eq!(server.to_vec(), vec![10]);
}

#[test]
fn signal_fires_locally_and_remotely() {
    init_logger();
    let pair = LoopbackPair::new();
    let client = RdSignal::<String>::new();
    let server = RdSignal::<String>::new();
    pair.bind_both(&*client, &*server, "signal").unwrap();

    let local = Arc::new(Mutex::new(Vec::new()));
    let remote = Arc::new(Mutex::new(Vec::new()));
    let local_sink = local.clone();
    let remote_sink = remote.clone();
    client.advise(pair.lifetime(), move |value: &String| {
        local_sink.lock().unwrap().push(value.clone())
    });
    server.advise(pair.lifetime(), move |value: &String| {
        remote_sink.lock().unwrap().push(value.clone())
    });

    client.fire("ping".to_string());
    client.fire("pong".to_string());
    pair.pump();

    assert_eq!(*local.lock().unwrap(), vec!["ping", "pong"]);
    assert_eq!(*remote.lock().unwrap(), vec!["ping", "pong"]);
    assert_eq!(pair.server_wire.pending(), 0);
}

#[test]
fn unbound_signal_only_fires_locally() {
    init_logger();
    let pair = LoopbackPair::new();
    let signal = RdSignal::<i32>::new();
    let count = Arc::new(Mutex::new(0));
    let sink = count.clone();
    signal.advise(pair.lifetime(), move |_| *sink.lock().unwrap() += 1);
    signal.fire(1);
    assert_eq!(*count.lock().unwrap(), 1);
    assert_eq!(pair.client_wire.pending(), 0);
}
