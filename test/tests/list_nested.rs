/// LIST SYNCHRONIZATION AND NESTED ENTITY LIFETIMES
///
/// Lists count versions in lockstep on both ends. Elements that are entities
/// themselves live exactly as long as they stay in the list.
use std::sync::{Arc, Mutex};

use replica_shared::{BindState, ListEvent, RdBindable, RdDynamic, RdList, RdProperty, Wire};
use replica_test::LoopbackPair;

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

type NestedList = RdList<Arc<RdProperty<i32>>>;

#[test]
fn operations_replicate_in_order() {
    init_logger();
    let pair = LoopbackPair::new();
    let client = RdList::<String>::new();
    let server = RdList::<String>::new();
    pair.bind_both(&*client, &*server, "list").unwrap();

    client.add("a".to_string()).unwrap();
    client.add("c".to_string()).unwrap();
    client.insert(1, "b".to_string()).unwrap();
    client.set(2, "C".to_string()).unwrap();
    client.remove_at(0).unwrap();
    pair.pump();

    assert_eq!(server.to_vec(), vec!["b".to_string(), "C".to_string()]);
    assert_eq!(client.next_version(), 6);
    assert_eq!(server.next_version(), 6);

    server.add("d".to_string()).unwrap();
    pair.pump();
    assert_eq!(client.to_vec(), server.to_vec());
    assert_eq!(pair.pump(), 0);
}

#[test]
fn remote_changes_are_reported_to_observers() {
    init_logger();
    let pair = LoopbackPair::new();
    let client = RdList::<i32>::new();
    let server = RdList::<i32>::new();
    pair.bind_both(&*client, &*server, "observed").unwrap();

    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = events.clone();
    server.advise(pair.lifetime(), move |event| {
        let entry = match event {
            ListEvent::Add { index, value } => format!("add {} {}", index, value),
            ListEvent::Update { index, old, value } => format!("update {} {}->{}", index, old, value),
            ListEvent::Remove { index, value } => format!("remove {} {}", index, value),
        };
        sink.lock().unwrap().push(entry);
    });

    client.add(1).unwrap();
    client.set(0, 2).unwrap();
    client.clear().unwrap();
    pair.pump();

    assert_eq!(
        *events.lock().unwrap(),
        vec!["add 0 1", "update 0 1->2", "remove 0 2"]
    );
    assert_eq!(pair.server_wire.pending(), 0);
}

#[test]
fn removed_entity_is_unbound_before_observers_see_it() {
    init_logger();
    let pair = LoopbackPair::new();
    let client = NestedList::new();
    let server = NestedList::new();
    pair.bind_both(&*client, &*server, "nested").unwrap();

    let element = RdProperty::with_value(1);
    client.add(element.clone()).unwrap();
    pair.pump();
    let remote = server.get(0).expect("element replicated");
    let remote_id = remote.rd_id();
    assert_eq!(remote.bind_state(), BindState::Bound);
    assert!(pair.server.wire().broker().try_get_by_id(remote_id).is_some());

    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let server_protocol = pair.server.clone();
    server.change().advise(pair.lifetime(), move |event| {
        if let ListEvent::Remove { value, .. } = event {
            let registered = server_protocol
                .wire()
                .broker()
                .try_get_by_id(remote_id)
                .is_some();
            sink.lock().unwrap().push((value.bind_state(), registered));
        }
    });

    client.remove_at(0).unwrap();
    assert_eq!(element.bind_state(), BindState::NotBound);
    pair.pump();

    assert_eq!(*seen.lock().unwrap(), vec![(BindState::NotBound, false)]);
    assert!(server.is_empty());
}

#[test]
fn nested_elements_keep_syncing() {
    init_logger();
    let pair = LoopbackPair::new();
    let client = NestedList::new();
    let server = NestedList::new();
    pair.bind_both(&*client, &*server, "nested").unwrap();

    for value in 0..3 {
        client.add(RdProperty::with_value(value)).unwrap();
    }
    pair.pump();
    assert_eq!(server.len(), 3);

    let local = client.get(1).unwrap();
    local.set(10).unwrap();
    pair.pump();
    assert_eq!(server.get(1).and_then(|remote| remote.value()), Some(10));

    // ids come from the client's dynamic range
    for element in client.to_vec() {
        assert_eq!(element.rd_id().value() % 2, 0);
    }
}

#[test]
fn shifted_elements_keep_their_bind_name_and_sync() {
    init_logger();
    let pair = LoopbackPair::new();
    let client = NestedList::new();
    let server = NestedList::new();
    pair.bind_both(&*client, &*server, "shifting").unwrap();

    let first = RdProperty::with_value(1);
    client.add(first.clone()).unwrap();
    client.insert(0, RdProperty::with_value(0)).unwrap();
    pair.pump();

    let shifted = server.get(1).expect("shifted element");
    assert_eq!(shifted.rd_id(), first.rd_id());
    assert!(first.location().as_str().ends_with("[0]"));
    assert!(shifted.location().as_str().ends_with("[0]"));

    first.set(5).unwrap();
    pair.pump();
    assert_eq!(shifted.value(), Some(5));
}

#[test]
#[should_panic(expected = "Are you modifying a list from two sides?")]
fn concurrent_modification_is_fatal() {
    init_logger();
    let pair = LoopbackPair::new();
    let client = RdList::<i32>::new();
    let server = RdList::<i32>::new();
    pair.bind_both(&*client, &*server, "conflict").unwrap();

    client.add(1).unwrap();
    server.add(2).unwrap();
    pair.pump();
}

#[test]
fn index_out_of_bounds_is_an_error() {
    init_logger();
    let list = RdList::<i32>::new();
    list.add(1).unwrap();
    assert!(list.set(3, 5).is_err());
    assert!(list.remove_at(1).is_err());
    assert!(list.insert(2, 0).is_err());
    assert_eq!(list.to_vec(), vec![1]);
}
