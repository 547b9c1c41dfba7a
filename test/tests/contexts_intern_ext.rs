/// PROTOCOL SERVICES: MESSAGE CONTEXTS, STRING INTERNING AND EXTENSIONS
use std::sync::{Arc, Mutex};

use replica_shared::{
    ExtCreationInfo, InternedString, ProtocolError, RdBindable, RdContext, RdProperty, RdSignal,
};
use replica_test::LoopbackPair;

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

#[test]
fn handlers_run_with_the_senders_context() {
    init_logger();
    let pair = LoopbackPair::new();
    let client_user = pair.client.contexts().register(&RdContext::new("user"));
    let server_user = pair.server.contexts().register(&RdContext::new("user"));
    pair.pump();
    assert_eq!(pair.server.contexts().counterpart_keys(), vec!["user".to_string()]);
    assert_eq!(pair.client.contexts().counterpart_keys(), vec!["user".to_string()]);

    let client = RdProperty::<i32>::new();
    let server = RdProperty::<i32>::new();
    pair.bind_both(&*client, &*server, "property").unwrap();

    let observed = Arc::new(Mutex::new(Vec::new()));
    let sink = observed.clone();
    let user = server_user.clone();
    server.change().advise(pair.lifetime(), move |value| {
        sink.lock().unwrap().push((*value, user.value()));
    });

    client_user.with_value("alice", || client.set(1)).unwrap();
    client.set(2).unwrap();
    pair.pump();

    assert_eq!(
        *observed.lock().unwrap(),
        vec![(1, Some("alice".to_string())), (2, None)]
    );
    assert_eq!(server_user.value(), None);
}

#[test]
fn registering_a_key_twice_returns_the_first_context() {
    init_logger();
    let pair = LoopbackPair::new();
    let first = pair.client.contexts().register(&RdContext::new("trace"));
    let second = pair.client.contexts().register(&RdContext::new("trace"));
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(pair.client_wire.pending(), 1);
}

#[test]
fn interned_strings_travel_as_ids() {
    init_logger();
    let pair = LoopbackPair::new();
    let client = RdProperty::<InternedString>::new();
    let server = RdProperty::<InternedString>::new();
    pair.bind_both(&*client, &*server, "interned").unwrap();

    client.set(InternedString::new("hello")).unwrap();
    pair.pump();
    assert_eq!(server.value(), Some(InternedString::new("hello")));
    assert_eq!(pair.client.intern_root().local_count(), 1);
    assert_eq!(pair.server.intern_root().remote_count(), 1);

    // a value the counterpart interned is referenced by its id
    let reply_client = RdProperty::<InternedString>::new();
    let reply_server = RdProperty::<InternedString>::new();
    pair.bind_both(&*reply_client, &*reply_server, "reply").unwrap();
    reply_server.set(InternedString::new("hello")).unwrap();
    pair.pump();
    assert_eq!(reply_client.value(), Some(InternedString::new("hello")));
    assert_eq!(pair.server.intern_root().local_count(), 0);

    client.set(InternedString::new("again")).unwrap();
    client.set(InternedString::new("hello")).unwrap();
    pair.pump();
    assert_eq!(server.value(), Some(InternedString::new("hello")));
    assert_eq!(pair.client.intern_root().local_count(), 2);
}

#[test]
fn extensions_are_announced_to_the_counterpart() {
    init_logger();
    let pair = LoopbackPair::new();
    let announced = Arc::new(Mutex::new(Vec::new()));
    let sink = announced.clone();
    pair.server
        .ext_created()
        .advise(pair.lifetime(), move |info: &ExtCreationInfo| {
            sink.lock().unwrap().push(info.clone())
        });

    let client_ext = pair
        .client
        .get_or_create_extension("settings", RdProperty::<i32>::new)
        .unwrap();
    let again = pair
        .client
        .get_or_create_extension("settings", RdProperty::<i32>::new)
        .unwrap();
    assert!(Arc::ptr_eq(&client_ext, &again));
    pair.pump();

    let infos = announced.lock().unwrap().clone();
    assert_eq!(infos.len(), 1);
    assert_eq!(infos[0].name, "settings");
    assert_eq!(infos[0].rd_id, client_ext.rd_id());

    let server_ext = pair
        .server
        .get_or_create_extension("settings", RdProperty::<i32>::new)
        .unwrap();
    assert_eq!(server_ext.rd_id(), client_ext.rd_id());
    client_ext.set(3).unwrap();
    pair.pump();
    assert_eq!(server_ext.value(), Some(3));
}

#[test]
fn extension_with_another_type_is_rejected() {
    init_logger();
    let pair = LoopbackPair::new();
    pair.client
        .get_or_create_extension("ext", RdProperty::<i32>::new)
        .unwrap();
    let result = pair
        .client
        .get_or_create_extension("ext", RdSignal::<i32>::new);
    assert!(matches!(
        result,
        Err(ProtocolError::ExtensionTypeMismatch { name }) if name == "ext"
    ));
}
