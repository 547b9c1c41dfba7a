/// END-TO-END OVER TCP
use std::time::Duration;

use replica_shared::{RdList, RdProperty, Wire};
use replica_test::{wait_until, SocketPair};

const PATIENCE: Duration = Duration::from_secs(10);

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

#[test]
fn connection_comes_up_with_heartbeat() {
    init_logger();
    let pair = SocketPair::new();
    assert!(pair.wait_connected(PATIENCE));
    assert!(wait_until(PATIENCE, || {
        pair.client.wire().heartbeat_alive().get() && pair.server.wire().heartbeat_alive().get()
    }));
}

#[test]
fn property_syncs_both_ways() {
    init_logger();
    let pair = SocketPair::new();
    let client = RdProperty::<String>::new();
    let server = RdProperty::<String>::new();
    server.set_master(true);
    pair.bind_both(&*client, &*server, "greeting").unwrap();

    client.set("hello".to_string()).unwrap();
    assert!(wait_until(PATIENCE, || server.value().as_deref() == Some("hello")));

    server.set("welcome".to_string()).unwrap();
    assert!(wait_until(PATIENCE, || client.value().as_deref() == Some("welcome")));
}

#[test]
fn list_survives_reconnect_without_loss() {
    init_logger();
    let pair = SocketPair::new();
    let client = RdList::<i32>::new();
    let server = RdList::<i32>::new();
    pair.bind_both(&*client, &*server, "numbers").unwrap();
    assert!(pair.wait_connected(PATIENCE));

    for value in 0..200 {
        client.add(value).unwrap();
    }
    assert!(wait_until(PATIENCE, || server.len() == 200));
    assert_eq!(server.to_vec(), (0..200).collect::<Vec<_>>());

    pair.client.wire().disconnect();
    for value in 200..300 {
        client.add(value).unwrap();
    }
    assert!(wait_until(PATIENCE, || server.len() == 300));
    assert!(pair.wait_connected(PATIENCE));

    assert_eq!(server.to_vec(), (0..300).collect::<Vec<_>>());
    assert_eq!(server.next_version(), client.next_version());
}

#[test]
fn messages_sent_before_connecting_are_delivered() {
    init_logger();
    let pair = SocketPair::new();
    let client = RdList::<String>::new();
    let server = RdList::<String>::new();
    pair.bind_both(&*client, &*server, "early").unwrap();

    // likely still dialing, the send buffer holds these until the socket is up
    client.add("first".to_string()).unwrap();
    client.add("second".to_string()).unwrap();

    assert!(wait_until(PATIENCE, || server.len() == 2));
    assert_eq!(server.to_vec(), vec!["first".to_string(), "second".to_string()]);
}
