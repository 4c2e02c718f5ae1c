//! End-to-end dissemination across real daemons on loopback sockets.

use std::net::{SocketAddr, SocketAddrV4};
use std::time::Duration;

use tokio::time::{sleep, timeout};

use gossip_sdk::client::ApiClient;
use gossip_server::config::Config;
use gossip_server::daemon::Daemon;

fn config(bootstrapper: Option<SocketAddrV4>) -> Config {
    Config {
        host_key_path: "hostkey.pem".into(),
        cache_size: 32,
        max_connections: 8,
        bootstrapper,
        listen_address: "127.0.0.1:0".parse().unwrap(),
        api_address: "127.0.0.1:0".parse().unwrap(),
        max_ttl: 10,
    }
}

async fn api_client(daemon: &Daemon) -> ApiClient {
    ApiClient::connect(SocketAddr::V4(daemon.api_addr()))
        .await
        .expect("connecting to the daemon's API endpoint")
}

/// Poll until `predicate` holds or the deadline passes.
async fn wait_for<F: Fn() -> bool>(what: &str, predicate: F) {
    for _ in 0..100 {
        if predicate() {
            return;
        }
        sleep(Duration::from_millis(50)).await;
    }
    panic!("timed out waiting for {what}");
}

#[tokio::test]
async fn announcement_crosses_the_overlay_after_validation() {
    let hub = Daemon::spawn(config(None)).await.unwrap();
    let edge = Daemon::spawn(config(Some(hub.p2p_addr()))).await.unwrap();

    // The edge daemon bootstraps into the hub.
    wait_for("the edge to join the hub", || {
        !hub.state().p2p_pool.is_empty() && !edge.state().p2p_pool.is_empty()
    })
    .await;

    let mut subscriber = api_client(&hub).await;
    subscriber.subscribe(540).await.unwrap();
    wait_for("the subscription to register", || {
        !hub.state().registry.registrations(540).is_empty()
    })
    .await;

    let mut announcer = api_client(&edge).await;
    announcer.announce(2, 540, b"p2p is very cool!").await.unwrap();

    let notification = timeout(Duration::from_secs(5), subscriber.next_notification())
        .await
        .expect("no notification arrived")
        .unwrap();
    assert_eq!(notification.data_type, 540);
    assert_eq!(notification.data, b"p2p is very cool!");
    subscriber.validate(notification.msg_id, true).await.unwrap();

    // The same payload announced again is absorbed by the caches; nothing
    // reaches the subscriber a second time.
    announcer.announce(2, 540, b"p2p is very cool!").await.unwrap();
    assert!(
        timeout(Duration::from_millis(700), subscriber.next_notification())
            .await
            .is_err()
    );

    // A latecomer subscribing on the hub catches up from the cache.
    let mut latecomer = api_client(&hub).await;
    latecomer.subscribe(540).await.unwrap();
    let replayed = timeout(Duration::from_secs(5), latecomer.next_notification())
        .await
        .expect("no replay arrived")
        .unwrap();
    assert_eq!(replayed.data, b"p2p is very cool!");
}

#[tokio::test]
async fn peers_discover_each_other_through_the_bootstrapper() {
    let hub = Daemon::spawn(config(None)).await.unwrap();
    let first = Daemon::spawn(config(Some(hub.p2p_addr()))).await.unwrap();

    // Let the first peer advertise itself to the hub before the second
    // asks for known peers.
    wait_for("the hub to learn the first peer", || {
        hub.state()
            .p2p_pool
            .server_identifiers(&[])
            .contains(&first.p2p_addr())
    })
    .await;

    let second = Daemon::spawn(config(Some(hub.p2p_addr()))).await.unwrap();

    // The hub's peer response leads the second daemon to dial the first;
    // its peer init makes the link known on both sides.
    wait_for("the mesh to close", || {
        second
            .state()
            .p2p_pool
            .server_identifiers(&[])
            .contains(&first.p2p_addr())
            && first
                .state()
                .p2p_pool
                .server_identifiers(&[])
                .contains(&second.p2p_addr())
    })
    .await;
}
