//! End-to-end scenarios on the deterministic cluster.
//!
//! Every test drives one `ServerDriver` and several real client state
//! machines through in-memory delivery. Timeouts use the virtual clock, so
//! "wait 65 seconds" is exact and instant.

use std::{net::SocketAddr, time::Duration};

use parley_client::{AuthFailure, ClientEvent};
use parley_harness::{PeerId, SimCluster};
use parley_server::DriverConfig;

fn cluster_with_seed(seed: u64) -> SimCluster {
    SimCluster::new(seed, DriverConfig { password: "pw".to_string(), ..Default::default() })
}

fn cluster() -> SimCluster {
    cluster_with_seed(42)
}

/// Connect and run until authenticated with a known user ID.
fn login(cluster: &mut SimCluster, name: &str) -> PeerId {
    let peer = cluster.connect(name, "pw").unwrap();
    cluster.run(3).unwrap();
    assert!(cluster.client(peer).unwrap().is_authenticated(), "{name} did not authenticate");
    assert!(cluster.client(peer).unwrap().user_id().is_some());
    cluster.take_events(peer);
    peer
}

fn refreshes(events: &[ClientEvent]) -> usize {
    events.iter().filter(|e| matches!(e, ClientEvent::DirectoryRefreshed { .. })).count()
}

fn texts(events: &[ClientEvent]) -> Vec<&str> {
    events
        .iter()
        .filter_map(|e| match e {
            ClientEvent::Message { text, .. } => Some(text.as_str()),
            _ => None,
        })
        .collect()
}

fn room_named(cluster: &SimCluster, name: &str) -> u64 {
    let snapshot = cluster.driver().directory().to_snapshot();
    snapshot.rooms.iter().find(|(_, room)| room.name == name).map(|(id, _)| *id).unwrap()
}

#[test]
fn handshake_assigns_ids_and_names() {
    let mut cluster = cluster();
    let alice = login(&mut cluster, "alice");
    let bob = login(&mut cluster, "bob");

    let alice_id = cluster.user_id(alice).unwrap();
    let bob_id = cluster.user_id(bob).unwrap();
    assert_ne!(alice_id, bob_id);
    assert_eq!(cluster.client(alice).unwrap().user_id(), Some(alice_id));

    let mirror = cluster.client(alice).unwrap().directory();
    assert_eq!(mirror.user_name(bob_id), Some("bob"));
    assert_eq!(mirror.user_name(alice_id), Some("alice"));
}

#[test]
fn direct_message_carries_server_stamped_sender() {
    let mut cluster = cluster();
    let alice = login(&mut cluster, "alice");
    let bob = login(&mut cluster, "bob");
    let carol = login(&mut cluster, "carol");
    let bob_id = cluster.user_id(bob).unwrap();

    cluster.client_mut(alice).unwrap().send_message(bob_id, "psst").unwrap();
    cluster.step().unwrap();

    let events = cluster.take_events(bob);
    let Some(ClientEvent::Message { sender_id, recipient_id, text, send_time }) =
        events.iter().find(|e| matches!(e, ClientEvent::Message { .. }))
    else {
        panic!("bob got no message: {events:?}");
    };
    assert_eq!(*sender_id, cluster.user_id(alice).unwrap());
    assert_eq!(*recipient_id, bob_id);
    assert_eq!(text, "psst");
    assert!(*send_time >= 1_700_000_000);

    assert!(texts(&cluster.take_events(alice)).is_empty());
    assert!(texts(&cluster.take_events(carol)).is_empty());
}

#[test]
fn room_messages_reach_members_only() {
    let mut cluster = cluster();
    let alice = login(&mut cluster, "alice");
    let bob = login(&mut cluster, "bob");
    let carol = login(&mut cluster, "carol");
    let raw = cluster.connect_raw().unwrap();

    cluster.client_mut(alice).unwrap().create_room("lobby").unwrap();
    cluster.step().unwrap();
    let room = room_named(&cluster, "lobby");

    cluster.client_mut(bob).unwrap().join_room(room).unwrap();
    cluster.step().unwrap();
    cluster.client_mut(alice).unwrap().send_message(room, "hello room").unwrap();
    cluster.step().unwrap();

    assert_eq!(texts(&cluster.take_events(alice)), vec!["hello room"]);
    assert_eq!(texts(&cluster.take_events(bob)), vec!["hello room"]);
    assert!(texts(&cluster.take_events(carol)).is_empty());
    assert_eq!(cluster.raw_received(raw), 0);
}

#[test]
fn join_is_announced_to_existing_members() {
    let mut cluster = cluster();
    let alice = login(&mut cluster, "alice");
    let bob = login(&mut cluster, "bob");

    cluster.client_mut(alice).unwrap().create_room("lobby").unwrap();
    cluster.step().unwrap();
    let room = room_named(&cluster, "lobby");
    cluster.take_events(alice);

    cluster.client_mut(bob).unwrap().join_room(room).unwrap();
    cluster.step().unwrap();

    let bob_id = cluster.user_id(bob).unwrap();
    let events = cluster.take_events(alice);
    assert!(events.contains(&ClientEvent::RoomMembership {
        room_id: room,
        user_id: bob_id,
        joined: true
    }));
    assert!(cluster.client(alice).unwrap().directory().is_member(bob_id, room));
}

#[test]
fn wrong_password_fails_and_is_closed() {
    let mut cluster = cluster();
    let eve = cluster.connect("eve", "guess").unwrap();
    cluster.run(3).unwrap();

    let events = cluster.take_events(eve);
    assert_eq!(events, vec![ClientEvent::AuthenticationFailed {
        reason: AuthFailure::InvalidCredentials
    }]);
    assert_eq!(cluster.close_reason(eve), Some("invalid credentials"));
    assert_eq!(cluster.driver().directory().user_count(), 0);
}

#[test]
fn address_conflict_logs_out_previous_session() {
    let mut cluster = cluster();
    let addr = SocketAddr::from(([192, 168, 0, 10], 5555));
    let first = cluster.connect_from(addr, "alice", "pw").unwrap();
    cluster.run(3).unwrap();
    let observer = login(&mut cluster, "bob");
    let first_id = cluster.user_id(first).unwrap();

    let second = cluster.connect_from(addr, "alice", "pw").unwrap();
    cluster.run(3).unwrap();

    assert_eq!(cluster.close_reason(first), Some("address conflict"));
    assert!(cluster.client(second).unwrap().is_authenticated());
    assert_ne!(cluster.user_id(second), Some(first_id));

    let events = cluster.take_events(observer);
    let logout = events
        .iter()
        .position(|e| *e == ClientEvent::Logout { user_id: first_id, render: true })
        .unwrap();
    let refresh =
        events.iter().position(|e| matches!(e, ClientEvent::DirectoryRefreshed { .. })).unwrap();
    assert!(logout < refresh);
}

#[test]
fn silent_peer_is_dropped_with_one_refresh() {
    let mut cluster = cluster();
    let alice = login(&mut cluster, "alice");
    let bob = login(&mut cluster, "bob");
    let bob_id = cluster.user_id(bob).unwrap();
    cluster.take_events(alice);

    cluster.set_responsive(bob, false);
    for _ in 0..14 {
        cluster.advance(Duration::from_secs(5));
        cluster.step().unwrap();
    }

    assert_eq!(cluster.close_reason(bob), Some("idle timeout"));
    assert!(cluster.is_connected(alice), "heartbeats keep alice alive");

    let events = cluster.take_events(alice);
    let logouts: Vec<_> =
        events.iter().filter(|e| matches!(e, ClientEvent::Logout { .. })).collect();
    assert_eq!(logouts, vec![&ClientEvent::Logout { user_id: bob_id, render: true }]);
    assert_eq!(refreshes(&events), 1);
    assert_eq!(cluster.client(alice).unwrap().directory().user_name(bob_id), None);
}

#[test]
fn membership_burst_yields_one_refresh_per_tick() {
    let mut cluster = cluster();
    let alice = login(&mut cluster, "alice");
    let bob = login(&mut cluster, "bob");
    cluster.take_events(alice);

    let client = cluster.client_mut(alice).unwrap();
    for name in ["one", "two", "three"] {
        client.create_room(name).unwrap();
    }
    cluster.step().unwrap();

    assert_eq!(refreshes(&cluster.take_events(alice)), 1);
    assert_eq!(refreshes(&cluster.take_events(bob)), 1);
    assert_eq!(cluster.client(bob).unwrap().directory().rooms().count(), 3);

    cluster.run(2).unwrap();
    assert_eq!(refreshes(&cluster.take_events(bob)), 0);
}

#[test]
fn stalled_handshake_times_out() {
    let mut cluster = cluster();
    let raw = cluster.connect_raw().unwrap();

    cluster.advance(Duration::from_secs(29));
    cluster.step().unwrap();
    assert!(cluster.is_connected(raw));

    cluster.advance(Duration::from_secs(2));
    cluster.step().unwrap();
    assert_eq!(cluster.close_reason(raw), Some("handshake timeout"));
    assert_eq!(cluster.driver().session_count(), 0);
}

#[test]
fn logout_is_broadcast_and_session_closed() {
    let mut cluster = cluster();
    let alice = login(&mut cluster, "alice");
    let bob = login(&mut cluster, "bob");
    let alice_id = cluster.user_id(alice).unwrap();

    cluster.client_mut(alice).unwrap().logout().unwrap();
    cluster.step().unwrap();

    assert_eq!(cluster.close_reason(alice), Some("logout"));
    let events = cluster.take_events(bob);
    assert!(events.contains(&ClientEvent::Logout { user_id: alice_id, render: true }));
    assert_eq!(refreshes(&events), 1);
}

#[test]
fn reset_connection_cleans_up_rooms() {
    let mut cluster = cluster();
    let alice = login(&mut cluster, "alice");
    let bob = login(&mut cluster, "bob");

    cluster.client_mut(alice).unwrap().create_room("solo").unwrap();
    cluster.step().unwrap();
    assert_eq!(cluster.driver().directory().room_count(), 1);

    cluster.disconnect(alice).unwrap();
    cluster.step().unwrap();

    assert_eq!(cluster.driver().directory().room_count(), 0);
    assert_eq!(cluster.client(bob).unwrap().directory().rooms().count(), 0);
}

#[test]
fn same_seed_replays_identically() {
    fn transcript(seed: u64) -> Vec<ClientEvent> {
        let mut cluster = cluster_with_seed(seed);
        let alice = cluster.connect("alice", "pw").unwrap();
        let bob = cluster.connect("bob", "pw").unwrap();
        cluster.run(3).unwrap();

        let bob_id = cluster.user_id(bob).unwrap();
        cluster.client_mut(alice).unwrap().send_message(bob_id, "hi").unwrap();
        cluster.advance(Duration::from_secs(3));
        cluster.run(2).unwrap();

        let mut events = cluster.take_events(alice);
        events.extend(cluster.take_events(bob));
        events
    }

    assert_eq!(transcript(7), transcript(7));
}
