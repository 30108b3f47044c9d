//! Property-based cluster tests.
//!
//! Random interleavings of chat, room, and connection operations across a
//! small cluster. The cluster checks the directory invariants after every
//! step; these properties add that every client's mirror converges to the
//! server's snapshot once traffic settles.

use std::time::Duration;

use parley_harness::{PeerId, SimCluster};
use parley_server::DriverConfig;
use proptest::prelude::*;

const USERS: usize = 4;

#[derive(Debug, Clone)]
enum Op {
    Send { from: usize, to: usize },
    CreateRoom { by: usize },
    Join { by: usize, room: usize },
    Leave { by: usize, room: usize },
    Disconnect { who: usize },
    Reconnect { who: usize },
    Wait { secs: u64 },
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        4 => (0..USERS, 0..USERS).prop_map(|(from, to)| Op::Send { from, to }),
        2 => (0..USERS).prop_map(|by| Op::CreateRoom { by }),
        3 => (0..USERS, any::<usize>()).prop_map(|(by, room)| Op::Join { by, room }),
        2 => (0..USERS, any::<usize>()).prop_map(|(by, room)| Op::Leave { by, room }),
        1 => (0..USERS).prop_map(|who| Op::Disconnect { who }),
        1 => (0..USERS).prop_map(|who| Op::Reconnect { who }),
        1 => (1u64..15).prop_map(|secs| Op::Wait { secs }),
    ]
}

struct World {
    cluster: SimCluster,
    /// Current peer for each user slot
    slots: Vec<PeerId>,
}

impl World {
    fn new(seed: u64) -> Self {
        let config = DriverConfig { password: "pw".to_string(), ..Default::default() };
        let mut cluster = SimCluster::new(seed, config);
        let slots =
            (0..USERS).map(|i| cluster.connect(&format!("user{i}"), "pw").unwrap()).collect();
        cluster.run(3).unwrap();
        Self { cluster, slots }
    }

    fn rooms(&self) -> Vec<u64> {
        self.cluster.driver().directory().to_snapshot().rooms.keys().copied().collect()
    }

    fn apply(&mut self, op: &Op) {
        match *op {
            Op::Send { from, to } => {
                let Some(target) = self.cluster.user_id(self.slots[to]) else {
                    return;
                };
                if let Some(client) = self.cluster.client_mut(self.slots[from]) {
                    let _ = client.send_message(target, "hi");
                }
            },
            Op::CreateRoom { by } => {
                if let Some(client) = self.cluster.client_mut(self.slots[by]) {
                    let _ = client.create_room("room");
                }
            },
            Op::Join { by, room } | Op::Leave { by, room } => {
                let rooms = self.rooms();
                if rooms.is_empty() {
                    return;
                }
                let room = rooms[room % rooms.len()];
                let join = matches!(op, Op::Join { .. });
                if let Some(client) = self.cluster.client_mut(self.slots[by]) {
                    let _ = if join { client.join_room(room) } else { client.leave_room(room) };
                }
            },
            Op::Disconnect { who } => {
                self.cluster.disconnect(self.slots[who]).unwrap();
            },
            Op::Reconnect { who } => {
                if !self.cluster.is_connected(self.slots[who]) {
                    self.slots[who] = self.cluster.connect(&format!("user{who}"), "pw").unwrap();
                }
            },
            Op::Wait { secs } => self.cluster.advance(Duration::from_secs(secs)),
        }
        self.cluster.step().unwrap();
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn prop_mirrors_converge_to_server_snapshot(
        seed in any::<u64>(),
        ops in prop::collection::vec(op(), 1..40),
    ) {
        let mut world = World::new(seed);
        for op in &ops {
            world.apply(op);
        }
        world.cluster.run(3).unwrap();

        let expected = world.cluster.driver().directory().to_snapshot();
        for &peer in &world.slots {
            let Some(client) = world.cluster.client(peer) else { continue };
            if world.cluster.is_connected(peer) && client.is_authenticated() {
                prop_assert_eq!(client.directory().snapshot(), &expected, "{} diverged", peer);
            }
        }
    }

    #[test]
    fn prop_connected_clients_stay_authenticated(
        seed in any::<u64>(),
        ops in prop::collection::vec(op(), 1..40),
    ) {
        let mut world = World::new(seed);
        for op in &ops {
            world.apply(op);
        }
        world.cluster.run(3).unwrap();

        let directory = world.cluster.driver().directory();
        for &peer in &world.slots {
            if let Some(user_id) = world.cluster.user_id(peer) {
                prop_assert!(directory.is_authenticated(user_id), "{} never promoted", peer);
            }
        }
        prop_assert_eq!(directory.user_count(), world.cluster.driver().session_count());
    }
}
