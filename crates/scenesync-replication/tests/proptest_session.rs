//! Property tests for a client/server session.
//!
//! Random sequences of client-side creations, server acknowledgements,
//! component updates and removals are replayed through encoded messages, and
//! the allocator and scene are checked to agree after every step.

use std::collections::BTreeSet;

use proptest::prelude::*;
use rand::{Rng, SeedableRng};
use rand_pcg::Pcg64;
use scenesync_protocol::prelude::*;
use scenesync_replication::prelude::*;
use scenesync_scene::prelude::*;

#[derive(Debug, Clone)]
enum Op {
    /// Client creates an entity with a speculative id.
    Create,
    /// Server acknowledges the n-th pending client entity.
    Ack(usize),
    /// Client sends its state of the n-th acked entity to the server.
    Sync(usize, u8),
    /// Client removes the n-th acked entity.
    Remove(usize),
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => Just(Op::Create),
        3 => (0..16usize).prop_map(Op::Ack),
        2 => (0..16usize, any::<u8>()).prop_map(|(i, v)| Op::Sync(i, v)),
        1 => (0..16usize).prop_map(Op::Remove),
    ]
}

struct Session {
    client: ReplicationReconciler,
    client_scene: Scene,
    client_ids: IdAllocator,
    server: ReplicationReconciler,
    server_scene: Scene,
    server_ids: IdAllocator,
    pending: Vec<EntityId>,
    acked: Vec<EntityId>,
}

impl Session {
    fn new() -> Self {
        Self {
            client: ReplicationReconciler::new(ReplicationConfig::client()),
            client_scene: Scene::new(),
            client_ids: IdAllocator::new(),
            server: ReplicationReconciler::new(ReplicationConfig::server()),
            server_scene: Scene::new(),
            server_ids: IdAllocator::new(),
            pending: Vec::new(),
            acked: Vec::new(),
        }
    }

    fn apply(&mut self, op: &Op) {
        match *op {
            Op::Create => {
                let id = self
                    .client
                    .create_entity(&mut self.client_scene, &mut self.client_ids, IdNamespace::Unacked)
                    .unwrap();
                self.pending.push(id);
            }
            Op::Ack(i) => {
                if self.pending.is_empty() {
                    return;
                }
                let temp = self.pending.remove(i % self.pending.len());
                let (assigned, collision) = self
                    .server
                    .assign_authoritative_id(&mut self.server_scene, &mut self.server_ids, temp)
                    .unwrap();
                let collision = collision.unwrap();
                let bytes = collision.to_bytes().unwrap();
                let outcome = self
                    .client
                    .receive(
                        &mut self.client_scene,
                        &mut self.client_ids,
                        EntityIdCollision::ID,
                        &bytes,
                    )
                    .unwrap();
                assert_eq!(outcome, ApplyOutcome::Renamed { old: temp, new: assigned });
                self.acked.push(assigned);
            }
            Op::Sync(i, value) => {
                if self.acked.is_empty() {
                    return;
                }
                let id = self.acked[i % self.acked.len()];
                let key = ComponentKey::singleton(ComponentTypeHash(u32::from(value % 4)));
                let data = vec![value];
                if self.client_scene.component(id, &key).is_some() {
                    self.client_scene.write_component(id, &key, data).unwrap();
                } else {
                    self.client_scene.create_component(id, key, data).unwrap();
                }
                for update in self.client.build_update(&self.client_scene, id).unwrap() {
                    let bytes = update.to_bytes().unwrap();
                    self.server
                        .receive(
                            &mut self.server_scene,
                            &mut self.server_ids,
                            UPDATE_COMPONENTS_ID,
                            &bytes,
                        )
                        .unwrap();
                }
            }
            Op::Remove(i) => {
                if self.acked.is_empty() {
                    return;
                }
                let id = self.acked.swap_remove(i % self.acked.len());
                self.client
                    .remove_entity(&mut self.client_scene, &mut self.client_ids, id)
                    .unwrap();
                self.server
                    .remove_entity(&mut self.server_scene, &mut self.server_ids, id)
                    .unwrap();
            }
        }
    }

    fn check(&self) {
        let client_live: BTreeSet<EntityId> = self.client_scene.entity_ids().collect();
        let expected: BTreeSet<EntityId> =
            self.pending.iter().chain(&self.acked).copied().collect();
        assert_eq!(client_live, expected);

        for &id in &client_live {
            assert!(!self.client_ids.is_free(id), "{id} live but free");
        }
        let reserved = self.client_ids.live_count(IdNamespace::Replicated)
            + self.client_ids.live_count(IdNamespace::Unacked)
            + self.client_ids.live_count(IdNamespace::Local);
        assert_eq!(reserved, client_live.len());

        for &id in &self.pending {
            assert!(id.is_unacked());
            assert_eq!(self.client.state_of(id), Some(EntityState::Local));
        }
        for &id in &self.acked {
            assert!(id.is_replicated());
            assert_eq!(self.client.state_of(id), Some(EntityState::Replicated));
            let client_entity = self.client_scene.entity(id).unwrap();
            let server_entity = self.server_scene.entity(id).unwrap();
            let client_components: Vec<&Component> = client_entity.components().collect();
            let server_components: Vec<&Component> = server_entity.components().collect();
            assert_eq!(client_components, server_components);
        }
        assert!(!self.client.is_closed());
        assert!(!self.server.is_closed());
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    #[test]
    fn client_and_server_stay_consistent(ops in prop::collection::vec(op_strategy(), 1..80)) {
        let mut session = Session::new();
        for op in &ops {
            session.apply(op);
            session.check();
        }
    }
}

/// Drive a session from a seeded generator and return the acked ids in order.
fn run_seeded(seed: u64, steps: usize) -> Vec<EntityId> {
    let mut rng = Pcg64::seed_from_u64(seed);
    let mut session = Session::new();
    for _ in 0..steps {
        let op = match rng.gen_range(0..9u8) {
            0..=2 => Op::Create,
            3..=5 => Op::Ack(rng.gen_range(0..16)),
            6..=7 => Op::Sync(rng.gen_range(0..16), rng.gen()),
            _ => Op::Remove(rng.gen_range(0..16)),
        };
        session.apply(&op);
    }
    session.check();
    session.acked
}

#[test]
fn seeded_sessions_replay_identically() {
    for seed in [3u64, 11, 2024] {
        assert_eq!(run_seeded(seed, 500), run_seeded(seed, 500));
    }
}
