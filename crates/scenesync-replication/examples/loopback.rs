//! Loopback session -- a client and a server reconcile one entity in-process.
//!
//! Run with:
//!   RUST_LOG=debug cargo run --example loopback -p scenesync-replication
//!
//! The client creates an entity under a speculative id and sends its state.
//! The server assigns an authoritative id and answers with an
//! `EntityIDCollision`; the client renames its entity and both sides end up
//! with the same state under the same id.

use anyhow::Context;
use scenesync_protocol::prelude::*;
use scenesync_replication::prelude::*;
use scenesync_scene::prelude::*;

// ---------------------------------------------------------------------------
// Peer
// ---------------------------------------------------------------------------

struct Peer {
    name: &'static str,
    reconciler: ReplicationReconciler,
    scene: Scene,
    ids: IdAllocator,
}

impl Peer {
    fn new(name: &'static str, config: ReplicationConfig) -> Self {
        Self {
            name,
            reconciler: ReplicationReconciler::new(config),
            scene: Scene::new(),
            ids: IdAllocator::new(),
        }
    }

    /// Hand an encoded payload to this peer, as a transport would.
    fn deliver(&mut self, message_id: MessageId, payload: &[u8]) -> anyhow::Result<ApplyOutcome> {
        let outcome = self
            .reconciler
            .receive(&mut self.scene, &mut self.ids, message_id, payload)
            .with_context(|| format!("{} rejected message {message_id}", self.name))?;
        tracing::info!(peer = self.name, ?outcome, "applied");
        Ok(outcome)
    }
}

fn main() -> Result<(), anyhow::Error> {
    init_logging("info");

    let mut server = Peer::new("server", ReplicationConfig::server());
    let mut client = Peer::new("client", ReplicationConfig::client());

    let placeable = ComponentKey::singleton(ComponentTypeHash::of_name("Placeable"));
    let name = ComponentKey::new(ComponentTypeHash::of_name("Name"), "label");

    // Client side: speculative entity with two components.
    let temp = client
        .reconciler
        .create_entity(&mut client.scene, &mut client.ids, IdNamespace::Unacked)?;
    client
        .scene
        .create_component(temp, placeable.clone(), vec![0, 0, 128, 63])?;
    client
        .scene
        .create_component(temp, name.clone(), b"crate".to_vec())?;
    tracing::info!(%temp, "client created entity");

    // Server side: pick the authoritative id and tell the client.
    let (assigned, collision) = server
        .reconciler
        .assign_authoritative_id(&mut server.scene, &mut server.ids, temp)?;
    if let Some(collision) = collision {
        client.deliver(EntityIdCollision::ID, &collision.to_bytes()?)?;
    }

    // Client side: push the full state under the new id.
    for update in client.reconciler.build_update(&client.scene, assigned)? {
        server.deliver(UpdateComponents::ID, &update.to_bytes()?)?;
    }

    // A client action the server runs and forwards to other peers.
    server.reconciler.actions_mut().register("Ping", |inv| {
        tracing::info!(entity = %inv.entity, params = ?inv.parameters_lossy(), "server got Ping");
    });
    let action = client.reconciler.trigger_action(
        &client.scene,
        assigned,
        "Ping",
        ExecutionType::SERVER | ExecutionType::PEERS,
        vec!["hello".into()],
    )?;
    if let Some(action) = action {
        server.deliver(EntityAction::ID, &action.to_bytes()?)?;
    }

    let server_entity = server
        .scene
        .entity(assigned)
        .context("server lost the entity")?;
    let client_entity = client
        .scene
        .entity(assigned)
        .context("client did not adopt the assigned id")?;
    anyhow::ensure!(
        server_entity.components().eq(client_entity.components()),
        "component state diverged"
    );

    println!(
        "entity {temp} is now {assigned} on both peers with {} components",
        client_entity.component_count()
    );
    println!(
        "server report: {}",
        serde_json::to_string(server.reconciler.last_report())?
    );
    Ok(())
}
