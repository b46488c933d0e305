use std::collections::HashMap;

use log::error;
use serde::Serialize;
use tokio::sync::mpsc::UnboundedSender;

use track_physics::track_sim::{VehicleInput, VehicleSnapshot};

use crate::debug_builders::DebugOverlay;
use crate::physics::PhysicsWorld;

/// Discrete requests queued by the socket task, applied on the next tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Command {
    Shift { up: bool },
    SelectGear(usize),
    Debug(bool),
}

pub struct Player {
    pub id: String,
    pub input: VehicleInput,
    pub commands: Vec<Command>,
}

#[derive(Serialize)]
pub struct VehicleView {
    pub id: String,
    pub position: [f32; 3],
    pub rotation: [f32; 4], // quaternion i, j, k, w
    pub state: VehicleSnapshot,
}

#[derive(Serialize)]
pub struct Snapshot<'a> {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub tick: u64,
    pub vehicles: Vec<VehicleView>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub debug: Vec<&'a DebugOverlay>,
}

pub struct SharedGameState {
    pub tick: u64,
    pub clients: HashMap<String, UnboundedSender<String>>,
    pub players: HashMap<String, Player>,
}

impl SharedGameState {
    pub fn new() -> Self {
        Self {
            tick: 0,
            clients: HashMap::new(),
            players: HashMap::new(),
        }
    }

    pub fn register_client(&mut self, id: &str, tx: UnboundedSender<String>) {
        self.clients.insert(id.to_string(), tx);
        self.players.insert(
            id.to_string(),
            Player { id: id.to_string(), input: VehicleInput::default(), commands: Vec::new() },
        );
    }

    pub fn remove_client(&mut self, id: &str) {
        self.clients.remove(id);
        self.players.remove(id);
    }

    pub fn update_input(&mut self, id: &str, input: VehicleInput) {
        if let Some(p) = self.players.get_mut(id) {
            p.input = input;
        }
    }

    pub fn push_command(&mut self, id: &str, command: Command) {
        if let Some(p) = self.players.get_mut(id) {
            p.commands.push(command);
        }
    }

    /// Spawn missing tanks, drop orphaned ones, hand inputs and queued
    /// commands to the physics world.
    pub fn sync_into(&mut self, physics: &mut PhysicsWorld) {
        let orphans: Vec<String> = physics
            .vehicles
            .keys()
            .filter(|id| !self.players.contains_key(*id))
            .cloned()
            .collect();
        for id in orphans {
            physics.remove_vehicle(&id);
        }

        for player in self.players.values_mut() {
            physics.spawn_vehicle_for_player(&player.id);
            physics.set_input(&player.id, player.input);

            for command in player.commands.drain(..) {
                match command {
                    Command::Shift { up } => physics.shift_gear(&player.id, up),
                    Command::SelectGear(index) => physics.select_gear(&player.id, index),
                    Command::Debug(enabled) => physics.set_debug(&player.id, enabled),
                }
            }
        }
    }

    /// Build and send a snapshot of all vehicles to all clients.
    pub fn broadcast_snapshot(&self, physics: &PhysicsWorld) {
        let vehicles = physics
            .vehicles
            .values()
            .map(|v| {
                let t = v.pose.translation.vector;
                let q = v.pose.rotation.coords;
                VehicleView {
                    id: v.id.clone(),
                    position: [t.x, t.y, t.z],
                    rotation: [q.x, q.y, q.z, q.w],
                    state: v.stepper.snapshot(),
                }
            })
            .collect();

        let snapshot = Snapshot {
            kind: "snapshot",
            tick: self.tick,
            vehicles,
            debug: physics.debug_overlays.values().collect(),
        };

        let json = match serde_json::to_string(&snapshot) {
            Ok(json) => json,
            Err(e) => {
                error!("snapshot serialization failed: {e}");
                return;
            }
        };

        for tx in self.clients.values() {
            let _ = tx.send(json.clone());
        }
    }
}
