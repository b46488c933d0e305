// src/physics.rs
// ==============================================================================
// Rapier world hosting the tracked vehicles.
// ------------------------------------------------------------------------------
// - terrain: a fixed heightfield built from seeded noise, plus a mud pad
// - hulls: kinematic bodies; their pose comes from the track core, not from
//   rapier's solver
// - suspension rays: answered by RapierProbe against GROUP_GROUND
//
// Tick:
// 1) every vehicle steps its VehicleStepper with a RapierProbe
// 2) the host integrates hull pose from the StepOutput
// 3) kinematic targets are pushed and rapier steps (keeps the query
//    pipeline and broad phase current)
// ==============================================================================

use std::collections::HashMap;

use anyhow::Result;
use log::{info, warn};
use nalgebra::{DMatrix, UnitQuaternion, Vector3};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rapier3d::prelude::*;

use track_physics::track_sim::{SurfaceKind, VehicleConfig, VehicleInput};

use crate::debug_builders::DebugOverlay;
use crate::spawn::SpawnManager;
use crate::suspension_contact::RapierProbe;
use crate::vehicle::TrackedVehicle;

pub const GROUP_GROUND: Group = Group::from_bits_truncate(0b0001);
pub const GROUP_CHASSIS: Group = Group::from_bits_truncate(0b0010);

const TERRAIN_SIZE: f32 = 400.0;       // m, square
const TERRAIN_CELLS: usize = 128;
const TERRAIN_FLAT_RADIUS: f32 = 30.0; // m around the origin kept level
const WORLD_BOUND: f32 = 1_000.0;      // m, beyond this a hull is reset
const SPAWN_DROP: f32 = 0.6;           // m above terrain

// Half extents of the hull collider.
const HULL_HALF_EXTENTS: [f32; 3] = [1.6, 0.6, 3.2];

/// A few random plane waves summed into rolling hills.
#[derive(Debug, Clone)]
pub struct Terrain {
    waves: Vec<[f32; 4]>, // amplitude, kx, kz, phase
}

impl Terrain {
    pub fn generate(seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let waves = (0..6)
            .map(|_| {
                let wavelength = rng.gen_range(25.0..90.0);
                let heading: f32 = rng.gen_range(0.0..std::f32::consts::TAU);
                let k = std::f32::consts::TAU / wavelength;
                [
                    rng.gen_range(0.2..1.2),
                    k * heading.cos(),
                    k * heading.sin(),
                    rng.gen_range(0.0..std::f32::consts::TAU),
                ]
            })
            .collect();
        Self { waves }
    }

    pub fn height(&self, x: f32, z: f32) -> f32 {
        let raw: f32 = self
            .waves
            .iter()
            .map(|[a, kx, kz, phase]| a * (kx * x + kz * z + phase).sin())
            .sum();

        // fade the hills out toward the spawn area
        let r = (x * x + z * z).sqrt() / TERRAIN_FLAT_RADIUS;
        let t = (r - 1.0).clamp(0.0, 1.0);
        raw * t * t * (3.0 - 2.0 * t)
    }
}

pub struct PhysicsWorld {
    pub gravity: Vector<Real>,
    pub pipeline: PhysicsPipeline,
    pub island_manager: IslandManager,
    pub broad_phase: DefaultBroadPhase,
    pub narrow_phase: NarrowPhase,
    pub bodies: RigidBodySet,
    pub colliders: ColliderSet,
    pub joints: ImpulseJointSet,
    pub multibody_joints: MultibodyJointSet,
    pub ccd: CCDSolver,
    pub query_pipeline: QueryPipeline, // suspension raycasts
    pub terrain: Terrain,
    pub vehicles: HashMap<String, TrackedVehicle>, // playerId -> vehicle
    pub spawns: SpawnManager,
    pub vehicle_config: VehicleConfig,
    pub debug_overlays: HashMap<String, DebugOverlay>,
}

impl PhysicsWorld {
    pub fn new(vehicle_config: VehicleConfig, terrain_seed: u64) -> Self {
        let mut bodies = RigidBodySet::new();
        let mut colliders = ColliderSet::new();
        let terrain = Terrain::generate(terrain_seed);

        // === 1. Heightfield ground ===
        let n = TERRAIN_CELLS + 1;
        let heights = DMatrix::from_fn(n, n, |row, col| {
            let x = (col as f32 / TERRAIN_CELLS as f32 - 0.5) * TERRAIN_SIZE;
            let z = (row as f32 / TERRAIN_CELLS as f32 - 0.5) * TERRAIN_SIZE;
            terrain.height(x, z)
        });

        let ground = bodies.insert(RigidBodyBuilder::fixed().build());
        let heightfield = ColliderBuilder::heightfield(heights, vector![TERRAIN_SIZE, 1.0, TERRAIN_SIZE])
            .collision_groups(InteractionGroups::new(GROUP_GROUND, GROUP_CHASSIS))
            .friction(1.0)
            .user_data(SurfaceKind::Dirt.tag())
            .build();
        colliders.insert_with_parent(heightfield, ground, &mut bodies);

        // === 2. Mud pad on the flat spawn area, a little ahead of the line ===
        let mud = ColliderBuilder::cuboid(8.0, 0.05, 8.0)
            .translation(vector![0.0, 0.0, 18.0])
            .collision_groups(InteractionGroups::new(GROUP_GROUND, GROUP_CHASSIS))
            .user_data(SurfaceKind::Mud.tag())
            .build();
        colliders.insert_with_parent(mud, ground, &mut bodies);

        let mut query_pipeline = QueryPipeline::new();
        query_pipeline.update(&colliders);

        info!(
            "terrain seed {terrain_seed}: bodies = {}, colliders = {}",
            bodies.len(),
            colliders.len()
        );

        Self {
            gravity: vector![0.0, -9.81, 0.0],
            pipeline: PhysicsPipeline::new(),
            island_manager: IslandManager::new(),
            broad_phase: DefaultBroadPhase::new(),
            narrow_phase: NarrowPhase::new(),
            bodies,
            colliders,
            joints: ImpulseJointSet::new(),
            multibody_joints: MultibodyJointSet::new(),
            ccd: CCDSolver::new(),
            query_pipeline,
            terrain,
            vehicles: HashMap::new(),
            spawns: SpawnManager::new(8, 8.0),
            vehicle_config: vehicle_config.validated(),
            debug_overlays: HashMap::new(),
        }
    }

    /// Load the vehicle setup from `path` when given, else the tank preset.
    pub fn with_config_file(path: Option<&str>, terrain_seed: u64) -> Result<Self> {
        let config = match path {
            Some(path) => {
                info!("loading vehicle config from {path}");
                VehicleConfig::from_json_file(path)?
            }
            None => VehicleConfig::tank(),
        };
        Ok(Self::new(config, terrain_seed))
    }

    /// Spawn a tank for this player:
    /// - kinematic hull body with a box collider (not part of GROUP_GROUND)
    /// - dropped slightly above the terrain so the suspension settles it
    pub fn spawn_vehicle_for_player(&mut self, id: &str) {
        if self.vehicles.contains_key(id) {
            return;
        }

        let spawn = self.spawns.allocate_spawn(id);
        let [x, z] = spawn.position;
        let y = self.terrain.height(x, z) + SPAWN_DROP;
        let pose = Isometry::from_parts(
            vector![x, y, z].into(),
            UnitQuaternion::from_axis_angle(&Vector3::y_axis(), spawn.heading),
        );

        let rb = RigidBodyBuilder::kinematic_position_based().position(pose).build();
        let handle = self.bodies.insert(rb);

        let [hx, hy, hz] = HULL_HALF_EXTENTS;
        let collider = ColliderBuilder::cuboid(hx, hy, hz)
            .translation(vector![0.0, hy + 0.2, 0.0])
            .collision_groups(InteractionGroups::new(GROUP_CHASSIS, GROUP_GROUND))
            .build();
        self.colliders.insert_with_parent(collider, handle, &mut self.bodies);

        let vehicle = TrackedVehicle::new(id.to_string(), handle, self.vehicle_config.clone(), pose);
        self.vehicles.insert(id.to_string(), vehicle);

        info!(
            "spawned tank for {id} in slot {} at ({x:.1}, {y:.2}, {z:.1}), {} on the field",
            spawn.slot,
            self.spawns.occupied()
        );
    }

    pub fn remove_vehicle(&mut self, id: &str) {
        let Some(vehicle) = self.vehicles.remove(id) else {
            return;
        };
        self.bodies.remove(
            vehicle.body,
            &mut self.island_manager,
            &mut self.colliders,
            &mut self.joints,
            &mut self.multibody_joints,
            true,
        );
        self.spawns.release(id);
        self.debug_overlays.remove(id);
        info!("removed tank for {id}");
    }

    // ------------------------------------------------------------------
    // Player commands
    // ------------------------------------------------------------------

    pub fn set_input(&mut self, id: &str, input: VehicleInput) {
        if let Some(v) = self.vehicles.get_mut(id) {
            v.input = input;
        }
    }

    pub fn shift_gear(&mut self, id: &str, up: bool) {
        if let Some(v) = self.vehicles.get_mut(id) {
            v.stepper.shift_gear(up);
        }
    }

    pub fn select_gear(&mut self, id: &str, index: usize) {
        if let Some(v) = self.vehicles.get_mut(id) {
            v.stepper.select_gear(index);
        }
    }

    pub fn set_debug(&mut self, id: &str, enabled: bool) {
        if let Some(v) = self.vehicles.get_mut(id) {
            v.stepper.show_debug(enabled);
        }
        if !enabled {
            self.debug_overlays.remove(id);
        }
    }

    // ------------------------------------------------------------------
    // Tick
    // ------------------------------------------------------------------

    pub fn step(&mut self, dt: Real) {
        // 1) + 2) track core and hull integration
        for vehicle in self.vehicles.values_mut() {
            let mut probe = RapierProbe::new(
                &self.query_pipeline,
                &self.bodies,
                &self.colliders,
                Some(vehicle.body),
            );
            let pose = vehicle.pose;
            let out = vehicle.stepper.step(dt, vehicle.input, &pose, &mut probe);
            vehicle.integrate(&out, dt);

            if vehicle.stepper.is_debug() {
                let overlay = self
                    .debug_overlays
                    .entry(vehicle.id.clone())
                    .or_insert_with(|| DebugOverlay::new(&vehicle.id));
                vehicle.stepper.report_to(overlay);
                overlay.push_rays(&vehicle.stepper.suspension_rays(&pose));
            }

            // Safety: never let a hull wander off to insane coordinates
            if vehicle.is_lost(WORLD_BOUND) {
                warn!("tank {} left the world, resetting to spawn", vehicle.id);
                vehicle.reset_to_spawn();
            }
        }

        // 3) kinematic targets + rapier step
        for vehicle in self.vehicles.values() {
            if let Some(body) = self.bodies.get_mut(vehicle.body) {
                body.set_next_kinematic_position(vehicle.pose);
            }
        }

        let hooks = ();
        let events = ();
        self.pipeline.step(
            &self.gravity,
            &IntegrationParameters { dt, ..IntegrationParameters::default() },
            &mut self.island_manager,
            &mut self.broad_phase,
            &mut self.narrow_phase,
            &mut self.bodies,
            &mut self.colliders,
            &mut self.joints,
            &mut self.multibody_joints,
            &mut self.ccd,
            Some(&mut self.query_pipeline),
            &hooks,
            &events,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terrain_is_reproducible_and_flat_at_spawn() {
        let a = Terrain::generate(7);
        let b = Terrain::generate(7);
        assert_eq!(a.height(120.0, -40.0), b.height(120.0, -40.0));
        assert_eq!(a.height(0.0, 0.0), 0.0);
        assert_eq!(a.height(10.0, 20.0), 0.0);
    }

    #[test]
    fn idle_tank_settles_on_the_ground() {
        let mut world = PhysicsWorld::new(VehicleConfig::tank(), 1);
        world.spawn_vehicle_for_player("p1");
        for _ in 0..240 {
            world.step(1.0 / 60.0);
        }

        let tank = &world.vehicles["p1"];
        let y = tank.pose.translation.vector.y;
        assert!(y > 0.35 && y < 0.6, "hull height {y}");
        assert!(tank.vertical_velocity.abs() < 0.05);
        assert_eq!(tank.stepper.last_output().active_friction_points, 12);
    }

    #[test]
    fn removed_tank_frees_its_slot() {
        let mut world = PhysicsWorld::new(VehicleConfig::tank(), 1);
        world.spawn_vehicle_for_player("p1");
        world.remove_vehicle("p1");
        assert!(world.vehicles.is_empty());
        assert_eq!(world.spawns.occupied(), 0);
    }
}
