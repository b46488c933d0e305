use nalgebra::{UnitQuaternion, Vector3};
use rapier3d::prelude::*;

use track_physics::track_sim::{StepOutput, VehicleConfig, VehicleInput, VehicleStepper};

pub const GRAVITY: f32 = 9.81; // m/s^2

/// One player's tank: the track core plus the hull pose the host integrates.
pub struct TrackedVehicle {
    pub id: String,
    pub body: RigidBodyHandle,     // kinematic hull, so the hull shows up in the rapier world
    pub stepper: VehicleStepper,
    pub pose: Isometry<Real>,      // hull pose, world
    pub vertical_velocity: f32,    // m/s
    pub input: VehicleInput,
    pub mass: f32,                 // kg, hull + tracks
    pub spawn_pose: Isometry<Real>,
}

impl TrackedVehicle {
    pub fn new(id: String, body: RigidBodyHandle, config: VehicleConfig, pose: Isometry<Real>) -> Self {
        let stepper = VehicleStepper::new(config);
        let mass = stepper.config().total_mass();
        Self {
            id,
            body,
            stepper,
            pose,
            vertical_velocity: 0.0,
            input: VehicleInput::default(),
            mass,
            spawn_pose: pose,
        }
    }

    /// Hull integration from the core's outputs:
    /// - vertical: suspension force against gravity
    /// - horizontal: forward speed along the hull heading
    /// - yaw: rotation about world up
    pub fn integrate(&mut self, out: &StepOutput, dt: f32) {
        let lift = out.suspension_force.y / self.mass;
        self.vertical_velocity += (lift - GRAVITY) * dt;

        let mut translation = self.pose.translation.vector;
        translation.x += out.linear_velocity.x * dt;
        translation.z += out.linear_velocity.z * dt;
        translation.y += self.vertical_velocity * dt;

        let turn = UnitQuaternion::from_axis_angle(&Vector3::y_axis(), out.yaw_rate * dt);
        self.pose = Isometry::from_parts(translation.into(), turn * self.pose.rotation);
    }

    pub fn reset_to_spawn(&mut self) {
        self.pose = self.spawn_pose;
        self.vertical_velocity = 0.0;
        let config = self.stepper.config().as_ref().clone();
        let debug = self.stepper.is_debug();
        self.stepper = VehicleStepper::new(config);
        self.stepper.show_debug(debug);
    }

    pub fn is_lost(&self, bound: f32) -> bool {
        let p = self.pose.translation.vector;
        !p.iter().all(|x| x.is_finite()) || p.iter().any(|x| x.abs() > bound)
    }
}
