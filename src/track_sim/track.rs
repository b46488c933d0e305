// ==============================================================================
// track.rs — PER-SIDE TRACK DYNAMICS
// ------------------------------------------------------------------------------
// Each track is a single rotating body (sprocket + track + share of the hull)
// with angular velocity ω and moment of inertia `moi`.
//
// Integration per tick:
//     ω += drive / moi * dt
//     ω  = decay_toward_zero(ω, (friction + rolling + brake) / moi * dt)
//
// Resistances are magnitudes and only ever pull ω toward zero. They cannot
// flip the rotation, and at rest they hold the track (stiction) until drive
// torque exceeds them.
//
// Steering is skid-steer: a differential split of the drive torque plus extra
// brake on the slower track.
// ==============================================================================

use nalgebra::Vector3;
use serde::Serialize;

use crate::track_sim::types::{Side, sign, v3};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrackState {
    pub input: f32,                 // throttle share fed to this track
    pub torque_transfer: f32,       // differential split multiplier
    pub drive_torque: f32,          // N*m
    pub friction_torque: f32,       // N*m, magnitude
    pub rolling_friction_torque: f32, // N*m, magnitude
    pub brake_ratio: f32,           // 0..1
    pub linear_velocity: f32,       // m/s
    pub angular_velocity: f32,      // rad/s
    pub drive_force: Vector3<f32>,  // N, world
}

impl Default for TrackState {
    fn default() -> Self {
        Self {
            input: 0.0,
            torque_transfer: 1.0,
            drive_torque: 0.0,
            friction_torque: 0.0,
            rolling_friction_torque: 0.0,
            brake_ratio: 0.0,
            linear_velocity: 0.0,
            angular_velocity: 0.0,
            drive_force: Vector3::zeros(),
        }
    }
}

/// Serializable per-track readout.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TrackInfo {
    pub side: Side,
    pub input: f32,
    pub torque_transfer: f32,
    pub drive_torque: f32,
    pub friction_torque: f32,
    pub rolling_friction_torque: f32,
    pub brake_ratio: f32,
    pub linear_velocity: f32,
    pub angular_velocity: f32,
    pub drive_force: [f32; 3],
    pub active_friction_points: usize,
}

impl TrackState {
    pub fn info(&self, side: Side, active_friction_points: usize) -> TrackInfo {
        TrackInfo {
            side,
            input: self.input,
            torque_transfer: self.torque_transfer,
            drive_torque: self.drive_torque,
            friction_torque: self.friction_torque,
            rolling_friction_torque: self.rolling_friction_torque,
            brake_ratio: self.brake_ratio,
            linear_velocity: self.linear_velocity,
            angular_velocity: self.angular_velocity,
            drive_force: v3(&self.drive_force),
            active_friction_points,
        }
    }

    pub fn is_finite(&self) -> bool {
        [
            self.input,
            self.torque_transfer,
            self.drive_torque,
            self.friction_torque,
            self.rolling_friction_torque,
            self.brake_ratio,
            self.linear_velocity,
            self.angular_velocity,
        ]
        .iter()
        .all(|x| x.is_finite())
            && self.drive_force.iter().all(|x| x.is_finite())
    }

    /// Back to rest.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Integrate one tick. The brake acts at `brake_force * self.brake_ratio`.
    pub fn step(
        &mut self,
        drive_torque: f32,
        friction_torque: f32,
        rolling_friction_torque: f32,
        brake_force: f32,
        moment_of_inertia: f32,
        sprocket_radius: f32,
        dt: f32,
    ) {
        self.drive_torque = drive_torque;
        self.friction_torque = friction_torque.max(0.0);
        self.rolling_friction_torque = rolling_friction_torque.max(0.0);

        if moment_of_inertia <= 0.0 || dt <= 0.0 {
            return;
        }

        let mut omega = self.angular_velocity + drive_torque / moment_of_inertia * dt;
        let resist = self.friction_torque + self.rolling_friction_torque;
        omega = decay_toward_zero(omega, resist / moment_of_inertia * dt);
        omega += apply_brake(dt, omega, brake_force, self.brake_ratio, moment_of_inertia);

        self.angular_velocity = omega;
        self.linear_velocity = omega * sprocket_radius;
    }
}

/// Move `value` toward zero by `amount` without crossing it.
#[inline]
pub fn decay_toward_zero(value: f32, amount: f32) -> f32 {
    let amount = amount.max(0.0);
    if value > 0.0 {
        (value - amount).max(0.0)
    } else if value < 0.0 {
        (value + amount).min(0.0)
    } else {
        0.0
    }
}

/// Δω of a brake acting alone for one tick. Never overshoots zero.
pub fn apply_brake(
    dt: f32,
    angular_velocity: f32,
    brake_force: f32,
    ratio: f32,
    moment_of_inertia: f32,
) -> f32 {
    if moment_of_inertia <= 0.0 || dt <= 0.0 {
        return 0.0;
    }
    let max_delta = brake_force.max(0.0) * ratio.clamp(0.0, 1.0) * dt / moment_of_inertia;
    decay_toward_zero(angular_velocity, max_delta) - angular_velocity
}

/// Split the base drive torque between (left, right) for a steering input.
/// Positive steering moves torque to the right track.
pub fn differential_split(base_torque: f32, steering: f32, transfer: f32) -> (f32, f32) {
    let shift = steering.clamp(-1.0, 1.0) * transfer.clamp(0.0, 1.0);
    (base_torque * (1.0 - shift), base_torque * (1.0 + shift))
}

/// Extra brake ratio per side ([left, right]) on the less-driven track.
pub fn steering_brake(steering: f32, factor: f32) -> [f32; 2] {
    let extra = factor.max(0.0) * steering.abs().min(1.0);
    match sign(steering) {
        s if s > 0.0 => [extra, 0.0],
        s if s < 0.0 => [0.0, extra],
        _ => [0.0, 0.0],
    }
}

/// Traction force of one track: drive pushed along the hull forward axis
/// projected onto the ground, scaled by how many of its wheels touch.
pub fn drive_force(
    forward: &Vector3<f32>,
    ground_normal: &Vector3<f32>,
    drive_torque: f32,
    sprocket_radius: f32,
    active_points: usize,
    wheel_count: usize,
) -> Vector3<f32> {
    if active_points == 0 || wheel_count == 0 || sprocket_radius <= 0.0 {
        return Vector3::zeros();
    }

    let normal = ground_normal.try_normalize(1e-6).unwrap_or_else(Vector3::y);
    let along_ground = forward - normal * forward.dot(&normal);
    let Some(dir) = along_ground.try_normalize(1e-6) else {
        return Vector3::zeros();
    };

    let contact = active_points.min(wheel_count) as f32 / wheel_count as f32;
    dir * (drive_torque / sprocket_radius) * contact
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPS: f32 = 1e-5;

    #[test]
    fn decay_never_crosses_zero() {
        assert_eq!(decay_toward_zero(1.0, 0.25), 0.75);
        assert_eq!(decay_toward_zero(1.0, 5.0), 0.0);
        assert_eq!(decay_toward_zero(-1.0, 5.0), 0.0);
        assert_eq!(decay_toward_zero(-1.0, 0.5), -0.5);
        assert_eq!(decay_toward_zero(0.0, 1.0), 0.0);
    }

    #[test]
    fn brake_delta_is_bounded_and_opposes_rotation() {
        let d = apply_brake(0.1, 10.0, 100.0, 1.0, 10.0);
        assert!((d + 1.0).abs() < EPS);

        let d = apply_brake(0.1, -0.5, 100.0, 1.0, 10.0);
        assert!((d - 0.5).abs() < EPS, "stops exactly at zero");

        assert_eq!(apply_brake(0.1, 3.0, 100.0, 0.0, 10.0), 0.0);
        assert_eq!(apply_brake(0.0, 3.0, 100.0, 1.0, 10.0), 0.0);
    }

    #[test]
    fn split_moves_torque_toward_outer_track() {
        let (l, r) = differential_split(100.0, 1.0, 0.4);
        assert!((l - 60.0).abs() < EPS && (r - 140.0).abs() < EPS);

        let (l, r) = differential_split(100.0, 0.0, 0.4);
        assert_eq!(l, r);

        let (l, r) = differential_split(100.0, -0.5, 0.4);
        assert!(l > r);
        assert!((l + r - 200.0).abs() < EPS);
    }

    #[test]
    fn steering_brake_hits_inner_track() {
        assert_eq!(steering_brake(1.0, 0.7), [0.7, 0.0]);
        assert_eq!(steering_brake(-0.5, 0.7), [0.0, 0.35]);
        assert_eq!(steering_brake(0.0, 0.7), [0.0, 0.0]);
    }

    #[test]
    fn step_matches_net_torque_without_zero_crossing() {
        let mut t = TrackState { angular_velocity: 5.0, brake_ratio: 0.5, ..TrackState::default() };
        t.step(1000.0, 100.0, 50.0, 100.0, 100.0, 0.3, 0.1);
        // net = 1000 - 100 - 50 - 100 * 0.5 = 800 -> Δω = 0.8
        assert!((t.angular_velocity - 5.8).abs() < EPS);
        assert!((t.linear_velocity - 5.8 * 0.3).abs() < EPS);
    }

    #[test]
    fn resistance_holds_track_at_rest() {
        let mut t = TrackState::default();
        t.step(100.0, 300.0, 0.0, 0.0, 10.0, 0.3, 0.1);
        assert_eq!(t.angular_velocity, 0.0);
    }

    #[test]
    fn full_brake_stops_without_reversing() {
        let mut t = TrackState { angular_velocity: 1.0, brake_ratio: 1.0, ..TrackState::default() };
        t.step(0.0, 0.0, 0.0, 1.0e6, 100.0, 0.3, 0.1);
        assert_eq!(t.angular_velocity, 0.0);

        t.brake_ratio = 0.0;
        t.step(0.0, 0.0, 0.0, 1.0e6, 100.0, 0.3, 0.1);
        assert_eq!(t.angular_velocity, 0.0);
    }

    #[test]
    fn degenerate_step_keeps_velocity() {
        let mut t = TrackState { angular_velocity: 2.0, ..TrackState::default() };
        t.step(1000.0, 0.0, 0.0, 0.0, 0.0, 0.3, 0.1);
        assert_eq!(t.angular_velocity, 2.0);
        assert!(t.is_finite());
    }

    #[test]
    fn drive_force_follows_slope_and_contact() {
        let fwd = Vector3::z();
        let slope = Vector3::new(0.0, 1.0, -1.0).normalize();
        let f = drive_force(&fwd, &slope, 300.0, 0.3, 3, 6);
        assert!(f.dot(&slope).abs() < 1e-3);
        assert!((f.norm() - 500.0).abs() < 1e-2);
        assert!(f.z > 0.0 && f.y > 0.0);

        assert_eq!(drive_force(&fwd, &Vector3::y(), 300.0, 0.3, 0, 6), Vector3::zeros());
    }
}
