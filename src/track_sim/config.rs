// ==============================================================================
// config.rs — VEHICLE SETUP (IMMUTABLE AFTER VALIDATION)
// ------------------------------------------------------------------------------
// Plain serde structs. Every field has a default (the tank preset), so a JSON
// file only needs the values it overrides.
//
// validated() is the single place where bad setup is repaired: masses, radius,
// gear thresholds, torque curve, etc. are clamped to something simulable and a
// warning is logged. The simulation never refuses to run.
// ==============================================================================

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use log::warn;
use nalgebra::{Isometry3, Translation3, UnitQuaternion, Vector3};
use serde::{Deserialize, Serialize};

use crate::track_sim::friction::FrictionEllipse;
use crate::track_sim::types::Side;

pub const MIN_MASS: f32 = 1.0;                 // kg
pub const MIN_SPROCKET_RADIUS: f32 = 0.01;     // m
pub const MIN_TRACK_SEPARATION: f32 = 0.1;     // m

// ============================================
// Suspension
// ============================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SuspensionConfig {
    /// Inherit the mount pose from this bone when a pose provider is attached.
    pub bone: Option<String>,
    pub location: [f32; 3],   // hull space, m
    pub rotation: [f32; 3],   // roll, pitch, yaw (rad)
    pub side: Side,
    pub length: f32,          // max travel, m
    pub collision_radius: f32,// m
    pub stiffness: f32,       // N/m
    pub damping: f32,         // N*s/m
}

impl Default for SuspensionConfig {
    fn default() -> Self {
        Self {
            bone: None,
            location: [0.0; 3],
            rotation: [0.0; 3],
            side: Side::Left,
            length: 0.25,
            collision_radius: 0.35,
            stiffness: 450_000.0,
            damping: 25_000.0,
        }
    }
}

impl SuspensionConfig {
    /// Static mount pose in hull space.
    pub fn mount_pose(&self) -> Isometry3<f32> {
        let [x, y, z] = self.location;
        let [roll, pitch, yaw] = self.rotation;
        Isometry3::from_parts(
            Translation3::new(x, y, z),
            UnitQuaternion::from_euler_angles(roll, pitch, yaw),
        )
    }

    /// Furthest a suspension ray has to reach.
    pub fn ray_length(&self) -> f32 {
        self.length + self.collision_radius
    }
}

// ============================================
// Gears
// ============================================

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GearConfig {
    /// Torque multiplication. Negative is reverse, zero is neutral.
    pub ratio: f32,
    /// rpm / max_rpm low enough to gear down.
    pub down_ratio: f32,
    /// rpm / max_rpm high enough to gear up.
    pub up_ratio: f32,
}

impl Default for GearConfig {
    fn default() -> Self {
        Self { ratio: 0.0, down_ratio: 0.15, up_ratio: 0.9 }
    }
}

impl GearConfig {
    pub fn new(ratio: f32, down_ratio: f32, up_ratio: f32) -> Self {
        Self { ratio, down_ratio, up_ratio }
    }

    pub fn is_forward(&self) -> bool { self.ratio > 0.0 }
    pub fn is_reverse(&self) -> bool { self.ratio < 0.0 }
    pub fn is_neutral(&self) -> bool { self.ratio == 0.0 }
}

// ============================================
// Vehicle
// ============================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VehicleConfig {
    // --- Running gear ---
    pub sprocket_mass: f32,         // kg
    pub sprocket_radius: f32,       // m
    pub track_mass: f32,            // kg (per track)
    pub hull_mass: f32,             // kg, reflected onto the tracks as inertia
    pub track_separation: f32,      // m, left to right track centerline

    // --- Suspension ---
    pub suspension: Vec<SuspensionConfig>,
    pub stiffness_factor: f32,      // global multiplier
    pub damping_factor: f32,        // global multiplier

    // --- Gearbox ---
    pub gears: Vec<GearConfig>,
    pub auto_gear: bool,
    pub gear_auto_box_latency: f32, // s between automatic shifts

    // --- Brakes ---
    pub auto_brake: bool,
    pub brake_force: f32,           // N*m per track at ratio 1
    pub steering_brake_factor: f32, // extra brake ratio on the inner track at full steer
    pub steering_brake_transfer: f32, // 0..1 drive torque moved to the outer track
    pub steering_stabilizer: bool,
    pub auto_brake_stable_transfer: f32, // 0..1

    // --- Engine ---
    pub throttle_up_ratio: f32,     // 1/s
    pub throttle_down_ratio: f32,   // 1/s
    pub differential_ratio: f32,
    pub transmission_efficiency: f32, // 0..1
    pub engine_torque_curve: Vec<(f32, f32)>, // (rpm, N*m)
    pub engine_extra_power_ratio: f32,

    // --- Friction ---
    pub static_friction_ellipse: FrictionEllipse,
    pub kinetic_friction_ellipse: FrictionEllipse,
    pub friction_slip_threshold: f32, // m/s, static -> kinetic
    pub friction_torque_coefficient: f32,
    pub rolling_friction_coefficient: f32,
    pub rolling_velocity_coefficient: f32, // per m/s

    // --- Debug ---
    pub show_debug: bool,
    pub debug_gearbox: bool,
}

impl Default for VehicleConfig {
    fn default() -> Self {
        Self::tank()
    }
}

impl VehicleConfig {
    /// Medium tank, six road wheels per side.
    pub fn tank() -> Self {
        let wheel_z = [-2.0, -1.2, -0.4, 0.4, 1.2, 2.0];
        let half_separation = 1.3;

        let suspension = Side::BOTH
            .iter()
            .flat_map(|&side| {
                let x = match side {
                    Side::Left => half_separation,
                    Side::Right => -half_separation,
                };
                wheel_z.iter().map(move |&z| SuspensionConfig {
                    location: [x, 0.0, z],
                    side,
                    ..SuspensionConfig::default()
                })
            })
            .collect();

        Self {
            sprocket_mass: 65.0,
            sprocket_radius: 0.3,
            track_mass: 600.0,
            hull_mass: 26_000.0,
            track_separation: 2.0 * half_separation,

            suspension,
            stiffness_factor: 1.0,
            damping_factor: 1.0,

            gears: vec![
                GearConfig::new(-5.0, 0.2, 0.9),
                GearConfig::new(0.0, 0.2, 0.6),
                GearConfig::new(5.0, 0.2, 0.9),
                GearConfig::new(3.2, 0.3, 0.9),
                GearConfig::new(2.1, 0.35, 0.9),
                GearConfig::new(1.4, 0.35, 0.9),
            ],
            auto_gear: true,
            gear_auto_box_latency: 0.6,

            auto_brake: true,
            brake_force: 30_000.0,
            steering_brake_factor: 0.7,
            steering_brake_transfer: 0.4,
            steering_stabilizer: true,
            auto_brake_stable_transfer: 0.3,

            throttle_up_ratio: 8.0,
            throttle_down_ratio: 4.0,
            differential_ratio: 3.2,
            transmission_efficiency: 0.9,
            engine_torque_curve: vec![
                (600.0, 1300.0),
                (1200.0, 1600.0),
                (1800.0, 1700.0),
                (2400.0, 1400.0),
                (2800.0, 0.0),
            ],
            engine_extra_power_ratio: 0.2,

            static_friction_ellipse: FrictionEllipse::new(0.9, 1.1),
            kinetic_friction_ellipse: FrictionEllipse::new(0.6, 0.8),
            friction_slip_threshold: 0.5,
            friction_torque_coefficient: 0.02,
            rolling_friction_coefficient: 0.015,
            rolling_velocity_coefficient: 0.002,

            show_debug: false,
            debug_gearbox: false,
        }
    }

    /// Load a JSON override file. Missing fields keep the tank defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)
            .with_context(|| format!("reading vehicle config {}", path.display()))?;
        Self::from_json_str(&text)
            .with_context(|| format!("parsing vehicle config {}", path.display()))
    }

    pub fn from_json_str(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Sprocket disc + track hoop + the share of hull mass each track carries,
    /// all reflected through the sprocket radius.
    pub fn moment_of_inertia(&self) -> f32 {
        let r2 = self.sprocket_radius * self.sprocket_radius;
        0.5 * self.sprocket_mass * r2 + (self.track_mass + 0.5 * self.hull_mass) * r2
    }

    pub fn total_mass(&self) -> f32 {
        self.hull_mass + 2.0 * (self.track_mass + self.sprocket_mass)
    }

    /// First zero-ratio gear; falls back to the first forward gear, then 0.
    pub fn neutral_gear(&self) -> usize {
        self.gears
            .iter()
            .position(GearConfig::is_neutral)
            .or_else(|| self.gears.iter().position(GearConfig::is_forward))
            .unwrap_or(0)
    }

    pub fn wheels_on(&self, side: Side) -> usize {
        self.suspension.iter().filter(|s| s.side == side).count()
    }

    /// Repair anything that would make the vehicle unsimulable.
    pub fn validated(mut self) -> Self {
        self.sprocket_mass = at_least("sprocket_mass", self.sprocket_mass, MIN_MASS);
        self.track_mass = at_least("track_mass", self.track_mass, MIN_MASS);
        self.hull_mass = at_least("hull_mass", self.hull_mass, 0.0);
        self.sprocket_radius = at_least("sprocket_radius", self.sprocket_radius, MIN_SPROCKET_RADIUS);
        self.track_separation = at_least("track_separation", self.track_separation, MIN_TRACK_SEPARATION);

        self.stiffness_factor = at_least("stiffness_factor", self.stiffness_factor, 0.0);
        self.damping_factor = at_least("damping_factor", self.damping_factor, 0.0);
        for (i, s) in self.suspension.iter_mut().enumerate() {
            s.length = at_least(&format!("suspension[{i}].length"), s.length, 0.0);
            s.collision_radius = at_least(&format!("suspension[{i}].collision_radius"), s.collision_radius, 0.0);
            s.stiffness = at_least(&format!("suspension[{i}].stiffness"), s.stiffness, 0.0);
            s.damping = at_least(&format!("suspension[{i}].damping"), s.damping, 0.0);
        }
        if self.suspension.is_empty() {
            warn!("vehicle has no suspension; it will never touch the ground");
        }

        if self.gears.is_empty() {
            warn!("empty gear setup, using a single neutral gear");
            self.gears.push(GearConfig::default());
        }
        for (i, g) in self.gears.iter_mut().enumerate() {
            if !g.ratio.is_finite() {
                warn!("gear {i}: non-finite ratio, using neutral");
                g.ratio = 0.0;
            }
            g.down_ratio = unit_range(&format!("gear[{i}].down_ratio"), g.down_ratio);
            g.up_ratio = unit_range(&format!("gear[{i}].up_ratio"), g.up_ratio);
            if g.down_ratio > g.up_ratio {
                warn!("gear {i}: down_ratio {} > up_ratio {}, swapping", g.down_ratio, g.up_ratio);
                std::mem::swap(&mut g.down_ratio, &mut g.up_ratio);
            }
            if g.down_ratio == g.up_ratio {
                if g.up_ratio > 0.0 {
                    warn!("gear {i}: equal shift thresholds, halving down_ratio");
                    g.down_ratio = g.up_ratio * 0.5;
                } else {
                    warn!("gear {i}: both shift thresholds are 0, raising up_ratio");
                    g.up_ratio = GearConfig::default().up_ratio;
                }
            }
        }
        if !self.gears.iter().any(GearConfig::is_neutral) {
            warn!("no neutral gear; gear {} stands in for it", self.neutral_gear());
        }
        self.gear_auto_box_latency = at_least("gear_auto_box_latency", self.gear_auto_box_latency, 0.0);

        self.brake_force = at_least("brake_force", self.brake_force, 0.0);
        self.steering_brake_factor = at_least("steering_brake_factor", self.steering_brake_factor, 0.0);
        self.steering_brake_transfer = unit_range("steering_brake_transfer", self.steering_brake_transfer);
        self.auto_brake_stable_transfer = unit_range("auto_brake_stable_transfer", self.auto_brake_stable_transfer);

        self.throttle_up_ratio = at_least("throttle_up_ratio", self.throttle_up_ratio, 0.0);
        self.throttle_down_ratio = at_least("throttle_down_ratio", self.throttle_down_ratio, 0.0);
        self.differential_ratio = at_least("differential_ratio", self.differential_ratio, 0.0);
        self.transmission_efficiency = unit_range("transmission_efficiency", self.transmission_efficiency);
        self.engine_extra_power_ratio = at_least("engine_extra_power_ratio", self.engine_extra_power_ratio, 0.0);

        let before = self.engine_torque_curve.len();
        self.engine_torque_curve.retain(|(rpm, torque)| rpm.is_finite() && torque.is_finite());
        if self.engine_torque_curve.len() != before {
            warn!("dropped {} non-finite torque curve samples", before - self.engine_torque_curve.len());
        }
        if self.engine_torque_curve.is_empty() {
            warn!("empty engine torque curve; engine produces no torque");
            self.engine_torque_curve.push((0.0, 0.0));
        }
        self.engine_torque_curve.sort_by(|a, b| a.0.total_cmp(&b.0));

        self.static_friction_ellipse = self.static_friction_ellipse.sanitized();
        self.kinetic_friction_ellipse = self.kinetic_friction_ellipse.sanitized();
        self.friction_slip_threshold = at_least("friction_slip_threshold", self.friction_slip_threshold, 0.0);
        self.friction_torque_coefficient = at_least("friction_torque_coefficient", self.friction_torque_coefficient, 0.0);
        self.rolling_friction_coefficient = at_least("rolling_friction_coefficient", self.rolling_friction_coefficient, 0.0);
        self.rolling_velocity_coefficient = at_least("rolling_velocity_coefficient", self.rolling_velocity_coefficient, 0.0);

        self
    }
}

fn at_least(name: &str, value: f32, min: f32) -> f32 {
    if value.is_finite() && value >= min {
        return value;
    }
    warn!("{name} = {value} is invalid, clamping to {min}");
    min
}

fn unit_range(name: &str, value: f32) -> f32 {
    if (0.0..=1.0).contains(&value) {
        return value;
    }
    let clamped = if value.is_finite() { value.clamp(0.0, 1.0) } else { 0.0 };
    warn!("{name} = {value} outside [0, 1], clamping to {clamped}");
    clamped
}

/// Down axis of a mount pose, in the pose's parent frame.
pub fn mount_down(pose: &Isometry3<f32>) -> Vector3<f32> {
    pose.rotation * Vector3::new(0.0, -1.0, 0.0)
}
