//! Core shared types for `track_sim` (engine-agnostic).
// track_sim/types.rs
// ==============================================================================
// Frames: hull space is +Y up, +Z forward, +X left. Positive yaw is a
// counter-clockwise rotation about +Y seen from above.
// ==============================================================================

use std::fmt;

use nalgebra::{Isometry3, Point3, Vector3};
use serde::{Deserialize, Serialize};

#[inline] pub fn hull_up() -> Vector3<f32> { Vector3::new(0.0, 1.0, 0.0) }
#[inline] pub fn hull_forward() -> Vector3<f32> { Vector3::new(0.0, 0.0, 1.0) }
#[inline] pub fn hull_left() -> Vector3<f32> { Vector3::new(1.0, 0.0, 0.0) }

#[inline] pub fn v3(v: &Vector3<f32>) -> [f32; 3] { [v.x, v.y, v.z] }
#[inline] pub fn p3(p: &Point3<f32>) -> [f32; 3] { [p.x, p.y, p.z] }

/// Sign with an exact zero, unlike `f32::signum` which maps 0.0 to 1.0.
#[inline]
pub fn sign(x: f32) -> f32 {
    if x > 0.0 { 1.0 } else if x < 0.0 { -1.0 } else { 0.0 }
}

// ============================================
// Track side
// ============================================

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    #[default]
    Left,
    Right,
}

impl Side {
    pub const BOTH: [Side; 2] = [Side::Left, Side::Right];

    pub fn index(self) -> usize {
        match self {
            Side::Left => 0,
            Side::Right => 1,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Left => "L",
            Side::Right => "R",
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================
// Surface tags carried by ray-cast hits
// ============================================

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SurfaceKind {
    #[default]
    Default,
    Asphalt,
    Dirt,
    Grass,
    Sand,
    Mud,
    Snow,
    Ice,
}

impl SurfaceKind {
    const ALL: [SurfaceKind; 8] = [
        SurfaceKind::Default,
        SurfaceKind::Asphalt,
        SurfaceKind::Dirt,
        SurfaceKind::Grass,
        SurfaceKind::Sand,
        SurfaceKind::Mud,
        SurfaceKind::Snow,
        SurfaceKind::Ice,
    ];

    /// Grip multiplier applied on top of the friction ellipse.
    pub fn friction_scale(self) -> f32 {
        match self {
            SurfaceKind::Default | SurfaceKind::Asphalt => 1.0,
            SurfaceKind::Dirt => 0.9,
            SurfaceKind::Grass => 0.8,
            SurfaceKind::Sand => 0.7,
            SurfaceKind::Mud => 0.55,
            SurfaceKind::Snow => 0.45,
            SurfaceKind::Ice => 0.2,
        }
    }

    /// Numeric tag for hosts that store surface ids on colliders.
    pub fn tag(self) -> u128 {
        self as u128
    }

    /// Unknown tags map to `Default`.
    pub fn from_tag(tag: u128) -> Self {
        Self::ALL
            .iter()
            .copied()
            .find(|s| s.tag() == tag)
            .unwrap_or_default()
    }
}

// ============================================
// Driver input
// ============================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct VehicleInput {
    pub throttle: f32,  // -1..1
    pub steering: f32,  // -1..1, + yaws toward +X (left)
    pub handbrake: bool,
}

impl VehicleInput {
    pub fn new(throttle: f32, steering: f32, handbrake: bool) -> Self {
        Self { throttle, steering, handbrake }
    }

    /// Clamp to [-1, 1]; non-finite axes read as released.
    pub fn clamped(self) -> Self {
        let axis = |x: f32| if x.is_finite() { x.clamp(-1.0, 1.0) } else { 0.0 };
        Self {
            throttle: axis(self.throttle),
            steering: axis(self.steering),
            handbrake: self.handbrake,
        }
    }
}

// ============================================
// World query contract
// ============================================

/// One suspension ray, in world space. `direction` is unit length.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SuspensionRay {
    pub wheel: usize,
    pub side: Side,
    pub origin: Point3<f32>,
    pub direction: Vector3<f32>,
    pub max_distance: f32,
}

impl SuspensionRay {
    pub fn point_at(&self, distance: f32) -> Point3<f32> {
        self.origin + self.direction * distance
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RayHit {
    pub distance: f32,
    pub location: Point3<f32>,
    pub normal: Vector3<f32>,
    pub surface: SurfaceKind,
}

/// Synchronous ground query the stepper calls once per wheel per tick.
pub trait GroundProbe {
    fn cast(&mut self, ray: &SuspensionRay) -> Option<RayHit>;
}

/// Supplies hull-space bone poses for suspensions that inherit their mount.
pub trait SkeletalPoseProvider {
    fn bone_transform(&self, bone: &str) -> Option<Isometry3<f32>>;
}

/// Infinite horizontal plane. Useful for headless runs and tests.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FlatGround {
    pub height: f32,
    pub surface: SurfaceKind,
}

impl FlatGround {
    pub fn new(height: f32) -> Self {
        Self { height, surface: SurfaceKind::Default }
    }
}

impl GroundProbe for FlatGround {
    fn cast(&mut self, ray: &SuspensionRay) -> Option<RayHit> {
        let down = -ray.direction.y;
        if down <= 1e-6 {
            return None;
        }

        // origin below the surface counts as fully compressed
        let distance = ((ray.origin.y - self.height) / down).max(0.0);
        if distance > ray.max_distance {
            return None;
        }

        Some(RayHit {
            distance,
            location: ray.point_at(distance),
            normal: hull_up(),
            surface: self.surface,
        })
    }
}
