// ==============================================================================
// suspension.rs — RAYCAST SPRING-DAMPER SUSPENSION
// ------------------------------------------------------------------------------
// One SuspensionState per road wheel. Each tick the stepper:
// 1) resolves the wheel mount (static offset or a bone of the host skeleton)
// 2) builds a SuspensionRay from the mount down axis
// 3) hands the ray to the host's GroundProbe
// 4) feeds the hit (or miss) back into update_wheel()
//
//     compression = length - clamp(distance - collision_radius, 0, length)
//     force       = max(0, k * compression + c * d(compression)/dt)
//
// Force acts along the suspension up axis (opposite the ray), never along the
// ground normal, so a wheel on a slope cannot push the hull sideways.
//
// Notes:
// - wheel_load == 0 exactly when ground_contact is false.
// - A spring that would pull (fast rebound) reports no contact for that tick.
// ==============================================================================

use nalgebra::{Isometry3, Point3, Vector3};

use crate::track_sim::config::{SuspensionConfig, mount_down};
use crate::track_sim::types::{RayHit, SkeletalPoseProvider, SurfaceKind, SuspensionRay, hull_up};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SuspensionState {
    pub compression: f32,          // m, 0..length
    pub compression_velocity: f32, // m/s, + when compressing
    pub force: Vector3<f32>,       // N, world
    pub hit_location: Point3<f32>, // world
    pub hit_normal: Vector3<f32>,  // world
    pub wheel_load: f32,           // N
    pub ground_contact: bool,
    pub surface: SurfaceKind,
}

impl SuspensionState {
    /// Hanging free, nothing under the wheel.
    pub fn extended() -> Self {
        Self {
            compression: 0.0,
            compression_velocity: 0.0,
            force: Vector3::zeros(),
            hit_location: Point3::origin(),
            hit_normal: hull_up(),
            wheel_load: 0.0,
            ground_contact: false,
            surface: SurfaceKind::Default,
        }
    }
}

impl Default for SuspensionState {
    fn default() -> Self {
        Self::extended()
    }
}

/// Global multipliers from VehicleConfig.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SuspensionFactors {
    pub stiffness: f32,
    pub damping: f32,
}

impl Default for SuspensionFactors {
    fn default() -> Self {
        Self { stiffness: 1.0, damping: 1.0 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResolvedMount {
    pub pose: Isometry3<f32>, // hull space
    /// A bone was requested but the provider did not know it.
    pub missing_bone: bool,
}

/// Hull-space mount pose: the configured bone when a provider knows it,
/// otherwise the static location/rotation.
pub fn resolve_mount(
    config: &SuspensionConfig,
    provider: Option<&dyn SkeletalPoseProvider>,
) -> ResolvedMount {
    let (Some(bone), Some(provider)) = (config.bone.as_deref(), provider) else {
        return ResolvedMount { pose: config.mount_pose(), missing_bone: false };
    };

    match provider.bone_transform(bone) {
        Some(pose) => ResolvedMount { pose, missing_bone: false },
        None => ResolvedMount { pose: config.mount_pose(), missing_bone: true },
    }
}

/// World-space query ray for one wheel.
pub fn suspension_ray(
    wheel: usize,
    config: &SuspensionConfig,
    mount: &Isometry3<f32>,
    hull_pose: &Isometry3<f32>,
) -> SuspensionRay {
    let world = hull_pose * mount;
    let down = mount_down(&world);
    let direction = down.try_normalize(1e-6).unwrap_or_else(|| -hull_up());

    SuspensionRay {
        wheel,
        side: config.side,
        origin: Point3::from(world.translation.vector),
        direction,
        max_distance: config.ray_length(),
    }
}

/// Spring-damper update for one wheel from this tick's ray result.
pub fn update_wheel(
    config: &SuspensionConfig,
    prior: &SuspensionState,
    ray: &SuspensionRay,
    hit: Option<&RayHit>,
    dt: f32,
    factors: SuspensionFactors,
) -> SuspensionState {
    let Some(hit) = hit.filter(|h| h.distance.is_finite() && h.distance <= ray.max_distance) else {
        return SuspensionState::extended();
    };

    let length = config.length.max(0.0);
    let travel = (hit.distance - config.collision_radius).clamp(0.0, length);
    let compression = length - travel;

    let compression_velocity = if dt > 0.0 && dt.is_finite() {
        (compression - prior.compression) / dt
    } else {
        0.0
    };

    let spring = config.stiffness * factors.stiffness * compression;
    let damper = config.damping * factors.damping * compression_velocity;
    let force_mag = (spring + damper).max(0.0);
    let wheel_load = if force_mag.is_finite() { force_mag } else { 0.0 };
    let ground_contact = wheel_load > 0.0;

    // A broken normal from the host falls back to the suspension axis.
    let up = -ray.direction;
    let hit_normal = match hit.normal.try_normalize(1e-6) {
        Some(n) if n.iter().all(|x| x.is_finite()) => n,
        _ => up,
    };

    SuspensionState {
        compression,
        compression_velocity,
        force: -ray.direction * wheel_load,
        hit_location: hit.location,
        hit_normal,
        wheel_load,
        ground_contact,
        surface: hit.surface,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::track_sim::types::Side;
    use nalgebra::{Translation3, UnitQuaternion};

    fn cfg() -> SuspensionConfig {
        SuspensionConfig {
            length: 0.25,
            collision_radius: 0.35,
            stiffness: 100_000.0,
            damping: 5_000.0,
            ..SuspensionConfig::default()
        }
    }

    fn ray(c: &SuspensionConfig) -> SuspensionRay {
        suspension_ray(0, c, &c.mount_pose(), &Isometry3::identity())
    }

    fn hit_at(distance: f32) -> RayHit {
        RayHit {
            distance,
            location: Point3::new(0.0, -distance, 0.0),
            normal: hull_up(),
            surface: SurfaceKind::Dirt,
        }
    }

    #[test]
    fn miss_is_fully_extended_without_load() {
        let c = cfg();
        let s = update_wheel(&c, &SuspensionState::extended(), &ray(&c), None, 1.0 / 60.0, SuspensionFactors::default());
        assert!(!s.ground_contact);
        assert_eq!(s.wheel_load, 0.0);
        assert_eq!(s.compression, 0.0);
        assert_eq!(s.force, Vector3::zeros());
    }

    #[test]
    fn hit_beyond_max_distance_is_a_miss() {
        let c = cfg();
        let r = ray(&c);
        let s = update_wheel(&c, &SuspensionState::extended(), &r, Some(&hit_at(0.7)), 0.016, SuspensionFactors::default());
        assert!(!s.ground_contact);
    }

    #[test]
    fn static_compression_pushes_up() {
        let c = cfg();
        let r = ray(&c);
        let prior = SuspensionState { compression: 0.1, ..SuspensionState::extended() };
        // distance - radius = 0.15 -> compression 0.10, no velocity
        let s = update_wheel(&c, &prior, &r, Some(&hit_at(0.5)), 0.016, SuspensionFactors::default());
        assert!((s.compression - 0.1).abs() < 1e-5);
        assert!(s.compression_velocity.abs() < 1e-3);
        assert!((s.wheel_load - 10_000.0).abs() < 1.0);
        assert!(s.ground_contact);
        assert!(s.force.y > 0.0 && s.force.x.abs() < 1e-3);
        assert_eq!(s.surface, SurfaceKind::Dirt);
    }

    #[test]
    fn compression_is_clamped_to_travel() {
        let c = cfg();
        let r = ray(&c);
        let deep = update_wheel(&c, &SuspensionState::extended(), &r, Some(&hit_at(0.0)), 0.016, SuspensionFactors::default());
        assert!((deep.compression - c.length).abs() < 1e-6);
    }

    #[test]
    fn fast_rebound_reports_no_contact() {
        let c = cfg();
        let r = ray(&c);
        let prior = SuspensionState { compression: 0.25, ..SuspensionState::extended() };
        let s = update_wheel(&c, &prior, &r, Some(&hit_at(0.59)), 0.016, SuspensionFactors::default());
        assert_eq!(s.wheel_load, 0.0);
        assert!(!s.ground_contact);
    }

    #[test]
    fn broken_normal_falls_back_to_suspension_axis() {
        let c = cfg();
        let r = ray(&c);
        let mut hit = hit_at(0.5);
        hit.normal = Vector3::new(f32::NAN, 0.0, 0.0);
        let s = update_wheel(&c, &SuspensionState::extended(), &r, Some(&hit), 0.016, SuspensionFactors::default());
        assert_eq!(s.hit_normal, -r.direction);
        assert!(s.ground_contact);

        hit.normal = Vector3::zeros();
        let s = update_wheel(&c, &SuspensionState::extended(), &r, Some(&hit), 0.016, SuspensionFactors::default());
        assert_eq!(s.hit_normal, -r.direction);
    }

    #[test]
    fn zero_dt_has_no_damping() {
        let c = cfg();
        let r = ray(&c);
        let s = update_wheel(&c, &SuspensionState::extended(), &r, Some(&hit_at(0.5)), 0.0, SuspensionFactors::default());
        assert_eq!(s.compression_velocity, 0.0);
        assert!((s.wheel_load - 10_000.0).abs() < 1.0);
    }

    #[test]
    fn ray_follows_hull_pose() {
        let c = SuspensionConfig { location: [1.0, 0.0, 2.0], ..cfg() };
        let hull = Isometry3::from_parts(Translation3::new(0.0, 3.0, 0.0), UnitQuaternion::identity());
        let r = suspension_ray(4, &c, &c.mount_pose(), &hull);
        assert_eq!(r.wheel, 4);
        assert_eq!(r.side, Side::Left);
        assert!((r.origin - Point3::new(1.0, 3.0, 2.0)).norm() < 1e-6);
        assert!((r.direction + hull_up()).norm() < 1e-6);
        assert!((r.max_distance - 0.6).abs() < 1e-6);
    }

    struct OneBone;

    impl SkeletalPoseProvider for OneBone {
        fn bone_transform(&self, bone: &str) -> Option<Isometry3<f32>> {
            (bone == "wheel_l1").then(|| Isometry3::translation(0.5, -0.2, 1.0))
        }
    }

    #[test]
    fn bone_mount_overrides_static_pose() {
        let c = SuspensionConfig { bone: Some("wheel_l1".into()), ..cfg() };
        let m = resolve_mount(&c, Some(&OneBone));
        assert!(!m.missing_bone);
        assert!((m.pose.translation.vector.x - 0.5).abs() < 1e-6);

        let unknown = SuspensionConfig { bone: Some("nope".into()), location: [2.0, 0.0, 0.0], ..cfg() };
        let m = resolve_mount(&unknown, Some(&OneBone));
        assert!(m.missing_bone);
        assert!((m.pose.translation.vector.x - 2.0).abs() < 1e-6);

        let no_provider = resolve_mount(&c, None);
        assert!(!no_provider.missing_bone);
    }
}
