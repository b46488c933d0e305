// ==============================================================================
// friction.rs — ELLIPTICAL FRICTION + ROLLING RESISTANCE
// ------------------------------------------------------------------------------
// Coefficients come from a friction ellipse: the longitudinal axis applies when
// the contact slips along the track, the lateral axis when it slips sideways
// (skid-steer turning), and directions in between blend as
//
//     mu(θ) = 1 / sqrt((cosθ / mu_long)^2 + (sinθ / mu_lat)^2)
//
// θ is never computed; cos/sin come straight from dot products.
//
// Two ellipses are configured: static (slip speed under a threshold) and
// kinetic (sliding). Torques returned here are magnitudes. TrackDynamics
// applies them against the track's rotation.
// ==============================================================================

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

/// Speed above which rolling resistance stops growing (m/s).
pub const ROLLING_SPEED_CAP: f32 = 20.0;

/// Slip below this (m/s) has no usable direction.
pub const MIN_SLIP_SPEED: f32 = 1e-4;

/// Floor for ellipse axes so the blend never divides by zero.
pub const MIN_FRICTION_COEFFICIENT: f32 = 0.01;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FrictionEllipse {
    pub longitudinal: f32,
    pub lateral: f32,
}

impl FrictionEllipse {
    pub fn new(longitudinal: f32, lateral: f32) -> Self {
        Self { longitudinal, lateral }
    }

    pub fn coefficient(&self, slip: &Vector3<f32>, forward: &Vector3<f32>) -> f32 {
        friction_coefficient(slip, forward, self)
    }

    pub(crate) fn sanitized(self) -> Self {
        let axis = |x: f32| if x.is_finite() { x.max(MIN_FRICTION_COEFFICIENT) } else { MIN_FRICTION_COEFFICIENT };
        Self {
            longitudinal: axis(self.longitudinal),
            lateral: axis(self.lateral),
        }
    }
}

/// Elliptical blend of the two axis coefficients for a slip direction.
/// Zero slip reads as pure longitudinal.
pub fn friction_coefficient(
    slip: &Vector3<f32>,
    forward: &Vector3<f32>,
    ellipse: &FrictionEllipse,
) -> f32 {
    let long = ellipse.longitudinal.max(MIN_FRICTION_COEFFICIENT);
    let lat = ellipse.lateral.max(MIN_FRICTION_COEFFICIENT);

    let slip_speed = slip.norm();
    let forward_len = forward.norm();
    if slip_speed < MIN_SLIP_SPEED || forward_len < 1e-6 {
        return long;
    }

    let cos = (slip.dot(forward) / (slip_speed * forward_len)).clamp(-1.0, 1.0);
    let sin_sq = (1.0 - cos * cos).max(0.0);

    let inv_sq = (cos * cos) / (long * long) + sin_sq / (lat * lat);
    1.0 / inv_sq.sqrt()
}

/// Static ellipse while the contact grips, kinetic once it slides.
pub fn select_ellipse<'a>(
    slip_speed: f32,
    threshold: f32,
    static_ellipse: &'a FrictionEllipse,
    kinetic_ellipse: &'a FrictionEllipse,
) -> &'a FrictionEllipse {
    if slip_speed > threshold { kinetic_ellipse } else { static_ellipse }
}

/// Ground friction torque magnitude at the sprocket (N*m).
#[inline]
pub fn friction_torque(wheel_load: f32, coefficient: f32, radius: f32) -> f32 {
    (wheel_load * coefficient * radius).max(0.0)
}

/// Rolling resistance torque magnitude (N*m). Grows with speed up to
/// `ROLLING_SPEED_CAP`, zero without load.
pub fn rolling_friction_torque(
    wheel_load: f32,
    rolling_coefficient: f32,
    velocity_coefficient: f32,
    linear_velocity: f32,
    radius: f32,
) -> f32 {
    if wheel_load <= 0.0 {
        return 0.0;
    }

    let speed = linear_velocity.abs().min(ROLLING_SPEED_CAP);
    let coefficient = (rolling_coefficient + velocity_coefficient * speed).max(0.0);
    wheel_load * radius * coefficient
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPS: f32 = 1e-5;

    fn ellipse() -> FrictionEllipse {
        FrictionEllipse::new(0.6, 1.1)
    }

    #[test]
    fn axis_aligned_slip_hits_axis_coefficients() {
        let fwd = Vector3::new(0.0, 0.0, 1.0);
        let along = friction_coefficient(&Vector3::new(0.0, 0.0, -3.0), &fwd, &ellipse());
        let across = friction_coefficient(&Vector3::new(2.0, 0.0, 0.0), &fwd, &ellipse());
        assert!((along - 0.6).abs() < EPS);
        assert!((across - 1.1).abs() < EPS);
    }

    #[test]
    fn zero_slip_is_longitudinal() {
        let c = friction_coefficient(&Vector3::zeros(), &Vector3::z(), &ellipse());
        assert!((c - 0.6).abs() < EPS);
    }

    #[test]
    fn blend_stays_between_axes_for_every_direction() {
        let fwd = Vector3::z();
        for ellipse in [ellipse(), FrictionEllipse::new(1.2, 0.4)] {
            let lo = ellipse.longitudinal.min(ellipse.lateral);
            let hi = ellipse.longitudinal.max(ellipse.lateral);
            for step in 0..72 {
                let a = step as f32 * std::f32::consts::PI / 36.0;
                let slip = Vector3::new(a.sin(), 0.0, a.cos()) * 0.7;
                let c = friction_coefficient(&slip, &fwd, &ellipse);
                assert!(c >= lo - EPS && c <= hi + EPS, "angle {a}: {c}");
            }
        }
    }

    #[test]
    fn degenerate_ellipse_does_not_divide_by_zero() {
        let c = friction_coefficient(&Vector3::x(), &Vector3::z(), &FrictionEllipse::new(0.0, 0.0));
        assert!(c.is_finite());
        assert!((c - MIN_FRICTION_COEFFICIENT).abs() < EPS);
    }

    #[test]
    fn kinetic_ellipse_above_threshold() {
        let stat = FrictionEllipse::new(1.0, 1.0);
        let kin = FrictionEllipse::new(0.5, 0.5);
        assert_eq!(select_ellipse(0.1, 0.5, &stat, &kin), &stat);
        assert_eq!(select_ellipse(0.9, 0.5, &stat, &kin), &kin);
    }

    #[test]
    fn rolling_friction_grows_then_caps_and_needs_load() {
        let slow = rolling_friction_torque(1000.0, 0.02, 0.001, 1.0, 0.3);
        let fast = rolling_friction_torque(1000.0, 0.02, 0.001, 10.0, 0.3);
        let capped = rolling_friction_torque(1000.0, 0.02, 0.001, ROLLING_SPEED_CAP, 0.3);
        let beyond = rolling_friction_torque(1000.0, 0.02, 0.001, -80.0, 0.3);
        assert!(fast > slow);
        assert!((capped - beyond).abs() < EPS);
        assert_eq!(rolling_friction_torque(0.0, 0.02, 0.001, 5.0, 0.3), 0.0);
    }

    #[test]
    fn friction_torque_is_never_negative() {
        assert!((friction_torque(1000.0, 0.5, 0.3) - 150.0).abs() < 1e-3);
        assert_eq!(friction_torque(-10.0, 0.5, 0.3), 0.0);
    }
}
