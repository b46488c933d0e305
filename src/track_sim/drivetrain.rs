// ==============================================================================
// drivetrain.rs — ENGINE + GEARBOX
// ------------------------------------------------------------------------------
// Engine speed is not integrated. It is read back from the tracks through the
// gear train (previous tick), clamped to the torque curve's domain:
//
//     rpm = |ω_track| * |gear| * differential * 60 / 2π
//
// In neutral nothing loads the engine, so it free-revs toward a throttle
// dependent target instead.
//
// Gearbox:
// - manual: shift_gear(up) / select_gear(i), clamped, resets the shift timer
// - automatic: rpm / max_rpm against each gear's down/up thresholds, at most
//   one shift per tick, never faster than gear_auto_box_latency
// - automatic engages the first forward gear from neutral on forward throttle
// - reverse is only ever entered on request
// ==============================================================================

use std::f32::consts::PI;

use log::{Level, log};
use serde::Serialize;

use crate::track_sim::config::{GearConfig, VehicleConfig};
use crate::track_sim::types::sign;

const RAD_PER_SEC_TO_RPM: f32 = 60.0 / (2.0 * PI);

/// Neutral free-rev response (1/s).
pub const NEUTRAL_REV_RATE: f32 = 3.0;

/// Throttle below this counts as released.
pub const THROTTLE_DEADZONE: f32 = 0.05;

// ============================================
// Torque curve
// ============================================

/// Piecewise-linear (rpm, torque) samples. Lookups outside the sampled range
/// return the boundary torque.
#[derive(Debug, Clone, PartialEq)]
pub struct TorqueCurve {
    samples: Vec<(f32, f32)>,
}

impl TorqueCurve {
    pub fn new(samples: &[(f32, f32)]) -> Self {
        let mut samples: Vec<(f32, f32)> = samples
            .iter()
            .copied()
            .filter(|(x, y)| x.is_finite() && y.is_finite())
            .collect();
        samples.sort_by(|a, b| a.0.total_cmp(&b.0));
        Self { samples }
    }

    pub fn min_rpm(&self) -> f32 {
        self.samples.first().map_or(0.0, |s| s.0)
    }

    pub fn max_rpm(&self) -> f32 {
        self.samples.last().map_or(0.0, |s| s.0)
    }

    pub fn torque(&self, rpm: f32) -> f32 {
        let Some(&(first_x, first_y)) = self.samples.first() else {
            return 0.0;
        };
        if rpm <= first_x {
            return first_y;
        }

        let Some(i) = self.samples.iter().position(|s| s.0 > rpm) else {
            return self.samples.last().map_or(0.0, |s| s.1);
        };

        let (x0, y0) = self.samples[i - 1];
        let (x1, y1) = self.samples[i];
        let span = x1 - x0;
        if span <= f32::EPSILON {
            return y1;
        }
        y0 + (y1 - y0) * (rpm - x0) / span
    }
}

/// Engine speed seen through the gear train, clamped to [min_rpm, max_rpm].
pub fn engine_rpm(
    track_angular_velocity: f32,
    gear_ratio: f32,
    differential_ratio: f32,
    min_rpm: f32,
    max_rpm: f32,
) -> f32 {
    let rpm = track_angular_velocity.abs() * gear_ratio.abs() * differential_ratio.abs() * RAD_PER_SEC_TO_RPM;
    if !rpm.is_finite() {
        return min_rpm;
    }
    rpm.clamp(min_rpm, max_rpm.max(min_rpm))
}

// ============================================
// State
// ============================================

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct DrivetrainState {
    pub current_gear: usize,
    pub reverse: bool,
    pub engine_rpm: f32,
    pub engine_torque: f32,         // N*m at the crank, signed by throttle only
    pub time_since_shift: f32,      // s
    pub speed_at_last_shift: f32,   // m/s, hull speed at the last automatic shift
}

#[derive(Debug, Clone)]
pub struct Drivetrain {
    curve: TorqueCurve,
    neutral_gear: usize,
    state: DrivetrainState,
}

impl Drivetrain {
    pub fn new(config: &VehicleConfig) -> Self {
        let curve = TorqueCurve::new(&config.engine_torque_curve);
        let neutral_gear = config.neutral_gear();
        let state = DrivetrainState {
            current_gear: neutral_gear,
            reverse: config.gears.get(neutral_gear).is_some_and(GearConfig::is_reverse),
            engine_rpm: curve.min_rpm(),
            engine_torque: 0.0,
            // first engagement is never held back by the latency
            time_since_shift: config.gear_auto_box_latency,
            speed_at_last_shift: 0.0,
        };
        Self { curve, neutral_gear, state }
    }

    pub fn state(&self) -> &DrivetrainState { &self.state }
    pub fn neutral_gear(&self) -> usize { self.neutral_gear }
    pub fn min_rpm(&self) -> f32 { self.curve.min_rpm() }
    pub fn max_rpm(&self) -> f32 { self.curve.max_rpm() }

    pub fn gear_ratio(&self, config: &VehicleConfig) -> f32 {
        config.gears.get(self.state.current_gear).map_or(0.0, |g| g.ratio)
    }

    /// Torque delivered to the track pair before the steering split.
    pub fn drive_torque(&self, config: &VehicleConfig) -> f32 {
        self.state.engine_torque * self.gear_ratio(config) * config.differential_ratio
    }

    /// Throttle pushing against the engaged gear (braking request).
    pub fn opposes_gear(&self, config: &VehicleConfig, throttle: f32) -> bool {
        let gear = sign(self.gear_ratio(config));
        gear != 0.0 && throttle.abs() > THROTTLE_DEADZONE && sign(throttle) != gear
    }

    /// Manual shift by one gear. Returns true when the gear changed.
    pub fn shift_gear(&mut self, config: &VehicleConfig, up: bool) -> bool {
        let current = self.state.current_gear;
        let target = if up {
            (current + 1).min(config.gears.len().saturating_sub(1))
        } else {
            current.saturating_sub(1)
        };
        self.engage(config, target, "manual");
        self.state.speed_at_last_shift = 0.0;
        target != current
    }

    /// Manual gear selection, clamped to the gear list.
    pub fn select_gear(&mut self, config: &VehicleConfig, index: usize) {
        let target = index.min(config.gears.len().saturating_sub(1));
        self.engage(config, target, "manual");
        self.state.speed_at_last_shift = 0.0;
    }

    /// One tick: engine speed, automatic box, engine torque.
    ///
    /// `track_angular_velocity` is the average of both tracks from the
    /// previous tick, `hull_speed` the previous forward speed.
    pub fn update(
        &mut self,
        config: &VehicleConfig,
        throttle: f32,
        track_angular_velocity: f32,
        hull_speed: f32,
        dt: f32,
    ) {
        self.state.time_since_shift += dt;
        self.state.engine_rpm = self.rpm_for(config, throttle, track_angular_velocity, dt);

        if config.auto_gear {
            if let Some(target) = self.auto_target(config, throttle, hull_speed) {
                self.engage(config, target, "auto");
                self.state.speed_at_last_shift = hull_speed.abs();
                self.state.engine_rpm = self.rpm_for(config, throttle, track_angular_velocity, 0.0);
            }
        }

        let gear = sign(self.gear_ratio(config));
        let pushing = (throttle * gear).max(0.0);
        let curve = self.curve.torque(self.state.engine_rpm);
        let torque = curve
            * (1.0 + pushing * config.engine_extra_power_ratio)
            * config.transmission_efficiency
            * pushing;
        self.state.engine_torque = if torque.is_finite() { torque } else { 0.0 };
    }

    fn rpm_for(&self, config: &VehicleConfig, throttle: f32, omega: f32, dt: f32) -> f32 {
        let (min, max) = (self.min_rpm(), self.max_rpm());
        let ratio = self.gear_ratio(config);
        if ratio != 0.0 {
            return engine_rpm(omega, ratio, config.differential_ratio, min, max);
        }

        let target = min + throttle.abs().min(1.0) * (max - min);
        let k = (NEUTRAL_REV_RATE * dt).clamp(0.0, 1.0);
        let rpm = self.state.engine_rpm + (target - self.state.engine_rpm) * k;
        rpm.clamp(min, max.max(min))
    }

    fn auto_target(&self, config: &VehicleConfig, throttle: f32, hull_speed: f32) -> Option<usize> {
        if self.state.time_since_shift < config.gear_auto_box_latency {
            return None;
        }
        let current = self.state.current_gear;
        let gear = config.gears.get(current)?;

        if gear.is_neutral() {
            if throttle <= THROTTLE_DEADZONE {
                return None;
            }
            return first_forward(&config.gears);
        }
        if !gear.is_forward() {
            return None;
        }

        let max = self.max_rpm();
        let ratio = if max > 0.0 { self.state.engine_rpm / max } else { 0.0 };

        if ratio > gear.up_ratio && hull_speed.abs() >= self.state.speed_at_last_shift {
            if let Some(next) = higher_forward(&config.gears, current) {
                return Some(next);
            }
        }
        if ratio < gear.down_ratio {
            return lower_forward(&config.gears, current);
        }
        None
    }

    fn engage(&mut self, config: &VehicleConfig, target: usize, source: &str) {
        let from = self.state.current_gear;
        self.state.current_gear = target;
        self.state.reverse = config.gears.get(target).is_some_and(GearConfig::is_reverse);
        self.state.time_since_shift = 0.0;

        if from != target {
            let level = if config.debug_gearbox { Level::Info } else { Level::Debug };
            log!(
                level,
                "{source} shift {from} -> {target} (ratio {:.2}, {:.0} rpm)",
                self.gear_ratio(config),
                self.state.engine_rpm
            );
        }
    }
}

fn first_forward(gears: &[GearConfig]) -> Option<usize> {
    gears.iter().position(GearConfig::is_forward)
}

fn higher_forward(gears: &[GearConfig], current: usize) -> Option<usize> {
    (current + 1..gears.len()).find(|&i| gears[i].is_forward())
}

fn lower_forward(gears: &[GearConfig], current: usize) -> Option<usize> {
    (0..current).rev().find(|&i| gears[i].is_forward())
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPS: f32 = 1e-3;

    fn tank() -> VehicleConfig {
        VehicleConfig::tank()
    }

    /// ω that puts the engine at `rpm` in gear `index`.
    fn omega_for(cfg: &VehicleConfig, index: usize, rpm: f32) -> f32 {
        rpm / (cfg.gears[index].ratio.abs() * cfg.differential_ratio * RAD_PER_SEC_TO_RPM)
    }

    #[test]
    fn curve_interpolates_and_clamps() {
        let curve = TorqueCurve::new(&[(1000.0, 100.0), (2000.0, 300.0), (3000.0, 0.0)]);
        assert!((curve.torque(1500.0) - 200.0).abs() < EPS);
        assert!((curve.torque(2500.0) - 150.0).abs() < EPS);
        assert!((curve.torque(0.0) - 100.0).abs() < EPS);
        assert!((curve.torque(9000.0) - 0.0).abs() < EPS);
        assert_eq!(curve.min_rpm(), 1000.0);
        assert_eq!(curve.max_rpm(), 3000.0);
    }

    #[test]
    fn unsorted_curve_is_sorted() {
        let curve = TorqueCurve::new(&[(2000.0, 300.0), (1000.0, 100.0)]);
        assert_eq!(curve.min_rpm(), 1000.0);
        assert!((curve.torque(1500.0) - 200.0).abs() < EPS);
    }

    #[test]
    fn empty_curve_is_silent() {
        let curve = TorqueCurve::new(&[]);
        assert_eq!(curve.torque(1000.0), 0.0);
        assert_eq!(curve.max_rpm(), 0.0);
    }

    #[test]
    fn rpm_is_clamped_to_curve_domain() {
        assert_eq!(engine_rpm(0.0, 5.0, 3.2, 600.0, 2800.0), 600.0);
        assert_eq!(engine_rpm(1000.0, 5.0, 3.2, 600.0, 2800.0), 2800.0);
        let mid = engine_rpm(-10.0, 2.0, 3.0, 0.0, 10_000.0);
        assert!((mid - 60.0 * RAD_PER_SEC_TO_RPM).abs() < EPS);
        assert_eq!(engine_rpm(f32::NAN, 2.0, 3.0, 600.0, 2800.0), 600.0);
    }

    #[test]
    fn starts_in_neutral_and_engages_first_on_throttle() {
        let cfg = tank();
        let mut dt = Drivetrain::new(&cfg);
        assert_eq!(dt.state().current_gear, 1);
        assert_eq!(dt.drive_torque(&cfg), 0.0);

        dt.update(&cfg, 0.0, 0.0, 0.0, 1.0 / 60.0);
        assert_eq!(dt.state().current_gear, 1);

        dt.update(&cfg, 1.0, 0.0, 0.0, 1.0 / 60.0);
        assert_eq!(dt.state().current_gear, 2);
        assert!(dt.drive_torque(&cfg) > 0.0);
    }

    #[test]
    fn neutral_free_revs_toward_throttle_target() {
        let cfg = VehicleConfig { auto_gear: false, ..tank() };
        let mut dt = Drivetrain::new(&cfg);
        let mut last = dt.state().engine_rpm;
        for _ in 0..120 {
            dt.update(&cfg, 1.0, 0.0, 0.0, 1.0 / 60.0);
            assert!(dt.state().engine_rpm >= last);
            last = dt.state().engine_rpm;
        }
        assert!(last > 2500.0 && last <= 2800.0);
        assert_eq!(dt.state().engine_torque, 0.0);
    }

    #[test]
    fn auto_upshift_respects_latency() {
        let cfg = tank();
        let mut dt = Drivetrain::new(&cfg);
        dt.select_gear(&cfg, 2);
        let fast = omega_for(&cfg, 2, 2700.0);

        dt.update(&cfg, 1.0, fast, 5.0, 0.1);
        assert_eq!(dt.state().current_gear, 2, "latency not elapsed yet");

        for _ in 0..6 {
            dt.update(&cfg, 1.0, fast, 5.0, 0.1);
        }
        assert_eq!(dt.state().current_gear, 3);
        assert!(dt.state().time_since_shift < cfg.gear_auto_box_latency);

        // fresh shift holds the box even with the rpm pinned high
        dt.update(&cfg, 1.0, omega_for(&cfg, 3, 2700.0), 5.0, 0.1);
        assert_eq!(dt.state().current_gear, 3);
    }

    #[test]
    fn upshift_held_while_hull_slower_than_last_shift() {
        let cfg = VehicleConfig { gear_auto_box_latency: 0.0, ..tank() };
        let mut dt = Drivetrain::new(&cfg);
        dt.select_gear(&cfg, 2);
        dt.update(&cfg, 1.0, omega_for(&cfg, 2, 2700.0), 8.0, 0.1);
        assert_eq!(dt.state().current_gear, 3);

        dt.update(&cfg, 1.0, omega_for(&cfg, 3, 2700.0), 6.0, 0.1);
        assert_eq!(dt.state().current_gear, 3);

        dt.update(&cfg, 1.0, omega_for(&cfg, 3, 2700.0), 9.0, 0.1);
        assert_eq!(dt.state().current_gear, 4);
    }

    #[test]
    fn auto_downshift_stops_at_first_forward() {
        let cfg = VehicleConfig { gear_auto_box_latency: 0.0, ..tank() };
        let mut dt = Drivetrain::new(&cfg);
        dt.select_gear(&cfg, 4);
        for _ in 0..10 {
            dt.update(&cfg, 0.0, 0.0, 0.0, 0.1);
        }
        assert_eq!(dt.state().current_gear, 2);
    }

    #[test]
    fn reverse_is_never_automatic() {
        let cfg = VehicleConfig { gear_auto_box_latency: 0.0, ..tank() };
        let mut dt = Drivetrain::new(&cfg);
        for _ in 0..10 {
            dt.update(&cfg, -1.0, 0.0, 0.0, 0.1);
        }
        assert_eq!(dt.state().current_gear, 1);
        assert!(!dt.state().reverse);

        dt.select_gear(&cfg, 0);
        assert!(dt.state().reverse);
        dt.update(&cfg, -1.0, 0.0, 0.0, 0.1);
        assert_eq!(dt.state().current_gear, 0);
        assert!(dt.drive_torque(&cfg) < 0.0);
        assert!(dt.opposes_gear(&cfg, 1.0));
        assert!(!dt.opposes_gear(&cfg, -1.0));
    }

    #[test]
    fn manual_requests_are_clamped() {
        let cfg = tank();
        let mut dt = Drivetrain::new(&cfg);
        dt.select_gear(&cfg, 99);
        assert_eq!(dt.state().current_gear, cfg.gears.len() - 1);
        assert!(!dt.shift_gear(&cfg, true));
        dt.select_gear(&cfg, 0);
        assert!(!dt.shift_gear(&cfg, false));
        assert!(dt.shift_gear(&cfg, true));
        assert_eq!(dt.state().current_gear, 1);
    }

    #[test]
    fn engine_torque_follows_formula() {
        let cfg = VehicleConfig { auto_gear: false, ..tank() };
        let mut dt = Drivetrain::new(&cfg);
        dt.select_gear(&cfg, 2);
        let omega = omega_for(&cfg, 2, 1200.0);
        dt.update(&cfg, 0.5, omega, 0.0, 0.016);

        let expected = 1600.0 * (1.0 + 0.5 * 0.2) * 0.9 * 0.5;
        assert!((dt.state().engine_rpm - 1200.0).abs() < 0.1);
        assert!((dt.state().engine_torque - expected).abs() < 1.0);
        assert!((dt.drive_torque(&cfg) - expected * 5.0 * 3.2).abs() < 10.0);
    }
}
