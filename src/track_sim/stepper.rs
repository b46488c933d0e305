// ==============================================================================
// stepper.rs — PER-TICK ORCHESTRATION FOR ONE TRACKED VEHICLE
// ------------------------------------------------------------------------------
// Fixed order inside step():
// 1) smooth throttle / steering toward the raw input
// 2) brake policy (handbrake, auto-brake, steering stabilizer)
// 3) drivetrain: engine rpm from last tick's tracks, gearbox, engine torque
// 4) suspension: one ray per wheel through the host GroundProbe
// 5) count active friction points per side
// 6) friction + track integration per side
// 7) hull forward speed and yaw rate from the speeds of tracks that touch
//    the ground; a track with no contact point carries the hull nowhere
//
// The host then integrates the hull pose from StepOutput. Nothing here reads a
// clock or a random source, so identical inputs give identical outputs.
// ==============================================================================

use std::sync::Arc;

use log::{error, warn};
use nalgebra::{Isometry3, Vector3};

use crate::track_sim::config::{GearConfig, VehicleConfig};
use crate::track_sim::drivetrain::{Drivetrain, THROTTLE_DEADZONE};
use crate::track_sim::friction::{friction_torque, rolling_friction_torque, select_ellipse};
use crate::track_sim::snapshot::{StepObserver, VehicleSnapshot, WheelSnapshot};
use crate::track_sim::suspension::{
    ResolvedMount, SuspensionFactors, SuspensionState, resolve_mount, suspension_ray, update_wheel,
};
use crate::track_sim::track::{TrackInfo, TrackState, differential_split, drive_force, steering_brake};
use crate::track_sim::types::{
    GroundProbe, Side, SkeletalPoseProvider, SuspensionRay, VehicleInput, hull_forward, hull_up, p3, v3,
};

/// Below this hull speed (m/s) the steering stabilizer stays off.
pub const STABILIZER_MIN_SPEED: f32 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct StepOutput {
    pub forward_speed: f32,             // m/s, along hull +Z
    pub yaw_rate: f32,                  // rad/s, + counter-clockwise about +Y
    pub linear_velocity: Vector3<f32>,  // world
    pub suspension_force: Vector3<f32>, // world, sum over wheels
    pub drive_force: Vector3<f32>,      // world, sum over tracks
    pub active_friction_points: usize,
}

pub struct VehicleStepper {
    config: Arc<VehicleConfig>,
    moment_of_inertia: f32,
    wheel_counts: [usize; 2],

    drivetrain: Drivetrain,
    tracks: [TrackState; 2],
    suspension: Vec<SuspensionState>,
    mounts: Vec<ResolvedMount>,
    warned_bones: Vec<bool>,
    reset_logged: [bool; 2],
    pose_provider: Option<Box<dyn SkeletalPoseProvider + Send + Sync>>,

    throttle: f32,
    steering: f32,
    handbrake: bool,
    active_points: [usize; 2],
    output: StepOutput,
    show_debug: bool,
}

impl VehicleStepper {
    pub fn new(config: VehicleConfig) -> Self {
        let config = Arc::new(config.validated());
        let wheels = config.suspension.len();
        let mounts = config
            .suspension
            .iter()
            .map(|s| resolve_mount(s, None))
            .collect();

        Self {
            moment_of_inertia: config.moment_of_inertia(),
            wheel_counts: [config.wheels_on(Side::Left), config.wheels_on(Side::Right)],
            drivetrain: Drivetrain::new(&config),
            tracks: [TrackState::default(); 2],
            suspension: vec![SuspensionState::extended(); wheels],
            mounts,
            warned_bones: vec![false; wheels],
            reset_logged: [false; 2],
            pose_provider: None,
            throttle: 0.0,
            steering: 0.0,
            handbrake: false,
            active_points: [0; 2],
            output: StepOutput::default(),
            show_debug: config.show_debug,
            config,
        }
    }

    /// Take suspension mounts from the host skeleton where a bone is named.
    pub fn with_pose_provider(mut self, provider: impl SkeletalPoseProvider + Send + Sync + 'static) -> Self {
        self.pose_provider = Some(Box::new(provider));
        self
    }

    // ------------------------------------------------------------------
    // Tick
    // ------------------------------------------------------------------

    pub fn step(
        &mut self,
        dt: f32,
        input: VehicleInput,
        hull_pose: &Isometry3<f32>,
        probe: &mut dyn GroundProbe,
    ) -> StepOutput {
        if !(dt > 0.0 && dt.is_finite()) {
            return self.output;
        }
        let config = Arc::clone(&self.config);
        let cfg = config.as_ref();
        let input = input.clamped();

        // 1) input smoothing
        self.throttle = smooth(self.throttle, input.throttle, cfg.throttle_up_ratio, cfg.throttle_down_ratio, dt);
        self.steering = smooth(self.steering, input.steering, cfg.throttle_up_ratio, cfg.throttle_down_ratio, dt);
        self.handbrake = input.handbrake;

        // 2) brakes
        let mut brakes = self.brake_policy(cfg);

        // 3) drivetrain
        let omega = 0.5 * (self.tracks[0].angular_velocity + self.tracks[1].angular_velocity);
        self.drivetrain.update(cfg, self.throttle, omega, self.output.forward_speed, dt);

        let base = self.drivetrain.drive_torque(cfg);
        let (drive_l, drive_r) = differential_split(base, self.steering, cfg.steering_brake_transfer);
        let drive = [drive_l, drive_r];
        let extra = steering_brake(self.steering, cfg.steering_brake_factor);
        for (b, e) in brakes.iter_mut().zip(extra) {
            *b = (*b + e).clamp(0.0, 1.0);
        }

        // 4) suspension
        self.update_suspension(cfg, hull_pose, probe, dt);

        // 5) active friction points
        self.active_points = [0; 2];
        for (s, wheel) in cfg.suspension.iter().zip(&self.suspension) {
            if wheel.ground_contact {
                self.active_points[s.side.index()] += 1;
            }
        }

        // 6) friction + tracks
        let forward_world = hull_pose.rotation * hull_forward();
        let shift = self.steering * cfg.steering_brake_transfer;
        let mut drive_force_sum = Vector3::zeros();

        for side in Side::BOTH {
            let i = side.index();
            let (friction, rolling, normal) = self.side_resistance(cfg, side);

            let track = &mut self.tracks[i];
            track.torque_transfer = match side {
                Side::Left => 1.0 - shift,
                Side::Right => 1.0 + shift,
            };
            track.input = self.throttle * track.torque_transfer;
            track.brake_ratio = brakes[i];
            track.step(
                drive[i],
                friction,
                rolling,
                cfg.brake_force,
                self.moment_of_inertia,
                cfg.sprocket_radius,
                dt,
            );
            track.drive_force = drive_force(
                &forward_world,
                &normal,
                drive[i],
                cfg.sprocket_radius,
                self.active_points[i],
                self.wheel_counts[i],
            );

            if !track.is_finite() {
                if !self.reset_logged[i] {
                    error!("{side} track went non-finite (drive {}), resetting to rest", drive[i]);
                    self.reset_logged[i] = true;
                }
                track.reset();
            } else {
                self.reset_logged[i] = false;
            }
            drive_force_sum += track.drive_force;
        }

        // 7) hull
        let [v_l, v_r] = [0, 1].map(|i| {
            if self.active_points[i] > 0 { self.tracks[i].linear_velocity } else { 0.0 }
        });
        let forward_speed = 0.5 * (v_l + v_r);
        let yaw_rate = (v_r - v_l) / cfg.track_separation;

        self.output = StepOutput {
            forward_speed,
            yaw_rate,
            linear_velocity: forward_world * forward_speed,
            suspension_force: self.suspension.iter().map(|s| s.force).sum(),
            drive_force: drive_force_sum,
            active_friction_points: self.active_points[0] + self.active_points[1],
        };
        self.output
    }

    fn brake_policy(&self, cfg: &VehicleConfig) -> [f32; 2] {
        if self.handbrake {
            return [1.0; 2];
        }

        let mut ratio = 0.0;
        if cfg.auto_brake {
            if self.throttle.abs() < THROTTLE_DEADZONE {
                ratio = 1.0;
            } else if self.drivetrain.opposes_gear(cfg, self.throttle) {
                ratio = self.throttle.abs();
            }
        }
        let mut brakes = [ratio; 2];

        let speed = self.output.forward_speed.abs();
        if cfg.steering_stabilizer && self.steering.abs() < THROTTLE_DEADZONE && speed > STABILIZER_MIN_SPEED {
            let (v_l, v_r) = (self.tracks[0].linear_velocity, self.tracks[1].linear_velocity);
            let imbalance = ((v_l - v_r).abs() / speed).clamp(0.0, 1.0);
            let faster = if v_l.abs() > v_r.abs() { 0 } else { 1 };
            brakes[faster] = (brakes[faster] + cfg.auto_brake_stable_transfer * imbalance).min(1.0);
        }
        brakes
    }

    fn update_suspension(
        &mut self,
        cfg: &VehicleConfig,
        hull_pose: &Isometry3<f32>,
        probe: &mut dyn GroundProbe,
        dt: f32,
    ) {
        let factors = SuspensionFactors { stiffness: cfg.stiffness_factor, damping: cfg.damping_factor };
        let provider = self.pose_provider.as_deref().map(|p| p as &dyn SkeletalPoseProvider);

        for (i, wheel_cfg) in cfg.suspension.iter().enumerate() {
            let mount = resolve_mount(wheel_cfg, provider);
            if mount.missing_bone && !self.warned_bones[i] {
                warn!(
                    "wheel {i}: bone {:?} not found, using static mount",
                    wheel_cfg.bone.as_deref().unwrap_or_default()
                );
                self.warned_bones[i] = true;
            }

            let ray = suspension_ray(i, wheel_cfg, &mount.pose, hull_pose);
            let hit = probe.cast(&ray);
            self.suspension[i] = update_wheel(wheel_cfg, &self.suspension[i], &ray, hit.as_ref(), dt, factors);
            self.mounts[i] = mount;
        }
    }

    /// (friction torque, rolling torque, mean contact normal) for one side,
    /// with slip taken from last tick's hull motion.
    fn side_resistance(&self, cfg: &VehicleConfig, side: Side) -> (f32, f32, Vector3<f32>) {
        let track_speed = self.tracks[side.index()].linear_velocity;
        let hull_speed = self.output.forward_speed;
        let yaw = self.output.yaw_rate;
        let radius = cfg.sprocket_radius;

        let mut friction = 0.0;
        let mut rolling = 0.0;
        let mut normal = Vector3::zeros();

        let wheels = cfg.suspension.iter().zip(&self.suspension).zip(&self.mounts);
        for ((wheel_cfg, wheel), mount) in wheels {
            if wheel_cfg.side != side || !wheel.ground_contact {
                continue;
            }
            let at = mount.pose.translation.vector;
            let slip = Vector3::new(yaw * at.z, 0.0, hull_speed - yaw * at.x - track_speed);
            let ellipse = select_ellipse(
                slip.norm(),
                cfg.friction_slip_threshold,
                &cfg.static_friction_ellipse,
                &cfg.kinetic_friction_ellipse,
            );
            let mu = ellipse.coefficient(&slip, &hull_forward()) * wheel.surface.friction_scale();

            friction += friction_torque(wheel.wheel_load, mu, radius);
            rolling += rolling_friction_torque(
                wheel.wheel_load,
                cfg.rolling_friction_coefficient,
                cfg.rolling_velocity_coefficient,
                track_speed,
                radius,
            );
            normal += wheel.hit_normal;
        }

        let normal = normal.try_normalize(1e-6).unwrap_or_else(hull_up);
        (friction * cfg.friction_torque_coefficient, rolling, normal)
    }

    // ------------------------------------------------------------------
    // Commands
    // ------------------------------------------------------------------

    pub fn shift_gear(&mut self, up: bool) -> bool {
        self.drivetrain.shift_gear(&self.config, up)
    }

    pub fn select_gear(&mut self, index: usize) {
        self.drivetrain.select_gear(&self.config, index);
    }

    pub fn show_debug(&mut self, enabled: bool) {
        self.show_debug = enabled;
    }

    pub fn is_debug(&self) -> bool {
        self.show_debug
    }

    /// Hand the latest snapshot to a debug observer, if debug is on.
    pub fn report_to(&self, observer: &mut dyn StepObserver) {
        if self.show_debug {
            observer.observe(&self.snapshot());
        }
    }

    // ------------------------------------------------------------------
    // Read-only stats
    // ------------------------------------------------------------------

    pub fn config(&self) -> &Arc<VehicleConfig> { &self.config }
    pub fn moment_of_inertia(&self) -> f32 { self.moment_of_inertia }
    pub fn last_output(&self) -> &StepOutput { &self.output }

    pub fn current_gear(&self) -> usize { self.drivetrain.state().current_gear }
    pub fn neutral_gear(&self) -> usize { self.drivetrain.neutral_gear() }
    pub fn is_reverse(&self) -> bool { self.drivetrain.state().reverse }
    pub fn gear_count(&self) -> usize { self.config.gears.len() }

    /// Current gear when `index` is None.
    pub fn gear_info(&self, index: Option<usize>) -> Option<GearConfig> {
        let index = index.unwrap_or_else(|| self.current_gear());
        self.config.gears.get(index).copied()
    }

    pub fn engine_rpm(&self) -> f32 { self.drivetrain.state().engine_rpm }
    pub fn min_rpm(&self) -> f32 { self.drivetrain.min_rpm() }
    pub fn max_rpm(&self) -> f32 { self.drivetrain.max_rpm() }
    pub fn engine_torque(&self) -> f32 { self.drivetrain.state().engine_torque }
    pub fn time_since_shift(&self) -> f32 { self.drivetrain.state().time_since_shift }

    pub fn throttle(&self) -> f32 { self.throttle }
    pub fn steering(&self) -> f32 { self.steering }

    pub fn track(&self, side: Side) -> &TrackState { &self.tracks[side.index()] }
    pub fn drive_torque(&self, side: Side) -> f32 { self.track(side).drive_torque }
    pub fn angular_velocity(&self, side: Side) -> f32 { self.track(side).angular_velocity }
    pub fn brake_ratio(&self, side: Side) -> f32 { self.track(side).brake_ratio }

    pub fn track_info(&self, side: Side) -> TrackInfo {
        self.track(side).info(side, self.active_points[side.index()])
    }

    pub fn forward_speed(&self) -> f32 { self.output.forward_speed }
    pub fn yaw_rate(&self) -> f32 { self.output.yaw_rate }

    pub fn active_friction_points(&self, side: Side) -> usize {
        self.active_points[side.index()]
    }

    pub fn suspension_states(&self) -> &[SuspensionState] {
        &self.suspension
    }

    /// Rays the next tick would cast for `hull_pose`.
    pub fn suspension_rays(&self, hull_pose: &Isometry3<f32>) -> Vec<SuspensionRay> {
        self.config
            .suspension
            .iter()
            .zip(&self.mounts)
            .enumerate()
            .map(|(i, (cfg, mount))| suspension_ray(i, cfg, &mount.pose, hull_pose))
            .collect()
    }

    pub fn snapshot(&self) -> VehicleSnapshot {
        let state = self.drivetrain.state();
        let wheels = self
            .config
            .suspension
            .iter()
            .zip(&self.suspension)
            .enumerate()
            .map(|(index, (cfg, s))| WheelSnapshot {
                index,
                side: cfg.side,
                compression: s.compression,
                wheel_load: s.wheel_load,
                ground_contact: s.ground_contact,
                surface: s.surface,
                hit_location: p3(&s.hit_location),
                hit_normal: v3(&s.hit_normal),
                force: v3(&s.force),
            })
            .collect();

        VehicleSnapshot {
            gear: state.current_gear,
            neutral_gear: self.neutral_gear(),
            gear_ratio: self.drivetrain.gear_ratio(&self.config),
            reverse: state.reverse,
            engine_rpm: state.engine_rpm,
            max_rpm: self.max_rpm(),
            engine_torque: state.engine_torque,
            throttle: self.throttle,
            steering: self.steering,
            handbrake: self.handbrake,
            forward_speed: self.output.forward_speed,
            yaw_rate: self.output.yaw_rate,
            tracks: [self.track_info(Side::Left), self.track_info(Side::Right)],
            wheels,
        }
    }
}

/// First-order approach toward `target`: `up` rate while the magnitude grows.
pub fn smooth(current: f32, target: f32, up: f32, down: f32, dt: f32) -> f32 {
    let rate = if target.abs() > current.abs() { up } else { down };
    let k = (rate * dt).clamp(0.0, 1.0);
    current + (target - current) * k
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::track_sim::types::FlatGround;

    const DT: f32 = 1.0 / 60.0;

    fn hull_at(height: f32) -> Isometry3<f32> {
        Isometry3::translation(0.0, height, 0.0)
    }

    #[test]
    fn smoothing_approaches_without_overshoot() {
        let mut x = 0.0;
        for _ in 0..200 {
            x = smooth(x, 1.0, 8.0, 4.0, DT);
            assert!(x <= 1.0);
        }
        assert!((x - 1.0).abs() < 1e-3);
        assert_eq!(smooth(0.5, -1.0, 1000.0, 1000.0, 1.0), -1.0);
    }

    #[test]
    fn non_positive_dt_is_a_no_op() {
        let mut stepper = VehicleStepper::new(VehicleConfig::tank());
        let mut ground = FlatGround::new(0.0);
        let input = VehicleInput::new(1.0, 0.0, false);
        stepper.step(0.0, input, &hull_at(0.55), &mut ground);
        stepper.step(f32::NAN, input, &hull_at(0.55), &mut ground);
        assert_eq!(stepper.throttle(), 0.0);
        assert_eq!(stepper.active_friction_points(Side::Left), 0);
    }

    #[test]
    fn resting_hull_loads_every_wheel() {
        let mut stepper = VehicleStepper::new(VehicleConfig::tank());
        let mut ground = FlatGround::new(0.0);
        let out = stepper.step(DT, VehicleInput::default(), &hull_at(0.55), &mut ground);

        assert_eq!(out.active_friction_points, 12);
        assert!(out.suspension_force.y > 0.0);
        assert_eq!(stepper.forward_speed(), 0.0);
        assert_eq!(stepper.brake_ratio(Side::Left), 1.0, "idle throttle auto-brakes");
    }

    #[test]
    fn gear_info_defaults_to_current() {
        let mut stepper = VehicleStepper::new(VehicleConfig::tank());
        assert_eq!(stepper.gear_info(None), Some(VehicleConfig::tank().gears[1]));
        stepper.select_gear(3);
        assert_eq!(stepper.gear_info(None).map(|g| g.ratio), Some(3.2));
        assert_eq!(stepper.gear_info(Some(42)), None);
    }

    struct Count(usize);

    impl StepObserver for Count {
        fn observe(&mut self, snapshot: &VehicleSnapshot) {
            self.0 += snapshot.wheels.len();
        }
    }

    #[test]
    fn observer_only_sees_debug_ticks() {
        let mut stepper = VehicleStepper::new(VehicleConfig::tank());
        let mut seen = Count(0);
        stepper.report_to(&mut seen);
        assert_eq!(seen.0, 0);

        stepper.show_debug(true);
        stepper.report_to(&mut seen);
        assert_eq!(seen.0, 12);
    }

    #[test]
    fn snapshot_text_lists_tracks_and_wheels() {
        let mut stepper = VehicleStepper::new(VehicleConfig::tank());
        let mut ground = FlatGround::new(0.0);
        stepper.step(DT, VehicleInput::default(), &hull_at(0.55), &mut ground);
        let text = stepper.snapshot().to_string();
        assert!(text.starts_with("gear N"));
        assert!(text.contains("[L]") && text.contains("[R]"));
        assert_eq!(text.lines().count(), 3 + 2 + 12);
    }
}
