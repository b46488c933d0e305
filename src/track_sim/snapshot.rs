//! Read-only views of a stepper after a tick, for hosts and debug observers.

use std::fmt;

use serde::Serialize;

use crate::track_sim::track::TrackInfo;
use crate::track_sim::types::{Side, SurfaceKind};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WheelSnapshot {
    pub index: usize,
    pub side: Side,
    pub compression: f32,
    pub wheel_load: f32,
    pub ground_contact: bool,
    pub surface: SurfaceKind,
    pub hit_location: [f32; 3],
    pub hit_normal: [f32; 3],
    pub force: [f32; 3],
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VehicleSnapshot {
    pub gear: usize,
    pub neutral_gear: usize,
    pub gear_ratio: f32,
    pub reverse: bool,
    pub engine_rpm: f32,
    pub max_rpm: f32,
    pub engine_torque: f32,
    pub throttle: f32,
    pub steering: f32,
    pub handbrake: bool,
    pub forward_speed: f32,
    pub yaw_rate: f32,
    pub tracks: [TrackInfo; 2],
    pub wheels: Vec<WheelSnapshot>,
}

/// Debug sink the host implements. Called after a tick when debug is enabled.
pub trait StepObserver {
    fn observe(&mut self, snapshot: &VehicleSnapshot);
}

impl fmt::Display for VehicleSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let gear = if self.gear == self.neutral_gear {
            "N".to_string()
        } else if self.reverse {
            format!("R{}", self.gear)
        } else {
            self.gear.to_string()
        };

        writeln!(
            f,
            "gear {gear} ({:+.2})  rpm {:.0}/{:.0}  torque {:.0} Nm",
            self.gear_ratio, self.engine_rpm, self.max_rpm, self.engine_torque
        )?;
        writeln!(
            f,
            "throttle {:+.2}  steer {:+.2}  handbrake {}",
            self.throttle, self.steering, self.handbrake
        )?;
        writeln!(
            f,
            "speed {:+.2} m/s ({:+.1} km/h)  yaw {:+.3} rad/s",
            self.forward_speed,
            self.forward_speed * 3.6,
            self.yaw_rate
        )?;

        for t in &self.tracks {
            writeln!(
                f,
                "[{}] drive {:+.0}  fric {:.0}  roll {:.0}  brake {:.2}  ω {:+.2}  v {:+.2}  contacts {}",
                t.side,
                t.drive_torque,
                t.friction_torque,
                t.rolling_friction_torque,
                t.brake_ratio,
                t.angular_velocity,
                t.linear_velocity,
                t.active_friction_points
            )?;
        }

        for w in &self.wheels {
            let contact = if w.ground_contact { "*" } else { " " };
            writeln!(
                f,
                "  {}{:02}{} comp {:.3}  load {:.0}  {:?}",
                w.side, w.index, contact, w.compression, w.wheel_load, w.surface
            )?;
        }
        Ok(())
    }
}
