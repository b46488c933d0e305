// ==============================================================================
// debug_builders.rs — DEBUG OVERLAY PRIMITIVES (SERVER -> CLIENT)
// ------------------------------------------------------------------------------
// Serializable debug primitives built from the track core:
// - DebugRay: suspension raycasts and load bars
// - DebugWheel: per-wheel numeric state (contact, compression, load, surface)
// - text: the VehicleSnapshot text dump
//
// DebugOverlay implements StepObserver, so the stepper fills it directly.
// Ray origins are not part of a snapshot; the host adds them with push_rays().
//
// This file is purely visualization scaffolding and should not contain physics
// side effects.
// ==============================================================================

use serde::Serialize;

use track_physics::track_sim::{StepObserver, SuspensionRay, SurfaceKind, VehicleSnapshot, p3, v3};

/// Newtons per metre of load bar.
const LOAD_BAR_SCALE: f32 = 1.0 / 40_000.0;

const COLOR_HIT: [f32; 3] = [0.1, 0.9, 0.2];
const COLOR_MISS: [f32; 3] = [0.9, 0.2, 0.1];
const COLOR_LOAD: [f32; 3] = [0.2, 0.5, 1.0];

#[derive(Debug, Clone, Default, Serialize)]
pub struct DebugOverlay {
    pub vehicle_id: String,
    pub suspension_rays: Vec<DebugRay>,
    pub load_bars: Vec<DebugRay>,
    pub wheels: Vec<DebugWheel>,
    pub text: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct DebugRay {
    pub origin: [f32; 3],
    pub direction: [f32; 3],
    pub length: f32,
    pub hit: Option<[f32; 3]>,
    pub color: [f32; 3],
}

#[derive(Debug, Clone, Serialize)]
pub struct DebugWheel {
    pub id: String,                 // "L00", "R05", ...
    pub grounded: bool,
    pub compression: f32,
    pub normal_force: f32,
    pub hit_location: [f32; 3],
    pub surface: SurfaceKind,
}

impl DebugOverlay {
    pub fn new(vehicle_id: &str) -> Self {
        Self { vehicle_id: vehicle_id.to_string(), ..Self::default() }
    }

    pub fn clear(&mut self) {
        self.suspension_rays.clear();
        self.load_bars.clear();
        self.wheels.clear();
        self.text.clear();
    }

    /// Rays as cast this tick; `wheels` must already be filled by observe().
    pub fn push_rays(&mut self, rays: &[SuspensionRay]) {
        for ray in rays {
            let wheel = self.wheels.get(ray.wheel).filter(|w| w.grounded);
            let grounded = wheel.is_some();
            self.suspension_rays.push(DebugRay {
                origin: p3(&ray.origin),
                direction: v3(&ray.direction),
                length: ray.max_distance,
                hit: wheel.map(|w| w.hit_location),
                color: if grounded { COLOR_HIT } else { COLOR_MISS },
            });
        }
    }
}

impl StepObserver for DebugOverlay {
    fn observe(&mut self, snapshot: &VehicleSnapshot) {
        self.clear();
        self.text = snapshot.to_string();

        for w in &snapshot.wheels {
            self.wheels.push(DebugWheel {
                id: format!("{}{:02}", w.side, w.index),
                grounded: w.ground_contact,
                compression: w.compression,
                normal_force: w.wheel_load,
                hit_location: w.hit_location,
                surface: w.surface,
            });

            if w.ground_contact {
                self.load_bars.push(DebugRay {
                    origin: w.hit_location,
                    direction: w.hit_normal,
                    length: w.wheel_load * LOAD_BAR_SCALE,
                    hit: None,
                    color: COLOR_LOAD,
                });
            }
        }
    }
}
