//! track_sim - engine-agnostic dual-track vehicle core (pure types + stepper)

pub mod types;
pub mod config;
pub mod friction;
pub mod suspension;
pub mod drivetrain;
pub mod track;
pub mod snapshot;
pub mod stepper;

pub use types::*;
pub use config::{GearConfig, SuspensionConfig, VehicleConfig};
pub use friction::FrictionEllipse;
pub use snapshot::{StepObserver, VehicleSnapshot, WheelSnapshot};
pub use stepper::{StepOutput, VehicleStepper};
pub use track::TrackInfo;
