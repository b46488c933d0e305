//! Tracked vehicle physics: suspension, drivetrain, skid-steer track dynamics.
//!
//! The simulation core lives in [`track_sim`] and knows nothing about the host
//! physics engine. Hosts answer suspension ray casts through
//! [`track_sim::GroundProbe`] and integrate the hull pose from the returned
//! [`track_sim::StepOutput`].

pub mod track_sim;
