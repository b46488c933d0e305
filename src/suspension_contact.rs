// ==============================================================================
// suspension_contact.rs — RAPIER GROUND PROBE FOR THE TRACK CORE
// ------------------------------------------------------------------------------
// The core asks for one ray per road wheel per tick. This adapter answers with
// rapier's QueryPipeline:
// - only colliders in GROUP_GROUND are considered
// - the vehicle's own body is excluded
// - surface kind is read from Collider::user_data (SurfaceKind::tag)
//
// This file does NOT apply forces. It only measures contact data.
// ==============================================================================

use rapier3d::prelude::*;

use track_physics::track_sim::{GroundProbe, RayHit, SurfaceKind, SuspensionRay};

use crate::physics::{GROUP_CHASSIS, GROUP_GROUND};

pub struct RapierProbe<'a> {
    pub query_pipeline: &'a QueryPipeline,
    pub bodies: &'a RigidBodySet,
    pub colliders: &'a ColliderSet,
    pub exclude: Option<RigidBodyHandle>,
}

impl<'a> RapierProbe<'a> {
    pub fn new(
        query_pipeline: &'a QueryPipeline,
        bodies: &'a RigidBodySet,
        colliders: &'a ColliderSet,
        exclude: Option<RigidBodyHandle>,
    ) -> Self {
        Self { query_pipeline, bodies, colliders, exclude }
    }
}

impl GroundProbe for RapierProbe<'_> {
    fn cast(&mut self, ray: &SuspensionRay) -> Option<RayHit> {
        let mut filter = QueryFilter::default()
            .groups(InteractionGroups::new(GROUP_CHASSIS, GROUP_GROUND));
        if let Some(body) = self.exclude {
            filter = filter.exclude_rigid_body(body);
        }

        let query = Ray::new(ray.origin, ray.direction);
        let (handle, hit) = self.query_pipeline.cast_ray_and_get_normal(
            self.bodies,
            self.colliders,
            &query,
            ray.max_distance,
            true,
            filter,
        )?;

        let surface = self
            .colliders
            .get(handle)
            .map_or(SurfaceKind::Default, |c| SurfaceKind::from_tag(c.user_data));

        Some(RayHit {
            distance: hit.time_of_impact,
            location: query.point_at(hit.time_of_impact),
            normal: hit.normal,
            surface,
        })
    }
}
