//! Conservative visibility test for spherical patches.
//!
//! A patch (an [`AngularRect`] on the globe) is sampled at its corners, edge
//! midpoints and centre, each at the base radius and at the relief-raised
//! radius, and projected through the view-projection matrix. A patch whose
//! samples are all hidden behind the base sphere is culled; otherwise it is
//! visible when the NDC bounds of its samples overlap the clip volume. A camera
//! close to the patch centre always sees the patch, since corner sampling misses
//! patches that surround the camera.
//!
//! False positives are fine (an extra tile gets loaded); false negatives show up
//! as popping, so every approximation errs toward visible.

use glam::{Mat4, Vec3, Vec4, Vec4Swizzles};

use crate::grid::{AngularRect, direction_from_angles};

/// Clip-space `w` at or below which a sample is treated as behind the camera.
const W_EPSILON: f32 = 1e-6;

/// Shrink applied to the occluding sphere so tangent samples stay visible.
const OCCLUDER_SHRINK: f32 = 1e-4;

/// Tunables for [`VisibilityClassifier`].
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct VisibilityParams {
    /// Globe radius in world units. The globe is centred at the origin.
    pub radius: f32,
    /// Maximum displacement as a fraction of the radius.
    pub relief_margin: f32,
    /// Patch is always visible when the eye is closer than this many radii to
    /// the patch centre on the surface.
    pub proximity_threshold: f32,
    /// Cull patches whose samples are all hidden behind the base sphere.
    pub horizon_culling: bool,
}

impl Default for VisibilityParams {
    fn default() -> Self {
        Self {
            radius: 1.0,
            relief_margin: 0.1,
            proximity_threshold: 1.2,
            horizon_culling: true,
        }
    }
}

/// Camera state for one visibility pass.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ViewState {
    pub view_projection: Mat4,
    /// Eye position in world space, if known.
    pub eye: Option<Vec3>,
}

impl ViewState {
    /// Derive the eye from the matrix; orthographic projections have none.
    pub fn from_view_projection(view_projection: Mat4) -> Self {
        Self {
            view_projection,
            eye: eye_from_view_projection(&view_projection),
        }
    }

    pub fn with_eye(view_projection: Mat4, eye: Vec3) -> Self {
        Self {
            view_projection,
            eye: Some(eye),
        }
    }
}

/// Recover the eye position of a perspective view-projection matrix.
///
/// The eye is the only point that maps to clip-space `w = 0` with `x = y = 0`,
/// so it is the homogeneous image of `(0, 0, 1, 0)` under the inverse.
pub fn eye_from_view_projection(view_projection: &Mat4) -> Option<Vec3> {
    let det = view_projection.determinant();
    if det == 0.0 || !det.is_finite() {
        return None;
    }
    let h = view_projection.inverse() * Vec4::Z;
    if h.w.abs() <= f32::EPSILON || !h.is_finite() {
        return None;
    }
    Some(h.xyz() / h.w)
}

/// Decides whether a spherical patch may be visible.
#[derive(Clone, Copy, Debug, Default)]
pub struct VisibilityClassifier {
    params: VisibilityParams,
}

impl VisibilityClassifier {
    pub fn new(params: VisibilityParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &VisibilityParams {
        &self.params
    }

    /// Whether the patch `rect` may be visible from `view`.
    pub fn is_visible(&self, rect: &AngularRect, view: &ViewState) -> bool {
        let radius = self.params.radius;
        let raised = radius * (1.0 + self.params.relief_margin.max(0.0));
        let occluding_eye = view
            .eye
            .filter(|eye| self.params.horizon_culling && eye.length() > radius);

        let mut ndc_min = Vec3::splat(f32::INFINITY);
        let mut ndc_max = Vec3::splat(f32::NEG_INFINITY);
        let mut projected = false;
        let mut any_unoccluded = false;

        for dir in sample_directions(rect) {
            for r in [radius, raised] {
                let point = dir * r;
                let occluded = occluding_eye.is_some_and(|eye| is_occluded(eye, point, radius));
                any_unoccluded |= !occluded;

                let clip = view.view_projection * point.extend(1.0);
                if clip.w <= W_EPSILON {
                    continue;
                }
                let ndc = clip.xyz() / clip.w;
                if !occluded && ndc.abs().cmple(Vec3::ONE).all() {
                    return true;
                }
                // Occluded samples still bound the patch: the visible part of a
                // patch cut by the limb lies between them and the unoccluded ones.
                ndc_min = ndc_min.min(ndc);
                ndc_max = ndc_max.max(ndc);
                projected = true;
            }
        }

        if any_unoccluded
            && projected
            && ndc_min.cmple(Vec3::ONE).all()
            && ndc_max.cmpge(Vec3::NEG_ONE).all()
        {
            return true;
        }

        self.is_near_patch(rect, view.eye)
    }

    /// Proximity fallback for a camera hovering over the patch.
    fn is_near_patch(&self, rect: &AngularRect, eye: Option<Vec3>) -> bool {
        let Some(eye) = eye else {
            return false;
        };
        let (phi, theta) = rect.center();
        let center = direction_from_angles(phi, theta) * self.params.radius;
        eye.distance(center) < self.params.proximity_threshold * self.params.radius
    }
}

/// Corners, edge midpoints and centre of the patch as unit directions.
fn sample_directions(rect: &AngularRect) -> [Vec3; 9] {
    let (phi_mid, theta_mid) = rect.center();
    [
        (rect.phi0, rect.theta0),
        (rect.phi0, rect.theta1),
        (rect.phi1, rect.theta0),
        (rect.phi1, rect.theta1),
        (phi_mid, rect.theta0),
        (phi_mid, rect.theta1),
        (rect.phi0, theta_mid),
        (rect.phi1, theta_mid),
        (phi_mid, theta_mid),
    ]
    .map(|(phi, theta)| direction_from_angles(phi, theta))
}

/// Whether the segment from `eye` to `point` passes through the sphere of
/// `radius` centred at the origin.
fn is_occluded(eye: Vec3, point: Vec3, radius: f32) -> bool {
    let to_point = point - eye;
    let len_sq = to_point.length_squared();
    if len_sq <= f32::EPSILON {
        return false;
    }
    let t = (-eye.dot(to_point) / len_sq).clamp(0.0, 1.0);
    let closest = eye + to_point * t;
    let occluder = radius * (1.0 - OCCLUDER_SHRINK);
    closest.length_squared() < occluder * occluder
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coord::GridCoordinate;
    use crate::grid::TileGrid;
    use std::f32::consts::{FRAC_PI_2, FRAC_PI_4, PI};

    fn look_at_origin(eye: Vec3) -> Mat4 {
        let up = if eye.normalize().y.abs() > 0.99 { Vec3::Z } else { Vec3::Y };
        Mat4::perspective_rh(FRAC_PI_4, 1.0, 0.01, 100.0) * Mat4::look_at_rh(eye, Vec3::ZERO, up)
    }

    fn visible_set(grid: &TileGrid, classifier: &VisibilityClassifier, view: &ViewState) -> Vec<GridCoordinate> {
        grid.coords()
            .filter(|&c| classifier.is_visible(&grid.cell_bounds(c).angular, view))
            .collect()
    }

    fn small_patch(phi: f32, theta: f32, half: f32) -> AngularRect {
        AngularRect {
            phi0: phi - half,
            theta0: theta - half,
            phi1: phi + half,
            theta1: theta + half,
        }
    }

    #[test]
    fn test_eye_recovered_from_view_projection() {
        let eye = Vec3::new(1.5, -2.0, 2.5);
        let recovered = eye_from_view_projection(&look_at_origin(eye)).unwrap();
        assert!(recovered.distance(eye) < 1e-2, "recovered {recovered}");
    }

    #[test]
    fn test_orthographic_projection_has_no_eye() {
        let vp = Mat4::orthographic_rh(-2.0, 2.0, -2.0, 2.0, 0.1, 10.0)
            * Mat4::look_at_rh(Vec3::new(0.0, 0.0, 3.0), Vec3::ZERO, Vec3::Y);
        assert!(eye_from_view_projection(&vp).is_none());
        assert!(eye_from_view_projection(&Mat4::ZERO).is_none());
    }

    #[test]
    fn test_patch_facing_camera_is_visible() {
        let classifier = VisibilityClassifier::default();
        let view = ViewState::from_view_projection(look_at_origin(Vec3::new(0.0, 0.0, 3.0)));
        assert!(classifier.is_visible(&small_patch(FRAC_PI_2, FRAC_PI_2, 0.05), &view));
    }

    #[test]
    fn test_patch_on_far_side_is_culled() {
        let classifier = VisibilityClassifier::default();
        let view = ViewState::from_view_projection(look_at_origin(Vec3::new(0.0, 0.0, 3.0)));
        // -Z is directly behind the globe and projects to the middle of the screen.
        assert!(!classifier.is_visible(&small_patch(FRAC_PI_2, 1.5 * PI, 0.05), &view));
    }

    #[test]
    fn test_horizon_culling_can_be_disabled() {
        let classifier = VisibilityClassifier::new(VisibilityParams {
            horizon_culling: false,
            ..Default::default()
        });
        let view = ViewState::from_view_projection(look_at_origin(Vec3::new(0.0, 0.0, 3.0)));
        assert!(classifier.is_visible(&small_patch(FRAC_PI_2, 1.5 * PI, 0.05), &view));
    }

    #[test]
    fn test_camera_facing_away_sees_nothing() {
        let classifier = VisibilityClassifier::default();
        let eye = Vec3::new(0.0, 0.0, 3.0);
        let vp = Mat4::perspective_rh(FRAC_PI_4, 1.0, 0.01, 100.0)
            * Mat4::look_at_rh(eye, Vec3::new(0.0, 0.0, 6.0), Vec3::Y);
        let view = ViewState::from_view_projection(vp);
        let grid = TileGrid::new(8, 16);
        assert!(visible_set(&grid, &classifier, &view).is_empty());
    }

    #[test]
    fn test_relief_margin_keeps_patch_past_the_limb() {
        let view = ViewState::from_view_projection(look_at_origin(Vec3::new(0.0, 0.0, 3.0)));
        // ~86° from the sub-camera point: behind the base horizon (~70.5°) but
        // within reach of terrain raised by 10%.
        let patch = small_patch(FRAC_PI_2, PI - 0.06, 0.01);

        let with_relief = VisibilityClassifier::default();
        let flat = VisibilityClassifier::new(VisibilityParams {
            relief_margin: 0.0,
            ..Default::default()
        });
        assert!(with_relief.is_visible(&patch, &view));
        assert!(!flat.is_visible(&patch, &view));
    }

    #[test]
    fn test_camera_inside_patch_uses_proximity_fallback() {
        let classifier = VisibilityClassifier::default();
        let grid = TileGrid::new(4, 4);
        let coord = GridCoordinate::new(1, 0);
        let (phi, theta) = grid.cell_bounds(coord).angular.center();
        let normal = direction_from_angles(phi, theta);

        // Hovering just above the surface, looking along the horizon.
        let eye = normal * 1.02;
        let tangent = normal.cross(Vec3::Y).normalize();
        let vp = Mat4::perspective_rh(0.2, 1.0, 0.5, 100.0)
            * Mat4::look_at_rh(eye, eye + tangent, normal);
        let view = ViewState::from_view_projection(vp);
        assert!(classifier.is_visible(&grid.cell_bounds(coord).angular, &view));
    }

    #[test]
    fn test_visibility_is_monotonic_when_approaching() {
        let classifier = VisibilityClassifier::default();
        let grid = TileGrid::new(16, 32);
        for coord in [GridCoordinate::new(8, 5), GridCoordinate::new(2, 30), GridCoordinate::new(15, 0)] {
            let rect = grid.cell_bounds(coord).angular;
            let (phi, theta) = rect.center();
            let normal = direction_from_angles(phi, theta);
            let mut distance = 6.0;
            while distance > 1.01 {
                let view = ViewState::from_view_projection(look_at_origin(normal * distance));
                assert!(
                    classifier.is_visible(&rect, &view),
                    "{coord} lost visibility at distance {distance}"
                );
                distance *= 0.9;
            }
        }
    }

    #[test]
    fn test_hemisphere_facing_positive_z_without_relief() {
        let classifier = VisibilityClassifier::new(VisibilityParams {
            relief_margin: 0.0,
            ..Default::default()
        });
        let grid = TileGrid::new(4, 4);
        let view = ViewState::from_view_projection(look_at_origin(Vec3::new(0.0, 0.0, 3.0)));
        let visible = visible_set(&grid, &classifier, &view);

        // Segments 0 and 1 meet at theta = π/2 (+Z); 2 and 3 face -Z.
        let expected: Vec<_> = grid.coords().filter(|c| c.segment <= 1).collect();
        assert_eq!(visible, expected);
    }

    #[test]
    fn test_antipodal_quadrant_excluded_with_relief() {
        let classifier = VisibilityClassifier::default();
        let grid = TileGrid::new(4, 4);
        // Camera over the centre of segment 0 (theta = π/4) on the equator.
        let eye = direction_from_angles(FRAC_PI_2, FRAC_PI_4) * 3.0;
        let view = ViewState::from_view_projection(look_at_origin(eye));
        let visible = visible_set(&grid, &classifier, &view);

        for ring in 0..4 {
            assert!(visible.contains(&GridCoordinate::new(ring, 0)), "ring {ring} of the facing segment");
        }
        for ring in 1..3 {
            assert!(
                !visible.contains(&GridCoordinate::new(ring, 2)),
                "antipodal cell ({ring}, 2) must be culled"
            );
        }
        // The band of visible segments wraps contiguously around segment 0.
        for coord in &visible {
            assert!(
                matches!(coord.segment, 3 | 0 | 1) || coord.ring == 0 || coord.ring == 3,
                "unexpected visible cell {coord}"
            );
        }
    }

    /// Deterministic 64-bit LCG, enough to scatter cameras reproducibly.
    struct Lcg(u64);

    impl Lcg {
        fn next_f32(&mut self) -> f32 {
            self.0 = self
                .0
                .wrapping_mul(6364136223846793005)
                .wrapping_add(1442695040888963407);
            (self.0 >> 40) as f32 / (1u64 << 24) as f32
        }

        fn range(&mut self, lo: f32, hi: f32) -> f32 {
            lo + (hi - lo) * self.next_f32()
        }

        fn unit_vector(&mut self) -> Vec3 {
            loop {
                let v = Vec3::new(self.range(-1.0, 1.0), self.range(-1.0, 1.0), self.range(-1.0, 1.0));
                let len = v.length();
                if len > 0.1 && len <= 1.0 {
                    return v / len;
                }
            }
        }
    }

    /// A point of the base sphere inside `rect` that is in front of the horizon
    /// and strictly on screen, if any, searched on a `steps`² lattice.
    fn visible_surface_point(rect: &AngularRect, eye: Vec3, vp: &Mat4, steps: u32) -> Option<Vec3> {
        for i in 0..=steps {
            for j in 0..=steps {
                let phi = rect.phi0 + (rect.phi1 - rect.phi0) * i as f32 / steps as f32;
                let theta = rect.theta0 + (rect.theta1 - rect.theta0) * j as f32 / steps as f32;
                let point = direction_from_angles(phi, theta);
                if point.dot(eye) <= 1.001 {
                    continue;
                }
                let clip = *vp * point.extend(1.0);
                if clip.w <= 1e-3 {
                    continue;
                }
                if (clip.xyz() / clip.w).abs().cmplt(Vec3::splat(0.999)).all() {
                    return Some(point);
                }
            }
        }
        None
    }

    #[test]
    fn test_no_visible_surface_is_culled_across_random_views() {
        let classifier = VisibilityClassifier::default();
        let grids = [TileGrid::new(4, 4), TileGrid::new(8, 16), TileGrid::new(16, 32)];
        let mut rng = Lcg(0x5eed_1234_abcd_0001);
        let mut misses = Vec::new();

        for _ in 0..200 {
            let eye = rng.unit_vector() * rng.range(1.02, 5.02);
            let target = rng.unit_vector() * rng.range(0.0, 1.5);
            let forward = (target - eye).normalize();
            let up = if forward.y.abs() > 0.99 { Vec3::Z } else { Vec3::Y };
            let vp = Mat4::perspective_rh(rng.range(0.5, 1.6), rng.range(1.0, 2.0), 0.005, 100.0)
                * Mat4::look_at_rh(eye, eye + forward, up);
            let view = ViewState::with_eye(vp, eye);

            for grid in &grids {
                for coord in grid.coords() {
                    let rect = grid.cell_bounds(coord).angular;
                    if classifier.is_visible(&rect, &view) {
                        continue;
                    }
                    if let Some(point) = visible_surface_point(&rect, eye, &vp, 16) {
                        misses.push(format!(
                            "({}x{}) {coord} eye {eye} point {point}",
                            grid.rings(),
                            grid.segments()
                        ));
                    }
                }
            }
        }
        assert!(misses.is_empty(), "{} culled cells with visible surface: {misses:?}", misses.len());
    }

    #[test]
    fn test_patch_cut_by_limb_stays_visible() {
        let classifier = VisibilityClassifier::default();
        // Looking past the northern limb: the unoccluded samples of this cell all
        // project above the screen, while the strip between them and the limb is
        // in view.
        let eye = Vec3::new(0.0, 0.0, 1.5);
        let vp = Mat4::perspective_rh(0.8, 1.0, 0.01, 100.0)
            * Mat4::look_at_rh(eye, Vec3::new(0.5, 0.5, 0.0), Vec3::Y);
        let view = ViewState::with_eye(vp, eye);
        let grid = TileGrid::new(8, 16);
        let rect = grid.cell_bounds(GridCoordinate::new(1, 3)).angular;

        assert!(visible_surface_point(&rect, eye, &vp, 32).is_some());
        assert!(classifier.is_visible(&rect, &view));
    }

    #[test]
    fn test_occlusion_geometry() {
        let eye = Vec3::new(0.0, 0.0, 3.0);
        assert!(!is_occluded(eye, Vec3::Z, 1.0));
        assert!(is_occluded(eye, Vec3::NEG_Z, 1.0));
        assert!(is_occluded(eye, Vec3::X, 1.0));
        assert!(!is_occluded(eye, Vec3::X * 1.1, 1.0));
    }
}
