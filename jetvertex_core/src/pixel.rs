//! Consistency of track hit patterns with a vertex position.
//!
//! A track produced at radius R cannot have a clean hit on a pixel layer
//! well inside R, and a track produced inside a layer should have crossed it.

use crate::config::DetectorLayout;
use crate::geometry::radius_error;
use jetvertex_fit::{hit_bits, PackedCovariance, Track};
use nalgebra::Vector3;

/// Pixel layer content of one track. A value of -1 means "not expected".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct PixelLayers {
    innermost: i32,
    layer1: i32,
    layer2: i32,
    n_layers: i32,
}

impl PixelLayers {
    fn of(track: &Track, layout: &DetectorLayout) -> Self {
        let h = &track.hits;
        let l2 = h.has_bit(hit_bits::PIXEL_BARREL_2) as i32;
        if layout.has_insertable_layer {
            Self {
                innermost: if h.expect_innermost { h.innermost_hits as i32 } else { -1 },
                layer1: if h.expect_next_innermost { h.next_innermost_hits as i32 } else { -1 },
                layer2: l2,
                n_layers: h.contributing_pixel_layers as i32,
            }
        } else {
            Self {
                innermost: h.innermost_hits as i32,
                layer1: h.has_bit(hit_bits::PIXEL_BARREL_1) as i32,
                layer2: l2,
                n_layers: h.contributing_pixel_layers as i32,
            }
        }
    }
}

/// Shared plus split hits on the two innermost layers.
fn pixel_problems(track: &Track, layout: &DetectorLayout) -> (u32, u32) {
    if !layout.has_insertable_layer {
        return (0, 0);
    }
    let h = &track.hits;
    (
        h.innermost_shared as u32 + h.innermost_split as u32,
        h.next_innermost_shared as u32 + h.next_innermost_split as u32,
    )
}

fn disc_hits(track: &Track) -> u32 {
    let h = &track.hits;
    h.has_bit(hit_bits::PIXEL_ENDCAP_0) as u32
        + h.has_bit(hit_bits::PIXEL_ENDCAP_1) as u32
        + h.has_bit(hit_bits::PIXEL_ENDCAP_2) as u32
}

/// Hit-pattern check of a two-track vertex.
pub fn check_two_track_vertex(
    t1: &Track,
    t2: &Track,
    position: &Vector3<f64>,
    cov: &PackedCovariance,
    layout: &DetectorLayout,
) -> bool {
    let a = PixelLayers::of(t1, layout);
    let b = PixelLayers::of(t2, layout);
    let (a_bp, a_l1p) = pixel_problems(t1, layout);
    let (b_bp, b_l1p) = pixel_problems(t2, layout);

    let err = radius_error(position, cov);
    let dist_b = layout.innermost.distance(position.x, position.y);

    if dist_b < layout.innermost.radius - err {
        // Inside the innermost layer
        if a.innermost == 0 && b.innermost == 0 {
            return false;
        }
        if a.innermost < 1 && a.layer1 < 1 {
            return false;
        }
        if b.innermost < 1 && b.layer1 < 1 {
            return false;
        }
        return a.n_layers >= 2 && b.n_layers >= 2;
    } else if dist_b > layout.innermost.radius + err
        && a.innermost > 0
        && a_bp == 0
        && b.innermost > 0
        && b_bp == 0
    {
        return false;
    }

    if position.z.abs() < layout.barrel_half_length {
        let dist_1 = layout.layer1.distance(position.x, position.y);
        let dist_2 = layout.layer2.distance(position.x, position.y);

        if dist_1 < layout.layer1.radius - err {
            if a.layer1 == 0 && b.layer1 == 0 {
                return false;
            }
            if a.layer1 < 1 && a.layer2 < 1 {
                return false;
            }
            if b.layer1 < 1 && b.layer2 < 1 {
                return false;
            }
            return true;
        } else if dist_1 > layout.layer1.radius + err
            && a.layer1 > 0
            && a_l1p == 0
            && b.layer1 > 0
            && b_l1p == 0
        {
            return false;
        }

        if dist_2 < layout.layer2.radius - err && a.layer2 + b.layer2 == 0 {
            return false;
        }
    } else if disc_hits(t1) == 0 || disc_hits(t2) == 0 {
        return false;
    }
    true
}

/// Hit-pattern check of a one-track vertex: the lone track must have crossed
/// every layer outside the vertex and carry no clean hit well inside it.
pub fn check_one_track_vertex(
    track: &Track,
    position: &Vector3<f64>,
    cov: &PackedCovariance,
    layout: &DetectorLayout,
) -> bool {
    let t = PixelLayers::of(track, layout);
    let (bp, l1p) = pixel_problems(track, layout);
    let err = radius_error(position, cov);
    let dist_b = layout.innermost.distance(position.x, position.y);

    if dist_b < layout.innermost.radius - err {
        return (t.innermost >= 1 || t.layer1 >= 1) && t.n_layers >= 2;
    } else if dist_b > layout.innermost.radius + err && t.innermost > 0 && bp == 0 {
        return false;
    }

    if position.z.abs() < layout.barrel_half_length {
        let dist_1 = layout.layer1.distance(position.x, position.y);
        let dist_2 = layout.layer2.distance(position.x, position.y);

        if dist_1 < layout.layer1.radius - err {
            return t.layer1 >= 1 || t.layer2 >= 1;
        } else if dist_1 > layout.layer1.radius + err && t.layer1 > 0 && l1p == 0 {
            return false;
        }
        if dist_2 < layout.layer2.radius - err && t.layer2 == 0 {
            return false;
        }
    } else if disc_hits(track) == 0 {
        return false;
    }
    true
}

/// First-measured-point check: both first hits on the same layer and the
/// vertex not beyond them.
pub fn check_first_hits(
    t1: &Track,
    t2: &Track,
    position: &Vector3<f64>,
    cov: &PackedCovariance,
    max_gap: f64,
) -> bool {
    let r1 = t1.hits.first_hit_radius;
    let r2 = t2.hits.first_hit_radius;
    if (r1 - r2).abs() > max_gap {
        return false;
    }
    let err = radius_error(position, cov);
    position.x.hypot(position.y) - r1.min(r2) <= 2.0 * err
}

#[cfg(test)]
mod tests {
    use super::*;
    use jetvertex_fit::{HitSummary, PerigeeErrors};

    fn track(hits: HitSummary) -> Track {
        Track::through_point(
            &Vector3::zeros(),
            0.0,
            1.5,
            1e-3,
            PerigeeErrors { sigma_d0: 0.02, sigma_z0: 0.05 },
        )
        .with_hits(hits)
    }

    fn cov() -> PackedCovariance {
        PackedCovariance([0.01, 0.0, 0.01, 0.0, 0.0, 0.01])
    }

    /// Hits only beyond the first two layers.
    fn outer_only() -> HitSummary {
        HitSummary {
            innermost_hits: 0,
            next_innermost_hits: 0,
            pixel_hits: 2,
            contributing_pixel_layers: 2,
            hit_pattern: (1 << hit_bits::PIXEL_BARREL_2) | (1 << hit_bits::PIXEL_BARREL_3),
            first_hit_radius: 89.3,
            ..HitSummary::full_barrel()
        }
    }

    #[test]
    fn test_full_tracks_fit_inner_vertex() {
        let layout = DetectorLayout::default();
        let (a, b) = (track(HitSummary::full_barrel()), track(HitSummary::full_barrel()));
        assert!(check_two_track_vertex(&a, &b, &Vector3::new(5.0, 0.0, 0.0), &cov(), &layout));
        assert!(check_one_track_vertex(&a, &Vector3::new(5.0, 0.0, 0.0), &cov(), &layout));
    }

    #[test]
    fn test_clean_inner_hits_veto_outer_vertex() {
        let layout = DetectorLayout::default();
        let (a, b) = (track(HitSummary::full_barrel()), track(HitSummary::full_barrel()));
        // Vertex between the innermost layer and layer 1 with clean innermost hits
        assert!(!check_two_track_vertex(&a, &b, &Vector3::new(42.0, 0.0, 0.0), &cov(), &layout));
        assert!(!check_one_track_vertex(&a, &Vector3::new(42.0, 0.0, 0.0), &cov(), &layout));
    }

    #[test]
    fn test_outer_tracks_need_outer_vertex() {
        let layout = DetectorLayout::default();
        let (a, b) = (track(outer_only()), track(outer_only()));
        assert!(!check_two_track_vertex(&a, &b, &Vector3::new(5.0, 0.0, 0.0), &cov(), &layout));
        assert!(check_two_track_vertex(&a, &b, &Vector3::new(70.0, 0.0, 0.0), &cov(), &layout));
    }

    #[test]
    fn test_first_hits() {
        let a = track(HitSummary::full_barrel());
        let b = track(outer_only());
        let pos = Vector3::new(5.0, 0.0, 0.0);
        assert!(check_first_hits(&a, &a, &pos, &cov(), 25.0));
        assert!(!check_first_hits(&a, &b, &pos, &cov(), 25.0));
        assert!(!check_first_hits(&a, &a, &Vector3::new(60.0, 0.0, 0.0), &cov(), 25.0));
    }
}
