//! End-to-end vertex finding on hand-built jets of straight-line tracks.

use approx::assert_relative_eq;
use jetvertex_core::{SecondaryVertexFinder, VertexingConfig};
use jetvertex_fit::{FourMomentum, PerigeeErrors, PrimaryVertex, StraightLineFitter, Track, K0_MASS, PION_MASS};
use nalgebra::{Matrix3, Vector3};
use proptest::prelude::*;

fn errors() -> PerigeeErrors {
    PerigeeErrors { sigma_d0: 0.01, sigma_z0: 0.02 }
}

fn primary() -> PrimaryVertex {
    PrimaryVertex::new(Vector3::zeros(), Matrix3::identity() * 1e-4)
}

fn jet() -> FourMomentum {
    FourMomentum::new(100_000.0, 0.0, 0.0, 100_500.0)
}

fn finder() -> SecondaryVertexFinder<StraightLineFitter> {
    SecondaryVertexFinder::new(VertexingConfig::default(), StraightLineFitter::with_defaults()).unwrap()
}

fn from(point: Vector3<f64>, phi: f64, theta: f64, p: f64) -> Track {
    Track::through_point(&point, phi, theta, 1.0 / p, errors())
}

fn first_vertex() -> Vector3<f64> {
    Vector3::new(5.0, 0.3, 0.2)
}

fn second_vertex() -> Vector3<f64> {
    Vector3::new(11.0, 1.2, 1.0)
}

/// Three positive tracks from each of two displaced vertices.
fn two_vertex_jet() -> Vec<Track> {
    let (a, b) = (first_vertex(), second_vertex());
    vec![
        from(a, 0.15, 1.5, 6000.0),
        from(a, -0.2, 1.6, 4000.0),
        from(a, -0.02, 1.45, 3000.0),
        from(b, 0.25, 1.52, 5000.0),
        from(b, -0.1, 1.62, 3500.0),
        from(b, 0.02, 1.38, 2500.0),
    ]
}

fn sorted(mut tracks: Vec<usize>) -> Vec<usize> {
    tracks.sort_unstable();
    tracks
}

#[test]
fn test_two_track_vertex_is_found() {
    let tracks = vec![
        from(first_vertex(), 0.15, 1.5, 6000.0),
        from(first_vertex(), -0.2, 1.6, 4000.0),
    ];
    let result = finder().find_secondary_vertices(&primary(), &jet(), &tracks);

    assert_eq!(result.vertices.len(), 1);
    let v = &result.vertices[0];
    assert_eq!(sorted(v.tracks.clone()), vec![0, 1]);
    assert_eq!(v.ndf, 1);
    assert_eq!(v.charge, 2);
    assert_relative_eq!(v.position, first_vertex(), epsilon = 1e-3);
    assert!(v.projected_distance > 0.0);

    let summary = &result.summary;
    assert_eq!(summary.n_selected_tracks, 2);
    assert_eq!(summary.n_two_track_vertices, 1);
    assert_relative_eq!(summary.energy_fraction, 1.0, max_relative = 1e-9);
    assert_relative_eq!(summary.total_mass, v.mass, max_relative = 1e-9);
}

#[test]
fn test_separated_vertices_are_kept_apart() {
    let tracks = two_vertex_jet();
    let result = finder().find_secondary_vertices(&primary(), &jet(), &tracks);

    assert_eq!(result.vertices.len(), 2);
    let mut sets: Vec<Vec<usize>> = result.vertices.iter().map(|v| sorted(v.tracks.clone())).collect();
    sets.sort();
    assert_eq!(sets, vec![vec![0, 1, 2], vec![3, 4, 5]]);
    for v in &result.vertices {
        assert_eq!(v.ndf, 3);
        assert!(v.significance > VertexingConfig::default().selection.vertex_significance);
    }
    assert_eq!(result.summary.n_two_track_vertices, 6);
    assert!(result.summary.energy_fraction <= 1.0);
}

#[test]
fn test_result_does_not_depend_on_track_order() {
    let tracks = two_vertex_jet();
    let mut reversed = tracks.clone();
    reversed.reverse();
    let f = finder();

    let a = f.find_secondary_vertices(&primary(), &jet(), &tracks);
    let b = f.find_secondary_vertices(&primary(), &jet(), &reversed);
    let n = tracks.len();
    let remap = |v: &jetvertex_core::SecondaryVertex| sorted(v.tracks.iter().map(|&t| n - 1 - t).collect());

    assert_eq!(a.vertices.len(), b.vertices.len());
    for (va, vb) in a.vertices.iter().zip(&b.vertices) {
        assert_eq!(sorted(va.tracks.clone()), remap(vb));
        assert_relative_eq!(va.position, vb.position, epsilon = 1e-6);
    }
}

#[test]
fn test_repeated_calls_agree() {
    let tracks = two_vertex_jet();
    let f = finder();
    let first = f.find_secondary_vertices(&primary(), &jet(), &tracks);
    let second = f.find_secondary_vertices(&primary(), &jet(), &tracks);
    assert_eq!(first, second);
}

#[test]
fn test_prompt_tracks_give_no_vertex() {
    let origin = Vector3::zeros();
    let tracks = vec![
        from(origin, 0.1, 1.5, 5000.0),
        from(origin, -0.15, 1.6, 4000.0),
        from(origin, 0.05, 1.4, 3000.0),
    ];
    let result = finder().find_secondary_vertices(&primary(), &jet(), &tracks);
    assert!(result.is_empty());
    assert_eq!(result.summary.n_selected_tracks, 3);
    assert_eq!(result.summary.n_primary_compatible, 3);
}

#[test]
fn test_inclusive_vertex_collects_displaced_tracks() {
    let mut tracks = two_vertex_jet();
    tracks.truncate(3);
    tracks.push(from(Vector3::zeros(), 0.35, 1.3, 2000.0));

    let result = finder()
        .find_inclusive_vertex(&primary(), &jet(), &tracks)
        .expect("displaced tracks form a vertex");
    assert_eq!(result.n_vertex_tracks, 3);
    assert_eq!(sorted(result.vertex.tracks.clone()), vec![0, 1, 2]);
    assert_relative_eq!(result.vertex.position, first_vertex(), epsilon = 1e-3);
    assert!(result.signed_significance > 0.0);
    assert!(result.energy_fraction > 0.0 && result.energy_fraction < 1.0);
    assert!(result.transverse_energy_ratio >= 0.0 && result.transverse_energy_ratio < 1.0);
    assert!(result.material_distance <= 39.9);
    assert!(result.tracks_from_v0.is_empty());
}

#[test]
fn test_inclusive_needs_two_tracks() {
    let tracks = vec![from(first_vertex(), 0.15, 1.5, 6000.0)];
    assert!(finder().find_inclusive_vertex(&primary(), &jet(), &tracks).is_none());
}

#[test]
fn test_k0_like_pair_is_set_aside_by_inclusive_search() {
    // opening angle at which two 1 GeV pions make exactly a K0
    let p = 1000.0;
    let e2 = p * p + PION_MASS * PION_MASS;
    let cos_open = (e2 - (K0_MASS * K0_MASS - 2.0 * PION_MASS * PION_MASS) / 2.0) / (p * p);
    let half = cos_open.acos() / 2.0;
    let theta = std::f64::consts::FRAC_PI_2;
    let tracks = vec![
        from(first_vertex(), 0.25 + half, theta, p),
        from(first_vertex(), 0.25 - half, theta, -p),
    ];

    let search = finder().search_inclusive(&primary(), &jet(), &tracks);
    assert!(search.vertex.is_none());
    assert_eq!(search.tracks_from_v0, vec![0, 1]);
    assert!(finder().find_inclusive_vertex(&primary(), &jet(), &tracks).is_none());
}

fn jet_strategy() -> impl Strategy<Value = Vec<Track>> {
    let vertex = (2.0..9.0f64, -0.5..0.5f64, -1.0..1.0f64);
    let displaced = prop::collection::vec((-0.3..0.3f64, 1.3..1.8f64, 1000.0..8000.0f64), 2..6);
    let prompt = prop::collection::vec((-0.3..0.3f64, 1.3..1.8f64, -8000.0..8000.0f64), 0..4);
    (vertex, displaced, prompt).prop_map(|((x, y, z), displaced, prompt)| {
        let sv = Vector3::new(x, y, z);
        let mut tracks: Vec<Track> = displaced
            .into_iter()
            .map(|(phi, theta, p)| from(sv, phi, theta, p))
            .collect();
        tracks.extend(
            prompt
                .into_iter()
                .filter(|&(_, _, p)| p.abs() > 1000.0)
                .map(|(phi, theta, p)| from(Vector3::zeros(), phi, theta, p)),
        );
        tracks
    })
}

proptest! {
    #![proptest_config(ProptestConfig { cases: 64, .. ProptestConfig::default() })]

    #[test]
    fn test_no_track_in_two_vertices(tracks in jet_strategy()) {
        let result = finder().find_secondary_vertices(&primary(), &jet(), &tracks);
        let mut seen = vec![false; tracks.len()];
        for v in &result.vertices {
            prop_assert_eq!(v.ndf, (2 * v.tracks.len() as i32 - 3).max(1));
            prop_assert_eq!(v.tracks.len(), v.track_params.len());
            for &t in &v.tracks {
                prop_assert!(t < tracks.len());
                prop_assert!(!seen[t], "track {} used twice", t);
                seen[t] = true;
            }
        }
        prop_assert!(result.summary.energy_fraction >= 0.0 && result.summary.energy_fraction <= 1.0);
    }

    #[test]
    fn test_inclusive_vertex_is_in_front(tracks in jet_strategy()) {
        if let Some(result) = finder().find_inclusive_vertex(&primary(), &jet(), &tracks) {
            prop_assert!(result.vertex.projected_distance >= 0.0);
            prop_assert!(result.n_vertex_tracks >= 2);
            prop_assert!(result.energy_fraction < 1.0);
            prop_assert!(result.mass <= VertexingConfig::default().b_mass_limit);
        }
    }
}
