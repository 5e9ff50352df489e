//! Synthetic jet generator.
//!
//! The generator is the ground truth of the simulation:
//! - A primary vertex smeared around the beam line
//! - Prompt tracks from the primary vertex
//! - b-hadron decays with an optional downstream charm vertex
//! - K0 decays and photon conversions with two-body kinematics
//!
//! Every track is straight, measured with the resolution it reports, and
//! carries a hit summary consistent with its production radius. All
//! randomness comes from one seeded `ChaCha8Rng`.

use jetvertex_core::DetectorLayout;
use jetvertex_fit::{
    hit_bits, FourMomentum, HitSummary, PerigeeErrors, PrimaryVertex, Track, ELECTRON_MASS,
    K0_MASS, PION_MASS,
};
use nalgebra::{Matrix3, Vector3};
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rand_distr::{Exp1, StandardNormal};
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;
use tracing::trace;

/// Kind of a generated decay vertex.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DecayKind {
    Bottom,
    Charm,
    K0,
    Conversion,
}

impl DecayKind {
    /// Vertices the finder is meant to find.
    pub fn is_heavy_flavour(self) -> bool {
        matches!(self, DecayKind::Bottom | DecayKind::Charm)
    }
}

/// A generated decay vertex and the jet tracks it produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TruthVertex {
    pub kind: DecayKind,
    pub position: Vector3<f64>,
    /// Indices into [`GeneratedJet::tracks`]
    pub tracks: Vec<usize>,
}

/// One generated jet with its truth record.
#[derive(Debug, Clone)]
pub struct GeneratedJet {
    pub primary: PrimaryVertex,
    pub axis: FourMomentum,
    pub tracks: Vec<Track>,
    /// Truth vertex of each track, `None` for prompt tracks
    pub origins: Vec<Option<usize>>,
    pub truth: Vec<TruthVertex>,
}

impl GeneratedJet {
    pub fn heavy_flavour_vertices(&self) -> impl Iterator<Item = &TruthVertex> {
        self.truth.iter().filter(|v| v.kind.is_heavy_flavour())
    }
}

/// Content of a jet to generate.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JetRecipe {
    pub prompt_tracks: usize,
    /// Charged tracks of the b-hadron vertex; 0 for no b-hadron
    pub bottom_tracks: usize,
    /// Charged tracks of the charm vertex, downstream of the b-hadron if any
    pub charm_tracks: usize,
    pub k0_decays: usize,
    pub conversions: usize,
}

/// Generator resolution and kinematic ranges.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneratorConfig {
    /// Constant term of the d0 resolution (mm)
    pub d0_resolution: f64,
    /// Constant term of the z0 resolution (mm)
    pub z0_resolution: f64,
    /// Multiple-scattering term, divided by pt (mm MeV)
    pub scattering_term: f64,
    pub primary_xy_spread: f64,
    pub primary_z_spread: f64,
    pub min_jet_pt: f64,
    pub max_jet_pt: f64,
    pub max_jet_eta: f64,
    /// Angular spread of decay products around their parent (rad)
    pub track_spread: f64,
    pub min_track_p: f64,
    pub max_track_p: f64,
    /// Mean decay lengths (mm)
    pub bottom_flight: f64,
    pub charm_flight: f64,
    pub k0_flight: f64,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            d0_resolution: 0.012,
            z0_resolution: 0.04,
            scattering_term: 15.0,
            primary_xy_spread: 0.01,
            primary_z_spread: 25.0,
            min_jet_pt: 40_000.0,
            max_jet_pt: 200_000.0,
            max_jet_eta: 1.5,
            track_spread: 0.12,
            min_track_p: 1_000.0,
            max_track_p: 12_000.0,
            bottom_flight: 3.0,
            charm_flight: 1.5,
            k0_flight: 25.0,
        }
    }
}

/// Seeded jet generator.
pub struct JetGenerator {
    rng: ChaCha8Rng,
    config: GeneratorConfig,
    layout: DetectorLayout,
}

/// Tracks and truth collected while building one jet.
#[derive(Default)]
struct JetContent {
    tracks: Vec<Track>,
    origins: Vec<Option<usize>>,
    truth: Vec<TruthVertex>,
}

impl JetContent {
    fn open_vertex(&mut self, kind: DecayKind, position: Vector3<f64>) -> usize {
        self.truth.push(TruthVertex {
            kind,
            position,
            tracks: Vec::new(),
        });
        self.truth.len() - 1
    }

    fn push(&mut self, track: Track, origin: Option<usize>) {
        if let Some(v) = origin {
            self.truth[v].tracks.push(self.tracks.len());
        }
        self.tracks.push(track);
        self.origins.push(origin);
    }
}

fn direction(phi: f64, theta: f64) -> Vector3<f64> {
    Vector3::new(phi.cos() * theta.sin(), phi.sin() * theta.sin(), theta.cos())
}

impl JetGenerator {
    /// Creates a generator with default resolution and detector layout.
    pub fn new(seed: u64) -> Self {
        Self {
            rng: ChaCha8Rng::seed_from_u64(seed),
            config: GeneratorConfig::default(),
            layout: DetectorLayout::default(),
        }
    }

    pub fn with_config(mut self, config: GeneratorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_layout(mut self, layout: DetectorLayout) -> Self {
        self.layout = layout;
        self
    }

    fn gauss(&mut self, sigma: f64) -> f64 {
        let z: f64 = self.rng.sample(StandardNormal);
        z * sigma
    }

    fn exponential(&mut self, mean: f64) -> f64 {
        let e: f64 = self.rng.sample(Exp1);
        e * mean
    }

    fn charge(&mut self) -> f64 {
        if self.rng.gen_bool(0.5) {
            1.0
        } else {
            -1.0
        }
    }

    fn track_momentum(&mut self) -> f64 {
        self.rng.gen_range(self.config.min_track_p..self.config.max_track_p)
    }

    /// Unit vector scattered around `axis` by `sigma` in phi and theta.
    fn around(&mut self, axis: &Vector3<f64>, sigma: f64) -> Vector3<f64> {
        let phi = axis.y.atan2(axis.x) + self.gauss(sigma);
        let theta = (axis.z / axis.norm()).acos() + self.gauss(sigma);
        direction(phi, theta.clamp(0.05, PI - 0.05))
    }

    /// Hits of a track produced at transverse radius `radius`.
    fn hits_from(&self, radius: f64) -> HitSummary {
        let mut hits = HitSummary::full_barrel();
        let pixel_layers = [
            (hit_bits::PIXEL_BARREL_0, self.layout.innermost.radius),
            (hit_bits::PIXEL_BARREL_1, self.layout.layer1.radius),
            (hit_bits::PIXEL_BARREL_2, self.layout.layer2.radius),
            (hit_bits::PIXEL_BARREL_3, self.layout.layer3.radius),
        ];
        for &(bit, layer_radius) in &pixel_layers {
            if radius > layer_radius {
                hits.hit_pattern &= !(1 << bit);
                hits.pixel_hits = hits.pixel_hits.saturating_sub(1);
                hits.contributing_pixel_layers = hits.contributing_pixel_layers.saturating_sub(1);
            }
        }
        if radius > self.layout.innermost.radius {
            hits.innermost_hits = 0;
            hits.first_hit_radius = pixel_layers
                .iter()
                .map(|&(_, r)| r)
                .find(|&r| r > radius)
                .unwrap_or(self.layout.layer3.radius + 175.0);
        }
        if radius > self.layout.layer1.radius {
            hits.next_innermost_hits = 0;
        }
        hits
    }

    /// Measured straight track of a charged particle produced at `origin`.
    fn measure(&mut self, origin: &Vector3<f64>, momentum: &Vector3<f64>, charge: f64) -> Track {
        let p = momentum.norm();
        let phi = momentum.y.atan2(momentum.x);
        let theta = (momentum.z / p).acos();
        let pt = p * theta.sin();
        let errors = PerigeeErrors {
            sigma_d0: self.config.d0_resolution + self.config.scattering_term / pt,
            sigma_z0: self.config.z0_resolution + 2.0 * self.config.scattering_term / pt,
        };
        let hits = self.hits_from(origin.x.hypot(origin.y));
        let mut track = Track::through_point(origin, phi, theta, charge / p, errors).with_hits(hits);
        track.perigee.d0 += self.gauss(errors.sigma_d0);
        track.perigee.z0 += self.gauss(errors.sigma_z0);
        track
    }

    /// Lab momenta of the two daughters of a decay in flight.
    pub fn two_body(&mut self, mass: f64, parent: &Vector3<f64>, m1: f64, m2: f64) -> (Vector3<f64>, Vector3<f64>) {
        let m2sum = (m1 + m2) * (m1 + m2);
        let m2diff = (m1 - m2) * (m1 - m2);
        let p_star = ((mass * mass - m2sum) * (mass * mass - m2diff)).max(0.0).sqrt() / (2.0 * mass);

        let cos = self.rng.gen_range(-1.0..1.0f64);
        let sin = (1.0 - cos * cos).sqrt();
        let azimuth = self.rng.gen_range(0.0..2.0 * PI);

        let n = parent.normalize();
        let helper = if n.x.abs() < 0.9 { Vector3::x() } else { Vector3::y() };
        let u = n.cross(&helper).normalize();
        let v = n.cross(&u);
        let q_perp = (u * azimuth.cos() + v * azimuth.sin()) * (p_star * sin);
        let q_par = p_star * cos;

        let p = parent.norm();
        let gamma = (p * p + mass * mass).sqrt() / mass;
        let beta_gamma = p / mass;
        let e1 = (p_star * p_star + m1 * m1).sqrt();
        let e2 = (p_star * p_star + m2 * m2).sqrt();
        let p1 = n * (gamma * q_par + beta_gamma * e1) + q_perp;
        let p2 = n * (-gamma * q_par + beta_gamma * e2) - q_perp;
        (p1, p2)
    }

    /// Adds a multi-prong decay at `position` flying along `flight`.
    fn add_decay(
        &mut self,
        content: &mut JetContent,
        kind: DecayKind,
        position: Vector3<f64>,
        flight: &Vector3<f64>,
        n_tracks: usize,
    ) {
        let vertex = content.open_vertex(kind, position);
        let spread = self.config.track_spread;
        for _ in 0..n_tracks {
            let dir = self.around(flight, spread);
            let p = self.track_momentum();
            let charge = self.charge();
            let track = self.measure(&position, &(dir * p), charge);
            content.push(track, Some(vertex));
        }
    }

    /// Adds an opposite-charge two-body decay.
    fn add_v0(
        &mut self,
        content: &mut JetContent,
        kind: DecayKind,
        position: Vector3<f64>,
        parent: Vector3<f64>,
        mass: f64,
        daughter_mass: f64,
    ) {
        let vertex = content.open_vertex(kind, position);
        let (p1, p2) = self.two_body(mass, &parent, daughter_mass, daughter_mass);
        let t1 = self.measure(&position, &p1, 1.0);
        let t2 = self.measure(&position, &p2, -1.0);
        content.push(t1, Some(vertex));
        content.push(t2, Some(vertex));
    }

    /// Generates one jet.
    pub fn generate(&mut self, recipe: &JetRecipe) -> GeneratedJet {
        let cfg = self.config.clone();
        let pv = Vector3::new(
            self.gauss(cfg.primary_xy_spread),
            self.gauss(cfg.primary_xy_spread),
            self.gauss(cfg.primary_z_spread),
        );
        let primary = PrimaryVertex::new(
            pv,
            Matrix3::from_diagonal(&Vector3::new(1e-4, 1e-4, 4e-4)),
        );

        let jet_phi = self.rng.gen_range(-PI..PI);
        let jet_eta = self.rng.gen_range(-cfg.max_jet_eta..cfg.max_jet_eta);
        let jet_pt = self.rng.gen_range(cfg.min_jet_pt..cfg.max_jet_pt);
        let theta = 2.0 * (-jet_eta).exp().atan();
        let axis_dir = direction(jet_phi, theta);
        let jet_p = jet_pt / theta.sin();
        let jet_mass = 0.08 * jet_pt;
        let axis = FourMomentum::new(
            axis_dir.x * jet_p,
            axis_dir.y * jet_p,
            axis_dir.z * jet_p,
            (jet_p * jet_p + jet_mass * jet_mass).sqrt(),
        );

        let mut content = JetContent::default();
        for _ in 0..recipe.prompt_tracks {
            let dir = self.around(&axis_dir, 2.0 * cfg.track_spread);
            let p = self.track_momentum();
            let charge = self.charge();
            let track = self.measure(&pv, &(dir * p), charge);
            content.push(track, None);
        }

        let mut charm_origin = pv;
        let mut charm_axis = axis_dir;
        if recipe.bottom_tracks > 0 {
            let flight = self.around(&axis_dir, 0.03);
            let length = self.exponential(cfg.bottom_flight);
            let position = pv + flight * length;
            self.add_decay(&mut content, DecayKind::Bottom, position, &flight, recipe.bottom_tracks);
            charm_origin = position;
            charm_axis = flight;
        }
        if recipe.charm_tracks > 0 {
            let flight = self.around(&charm_axis, 0.05);
            let length = self.exponential(cfg.charm_flight);
            let position = charm_origin + flight * length;
            self.add_decay(&mut content, DecayKind::Charm, position, &flight, recipe.charm_tracks);
        }

        for _ in 0..recipe.k0_decays {
            let flight = self.around(&axis_dir, cfg.track_spread);
            let length = self.exponential(cfg.k0_flight);
            let p = self.rng.gen_range(2.0 * cfg.min_track_p..cfg.max_track_p);
            self.add_v0(&mut content, DecayKind::K0, pv + flight * length, flight * p, K0_MASS, PION_MASS);
        }

        for _ in 0..recipe.conversions {
            let flight = self.around(&axis_dir, cfg.track_spread);
            let layers = [
                self.layout.beampipe.radius,
                self.layout.innermost.radius,
                self.layout.layer1.radius,
            ];
            let radius = layers[self.rng.gen_range(0..layers.len())] - 0.5;
            let position = pv + flight * (radius / flight.x.hypot(flight.y));
            let p = self.rng.gen_range(2.0 * cfg.min_track_p..cfg.max_track_p);
            // a few MeV above threshold keeps the pair nearly collinear
            let mass = 2.0 * ELECTRON_MASS + 3.0;
            self.add_v0(&mut content, DecayKind::Conversion, position, flight * p, mass, ELECTRON_MASS);
        }

        let n = content.tracks.len();
        let mut order: Vec<usize> = (0..n).collect();
        order.shuffle(&mut self.rng);
        let mut slot = vec![0; n];
        for (new, &old) in order.iter().enumerate() {
            slot[old] = new;
        }
        let tracks = order.iter().map(|&old| content.tracks[old].clone()).collect();
        let origins = order.iter().map(|&old| content.origins[old]).collect();
        let mut truth = content.truth;
        for v in &mut truth {
            for t in &mut v.tracks {
                *t = slot[*t];
            }
            v.tracks.sort_unstable();
        }
        trace!("generated jet: {} tracks, {} truth vertices", n, truth.len());

        GeneratedJet {
            primary,
            axis,
            tracks,
            origins,
            truth,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn recipe() -> JetRecipe {
        JetRecipe {
            prompt_tracks: 5,
            bottom_tracks: 3,
            charm_tracks: 2,
            k0_decays: 1,
            conversions: 1,
        }
    }

    #[test]
    fn test_same_seed_same_jet() {
        let a = JetGenerator::new(7).generate(&recipe());
        let b = JetGenerator::new(7).generate(&recipe());
        assert_eq!(a.tracks, b.tracks);
        assert_eq!(a.truth, b.truth);

        let c = JetGenerator::new(8).generate(&recipe());
        assert_ne!(a.tracks, c.tracks);
    }

    #[test]
    fn test_truth_matches_origins() {
        let jet = JetGenerator::new(3).generate(&recipe());
        assert_eq!(jet.tracks.len(), 5 + 3 + 2 + 2 + 2);
        assert_eq!(jet.truth.len(), 4);
        for (t, origin) in jet.origins.iter().enumerate() {
            match origin {
                Some(v) => assert!(jet.truth[*v].tracks.contains(&t)),
                None => assert!(jet.truth.iter().all(|v| !v.tracks.contains(&t))),
            }
        }
        assert_eq!(jet.heavy_flavour_vertices().count(), 2);
    }

    #[test]
    fn test_two_body_conserves_mass() {
        let mut gen = JetGenerator::new(11);
        let parent = Vector3::new(3000.0, 1000.0, -500.0);
        let (p1, p2) = gen.two_body(K0_MASS, &parent, PION_MASS, PION_MASS);

        assert_relative_eq!(p1 + p2, parent, epsilon = 1e-6);
        let e = (p1.norm_squared() + PION_MASS * PION_MASS).sqrt()
            + (p2.norm_squared() + PION_MASS * PION_MASS).sqrt();
        let mass = (e * e - parent.norm_squared()).sqrt();
        assert_relative_eq!(mass, K0_MASS, max_relative = 1e-9);
    }

    #[test]
    fn test_hits_follow_production_radius() {
        let gen = JetGenerator::new(1);
        let prompt = gen.hits_from(0.0);
        assert_eq!(prompt, HitSummary::full_barrel());

        let outside = gen.hits_from(60.0);
        assert_eq!(outside.innermost_hits, 0);
        assert_eq!(outside.next_innermost_hits, 0);
        assert_eq!(outside.pixel_hits, 2);
        assert!(!outside.has_bit(hit_bits::PIXEL_BARREL_0));
        assert!(outside.has_bit(hit_bits::PIXEL_BARREL_2));
        assert_eq!(outside.first_hit_radius, DetectorLayout::default().layer2.radius);
    }
}
