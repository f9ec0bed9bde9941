//! Synthetic quadrature and material data.
//!
//! The sweep treats these as opaque inputs: direction cosines and weights,
//! scattering-moment coefficients per direction, and per-group cross
//! sections. The generator is deterministic so that every rank builds
//! bit-identical tables.

use crate::data::layout::NdArray;
use crate::problem::{MaterialSpec, Problem};
use crate::sweep_error::SweepError;
use crate::topology::octant::Octant;

/// First-octant direction cosines and weights, `nang` entries each.
#[derive(Clone, Debug, PartialEq)]
pub struct Quadrature {
    pub mu: Vec<f64>,
    pub eta: Vec<f64>,
    pub xi: Vec<f64>,
    /// Weights over all eight octants sum to one.
    pub weights: Vec<f64>,
}

impl Quadrature {
    pub fn new(nang: usize) -> Self {
        let dm = 1.0 / nang as f64;
        let mu: Vec<f64> = (0..nang).map(|n| (n as f64 + 0.5) * dm).collect();
        let eta: Vec<f64> = mu.iter().map(|m| 1.0 - m).collect();
        let xi = mu
            .iter()
            .zip(&eta)
            .map(|(m, e)| (1.0 - m * m - e * e).max(0.0).sqrt())
            .collect();
        Self {
            mu,
            eta,
            xi,
            weights: vec![0.125 * dm; nang],
        }
    }

    pub fn nang(&self) -> usize {
        self.mu.len()
    }
}

/// Legendre degree of flux moment `l` (`l = deg² … (deg+1)² − 1`).
#[inline]
pub fn moment_degree(l: usize) -> usize {
    let mut d = 0;
    while (d + 1) * (d + 1) <= l {
        d += 1;
    }
    d
}

/// Real spherical-harmonic coefficients `ec[a, l, oct]` for `cmom` moments.
///
/// Moment 0 is isotropic; moments 1–3 are the signed cosines; moments 4–8
/// are the quadratic harmonics.
pub fn scattering_coefficients(q: &Quadrature, cmom: usize) -> Result<NdArray<3>, SweepError> {
    if !matches!(cmom, 1 | 4 | 9) {
        return Err(SweepError::UnsupportedMoments(cmom));
    }
    let nang = q.nang();
    let sqrt3 = 3.0f64.sqrt();
    let mut ec = NdArray::zeros([nang, cmom, Octant::COUNT]);
    for oct in Octant::all() {
        let [sx, sy, sz] = oct.signs();
        for a in 0..nang {
            let (m, e, x) = (sx * q.mu[a], sy * q.eta[a], sz * q.xi[a]);
            let row = [
                1.0,
                m,
                e,
                x,
                0.5 * (3.0 * x * x - 1.0),
                sqrt3 * m * x,
                sqrt3 * e * x,
                0.5 * sqrt3 * (m * m - e * e),
                sqrt3 * m * e,
            ];
            for (l, v) in row.iter().take(cmom).enumerate() {
                ec[[a, l, oct.index()]] = *v;
            }
        }
    }
    Ok(ec)
}

/// Per-group cross sections of the single homogeneous material.
#[derive(Clone, Debug, PartialEq)]
pub struct Material {
    pub sigma_t: Vec<f64>,
    /// `scatter[[g_to, g_from, degree]]`.
    pub scatter: NdArray<3>,
    pub nu_sigma_f: Vec<f64>,
    /// Fission spectrum, sums to one.
    pub chi: Vec<f64>,
    pub velocity: Vec<f64>,
    /// Isotropic external source.
    pub source: Vec<f64>,
}

impl Material {
    pub fn new(spec: &MaterialSpec, ng: usize, nmom: usize) -> Self {
        let sigma_t: Vec<f64> = (0..ng)
            .map(|g| spec.sigma_t + g as f64 * spec.sigma_t_step)
            .collect();
        let mut scatter = NdArray::zeros([ng, ng, nmom]);
        for g in 0..ng {
            let total = spec.scatter_ratio * sigma_t[g];
            let within = if g + 1 < ng {
                spec.self_scatter_fraction * total
            } else {
                total
            };
            for deg in 0..nmom {
                let decay = spec.anisotropy.powi(deg as i32);
                scatter[[g, g, deg]] = within * decay;
                if g + 1 < ng {
                    scatter[[g + 1, g, deg]] = (total - within) * decay;
                }
            }
        }
        let weight_sum: f64 = (0..ng).map(|g| (ng - g) as f64).sum();
        Self {
            sigma_t,
            scatter,
            nu_sigma_f: vec![spec.nu_sigma_f; ng],
            chi: (0..ng).map(|g| (ng - g) as f64 / weight_sum).collect(),
            velocity: (0..ng).map(|g| spec.velocity * (ng - g) as f64).collect(),
            source: vec![spec.source; ng],
        }
    }

    pub fn ng(&self) -> usize {
        self.sigma_t.len()
    }

    /// Time-derivative coefficient `2 / (v_g · dt)` per group.
    pub fn velocity_delta(&self, dt: f64) -> Vec<f64> {
        self.velocity.iter().map(|v| 2.0 / (v * dt)).collect()
    }
}

/// Everything the sweep needs from the physics collaborator.
#[derive(Clone, Debug, PartialEq)]
pub struct Physics {
    pub quadrature: Quadrature,
    /// `[nang, cmom, 8]`.
    pub scat_coeff: NdArray<3>,
    pub material: Material,
}

impl Physics {
    pub fn new(problem: &Problem) -> Result<Self, SweepError> {
        let nmom = problem
            .nmom()
            .ok_or(SweepError::UnsupportedMoments(problem.cmom))?;
        let quadrature = Quadrature::new(problem.nang);
        let scat_coeff = scattering_coefficients(&quadrature, problem.cmom)?;
        let material = Material::new(&problem.material, problem.ng, nmom);
        Ok(Self {
            quadrature,
            scat_coeff,
            material,
        })
    }
}
