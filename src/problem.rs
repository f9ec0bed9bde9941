//! Problem: global, immutable description of a transport run.
//!
//! A `Problem` is parsed from JSON (any field with a documented default may be
//! omitted) and must pass [`Problem::validate`] before anything is allocated.

use std::path::Path;

use serde::Deserialize;

use crate::sweep_error::SweepError;

/// Synthetic material options consumed by [`crate::physics::Material`].
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MaterialSpec {
    /// Total cross section of group 0.
    pub sigma_t: f64,
    /// Increment of the total cross section per group.
    pub sigma_t_step: f64,
    /// Fraction of `sigma_t` that scatters (within-group plus down-scatter).
    pub scatter_ratio: f64,
    /// Fraction of the scattering that stays in the same group.
    pub self_scatter_fraction: f64,
    /// Ratio between successive Legendre orders of the scattering kernel.
    pub anisotropy: f64,
    /// `nu * sigma_f`, uniform over groups.
    pub nu_sigma_f: f64,
    /// Isotropic external source per group.
    pub source: f64,
    /// Group speed of group 0; group `g` travels at `velocity * (ng - g)`.
    pub velocity: f64,
}

impl Default for MaterialSpec {
    fn default() -> Self {
        Self {
            sigma_t: 1.0,
            sigma_t_step: 0.01,
            scatter_ratio: 0.5,
            self_scatter_fraction: 0.8,
            anisotropy: 0.1,
            nu_sigma_f: 0.0,
            source: 1.0,
            velocity: 1.0,
        }
    }
}

fn one() -> f64 {
    1.0
}

/// Global problem definition shared by every rank.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Problem {
    pub nx: usize,
    pub ny: usize,
    pub nz: usize,
    #[serde(default = "one")]
    pub lx: f64,
    #[serde(default = "one")]
    pub ly: f64,
    #[serde(default = "one")]
    pub lz: f64,
    pub npex: usize,
    pub npey: usize,
    pub npez: usize,
    /// Discrete directions per octant.
    pub nang: usize,
    /// Energy groups.
    pub ng: usize,
    /// Flux moments (1 = isotropic).
    pub cmom: usize,
    /// Outer iteration cap.
    pub oitm: usize,
    /// Inner iteration cap.
    pub iitm: usize,
    /// Inner convergence tolerance.
    pub epsi: f64,
    pub dt: f64,
    pub tf: f64,
    /// Abort on NaN/Inf in the scalar flux at outer boundaries.
    #[serde(default)]
    pub check_finite: bool,
    #[serde(default)]
    pub material: MaterialSpec,
}

/// Cells closer to zero than this use an absolute rather than relative difference.
pub const TOLR: f64 = 1.0e-12;

impl Problem {
    /// Parse and validate a problem from a JSON string.
    pub fn from_json_str(text: &str) -> Result<Self, SweepError> {
        let problem: Problem =
            serde_json::from_str(text).map_err(|e| SweepError::Parse(e.to_string()))?;
        problem.validate()?;
        Ok(problem)
    }

    /// Read, parse and validate a problem file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, SweepError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| SweepError::Io {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        Self::from_json_str(&text)
    }

    /// Check every setup-time invariant. Runs before any allocation.
    pub fn validate(&self) -> Result<(), SweepError> {
        for (name, v) in [
            ("nx", self.nx),
            ("ny", self.ny),
            ("nz", self.nz),
            ("npex", self.npex),
            ("npey", self.npey),
            ("npez", self.npez),
            ("nang", self.nang),
            ("ng", self.ng),
            ("cmom", self.cmom),
            ("oitm", self.oitm),
            ("iitm", self.iitm),
        ] {
            if v == 0 {
                return Err(SweepError::ZeroCount(name));
            }
        }
        for (axis, cells, ranks) in [
            ("x", self.nx, self.npex),
            ("y", self.ny, self.npey),
            ("z", self.nz, self.npez),
        ] {
            if cells % ranks != 0 {
                return Err(SweepError::NonDivisibleDecomposition { axis, cells, ranks });
            }
        }
        if self.nmom().is_none() {
            return Err(SweepError::UnsupportedMoments(self.cmom));
        }
        let positive = |name: &'static str, value: f64| {
            if value.is_finite() && value > 0.0 {
                Ok(())
            } else {
                Err(SweepError::InvalidParameter { name, value })
            }
        };
        positive("epsi", self.epsi)?;
        positive("dt", self.dt)?;
        positive("lx", self.lx)?;
        positive("ly", self.ly)?;
        positive("lz", self.lz)?;
        if !(self.tf.is_finite() && self.tf >= 0.0) {
            return Err(SweepError::InvalidParameter {
                name: "tf",
                value: self.tf,
            });
        }
        let m = &self.material;
        positive("material.sigma_t", m.sigma_t)?;
        positive("material.velocity", m.velocity)?;
        for (name, value) in [
            ("material.sigma_t_step", m.sigma_t_step),
            ("material.scatter_ratio", m.scatter_ratio),
            ("material.self_scatter_fraction", m.self_scatter_fraction),
            ("material.anisotropy", m.anisotropy),
            ("material.nu_sigma_f", m.nu_sigma_f),
            ("material.source", m.source),
        ] {
            if !(value.is_finite() && value >= 0.0) {
                return Err(SweepError::InvalidParameter { name, value });
            }
        }
        if m.scatter_ratio >= 1.0 {
            return Err(SweepError::InvalidParameter {
                name: "material.scatter_ratio",
                value: m.scatter_ratio,
            });
        }
        if m.self_scatter_fraction > 1.0 {
            return Err(SweepError::InvalidParameter {
                name: "material.self_scatter_fraction",
                value: m.self_scatter_fraction,
            });
        }
        Ok(())
    }

    /// Legendre order count, when `cmom` is a supported square.
    pub fn nmom(&self) -> Option<usize> {
        match self.cmom {
            1 => Some(1),
            4 => Some(2),
            9 => Some(3),
            _ => None,
        }
    }

    /// Total number of ranks the decomposition needs.
    pub fn num_ranks(&self) -> usize {
        self.npex * self.npey * self.npez
    }

    /// Number of time steps, at least one.
    pub fn nsteps(&self) -> usize {
        ((self.tf / self.dt).round() as usize).max(1)
    }

    /// Cell widths `(dx, dy, dz)`.
    pub fn spacing(&self) -> [f64; 3] {
        [
            self.lx / self.nx as f64,
            self.ly / self.ny as f64,
            self.lz / self.nz as f64,
        ]
    }

    /// Outer convergence tolerance.
    pub fn outer_tolerance(&self) -> f64 {
        100.0 * self.epsi
    }

    /// Small builder used by tests and benchmarks: an `nx × ny × nz` grid on a
    /// `npex × npey × npez` rank grid with one step and tight tolerances.
    pub fn cube(grid: [usize; 3], ranks: [usize; 3], nang: usize, ng: usize) -> Self {
        Self {
            nx: grid[0],
            ny: grid[1],
            nz: grid[2],
            lx: 1.0,
            ly: 1.0,
            lz: 1.0,
            npex: ranks[0],
            npey: ranks[1],
            npez: ranks[2],
            nang,
            ng,
            cmom: 1,
            oitm: 1,
            iitm: 1,
            epsi: 1.0e-4,
            dt: 1.0,
            tf: 1.0,
            check_finite: false,
            material: MaterialSpec::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"{
        "nx": 8, "ny": 4, "nz": 4,
        "npex": 2, "npey": 1, "npez": 1,
        "nang": 4, "ng": 2, "cmom": 4,
        "oitm": 5, "iitm": 3, "epsi": 1e-4,
        "dt": 0.5, "tf": 1.0
    }"#;

    #[test]
    fn parses_with_defaults() {
        let p = Problem::from_json_str(MINIMAL).expect("valid problem");
        assert_eq!(p.lx, 1.0);
        assert_eq!(p.material, MaterialSpec::default());
        assert_eq!(p.nmom(), Some(2));
        assert_eq!(p.nsteps(), 2);
        assert_eq!(p.num_ranks(), 2);
        assert_eq!(p.spacing(), [0.125, 0.25, 0.25]);
    }

    #[test]
    fn non_divisible_decomposition_is_rejected() {
        let mut p = Problem::cube([5, 4, 4], [2, 1, 1], 4, 1);
        assert_eq!(
            p.validate(),
            Err(SweepError::NonDivisibleDecomposition {
                axis: "x",
                cells: 5,
                ranks: 2
            })
        );
        p.nx = 6;
        assert!(p.validate().is_ok());
    }

    #[test]
    fn zero_counts_and_bad_tolerances_are_rejected() {
        let mut p = Problem::cube([4, 4, 4], [1, 1, 1], 0, 1);
        assert_eq!(p.validate(), Err(SweepError::ZeroCount("nang")));
        p.nang = 4;
        p.ng = 0;
        assert_eq!(p.validate(), Err(SweepError::ZeroCount("ng")));
        p.ng = 1;
        p.epsi = -1.0;
        assert!(matches!(
            p.validate(),
            Err(SweepError::InvalidParameter { name: "epsi", .. })
        ));
        p.epsi = 1e-4;
        p.cmom = 2;
        assert_eq!(p.validate(), Err(SweepError::UnsupportedMoments(2)));
    }

    #[test]
    fn unknown_fields_fail_to_parse() {
        let text = MINIMAL.replace("\"tf\": 1.0", "\"tf\": 1.0, \"bogus\": 3");
        assert!(matches!(
            Problem::from_json_str(&text),
            Err(SweepError::Parse(_))
        ));
    }
}
