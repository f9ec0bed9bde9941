//! Outer and inner iteration sources.
//!
//! Moment `l` of Legendre degree `d` carries the factor `2d + 1`.

use rayon::prelude::*;

use crate::data::layout::{Layout, NdArray};
use crate::data::memory::Memory;
use crate::physics::{Material, moment_degree};

/// Scalar flux and higher moments viewed per cell.
#[derive(Clone, Copy)]
struct FluxMoments<'a> {
    ng: usize,
    scalar: &'a [f64],
    higher: Option<(usize, &'a [f64])>,
}

impl<'a> FluxMoments<'a> {
    fn new(scalar: &'a NdArray<4>, higher: Option<&'a NdArray<5>>) -> Self {
        Self {
            ng: scalar.dims()[0],
            scalar: scalar.as_slice(),
            higher: higher.map(|m| (m.dims()[0], m.as_slice())),
        }
    }

    /// Moment `l` of group `g` in cell `c`; moment 0 is the scalar flux.
    fn get(&self, l: usize, g: usize, c: usize) -> f64 {
        if l == 0 {
            return self.scalar[g + self.ng * c];
        }
        match self.higher {
            Some((nm, m)) => m[(l - 1) + nm * (g + self.ng * c)],
            None => 0.0,
        }
    }
}

/// External, fission and out-of-group scattering source from the current
/// scalar flux and moments.
pub fn compute_outer_source(material: &Material, memory: &mut Memory) {
    let Memory {
        scalar_flux,
        scalar_flux_moments,
        outer_source,
        ..
    } = memory;
    let [cmom, ng, ..] = outer_source.dims();
    let flux = FluxMoments::new(scalar_flux, scalar_flux_moments.as_ref());
    outer_source
        .as_mut_slice()
        .par_chunks_mut(cmom * ng)
        .enumerate()
        .for_each(|(c, out)| {
            let fission: f64 = (0..ng)
                .map(|gp| material.nu_sigma_f[gp] * flux.get(0, gp, c))
                .sum();
            for g in 0..ng {
                for l in 0..cmom {
                    let deg = moment_degree(l);
                    let mut v = 0.0;
                    if l == 0 {
                        v += material.source[g] + material.chi[g] * fission;
                    }
                    for gp in (0..ng).filter(|&gp| gp != g) {
                        v += (2 * deg + 1) as f64
                            * material.scatter[[g, gp, deg]]
                            * flux.get(l, gp, c);
                    }
                    out[l + cmom * g] = v;
                }
            }
        });
}

/// Outer source plus within-group scattering.
pub fn compute_inner_source(material: &Material, memory: &mut Memory) {
    let Memory {
        scalar_flux,
        scalar_flux_moments,
        outer_source,
        source,
        ..
    } = memory;
    let [cmom, ng, nx, ny, nz] = source.dims();
    let layout = Layout::new([cmom, ng, nx * ny * nz]);
    let flux = FluxMoments::new(scalar_flux, scalar_flux_moments.as_ref());
    let outer = outer_source.as_slice();
    source
        .as_mut_slice()
        .par_chunks_mut(cmom * ng)
        .enumerate()
        .for_each(|(c, out)| {
            for g in 0..ng {
                for l in 0..cmom {
                    let deg = moment_degree(l);
                    out[l + cmom * g] = outer[layout.offset([l, g, c])]
                        + (2 * deg + 1) as f64
                            * material.scatter[[g, g, deg]]
                            * flux.get(l, g, c);
                }
            }
        });
}
