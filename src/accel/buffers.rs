//! Device mirrors of the host memory plan.

use std::marker::PhantomData;

use crate::accel::context::{Context, DeviceBuffer, Transfer};
use crate::data::memory::Memory;
use crate::sweep_error::SweepError;
use crate::topology::rank_info::Axis;

/// Device buffers of one rank, same shapes as [`Memory`].
///
/// Buffers cannot outlive the context they were created on; dropping them
/// releases every device allocation.
#[derive(Debug)]
pub struct Buffers<'ctx> {
    pub angular_flux_in: DeviceBuffer,
    pub angular_flux_out: DeviceBuffer,
    pub flux_i: DeviceBuffer,
    pub flux_j: DeviceBuffer,
    pub flux_k: DeviceBuffer,
    pub scalar_flux: DeviceBuffer,
    pub scalar_flux_moments: Option<DeviceBuffer>,
    pub source: DeviceBuffer,
    pub mu: DeviceBuffer,
    pub eta: DeviceBuffer,
    pub xi: DeviceBuffer,
    pub weights: DeviceBuffer,
    pub scat_coeff: DeviceBuffer,
    pub mat_cross_section: DeviceBuffer,
    pub velocity_delta: DeviceBuffer,
    _ctx: PhantomData<&'ctx Context>,
}

impl<'ctx> Buffers<'ctx> {
    /// Allocate device storage matching `memory`.
    pub fn allocate(ctx: &'ctx Context, memory: &Memory) -> Result<Self, SweepError> {
        let b = |label, len| ctx.create_buffer(label, len);
        let buffers = Self {
            angular_flux_in: b("angular_flux_in", memory.angular_flux_in.len())?,
            angular_flux_out: b("angular_flux_out", memory.angular_flux_out.len())?,
            flux_i: b("flux_i", memory.flux_i.len())?,
            flux_j: b("flux_j", memory.flux_j.len())?,
            flux_k: b("flux_k", memory.flux_k.len())?,
            scalar_flux: b("scalar_flux", memory.scalar_flux.len())?,
            scalar_flux_moments: memory
                .scalar_flux_moments
                .as_ref()
                .map(|m| b("scalar_flux_moments", m.len()))
                .transpose()?,
            source: b("source", memory.source.len())?,
            mu: b("mu", memory.mu.len())?,
            eta: b("eta", memory.eta.len())?,
            xi: b("xi", memory.xi.len())?,
            weights: b("weights", memory.weights.len())?,
            scat_coeff: b("scat_coeff", memory.scat_coeff.len())?,
            mat_cross_section: b("mat_cross_section", memory.mat_cross_section.len())?,
            velocity_delta: b("velocity_delta", memory.velocity_delta.len())?,
            _ctx: PhantomData,
        };
        log::debug!(
            "allocated device buffers: {} bytes live",
            ctx.allocated_bytes()
        );
        Ok(buffers)
    }

    /// Blocking upload of the constant tables and the initial angular flux.
    pub fn upload_tables(&self, ctx: &Context, memory: &Memory) -> Result<(), SweepError> {
        let q = ctx.queue();
        let w = Transfer::Blocking;
        q.enqueue_write(&self.mu, memory.mu.as_slice(), w)?;
        q.enqueue_write(&self.eta, memory.eta.as_slice(), w)?;
        q.enqueue_write(&self.xi, memory.xi.as_slice(), w)?;
        q.enqueue_write(&self.weights, memory.weights.as_slice(), w)?;
        q.enqueue_write(&self.scat_coeff, memory.scat_coeff.as_slice(), w)?;
        q.enqueue_write(&self.mat_cross_section, memory.mat_cross_section.as_slice(), w)?;
        q.enqueue_write(&self.velocity_delta, memory.velocity_delta.as_slice(), w)?;
        q.enqueue_write(&self.angular_flux_in, memory.angular_flux_in.as_slice(), w)?;
        Ok(())
    }

    /// Device edge buffer perpendicular to `axis`.
    pub fn edge(&self, axis: Axis) -> &DeviceBuffer {
        match axis {
            Axis::X => &self.flux_i,
            Axis::Y => &self.flux_j,
            Axis::Z => &self.flux_k,
        }
    }

    /// Outgoing flux of this time step becomes the incoming flux of the next.
    pub fn swap_angular_flux(&mut self) {
        std::mem::swap(&mut self.angular_flux_in, &mut self.angular_flux_out);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accel::context::DeviceConfig;
    use crate::physics::Physics;
    use crate::problem::Problem;
    use crate::topology::rank_info::RankInfo;

    #[test]
    fn mirrors_match_host_sizes_and_release_on_drop() {
        let mut p = Problem::cube([4, 2, 2], [1, 1, 1], 2, 3);
        p.cmom = 4;
        let mut m = Memory::allocate(&p, &RankInfo::for_rank(&p, 0));
        m.load_physics(&p, &Physics::new(&p).unwrap()).unwrap();
        let ctx = Context::new(&DeviceConfig::default()).unwrap();
        {
            let mut b = Buffers::allocate(&ctx, &m).unwrap();
            assert_eq!(b.edge(Axis::Z).len(), m.flux_k.len());
            assert_eq!(
                b.scalar_flux_moments.as_ref().map(DeviceBuffer::len),
                m.scalar_flux_moments.as_ref().map(|a| a.len())
            );
            b.upload_tables(&ctx, &m).unwrap();
            let before = b.angular_flux_in.clone();
            b.swap_angular_flux();
            assert!(b.angular_flux_out.same_buffer(&before));
            assert!(ctx.allocated_bytes() > 0);
        }
        assert_eq!(ctx.allocated_bytes(), 0);
    }
}
