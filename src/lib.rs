//! # kba-sweep
//!
//! Distributed, accelerator-offloaded wavefront sweep for the time-dependent,
//! multigroup, discrete-ordinates transport equation on a regular Cartesian
//! grid.
//!
//! ## Layout
//! - [`problem`]: the validated global problem, parsed from JSON.
//! - [`topology`]: rank geometry, octants and the diagonal-plane schedule.
//! - [`data`]: typed angle-major array layouts and the per-rank memory plan.
//! - [`physics`]: deterministic quadrature and material tables.
//! - [`accel`]: compute device with an in-order queue, buffers and kernels.
//! - [`algs`]: communicator backends, halo exchange, the sweep driver and the
//!   outer/inner iteration controller.
//!
//! ## Ranks
//! Ranks are MPI processes (feature `mpi-support`) or threads of one process
//! sharing a [`LocalWorld`](algs::communicator::LocalWorld). Each rank owns
//! one tile of the grid and one device context; the only shared medium is the
//! communicator.
//!
//! ```no_run
//! use kba_sweep::prelude::*;
//!
//! let problem = Problem::from_path("problem.json")?;
//! let ctx = Context::new(&DeviceConfig::from_env())?;
//! let mut solver = Solver::new(&problem, &ctx, &NoComm)?;
//! let summary = solver.run()?;
//! println!("{summary}");
//! # Ok::<(), SweepError>(())
//! ```

pub mod accel;
pub mod algs;
pub mod data;
pub mod physics;
pub mod problem;
pub mod sweep_error;
pub mod topology;

/// A convenient prelude to import the most-used traits & types:
pub mod prelude {
    pub use crate::accel::{Buffers, Context, DeviceConfig, Transfer, Wait};
    #[cfg(feature = "mpi-support")]
    pub use crate::algs::communicator::MpiComm;
    pub use crate::algs::communicator::{Communicator, LocalComm, LocalWorld, NoComm};
    pub use crate::algs::halo::{recv_boundaries, send_boundaries};
    pub use crate::algs::iteration::{RunSummary, Solver};
    pub use crate::algs::sweep::Sweeper;
    pub use crate::data::{Layout, Memory, NdArray};
    pub use crate::physics::Physics;
    pub use crate::problem::{MaterialSpec, Problem};
    pub use crate::sweep_error::SweepError;
    pub use crate::topology::{Axis, CartGrid, Neighbor, Octant, Planes, RankInfo, Step};
}
