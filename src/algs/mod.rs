//! Communication, halo exchange, the sweep and iteration control.

pub mod communicator;
pub mod gather;
pub mod halo;
pub mod iteration;
pub mod source;
pub mod sweep;
pub mod wire;

pub use gather::gather_scalar_flux;
pub use halo::{recv_boundaries, send_boundaries};
pub use iteration::{RunSummary, Solver};
pub use sweep::Sweeper;
