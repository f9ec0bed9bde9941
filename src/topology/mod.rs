//! Rank geometry, octants, and the diagonal-plane schedule of a tile.

pub mod octant;
pub mod planes;
pub mod rank_info;

pub use octant::Octant;
pub use planes::{CellIndex, Plane, Planes};
pub use rank_info::{Axis, CartGrid, Neighbor, RankInfo, Step};
