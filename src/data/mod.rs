//! Array layout and the per-rank host memory plan.

pub mod layout;
pub mod memory;

pub use layout::{Layout, NdArray};
pub use memory::Memory;
