//! Compute-device abstraction: context, in-order queue, buffers and kernels.
//!
//! The device is driven like an accelerator runtime. Host code only enqueues
//! transfers and launches; ordering comes from the single in-order queue.

pub mod buffers;
pub mod context;
pub mod kernels;
pub mod program;

pub use buffers::Buffers;
pub use context::{
    CommandQueue, Context, DeviceBuffer, DeviceConfig, DeviceInfo, QueueStats, ReadHandle,
    Transfer, Wait,
};
pub use program::{Kernel, KernelArgs, NdRange, Program};

/// Device status codes carried by [`SweepError::Device`](crate::sweep_error::SweepError::Device).
pub mod status {
    pub const DEVICE_NOT_FOUND: i32 = -1;
    pub const MEM_OBJECT_ALLOCATION_FAILURE: i32 = -4;
    pub const OUT_OF_RESOURCES: i32 = -5;
    pub const BUILD_PROGRAM_FAILURE: i32 = -11;
    pub const INVALID_VALUE: i32 = -30;
    pub const INVALID_KERNEL_NAME: i32 = -46;
    pub const INVALID_KERNEL_ARGS: i32 = -52;
    pub const INVALID_BUFFER_SIZE: i32 = -61;
    pub const INVALID_GLOBAL_WORK_SIZE: i32 = -63;
}
