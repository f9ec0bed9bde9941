//! Compute device, in-order command queue and device buffers.
//!
//! The device executes kernels on its own rayon pool. Every transfer and
//! launch is recorded in the queue and only runs at the next synchronization
//! point (a blocking transfer or [`CommandQueue::finish`]), strictly in
//! submission order. That order is the only dependency mechanism the sweep
//! uses between planes.

use std::collections::VecDeque;
use std::fmt::{self, Debug};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::{Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::accel::kernels::ZeroArgs;
use crate::accel::program::{Kernel, KernelArgs, NdRange, Program};
use crate::accel::status;
use crate::sweep_error::SweepError;

/// Names of the kernels every context must provide.
pub const REQUIRED_KERNELS: [&str; 3] = ["sweep_plane", "zero_buffer", "reduce_flux"];

/// Anything that can be waited on.
pub trait Wait {
    /// Block until the transfer has completed and return its data.
    fn wait(self) -> Result<Vec<f64>, SweepError>;
}

/// Whether a transfer returns before or after it has executed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Transfer {
    Blocking,
    NonBlocking,
}

struct BufferStorage {
    label: &'static str,
    data: RwLock<Vec<f64>>,
    allocated: Arc<AtomicUsize>,
}

impl Drop for BufferStorage {
    fn drop(&mut self) {
        let bytes = self.data.get_mut().len() * std::mem::size_of::<f64>();
        self.allocated.fetch_sub(bytes, Ordering::AcqRel);
    }
}

/// Handle to device memory. Clones alias the same allocation; it is released
/// when the last handle (including those held by queued commands) drops.
#[derive(Clone)]
pub struct DeviceBuffer {
    storage: Arc<BufferStorage>,
    len: usize,
}

impl Debug for DeviceBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceBuffer")
            .field("label", &self.storage.label)
            .field("len", &self.len)
            .finish()
    }
}

impl DeviceBuffer {
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn label(&self) -> &'static str {
        self.storage.label
    }

    /// Whether two handles name the same allocation.
    pub fn same_buffer(&self, other: &DeviceBuffer) -> bool {
        Arc::ptr_eq(&self.storage, &other.storage)
    }

    pub(crate) fn read(&self) -> RwLockReadGuard<'_, Vec<f64>> {
        self.storage.data.read()
    }

    pub(crate) fn write(&self) -> RwLockWriteGuard<'_, Vec<f64>> {
        self.storage.data.write()
    }
}

/// Pending non-blocking read on a queue.
#[derive(Debug)]
pub struct ReadHandle<'q> {
    queue: &'q CommandQueue,
    slot: Arc<Mutex<Option<Vec<f64>>>>,
}

impl Wait for ReadHandle<'_> {
    /// Drains the queue up to and past the read if it has not run yet. A
    /// command failing before the read surfaces here.
    fn wait(self) -> Result<Vec<f64>, SweepError> {
        if self.slot.lock().is_none() {
            self.queue.finish()?;
        }
        self.slot.lock().take().ok_or(SweepError::Device {
            op: "wait for read",
            code: status::INVALID_VALUE,
        })
    }
}

type Command = Box<dyn FnOnce() -> Result<(), SweepError> + Send>;

struct Pending {
    label: &'static str,
    run: Command,
}

/// Counters exposed for diagnostics and tests.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct QueueStats {
    pub enqueued: usize,
    pub completed: usize,
    pub launches: usize,
}

/// In-order command queue bound to one device.
pub struct CommandQueue {
    pending: Mutex<VecDeque<Pending>>,
    pool: rayon::ThreadPool,
    enqueued: AtomicUsize,
    completed: AtomicUsize,
    launches: AtomicUsize,
}

impl Debug for CommandQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandQueue")
            .field("pending", &self.pending.lock().len())
            .field("threads", &self.pool.current_num_threads())
            .finish()
    }
}

impl CommandQueue {
    fn new(threads: usize) -> Result<Self, SweepError> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("kba-device-{i}"))
            .build()
            .map_err(|_| SweepError::Device {
                op: "create command queue",
                code: status::OUT_OF_RESOURCES,
            })?;
        Ok(Self {
            pending: Mutex::new(VecDeque::new()),
            pool,
            enqueued: AtomicUsize::new(0),
            completed: AtomicUsize::new(0),
            launches: AtomicUsize::new(0),
        })
    }

    fn enqueue(&self, label: &'static str, run: Command) {
        self.enqueued.fetch_add(1, Ordering::Relaxed);
        self.pending.lock().push_back(Pending { label, run });
    }

    /// Commands accepted but not yet executed.
    pub fn pending(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn stats(&self) -> QueueStats {
        QueueStats {
            enqueued: self.enqueued.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            launches: self.launches.load(Ordering::Relaxed),
        }
    }

    /// Execute every queued command in order. On failure the remaining
    /// commands are discarded and the error is returned.
    pub fn finish(&self) -> Result<(), SweepError> {
        loop {
            let next = self.pending.lock().pop_front();
            let Some(cmd) = next else {
                return Ok(());
            };
            log::trace!("device: running `{}`", cmd.label);
            if let Err(e) = self.pool.install(cmd.run) {
                self.pending.lock().clear();
                return Err(e);
            }
            self.completed.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Copy `src` into `buf`.
    pub fn enqueue_write(
        &self,
        buf: &DeviceBuffer,
        src: &[f64],
        mode: Transfer,
    ) -> Result<(), SweepError> {
        if src.len() != buf.len() {
            return Err(SweepError::Device {
                op: "enqueue write buffer",
                code: status::INVALID_BUFFER_SIZE,
            });
        }
        let data = src.to_vec();
        let target = buf.clone();
        self.enqueue(
            "write_buffer",
            Box::new(move || {
                target.write().copy_from_slice(&data);
                Ok(())
            }),
        );
        if mode == Transfer::Blocking {
            self.finish()?;
        }
        Ok(())
    }

    /// Queue a read of `buf`; the returned handle yields the data once the
    /// queue has run past this command.
    pub fn enqueue_read(&self, buf: &DeviceBuffer) -> ReadHandle<'_> {
        let slot = Arc::new(Mutex::new(None));
        let out = Arc::clone(&slot);
        let source = buf.clone();
        self.enqueue(
            "read_buffer",
            Box::new(move || {
                *out.lock() = Some(source.read().clone());
                Ok(())
            }),
        );
        ReadHandle { queue: self, slot }
    }

    /// Blocking read of `buf` into `dst`.
    pub fn read_into(&self, buf: &DeviceBuffer, dst: &mut [f64]) -> Result<(), SweepError> {
        if dst.len() != buf.len() {
            return Err(SweepError::Device {
                op: "enqueue read buffer",
                code: status::INVALID_BUFFER_SIZE,
            });
        }
        let data = self.enqueue_read(buf).wait()?;
        dst.copy_from_slice(&data);
        Ok(())
    }

    /// Queue one launch of `kernel` over `global` work items.
    pub fn enqueue_kernel(
        &self,
        kernel: &Kernel,
        args: KernelArgs,
        global: NdRange,
    ) -> Result<(), SweepError> {
        if global.iter().any(|&g| g == 0) {
            return Err(SweepError::Device {
                op: kernel.name(),
                code: status::INVALID_GLOBAL_WORK_SIZE,
            });
        }
        let entry = kernel.entry();
        self.launches.fetch_add(1, Ordering::Relaxed);
        self.enqueue(kernel.name(), Box::new(move || entry(&args, global)));
        Ok(())
    }
}

/// Device selection.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DeviceConfig {
    /// Index into [`available_devices`].
    pub device_index: usize,
    /// Worker threads of the compute pool; 0 lets rayon decide.
    pub threads: usize,
}

impl DeviceConfig {
    /// Read `KBA_SWEEP_DEVICE` and `KBA_SWEEP_THREADS`, falling back to defaults.
    pub fn from_env() -> Self {
        let parse = |key: &str| {
            std::env::var(key)
                .ok()
                .and_then(|v| v.trim().parse::<usize>().ok())
        };
        Self {
            device_index: parse("KBA_SWEEP_DEVICE").unwrap_or(0),
            threads: parse("KBA_SWEEP_THREADS").unwrap_or(0),
        }
    }
}

/// Description of a compute device.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeviceInfo {
    pub name: String,
    pub compute_units: usize,
}

/// Devices this build can drive.
pub fn available_devices() -> Vec<DeviceInfo> {
    let units = std::thread::available_parallelism().map_or(1, |n| n.get());
    vec![DeviceInfo {
        name: "host".to_string(),
        compute_units: units,
    }]
}

/// Named kernels resolved from the built program.
#[derive(Clone, Copy, Debug)]
pub struct Kernels {
    pub sweep_plane: Kernel,
    pub zero_buffer: Kernel,
    pub reduce_flux: Kernel,
}

/// Device, queue, program and kernels of one rank.
#[derive(Debug)]
pub struct Context {
    device: DeviceInfo,
    queue: CommandQueue,
    program: Program,
    kernels: Kernels,
    allocated: Arc<AtomicUsize>,
}

impl Context {
    pub fn new(config: &DeviceConfig) -> Result<Self, SweepError> {
        let device = available_devices()
            .into_iter()
            .nth(config.device_index)
            .ok_or(SweepError::Device {
                op: "select device",
                code: status::DEVICE_NOT_FOUND,
            })?;
        let queue = CommandQueue::new(config.threads)?;
        let program = Program::build(&REQUIRED_KERNELS)?;
        let kernels = Kernels {
            sweep_plane: program.kernel("sweep_plane")?,
            zero_buffer: program.kernel("zero_buffer")?,
            reduce_flux: program.kernel("reduce_flux")?,
        };
        log::info!(
            "device `{}`: {} compute units, {} queue threads",
            device.name,
            device.compute_units,
            queue.pool.current_num_threads()
        );
        Ok(Self {
            device,
            queue,
            program,
            kernels,
            allocated: Arc::new(AtomicUsize::new(0)),
        })
    }

    pub fn device(&self) -> &DeviceInfo {
        &self.device
    }

    pub fn queue(&self) -> &CommandQueue {
        &self.queue
    }

    pub fn program(&self) -> &Program {
        &self.program
    }

    pub fn kernels(&self) -> &Kernels {
        &self.kernels
    }

    /// Bytes of live device allocations.
    pub fn allocated_bytes(&self) -> usize {
        self.allocated.load(Ordering::Acquire)
    }

    /// Allocate `len` doubles of device memory.
    pub fn create_buffer(&self, label: &'static str, len: usize) -> Result<DeviceBuffer, SweepError> {
        if len == 0 {
            return Err(SweepError::Device {
                op: "create buffer",
                code: status::INVALID_BUFFER_SIZE,
            });
        }
        let mut data = Vec::new();
        data.try_reserve_exact(len).map_err(|_| SweepError::Device {
            op: "create buffer",
            code: status::MEM_OBJECT_ALLOCATION_FAILURE,
        })?;
        data.resize(len, 0.0);
        self.allocated
            .fetch_add(len * std::mem::size_of::<f64>(), Ordering::AcqRel);
        Ok(DeviceBuffer {
            storage: Arc::new(BufferStorage {
                label,
                data: RwLock::new(data),
                allocated: Arc::clone(&self.allocated),
            }),
            len,
        })
    }

    /// Enqueue a launch writing `n` zeros to the front of `buf`. Returns once
    /// the launch is queued, not once it has run.
    pub fn zero_buffer(&self, buf: &DeviceBuffer, n: usize) -> Result<(), SweepError> {
        self.queue.enqueue_kernel(
            &self.kernels.zero_buffer,
            KernelArgs::Zero(ZeroArgs {
                buf: buf.clone(),
                n,
            }),
            [n, 1],
        )
    }

    /// Block until every queued command has run.
    pub fn finish(&self) -> Result<(), SweepError> {
        self.queue.finish()
    }
}
