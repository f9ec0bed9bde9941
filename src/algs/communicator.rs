//! Thin façade over intra-process (threads) or inter-process (MPI) message
//! passing between ranks of a Cartesian process grid.
//!
//! Point-to-point calls are blocking. Messages between a given pair of ranks
//! are delivered in the order they were sent.

use std::collections::VecDeque;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use dashmap::DashMap;
use once_cell::sync::OnceCell;

use crate::algs::wire;
use crate::sweep_error::SweepError;
use crate::topology::rank_info::CartGrid;

/// Transport status codes carried by [`SweepError::Transport`].
pub mod status {
    pub const ERR_COUNT: i32 = 2;
    pub const ERR_RANK: i32 = 6;
    pub const ERR_TRUNCATE: i32 = 15;
    pub const ERR_OTHER: i32 = 16;
    /// A peer aborted the job.
    pub const ERR_ABORTED: i32 = 17;
}

/// `max` for convergence measures: a NaN operand is treated as `+∞`, so a
/// non-finite contribution can never be dropped by the reduction.
#[inline]
pub fn max_or_inf(a: f64, b: f64) -> f64 {
    let inf_if_nan = |v: f64| if v.is_nan() { f64::INFINITY } else { v };
    inf_if_nan(a).max(inf_if_nan(b))
}

/// Rank-to-rank communication used by the sweep.
pub trait Communicator {
    fn rank(&self) -> usize;
    fn size(&self) -> usize;

    /// Blocking send of `buf` to `peer`.
    fn send(&self, peer: usize, buf: &[f64]) -> Result<(), SweepError>;

    /// Blocking receive from `peer` into `buf`. A shorter message fills a
    /// prefix; a longer one fails with `ERR_TRUNCATE`.
    fn recv(&self, peer: usize, buf: &mut [f64]) -> Result<(), SweepError>;

    /// Global maximum; NaN on any rank reduces to `+∞` (see [`max_or_inf`]).
    fn all_reduce_max(&self, local: f64) -> Result<f64, SweepError>;
    fn all_reduce_sum(&self, local: f64) -> Result<f64, SweepError>;

    /// Concatenate every rank's `local` in rank order on rank 0.
    fn gather_to_root(&self, local: &[f64]) -> Result<Option<Vec<f64>>, SweepError>;

    fn barrier(&self) -> Result<(), SweepError>;

    /// Coordinates of `rank` in `grid`.
    fn cart_coords(&self, grid: &CartGrid, rank: usize) -> Result<[usize; 3], SweepError> {
        if rank >= grid.size() {
            return Err(SweepError::Transport {
                op: "cart coords",
                code: status::ERR_RANK,
            });
        }
        Ok(grid.coords_of(rank))
    }

    /// Rank at `coords` in `grid`.
    fn cart_rank(&self, grid: &CartGrid, coords: [usize; 3]) -> Result<usize, SweepError> {
        if coords.iter().zip(grid.dims.iter()).any(|(c, d)| c >= d) {
            return Err(SweepError::Transport {
                op: "cart rank",
                code: status::ERR_RANK,
            });
        }
        Ok(grid.rank_of(coords))
    }
}

impl<C: Communicator + ?Sized> Communicator for &C {
    fn rank(&self) -> usize {
        (**self).rank()
    }
    fn size(&self) -> usize {
        (**self).size()
    }
    fn send(&self, peer: usize, buf: &[f64]) -> Result<(), SweepError> {
        (**self).send(peer, buf)
    }
    fn recv(&self, peer: usize, buf: &mut [f64]) -> Result<(), SweepError> {
        (**self).recv(peer, buf)
    }
    fn all_reduce_max(&self, local: f64) -> Result<f64, SweepError> {
        (**self).all_reduce_max(local)
    }
    fn all_reduce_sum(&self, local: f64) -> Result<f64, SweepError> {
        (**self).all_reduce_sum(local)
    }
    fn gather_to_root(&self, local: &[f64]) -> Result<Option<Vec<f64>>, SweepError> {
        (**self).gather_to_root(local)
    }
    fn barrier(&self) -> Result<(), SweepError> {
        (**self).barrier()
    }
    fn cart_coords(&self, grid: &CartGrid, rank: usize) -> Result<[usize; 3], SweepError> {
        (**self).cart_coords(grid, rank)
    }
    fn cart_rank(&self, grid: &CartGrid, coords: [usize; 3]) -> Result<usize, SweepError> {
        (**self).cart_rank(grid, coords)
    }
}

/// Single-rank communicator; every face is a global boundary.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoComm;

impl Communicator for NoComm {
    fn rank(&self) -> usize {
        0
    }
    fn size(&self) -> usize {
        1
    }
    fn send(&self, _peer: usize, _buf: &[f64]) -> Result<(), SweepError> {
        Err(SweepError::Transport {
            op: "send",
            code: status::ERR_RANK,
        })
    }
    fn recv(&self, _peer: usize, _buf: &mut [f64]) -> Result<(), SweepError> {
        Err(SweepError::Transport {
            op: "recv",
            code: status::ERR_RANK,
        })
    }
    fn all_reduce_max(&self, local: f64) -> Result<f64, SweepError> {
        Ok(max_or_inf(local, local))
    }
    fn all_reduce_sum(&self, local: f64) -> Result<f64, SweepError> {
        Ok(local)
    }
    fn gather_to_root(&self, local: &[f64]) -> Result<Option<Vec<f64>>, SweepError> {
        Ok(Some(local.to_vec()))
    }
    fn barrier(&self) -> Result<(), SweepError> {
        Ok(())
    }
}

// --- LocalComm: one thread per rank in this process ---
type Key = (usize, usize, u16); // (src, dst, tag)
type Mailbox = DashMap<Key, VecDeque<Bytes>>;

const TAG_P2P: u16 = 1;
const TAG_COLLECTIVE: u16 = 2;
const TAG_GATHER: u16 = 3;

/// A blocked receive gives up after this long.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

/// Shared mailbox for `size` in-process ranks.
///
/// The first rank to fail records its error in the world; every blocked
/// receive on the other ranks then returns instead of waiting for the timeout.
#[derive(Clone, Debug)]
pub struct LocalWorld {
    size: usize,
    mailbox: Arc<Mailbox>,
    failure: Arc<OnceCell<SweepError>>,
    timeout: Duration,
}

impl LocalWorld {
    pub fn new(size: usize) -> Self {
        Self {
            size,
            mailbox: Arc::new(DashMap::new()),
            failure: Arc::new(OnceCell::new()),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Communicator for `rank`.
    ///
    /// # Panics
    /// Panics if `rank >= size`.
    pub fn comm(&self, rank: usize) -> LocalComm {
        assert!(rank < self.size, "rank {rank} outside world of {}", self.size);
        LocalComm {
            rank,
            size: self.size,
            mailbox: Arc::clone(&self.mailbox),
            failure: Arc::clone(&self.failure),
            timeout: self.timeout,
        }
    }

    /// Communicators for every rank, in rank order.
    pub fn comms(&self) -> Vec<LocalComm> {
        (0..self.size).map(|r| self.comm(r)).collect()
    }

    /// Messages posted but never received.
    pub fn undelivered(&self) -> usize {
        self.mailbox.iter().map(|e| e.value().len()).sum()
    }

    /// The error of the first rank that aborted, if any.
    pub fn failure(&self) -> Option<&SweepError> {
        self.failure.get()
    }

    /// Run `f` on one scoped thread per rank and collect the results in rank
    /// order.
    ///
    /// A rank that returns an error or panics aborts the world. The returned
    /// error is the one that caused the abort, not the transport errors its
    /// peers see while unwinding.
    pub fn run<T, F>(&self, f: F) -> Result<Vec<T>, SweepError>
    where
        F: Fn(&LocalComm) -> Result<T, SweepError> + Sync,
        T: Send,
    {
        let joined: Vec<Option<Result<T, SweepError>>> = std::thread::scope(|s| {
            let handles: Vec<_> = self
                .comms()
                .into_iter()
                .map(|comm| {
                    let f = &f;
                    s.spawn(move || {
                        let result = std::panic::catch_unwind(AssertUnwindSafe(|| f(&comm)));
                        match result {
                            Ok(Err(e)) => {
                                comm.abort(e.clone());
                                Some(Err(e))
                            }
                            Ok(ok) => Some(ok),
                            Err(_) => {
                                comm.abort(SweepError::Transport {
                                    op: "rank thread panicked",
                                    code: status::ERR_OTHER,
                                });
                                None
                            }
                        }
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().ok().flatten()).collect()
        });
        if let Some(e) = self.failure() {
            return Err(e.clone());
        }
        joined
            .into_iter()
            .map(|r| {
                r.unwrap_or(Err(SweepError::Transport {
                    op: "rank thread panicked",
                    code: status::ERR_OTHER,
                }))
            })
            .collect()
    }
}

/// One rank of a [`LocalWorld`].
#[derive(Clone, Debug)]
pub struct LocalComm {
    rank: usize,
    size: usize,
    mailbox: Arc<Mailbox>,
    failure: Arc<OnceCell<SweepError>>,
    timeout: Duration,
}

impl LocalComm {
    fn check_peer(&self, op: &'static str, peer: usize) -> Result<(), SweepError> {
        if peer >= self.size || peer == self.rank {
            return Err(SweepError::Transport {
                op,
                code: status::ERR_RANK,
            });
        }
        Ok(())
    }

    /// Record `err` as the world's failure unless another rank got there
    /// first. Blocked receives on every rank return once it is set.
    pub fn abort(&self, err: SweepError) {
        if self.failure.set(err).is_ok() {
            log::error!("rank {}: aborting the local world", self.rank);
        }
    }

    fn post(&self, peer: usize, tag: u16, msg: Bytes) {
        self.mailbox
            .entry((self.rank, peer, tag))
            .or_default()
            .push_back(msg);
    }

    fn take(&self, op: &'static str, peer: usize, tag: u16) -> Result<Bytes, SweepError> {
        let key = (peer, self.rank, tag);
        let start = Instant::now();
        loop {
            if let Some(mut queue) = self.mailbox.get_mut(&key) {
                if let Some(msg) = queue.pop_front() {
                    return Ok(msg);
                }
            }
            if self.failure.get().is_some() {
                return Err(SweepError::Transport {
                    op,
                    code: status::ERR_ABORTED,
                });
            }
            if start.elapsed() > self.timeout {
                log::error!(
                    "rank {}: {op} from rank {peer} timed out after {:?}",
                    self.rank,
                    self.timeout
                );
                return Err(SweepError::Transport {
                    op,
                    code: status::ERR_OTHER,
                });
            }
            std::thread::yield_now();
        }
    }

    fn all_reduce(&self, local: f64, op: fn(f64, f64) -> f64) -> Result<f64, SweepError> {
        if self.rank != 0 {
            self.post(0, TAG_COLLECTIVE, wire::encode(&[local]));
            let msg = self.take("all reduce", 0, TAG_COLLECTIVE)?;
            return Ok(wire::decode(&msg).first().copied().unwrap_or(f64::NAN));
        }
        let mut acc = local;
        for peer in 1..self.size {
            let msg = self.take("all reduce", peer, TAG_COLLECTIVE)?;
            let v = wire::decode(&msg).first().copied().unwrap_or(f64::NAN);
            acc = op(acc, v);
        }
        for peer in 1..self.size {
            self.post(peer, TAG_COLLECTIVE, wire::encode(&[acc]));
        }
        Ok(acc)
    }
}

impl Communicator for LocalComm {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.size
    }

    fn send(&self, peer: usize, buf: &[f64]) -> Result<(), SweepError> {
        self.check_peer("send", peer)?;
        self.post(peer, TAG_P2P, wire::encode(buf));
        Ok(())
    }

    fn recv(&self, peer: usize, buf: &mut [f64]) -> Result<(), SweepError> {
        self.check_peer("recv", peer)?;
        let msg = self.take("recv", peer, TAG_P2P)?;
        if wire::count(&msg) > buf.len() {
            return Err(SweepError::Transport {
                op: "recv",
                code: status::ERR_TRUNCATE,
            });
        }
        wire::decode_into(&msg, buf);
        Ok(())
    }

    fn all_reduce_max(&self, local: f64) -> Result<f64, SweepError> {
        self.all_reduce(local, max_or_inf)
    }

    fn all_reduce_sum(&self, local: f64) -> Result<f64, SweepError> {
        self.all_reduce(local, |a, b| a + b)
    }

    fn gather_to_root(&self, local: &[f64]) -> Result<Option<Vec<f64>>, SweepError> {
        if self.rank != 0 {
            self.post(0, TAG_GATHER, wire::encode(local));
            return Ok(None);
        }
        let mut out = local.to_vec();
        for peer in 1..self.size {
            let msg = self.take("gather", peer, TAG_GATHER)?;
            out.extend(wire::decode(&msg));
        }
        Ok(Some(out))
    }

    fn barrier(&self) -> Result<(), SweepError> {
        self.all_reduce(0.0, |a, b| a + b).map(|_| ())
    }
}

// --- MPI backend (feature = "mpi-support") ---
#[cfg(feature = "mpi-support")]
mod mpi_backend {
    use super::*;
    use mpi::collective::SystemOperation;
    use mpi::environment::Universe;
    use mpi::topology::{CartesianCommunicator, SimpleCommunicator};
    use mpi::traits::{
        Communicator as _, CommunicatorCollectives as _, Destination as _, Root as _,
        Source as _,
    };

    /// One MPI process per rank, Cartesian topology without periodicity or
    /// reordering. Once [`MpiComm::with_grid`] attaches the topology, halo
    /// traffic uses it; collectives stay on the world communicator.
    pub struct MpiComm {
        world: SimpleCommunicator,
        cart: Option<CartesianCommunicator>,
        rank: usize,
        size: usize,
        // dropped last: finalizes MPI
        _universe: Universe,
    }

    impl MpiComm {
        /// Initialize MPI for this process.
        pub fn new() -> Result<Self, SweepError> {
            let universe = mpi::initialize().ok_or(SweepError::Transport {
                op: "initialize",
                code: status::ERR_OTHER,
            })?;
            let world = universe.world();
            let rank = world.rank() as usize;
            let size = world.size() as usize;
            Ok(Self {
                world,
                cart: None,
                rank,
                size,
                _universe: universe,
            })
        }

        /// Attach the Cartesian topology for `grid`.
        pub fn with_grid(mut self, grid: &CartGrid) -> Result<Self, SweepError> {
            let dims: Vec<i32> = grid.dims.iter().map(|&d| d as i32).collect();
            let cart = self
                .world
                .create_cartesian_communicator(&dims, &[false; 3], false)
                .ok_or(SweepError::Transport {
                    op: "create cartesian communicator",
                    code: status::ERR_RANK,
                })?;
            if cart.rank() as usize != self.rank {
                return Err(SweepError::Transport {
                    op: "create cartesian communicator",
                    code: status::ERR_RANK,
                });
            }
            self.cart = Some(cart);
            Ok(self)
        }

        /// Whether point-to-point traffic goes through a Cartesian topology.
        pub fn has_topology(&self) -> bool {
            self.cart.is_some()
        }
    }

    impl Communicator for MpiComm {
        fn rank(&self) -> usize {
            self.rank
        }

        fn size(&self) -> usize {
            self.size
        }

        fn send(&self, peer: usize, buf: &[f64]) -> Result<(), SweepError> {
            if peer >= self.size {
                return Err(SweepError::Transport {
                    op: "send",
                    code: status::ERR_RANK,
                });
            }
            match &self.cart {
                Some(cart) => cart.process_at_rank(peer as i32).send(buf),
                None => self.world.process_at_rank(peer as i32).send(buf),
            }
            Ok(())
        }

        fn recv(&self, peer: usize, buf: &mut [f64]) -> Result<(), SweepError> {
            if peer >= self.size {
                return Err(SweepError::Transport {
                    op: "recv",
                    code: status::ERR_RANK,
                });
            }
            match &self.cart {
                Some(cart) => cart.process_at_rank(peer as i32).receive_into(buf),
                None => self.world.process_at_rank(peer as i32).receive_into(buf),
            };
            Ok(())
        }

        fn all_reduce_max(&self, local: f64) -> Result<f64, SweepError> {
            // MPI_MAX leaves NaN ordering to the implementation
            let local = max_or_inf(local, local);
            let mut global = 0.0f64;
            self.world
                .all_reduce_into(&local, &mut global, SystemOperation::max());
            Ok(global)
        }

        fn all_reduce_sum(&self, local: f64) -> Result<f64, SweepError> {
            let mut global = 0.0f64;
            self.world
                .all_reduce_into(&local, &mut global, SystemOperation::sum());
            Ok(global)
        }

        fn gather_to_root(&self, local: &[f64]) -> Result<Option<Vec<f64>>, SweepError> {
            let root = self.world.process_at_rank(0);
            if self.rank == 0 {
                let mut out = vec![0.0; local.len() * self.size];
                root.gather_into_root(local, &mut out[..]);
                Ok(Some(out))
            } else {
                root.gather_into(local);
                Ok(None)
            }
        }

        fn barrier(&self) -> Result<(), SweepError> {
            self.world.barrier();
            Ok(())
        }

        fn cart_coords(&self, grid: &CartGrid, rank: usize) -> Result<[usize; 3], SweepError> {
            let Some(cart) = &self.cart else {
                return Ok(grid.coords_of(rank));
            };
            let c = cart.rank_to_coordinates(rank as i32);
            match c.as_slice() {
                [x, y, z] => Ok([*x as usize, *y as usize, *z as usize]),
                _ => Err(SweepError::Transport {
                    op: "cart coords",
                    code: status::ERR_COUNT,
                }),
            }
        }

        fn cart_rank(&self, grid: &CartGrid, coords: [usize; 3]) -> Result<usize, SweepError> {
            let Some(cart) = &self.cart else {
                return Ok(grid.rank_of(coords));
            };
            let c: Vec<i32> = coords.iter().map(|&v| v as i32).collect();
            Ok(cart.coordinates_to_rank(&c) as usize)
        }
    }
}

#[cfg(feature = "mpi-support")]
pub use mpi_backend::MpiComm;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_roundtrip_preserves_order() {
        let world = LocalWorld::new(2);
        let (c0, c1) = (world.comm(0), world.comm(1));
        c0.send(1, &[1.0, 2.0]).unwrap();
        c0.send(1, &[3.0]).unwrap();
        let mut a = [0.0; 2];
        let mut b = [0.0; 1];
        c1.recv(0, &mut a).unwrap();
        c1.recv(0, &mut b).unwrap();
        assert_eq!(a, [1.0, 2.0]);
        assert_eq!(b, [3.0]);
        assert_eq!(world.undelivered(), 0);
    }

    #[test]
    fn oversized_message_is_truncation() {
        let world = LocalWorld::new(2);
        world.comm(0).send(1, &[1.0, 2.0, 3.0]).unwrap();
        let mut small = [0.0; 2];
        let err = world.comm(1).recv(0, &mut small).unwrap_err();
        assert_eq!(err.exit_code(), status::ERR_TRUNCATE);
    }

    #[test]
    fn missing_sender_times_out() {
        let world = LocalWorld::new(2).with_timeout(Duration::from_millis(20));
        let mut buf = [0.0; 1];
        let err = world.comm(1).recv(0, &mut buf).unwrap_err();
        assert_eq!(
            err,
            SweepError::Transport {
                op: "recv",
                code: status::ERR_OTHER
            }
        );
    }

    #[test]
    fn collectives_across_threads() {
        let world = LocalWorld::new(4);
        let results: Vec<_> = std::thread::scope(|s| {
            let handles: Vec<_> = world
                .comms()
                .into_iter()
                .map(|c| {
                    s.spawn(move || {
                        let r = c.rank() as f64;
                        let max = c.all_reduce_max(r).unwrap();
                        let sum = c.all_reduce_sum(r).unwrap();
                        c.barrier().unwrap();
                        let gathered = c.gather_to_root(&[r, r]).unwrap();
                        (max, sum, gathered)
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });
        for (rank, (max, sum, gathered)) in results.into_iter().enumerate() {
            assert_eq!(max, 3.0);
            assert_eq!(sum, 6.0);
            if rank == 0 {
                assert_eq!(gathered.unwrap(), vec![0., 0., 1., 1., 2., 2., 3., 3.]);
            } else {
                assert!(gathered.is_none());
            }
        }
        assert_eq!(world.undelivered(), 0);
    }

    #[test]
    fn nan_on_one_rank_reduces_to_infinity() {
        let world = LocalWorld::new(2);
        let maxes: Vec<f64> = std::thread::scope(|s| {
            let handles: Vec<_> = world
                .comms()
                .into_iter()
                .map(|c| {
                    s.spawn(move || {
                        let local = if c.rank() == 1 { f64::NAN } else { 0.5 };
                        c.all_reduce_max(local).unwrap()
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });
        assert_eq!(maxes, vec![f64::INFINITY; 2]);
        assert_eq!(NoComm.all_reduce_max(f64::NAN).unwrap(), f64::INFINITY);
        assert_eq!(max_or_inf(1.0, 2.0), 2.0);
    }

    #[test]
    fn failing_rank_unblocks_its_peers_and_keeps_its_code() {
        let world = LocalWorld::new(3);
        let start = Instant::now();
        let err = world
            .run(|c| {
                if c.rank() == 2 {
                    return Err(SweepError::Device {
                        op: "sweep_plane",
                        code: -46,
                    });
                }
                let mut buf = [0.0; 4];
                c.recv(2, &mut buf)?;
                Ok(buf)
            })
            .unwrap_err();
        assert!(start.elapsed() < DEFAULT_TIMEOUT / 4);
        assert_eq!(
            err,
            SweepError::Device {
                op: "sweep_plane",
                code: -46
            }
        );
        assert_eq!(world.failure(), Some(&err));
    }

    #[test]
    fn run_collects_results_in_rank_order() {
        let world = LocalWorld::new(3);
        let ranks = world
            .run(|c| Ok(c.all_reduce_sum(1.0)? as usize + c.rank()))
            .unwrap();
        assert_eq!(ranks, vec![3, 4, 5]);
        assert!(world.failure().is_none());
    }

    #[test]
    fn no_comm_is_a_single_rank() {
        let c = NoComm;
        assert_eq!((c.rank(), c.size()), (0, 1));
        assert!(c.send(0, &[1.0]).is_err());
        assert_eq!(c.all_reduce_max(2.5).unwrap(), 2.5);
        assert_eq!(c.gather_to_root(&[1.0]).unwrap(), Some(vec![1.0]));
        let grid = CartGrid { dims: [2, 1, 1] };
        assert!(c.cart_coords(&grid, 2).is_err());
        assert_eq!(c.cart_rank(&grid, [1, 0, 0]).unwrap(), 1);
    }
}
