//! SweepError: Unified error type for kba-sweep public APIs
//!
//! Every fallible operation in the crate returns this type. Transport and
//! device failures carry the name of the failing operation together with the
//! backend's status code, so the binary can terminate the rank with that code.

use thiserror::Error;

/// Exit code used for configuration errors detected at setup.
pub const EXIT_CONFIG: i32 = 2;
/// Exit code used when the optional NaN/Inf check trips.
pub const EXIT_NUMERIC: i32 = 3;
/// Exit code used for unreadable or malformed problem files.
pub const EXIT_INPUT: i32 = 4;

/// Axis label used in configuration diagnostics.
pub type AxisName = &'static str;

/// Unified error type for kba-sweep operations.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum SweepError {
    /// Global cells along an axis do not split evenly across the ranks on that axis.
    #[error("Configuration error: n{axis}={cells} is not divisible by npe{axis}={ranks}")]
    NonDivisibleDecomposition {
        axis: AxisName,
        cells: usize,
        ranks: usize,
    },
    /// A count that must be strictly positive was zero.
    #[error("Configuration error: `{0}` must be positive")]
    ZeroCount(&'static str),
    /// A floating-point parameter was out of range (non-positive or non-finite).
    #[error("Configuration error: `{name}` = {value} is out of range")]
    InvalidParameter { name: &'static str, value: f64 },
    /// Only `cmom = nmom²` with `nmom` in 1..=3 has scattering coefficients.
    #[error("Configuration error: cmom={0} is not one of 1, 4, 9")]
    UnsupportedMoments(usize),
    /// The job was launched with a rank count that differs from `npex·npey·npez`.
    #[error("Configuration error: problem needs {expected} ranks, job has {found}")]
    RankCountMismatch { expected: usize, found: usize },
    /// Accelerator API failure (allocation, build, transfer, launch).
    #[error("Device error {code} during `{op}`")]
    Device { op: &'static str, code: i32 },
    /// Message-passing failure.
    #[error("Transport error {code} during `{op}`")]
    Transport { op: &'static str, code: i32 },
    /// A host array had the wrong number of elements for the target buffer.
    #[error("Length mismatch in `{op}`: expected {expected}, found {found}")]
    LengthMismatch {
        op: &'static str,
        expected: usize,
        found: usize,
    },
    /// NaN or Inf found in the scalar flux.
    #[error("Numeric error: non-finite scalar flux at group {group}, cell {cell}")]
    NonFinite { group: usize, cell: usize },
    /// The problem file could not be read.
    #[error("I/O error reading `{path}`: {message}")]
    Io { path: String, message: String },
    /// The problem file could not be parsed.
    #[error("Parse error: {0}")]
    Parse(String),
}

impl SweepError {
    /// True for errors detected by setup-time validation.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            SweepError::NonDivisibleDecomposition { .. }
                | SweepError::ZeroCount(_)
                | SweepError::InvalidParameter { .. }
                | SweepError::UnsupportedMoments(_)
                | SweepError::RankCountMismatch { .. }
        )
    }

    /// Process exit code for this error.
    ///
    /// Device and transport failures exit with the magnitude of the backend
    /// status code: device codes are negative and a process exit status is
    /// a byte, so `-46` exits as `46`. Zero maps to 1, magnitudes above 255
    /// to 255.
    pub fn exit_code(&self) -> i32 {
        match self {
            SweepError::Device { code, .. } | SweepError::Transport { code, .. } => {
                code.unsigned_abs().clamp(1, 255) as i32
            }
            SweepError::NonFinite { .. } => EXIT_NUMERIC,
            SweepError::Io { .. } | SweepError::Parse(_) => EXIT_INPUT,
            SweepError::LengthMismatch { .. } => 1,
            _ => EXIT_CONFIG,
        }
    }
}
