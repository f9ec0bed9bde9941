//! Kernel program: a registry of named compute entry points.

use std::fmt::{self, Debug};

use hashbrown::HashMap;
use once_cell::sync::Lazy;

use crate::accel::kernels::{self, ReduceFluxArgs, SweepPlaneArgs, ZeroArgs};
use crate::accel::status;
use crate::sweep_error::SweepError;

/// Global work size of a launch, two dimensions.
pub type NdRange = [usize; 2];

/// Entry point of a compiled kernel.
pub type KernelFn = fn(&KernelArgs, NdRange) -> Result<(), SweepError>;

/// Arguments bound to one launch.
#[derive(Debug)]
pub enum KernelArgs {
    Zero(ZeroArgs),
    SweepPlane(SweepPlaneArgs),
    ReduceFlux(ReduceFluxArgs),
}

static KERNEL_TABLE: Lazy<HashMap<&'static str, KernelFn>> = Lazy::new(|| {
    let mut table: HashMap<&'static str, KernelFn> = HashMap::new();
    table.insert("zero_buffer", kernels::zero_buffer);
    table.insert("sweep_plane", kernels::sweep_plane);
    table.insert("reduce_flux", kernels::reduce_flux);
    table
});

/// Kernel handle created from a built [`Program`].
#[derive(Clone, Copy)]
pub struct Kernel {
    name: &'static str,
    entry: KernelFn,
}

impl Debug for Kernel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Kernel").field(&self.name).finish()
    }
}

impl Kernel {
    pub fn name(&self) -> &'static str {
        self.name
    }

    pub(crate) fn entry(&self) -> KernelFn {
        self.entry
    }
}

/// A built program exposing a fixed set of kernels.
#[derive(Debug)]
pub struct Program {
    kernels: HashMap<&'static str, Kernel>,
}

impl Program {
    /// Build a program containing `names`.
    ///
    /// # Errors
    /// `Device { code: BUILD_PROGRAM_FAILURE }` if any name is not a known
    /// entry point.
    pub fn build(names: &[&str]) -> Result<Self, SweepError> {
        let mut kernels = HashMap::with_capacity(names.len());
        for name in names {
            let Some((&name, &entry)) = KERNEL_TABLE.get_key_value(*name) else {
                log::error!("program build: no kernel named `{name}`");
                return Err(SweepError::Device {
                    op: "build program",
                    code: status::BUILD_PROGRAM_FAILURE,
                });
            };
            kernels.insert(name, Kernel { name, entry });
        }
        Ok(Self { kernels })
    }

    /// Look up a kernel of this program by name.
    pub fn kernel(&self, name: &str) -> Result<Kernel, SweepError> {
        self.kernels
            .get(name)
            .copied()
            .ok_or(SweepError::Device {
                op: "create kernel",
                code: status::INVALID_KERNEL_NAME,
            })
    }

    pub fn kernel_names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.kernels.keys().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_entry_point_fails_the_build() {
        let err = Program::build(&["sweep_plane", "transpose"]).unwrap_err();
        assert_eq!(
            err,
            SweepError::Device {
                op: "build program",
                code: status::BUILD_PROGRAM_FAILURE
            }
        );
    }

    #[test]
    fn kernels_outside_the_program_are_not_found() {
        let program = Program::build(&["zero_buffer"]).unwrap();
        assert_eq!(program.kernel("zero_buffer").unwrap().name(), "zero_buffer");
        assert!(program.kernel("sweep_plane").is_err());
        assert_eq!(program.kernel_names().count(), 1);
    }
}
