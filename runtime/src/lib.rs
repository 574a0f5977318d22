//! Host side of kiln: the reference CPU backend, the capability table for
//! backend modules and the loader that initializes them.
//!
//! - [`cpu`] - CPU backend, its configuration, plans and kernels
//! - [`host_api`] - Function table passed to backend modules
//! - [`module`] - Static and shared-library backend modules

pub mod cpu;
pub mod error;
pub mod host_api;
pub mod module;


use kiln_device::BackendRegistry;

pub use cpu::{AsyncMode, CpuBackend, CpuConfig, CpuPlan, is_cpu};
pub use error::*;
pub use host_api::{HOST_API_VERSION, HostApi};
pub use module::{MODULE_INIT_SYMBOL, ModuleInitFn, ModuleLoader};

/// A registry with every backend built into this crate registered.
pub fn registry_with_builtins() -> BackendRegistry {
    let mut registry = BackendRegistry::new();
    cpu::register(&mut registry);
    registry
}
