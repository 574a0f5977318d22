//! Loading backend modules.
//!
//! A backend module is a shared library exporting
//! [`MODULE_INIT_SYMBOL`] with the [`ModuleInitFn`] signature, or the same
//! function linked statically into the host. The initializer receives the
//! host's [`HostApi`] and registers its backends into the registry.
//!
//! ```ignore
//! #[unsafe(no_mangle)]
//! pub fn kiln_backend_module_init(api: &'static HostApi, registry: &mut BackendRegistry) -> Result<()> {
//!     api.require(1)?;
//!     registry.register("ACME", acme_init, acme_buffer_type(), None);
//!     Ok(())
//! }
//! ```
//!
//! Modules use the Rust ABI and must be built with the host's toolchain.

use std::path::Path;

use kiln_device::BackendRegistry;
use snafu::ResultExt;
use tracing::{debug, warn};

use crate::error::*;
use crate::host_api::HostApi;

/// Name of the entry point a module library exports.
pub const MODULE_INIT_SYMBOL: &str = "kiln_backend_module_init";

pub type ModuleInitFn = fn(&'static HostApi, &mut BackendRegistry) -> Result<()>;

/// Initializes backend modules and remembers which ones were loaded.
///
/// Libraries are never unloaded: the init functions they register stay
/// reachable from the registry for the rest of the process.
#[derive(Debug, Default)]
pub struct ModuleLoader {
    modules: Vec<String>,
}

impl ModuleLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Names of the modules initialized so far, in load order.
    pub fn modules(&self) -> &[String] {
        &self.modules
    }

    /// Run the initializer of a statically linked module.
    pub fn init_static(&mut self, name: &str, init: ModuleInitFn, registry: &mut BackendRegistry) -> Result<()> {
        let before = registry.len();
        init(HostApi::current(), registry)
            .map_err(|source| {
                warn!(module = name, error = %source, "Backend module failed to initialize");
                Box::new(source)
            })
            .context(ModuleInitSnafu { module: name })?;

        debug!(module = name, registered = registry.len() - before, "Backend module initialized");
        self.modules.push(name.to_owned());
        Ok(())
    }

    /// Load the shared library at `path` and run its initializer.
    ///
    /// # Safety
    ///
    /// Loading a library runs its constructors, and its
    /// [`MODULE_INIT_SYMBOL`] must have the [`ModuleInitFn`] signature.
    pub unsafe fn load(&mut self, path: impl AsRef<Path>, registry: &mut BackendRegistry) -> Result<()> {
        let path = path.as_ref();
        debug!(path = %path.display(), "Loading backend module");

        // SAFETY: forwarded to the caller.
        let library = unsafe { libloading::Library::new(path) }.context(ModuleLoadSnafu { path })?;
        // SAFETY: forwarded to the caller.
        let init: ModuleInitFn = unsafe { library.get::<ModuleInitFn>(MODULE_INIT_SYMBOL.as_bytes()) }
            .map(|symbol| *symbol)
            .context(MissingEntryPointSnafu { path, symbol: MODULE_INIT_SYMBOL })?;

        // Registered init functions point into the library.
        std::mem::forget(library);

        self.init_static(&path.display().to_string(), init, registry)
    }
}
