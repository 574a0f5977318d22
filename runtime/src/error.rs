//! Error types for the runtime.

use snafu::Snafu;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    #[snafu(display("{source}"))]
    Device { source: kiln_device::Error },

    /// The shared library could not be opened.
    #[snafu(display("failed to load backend module {}: {source}", path.display()))]
    ModuleLoad { path: std::path::PathBuf, source: libloading::Error },

    /// The library does not export the module entry point.
    #[snafu(display("module {} has no symbol '{symbol}': {source}", path.display()))]
    MissingEntryPoint { path: std::path::PathBuf, symbol: String, source: libloading::Error },

    /// A module's initializer reported failure.
    #[snafu(display("backend module '{module}' failed to initialize: {source}"))]
    ModuleInit { module: String, source: Box<Error> },

    /// The module needs a newer capability table than this host provides.
    #[snafu(display("module requires host API version {required}, host provides {available}"))]
    IncompatibleHostApi { required: u32, available: u32 },
}

