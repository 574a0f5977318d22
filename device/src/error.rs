use kiln_graph::Op;
use snafu::Snafu;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    /// The buffer type could not provide a region of the requested size.
    #[snafu(display("{buffer_type}: failed to allocate {size} bytes: {reason}"))]
    Allocation { buffer_type: String, size: usize, reason: String },

    /// No backend is registered under this name.
    #[snafu(display("no backend registered as '{name}'"))]
    UnknownBackend { name: String },

    #[snafu(display("backend index {index} out of range, {len} registered"))]
    BackendIndex { index: usize, len: usize },

    /// A registered init function failed.
    #[snafu(display("failed to initialize backend '{name}': {source}"))]
    BackendInit { name: String, source: Box<Error> },

    /// The backend cannot run on this machine (missing device, driver, ...).
    #[snafu(display("backend '{backend}' unavailable: {reason}"))]
    Unavailable { backend: String, reason: String },

    #[snafu(display("backend '{backend}': invalid parameters '{params}': {reason}"))]
    InvalidParams { backend: String, params: String, reason: String },

    /// The graph contains an operation the backend cannot represent.
    #[snafu(display("backend '{backend}' does not support {op:?} (node '{node}')"))]
    UnsupportedOp { backend: String, op: Op, node: String },

    #[snafu(display("tensor '{name}' at offset {offset} is not aligned to {alignment} bytes"))]
    Misaligned { name: String, offset: usize, alignment: usize },

    /// A tensor does not fit into the remaining space of a buffer.
    #[snafu(display("tensor '{name}' needs bytes up to {end}, buffer holds {size}"))]
    OutOfSpace { name: String, end: usize, size: usize },

    #[snafu(display("failed to bind tensor: {source}"))]
    Bind { source: kiln_graph::Error },
}
