//! Named backend discovery.
//!
//! The host builds one [`BackendRegistry`] during startup, lets every backend
//! module register itself, and passes the registry to whatever needs to
//! create backends. Registration needs `&mut`, lookups only `&`.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use snafu::{OptionExt, ResultExt, ensure};
use tracing::{debug, warn};

use crate::backend::Backend;
use crate::buffer::Buffer;
use crate::buffer_type::{BufferType, alloc_buffer};
use crate::error::*;

/// Opaque state handed back to an init function.
pub type UserData = Arc<dyn Any + Send + Sync>;

/// Creates a backend from a parameter string.
pub type InitFn = Arc<dyn Fn(&str, Option<&UserData>) -> Result<Box<dyn Backend>> + Send + Sync>;

struct RegistryEntry {
    name: String,
    init_fn: InitFn,
    default_buffer_type: Arc<dyn BufferType>,
    user_data: Option<UserData>,
}

#[derive(Default)]
pub struct BackendRegistry {
    entries: Vec<RegistryEntry>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a backend and return its index.
    ///
    /// Registering an existing name replaces that entry in place (the index
    /// stays the same) and the new `init_fn` is used from then on.
    pub fn register<F>(
        &mut self,
        name: impl Into<String>,
        init_fn: F,
        default_buffer_type: Arc<dyn BufferType>,
        user_data: Option<UserData>,
    ) -> usize
    where
        F: Fn(&str, Option<&UserData>) -> Result<Box<dyn Backend>> + Send + Sync + 'static,
    {
        let entry =
            RegistryEntry { name: name.into(), init_fn: Arc::new(init_fn), default_buffer_type, user_data };

        if let Some(index) = self.find(&entry.name) {
            warn!(backend = %entry.name, index, "Backend registered twice, replacing previous entry");
            self.entries[index] = entry;
            return index;
        }

        debug!(backend = %entry.name, buffer_type = entry.default_buffer_type.name(), "Backend registered");
        self.entries.push(entry);
        self.entries.len() - 1
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn find(&self, name: &str) -> Option<usize> {
        self.entries.iter().position(|entry| entry.name == name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|entry| entry.name.as_str())
    }

    pub fn name(&self, index: usize) -> Result<&str> {
        Ok(&self.entry(index)?.name)
    }

    pub fn default_buffer_type(&self, index: usize) -> Result<Arc<dyn BufferType>> {
        Ok(Arc::clone(&self.entry(index)?.default_buffer_type))
    }

    /// Create the backend registered as `name`.
    pub fn init_backend(&self, name: &str, params: &str) -> Result<Box<dyn Backend>> {
        let index = self.find(name).context(UnknownBackendSnafu { name })?;
        self.init_backend_at(index, params)
    }

    pub fn init_backend_at(&self, index: usize, params: &str) -> Result<Box<dyn Backend>> {
        let entry = self.entry(index)?;
        debug!(backend = %entry.name, params, "Initializing backend");
        (entry.init_fn)(params, entry.user_data.as_ref())
            .map_err(Box::new)
            .context(BackendInitSnafu { name: entry.name.as_str() })
    }

    /// Create a backend from `"NAME"` or `"NAME:params"`.
    pub fn init_backend_from_str(&self, descriptor: &str) -> Result<Box<dyn Backend>> {
        let (name, params) = descriptor.split_once(':').unwrap_or((descriptor, ""));
        self.init_backend(name, params)
    }

    /// Allocate from the default buffer type of the backend at `index`.
    pub fn alloc_buffer(&self, index: usize, size: usize) -> Result<Arc<Buffer>> {
        alloc_buffer(&self.entry(index)?.default_buffer_type, size)
    }

    fn entry(&self, index: usize) -> Result<&RegistryEntry> {
        let len = self.entries.len();
        ensure!(index < len, BackendIndexSnafu { index, len });
        Ok(&self.entries[index])
    }
}

impl fmt::Debug for BackendRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}
