//! Access to the shared resource store from inside a controller.
//!
//! A controller only ever sees a [`Runtime`]: it waits for changes to its
//! declared inputs, reads resources by pointer and upserts the outputs it
//! owns. [`MemoryStore`] is the in-process implementation used by the
//! daemon and by tests.

use async_trait::async_trait;
use common::{Metadata, Pointer, Resource, ResourceSpec};
use serde_json::Value;

pub mod memory;

pub use memory::{MemoryRuntime, MemoryStore};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("resource {0} doesn't exist")]
    NotFound(Pointer),
    #[error("resource {pointer} is owned by {owner:?}, refusing write from {writer:?}")]
    Conflict {
        pointer: Pointer,
        owner: Option<String>,
        writer: Option<String>,
    },
    #[error("resource event stream closed")]
    Closed,
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    /// Not-found is a normal condition for inputs that are not produced yet.
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound(_))
    }
}

#[async_trait]
pub trait Runtime: Send + Sync {
    /// Wait for the next change to any of the controller inputs.
    ///
    /// Must be cancel safe, it is raced against other wakeups.
    async fn next_event(&mut self) -> Result<(), StoreError>;

    /// Latest version of the resource.
    async fn get(&self, pointer: &Pointer) -> Result<Resource<Value>, StoreError>;

    /// Create or replace the resource, owned by this controller.
    async fn modify(&self, pointer: &Pointer, spec: Value) -> Result<Metadata, StoreError>;
}

/// Typed helpers over [`Runtime`].
#[async_trait]
pub trait RuntimeExt: Runtime {
    async fn get_typed<S: ResourceSpec>(&self, id: &str) -> Result<Resource<S>, StoreError> {
        let raw = self.get(&Pointer::of::<S>(id)).await?;
        let spec = serde_json::from_value(raw.spec)?;
        Ok(Resource {
            metadata: raw.metadata,
            spec,
        })
    }

    /// Read-modify-write of a typed resource, starting from `S::default()`
    /// when it doesn't exist yet.
    async fn modify_typed<S, F>(&self, id: &str, f: F) -> Result<Metadata, StoreError>
    where
        S: ResourceSpec,
        F: FnOnce(&mut S) + Send,
    {
        let pointer = Pointer::of::<S>(id);
        let mut spec: S = match self.get(&pointer).await {
            Ok(raw) => serde_json::from_value(raw.spec)?,
            Err(e) if e.is_not_found() => S::default(),
            Err(e) => return Err(e),
        };
        f(&mut spec);
        self.modify(&pointer, serde_json::to_value(&spec)?).await
    }
}

impl<R: Runtime + ?Sized> RuntimeExt for R {}
