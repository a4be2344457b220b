use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use common::{Metadata, Pointer, Resource, ResourceSpec};
use serde_json::Value;
use tokio::sync::{RwLock, broadcast};
use tracing::warn;

use super::{Runtime, StoreError};
use crate::controller::Input;

const EVENT_BUFFER: usize = 64;

#[derive(Debug, Clone)]
struct Entry {
    metadata: Metadata,
    spec: Value,
}

/// Versioned resources kept in process memory.
///
/// Every effective write bumps the resource version and is announced on a
/// broadcast feed that [`MemoryRuntime`]s filter by their inputs. Writing an
/// unchanged spec is a no-op.
#[derive(Clone)]
pub struct MemoryStore {
    resources: Arc<RwLock<HashMap<Pointer, Entry>>>,
    events: broadcast::Sender<Pointer>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        MemoryStore {
            resources: Arc::new(RwLock::new(HashMap::new())),
            events,
        }
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, pointer: &Pointer) -> Result<Resource<Value>, StoreError> {
        let resources = self.resources.read().await;
        let entry = resources
            .get(pointer)
            .ok_or_else(|| StoreError::NotFound(pointer.clone()))?;
        Ok(Resource {
            metadata: entry.metadata.clone(),
            spec: entry.spec.clone(),
        })
    }

    pub async fn get_spec<S: ResourceSpec>(&self, id: &str) -> Result<Resource<S>, StoreError> {
        let raw = self.get(&Pointer::of::<S>(id)).await?;
        Ok(Resource {
            metadata: raw.metadata,
            spec: serde_json::from_value(raw.spec)?,
        })
    }

    /// Write a resource without an owner, the way producers outside the
    /// controller set publish their inputs.
    pub async fn put<S: ResourceSpec>(&self, id: &str, spec: &S) -> Result<Metadata, StoreError> {
        self.write(Pointer::of::<S>(id), serde_json::to_value(spec)?, None)
            .await
    }

    pub async fn delete(&self, pointer: &Pointer) -> Result<(), StoreError> {
        let removed = self.resources.write().await.remove(pointer);
        if removed.is_none() {
            return Err(StoreError::NotFound(pointer.clone()));
        }
        let _ = self.events.send(pointer.clone());
        Ok(())
    }

    /// Runtime for the controller `owner` watching `inputs`.
    pub fn runtime(&self, owner: &str, inputs: Vec<Input>) -> MemoryRuntime {
        MemoryRuntime {
            store: self.clone(),
            owner: owner.to_string(),
            inputs,
            events: self.events.subscribe(),
            primed: false,
        }
    }

    async fn write(
        &self,
        pointer: Pointer,
        spec: Value,
        owner: Option<&str>,
    ) -> Result<Metadata, StoreError> {
        let mut resources = self.resources.write().await;
        let metadata = match resources.get_mut(&pointer) {
            Some(entry) => {
                if entry.metadata.owner.as_deref() != owner {
                    return Err(StoreError::Conflict {
                        pointer,
                        owner: entry.metadata.owner.clone(),
                        writer: owner.map(str::to_string),
                    });
                }
                if entry.spec == spec {
                    return Ok(entry.metadata.clone());
                }
                entry.spec = spec;
                entry.metadata.version += 1;
                entry.metadata.clone()
            }
            None => {
                let metadata = Metadata {
                    pointer: pointer.clone(),
                    version: 1,
                    owner: owner.map(str::to_string),
                };
                resources.insert(
                    pointer.clone(),
                    Entry {
                        metadata: metadata.clone(),
                        spec,
                    },
                );
                metadata
            }
        };
        drop(resources);

        // nobody listening is fine
        let _ = self.events.send(pointer);
        Ok(metadata)
    }
}

/// [`Runtime`] handed to a single controller.
///
/// The first [`Runtime::next_event`] resolves immediately so the controller
/// reconciles once at startup, later calls resolve on input changes only.
pub struct MemoryRuntime {
    store: MemoryStore,
    owner: String,
    inputs: Vec<Input>,
    events: broadcast::Receiver<Pointer>,
    primed: bool,
}

#[async_trait]
impl Runtime for MemoryRuntime {
    async fn next_event(&mut self) -> Result<(), StoreError> {
        if !self.primed {
            self.primed = true;
            return Ok(());
        }

        loop {
            match self.events.recv().await {
                Ok(pointer) if self.inputs.iter().any(|input| input.matches(&pointer)) => {
                    return Ok(());
                }
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(
                        owner = %self.owner,
                        skipped, "resource event feed lagged, forcing reconcile"
                    );
                    return Ok(());
                }
                Err(broadcast::error::RecvError::Closed) => return Err(StoreError::Closed),
            }
        }
    }

    async fn get(&self, pointer: &Pointer) -> Result<Resource<Value>, StoreError> {
        self.store.get(pointer).await
    }

    async fn modify(&self, pointer: &Pointer, spec: Value) -> Result<Metadata, StoreError> {
        self.store
            .write(pointer.clone(), spec, Some(&self.owner))
            .await
    }
}
