use async_trait::async_trait;
use common::{Pointer, ResourceSpec};
use tokio_util::sync::CancellationToken;

use crate::runtime::Runtime;

/// How a controller depends on an input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputKind {
    /// The controller must tear down before the input is destroyed.
    Strong,
    /// Changes wake the controller, no teardown ordering.
    Weak,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Input {
    pub namespace: String,
    pub resource_type: String,
    /// `None` watches every resource of the type.
    pub id: Option<String>,
    pub kind: InputKind,
}

impl Input {
    pub fn of<S: ResourceSpec>(id: Option<&str>, kind: InputKind) -> Self {
        Input {
            namespace: S::NAMESPACE.to_string(),
            resource_type: S::TYPE.to_string(),
            id: id.map(str::to_string),
            kind,
        }
    }

    pub fn matches(&self, pointer: &Pointer) -> bool {
        self.namespace == pointer.namespace
            && self.resource_type == pointer.resource_type
            && self.id.as_ref().is_none_or(|id| *id == pointer.id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputKind {
    /// Only this controller writes resources of the type.
    Exclusive,
    Shared,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Output {
    pub resource_type: String,
    pub kind: OutputKind,
}

impl Output {
    pub fn of<S: ResourceSpec>(kind: OutputKind) -> Self {
        Output {
            resource_type: S::TYPE.to_string(),
            kind,
        }
    }
}

/// A reconciling agent hosted by the controller runtime.
///
/// `run` returns `Ok(())` once `cancel` fires; any error is fatal for this
/// controller and restart policy belongs to the host.
#[async_trait]
pub trait Controller: Send {
    fn name(&self) -> &'static str;

    fn inputs(&self) -> Vec<Input>;

    fn outputs(&self) -> Vec<Output>;

    async fn run(&mut self, rt: &mut dyn Runtime, cancel: CancellationToken)
    -> anyhow::Result<()>;
}
