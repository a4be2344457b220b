use serde::{Deserialize, Serialize, de::DeserializeOwned};
use std::fmt;

/// A typed resource spec stored under a fixed namespace and type.
pub trait ResourceSpec:
    Serialize + DeserializeOwned + Clone + Default + Send + Sync + 'static
{
    const NAMESPACE: &'static str;
    const TYPE: &'static str;
}

/// Identifies a single resource regardless of its version.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Pointer {
    pub namespace: String,
    #[serde(rename = "type")]
    pub resource_type: String,
    pub id: String,
}

impl Pointer {
    pub fn new(namespace: &str, resource_type: &str, id: &str) -> Self {
        Pointer {
            namespace: namespace.to_string(),
            resource_type: resource_type.to_string(),
            id: id.to_string(),
        }
    }

    /// Pointer to the resource `id` of spec type `S`.
    pub fn of<S: ResourceSpec>(id: &str) -> Self {
        Pointer::new(S::NAMESPACE, S::TYPE, id)
    }
}

impl fmt::Display for Pointer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.namespace, self.resource_type, self.id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    #[serde(flatten)]
    pub pointer: Pointer,
    /// Starts at 1 on create, bumped on every write.
    pub version: u64,
    /// Controller that exclusively writes this resource, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource<S> {
    pub metadata: Metadata,
    pub spec: S,
}
