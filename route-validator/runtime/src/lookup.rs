use crate::{core::NamespaceInfo, k8s::Namespace};
use kube::Api;
use thiserror::Error;
use tokio::time;

/// Resolves the namespace an object is admitted into.
#[async_trait::async_trait]
pub trait NamespaceLookup: Send + Sync + 'static {
    async fn get_namespace(&self, name: &str) -> Result<NamespaceInfo, LookupError>;
}

#[derive(Debug, Error)]
pub enum LookupError {
    #[error("namespace {0} not found")]
    NotFound(String),

    #[error("timed out getting namespace {0}")]
    Timeout(String),

    #[error("failed to get namespace {name}: {source}")]
    Api {
        name: String,
        #[source]
        source: kube::Error,
    },
}

/// Looks namespaces up from the Kubernetes API on every call.
#[derive(Clone)]
pub struct KubeNamespaces {
    api: Api<Namespace>,
    timeout: time::Duration,
}

// === impl KubeNamespaces ===

impl KubeNamespaces {
    pub fn new(client: kube::Client, timeout: time::Duration) -> Self {
        Self {
            api: Api::all(client),
            timeout,
        }
    }
}

#[async_trait::async_trait]
impl NamespaceLookup for KubeNamespaces {
    async fn get_namespace(&self, name: &str) -> Result<NamespaceInfo, LookupError> {
        let ns = match time::timeout(self.timeout, self.api.get_opt(name)).await {
            Ok(Ok(Some(ns))) => ns,
            Ok(Ok(None)) => return Err(LookupError::NotFound(name.to_string())),
            Ok(Err(source)) => {
                return Err(LookupError::Api {
                    name: name.to_string(),
                    source,
                })
            }
            Err(_) => return Err(LookupError::Timeout(name.to_string())),
        };

        Ok(NamespaceInfo {
            name: ns.metadata.name.unwrap_or_else(|| name.to_string()),
            labels: ns.metadata.labels.into(),
        })
    }
}
