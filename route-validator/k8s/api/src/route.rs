//! The OpenShift `Route` resource.
//!
//! `k8s-openapi` only models upstream Kubernetes types, so the fields of
//! `route.openshift.io/v1` that the validator reads are declared here.

use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use serde::{Deserialize, Serialize};

/// The API group that serves `Route` resources.
pub const GROUP: &str = "route.openshift.io";

/// Exposes a service at a single externally-reachable host name.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
pub struct Route {
    #[serde(default)]
    pub metadata: ObjectMeta,
    pub spec: RouteSpec,
}

/// Only the host is modeled. Other fields are ignored when decoding, so a
/// Route is never rejected over fields the policy does not read.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteSpec {
    /// An alias/DNS name that points to the service. When unset, the router
    /// generates one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
}
