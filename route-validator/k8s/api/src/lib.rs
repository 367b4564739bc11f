#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod labels;
pub mod route;

pub use self::{
    labels::{Labels, Selector, SelectorError},
    route::{Route, RouteSpec},
};
pub use k8s_openapi::{
    api::{
        core::v1::Namespace,
        networking::v1::{Ingress, IngressRule, IngressSpec},
    },
    apimachinery::pkg::apis::meta::v1::{LabelSelector, LabelSelectorRequirement, ObjectMeta},
};

/// The API group that serves `Ingress` resources.
pub const INGRESS_GROUP: &str = "networking.k8s.io";
