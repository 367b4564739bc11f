#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

//! Hostname policy for ingress-like resources.
//!
//! A [`PolicyConfig`] scopes the policy to namespaces matching a label
//! selector and to a set of governed domains. Within that scope, every host
//! of an admitted object must live under `<subdomain>.<domain>`, where the
//! subdomain is the namespace's name (or the value of a configured label).

pub mod config;
pub mod engine;
pub mod kind;

pub use self::{
    config::PolicyConfig,
    engine::{
        evaluate, match_host_to_domain, Allowed, Decision, NamespaceInfo, Operation, Violation,
    },
    kind::{Kind, KindAdapter, Target},
};
pub use route_validator_k8s_api::{Labels, SelectorError};
