#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub use route_validator_core as core;
pub use route_validator_k8s_api as k8s;

mod admission;
mod args;
mod config;
mod lookup;
mod metrics;
mod watch;

pub use self::{
    admission::Admission,
    args::Args,
    config::{ConfigError, ConfigStore, Fingerprint, Reload},
    lookup::{KubeNamespaces, LookupError, NamespaceLookup},
    metrics::{AdmissionMetrics, ReloadMetrics},
    watch::ConfigWatcher,
};
