use crate::{
    config::{normalize_domain, PolicyConfig},
    kind::{Kind, Target},
};
use route_validator_k8s_api::{Labels, SelectorError};
use thiserror::Error;

/// The operation an admission request performs.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Operation {
    Create,
    Update,
    Delete,
    Connect,
}

/// The namespace an object is admitted into.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct NamespaceInfo {
    pub name: String,
    pub labels: Labels,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Decision {
    Allow(Allowed),
    Deny(Violation),
}

/// Why an object was allowed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Allowed {
    /// The operation or kind is not governed by the policy.
    Ungated,
    /// The namespace does not match the configured selector.
    NamespaceNotSelected,
    /// The configured selector could not be compiled. The policy fails open
    /// so that a configuration mistake never blocks the whole cluster.
    InvalidSelector(SelectorError),
    NoDomainsConfigured,
    /// None of the object's hosts fall under a governed domain.
    NoMatchingDomain,
    /// Every host lives under the required domain.
    Valid { domain: String },
}

/// A host that does not live under its namespace's domain.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("{kind} {name} host {host} must be in the format *.{domain}")]
pub struct Violation {
    pub kind: Kind,
    pub name: String,
    pub host: String,
    pub domain: String,
}

// === impl Operation ===

impl Operation {
    /// Only creates and updates are subject to the policy.
    pub fn is_gated(self) -> bool {
        matches!(self, Self::Create | Self::Update)
    }
}

// === impl Decision ===

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allow(_))
    }
}

/// Decides whether `target` may be admitted into `namespace`.
///
/// This is a pure function of its inputs: evaluating the same object against
/// the same snapshot always yields the same decision.
pub fn evaluate(
    operation: Operation,
    target: &Target,
    namespace: &NamespaceInfo,
    config: &PolicyConfig,
) -> Decision {
    if !operation.is_gated() {
        return Decision::Allow(Allowed::Ungated);
    }

    let selector = match config.selector() {
        Ok(Some(selector)) => selector,
        Ok(None) => return Decision::Allow(Allowed::NamespaceNotSelected),
        Err(error) => return Decision::Allow(Allowed::InvalidSelector(error)),
    };
    if !selector.matches(&namespace.labels) {
        return Decision::Allow(Allowed::NamespaceNotSelected);
    }

    let domains = config.domains();
    if domains.is_empty() {
        return Decision::Allow(Allowed::NoDomainsConfigured);
    }

    let matched = match longest_match(target.hostnames.iter().map(String::as_str), &domains) {
        Some(matched) => matched,
        None => return Decision::Allow(Allowed::NoMatchingDomain),
    };

    let subdomain = config
        .subdomain_key()
        .and_then(|key| namespace.labels.as_ref().get(key))
        .unwrap_or(&namespace.name);
    // `matched` carries its leading dot.
    let domain = format!("{subdomain}{matched}");

    for host in &target.hostnames {
        if !is_within(host, &domain) {
            return Decision::Deny(Violation {
                kind: target.kind,
                name: target.name.clone(),
                host: host.clone(),
                domain,
            });
        }
    }

    Decision::Allow(Allowed::Valid { domain })
}

/// Returns the longest of `domains` that is a suffix of `host`, normalized to
/// carry a leading `.`.
pub fn match_host_to_domain(host: &str, domains: &[String]) -> Option<String> {
    let domains = domains
        .iter()
        .filter_map(|d| normalize_domain(d))
        .collect::<Vec<_>>();
    longest_match(std::iter::once(host), &domains)
}

/// Finds the longest normalized domain that is a suffix of any host. Ties go
/// to the domain configured first.
fn longest_match<'h>(
    hosts: impl Iterator<Item = &'h str> + Clone,
    domains: &[String],
) -> Option<String> {
    let mut best: Option<&String> = None;
    for domain in domains {
        if best.map(|b| domain.len() <= b.len()).unwrap_or(false) {
            continue;
        }
        if hosts.clone().any(|host| host.ends_with(domain.as_str())) {
            best = Some(domain);
        }
    }
    best.cloned()
}

fn is_within(host: &str, domain: &str) -> bool {
    host == domain
        || host
            .strip_suffix(domain)
            .map(|prefix| prefix.ends_with('.'))
            .unwrap_or(false)
}
