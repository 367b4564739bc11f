use route_validator_k8s_api::{LabelSelector, Selector, SelectorError};
use serde::{Deserialize, Serialize};

/// A snapshot of the hostname policy.
///
/// Snapshots are never mutated once built; a reload produces a new value.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyConfig {
    /// Selects the namespaces the policy applies to. When unset, the policy
    /// applies to no namespace.
    ///
    /// The selector is kept as written so that a typo in it does not prevent
    /// the rest of the file from loading.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace_selector: Option<LabelSelector>,

    /// A namespace label whose value replaces the namespace name as the
    /// required subdomain.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subdomain_label: Option<String>,

    /// Governed domain suffixes, e.g. `example.com`.
    #[serde(default)]
    pub match_domains: Vec<String>,
}

impl PolicyConfig {
    /// Compiles the namespace selector, if one is configured.
    pub fn selector(&self) -> Result<Option<Selector>, SelectorError> {
        self.namespace_selector
            .as_ref()
            .map(Selector::try_from)
            .transpose()
    }

    /// The configured subdomain label key. An empty key is treated as unset.
    pub fn subdomain_key(&self) -> Option<&str> {
        self.subdomain_label.as_deref().filter(|k| !k.is_empty())
    }

    /// The governed domains, each with a leading `.`.
    ///
    /// Blank entries are skipped.
    pub fn domains(&self) -> Vec<String> {
        self.match_domains
            .iter()
            .filter_map(|d| normalize_domain(d))
            .collect()
    }
}

pub(crate) fn normalize_domain(domain: &str) -> Option<String> {
    let domain = domain.trim();
    if domain.is_empty() || domain == "." {
        return None;
    }
    if domain.starts_with('.') {
        Some(domain.to_string())
    } else {
        Some(format!(".{domain}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_domains() {
        let config = PolicyConfig {
            match_domains: vec![
                "example.com".to_string(),
                ".prod.example.com".to_string(),
                " ".to_string(),
                " apps.example.org ".to_string(),
            ],
            ..Default::default()
        };
        assert_eq!(
            config.domains(),
            vec![".example.com", ".prod.example.com", ".apps.example.org"]
        );
    }

    #[test]
    fn empty_subdomain_label_is_unset() {
        let config = PolicyConfig {
            subdomain_label: Some(String::new()),
            ..Default::default()
        };
        assert_eq!(config.subdomain_key(), None);

        let config = PolicyConfig {
            subdomain_label: Some("env".to_string()),
            ..Default::default()
        };
        assert_eq!(config.subdomain_key(), Some("env"));
    }

    #[test]
    fn missing_selector_compiles_to_none() {
        assert_eq!(PolicyConfig::default().selector(), Ok(None));
        let config = PolicyConfig {
            namespace_selector: Some(LabelSelector::default()),
            ..Default::default()
        };
        assert_eq!(config.selector(), Ok(Some(Selector::default())));
    }
}
