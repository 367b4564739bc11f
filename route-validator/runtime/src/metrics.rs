use crate::core::Kind;
use prometheus_client::{
    encoding::EncodeLabelSet,
    metrics::{counter::Counter, family::Family},
    registry::Registry,
};

/// Counts admission decisions.
#[derive(Clone, Debug, Default)]
pub struct AdmissionMetrics {
    requests: Family<RequestLabels, Counter>,
}

/// Counts config reload attempts by outcome.
#[derive(Clone, Debug, Default)]
pub struct ReloadMetrics {
    reloads: Family<ReloadLabels, Counter>,
}

#[derive(Clone, Hash, PartialEq, Eq, EncodeLabelSet, Debug)]
struct RequestLabels {
    kind: &'static str,
    decision: &'static str,
}

#[derive(Clone, Hash, PartialEq, Eq, EncodeLabelSet, Debug)]
struct ReloadLabels {
    result: &'static str,
}

// === impl AdmissionMetrics ===

impl AdmissionMetrics {
    pub fn register(reg: &mut Registry) -> Self {
        let requests = Family::<RequestLabels, Counter>::default();
        reg.register(
            "admission_requests",
            "Total number of admission reviews by resource kind and decision",
            requests.clone(),
        );
        Self { requests }
    }

    /// Records a decision. `kind` is `None` for resources the policy does not
    /// govern.
    pub(crate) fn record(&self, kind: Option<Kind>, allowed: bool) {
        let labels = RequestLabels {
            kind: kind.map(Kind::as_str).unwrap_or("other"),
            decision: if allowed { "allow" } else { "deny" },
        };
        self.requests.get_or_create(&labels).inc();
    }

    #[cfg(test)]
    pub(crate) fn count(&self, kind: &'static str, decision: &'static str) -> u64 {
        self.requests
            .get_or_create(&RequestLabels { kind, decision })
            .get()
    }
}

// === impl ReloadMetrics ===

impl ReloadMetrics {
    pub fn register(reg: &mut Registry) -> Self {
        let reloads = Family::<ReloadLabels, Counter>::default();
        reg.register(
            "config_reloads",
            "Total number of policy config reloads by result",
            reloads.clone(),
        );
        Self { reloads }
    }

    pub(crate) fn updated(&self) {
        self.inc("updated");
    }

    pub(crate) fn unchanged(&self) {
        self.inc("unchanged");
    }

    pub(crate) fn failed(&self) {
        self.inc("failed");
    }

    fn inc(&self, result: &'static str) {
        self.reloads.get_or_create(&ReloadLabels { result }).inc();
    }

    #[cfg(test)]
    pub(crate) fn count(&self, result: &'static str) -> u64 {
        self.reloads.get_or_create(&ReloadLabels { result }).get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prometheus_client::encoding::text::encode;

    #[test]
    fn encodes_counters() {
        let mut prom = Registry::default();
        let reg = prom.sub_registry_with_prefix("route_validator");
        let admission = AdmissionMetrics::register(reg);
        let reloads = ReloadMetrics::register(reg);

        admission.record(Some(Kind::Ingress), false);
        admission.record(None, true);
        reloads.updated();

        let mut text = String::new();
        encode(&mut text, &prom).expect("metrics must encode");
        assert!(text.contains(
            r#"route_validator_admission_requests_total{kind="Ingress",decision="deny"} 1"#
        ));
        assert!(text.contains(
            r#"route_validator_admission_requests_total{kind="other",decision="allow"} 1"#
        ));
        assert!(text.contains(r#"route_validator_config_reloads_total{result="updated"} 1"#));
    }
}
