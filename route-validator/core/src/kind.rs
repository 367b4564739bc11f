use route_validator_k8s_api::{route, Ingress, Route, INGRESS_GROUP};
use std::fmt;

/// The resource kinds subject to the hostname policy.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Kind {
    Ingress,
    Route,
}

/// Describes how the policy reads one kind of resource.
///
/// The decision logic only ever sees a [`Target`]; everything it needs to know
/// about a concrete resource type lives here.
#[derive(Debug)]
pub struct KindAdapter {
    pub kind: Kind,
    pub group: &'static str,
    pub name: &'static str,
    hostnames: fn(serde_json::Value) -> serde_json::Result<Vec<String>>,
}

/// A decoded object, reduced to what the policy needs.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Target {
    pub kind: Kind,
    pub name: String,
    pub hostnames: Vec<String>,
}

static INGRESS: KindAdapter = KindAdapter {
    kind: Kind::Ingress,
    group: INGRESS_GROUP,
    name: "Ingress",
    hostnames: ingress_hostnames,
};

static ROUTE: KindAdapter = KindAdapter {
    kind: Kind::Route,
    group: route::GROUP,
    name: "Route",
    hostnames: route_hostnames,
};

static ADAPTERS: [&KindAdapter; 2] = [&INGRESS, &ROUTE];

// === impl Kind ===

impl Kind {
    /// Resolves the kind named by an admission request, if it is governed.
    pub fn from_group_kind(group: &str, kind: &str) -> Option<Self> {
        ADAPTERS
            .iter()
            .find(|a| a.group.eq_ignore_ascii_case(group) && a.name.eq_ignore_ascii_case(kind))
            .map(|a| a.kind)
    }

    pub fn adapter(self) -> &'static KindAdapter {
        match self {
            Self::Ingress => &INGRESS,
            Self::Route => &ROUTE,
        }
    }

    pub fn as_str(self) -> &'static str {
        self.adapter().name
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// === impl KindAdapter ===

impl KindAdapter {
    /// Decodes a raw object of this kind into a [`Target`].
    pub fn decode(&self, name: String, object: serde_json::Value) -> serde_json::Result<Target> {
        let hostnames = (self.hostnames)(object)?;
        Ok(Target {
            kind: self.kind,
            name,
            hostnames,
        })
    }
}

/// Each ingress rule contributes its host. A rule without a host matches all
/// hosts, so it is reported as an empty hostname rather than dropped.
fn ingress_hostnames(object: serde_json::Value) -> serde_json::Result<Vec<String>> {
    let ingress = serde_json::from_value::<Ingress>(object)?;
    Ok(ingress
        .spec
        .and_then(|spec| spec.rules)
        .into_iter()
        .flatten()
        .map(|rule| rule.host.unwrap_or_default())
        .collect())
}

fn route_hostnames(object: serde_json::Value) -> serde_json::Result<Vec<String>> {
    let route = serde_json::from_value::<Route>(object)?;
    Ok(vec![route.spec.host.unwrap_or_default()])
}
