use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, LabelSelectorRequirement};
use once_cell::sync::Lazy;
use regex::Regex;
use std::{
    collections::{BTreeMap, BTreeSet},
    fmt,
    sync::Arc,
};
use thiserror::Error;

#[derive(Clone, Debug, Eq, Default)]
pub struct Labels(Arc<Map>);

pub type Map = BTreeMap<String, String>;

pub type Expressions = Vec<Expression>;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Expression {
    key: String,
    operator: Operator,
    values: BTreeSet<String>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Operator {
    In,
    NotIn,
    Exists,
    DoesNotExist,
}

/// A compiled label selector.
///
/// Selectors are built from the Kubernetes `LabelSelector` shape, which
/// carries operators and keys as free-form strings, so compilation is
/// fallible.
#[derive(Clone, Debug, Eq, PartialEq, Default)]
pub struct Selector {
    match_labels: Map,
    match_expressions: Expressions,
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum SelectorError {
    #[error("invalid label key {key:?}: {reason}")]
    InvalidKey { key: String, reason: &'static str },

    #[error("invalid label value {value:?} for key {key:?}")]
    InvalidValue { key: String, value: String },

    #[error("{operator:?} is not a valid label selector operator for key {key:?}")]
    UnknownOperator { key: String, operator: String },

    #[error("values must be set for operator {operator} on key {key:?}")]
    ValuesRequired { key: String, operator: Operator },

    #[error("values must be empty for operator {operator} on key {key:?}")]
    ValuesForbidden { key: String, operator: Operator },
}

const MAX_NAME_LEN: usize = 63;
const MAX_PREFIX_LEN: usize = 253;

static NAME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^([A-Za-z0-9][-A-Za-z0-9_.]*)?[A-Za-z0-9]$").expect("label name regex must compile")
});

static DNS_SUBDOMAIN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[a-z0-9]([-a-z0-9]*[a-z0-9])?(\.[a-z0-9]([-a-z0-9]*[a-z0-9])?)*$")
        .expect("dns subdomain regex must compile")
});

// === Selector ===

impl Selector {
    pub fn from_expressions(exprs: Expressions) -> Self {
        Self {
            match_labels: Map::default(),
            match_expressions: exprs,
        }
    }

    pub fn from_map(map: Map) -> Self {
        Self {
            match_labels: map,
            match_expressions: Expressions::default(),
        }
    }

    /// Returns true if every expression and every required label holds for
    /// `labels`. An empty selector matches everything.
    pub fn matches(&self, labels: &Labels) -> bool {
        for expr in self.match_expressions.iter() {
            if !expr.matches(labels.as_ref()) {
                return false;
            }
        }

        for (k, v) in self.match_labels.iter() {
            if labels.0.get(k) != Some(v) {
                return false;
            }
        }

        true
    }
}

impl TryFrom<&LabelSelector> for Selector {
    type Error = SelectorError;

    fn try_from(selector: &LabelSelector) -> Result<Self, Self::Error> {
        let mut match_labels = Map::default();
        for (k, v) in selector.match_labels.iter().flatten() {
            validate_key(k)?;
            validate_value(k, v)?;
            match_labels.insert(k.clone(), v.clone());
        }

        let match_expressions = selector
            .match_expressions
            .iter()
            .flatten()
            .map(Expression::try_from)
            .collect::<Result<Expressions, _>>()?;

        Ok(Self {
            match_labels,
            match_expressions,
        })
    }
}

impl std::iter::FromIterator<(String, String)> for Selector {
    fn from_iter<T: IntoIterator<Item = (String, String)>>(iter: T) -> Self {
        Self::from_map(iter.into_iter().collect())
    }
}

impl std::iter::FromIterator<(&'static str, &'static str)> for Selector {
    fn from_iter<T: IntoIterator<Item = (&'static str, &'static str)>>(iter: T) -> Self {
        Self::from_map(
            iter.into_iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        )
    }
}

impl std::iter::FromIterator<Expression> for Selector {
    fn from_iter<T: IntoIterator<Item = Expression>>(iter: T) -> Self {
        Self::from_expressions(iter.into_iter().collect())
    }
}

// === Labels ===

impl From<Map> for Labels {
    #[inline]
    fn from(labels: Map) -> Self {
        Self(Arc::new(labels))
    }
}

impl From<Option<Map>> for Labels {
    #[inline]
    fn from(labels: Option<Map>) -> Self {
        labels.unwrap_or_default().into()
    }
}

impl AsRef<Map> for Labels {
    #[inline]
    fn as_ref(&self) -> &Map {
        self.0.as_ref()
    }
}

impl<T: AsRef<Map>> std::cmp::PartialEq<T> for Labels {
    #[inline]
    fn eq(&self, t: &T) -> bool {
        self.0.as_ref().eq(t.as_ref())
    }
}

impl std::iter::FromIterator<(String, String)> for Labels {
    fn from_iter<T: IntoIterator<Item = (String, String)>>(iter: T) -> Self {
        Self(Arc::new(iter.into_iter().collect()))
    }
}

impl std::iter::FromIterator<(&'static str, &'static str)> for Labels {
    fn from_iter<T: IntoIterator<Item = (&'static str, &'static str)>>(iter: T) -> Self {
        iter.into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }
}

// === Expression ===

impl Expression {
    pub fn new(
        key: impl Into<String>,
        operator: Operator,
        values: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self {
            key: key.into(),
            operator,
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    fn matches(&self, labels: &Map) -> bool {
        match self.operator {
            Operator::In => labels
                .get(&self.key)
                .map(|v| self.values.contains(v))
                .unwrap_or(false),
            Operator::NotIn => labels
                .get(&self.key)
                .map(|v| !self.values.contains(v))
                .unwrap_or(true),
            Operator::Exists => labels.contains_key(&self.key),
            Operator::DoesNotExist => !labels.contains_key(&self.key),
        }
    }
}

impl TryFrom<&LabelSelectorRequirement> for Expression {
    type Error = SelectorError;

    fn try_from(req: &LabelSelectorRequirement) -> Result<Self, Self::Error> {
        let key = &req.key;
        validate_key(key)?;

        let operator = req.operator.parse::<Operator>().map_err(|_| {
            SelectorError::UnknownOperator {
                key: key.clone(),
                operator: req.operator.clone(),
            }
        })?;

        let values = req.values.as_deref().unwrap_or_default();
        match operator {
            Operator::In | Operator::NotIn if values.is_empty() => {
                return Err(SelectorError::ValuesRequired {
                    key: key.clone(),
                    operator,
                });
            }
            Operator::Exists | Operator::DoesNotExist if !values.is_empty() => {
                return Err(SelectorError::ValuesForbidden {
                    key: key.clone(),
                    operator,
                });
            }
            _ => {}
        }
        for v in values {
            validate_value(key, v)?;
        }

        Ok(Self {
            key: key.clone(),
            operator,
            values: values.iter().cloned().collect(),
        })
    }
}

// === Operator ===

impl std::str::FromStr for Operator {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "In" => Ok(Self::In),
            "NotIn" => Ok(Self::NotIn),
            "Exists" => Ok(Self::Exists),
            "DoesNotExist" => Ok(Self::DoesNotExist),
            _ => Err(()),
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::In => "In",
            Self::NotIn => "NotIn",
            Self::Exists => "Exists",
            Self::DoesNotExist => "DoesNotExist",
        })
    }
}

// === validation ===

/// Checks that `key` is a qualified name: an optional DNS subdomain prefix
/// followed by `/` and a name segment.
fn validate_key(key: &str) -> Result<(), SelectorError> {
    let invalid = |reason| SelectorError::InvalidKey {
        key: key.to_string(),
        reason,
    };

    let name = match key.split_once('/') {
        Some((prefix, name)) => {
            if prefix.is_empty() {
                return Err(invalid("prefix part must be non-empty"));
            }
            if prefix.len() > MAX_PREFIX_LEN {
                return Err(invalid("prefix part must be no more than 253 characters"));
            }
            if !DNS_SUBDOMAIN.is_match(prefix) {
                return Err(invalid("prefix part must be a lowercase DNS subdomain"));
            }
            name
        }
        None => key,
    };

    if name.is_empty() {
        return Err(invalid("name part must be non-empty"));
    }
    if name.len() > MAX_NAME_LEN {
        return Err(invalid("name part must be no more than 63 characters"));
    }
    if !NAME.is_match(name) {
        return Err(invalid(
            "name part must consist of alphanumerics, '-', '_' or '.', and must start and end with an alphanumeric",
        ));
    }
    Ok(())
}

fn validate_value(key: &str, value: &str) -> Result<(), SelectorError> {
    if value.is_empty() || (value.len() <= MAX_NAME_LEN && NAME.is_match(value)) {
        return Ok(());
    }
    Err(SelectorError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
    })
}
