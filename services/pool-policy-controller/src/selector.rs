//! Node classification for pool rules.
//!
//! A rule's [`EnhancedNodeSelector`] is validated once, then evaluated
//! against every node of a full node listing. Filtering happens here rather
//! than in the list call so one listing serves every rule of a pass.

use std::collections::BTreeMap;

use fma_api::EnhancedNodeSelector;
use k8s_openapi::api::core::v1::Node;
use thiserror::Error;

/// Reasons a selector is rejected. All of them make the selector invalid.
#[derive(Debug, Error, PartialEq)]
pub enum SelectorError {
    #[error("label selector expression has an empty key")]
    EmptyKey,

    #[error("unsupported operator {operator:?} for key {key:?}")]
    UnknownOperator { key: String, operator: String },

    #[error("operator {operator} for key {key:?} requires at least one value")]
    ValuesRequired { key: String, operator: String },

    #[error("operator {operator} for key {key:?} does not take values")]
    ValuesNotAllowed { key: String, operator: String },

    #[error("invalid quantity {value:?} for resource {resource:?}")]
    InvalidQuantity { resource: String, value: String },

    #[error("empty range for resource {resource:?}: min is greater than max")]
    EmptyRange { resource: String },
}

#[derive(Debug)]
enum Requirement {
    In(String, Vec<String>),
    NotIn(String, Vec<String>),
    Exists(String),
    DoesNotExist(String),
}

impl Requirement {
    fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        match self {
            Self::In(key, values) => labels.get(key).is_some_and(|v| values.contains(v)),
            Self::NotIn(key, values) => labels.get(key).is_none_or(|v| !values.contains(v)),
            Self::Exists(key) => labels.contains_key(key),
            Self::DoesNotExist(key) => !labels.contains_key(key),
        }
    }
}

#[derive(Debug)]
struct Bounds {
    resource: String,
    min: Option<f64>,
    max: Option<f64>,
}

/// A validated selector, ready to evaluate against nodes.
#[derive(Debug)]
pub struct NodeClassifier {
    match_labels: BTreeMap<String, String>,
    requirements: Vec<Requirement>,
    bounds: Vec<Bounds>,
}

impl NodeClassifier {
    /// Validate a selector.
    pub fn compile(selector: &EnhancedNodeSelector) -> Result<Self, SelectorError> {
        let match_labels = selector
            .label_selector
            .match_labels
            .clone()
            .unwrap_or_default();
        if match_labels.keys().any(|k| k.is_empty()) {
            return Err(SelectorError::EmptyKey);
        }

        let mut requirements = Vec::new();
        for expr in selector
            .label_selector
            .match_expressions
            .iter()
            .flatten()
        {
            if expr.key.is_empty() {
                return Err(SelectorError::EmptyKey);
            }
            let key = expr.key.clone();
            let values = expr.values.clone().unwrap_or_default();
            let requirement = match expr.operator.as_str() {
                "In" | "NotIn" if values.is_empty() => {
                    return Err(SelectorError::ValuesRequired {
                        key,
                        operator: expr.operator.clone(),
                    })
                }
                "Exists" | "DoesNotExist" if !values.is_empty() => {
                    return Err(SelectorError::ValuesNotAllowed {
                        key,
                        operator: expr.operator.clone(),
                    })
                }
                "In" => Requirement::In(key, values),
                "NotIn" => Requirement::NotIn(key, values),
                "Exists" => Requirement::Exists(key),
                "DoesNotExist" => Requirement::DoesNotExist(key),
                other => {
                    return Err(SelectorError::UnknownOperator {
                        key,
                        operator: other.to_string(),
                    })
                }
            };
            requirements.push(requirement);
        }

        let mut bounds = Vec::new();
        for (resource, range) in &selector.allocatable_resources {
            let parse = |q: &Option<k8s_openapi::apimachinery::pkg::api::resource::Quantity>| {
                q.as_ref()
                    .map(|q| {
                        parse_quantity(&q.0).ok_or_else(|| SelectorError::InvalidQuantity {
                            resource: resource.clone(),
                            value: q.0.clone(),
                        })
                    })
                    .transpose()
            };
            let min = parse(&range.min)?;
            let max = parse(&range.max)?;
            if let (Some(lo), Some(hi)) = (min, max) {
                if lo > hi {
                    return Err(SelectorError::EmptyRange {
                        resource: resource.clone(),
                    });
                }
            }
            bounds.push(Bounds {
                resource: resource.clone(),
                min,
                max,
            });
        }

        Ok(Self {
            match_labels,
            requirements,
            bounds,
        })
    }

    /// Returns true if the node satisfies every label and resource constraint.
    pub fn matches(&self, node: &Node) -> bool {
        let empty = BTreeMap::new();
        let labels = node.metadata.labels.as_ref().unwrap_or(&empty);

        let labels_match = self
            .match_labels
            .iter()
            .all(|(k, v)| labels.get(k) == Some(v))
            && self.requirements.iter().all(|r| r.matches(labels));
        if !labels_match {
            return false;
        }

        if self.bounds.is_empty() {
            return true;
        }
        let Some(allocatable) = node.status.as_ref().and_then(|s| s.allocatable.as_ref()) else {
            return false;
        };
        self.bounds.iter().all(|b| {
            let Some(amount) = allocatable.get(&b.resource).and_then(|q| parse_quantity(&q.0))
            else {
                return false;
            };
            b.min.is_none_or(|lo| amount >= lo) && b.max.is_none_or(|hi| amount <= hi)
        })
    }
}

/// Nodes matching `selector`, in the order given.
pub fn filter_nodes<'a>(
    nodes: &'a [Node],
    selector: &EnhancedNodeSelector,
) -> Result<Vec<&'a Node>, SelectorError> {
    let classifier = NodeClassifier::compile(selector)?;
    Ok(nodes.iter().filter(|n| classifier.matches(n)).collect())
}

/// Parse a Kubernetes quantity string into a plain number.
///
/// Supports binary suffixes (`Ki`..`Ei`), decimal suffixes (`n`, `u`, `m`,
/// `k`, `M`, `G`, `T`, `P`, `E`) and exponent notation (`1e3`).
pub fn parse_quantity(raw: &str) -> Option<f64> {
    let s = raw.trim();
    let split = s
        .find(|c: char| !(c.is_ascii_digit() || c == '.' || c == '+' || c == '-'))
        .unwrap_or(s.len());
    let (number, suffix) = s.split_at(split);
    if !number.chars().any(|c| c.is_ascii_digit()) {
        return None;
    }
    let base: f64 = number.parse().ok()?;

    let multiplier = match suffix {
        "" => 1.0,
        "Ki" => 1024f64,
        "Mi" => 1024f64.powi(2),
        "Gi" => 1024f64.powi(3),
        "Ti" => 1024f64.powi(4),
        "Pi" => 1024f64.powi(5),
        "Ei" => 1024f64.powi(6),
        "n" => 1e-9,
        "u" => 1e-6,
        "m" => 1e-3,
        "k" => 1e3,
        "M" => 1e6,
        "G" => 1e9,
        "T" => 1e12,
        "P" => 1e15,
        "E" => 1e18,
        exp if exp.starts_with(['e', 'E']) => {
            let exponent: i32 = exp[1..].parse().ok()?;
            10f64.powi(exponent)
        }
        _ => return None,
    };
    Some(base * multiplier)
}
