// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

//! Render a workload's label selector as an API query string

use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;

use crate::error::{Result, WatchError};

/// A label selector in `key=value,key in (a,b)` form
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelSelectorQuery(String);

impl LabelSelectorQuery {
    /// Build the query from a structured selector
    ///
    /// An empty selector is rejected: it would match every pod in the namespace.
    pub fn from_selector(selector: &LabelSelector) -> Result<Self> {
        let mut parts = Vec::new();

        if let Some(labels) = &selector.match_labels {
            // BTreeMap iteration keeps the output stable
            parts.extend(labels.iter().map(|(k, v)| format!("{}={}", k, v)));
        }

        for expr in selector.match_expressions.iter().flatten() {
            let values = expr.values.clone().unwrap_or_default();
            let part = match expr.operator.as_str() {
                "In" => format!("{} in ({})", expr.key, values.join(",")),
                "NotIn" => format!("{} notin ({})", expr.key, values.join(",")),
                "Exists" => expr.key.clone(),
                "DoesNotExist" => format!("!{}", expr.key),
                other => {
                    return Err(WatchError::InvalidSelector(format!(
                        "unsupported operator '{}' for key '{}'",
                        other, expr.key
                    )));
                }
            };
            parts.push(part);
        }

        if parts.is_empty() {
            return Err(WatchError::InvalidSelector("selector is empty".to_string()));
        }

        Ok(Self(parts.join(",")))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for LabelSelectorQuery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}
