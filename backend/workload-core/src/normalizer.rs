// src/normalizer.rs
use std::collections::HashSet;
use tracing::debug;

use crate::config::PipelineConfig;

// --- Canonical categories ---

pub const TIME_OFF: &str = "Time off";
pub const PROJECTS: &str = "Projects";
pub const INTERNAL_BILLABLE: &str = "Internal Billable";

/// The category rewrite rules, in the order they are applied.
/// A later rule may overwrite the result of an earlier one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CategoryRule {
    StripNamespace,
    CollapseTimeOff,
    CollapseRateCodes,
    InternalBillingOverride,
}

pub const RULE_ORDER: [CategoryRule; 4] = [
    CategoryRule::StripNamespace,
    CategoryRule::CollapseTimeOff,
    CategoryRule::CollapseRateCodes,
    CategoryRule::InternalBillingOverride,
];

/// Category rules bound to one deployment's prefixes and rate-code list.
#[derive(Debug, Clone)]
pub struct CategoryRules {
    namespace_prefix: String,
    time_off_prefix: String,
    rate_codes: HashSet<String>,
    internal_billing_prefix: String,
}

impl CategoryRules {
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self {
            namespace_prefix: config.internal_namespace_prefix.clone(),
            time_off_prefix: config.time_off_prefix.clone(),
            rate_codes: config.project_rate_codes.iter().cloned().collect(),
            internal_billing_prefix: config.internal_billing_prefix.clone(),
        }
    }

    /// Rewrites a raw "Product/Service" value into its canonical category.
    pub fn apply(&self, category: &str, client: &str) -> String {
        let mut current = category.trim().to_string();
        for rule in RULE_ORDER {
            let next = self.apply_rule(rule, &current, client);
            if next != current {
                debug!("Rule {:?} rewrote category '{}' -> '{}'", rule, current, next);
                current = next;
            }
        }
        current
    }

    fn apply_rule(&self, rule: CategoryRule, category: &str, client: &str) -> String {
        match rule {
            CategoryRule::StripNamespace => {
                let mut stripped = category;
                // Repeated so a value that is already stripped stays unchanged.
                while !self.namespace_prefix.is_empty() {
                    match stripped.strip_prefix(self.namespace_prefix.as_str()) {
                        Some(rest) => stripped = rest.trim(),
                        None => break,
                    }
                }
                stripped.to_string()
            }
            CategoryRule::CollapseTimeOff => {
                if !self.time_off_prefix.is_empty() && category.starts_with(&self.time_off_prefix) {
                    TIME_OFF.to_string()
                } else {
                    category.to_string()
                }
            }
            CategoryRule::CollapseRateCodes => {
                if self.rate_codes.contains(category) {
                    PROJECTS.to_string()
                } else {
                    category.to_string()
                }
            }
            CategoryRule::InternalBillingOverride => {
                if !self.internal_billing_prefix.is_empty()
                    && client.trim_start().starts_with(&self.internal_billing_prefix)
                {
                    INTERNAL_BILLABLE.to_string()
                } else {
                    category.to_string()
                }
            }
        }
    }
}
