// src/ingest/filters.rs
//! Name-based exclusion rules. Rules are evaluated in declaration order,
//! case-insensitively, and the first match wins.

use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::ingest::error::ConfigError;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FilterRule {
    pub id: String,
    #[serde(default)]
    pub description: String,
    /// Regular expression matched against the record name.
    pub pattern: String,
    #[serde(default)]
    pub reason: String,
}

#[derive(Debug, Clone)]
struct CompiledRule {
    rule: FilterRule,
    re: Regex,
}

/// Compiled, ordered rule list.
#[derive(Debug, Clone, Default)]
pub struct FilterSet {
    rules: Vec<CompiledRule>,
}

/// Aggregate view of how a set of names fares against the rules.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FilterStatistics {
    pub total: usize,
    pub filtered: usize,
    pub passed: usize,
    pub filter_breakdown: BTreeMap<String, usize>,
}

impl FilterSet {
    pub fn compile(rules: &[FilterRule]) -> Result<Self, ConfigError> {
        let mut compiled = Vec::with_capacity(rules.len());
        for rule in rules {
            let re = RegexBuilder::new(&rule.pattern)
                .case_insensitive(true)
                .build()
                .map_err(|e| ConfigError::FilterPattern {
                    id: rule.id.clone(),
                    reason: e.to_string(),
                })?;
            compiled.push(CompiledRule {
                rule: rule.clone(),
                re,
            });
        }
        Ok(Self { rules: compiled })
    }

    /// First rule whose pattern matches `name`, if any.
    pub fn matching_rule(&self, name: &str) -> Option<&FilterRule> {
        self.rules
            .iter()
            .find(|c| c.re.is_match(name))
            .map(|c| &c.rule)
    }

    pub fn should_filter(&self, name: &str) -> bool {
        self.matching_rule(name).is_some()
    }

    pub fn statistics<'a, I>(&self, names: I) -> FilterStatistics
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut stats = FilterStatistics::default();
        for name in names {
            stats.total += 1;
            match self.matching_rule(name) {
                Some(rule) => {
                    stats.filtered += 1;
                    *stats.filter_breakdown.entry(rule.id.clone()).or_insert(0) += 1;
                }
                None => stats.passed += 1,
            }
        }
        stats
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}
