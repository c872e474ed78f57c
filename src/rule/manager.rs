use std::collections::HashMap;
use std::collections::HashSet;

use tracing::debug;

use super::DynamicRule;
use super::RuleOptions;
use super::StaticRule;
use crate::pattern::segment_count;
use crate::Attributes;

/// A retained watch/crawl prefix with the merged metadata of every rule
/// that contributed to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrefixInfo {
    pub prefix: String,
    pub priority: u32,
    /// Only crawled, never watched. True only if every contributing rule is
    /// crawler-only.
    pub crawler_only: bool,
}

/// A dynamic rule compiled against an observed key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchedRule {
    pub index: usize,
    pub rule: StaticRule,
    pub attributes: Attributes,
}

/// Registry of dynamic rules.
///
/// Rules are bucketed by the segment count of each of their patterns, so a
/// key is only compiled against rules that could possibly match its shape.
#[derive(Debug, Default)]
pub struct RuleManager {
    rules: Vec<DynamicRule>,
    by_segments: HashMap<usize, Vec<usize>>,
    prefixes: Vec<PrefixInfo>,
}

impl RuleManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a rule and returns its index.
    pub fn add_rule(
        &mut self,
        rule: DynamicRule,
        options: &RuleOptions,
    ) -> usize {
        let index = self.rules.len();

        let mut buckets = HashSet::new();
        for pattern in rule.patterns() {
            if buckets.insert(pattern.segment_count()) {
                self.by_segments.entry(pattern.segment_count()).or_default().push(index);
            }
        }

        let added = rule.prefixes().into_iter().map(|prefix| PrefixInfo {
            prefix,
            priority: options.priority,
            crawler_only: options.crawler_only,
        });
        self.prefixes = reduce_prefixes(std::mem::take(&mut self.prefixes).into_iter().chain(added));

        debug!(index, buckets = ?buckets, prefixes = self.prefixes.len(), "rule added");
        self.rules.push(rule);
        index
    }

    pub fn rule(
        &self,
        index: usize,
    ) -> Option<&DynamicRule> {
        self.rules.get(index)
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Compiles every rule whose shape fits `key` and keeps the ones that
    /// are locally satisfiable for `value`.
    pub fn get_static_rules(
        &self,
        key: &str,
        value: Option<&str>,
    ) -> Vec<MatchedRule> {
        let Some(bucket) = self.by_segments.get(&segment_count(key)) else {
            return Vec::new();
        };
        bucket
            .iter()
            .filter_map(|&index| {
                let (rule, attributes) = self.rules[index].make_static_rule(key)?;
                rule.satisfiable(key, value).then_some(MatchedRule {
                    index,
                    rule,
                    attributes,
                })
            })
            .collect()
    }

    /// Retained prefixes, sorted by prefix.
    pub fn prefixes(&self) -> &[PrefixInfo] {
        &self.prefixes
    }

    /// Retained prefixes ordered by descending priority, then by prefix.
    pub fn get_prioritized_prefixes(&self) -> Vec<PrefixInfo> {
        let mut out = self.prefixes.clone();
        out.sort_by(|a, b| b.priority.cmp(&a.priority).then_with(|| a.prefix.cmp(&b.prefix)));
        out
    }

    /// Prioritized prefixes that need a watch subscription.
    pub fn watch_prefixes(&self) -> Vec<PrefixInfo> {
        self.get_prioritized_prefixes()
            .into_iter()
            .filter(|p| !p.crawler_only)
            .collect()
    }
}

/// Reduces prefixes to the minimal covering set.
///
/// A prefix covered by a shorter retained prefix is merged into it: the
/// priority is the max of both and `crawler_only` the AND of both. The
/// output is sorted by prefix and never holds two entries where one is a
/// string prefix of the other.
pub fn reduce_prefixes<I>(entries: I) -> Vec<PrefixInfo>
where
    I: IntoIterator<Item = PrefixInfo>,
{
    let mut sorted: Vec<PrefixInfo> = entries.into_iter().collect();
    sorted.sort_by(|a, b| a.prefix.len().cmp(&b.prefix.len()).then_with(|| a.prefix.cmp(&b.prefix)));

    let mut retained: Vec<PrefixInfo> = Vec::with_capacity(sorted.len());
    for entry in sorted {
        match retained.iter_mut().find(|r| entry.prefix.starts_with(&r.prefix)) {
            Some(cover) => {
                cover.priority = cover.priority.max(entry.priority);
                cover.crawler_only = cover.crawler_only && entry.crawler_only;
            }
            None => retained.push(entry),
        }
    }
    retained.sort_by(|a, b| a.prefix.cmp(&b.prefix));
    retained
}
