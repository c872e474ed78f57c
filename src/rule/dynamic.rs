use std::collections::BTreeSet;
use std::collections::HashMap;

use super::StaticRule;
use crate::Attributes;
use crate::Pattern;
use crate::PatternError;

/// A condition template over key patterns.
///
/// Compiling against an observed key binds the template to concrete keys.
/// For compound rules it is enough that one nested rule matches the key
/// structurally: the bindings from that match are then used to bind every
/// nested rule, so all of them refer to the same attribute set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DynamicRule {
    EqualsLiteral { pattern: Pattern, value: Option<String> },
    Equals { patterns: Vec<Pattern> },
    And(Vec<DynamicRule>),
    Or(Vec<DynamicRule>),
    Not(Box<DynamicRule>),
}

impl DynamicRule {
    /// Key matching `pattern` holds `value`; `None` means the key is absent.
    pub fn equals_literal(
        pattern: &str,
        value: Option<&str>,
    ) -> Result<Self, PatternError> {
        Ok(DynamicRule::EqualsLiteral {
            pattern: Pattern::new(pattern)?,
            value: value.map(str::to_string),
        })
    }

    /// All keys are equally present and hold equal values.
    pub fn equals(patterns: &[&str]) -> Result<Self, PatternError> {
        if patterns.is_empty() {
            return Err(PatternError::Empty);
        }
        let patterns = patterns
            .iter()
            .map(|p| Pattern::new(p))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(DynamicRule::Equals { patterns })
    }

    pub fn and(rules: Vec<DynamicRule>) -> Self {
        DynamicRule::And(rules)
    }

    pub fn or(rules: Vec<DynamicRule>) -> Self {
        DynamicRule::Or(rules)
    }

    #[allow(clippy::should_implement_trait)]
    pub fn not(rule: DynamicRule) -> Self {
        DynamicRule::Not(Box::new(rule))
    }

    /// Every pattern this rule depends on, in declaration order.
    pub fn patterns(&self) -> Vec<&Pattern> {
        let mut out = Vec::new();
        self.collect_patterns(&mut out);
        out
    }

    fn collect_patterns<'a>(
        &'a self,
        out: &mut Vec<&'a Pattern>,
    ) {
        match self {
            DynamicRule::EqualsLiteral { pattern, .. } => out.push(pattern),
            DynamicRule::Equals { patterns } => out.extend(patterns.iter()),
            DynamicRule::And(rules) | DynamicRule::Or(rules) => rules.iter().for_each(|r| r.collect_patterns(out)),
            DynamicRule::Not(rule) => rule.collect_patterns(out),
        }
    }

    /// One prefix per pattern, in the same order as [`Self::patterns`].
    pub fn prefixes(&self) -> Vec<String> {
        self.patterns()
            .into_iter()
            .map(|p| p.prefix().to_string())
            .collect()
    }

    /// Variable names referenced by any pattern
    pub fn variables(&self) -> BTreeSet<String> {
        self.patterns()
            .into_iter()
            .flat_map(|p| p.variables().map(str::to_string).collect::<Vec<_>>())
            .collect()
    }

    /// Binds the rule to `key`. Returns `None` when no pattern of the rule
    /// matches the key structurally, or when the bindings from the match do
    /// not resolve every other pattern.
    pub fn make_static_rule(
        &self,
        key: &str,
    ) -> Option<(StaticRule, Attributes)> {
        match self {
            DynamicRule::EqualsLiteral { pattern, .. } => {
                let attributes = pattern.matches(key)?;
                let rule = self.static_rule_from_attributes(&attributes)?;
                Some((rule, attributes))
            }
            DynamicRule::Equals { patterns } => {
                patterns.iter().filter_map(|p| p.matches(key)).find_map(|attributes| {
                    let rule = self.static_rule_from_attributes(&attributes)?;
                    Some((rule, attributes))
                })
            }
            DynamicRule::And(rules) | DynamicRule::Or(rules) => rules.iter().find_map(|nested| {
                let (_, attributes) = nested.make_static_rule(key)?;
                let rule = self.static_rule_from_attributes(&attributes)?;
                Some((rule, attributes))
            }),
            DynamicRule::Not(nested) => {
                let (inner, attributes) = nested.make_static_rule(key)?;
                Some((StaticRule::Not(Box::new(inner)), attributes))
            }
        }
    }

    /// Binds the rule using already-known attributes. Every variable of
    /// every pattern must be bound.
    pub fn static_rule_from_attributes(
        &self,
        attributes: &Attributes,
    ) -> Option<StaticRule> {
        match self {
            DynamicRule::EqualsLiteral { pattern, value } => Some(StaticRule::EqualsLiteral {
                key: pattern.format_strict(attributes)?,
                value: value.clone(),
            }),
            DynamicRule::Equals { patterns } => {
                let keys = patterns
                    .iter()
                    .map(|p| p.format_strict(attributes))
                    .collect::<Option<Vec<_>>>()?;
                Some(StaticRule::Equals { keys })
            }
            DynamicRule::And(rules) => Some(StaticRule::And(Self::bind_all(rules, attributes)?)),
            DynamicRule::Or(rules) => Some(StaticRule::Or(Self::bind_all(rules, attributes)?)),
            DynamicRule::Not(rule) => Some(StaticRule::Not(Box::new(rule.static_rule_from_attributes(attributes)?))),
        }
    }

    fn bind_all(
        rules: &[DynamicRule],
        attributes: &Attributes,
    ) -> Option<Vec<StaticRule>> {
        rules
            .iter()
            .map(|r| r.static_rule_from_attributes(attributes))
            .collect()
    }

    /// Enumerates the concrete rules for every combination of candidate
    /// values. A referenced variable without candidates yields no rules.
    pub fn expand(
        &self,
        candidates: &HashMap<String, Vec<String>>,
    ) -> Vec<(StaticRule, Attributes)> {
        let mut combinations: Vec<Vec<(String, String)>> = vec![Vec::new()];
        for name in self.variables() {
            let values = candidates.get(&name).map(Vec::as_slice).unwrap_or_default();
            let name = &name;
            combinations = combinations
                .into_iter()
                .flat_map(|prefix| {
                    values.iter().map(move |v| {
                        let mut next = prefix.clone();
                        next.push((name.clone(), v.clone()));
                        next
                    })
                })
                .collect();
        }

        combinations
            .into_iter()
            .filter_map(|pairs| {
                let attributes = Attributes::new(pairs);
                let rule = self.static_rule_from_attributes(&attributes)?;
                Some((rule, attributes))
            })
            .collect()
    }
}
