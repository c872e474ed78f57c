use std::fmt;

use futures::future::BoxFuture;
use futures::FutureExt;

use crate::ReadApi;
use crate::StoreError;

/// A rule bound to concrete keys.
///
/// `satisfiable` is the cheap local pre-check against the triggering
/// key/value only; `satisfied` is the authoritative check which may read
/// further keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum StaticRule {
    /// Key holds exactly `value`; `None` means the key is absent
    EqualsLiteral { key: String, value: Option<String> },
    /// All keys are equally present and hold equal values
    Equals { keys: Vec<String> },
    And(Vec<StaticRule>),
    Or(Vec<StaticRule>),
    Not(Box<StaticRule>),
}

impl StaticRule {
    /// Concrete keys this rule reads, in declaration order.
    pub fn keys(&self) -> Vec<&str> {
        let mut keys = Vec::new();
        self.collect_keys(&mut keys);
        keys
    }

    fn collect_keys<'a>(
        &'a self,
        out: &mut Vec<&'a str>,
    ) {
        match self {
            StaticRule::EqualsLiteral { key, .. } => out.push(key),
            StaticRule::Equals { keys } => out.extend(keys.iter().map(String::as_str)),
            StaticRule::And(rules) | StaticRule::Or(rules) => rules.iter().for_each(|r| r.collect_keys(out)),
            StaticRule::Not(rule) => rule.collect_keys(out),
        }
    }

    /// Whether `key` is one this rule depends on.
    pub fn key_match(
        &self,
        key: &str,
    ) -> bool {
        match self {
            StaticRule::EqualsLiteral { key: bound, .. } => bound == key,
            StaticRule::Equals { keys } => keys.iter().any(|k| k == key),
            StaticRule::And(rules) | StaticRule::Or(rules) => rules.iter().any(|r| r.key_match(key)),
            StaticRule::Not(rule) => rule.key_match(key),
        }
    }

    /// Local, no-I/O pre-check using only the observed key and value.
    pub fn satisfiable(
        &self,
        key: &str,
        value: Option<&str>,
    ) -> bool {
        match self {
            StaticRule::EqualsLiteral { key: bound, value: literal } => bound == key && literal.as_deref() == value,
            StaticRule::Equals { keys } => keys.iter().any(|k| k == key),
            StaticRule::And(rules) => {
                // every nested rule the key touches must agree
                let mut triggered = false;
                for rule in rules.iter().filter(|r| r.key_match(key)) {
                    if !rule.satisfiable(key, value) {
                        return false;
                    }
                    triggered = true;
                }
                triggered
            }
            StaticRule::Or(rules) => rules.iter().any(|r| r.satisfiable(key, value)),
            StaticRule::Not(rule) => rule.key_match(key) && !rule.satisfiable(key, value),
        }
    }

    /// Authoritative check against current state.
    pub fn satisfied<'a>(
        &'a self,
        api: &'a dyn ReadApi,
    ) -> BoxFuture<'a, Result<bool, StoreError>> {
        async move {
            match self {
                StaticRule::EqualsLiteral { key, value } => Ok(api.get(key).await? == *value),
                StaticRule::Equals { keys } => {
                    let Some((first, rest)) = keys.split_first() else {
                        return Ok(true);
                    };
                    let reference = api.get(first).await?;
                    for key in rest {
                        if api.get(key).await? != reference {
                            return Ok(false);
                        }
                    }
                    Ok(true)
                }
                StaticRule::And(rules) => {
                    for rule in rules {
                        if !rule.satisfied(api).await? {
                            return Ok(false);
                        }
                    }
                    Ok(true)
                }
                StaticRule::Or(rules) => {
                    for rule in rules {
                        if rule.satisfied(api).await? {
                            return Ok(true);
                        }
                    }
                    Ok(false)
                }
                StaticRule::Not(rule) => Ok(!rule.satisfied(api).await?),
            }
        }
        .boxed()
    }
}

impl fmt::Display for StaticRule {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        match self {
            StaticRule::EqualsLiteral { key, value: Some(v) } => write!(f, "{} = {:?}", key, v),
            StaticRule::EqualsLiteral { key, value: None } => write!(f, "{} = <nil>", key),
            StaticRule::Equals { keys } => write!(f, "equals({})", keys.join(", ")),
            StaticRule::And(rules) => write_joined(f, "AND", rules),
            StaticRule::Or(rules) => write_joined(f, "OR", rules),
            StaticRule::Not(rule) => write!(f, "NOT {}", rule),
        }
    }
}

fn write_joined(
    f: &mut fmt::Formatter<'_>,
    op: &str,
    rules: &[StaticRule],
) -> fmt::Result {
    write!(f, "(")?;
    for (i, r) in rules.iter().enumerate() {
        if i > 0 {
            write!(f, " {} ", op)?;
        }
        write!(f, "{}", r)?;
    }
    write!(f, ")")
}
