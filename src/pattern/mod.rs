//! Key pattern compilation and attribute extraction.
//!
//! A pattern is a `/`-separated path template. Segments starting with `:` are
//! variables that capture exactly one path segment; all other segments are
//! literals:
//!
//! ```text
//! /services/:service/instances/:instance/state
//! ```
//!
//! Compiling a pattern yields:
//! - the literal prefix (everything before the first variable), which scopes
//!   watch subscriptions and crawler listings
//! - an anchored, segment-aligned matcher returning [`Attributes`]
//! - a formatter that substitutes attribute values back into the template

use std::collections::BTreeMap;
use std::collections::HashMap;
use std::fmt;

use regex::Regex;

use crate::constants::UNRESOLVED_ATTRIBUTE;
use crate::constants::VARIABLE_MARKER;
use crate::PatternError;


#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Variable(String),
}

/// Compiled key pattern. Immutable once built.
#[derive(Clone)]
pub struct Pattern {
    template: String,
    prefix: String,
    segments: Vec<Segment>,
    matcher: Regex,
    /// variable name -> capture group index
    positions: HashMap<String, usize>,
}

impl Pattern {
    pub fn new(template: &str) -> Result<Self, PatternError> {
        if template.is_empty() {
            return Err(PatternError::Empty);
        }
        if !template.starts_with('/') {
            return Err(PatternError::NotAbsolute {
                pattern: template.to_string(),
            });
        }

        let mut segments = Vec::new();
        let mut positions = HashMap::new();
        let mut expr = String::from("^");

        for (idx, raw) in template.split('/').enumerate() {
            if idx > 0 {
                expr.push('/');
            }
            if let Some(name) = raw.strip_prefix(VARIABLE_MARKER) {
                validate_variable(template, idx, name)?;
                if positions.contains_key(name) {
                    return Err(PatternError::DuplicateVariable {
                        pattern: template.to_string(),
                        name: name.to_string(),
                    });
                }
                positions.insert(name.to_string(), positions.len() + 1);
                expr.push_str("([^/]*)");
                segments.push(Segment::Variable(name.to_string()));
            } else {
                if let Some(token) = raw.chars().find(|c| matches!(c, ':' | '{' | '}' | '[' | ']')) {
                    return Err(PatternError::UnexpectedToken {
                        pattern: template.to_string(),
                        segment: idx,
                        token,
                    });
                }
                expr.push_str(&regex::escape(raw));
                segments.push(Segment::Literal(raw.to_string()));
            }
        }
        expr.push('$');

        let matcher = Regex::new(&expr).map_err(|e| PatternError::Compile {
            pattern: template.to_string(),
            reason: e.to_string(),
        })?;

        let prefix = match template.find(&format!("/{}", VARIABLE_MARKER)) {
            Some(pos) => template[..=pos].to_string(),
            None => template.to_string(),
        };

        Ok(Self {
            template: template.to_string(),
            prefix,
            segments,
            matcher,
            positions,
        })
    }

    pub fn template(&self) -> &str {
        &self.template
    }

    /// Literal leading portion used to scope watches and crawls.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Number of `/`-separated segments, counting the empty leading one.
    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }

    pub fn variables(&self) -> impl Iterator<Item = &str> {
        self.segments.iter().filter_map(|s| match s {
            Segment::Variable(name) => Some(name.as_str()),
            Segment::Literal(_) => None,
        })
    }

    pub fn has_variables(&self) -> bool {
        !self.positions.is_empty()
    }

    pub fn is_match(
        &self,
        key: &str,
    ) -> bool {
        self.matcher.is_match(key)
    }

    /// Matches `key` against the whole pattern and returns the captured
    /// bindings, or `None` when the key does not fit.
    pub fn matches(
        &self,
        key: &str,
    ) -> Option<Attributes> {
        let captures = self.matcher.captures(key)?;
        let mut values = BTreeMap::new();
        for (name, idx) in &self.positions {
            let value = captures.get(*idx)?;
            values.insert(name.clone(), value.as_str().to_string());
        }
        Some(Attributes { values })
    }

    /// Substitutes bindings into the template. Unbound variables become the
    /// `<nil>` placeholder.
    pub fn format(
        &self,
        attributes: &Attributes,
    ) -> String {
        self.render(attributes, Some(UNRESOLVED_ATTRIBUTE))
            .unwrap_or_default()
    }

    /// Substitutes bindings into the template, failing if any variable has
    /// no binding.
    pub fn format_strict(
        &self,
        attributes: &Attributes,
    ) -> Option<String> {
        self.render(attributes, None)
    }

    fn render(
        &self,
        attributes: &Attributes,
        placeholder: Option<&str>,
    ) -> Option<String> {
        let mut parts = Vec::with_capacity(self.segments.len());
        for segment in &self.segments {
            match segment {
                Segment::Literal(literal) => parts.push(literal.as_str()),
                Segment::Variable(name) => match attributes.get(name) {
                    Some(value) => parts.push(value),
                    None => parts.push(placeholder?),
                },
            }
        }
        Some(parts.join("/"))
    }
}

impl fmt::Debug for Pattern {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("Pattern")
            .field("template", &self.template)
            .field("prefix", &self.prefix)
            .finish()
    }
}

impl fmt::Display for Pattern {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.write_str(&self.template)
    }
}

impl PartialEq for Pattern {
    fn eq(
        &self,
        other: &Self,
    ) -> bool {
        self.template == other.template
    }
}

impl Eq for Pattern {}

fn validate_variable(
    template: &str,
    segment: usize,
    name: &str,
) -> Result<(), PatternError> {
    let mut chars = name.chars();
    let first = match chars.next() {
        Some(c) => c,
        None => {
            return Err(PatternError::EmptyVariable {
                pattern: template.to_string(),
                segment,
            })
        }
    };
    let valid = (first.is_ascii_alphabetic() || first == '_') && chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
    if !valid {
        return Err(PatternError::InvalidVariable {
            pattern: template.to_string(),
            name: name.to_string(),
        });
    }
    Ok(())
}

/// Variable bindings produced by matching one concrete key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Attributes {
    values: BTreeMap<String, String>,
}

impl Attributes {
    pub fn new<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            values: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    pub fn get(
        &self,
        name: &str,
    ) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn to_map(&self) -> HashMap<String, String> {
        self.values.clone().into_iter().collect()
    }
}

/// Number of `/`-separated segments in a concrete key.
pub fn segment_count(key: &str) -> usize {
    key.split('/').count()
}
