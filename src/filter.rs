//! Label filters used to restrict index lookups
//!
//! A series that does not carry a label is matched as if the label had the
//! empty string as its value.

use std::collections::BTreeSet;
use std::fmt;

use regex::Regex;

use crate::error::{Error, Result};

/// How a filter matches a label value
#[derive(Debug, Clone)]
pub enum FilterMatch {
    /// Value equals the given string
    Equals(String),
    /// Value differs from the given string
    NotEquals(String),
    /// Value fully matches the pattern
    EqualsRegex(Regex),
    /// Value does not fully match the pattern
    NotEqualsRegex(Regex),
    /// Value is one of the given strings
    In(BTreeSet<String>),
}

/// A predicate over a single label
#[derive(Debug, Clone)]
pub struct LabelFilter {
    /// Label name
    pub label: String,
    /// Match mode
    pub filter: FilterMatch,
}

fn anchored(pattern: &str) -> Result<Regex> {
    Regex::new(&format!("^(?:{})$", pattern))
        .map_err(|e| Error::filter(format!("Invalid regex '{}': {}", pattern, e)))
}

impl LabelFilter {
    pub fn equals(label: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            filter: FilterMatch::Equals(value.into()),
        }
    }

    pub fn not_equals(label: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            filter: FilterMatch::NotEquals(value.into()),
        }
    }

    pub fn regex(label: impl Into<String>, pattern: &str) -> Result<Self> {
        Ok(Self {
            label: label.into(),
            filter: FilterMatch::EqualsRegex(anchored(pattern)?),
        })
    }

    pub fn not_regex(label: impl Into<String>, pattern: &str) -> Result<Self> {
        Ok(Self {
            label: label.into(),
            filter: FilterMatch::NotEqualsRegex(anchored(pattern)?),
        })
    }

    pub fn one_of<I, S>(label: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            label: label.into(),
            filter: FilterMatch::In(values.into_iter().map(Into::into).collect()),
        }
    }

    /// Evaluate the filter against a label value, `None` meaning absent
    pub fn matches(&self, value: Option<&str>) -> bool {
        let value = value.unwrap_or("");
        match &self.filter {
            FilterMatch::Equals(expected) => value == expected,
            FilterMatch::NotEquals(expected) => value != expected,
            FilterMatch::EqualsRegex(re) => re.is_match(value),
            FilterMatch::NotEqualsRegex(re) => !re.is_match(value),
            FilterMatch::In(values) => values.contains(value),
        }
    }

    /// Exact values this filter can match, if it can be answered from postings alone
    ///
    /// Filters that match the empty string return `None` since absent labels
    /// have no posting list.
    pub(crate) fn exact_values(&self) -> Option<Vec<&str>> {
        match &self.filter {
            FilterMatch::Equals(v) if !v.is_empty() => Some(vec![v.as_str()]),
            FilterMatch::In(values) if !values.contains("") => {
                Some(values.iter().map(String::as_str).collect())
            }
            _ => None,
        }
    }
}

impl fmt::Display for LabelFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.filter {
            FilterMatch::Equals(v) => write!(f, "{}=\"{}\"", self.label, v),
            FilterMatch::NotEquals(v) => write!(f, "{}!=\"{}\"", self.label, v),
            FilterMatch::EqualsRegex(re) => write!(f, "{}=~\"{}\"", self.label, re.as_str()),
            FilterMatch::NotEqualsRegex(re) => write!(f, "{}!~\"{}\"", self.label, re.as_str()),
            FilterMatch::In(values) => {
                let joined: Vec<&str> = values.iter().map(String::as_str).collect();
                write!(f, "{} in ({})", self.label, joined.join(","))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_equality_filters() {
        let f = LabelFilter::equals("host", "a");
        assert!(f.matches(Some("a")));
        assert!(!f.matches(Some("b")));
        assert!(!f.matches(None));

        let f = LabelFilter::not_equals("host", "a");
        assert!(f.matches(Some("b")));
        assert!(f.matches(None));
    }

    #[test]
    fn test_regex_is_anchored() {
        let f = LabelFilter::regex("job", "api.*").unwrap();
        assert!(f.matches(Some("api-server")));
        assert!(!f.matches(Some("my-api")));

        let f = LabelFilter::not_regex("job", "api|web").unwrap();
        assert!(!f.matches(Some("web")));
        assert!(f.matches(Some("webhook")));

        assert!(LabelFilter::regex("job", "(").is_err());
    }

    #[test]
    fn test_empty_string_matches_absent_label() {
        let f = LabelFilter::equals("region", "");
        assert!(f.matches(None));
        assert!(f.exact_values().is_none());

        let f = LabelFilter::one_of("region", ["us", "eu"]);
        assert!(f.matches(Some("eu")));
        assert!(!f.matches(None));
        assert_eq!(f.exact_values().unwrap(), vec!["eu", "us"]);
    }

    #[test]
    fn test_display() {
        assert_eq!(LabelFilter::equals("host", "a").to_string(), "host=\"a\"");
        assert_eq!(
            LabelFilter::regex("job", "api.*").unwrap().to_string(),
            "job=~\"^(?:api.*)$\""
        );
    }
}
