//! Write-Attributes parameter handling
//!
//! LWM2M notification attributes travel as query parameters of a PUT
//! request. Only a fixed set of names is legal; validation reports every
//! offending name at once instead of stopping at the first one.

use crate::coap_types::{parse_query, query_pair};
use crate::error::{Lwm2mError, Result};
use std::collections::BTreeMap;

/// The notification attributes LWM2M defines
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Attribute {
    /// Minimum period between notifications
    Pmin,
    /// Maximum period between notifications
    Pmax,
    /// Greater-than threshold
    Gt,
    /// Less-than threshold
    Lt,
    /// Step
    St,
    /// Cancel an observation
    Cancel,
}

impl Attribute {
    pub const ALL: [Attribute; 6] = [
        Self::Pmin,
        Self::Pmax,
        Self::Gt,
        Self::Lt,
        Self::St,
        Self::Cancel,
    ];

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|a| a.name() == name)
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Pmin => "pmin",
            Self::Pmax => "pmax",
            Self::Gt => "gt",
            Self::Lt => "lt",
            Self::St => "st",
            Self::Cancel => "cancel",
        }
    }
}

/// Attribute name to value mapping, as submitted by a caller
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AttributeSet {
    values: BTreeMap<String, String>,
}

impl AttributeSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace an attribute
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.values.insert(name.into(), value.into());
        self
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Check every name against the whitelist
    pub fn validate(&self) -> Result<()> {
        let unsupported: Vec<String> = self
            .values
            .keys()
            .filter(|name| Attribute::from_name(name).is_none())
            .cloned()
            .collect();

        if unsupported.is_empty() {
            Ok(())
        } else {
            Err(Lwm2mError::UnsupportedAttributes(unsupported))
        }
    }

    /// Build the `?name=value&...` query, validating first
    pub fn to_query(&self) -> Result<String> {
        self.validate()?;
        let mut query = String::from("?");
        for (name, value) in self.iter() {
            query.push_str(&query_pair(name, value)?);
            query.push('&');
        }
        Ok(query)
    }

    /// Parse and validate an inbound query string
    pub fn from_query(query: &str) -> Result<Self> {
        let set: Self = parse_query(query).into_iter().collect();
        set.validate()?;
        Ok(set)
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for AttributeSet {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            values: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_contains_every_attribute() {
        let set: AttributeSet = [("pmin", "1"), ("pmax", "10"), ("gt", "3.5")]
            .into_iter()
            .collect();
        let query = set.to_query().unwrap();

        assert!(query.starts_with('?'));
        assert!(query.contains("pmin=1&"));
        assert!(query.contains("pmax=10&"));
        assert!(query.contains("gt=3.5&"));
        assert_eq!(query.matches('=').count(), 3);
    }

    #[test]
    fn test_validation_lists_all_offenders() {
        let set: AttributeSet = [("pmin", "1"), ("foo", "2"), ("bar", "3")]
            .into_iter()
            .collect();

        match set.to_query() {
            Err(Lwm2mError::UnsupportedAttributes(names)) => {
                assert_eq!(names, vec!["bar".to_string(), "foo".to_string()]);
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_from_query_roundtrips_trailing_separator() {
        let set = AttributeSet::from_query("?pmin=2&st=1&").unwrap();
        assert_eq!(set.get("pmin"), Some("2"));
        assert_eq!(set.get("st"), Some("1"));
        assert_eq!(set.len(), 2);

        assert!(AttributeSet::from_query("pmin=2&nope=1").is_err());
    }

    #[test]
    fn test_values_cannot_smuggle_extra_attributes() {
        let set: AttributeSet = [("pmin", "1&cancel=")].into_iter().collect();
        assert!(matches!(set.to_query(), Err(Lwm2mError::BadRequest(_))));
    }
}
