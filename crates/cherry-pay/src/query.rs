//! Page query string parameters
//!
//! Landing and return pages pass state through their query string
//! (`stream`, `product_id`, `redirect_token`, `status`, ...). `PageQuery`
//! keeps parameters in their original order so they can be carried over to
//! the next page.

use serde_json::{Map, Value};
use url::form_urlencoded;

/// Ordered, decoded query parameters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageQuery {
    pairs: Vec<(String, String)>,
}

impl PageQuery {
    /// Parse a raw query string, with or without the leading `?`.
    pub fn parse(query: &str) -> Self {
        let query = query.strip_prefix('?').unwrap_or(query);
        Self {
            pairs: form_urlencoded::parse(query.as_bytes())
                .into_owned()
                .collect(),
        }
    }

    /// Parse the query part of an absolute or relative URL.
    pub fn from_url(url: &str) -> Self {
        let without_fragment = url.split('#').next().unwrap_or_default();
        match without_fragment.split_once('?') {
            Some((_, query)) => Self::parse(query),
            None => Self::default(),
        }
    }

    /// First value for `name`, treating an empty value as absent.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.pairs
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
            .filter(|value| !value.is_empty())
    }

    /// Whether `name` appears at all, even with an empty value.
    pub fn contains(&self, name: &str) -> bool {
        self.pairs.iter().any(|(key, _)| key == name)
    }

    /// Replace every value of `name` with a single `value`, keeping the
    /// position of the first occurrence.
    pub fn set(&mut self, name: &str, value: impl Into<String>) {
        let value = value.into();
        match self.pairs.iter().position(|(key, _)| key == name) {
            Some(index) => {
                self.pairs[index].1 = value;
                let mut seen = false;
                self.pairs.retain(|(key, _)| {
                    if key != name {
                        return true;
                    }
                    let keep = !seen;
                    seen = true;
                    keep
                });
            }
            None => self.pairs.push((name.to_owned(), value)),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.pairs.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    /// Encode back into `a=1&b=2` form.
    pub fn to_query_string(&self) -> String {
        form_urlencoded::Serializer::new(String::new())
            .extend_pairs(self.pairs.iter())
            .finish()
    }

    /// Parameters as a flat JSON object; later duplicates win.
    pub fn to_json_object(&self) -> Value {
        let object: Map<String, Value> = self
            .pairs
            .iter()
            .map(|(k, v)| (k.clone(), Value::String(v.clone())))
            .collect();
        Value::Object(object)
    }
}
