//! Multi-valued request query parameters.

use std::collections::BTreeMap;

/// Name of the parameter that designates the upstream feed.
pub const UPSTREAM_URL_PARAM: &str = "url";

/// Query parameters keyed by name, each holding its values in request order.
///
/// Keys iterate in sorted order, so [`QueryParams::encode`] is independent of
/// the order in which distinct parameters appeared in the request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryParams {
    values: BTreeMap<String, Vec<String>>,
}

impl QueryParams {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse an `application/x-www-form-urlencoded` query string.
    pub fn parse(query: &str) -> Self {
        let mut params = Self::new();
        for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
            params.append(key.into_owned(), value.into_owned());
        }
        params
    }

    pub fn append(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.values
            .entry(key.into())
            .or_default()
            .push(value.into());
    }

    pub fn get_all(&self, key: &str) -> &[String] {
        self.values.get(key).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Iterate `(name, value)` pairs: names sorted, values in request order.
    pub fn pairs(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values.iter().flat_map(|(key, values)| {
            values
                .iter()
                .map(move |value| (key.as_str(), value.as_str()))
        })
    }

    /// Canonical URL encoding: keys sorted, multi-values kept in order.
    pub fn encode(&self) -> String {
        let mut serializer = url::form_urlencoded::Serializer::new(String::new());
        for (key, value) in self.pairs() {
            serializer.append_pair(key, value);
        }
        serializer.finish()
    }

    /// The first `url` value, used as the revalidation target.
    pub fn upstream_url(&self) -> Option<&str> {
        self.get_all(UPSTREAM_URL_PARAM).first().map(String::as_str)
    }
}
