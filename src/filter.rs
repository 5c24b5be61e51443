//! NIP-01 subscription filters.

use std::collections::BTreeMap;

use serde_json::{Map, Value};

use crate::event::Event;

/// Predicate sent to relays in a `REQ` message.
///
/// Empty lists mean "don't filter on this field". The same type requests a
/// note by id, the engagements pointing at it, or its author's metadata; only
/// the populated fields differ.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    pub ids: Vec<String>,
    pub authors: Vec<String>,
    pub kinds: Vec<u32>,
    /// Single-letter tag filters, rendered as `#e`, `#p`, ...
    pub tags: BTreeMap<char, Vec<String>>,
    pub since: Option<u64>,
    pub until: Option<u64>,
    pub limit: Option<u32>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ids<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.ids.extend(ids.into_iter().map(Into::into));
        self
    }

    pub fn authors<I, S>(mut self, authors: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.authors.extend(authors.into_iter().map(Into::into));
        self
    }

    pub fn kinds(mut self, kinds: impl IntoIterator<Item = u32>) -> Self {
        self.kinds.extend(kinds);
        self
    }

    pub fn tag<I, S>(mut self, name: char, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags
            .entry(name)
            .or_default()
            .extend(values.into_iter().map(Into::into));
        self
    }

    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Convert the filter into the JSON object used for REQ messages.
    pub fn to_json(&self) -> Map<String, Value> {
        let mut map = Map::new();
        if !self.ids.is_empty() {
            map.insert("ids".into(), strings(&self.ids));
        }
        if !self.authors.is_empty() {
            map.insert("authors".into(), strings(&self.authors));
        }
        if !self.kinds.is_empty() {
            map.insert(
                "kinds".into(),
                Value::Array(
                    self.kinds
                        .iter()
                        .map(|k| Value::Number((*k).into()))
                        .collect(),
                ),
            );
        }
        for (tag, values) in &self.tags {
            if values.is_empty() {
                continue;
            }
            map.insert(format!("#{tag}"), strings(values));
        }
        if let Some(since) = self.since {
            map.insert("since".into(), Value::Number(since.into()));
        }
        if let Some(until) = self.until {
            map.insert("until".into(), Value::Number(until.into()));
        }
        if let Some(limit) = self.limit {
            map.insert("limit".into(), Value::Number(limit.into()));
        }
        map
    }

    /// Check an event against every populated field.
    ///
    /// `limit` is a relay-side hint and is not evaluated here.
    pub fn matches(&self, ev: &Event) -> bool {
        if !self.ids.is_empty() && !self.ids.contains(&ev.id) {
            return false;
        }
        if !self.authors.is_empty() && !self.authors.contains(&ev.pubkey) {
            return false;
        }
        if !self.kinds.is_empty() && !self.kinds.contains(&ev.kind) {
            return false;
        }
        for (tag, values) in &self.tags {
            if values.is_empty() {
                continue;
            }
            let mut buf = [0u8; 4];
            let name: &str = tag.encode_utf8(&mut buf);
            let hit = ev.tags.iter().any(|t| {
                t.name() == Some(name) && t.value().is_some_and(|v| values.iter().any(|x| x == v))
            });
            if !hit {
                return false;
            }
        }
        self.since.map_or(true, |s| ev.created_at >= s)
            && self.until.map_or(true, |u| ev.created_at <= u)
    }
}

fn strings(values: &[String]) -> Value {
    Value::Array(values.iter().cloned().map(Value::String).collect())
}
