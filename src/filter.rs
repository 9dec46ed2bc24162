//! Delivery filters.
//!
//! A consumer only dispatches entries that pass two gates:
//!
//! 1. [`AllowedEvents`]: the envelope's event type is in a fixed set.
//! 2. [`HeaderFilter`]: every required header is present with the expected
//!    value.
//!
//! # Header filter syntax
//!
//! ```text
//! environment=production,datacenter=us-east-1
//! ```
//!
//! Filters come from two levels: a process-wide (global) string and a
//! per-consumer (route) string. Route entries override global entries with
//! the same key; keys unique to either side are kept.
//!
//! ```text
//! global = "a=1,b=2"   route = "b=3,c=4"   merged = {a=1, b=3, c=4}
//! ```

use std::collections::{BTreeMap, HashSet};

use crate::envelope::{header_value_string, EventEnvelope};

/// Exact, case-sensitive set of event types a consumer accepts.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AllowedEvents {
    events: HashSet<String>,
}

impl AllowedEvents {
    /// Parse a comma-separated list; segments are trimmed and empty ones dropped.
    pub fn parse(events: &str) -> Self {
        let events = events
            .split(',')
            .map(str::trim)
            .filter(|event| !event.is_empty())
            .map(str::to_string)
            .collect();
        Self { events }
    }

    pub fn contains(&self, event_type: &str) -> bool {
        self.events.contains(event_type)
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Event types in sorted order.
    pub fn to_sorted_vec(&self) -> Vec<&str> {
        let mut events: Vec<&str> = self.events.iter().map(String::as_str).collect();
        events.sort_unstable();
        events
    }
}

/// Required header values, merged from global and route filter strings.
///
/// Pure and immutable once built, so one instance can be shared by every poll
/// of a consumer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderFilter {
    criteria: BTreeMap<String, String>,
}

impl HeaderFilter {
    /// Build a filter from the global and route filter strings.
    pub fn new(global: &str, route: &str) -> Self {
        let mut criteria = parse_criteria(global);
        criteria.extend(parse_criteria(route));
        Self { criteria }
    }

    /// Build a filter from a single filter string.
    pub fn from_route(route: &str) -> Self {
        Self::new("", route)
    }

    /// Returns true if the envelope satisfies every criterion.
    ///
    /// An empty filter matches everything; an envelope without headers only
    /// matches the empty filter.
    pub fn matches(&self, envelope: &EventEnvelope) -> bool {
        if self.criteria.is_empty() {
            return true;
        }
        if envelope.headers.is_empty() {
            return false;
        }

        self.criteria.iter().all(|(key, expected)| {
            envelope
                .headers
                .get(key)
                .map(|value| header_value_string(value) == *expected)
                .unwrap_or(false)
        })
    }

    pub fn criteria(&self) -> &BTreeMap<String, String> {
        &self.criteria
    }

    pub fn is_empty(&self) -> bool {
        self.criteria.is_empty()
    }

    /// Render the criteria back into `k=v,k=v` form, sorted by key.
    pub fn to_filter_string(&self) -> String {
        self.criteria
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join(",")
    }
}

/// Parse `key1=value1,key2=value2` into a map.
///
/// Pairs are split on the first `=`, so values may themselves contain `=`.
/// Keys and values are trimmed; pairs with an empty side or no `=` are dropped.
pub fn parse_criteria(filters: &str) -> BTreeMap<String, String> {
    filters
        .split(',')
        .filter_map(|pair| pair.split_once('='))
        .map(|(key, value)| (key.trim(), value.trim()))
        .filter(|(key, value)| !key.is_empty() && !value.is_empty())
        .map(|(key, value)| (key.to_string(), value.to_string()))
        .collect()
}

/// Merge two filter strings, route taking precedence.
///
/// When only one side is set it is returned unchanged.
pub fn merge_filters(global: &str, route: &str) -> String {
    match (global.trim().is_empty(), route.trim().is_empty()) {
        (true, true) => String::new(),
        (true, false) => route.to_string(),
        (false, true) => global.to_string(),
        (false, false) => HeaderFilter::new(global, route).to_filter_string(),
    }
}

/// Outcome of running an envelope through a [`FilterSpec`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterVerdict {
    Accept,
    EventTypeNotAllowed,
    HeaderMismatch,
}

/// Both delivery gates of one consumer.
#[derive(Debug, Clone, Default)]
pub struct FilterSpec {
    pub events: AllowedEvents,
    pub headers: HeaderFilter,
}

impl FilterSpec {
    pub fn new(events: AllowedEvents, headers: HeaderFilter) -> Self {
        Self { events, headers }
    }

    /// Event type is checked first, then headers.
    pub fn evaluate(&self, envelope: &EventEnvelope) -> FilterVerdict {
        if !self.events.contains(&envelope.event_type) {
            FilterVerdict::EventTypeNotAllowed
        } else if !self.headers.matches(envelope) {
            FilterVerdict::HeaderMismatch
        } else {
            FilterVerdict::Accept
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn envelope_with(headers: &[(&str, serde_json::Value)]) -> EventEnvelope {
        headers
            .iter()
            .fold(EventEnvelope::new("A"), |env, (k, v)| env.with_header(*k, v.clone()))
    }

    // AllowedEvents

    #[test]
    fn test_allowed_events_parse() {
        let events = AllowedEvents::parse(" OrderCreated, OrderCancelled ,,  ");
        assert_eq!(events.len(), 2);
        assert!(events.contains("OrderCreated"));
        assert!(events.contains("OrderCancelled"));
        assert!(!events.contains(""));
    }

    #[test]
    fn test_allowed_events_case_sensitive() {
        let events = AllowedEvents::parse("OrderCreated");
        assert!(!events.contains("ordercreated"));
        assert!(!events.contains("OrderCreated "));
    }

    #[test]
    fn test_allowed_events_empty() {
        assert!(AllowedEvents::parse("").is_empty());
        assert!(AllowedEvents::parse(" , ,").is_empty());
    }

    // Parsing

    #[test]
    fn test_parse_criteria() {
        let criteria = parse_criteria(" region = US , tier=gold,,=x,y=,novalue, expr=a=b");
        assert_eq!(criteria.len(), 3);
        assert_eq!(criteria["region"], "US");
        assert_eq!(criteria["tier"], "gold");
        assert_eq!(criteria["expr"], "a=b");
    }

    // Merge

    #[test]
    fn test_merge_is_right_biased() {
        let filter = HeaderFilter::new("a=1,b=2", "b=3,c=4");
        let expected: BTreeMap<String, String> = [("a", "1"), ("b", "3"), ("c", "4")]
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        assert_eq!(filter.criteria(), &expected);
    }

    #[test]
    fn test_merge_filters_strings() {
        assert_eq!(merge_filters("", ""), "");
        assert_eq!(merge_filters("  ", "x=1"), "x=1");
        assert_eq!(merge_filters("x=1", ""), "x=1");
        assert_eq!(
            merge_filters("environment=production,datacenter=us-east-1", "datacenter=eu-west-1"),
            "datacenter=eu-west-1,environment=production"
        );
    }

    // Matching

    #[test]
    fn test_empty_filter_matches_everything() {
        let filter = HeaderFilter::new("", "");
        assert!(filter.is_empty());
        assert!(filter.matches(&EventEnvelope::new("A")));
        assert!(filter.matches(&envelope_with(&[("region", json!("US"))])));
    }

    #[test]
    fn test_no_headers_fails_non_empty_filter() {
        let filter = HeaderFilter::from_route("region=US");
        assert!(!filter.matches(&EventEnvelope::new("A")));
    }

    #[test]
    fn test_all_criteria_must_hold() {
        let filter = HeaderFilter::new("environment=production", "region=US");

        let both = envelope_with(&[("environment", json!("production")), ("region", json!("US"))]);
        assert!(filter.matches(&both));

        let one = envelope_with(&[("region", json!("US"))]);
        assert!(!filter.matches(&one));

        let wrong = envelope_with(&[("environment", json!("production")), ("region", json!("EU"))]);
        assert!(!filter.matches(&wrong));
    }

    #[test]
    fn test_extra_headers_are_ignored() {
        let filter = HeaderFilter::from_route("region=US");
        let env = envelope_with(&[("region", json!("US")), ("team", json!("ops"))]);
        assert!(filter.matches(&env));
    }

    #[test]
    fn test_non_string_headers_compare_by_string_form() {
        let filter = HeaderFilter::from_route("priority=5,urgent=true");
        let env = envelope_with(&[("priority", json!(5)), ("urgent", json!(true))]);
        assert!(filter.matches(&env));

        let env = envelope_with(&[("priority", json!("5")), ("urgent", json!("true"))]);
        assert!(filter.matches(&env));

        let env = envelope_with(&[("priority", json!(6)), ("urgent", json!(true))]);
        assert!(!filter.matches(&env));
    }

    // FilterSpec

    #[test]
    fn test_filter_spec_verdicts() {
        let spec = FilterSpec::new(
            AllowedEvents::parse("OrderCreated"),
            HeaderFilter::from_route("region=US"),
        );

        let ok = EventEnvelope::new("OrderCreated").with_header("region", "US");
        assert_eq!(spec.evaluate(&ok), FilterVerdict::Accept);

        let wrong_type = EventEnvelope::new("OrderShipped").with_header("region", "US");
        assert_eq!(spec.evaluate(&wrong_type), FilterVerdict::EventTypeNotAllowed);

        let wrong_region = EventEnvelope::new("OrderCreated").with_header("region", "EU");
        assert_eq!(spec.evaluate(&wrong_region), FilterVerdict::HeaderMismatch);
    }
}
