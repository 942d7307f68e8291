// Copyright (c) FleetWire contributors.
// Licensed under the MIT License.

//! MQTT topic name/filter parsing and the `+`/`#` wildcard grammar (spec §4.9, §6.3).

use thiserror::Error;

/// Error parsing a topic name or topic filter.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TopicParseError {
    /// The topic string was empty.
    #[error("topic must not be empty")]
    Empty,
    /// A segment contained a non-ASCII or control byte.
    #[error("topic contains an invalid character")]
    InvalidChar,
    /// `#` appeared somewhere other than as the final segment.
    #[error("'#' must occupy the entire final segment of a topic filter")]
    HashNotLast,
    /// `+` or `#` did not occupy an entire segment (e.g. `foo+`).
    #[error("'+' and '#' must occupy an entire segment")]
    WildcardNotWholeSegment,
    /// A topic name (not filter) contained a wildcard character.
    #[error("topic names must not contain '+' or '#'")]
    WildcardInTopicName,
}

fn validate_segments(topic: &str) -> Result<(), TopicParseError> {
    if topic.is_empty() {
        return Err(TopicParseError::Empty);
    }
    if topic.chars().any(|c| !c.is_ascii() || c.is_ascii_control()) {
        return Err(TopicParseError::InvalidChar);
    }
    Ok(())
}

/// A concrete MQTT topic name, as published by a device (no wildcards).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TopicName(String);

impl TopicName {
    /// Parse a topic name, rejecting wildcard characters.
    pub fn from_string(topic: String) -> Result<Self, TopicParseError> {
        validate_segments(&topic)?;
        if topic.split('/').any(|seg| seg.contains('+') || seg.contains('#')) {
            return Err(TopicParseError::WildcardInTopicName);
        }
        Ok(Self(topic))
    }

    /// The segments of the topic, split on `/`.
    #[must_use]
    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split('/')
    }

    /// Borrow the topic as a plain string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for TopicName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// An MQTT topic filter, which may contain `+` (single-level) and `#` (trailing
/// multi-level) wildcards per the MQTT 3.1.1/5 topic grammar.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TopicFilter {
    raw: String,
    segments: Vec<Segment>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum Segment {
    Literal(String),
    SingleLevel,
    MultiLevel,
}

impl TopicFilter {
    /// Parse a topic filter, validating the wildcard grammar.
    ///
    /// # Errors
    /// Returns [`TopicParseError`] if `#` is not the final segment, or if `+`/`#`
    /// share a segment with other characters.
    pub fn parse(filter: &str) -> Result<Self, TopicParseError> {
        validate_segments(filter)?;

        let raw_segments: Vec<&str> = filter.split('/').collect();
        let mut segments = Vec::with_capacity(raw_segments.len());
        for (idx, seg) in raw_segments.iter().enumerate() {
            if *seg == "+" {
                segments.push(Segment::SingleLevel);
            } else if *seg == "#" {
                if idx != raw_segments.len() - 1 {
                    return Err(TopicParseError::HashNotLast);
                }
                segments.push(Segment::MultiLevel);
            } else if seg.contains('+') || seg.contains('#') {
                return Err(TopicParseError::WildcardNotWholeSegment);
            } else {
                segments.push(Segment::Literal((*seg).to_string()));
            }
        }

        Ok(Self {
            raw: filter.to_string(),
            segments,
        })
    }

    /// Returns true if `name` matches this filter.
    #[must_use]
    pub fn matches_topic_name(&self, name: &TopicName) -> bool {
        let name_segments: Vec<&str> = name.segments().collect();
        let mut ni = 0usize;

        for seg in &self.segments {
            match seg {
                Segment::MultiLevel => return ni < name_segments.len(),
                Segment::SingleLevel => {
                    if ni >= name_segments.len() {
                        return false;
                    }
                    ni += 1;
                }
                Segment::Literal(lit) => {
                    if name_segments.get(ni) != Some(&lit.as_str()) {
                        return false;
                    }
                    ni += 1;
                }
            }
        }

        ni == name_segments.len()
    }

    /// Borrow the raw filter string as passed to [`TopicFilter::parse`].
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Build a route-style topic with `{tenantId}`/`{deviceId}` placeholders substituted
    /// (spec §4.9 `mqtt_republish` destination).
    #[must_use]
    pub fn substitute_placeholders(template: &str, tenant_id: &str, device_id: &str) -> String {
        template
            .replace("{tenantId}", tenant_id)
            .replace("{deviceId}", device_id)
    }
}

impl std::fmt::Display for TopicFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.raw)
    }
}
