//! Declarative graph descriptions.
//!
//! A description maps each producer module to an ordered list of edges:
//!
//! ```text
//! camera   = ["detector:input0:output"]
//! detector = ["tracker", "writer::output0"]
//! ```
//!
//! Each token is `consumer[:inputPort[:outputPort]]`, where `inputPort` is
//! the consumer's port and `outputPort` is the producer's port. An omitted or
//! empty port means "the module's only port in that direction".
//!
//! Producers are kept in a sorted map, so a description built from any map
//! type is the same regardless of iteration order.

use crate::pipeline::error::{PipelineError, PipelineResult};
use std::collections::BTreeMap;
use std::fmt;

/// One edge leaving a producer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EdgeSpec {
    pub consumer: String,
    /// Consumer's input port; `None` selects its only input.
    pub input_port: Option<String>,
    /// Producer's output port; `None` selects its only output.
    pub output_port: Option<String>,
}

impl EdgeSpec {
    pub fn new(consumer: impl Into<String>) -> Self {
        Self {
            consumer: consumer.into(),
            input_port: None,
            output_port: None,
        }
    }

    pub fn input(mut self, port: impl Into<String>) -> Self {
        self.input_port = Some(port.into());
        self
    }

    pub fn output(mut self, port: impl Into<String>) -> Self {
        self.output_port = Some(port.into());
        self
    }

    /// Parse a `consumer[:inputPort[:outputPort]]` token.
    pub fn parse(token: &str) -> PipelineResult<Self> {
        let fail = |reason: &str| PipelineError::Parse {
            token: token.to_string(),
            reason: reason.to_string(),
        };

        let segments: Vec<&str> = token.split(':').map(str::trim).collect();
        if segments.len() > 3 {
            return Err(fail("expected at most three ':'-separated segments"));
        }
        let consumer = segments[0];
        if consumer.is_empty() {
            return Err(fail("consumer module name is empty"));
        }
        if segments.iter().any(|s| s.chars().any(char::is_whitespace)) {
            return Err(fail("names may not contain whitespace"));
        }

        let port = |idx: usize| {
            segments
                .get(idx)
                .filter(|s| !s.is_empty())
                .map(|s| s.to_string())
        };
        Ok(Self {
            consumer: consumer.to_string(),
            input_port: port(1),
            output_port: port(2),
        })
    }
}

impl fmt::Display for EdgeSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.consumer)?;
        match (&self.input_port, &self.output_port) {
            (None, None) => Ok(()),
            (input, None) => write!(f, ":{}", input.as_deref().unwrap_or("")),
            (input, Some(output)) => {
                write!(f, ":{}:{}", input.as_deref().unwrap_or(""), output)
            }
        }
    }
}

/// Typed adjacency description: producer → edges.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GraphDescription {
    edges: BTreeMap<String, Vec<EdgeSpec>>,
}

impl GraphDescription {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder form of [`add_edge`](Self::add_edge).
    pub fn edge(mut self, producer: impl Into<String>, edge: EdgeSpec) -> Self {
        self.add_edge(producer, edge);
        self
    }

    pub fn add_edge(&mut self, producer: impl Into<String>, edge: EdgeSpec) {
        self.edges.entry(producer.into()).or_default().push(edge);
    }

    /// Parse the string form: producer name → list of edge tokens.
    pub fn parse_map<I, K, V, T>(map: I) -> PipelineResult<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: IntoIterator<Item = T>,
        T: AsRef<str>,
    {
        let mut description = Self::new();
        for (producer, tokens) in map {
            let producer = producer.as_ref().trim();
            if producer.is_empty() || producer.chars().any(char::is_whitespace) {
                return Err(PipelineError::Parse {
                    token: producer.to_string(),
                    reason: "invalid producer module name".to_string(),
                });
            }
            let entry = description.edges.entry(producer.to_string()).or_default();
            for token in tokens {
                entry.push(EdgeSpec::parse(token.as_ref())?);
            }
        }
        Ok(description)
    }

    /// String form, the inverse of [`parse_map`](Self::parse_map).
    pub fn to_map(&self) -> BTreeMap<String, Vec<String>> {
        self.edges
            .iter()
            .map(|(producer, edges)| {
                (
                    producer.clone(),
                    edges.iter().map(EdgeSpec::to_string).collect(),
                )
            })
            .collect()
    }

    /// All `(producer, edge)` pairs, producers in sorted order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &EdgeSpec)> {
        self.edges
            .iter()
            .flat_map(|(p, edges)| edges.iter().map(move |e| (p.as_str(), e)))
    }

    pub fn producers(&self) -> impl Iterator<Item = &str> {
        self.edges.keys().map(String::as_str)
    }

    /// Number of edges.
    pub fn len(&self) -> usize {
        self.edges.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_parse_token_forms() {
        assert_eq!(EdgeSpec::parse("detector").unwrap(), EdgeSpec::new("detector"));
        assert_eq!(
            EdgeSpec::parse(" detector : input0 : output ").unwrap(),
            EdgeSpec::new("detector").input("input0").output("output")
        );
        assert_eq!(
            EdgeSpec::parse("writer::output1").unwrap(),
            EdgeSpec::new("writer").output("output1")
        );
    }

    #[test]
    fn test_parse_token_errors() {
        for token in ["", ":input", "a:b:c:d", "my module:in", "m:in put"] {
            assert!(
                matches!(EdgeSpec::parse(token), Err(PipelineError::Parse { .. })),
                "{token:?} should fail"
            );
        }
    }

    #[test]
    fn test_display_round_trip() {
        for token in ["a", "a:in", "a::out", "a:in:out"] {
            let edge = EdgeSpec::parse(token).unwrap();
            assert_eq!(edge.to_string(), token);
            assert_eq!(EdgeSpec::parse(&edge.to_string()).unwrap(), edge);
        }
    }

    #[test]
    fn test_parse_map_is_order_independent_and_idempotent() {
        let mut hashed = HashMap::new();
        hashed.insert("camera", vec!["detector:input0:output"]);
        hashed.insert("detector", vec!["tracker::output0", "writer::output0"]);
        let reversed = vec![
            ("detector", vec!["tracker::output0", "writer::output0"]),
            ("camera", vec!["detector:input0:output"]),
        ];

        let a = GraphDescription::parse_map(hashed).unwrap();
        let b = GraphDescription::parse_map(reversed).unwrap();
        assert_eq!(a, b);
        assert_eq!(GraphDescription::parse_map(a.to_map()).unwrap(), a);
        assert_eq!(a.len(), 3);
        assert_eq!(a.producers().collect::<Vec<_>>(), vec!["camera", "detector"]);
    }
}
