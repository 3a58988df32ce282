//! AQL result trees.
//!
//! An aggregate partial result is a tree of nested mappings keyed by
//! dimension value; leaves are numeric scalars, `[sum, count]` pairs for
//! averages, or serialized HLL sketches. Non-aggregate results are plain row
//! arrays and never pass through this type.

use super::hll::HllSketch;
use serde::ser::{Serialize, Serializer};
use serde::Deserialize;
use std::collections::HashMap;

/// One node of an AQL aggregate result tree.
///
/// The untagged serde representation matches the wire format: JSON numbers
/// are scalar leaves, two-element arrays are `[sum, count]` pairs, strings
/// are base64 sketches, and objects are interior levels.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum ResultNode {
    Number(f64),
    Pair(f64, f64),
    Sketch(HllSketch),
    Interior(HashMap<String, ResultNode>),
}

impl Serialize for ResultNode {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            ResultNode::Number(n) => JsonNumber(*n).serialize(serializer),
            ResultNode::Pair(sum, count) => {
                (JsonNumber(*sum), JsonNumber(*count)).serialize(serializer)
            }
            ResultNode::Sketch(sketch) => sketch.serialize(serializer),
            ResultNode::Interior(children) => children.serialize(serializer),
        }
    }
}

/// Leaves hold `f64`, but the wire format writes integral values without a
/// fractional part (`14`, not `14.0`).
struct JsonNumber(f64);

impl Serialize for JsonNumber {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let n = self.0;
        if n.is_finite() && n.fract() == 0.0 {
            if (0.0..=u64::MAX as f64).contains(&n) {
                return serializer.serialize_u64(n as u64);
            }
            if (i64::MIN as f64..0.0).contains(&n) {
                return serializer.serialize_i64(n as i64);
            }
        }
        serializer.serialize_f64(n)
    }
}

impl ResultNode {
    /// The empty tree, identity element of every lenient merge.
    pub fn empty() -> ResultNode {
        ResultNode::Interior(HashMap::new())
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, ResultNode::Interior(children) if children.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(raw: &str) -> ResultNode {
        serde_json::from_str(raw).unwrap()
    }

    #[test]
    fn parses_nested_interior_and_number_leaves() {
        let node = parse(r#"{"1234": {"foo": 123, "bar": 2}}"#);
        let ResultNode::Interior(top) = &node else {
            panic!("expected interior node");
        };
        let ResultNode::Interior(inner) = &top["1234"] else {
            panic!("expected interior node");
        };
        assert_eq!(inner["foo"], ResultNode::Number(123.0));
        assert_eq!(inner["bar"], ResultNode::Number(2.0));
    }

    #[test]
    fn parses_pair_leaves() {
        let node = parse(r#"{"1234": {"foo": [2, 1]}}"#);
        let ResultNode::Interior(top) = &node else {
            panic!("expected interior node");
        };
        let ResultNode::Interior(inner) = &top["1234"] else {
            panic!("expected interior node");
        };
        assert_eq!(inner["foo"], ResultNode::Pair(2.0, 1.0));
    }

    #[test]
    fn parses_sketch_leaves() {
        let sketch = HllSketch::new(4);
        let raw = format!(r#"{{"1234": "{}"}}"#, sketch.to_base64());
        let node = parse(&raw);
        let ResultNode::Interior(top) = &node else {
            panic!("expected interior node");
        };
        assert_eq!(top["1234"], ResultNode::Sketch(sketch));
    }

    #[test]
    fn integral_leaves_serialize_without_fraction() {
        let node = parse(r#"{"1234": {"foo": 14, "bar": 1.5, "neg": -3}}"#);
        let encoded = serde_json::to_string(&node).unwrap();
        assert!(encoded.contains(r#""foo":14"#), "got {encoded}");
        assert!(!encoded.contains("14.0"), "got {encoded}");
        assert!(encoded.contains(r#""bar":1.5"#), "got {encoded}");
        assert!(encoded.contains(r#""neg":-3"#), "got {encoded}");

        let pair = ResultNode::Pair(3.0, 1.0);
        assert_eq!(serde_json::to_string(&pair).unwrap(), "[3,1]");
    }

    #[test]
    fn serialization_round_trips() {
        for raw in [
            r#"{}"#,
            r#"{"1234": {"foo": 123, "bar": 2}}"#,
            r#"{"1234": {"foo": [2, 1], "bar": [1, 2]}}"#,
            r#"{"a": {"b": {"c": 1.5}}}"#,
        ] {
            let node = parse(raw);
            let encoded = serde_json::to_string(&node).unwrap();
            assert_eq!(parse(&encoded), node, "round trip failed for {raw}");
        }
    }

    #[test]
    fn empty_tree_is_empty() {
        assert!(ResultNode::empty().is_empty());
        assert!(!parse(r#"{"a": 1}"#).is_empty());
        assert!(!ResultNode::Number(0.0).is_empty());
    }
}
