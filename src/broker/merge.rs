//! Structure-directed merge of partial aggregate result trees.
//!
//! The engine walks two trees simultaneously and combines leaves under the
//! query's aggregation operator. Trees from different datanodes need not be
//! congruent: lenient operators take the union of keys at every level, the
//! strict ones require identical key sets.

use crate::query::{AggType, ResultNode, ShapePolicy};
use crate::{Error, Result};
use std::collections::HashMap;

/// Merge two partial aggregate trees under `agg`.
///
/// Commutative for every supported operator. On the first mismatch the walk
/// short-circuits and the partial result is discarded.
pub fn merge(lhs: ResultNode, rhs: ResultNode, agg: AggType) -> Result<ResultNode> {
    let mut ctx = MergeContext::new(agg);
    let merged = ctx.run(lhs, rhs);
    match ctx.err {
        Some(e) => Err(e),
        None => Ok(merged),
    }
}

/// Project a fully merged tree into its response form.
///
/// `Avg` pairs become quotients. `Hll` sketches stay serialized when the
/// caller asked for binary sketches, otherwise they collapse to cardinality
/// estimates. Everything else passes through.
pub fn finalize(node: ResultNode, agg: AggType, hll_binary: bool) -> ResultNode {
    match node {
        ResultNode::Interior(children) => ResultNode::Interior(
            children
                .into_iter()
                .map(|(k, v)| (k, finalize(v, agg, hll_binary)))
                .collect(),
        ),
        ResultNode::Pair(sum, count) if agg == AggType::Avg => {
            ResultNode::Number(if count == 0.0 { 0.0 } else { sum / count })
        }
        ResultNode::Sketch(sketch) if agg == AggType::Hll && !hll_binary => {
            ResultNode::Number(sketch.estimate() as f64)
        }
        other => other,
    }
}

struct MergeContext {
    agg: AggType,
    err: Option<Error>,
    depth: usize,
}

impl MergeContext {
    fn new(agg: AggType) -> Self {
        Self {
            agg,
            err: None,
            depth: 0,
        }
    }

    fn run(&mut self, lhs: ResultNode, rhs: ResultNode) -> ResultNode {
        if self.err.is_some() {
            return lhs;
        }
        match (lhs, rhs) {
            (ResultNode::Interior(l), ResultNode::Interior(r)) => self.merge_interior(l, r),
            (ResultNode::Number(a), ResultNode::Number(b)) => self.merge_number(a, b),
            (ResultNode::Pair(s1, c1), ResultNode::Pair(s2, c2))
                if self.agg == AggType::Avg =>
            {
                ResultNode::Pair(s1 + s2, c1 + c2)
            }
            (ResultNode::Sketch(mut a), ResultNode::Sketch(b)) if self.agg == AggType::Hll => {
                if let Err(e) = a.merge(&b) {
                    self.fail_with(e);
                }
                ResultNode::Sketch(a)
            }
            (lhs, _) => {
                self.fail();
                lhs
            }
        }
    }

    fn merge_interior(
        &mut self,
        mut lhs: HashMap<String, ResultNode>,
        mut rhs: HashMap<String, ResultNode>,
    ) -> ResultNode {
        if self.agg.shape() == ShapePolicy::Strict
            && (lhs.len() != rhs.len() || lhs.keys().any(|k| !rhs.contains_key(k)))
        {
            self.fail();
            return ResultNode::Interior(lhs);
        }

        self.depth += 1;
        let mut out = HashMap::with_capacity(lhs.len().max(rhs.len()));
        for (key, left) in lhs.drain() {
            match rhs.remove(&key) {
                Some(right) => {
                    let merged = self.run(left, right);
                    if self.err.is_some() {
                        self.depth -= 1;
                        return ResultNode::Interior(out);
                    }
                    out.insert(key, merged);
                }
                // lenient: one-sided subtrees pass through unchanged
                None => {
                    out.insert(key, left);
                }
            }
        }
        for (key, right) in rhs {
            out.insert(key, right);
        }
        self.depth -= 1;
        ResultNode::Interior(out)
    }

    fn merge_number(&mut self, a: f64, b: f64) -> ResultNode {
        let merged = match self.agg {
            AggType::Sum | AggType::Count => a + b,
            AggType::Min => a.min(b),
            AggType::Max => a.max(b),
            // avg needs [sum, count] pairs, hll needs sketches
            AggType::Avg | AggType::Hll => {
                self.fail();
                a
            }
        };
        ResultNode::Number(merged)
    }

    fn fail(&mut self) {
        if self.err.is_none() {
            self.err = Some(Error::ShapeMismatch(format!(
                "at depth {}: {}",
                self.depth,
                self.agg.mismatch_hint()
            )));
        }
    }

    fn fail_with(&mut self, e: Error) {
        if self.err.is_none() {
            self.err = Some(e);
        }
    }
}
