//! Shared-memory cache decisions for cache-blocked kernels.

use super::classify::Classification;
use crate::ir::ast::{Expr, Stmt};
use crate::ir::visit::collect_stmt;
use log::debug;

/// Prefix of block-local shared buffers.
pub const SHARED_PREFIX: &str = "shared_";

/// How one array is staged through shared memory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheDecision {
    /// The global array
    pub array: String,
    /// Name of its block-local buffer
    pub shared: String,
    /// Loaded into the buffer before the body runs
    pub read_cached: bool,
    /// Stored back from the buffer after the body runs
    pub write_cached: bool,
}

impl CacheDecision {
    /// Whether the buffer is used at all.
    pub fn is_active(&self) -> bool {
        self.read_cached || self.write_cached
    }
}

/// Decide the caching of every array of the loop.
///
/// An array is staged only when every subscript of it is the bare loop
/// index, i.e. each thread touches exactly its own element; any other
/// access pattern keeps going straight to global memory.
pub fn decide(cls: &Classification, body: &Stmt, enabled: bool) -> Vec<CacheDecision> {
    if !enabled {
        return Vec::new();
    }

    let mut decisions = Vec::new();
    for array in &cls.array_ids {
        let irregular = collect_stmt(body, |e| match e {
            Expr::ArrayRef { array: a, index } if a.is_ident(array) && !index.unparen().is_ident(&cls.index) => {
                Some(())
            }
            _ => None,
        });
        if !irregular.is_empty() {
            debug!("`{}` has subscripts other than `{}`; not cached", array, cls.index);
            continue;
        }

        let decision = CacheDecision {
            array: array.clone(),
            shared: format!("{}{}", SHARED_PREFIX, array),
            read_cached: cls.read_ids.contains(array),
            write_cached: cls.write_ids.contains(array),
        };
        debug_assert!(decision.is_active());
        decisions.push(decision);
    }
    decisions
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::loop_info::LoopDescriptor;
    use crate::ir::ast::BinaryOp;

    fn at(a: &str) -> Expr {
        Expr::ident(a).index(Expr::ident("i"))
    }

    fn decide_for(body: Stmt) -> Vec<CacheDecision> {
        let cls = Classification::of(&LoopDescriptor {
            index: "i".into(),
            bound_op: BinaryOp::Lt,
            upper: Expr::ident("N"),
            body: body.clone(),
        })
        .unwrap();
        decide(&cls, &body, true)
    }

    #[test]
    fn test_axpy_decisions() {
        let body = Stmt::assign(at("y"), Expr::ident("a").mul(at("x")).add(at("y")));
        let d = decide_for(body);
        assert_eq!(d.len(), 2);
        assert_eq!(d[0].array, "y");
        assert_eq!(d[0].shared, "shared_y");
        assert!(d[0].read_cached && d[0].write_cached);
        assert_eq!(d[1].array, "x");
        assert!(d[1].read_cached && !d[1].write_cached);
    }

    #[test]
    fn test_store_only_array_not_read_cached() {
        let d = decide_for(Stmt::assign(at("y"), at("x")));
        assert!(!d[0].read_cached && d[0].write_cached);
    }

    #[test]
    fn test_shifted_subscript_not_cached() {
        let shifted = Expr::ident("x").index(Expr::ident("i").add(Expr::int(1)));
        let d = decide_for(Stmt::assign(at("y"), at("x").add(shifted)));
        assert_eq!(d.iter().map(|d| d.array.as_str()).collect::<Vec<_>>(), vec!["y"]);
    }

    #[test]
    fn test_disabled() {
        let cls = Classification::of(&LoopDescriptor {
            index: "i".into(),
            bound_op: BinaryOp::Lt,
            upper: Expr::ident("N"),
            body: Stmt::assign(at("y"), at("x")),
        })
        .unwrap();
        assert!(decide(&cls, &Stmt::assign(at("y"), at("x")), false).is_empty());
    }
}
