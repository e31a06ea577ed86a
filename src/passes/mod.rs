//! Transformation passes over a whole graph.

mod dne;
#[cfg(feature = "llvm")]
mod inlining;
mod predicate_correlation;
mod unroll;

use crate::core::Graph;
use anyhow::Result;

/// A graph-rewriting pass.
pub trait Transformation {
    fn name(&self) -> &'static str;

    fn run(&mut self, graph: &mut Graph) -> Result<()>;
}

pub use self::dne::DeadNodeElimination;
#[cfg(feature = "llvm")]
pub use self::inlining::FunctionInlining;
pub use self::predicate_correlation::{
    compute_theta_gamma_predicate_correlation, PredicateCorrelation,
    ThetaGammaPredicateCorrelation,
};
pub use self::unroll::{unroll_theta, LoopUnrolling};
