mod loop_full_unroll;
mod loop_peeling;
mod loop_unswitch;

pub mod impls;
pub mod loops;

use graph::Graph;
use utils::{LoopOptions, Result};

pub use loop_full_unroll::LoopFullUnroll;
pub use loop_peeling::LoopPeeling;
pub use loop_unswitch::LoopUnswitch;

pub trait LoopOptimizer {
	fn new(options: LoopOptions) -> Self;
	fn apply(self, graph: &mut Graph) -> Result<bool>;
}

/// Runs the loop passes enabled in its options until none applies.
#[derive(Default)]
pub struct Optimizer {
	options: LoopOptions,
}
