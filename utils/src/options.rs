use crate::constants::*;

/// Thresholds consulted by the loop policies.
#[derive(Debug, Clone, PartialEq)]
pub struct LoopOptions {
	pub minimum_peel_probability: f64,
	pub maximum_desired_size: usize,
	pub exact_full_unroll_max_nodes: usize,
	pub full_unroll_max_nodes: usize,
	pub full_unroll_max_iterations: u64,
	pub loop_max_unswitch: u32,
	pub loop_unswitch_max_increase: usize,
	pub loop_unswitch_trivial: usize,
	pub loop_unswitch_frequency_boost: f64,
	pub peel: bool,
	pub full_unroll: bool,
	pub unswitch: bool,
}

impl Default for LoopOptions {
	fn default() -> Self {
		Self {
			minimum_peel_probability: MINIMUM_PEEL_PROBABILITY,
			maximum_desired_size: MAXIMUM_DESIRED_SIZE,
			exact_full_unroll_max_nodes: EXACT_FULL_UNROLL_MAX_NODES,
			full_unroll_max_nodes: FULL_UNROLL_MAX_NODES,
			full_unroll_max_iterations: FULL_UNROLL_MAX_ITERATIONS,
			loop_max_unswitch: LOOP_MAX_UNSWITCH,
			loop_unswitch_max_increase: LOOP_UNSWITCH_MAX_INCREASE,
			loop_unswitch_trivial: LOOP_UNSWITCH_TRIVIAL,
			loop_unswitch_frequency_boost: LOOP_UNSWITCH_FREQUENCY_BOOST,
			peel: true,
			full_unroll: true,
			unswitch: true,
		}
	}
}

impl LoopOptions {
	/// Room left before the graph reaches the desired size cap.
	pub fn remaining_size(&self, node_count: usize) -> usize {
		self.maximum_desired_size.saturating_sub(node_count)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn remaining_size_saturates() {
		let options = LoopOptions::default();
		assert_eq!(options.remaining_size(100), MAXIMUM_DESIRED_SIZE - 100);
		assert_eq!(options.remaining_size(MAXIMUM_DESIRED_SIZE + 5), 0);
	}
}
