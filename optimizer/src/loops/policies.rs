use graph::{ControlFlowGraph, Graph, NodeId, NodeKind};
use log::trace;
use utils::LoopOptions;

use super::loop_ex::LoopEx;

/// Decides which loops are worth transforming.
pub trait LoopPolicies {
	fn should_peel(&self, graph: &Graph, cfg: &ControlFlowGraph, lx: &mut LoopEx) -> bool;
	fn should_full_unroll(&self, graph: &Graph, lx: &mut LoopEx) -> bool;
	fn should_try_unswitch(&self, graph: &Graph, lx: &LoopEx) -> bool;
	fn should_unswitch(
		&self,
		graph: &Graph,
		cfg: &ControlFlowGraph,
		lx: &mut LoopEx,
		splits: &[NodeId],
	) -> bool;
}

/// Size and frequency budgets driven by `LoopOptions`.
pub struct DefaultLoopPolicies {
	options: LoopOptions,
}

impl DefaultLoopPolicies {
	pub fn new(options: LoopOptions) -> Self {
		Self { options }
	}

	pub fn options(&self) -> &LoopOptions {
		&self.options
	}

	/// Copies of the loop body an unswitch of `split` produces beyond the
	/// original: successors ending straight in a trap cost nothing.
	fn unswitch_copies(graph: &Graph, split: NodeId) -> usize {
		let live = graph
			.succs(split)
			.iter()
			.flatten()
			.filter(|&&succ| !Self::ends_in_trap(graph, succ))
			.count();
		live.saturating_sub(1).max(1)
	}

	fn ends_in_trap(graph: &Graph, begin: NodeId) -> bool {
		let mut current = Some(begin);
		while let Some(node) = current {
			match graph.kind(node) {
				NodeKind::Trap => return true,
				kind if kind.succ_slots() == 1 => current = graph.next(node),
				_ => return false,
			}
		}
		false
	}
}

impl LoopPolicies for DefaultLoopPolicies {
	fn should_peel(&self, graph: &Graph, cfg: &ControlFlowGraph, lx: &mut LoopEx) -> bool {
		let Ok(entry) = lx.entry_probability(graph, cfg) else {
			return false;
		};
		if entry <= self.options.minimum_peel_probability {
			return false;
		}
		let size = lx.size(graph);
		if size + graph.node_count() >= self.options.maximum_desired_size {
			return false;
		}
		lx.can_duplicate_loop(graph)
	}

	fn should_full_unroll(&self, graph: &Graph, lx: &mut LoopEx) -> bool {
		if !lx.detect_counted(graph) {
			return false;
		}
		let Some(max_trips) = lx.constant_max_trip_count(graph) else {
			return false;
		};
		let exact = lx.constant_exact_trip_count(graph).is_some();
		let max_nodes = if exact {
			self.options.exact_full_unroll_max_nodes
		} else {
			self.options.full_unroll_max_nodes
		}
		.min(self.options.remaining_size(graph.node_count()));
		let phis = graph.phis(lx.loop_begin()).len();
		let size = lx.size(graph).saturating_sub(1 + phis).max(1);
		trace!(
			"full unroll of {}: {} trips, body {} nodes, budget {}",
			lx.loop_begin(),
			max_trips,
			size,
			max_nodes
		);
		if max_trips > self.options.full_unroll_max_iterations {
			return false;
		}
		let grown = (size as u128) * (max_trips.saturating_sub(1) as u128);
		grown <= max_nodes as u128 && lx.can_duplicate_loop(graph)
	}

	fn should_try_unswitch(&self, graph: &Graph, lx: &LoopEx) -> bool {
		lx.loop_frequency(graph) > 1.0 && lx.unswitches(graph) < self.options.loop_max_unswitch
	}

	fn should_unswitch(
		&self,
		graph: &Graph,
		cfg: &ControlFlowGraph,
		lx: &mut LoopEx,
		splits: &[NodeId],
	) -> bool {
		let Some(&first) = splits.first() else {
			return false;
		};
		let mut in_branch_total = 0;
		let mut phis = 0;
		for &split in splits {
			for succ in graph.succs(split).iter().flatten() {
				in_branch_total += lx.nodes_in_loop_branch(graph, cfg, *succ).count();
			}
			let merge = cfg
				.block_for(split)
				.and_then(|block| cfg.block(block).postdominator)
				.map(|block| cfg.block(block).begin);
			if let Some(merge) = merge {
				if graph.kind(merge).is_merge() && !graph.kind(merge).is_loop_begin() {
					phis += graph.phis(merge).len();
				}
			}
		}

		let loop_frequency = lx.loop_frequency(graph);
		let boost = self.options.loop_unswitch_frequency_boost;
		let max_diff = (self.options.loop_unswitch_trivial
			+ (boost * (loop_frequency - 1.0 + phis as f64)).max(0.0) as usize)
			.min(self.options.loop_unswitch_max_increase)
			.min(self.options.remaining_size(graph.node_count()));

		let header_phis = graph.phis(lx.loop_begin()).len();
		let header_states = usize::from(graph.state(lx.loop_begin()).is_some());
		let copies = Self::unswitch_copies(graph, first);
		let actual_diff = lx
			.size(graph)
			.saturating_sub(header_phis + header_states + 1 + in_branch_total)
			* copies;
		trace!(
			"unswitch {} on {:?}: growth {} allowed {}",
			lx.loop_begin(),
			splits,
			actual_diff,
			max_diff
		);
		actual_diff <= max_diff && lx.can_duplicate_loop(graph)
	}
}

#[cfg(test)]
mod tests {
	use graph::{Condition, GraphBuilder};
	use test_log::test;

	use super::*;
	use crate::loops::{loop_data::LoopsData, test_utils::*};

	fn full_unroll_accepts(limit: i64, options: &LoopOptions) -> bool {
		let built = simple_loop(&LoopSpec::new(0, limit, 1, Condition::Lt));
		let graph = &built.graph;
		let mut data = LoopsData::new(graph).unwrap();
		let id = data.outer_first()[0];
		DefaultLoopPolicies::new(options.clone()).should_full_unroll(graph, data.get_mut(id))
	}

	#[test]
	fn full_unroll_budget_is_monotone() {
		let options = LoopOptions::default();
		let mut last = true;
		for limit in (0..700).step_by(7) {
			let accepted = full_unroll_accepts(limit, &options);
			assert!(last || !accepted, "accepted {} after rejecting a smaller count", limit);
			last = accepted;
		}
		assert!(full_unroll_accepts(8, &options));
		assert!(!full_unroll_accepts(601, &options));
	}

	#[test]
	fn tighter_budgets_accept_less() {
		let tight = LoopOptions {
			exact_full_unroll_max_nodes: 20,
			..LoopOptions::default()
		};
		assert!(full_unroll_accepts(3, &tight));
		assert!(!full_unroll_accepts(200, &tight));
		let no_room = LoopOptions {
			maximum_desired_size: 10,
			..LoopOptions::default()
		};
		assert!(!full_unroll_accepts(3, &no_room));
	}

	#[test]
	fn peel_needs_a_likely_entry() {
		let mut b = GraphBuilder::new();
		let p = b.int_param(0);
		let zero = b.constant(0);
		let cold = b.compare(Condition::Lt, p, zero);
		let (enter, skip) = b.branch(cold, 0.1);
		b.set_cursor(enter);
		let lb = b.begin_loop(10.0);
		let i = b.phi(lb, vec![zero]);
		let cmp = b.compare(Condition::Lt, i, p);
		let (body, exit) = b.exit_branch(cmp, 0.9, lb, false);
		b.set_cursor(body);
		let one = b.constant(1);
		let next = b.add(i, one);
		b.loop_end(lb);
		b.add_phi_input(i, next);
		b.set_cursor(exit);
		let e1 = b.end();
		b.set_cursor(skip);
		let e2 = b.end();
		b.merge(vec![e1, e2]);
		b.ret(None);
		let graph = b.finish();

		let mut data = LoopsData::new(&graph).unwrap();
		let id = data.outer_first()[0];
		let policies = DefaultLoopPolicies::new(LoopOptions::default());
		let (lx, cfg) = data.split_mut(id);
		assert!(!policies.should_peel(&graph, cfg, lx));

		let built = simple_loop(&LoopSpec::new(0, 10, 1, Condition::Lt));
		let mut data = LoopsData::new(&built.graph).unwrap();
		let (lx, cfg) = data.split_mut(id);
		assert!(policies.should_peel(&built.graph, cfg, lx));
	}

	#[test]
	fn unswitch_is_limited_by_count_and_frequency() {
		let built = invariant_branch_loop(10.0, 0);
		let policies = DefaultLoopPolicies::new(LoopOptions::default());
		let mut data = LoopsData::new(&built.graph).unwrap();
		let id = data.outer_first()[0];
		let (lx, cfg) = data.split_mut(id);
		assert!(policies.should_try_unswitch(&built.graph, lx));
		assert!(policies.should_unswitch(&built.graph, cfg, lx, &[built.split]));

		let built = invariant_branch_loop(10.0, 3);
		let data = LoopsData::new(&built.graph).unwrap();
		assert!(!policies.should_try_unswitch(&built.graph, data.get(id)));

		let built = invariant_branch_loop(1.0, 0);
		let data = LoopsData::new(&built.graph).unwrap();
		assert!(!policies.should_try_unswitch(&built.graph, data.get(id)));
	}

	#[test]
	fn anchored_loops_are_never_transformed() {
		let built = anchored_loop();
		let graph = &built.graph;
		let policies = DefaultLoopPolicies::new(LoopOptions::default());
		let mut data = LoopsData::new(graph).unwrap();
		let id = data.outer_first()[0];
		let (lx, cfg) = data.split_mut(id);
		assert!(!policies.should_peel(graph, cfg, lx));
		assert!(!policies.should_full_unroll(graph, lx));
		assert!(!policies.should_unswitch(graph, cfg, lx, &[built.split]));
	}
}
