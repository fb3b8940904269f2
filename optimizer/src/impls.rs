use graph::{Graph, NodeId};
use log::debug;
use utils::{LoopOptions, Result};

use crate::{loops::LoopsData, LoopFullUnroll, LoopOptimizer, LoopPeeling, LoopUnswitch, Optimizer};

impl Optimizer {
	pub fn new(options: LoopOptions) -> Self {
		Self { options }
	}

	pub fn options(&self) -> &LoopOptions {
		&self.options
	}

	pub fn apply(self, graph: &mut Graph) -> Result<bool> {
		// 先把不变量聚到一起，外提分支时条件更容易被识别为不变量
		let mut changed = reassociate_all(graph)?;

		// 剥离只做一次，否则每轮都会再剥一层
		if self.options.peel {
			changed |= LoopPeeling::new(self.options.clone()).apply(graph)?;
		}
		loop {
			let mut flag = false;
			if self.options.full_unroll {
				flag |= LoopFullUnroll::new(self.options.clone()).apply(graph)?;
			}
			if self.options.unswitch {
				flag |= LoopUnswitch::new(self.options.clone()).apply(graph)?;
			}
			changed |= flag;
			if !flag {
				break;
			}
		}
		debug!("loop pipeline done, {} nodes left", graph.node_count());
		Ok(changed)
	}
}

fn reassociate_all(graph: &mut Graph) -> Result<bool> {
	let data = LoopsData::new(graph)?;
	let headers: Vec<NodeId> =
		data.outer_first().into_iter().map(|id| data.get(id).loop_begin()).collect();
	let mut count = 0;
	for header in headers {
		let mut data = LoopsData::new(graph)?;
		if let Some(id) = data.loop_for_header(header) {
			count += data.get_mut(id).reassociate_invariants(graph);
		}
	}
	Ok(count > 0)
}

#[cfg(test)]
mod tests {
	use graph::{Condition, GraphBuilder};
	use test_log::test;

	use super::*;
	use crate::loops::test_utils::*;

	#[test]
	fn disabled_passes_change_nothing() {
		let built = simple_loop(&LoopSpec::new(0, 4, 1, Condition::Lt));
		let mut graph = built.graph.clone();
		let options = LoopOptions {
			peel: false,
			full_unroll: false,
			unswitch: false,
			..LoopOptions::default()
		};
		assert!(!Optimizer::new(options).apply(&mut graph).unwrap());
		assert_eq!(graph.node_count(), built.graph.node_count());
	}

	#[test]
	fn pipeline_removes_short_loops() {
		let built = invariant_branch_loop(10.0, 0);
		let mut graph = built.graph.clone();
		assert!(Optimizer::default().apply(&mut graph).unwrap());
		assert!(!graph.is_alive(built.split));
		assert!(LoopsData::new(&graph).unwrap().loops().is_empty());
		assert_equivalent(&built.graph, &graph, 1, 21);
	}

	#[test]
	fn parameter_bounded_loops_survive() {
		// while (i < n) { emit(i); i += 2 } with an unknown n
		let mut b = GraphBuilder::new();
		let n = b.int_param(0);
		let zero = b.constant(0);
		let lb = b.begin_loop(50.0);
		let i = b.phi(lb, vec![zero]);
		let cmp = b.compare(Condition::Lt, i, n);
		let (body, exit) = b.exit_branch(cmp, 0.98, lb, false);
		b.set_cursor(body);
		b.emit(i);
		let two = b.constant(2);
		let next = b.add(i, two);
		b.loop_end(lb);
		b.add_phi_input(i, next);
		b.set_cursor(exit);
		b.ret(None);
		let reference = b.finish();

		let mut graph = reference.clone();
		assert!(Optimizer::default().apply(&mut graph).unwrap());
		assert_eq!(LoopsData::new(&graph).unwrap().loops().len(), 1);
		assert_equivalent(&reference, &graph, 1, 13);
	}
}
