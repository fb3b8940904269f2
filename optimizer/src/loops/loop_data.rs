use std::collections::HashMap;

use graph::{ControlFlowGraph, Graph, LoopId, NodeId};
use log::trace;
use utils::Result;

use super::{indvar::IvId, loop_ex::LoopEx};

/// Loop analysis of one graph: the control flow graph and one `LoopEx`
/// per natural loop, indexed like the loops of the control flow graph.
pub struct LoopsData {
	cfg: ControlFlowGraph,
	loops: Vec<LoopEx>,
	by_header: HashMap<NodeId, LoopId>,
}

impl LoopsData {
	pub fn new(graph: &Graph) -> Result<Self> {
		let cfg = ControlFlowGraph::compute(graph)?;
		let loops: Vec<LoopEx> = cfg.loops().iter().map(|lp| LoopEx::new(lp, &cfg)).collect();
		let by_header = loops.iter().map(|lx| (lx.loop_begin(), lx.id())).collect();
		trace!("found {} loops", loops.len());
		Ok(Self {
			cfg,
			loops,
			by_header,
		})
	}

	pub fn cfg(&self) -> &ControlFlowGraph {
		&self.cfg
	}

	pub fn loops(&self) -> &[LoopEx] {
		&self.loops
	}

	pub fn get(&self, id: LoopId) -> &LoopEx {
		&self.loops[id.0]
	}

	pub fn get_mut(&mut self, id: LoopId) -> &mut LoopEx {
		&mut self.loops[id.0]
	}

	/// A loop together with the control flow graph it was computed from.
	pub fn split_mut(&mut self, id: LoopId) -> (&mut LoopEx, &ControlFlowGraph) {
		(&mut self.loops[id.0], &self.cfg)
	}

	pub fn loop_for_header(&self, header: NodeId) -> Option<LoopId> {
		self.by_header.get(&header).copied()
	}

	/// Loops ordered so that every loop comes before the loops nested in it.
	pub fn outer_first(&self) -> Vec<LoopId> {
		let mut ids: Vec<LoopId> = self.loops.iter().map(|lx| lx.id()).collect();
		ids.sort_by_key(|&id| self.loops[id.0].depth());
		ids
	}

	/// Loops ordered so that nested loops come before their parents.
	pub fn inner_first(&self) -> Vec<LoopId> {
		let mut ids: Vec<LoopId> = self.loops.iter().map(|lx| lx.id()).collect();
		ids.sort_by_key(|&id| std::cmp::Reverse(self.loops[id.0].depth()));
		ids
	}

	pub fn detect_counted_loops(&mut self, graph: &Graph) {
		for lx in self.loops.iter_mut() {
			lx.detect_counted(graph);
		}
	}

	pub fn counted_loops(&self) -> Vec<LoopId> {
		self
			.loops
			.iter()
			.filter(|lx| lx.is_counted())
			.map(|lx| lx.id())
			.collect()
	}

	/// The loop and variable `node` is an induction variable of, if it is
	/// one in exactly one loop.
	pub fn get_induction_variable(&mut self, graph: &Graph, node: NodeId) -> Option<(LoopId, IvId)> {
		let mut found = None;
		for lx in self.loops.iter_mut() {
			if let Some(iv) = lx.induction_variables(graph).get(node) {
				if found.is_some() {
					return None;
				}
				found = Some((lx.id(), iv));
			}
		}
		found
	}

	/// Drops helper nodes materialized by any loop's induction variables.
	pub fn delete_unused_nodes(&mut self, graph: &mut Graph) {
		for lx in self.loops.iter_mut() {
			if let Some(mut ivs) = lx.take_ivs() {
				ivs.delete_unused_nodes(graph);
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use graph::{Condition, GraphBuilder};
	use test_log::test;

	use super::*;
	use crate::loops::test_utils::*;

	fn nested() -> (Graph, NodeId, NodeId, NodeId) {
		let mut b = GraphBuilder::new();
		let outer = b.begin_loop(10.0);
		let zero = b.constant(0);
		let i = b.phi(outer, vec![zero]);
		let four = b.constant(4);
		let c1 = b.compare(Condition::Lt, i, four);
		let (outer_body, outer_exit) = b.exit_branch(c1, 0.8, outer, false);
		b.set_cursor(outer_body);
		let inner = b.begin_loop(5.0);
		let j = b.phi(inner, vec![zero]);
		let c2 = b.compare(Condition::Lt, j, i);
		let (inner_body, inner_exit) = b.exit_branch(c2, 0.8, inner, false);
		b.set_cursor(inner_body);
		b.emit(j);
		let one = b.constant(1);
		let j1 = b.add(j, one);
		b.loop_end(inner);
		b.add_phi_input(j, j1);
		b.set_cursor(inner_exit);
		let i1 = b.add(i, one);
		b.loop_end(outer);
		b.add_phi_input(i, i1);
		b.set_cursor(outer_exit);
		b.ret(None);
		(b.finish(), outer, inner, j)
	}

	#[test]
	fn orders_by_nesting() {
		let (graph, outer, inner, _) = nested();
		let data = LoopsData::new(&graph).unwrap();
		let outer_id = data.loop_for_header(outer).unwrap();
		let inner_id = data.loop_for_header(inner).unwrap();
		assert_eq!(data.outer_first(), vec![outer_id, inner_id]);
		assert_eq!(data.inner_first(), vec![inner_id, outer_id]);
		assert_eq!(data.get(inner_id).parent(), Some(outer_id));
	}

	#[test]
	fn counted_loops_and_variables() {
		let (graph, outer, inner, j) = nested();
		let mut data = LoopsData::new(&graph).unwrap();
		data.detect_counted_loops(&graph);
		let counted = data.counted_loops();
		assert_eq!(counted.len(), 2);
		let inner_id = data.loop_for_header(inner).unwrap();
		let (lp, _) = data.get_induction_variable(&graph, j).unwrap();
		assert_eq!(lp, inner_id);
		assert!(data.loop_for_header(outer).is_some());
	}

	#[test]
	fn single_loop_lookup() {
		let built = simple_loop(&LoopSpec::new(0, 3, 1, Condition::Lt));
		let mut data = LoopsData::new(&built.graph).unwrap();
		assert_eq!(data.loops().len(), 1);
		assert!(data.get_induction_variable(&built.graph, built.limit).is_none());
		assert!(data.get_induction_variable(&built.graph, built.iv).is_some());
	}
}
