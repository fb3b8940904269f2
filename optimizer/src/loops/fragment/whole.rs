use std::collections::HashMap;

use graph::{Graph, GuardsStage, NodeBitMap, NodeId, NodeKind};
use log::debug;
use utils::{OptError, Result};

use super::{compute_nodes, FragmentCore, LoopFragment};
use crate::loops::loop_ex::LoopShape;

/// The complete loop: header, body, back edges and, while guards still
/// float, the exits with their proxies.
#[derive(Debug, Clone)]
pub struct LoopFragmentWhole {
	core: FragmentCore,
}

impl LoopFragment for LoopFragmentWhole {
	fn core(&self) -> &FragmentCore {
		&self.core
	}

	fn core_mut(&mut self) -> &mut FragmentCore {
		&mut self.core
	}

	fn compute_nodes(&self, graph: &Graph) -> NodeBitMap {
		let shape = self.shape();
		let exits: &[NodeId] = match graph.guards_stage {
			GuardsStage::FloatingGuards => &shape.exits,
			GuardsStage::FixedDeopts => &[],
		};
		compute_nodes(graph, &shape.fixed_nodes, exits)
	}

	fn prim(&self, _graph: &Graph, value: NodeId) -> Result<NodeId> {
		Ok(self.duplicated(value).unwrap_or(value))
	}
}

impl LoopFragmentWhole {
	pub fn new(shape: LoopShape) -> Self {
		Self {
			core: FragmentCore::original(shape),
		}
	}

	/// Copies the entire loop. The copy starts at a fresh `End` standing in
	/// for the forward end and leaves through merges shared with the
	/// original exits.
	pub fn duplicate(&mut self, graph: &mut Graph) -> Result<LoopFragmentWhole> {
		self.require_original()?;
		let loop_begin = self.loop_begin();
		let nodes = self.nodes(graph).live(graph);
		let forward = graph.single_forward_end(loop_begin)?;
		let exits_inside = graph.guards_stage == GuardsStage::FloatingGuards;

		let mut seen: HashMap<NodeId, NodeId> = HashMap::new();
		let mut map = graph.duplicate_nodes(&nodes, |g, node| {
			let replacement = if node == forward {
				NodeKind::End
			} else if !exits_inside
				&& matches!(g.kind(node), NodeKind::LoopExit)
				&& g.input(node, 0) == loop_begin
			{
				NodeKind::Begin
			} else {
				return node;
			};
			*seen
				.entry(node)
				.or_insert_with(|| g.add_fixed(replacement, vec![]))
		});
		map.extend(seen);
		debug!("duplicated {} nodes of loop {}", map.len(), loop_begin);

		let mut copy = LoopFragmentWhole {
			core: FragmentCore::duplicate(self.shape().clone(), map),
		};
		copy.merge_early_exits(graph)?;
		Ok(copy)
	}

	/// The forward end entering this loop, or entering the copy for a
	/// duplicate.
	pub fn entry_point(&self, graph: &Graph) -> Result<NodeId> {
		let loop_begin = self.loop_begin();
		if !self.is_duplicate() {
			return graph.single_forward_end(loop_begin);
		}
		let copy = self.duplicated(loop_begin).ok_or_else(|| {
			OptError::FragmentState(format!("no copy of {} recorded", loop_begin))
		})?;
		graph.single_forward_end(copy)
	}
}

#[cfg(test)]
mod tests {
	use graph::{interp::execute, Condition, GraphBuilder, NodeKind};
	use test_log::test;

	use super::*;
	use crate::loops::{loop_data::LoopsData, test_utils::*};

	#[test]
	fn copies_are_detached_until_entered() {
		let built = simple_loop(&LoopSpec::new(0, 5, 1, Condition::Lt));
		let mut graph = built.graph;
		let reference = graph.clone();
		let mut data = LoopsData::new(&graph).unwrap();
		let id = data.outer_first()[0];
		let whole = data.get_mut(id).whole();
		let copy = whole.duplicate(&mut graph).unwrap();
		assert!(copy.is_duplicate());

		let copied_header = copy.duplicated(built.loop_begin).unwrap();
		assert_ne!(copied_header, built.loop_begin);
		assert!(matches!(graph.kind(copied_header), NodeKind::LoopBegin { .. }));
		let entry = copy.entry_point(&graph).unwrap();
		assert!(matches!(graph.kind(entry), NodeKind::End));
		assert_eq!(graph.pred(entry), None);

		// both exits now meet in a merge in front of the old exit path
		let end = graph.next(built.exit).unwrap();
		let merge = graph.merge_of_end(end).unwrap();
		assert_eq!(graph.inputs(merge).len(), 2);
		assert_eq!(graph.phis(merge).len(), 1);
		assert_eq!(
			execute(&reference, vec![]).unwrap(),
			execute(&graph, vec![]).unwrap()
		);
	}

	#[test]
	fn duplicate_twice_is_rejected() {
		let mut b = GraphBuilder::new();
		let lb = b.begin_loop(2.0);
		let zero = b.constant(0);
		let i = b.phi(lb, vec![zero]);
		let cmp = b.compare(Condition::Lt, i, zero);
		let (body, exit) = b.exit_branch(cmp, 0.5, lb, false);
		b.set_cursor(body);
		let one = b.constant(1);
		let next = b.add(i, one);
		b.loop_end(lb);
		b.add_phi_input(i, next);
		b.set_cursor(exit);
		b.ret(None);
		let mut graph = b.finish();

		let mut data = LoopsData::new(&graph).unwrap();
		let id = data.outer_first()[0];
		let mut copy = data.get_mut(id).whole().duplicate(&mut graph).unwrap();
		assert!(matches!(
			copy.duplicate(&mut graph),
			Err(OptError::FragmentState(_))
		));
	}
}
