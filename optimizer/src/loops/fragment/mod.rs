use std::collections::HashMap;

use graph::{Graph, NodeBitMap, NodeId, NodeKind};
use utils::{OptError, Result};

use super::loop_ex::LoopShape;

pub mod inside;
pub mod whole;

pub use inside::LoopFragmentInside;
pub use whole::LoopFragmentWhole;

/// State shared by both fragment kinds.
///
/// An original fragment describes nodes of an existing loop. A duplicate
/// fragment additionally owns the map from every original node to its
/// copy; its node set is the set of copies.
#[derive(Debug, Clone)]
pub struct FragmentCore {
	shape: LoopShape,
	nodes: Option<NodeBitMap>,
	duplication: Option<HashMap<NodeId, NodeId>>,
}

impl FragmentCore {
	pub(crate) fn original(shape: LoopShape) -> Self {
		Self {
			shape,
			nodes: None,
			duplication: None,
		}
	}

	pub(crate) fn duplicate(shape: LoopShape, map: HashMap<NodeId, NodeId>) -> Self {
		let nodes = map.values().copied().collect();
		Self {
			shape,
			nodes: Some(nodes),
			duplication: Some(map),
		}
	}
}

pub trait LoopFragment {
	fn core(&self) -> &FragmentCore;
	fn core_mut(&mut self) -> &mut FragmentCore;

	/// Node set of an original fragment, computed from the current graph.
	fn compute_nodes(&self, graph: &Graph) -> NodeBitMap;

	/// Maps a value of the original loop to the value the duplicate should
	/// use in its place.
	fn prim(&self, graph: &Graph, value: NodeId) -> Result<NodeId>;

	fn shape(&self) -> &LoopShape {
		&self.core().shape
	}

	fn loop_begin(&self) -> NodeId {
		self.core().shape.loop_begin
	}

	fn is_duplicate(&self) -> bool {
		self.core().duplication.is_some()
	}

	fn nodes(&mut self, graph: &Graph) -> &NodeBitMap {
		if self.core().nodes.is_none() {
			let nodes = self.compute_nodes(graph);
			self.core_mut().nodes = Some(nodes);
		}
		self.core_mut().nodes.get_or_insert_with(NodeBitMap::default)
	}

	fn contains(&mut self, graph: &Graph, node: NodeId) -> bool {
		self.nodes(graph).is_marked(node)
	}

	fn duplicated(&self, original: NodeId) -> Option<NodeId> {
		self.core().duplication.as_ref()?.get(&original).copied()
	}

	fn put_duplicated(&mut self, original: NodeId, copy: NodeId) -> Result<()> {
		match self.core_mut().duplication.as_mut() {
			Some(map) => {
				map.insert(original, copy);
				Ok(())
			}
			None => Err(OptError::FragmentState(format!(
				"cannot record a copy of {} in an original fragment",
				original
			))),
		}
	}

	fn require_duplicate(&self) -> Result<()> {
		if self.is_duplicate() {
			Ok(())
		} else {
			Err(OptError::FragmentState(format!(
				"fragment of {} is not a duplicate",
				self.loop_begin()
			)))
		}
	}

	fn require_original(&self) -> Result<()> {
		if self.is_duplicate() {
			Err(OptError::FragmentState(format!(
				"fragment of {} is already a duplicate",
				self.loop_begin()
			)))
		} else {
			Ok(())
		}
	}

	/// Joins every original loop exit with its copy in a new merge and
	/// turns the values leaving through that exit into phis of the merge.
	fn merge_early_exits(&mut self, graph: &mut Graph) -> Result<()> {
		self.require_duplicate()?;
		let exits = self.shape().exits.clone();
		for exit in exits {
			if !graph.is_alive(exit) {
				continue;
			}
			let Some(new_exit) = self.duplicated(exit) else {
				continue;
			};
			let next = graph.next(exit);
			let original_end = graph.add_fixed(NodeKind::End, vec![]);
			let new_end = graph.add_fixed(NodeKind::End, vec![]);
			graph.set_next(exit, Some(original_end));
			graph.set_next(new_exit, Some(new_end));
			let merge = graph.add_fixed(NodeKind::Merge, vec![original_end, new_end]);
			graph.set_next(merge, next);

			let mut state_copy = None;
			if let Some(state) = graph.state(exit) {
				let copy = duplicate_state(graph, state);
				graph.set_state(exit, Some(copy));
				graph.set_state(merge, Some(state));
				state_copy = Some(copy);
			}

			let new_is_exit = matches!(graph.kind(new_exit), NodeKind::LoopExit);
			for proxy in graph.proxies(exit) {
				if !graph.has_usages(proxy) {
					continue;
				}
				let source = if new_is_exit {
					proxy
				} else {
					graph.input(proxy, 0)
				};
				let new_value = self.prim(graph, source)?;
				let phi = graph.add_floating(NodeKind::Phi, vec![merge, proxy, new_value]);
				graph.replace_at_matching_usages(proxy, phi, |g, usage| {
					usage != phi
						&& Some(usage) != state_copy
						&& !(matches!(g.kind(usage), NodeKind::Proxy) && g.input(usage, 1) == exit)
				});
			}
		}
		Ok(())
	}
}

/// Shallow copy of a frame state; the copy refers to the same values.
pub(crate) fn duplicate_state(graph: &mut Graph, state: NodeId) -> NodeId {
	let kind = graph.kind(state).clone();
	let stamp = *graph.stamp(state);
	let values = graph.inputs(state).to_vec();
	graph.add_node(kind, stamp, values)
}

/// Marks `fixed` and `exits` with their phis, proxies and states, then
/// every floating node computed from a marked node that is itself used by
/// a marked node. Invariant expressions stay unmarked.
pub(crate) fn compute_nodes(graph: &Graph, fixed: &[NodeId], exits: &[NodeId]) -> NodeBitMap {
	let mut nodes = NodeBitMap::new(graph);
	for &node in fixed.iter().chain(exits.iter()) {
		if !graph.is_alive(node) {
			continue;
		}
		nodes.mark(node);
		if let Some(state) = graph.state(node) {
			nodes.mark(state);
		}
		match graph.kind(node) {
			kind if kind.is_merge() => {
				for phi in graph.phis(node) {
					nodes.mark(phi);
				}
			}
			NodeKind::LoopExit => {
				for proxy in graph.proxies(node) {
					nodes.mark(proxy);
				}
			}
			_ => {}
		}
	}

	let mut non_loop = NodeBitMap::new(graph);
	let seeds: Vec<NodeId> = nodes.iter().collect();
	for node in seeds {
		for usage in graph.distinct_usages(node) {
			mark_floating(graph, usage, &mut nodes, &mut non_loop);
		}
	}
	nodes
}

fn classify(
	graph: &Graph,
	node: NodeId,
	loop_nodes: &NodeBitMap,
	non_loop: &NodeBitMap,
) -> Option<bool> {
	if loop_nodes.is_marked(node) {
		return Some(true);
	}
	if non_loop.is_marked(node) {
		return Some(false);
	}
	let kind = graph.kind(node);
	if kind.is_fixed()
		|| matches!(kind, NodeKind::Phi | NodeKind::Proxy | NodeKind::FrameState(_))
	{
		return Some(false);
	}
	None
}

struct Visit {
	node: NodeId,
	usages: Vec<NodeId>,
	next: usize,
	in_loop: bool,
}

impl Visit {
	fn new(graph: &Graph, node: NodeId) -> Self {
		Self {
			node,
			usages: graph.distinct_usages(node),
			next: 0,
			in_loop: false,
		}
	}
}

/// A floating node belongs to the loop when any of its usages does.
/// Iterative so long expression chains cannot overflow the stack.
fn mark_floating(
	graph: &Graph,
	start: NodeId,
	loop_nodes: &mut NodeBitMap,
	non_loop: &mut NodeBitMap,
) {
	if classify(graph, start, loop_nodes, non_loop).is_some() {
		return;
	}
	non_loop.mark(start);
	let mut stack = vec![Visit::new(graph, start)];
	while let Some(top) = stack.last_mut() {
		if top.next < top.usages.len() {
			let usage = top.usages[top.next];
			top.next += 1;
			match classify(graph, usage, loop_nodes, non_loop) {
				Some(true) => top.in_loop = true,
				Some(false) => {}
				None => {
					non_loop.mark(usage);
					stack.push(Visit::new(graph, usage));
				}
			}
			continue;
		}
		let Some(done) = stack.pop() else {
			break;
		};
		if done.in_loop {
			non_loop.clear(done.node);
			loop_nodes.mark(done.node);
			if let Some(parent) = stack.last_mut() {
				parent.in_loop = true;
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use graph::Condition;
	use test_log::test;

	use super::*;
	use crate::loops::{loop_data::LoopsData, test_utils::*};

	#[test]
	fn floating_nodes_follow_their_usages() {
		let built = simple_loop(&LoopSpec::new(0, 10, 1, Condition::Lt));
		let graph = &built.graph;
		let data = LoopsData::new(graph).unwrap();
		let shape = data.get(data.outer_first()[0]).shape().clone();
		let nodes = compute_nodes(graph, &shape.fixed_nodes, &[]);
		assert!(nodes.is_marked(built.iv));
		assert!(nodes.is_marked(built.body));
		assert!(nodes.is_marked(built.compare));
		assert!(nodes.is_marked(built.increment));
		assert!(!nodes.is_marked(built.limit));
		assert!(!nodes.is_marked(built.exit));

		let with_exits = compute_nodes(graph, &shape.fixed_nodes, &shape.exits);
		assert!(with_exits.is_marked(built.exit));
		assert!(with_exits.is_marked(built.result));
	}
}
