use std::collections::HashMap;

use graph::{Graph, GuardsStage, NodeBitMap, NodeId, NodeKind};
use log::{debug, trace};
use utils::{OptError, Result};

use super::{compute_nodes, duplicate_state, FragmentCore, LoopFragment};
use crate::loops::loop_ex::LoopShape;

/// One iteration of the loop body: the whole loop without its header phis
/// and without the proxies that carry values out through the exits.
#[derive(Debug, Clone)]
pub struct LoopFragmentInside {
	core: FragmentCore,
	// header phi -> value it has after the copied iteration
	merged_initializers: HashMap<NodeId, NodeId>,
}

fn clear_state(graph: &Graph, nodes: &mut NodeBitMap, owner: NodeId) {
	let Some(state) = graph.state(owner) else {
		return;
	};
	let shared = graph
		.usages(state)
		.iter()
		.any(|&usage| usage != owner && nodes.is_marked(usage));
	if !shared {
		nodes.clear(state);
	}
}

impl LoopFragment for LoopFragmentInside {
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
		let mut nodes = compute_nodes(graph, &shape.fixed_nodes, exits);
		for phi in graph.phis(shape.loop_begin) {
			nodes.clear(phi);
		}
		clear_state(graph, &mut nodes, shape.loop_begin);
		for &exit in shape.exits.iter() {
			if !graph.is_alive(exit) {
				continue;
			}
			clear_state(graph, &mut nodes, exit);
			for proxy in graph.proxies(exit) {
				nodes.clear(proxy);
			}
		}
		nodes
	}

	/// Header phis stand for their value on loop entry; everything else
	/// maps to its copy when it has one.
	fn prim(&self, graph: &Graph, value: NodeId) -> Result<NodeId> {
		let loop_begin = self.loop_begin();
		if graph.is_phi_at(loop_begin, value) {
			let forward = graph.single_forward_end(loop_begin)?;
			return graph.phi_value_for_end(value, forward);
		}
		Ok(self.duplicated(value).unwrap_or(value))
	}
}

impl LoopFragmentInside {
	pub fn new(shape: LoopShape) -> Self {
		Self {
			core: FragmentCore::original(shape),
			merged_initializers: HashMap::new(),
		}
	}

	pub fn merged_initializers(&self) -> &HashMap<NodeId, NodeId> {
		&self.merged_initializers
	}

	/// Copies one iteration. The copied header becomes a plain `Begin`,
	/// copied exits of this loop become `Begin`s and copied back edges
	/// become `End`s. Nothing is connected yet.
	pub fn duplicate(&mut self, graph: &mut Graph) -> Result<LoopFragmentInside> {
		self.require_original()?;
		let loop_begin = self.loop_begin();
		let nodes = self.nodes(graph).live(graph);

		let mut seen: HashMap<NodeId, NodeId> = HashMap::new();
		let mut map = graph.duplicate_nodes(&nodes, |g, node| {
			let replacement = match g.kind(node) {
				NodeKind::LoopBegin { .. } if node == loop_begin => NodeKind::Begin,
				NodeKind::LoopExit if g.input(node, 0) == loop_begin => NodeKind::Begin,
				NodeKind::LoopEnd if g.input(node, 0) == loop_begin => NodeKind::End,
				_ => return node,
			};
			*seen
				.entry(node)
				.or_insert_with(|| g.add_fixed(replacement, vec![]))
		});
		map.extend(seen);
		trace!("copied one iteration of {}: {} nodes", loop_begin, map.len());

		Ok(LoopFragmentInside {
			core: FragmentCore::duplicate(self.shape().clone(), map),
			merged_initializers: HashMap::new(),
		})
	}

	/// Splices this copied iteration in front of `original`, so it runs
	/// once before the loop is entered.
	pub fn insert_before(
		&mut self,
		graph: &mut Graph,
		original: &mut LoopFragmentInside,
	) -> Result<()> {
		self.require_duplicate()?;
		original.require_original()?;
		let loop_begin = self.loop_begin();

		self.patch_nodes(graph)?;
		let end = self.merge_ends(graph)?;
		self.merge_early_exits(graph)?;
		original.patch_peeling(graph, self)?;

		let entry = self.duplicated(loop_begin).ok_or_else(|| {
			OptError::FragmentState(format!("no copy of {} recorded", loop_begin))
		})?;
		let forward = graph.single_forward_end(loop_begin)?;
		graph.replace_at_predecessor(forward, Some(entry));
		graph.set_next(end, Some(forward));
		debug!("peeled one iteration of {}", loop_begin);
		Ok(())
	}

	/// Copies still refer to header phis of the original; point them at
	/// the entry values instead.
	fn patch_nodes(&mut self, graph: &mut Graph) -> Result<()> {
		let loop_begin = self.loop_begin();
		let copies: Vec<NodeId> = self.nodes(graph).live(graph);
		for &copy in copies.iter() {
			for index in 0..graph.inputs(copy).len() {
				let input = graph.input(copy, index);
				if graph.is_phi_at(loop_begin, input) {
					let value = self.prim(graph, input)?;
					graph.set_input(copy, index, value);
				}
			}
		}
		graph.refresh_stamps(copies);
		Ok(())
	}

	/// Joins the copied back edges. Returns the node the original loop
	/// is entered from afterwards.
	fn merge_ends(&mut self, graph: &mut Graph) -> Result<NodeId> {
		let loop_begin = self.loop_begin();
		let ends: Vec<(NodeId, NodeId)> = graph
			.loop_ends(loop_begin)
			.into_iter()
			.filter_map(|end| self.duplicated(end).map(|copy| (copy, end)))
			.filter(|&(copy, _)| graph.is_alive(copy))
			.collect();
		let phis = graph.phis(loop_begin);
		let arity = graph.inputs(loop_begin).len();
		for &phi in phis.iter() {
			let values = graph.phi_values(phi).len();
			if values != arity {
				return Err(OptError::PhiArity(phi.0, values, arity));
			}
		}

		match ends.as_slice() {
			[] => Err(OptError::FragmentState(format!(
				"no copied back edge of {}",
				loop_begin
			))),
			&[(copy, end)] => {
				let begin = graph.add_fixed(NodeKind::Begin, vec![]);
				graph.replace_at_predecessor(copy, Some(begin));
				graph.kill(copy);
				for &phi in phis.iter() {
					if !graph.has_usages(phi) {
						continue;
					}
					let value = graph.phi_value_for_end(phi, end)?;
					let value = self.prim(graph, value)?;
					self.merged_initializers.insert(phi, value);
				}
				Ok(begin)
			}
			_ => {
				let merge =
					graph.add_fixed(NodeKind::Merge, ends.iter().map(|&(copy, _)| copy).collect());
				let state = graph.state(loop_begin).map(|s| duplicate_state(graph, s));
				graph.set_state(merge, state);
				for &phi in phis.iter() {
					if !graph.has_usages(phi) {
						continue;
					}
					let mut values = vec![merge];
					for &(_, end) in ends.iter() {
						let value = graph.phi_value_for_end(phi, end)?;
						values.push(self.prim(graph, value)?);
					}
					let first = graph.add_floating(NodeKind::Phi, values);
					if let Some(state) = state {
						graph.replace_all_inputs(state, phi, first);
					}
					self.merged_initializers.insert(phi, first);
				}
				Ok(merge)
			}
		}
	}

	/// Rewrites the original loop after `peel` was inserted in front of
	/// it: every header phi is rebuilt with the value after the peeled
	/// iteration as its entry value, and the old phis are removed.
	fn patch_peeling(&mut self, graph: &mut Graph, peel: &mut LoopFragmentInside) -> Result<()> {
		let loop_begin = self.loop_begin();
		let mut to_patch = self.nodes(graph).clone();
		for &exit in self.shape().exits.iter() {
			if !graph.is_alive(exit) {
				continue;
			}
			if let Some(state) = graph.state(exit) {
				to_patch.mark(state);
			}
			for proxy in graph.proxies(exit) {
				to_patch.mark(proxy);
			}
		}
		if let Some(state) = graph.state(loop_begin) {
			to_patch.mark(state);
		}

		let old_phis = graph.phis(loop_begin);
		let loop_ends = graph.loop_ends(loop_begin);
		let mut new_phis = Vec::new();
		for &phi in old_phis.iter() {
			if !graph.has_usages(phi) {
				continue;
			}
			let first = match peel.merged_initializers.get(&phi) {
				Some(&first) => first,
				None => match loop_ends.as_slice() {
					&[end] => {
						let value = graph.phi_value_for_end(phi, end)?;
						peel.prim(graph, value)?
					}
					_ => {
						return Err(OptError::FragmentState(format!(
							"no entry value for {} after peeling",
							phi
						)))
					}
				},
			};
			let mut inputs = vec![loop_begin, first];
			for &end in loop_ends.iter() {
				inputs.push(graph.phi_value_for_end(phi, end)?);
			}
			let stamp = *graph.stamp(phi);
			let new_phi = graph.add_node(NodeKind::Phi, stamp, inputs);
			peel.put_duplicated(phi, new_phi)?;
			new_phis.push(new_phi);
			graph.replace_at_matching_usages(phi, new_phi, |_, usage| to_patch.is_marked(usage));
		}

		// back values may be old phis themselves
		for &new_phi in new_phis.iter() {
			for index in 0..graph.phi_values(new_phi).len() {
				let value = graph.phi_value_at(new_phi, index);
				if graph.is_phi_at(loop_begin, value) && old_phis.contains(&value) {
					if let Some(replacement) = peel.duplicated(value) {
						graph.set_input(new_phi, index + 1, replacement);
					}
				}
			}
		}

		let mut dead = old_phis;
		loop {
			let before = dead.len();
			let snapshot = dead.clone();
			dead.retain(|&phi| {
				graph
					.usages(phi)
					.iter()
					.all(|usage| snapshot.contains(usage))
			});
			if dead.len() == before {
				break;
			}
		}
		for &phi in dead.iter() {
			graph.clear_inputs(phi);
		}
		for &phi in dead.iter() {
			graph.kill_with_unused_floating_inputs(phi);
		}
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use graph::{interp::execute, Condition};
	use test_log::test;

	use super::*;
	use crate::loops::{loop_data::LoopsData, test_utils::*};

	#[test]
	fn inside_excludes_header_phis_and_proxies() {
		let built = simple_loop(&LoopSpec::new(0, 5, 1, Condition::Lt));
		let graph = &built.graph;
		let mut data = LoopsData::new(graph).unwrap();
		let lx = data.get_mut(data.outer_first()[0]);
		let inside = lx.inside();
		assert!(!inside.contains(graph, built.iv));
		assert!(!inside.contains(graph, built.result));
		assert!(inside.contains(graph, built.increment));
		assert!(inside.contains(graph, built.compare));
	}

	#[test]
	fn copied_values_read_entry_values() {
		let built = simple_loop(&LoopSpec::new(3, 5, 1, Condition::Lt));
		let mut graph = built.graph;
		let mut data = LoopsData::new(&graph).unwrap();
		let lx = data.get_mut(data.outer_first()[0]);
		let original = lx.inside();
		let mut copy = original.duplicate(&mut graph).unwrap();
		copy.patch_nodes(&mut graph).unwrap();
		let increment = copy.duplicated(built.increment).unwrap();
		assert_eq!(graph.as_constant(increment), Some(4));
		let compare = copy.duplicated(built.compare).unwrap();
		assert!(!graph.inputs(compare).contains(&built.iv));
	}

	#[test]
	fn peeled_loop_behaves_the_same() {
		let built = simple_loop(&LoopSpec::new(0, 5, 1, Condition::Lt));
		let mut graph = built.graph;
		let reference = graph.clone();
		let mut data = LoopsData::new(&graph).unwrap();
		let lx = data.get_mut(data.outer_first()[0]);
		let original = lx.inside();
		let mut copy = original.duplicate(&mut graph).unwrap();
		copy.insert_before(&mut graph, original).unwrap();
		assert!(!graph.is_alive(built.iv));
		assert_eq!(
			execute(&reference, vec![]).unwrap(),
			execute(&graph, vec![]).unwrap()
		);
	}
}
