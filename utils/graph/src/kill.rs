use std::collections::HashSet;

use log::trace;
use utils::{malformed, Result};

use crate::{
	graph::Graph,
	node::{NodeId, NodeKind},
};

impl Graph {
	/// Kills `node` and then every floating input left without usages.
	pub fn kill_with_unused_floating_inputs(&mut self, node: NodeId) {
		let mut worklist = vec![node];
		while let Some(id) = worklist.pop() {
			if !self.is_alive(id) || self.has_usages(id) {
				continue;
			}
			let inputs: Vec<NodeId> = self.node(id).input_edges().collect();
			self.kill(id);
			for input in inputs {
				if self.is_alive(input)
					&& !self.kind(input).is_fixed()
					&& !self.has_usages(input)
				{
					worklist.push(input);
				}
			}
		}
	}

	/// Kills the control-flow region reachable from `node`.
	///
	/// Merges that lose ends are kept while they still have one. A merge
	/// left with a single end is folded into straight-line control and a
	/// loop left without back edges is turned back into plain control.
	pub fn kill_cfg(&mut self, node: NodeId) -> Result<()> {
		self.replace_at_predecessor(node, None);
		let mut dead: Vec<NodeId> = Vec::new();
		let mut marked: HashSet<NodeId> = HashSet::new();
		let mut touched: Vec<NodeId> = Vec::new();
		let mut detached: Vec<NodeId> = Vec::new();
		let mut stack = vec![node];
		while let Some(id) = stack.pop() {
			if !self.is_alive(id) || !marked.insert(id) {
				continue;
			}
			dead.push(id);
			if self.kind(id).is_end() {
				let Some(merge) = self.merge_of_end(id) else {
					continue;
				};
				if marked.contains(&merge) {
					continue;
				}
				detached.extend(self.remove_end(merge, id)?);
				let left = match self.kind(merge) {
					NodeKind::LoopBegin { .. } => self.forward_ends(merge).len(),
					_ => self.inputs(merge).len(),
				};
				if left == 0 {
					stack.push(merge);
				} else {
					touched.push(merge);
				}
				continue;
			}
			stack.extend(self.succs(id).iter().flatten().copied());
		}

		let mut floating: Vec<NodeId> = Vec::new();
		for &id in dead.iter() {
			match self.kind(id) {
				kind if kind.is_merge() => floating.extend(self.phis(id)),
				NodeKind::LoopExit => floating.extend(self.proxies(id)),
				_ => {}
			}
		}
		let mut candidates: Vec<NodeId> = detached;
		for &id in dead.iter().chain(floating.iter()) {
			candidates.extend(self.node(id).input_edges());
			self.clear_inputs(id);
			self.clear_succs(id);
		}
		for &id in floating.iter() {
			self.kill_with_unused_floating_inputs(id);
		}
		for candidate in candidates {
			if self.is_alive(candidate) && !self.kind(candidate).is_fixed() {
				self.kill_with_unused_floating_inputs(candidate);
			}
		}
		for &id in floating.iter() {
			if self.is_alive(id) {
				self.kill_orphaned_users(id);
			}
		}
		for &id in dead.iter() {
			trace!("kill_cfg: {}", id);
			self.kill(id);
		}

		for merge in touched {
			if !self.is_alive(merge) {
				continue;
			}
			match self.kind(merge) {
				NodeKind::LoopBegin { .. } => {
					if self.loop_ends(merge).is_empty() {
						self.remove_loop_structure(merge)?;
					}
				}
				_ => {
					if self.inputs(merge).len() == 1 {
						self.reduce_single_end_merge(merge)?;
					}
				}
			}
		}
		Ok(())
	}

	/// Kills `root` and every floating node computed from it when no fixed
	/// node depends on any of them. Used for phis and proxies of a dead
	/// region whose values only fed other values of that region.
	fn kill_orphaned_users(&mut self, root: NodeId) {
		let mut closure: Vec<NodeId> = Vec::new();
		let mut seen: HashSet<NodeId> = HashSet::new();
		let mut stack = vec![root];
		while let Some(id) = stack.pop() {
			if !seen.insert(id) {
				continue;
			}
			for usage in self.distinct_usages(id) {
				if self.kind(usage).is_fixed() {
					trace!("kill_cfg: {} still reaches {}", root, usage);
					return;
				}
				stack.push(usage);
			}
			closure.push(id);
		}
		let mut inputs: Vec<NodeId> = Vec::new();
		for &id in closure.iter() {
			inputs.extend(self.node(id).input_edges());
			self.clear_inputs(id);
		}
		for &id in closure.iter() {
			trace!("kill_cfg: orphan {}", id);
			self.kill(id);
		}
		for input in inputs {
			if self.is_alive(input) && !self.kind(input).is_fixed() {
				self.kill_with_unused_floating_inputs(input);
			}
		}
	}

	/// Replaces a merge that has one end left by straight-line control.
	pub fn reduce_single_end_merge(&mut self, merge: NodeId) -> Result<()> {
		if self.inputs(merge).len() != 1 {
			return malformed(format!("{} does not have a single end", merge));
		}
		for phi in self.phis(merge) {
			let value = self.phi_value_at(phi, 0);
			self.replace_at_usages(phi, value);
			self.kill_with_unused_floating_inputs(phi);
		}
		let end = self.input(merge, 0);
		let next = self.next(merge);
		self.set_next(merge, None);
		self.clear_inputs(merge);
		self.replace_at_predecessor(end, next);
		self.kill(end);
		self.kill(merge);
		Ok(())
	}

	/// Turns a loop without back edges into plain control flow. Proxies are
	/// bypassed and every exit becomes a begin node.
	pub fn remove_loop_structure(&mut self, loop_begin: NodeId) -> Result<()> {
		if !self.loop_ends(loop_begin).is_empty() {
			return malformed(format!("{} still has back edges", loop_begin));
		}
		for exit in self.loop_exits(loop_begin) {
			for proxy in self.proxies(exit) {
				let value = self.input(proxy, 0);
				self.replace_at_usages(proxy, value);
				self.kill(proxy);
			}
			let begin = self.add_fixed(NodeKind::Begin, vec![]);
			let next = self.next(exit);
			self.set_next(exit, None);
			self.replace_at_predecessor(exit, Some(begin));
			self.set_next(begin, next);
			self.kill(exit);
		}

		let forward = self.forward_ends(loop_begin);
		let next = self.next(loop_begin);
		self.set_next(loop_begin, None);
		if forward.len() == 1 {
			for phi in self.phis(loop_begin) {
				let value = self.phi_value_at(phi, 0);
				self.replace_at_usages(phi, value);
				self.kill_with_unused_floating_inputs(phi);
			}
			self.clear_inputs(loop_begin);
			self.replace_at_predecessor(forward[0], next);
			self.kill(forward[0]);
		} else {
			let merge = self.add_fixed(NodeKind::Merge, forward);
			for phi in self.phis(loop_begin) {
				self.set_input(phi, 0, merge);
			}
			let state = self.state(loop_begin);
			self.set_state(merge, state);
			self.set_next(merge, next);
			self.clear_inputs(loop_begin);
		}
		self.kill(loop_begin);
		Ok(())
	}

	/// Removes a control split, keeping only `survivor` and killing the
	/// region behind every other successor.
	pub fn remove_split_propagate(
		&mut self,
		split: NodeId,
		survivor: NodeId,
	) -> Result<()> {
		if !self.succs(split).contains(&Some(survivor)) {
			return malformed(format!("{} is not a successor of {}", survivor, split));
		}
		let mut others: Vec<NodeId> = Vec::new();
		for succ in self.succs(split).iter().flatten() {
			if *succ != survivor && !others.contains(succ) {
				others.push(*succ);
			}
		}
		self.clear_succs(split);
		self.replace_at_predecessor(split, Some(survivor));
		for other in others {
			if self.is_alive(other) {
				self.kill_cfg(other)?;
			}
		}
		let inputs: Vec<NodeId> = self.node(split).input_edges().collect();
		self.clear_inputs(split);
		self.kill(split);
		for input in inputs {
			if self.is_alive(input) && !self.kind(input).is_fixed() {
				self.kill_with_unused_floating_inputs(input);
			}
		}
		Ok(())
	}
}
