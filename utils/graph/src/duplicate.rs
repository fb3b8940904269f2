use std::collections::{HashMap, HashSet};

use crate::{graph::Graph, node::NodeId};

impl Graph {
	/// Copies `nodes` and rewires the copies among themselves.
	///
	/// `replacement` is asked about every member and about every input or
	/// successor that falls outside the set. Returning the node itself keeps
	/// the default: members are cloned, outside inputs are shared and
	/// outside successors are left unset. Any other node is used in its
	/// place. A member with a replacement gets no inputs; its successors are
	/// carried over when the replacement has the same number of slots.
	pub fn duplicate_nodes<F>(
		&mut self,
		nodes: &[NodeId],
		mut replacement: F,
	) -> HashMap<NodeId, NodeId>
	where
		F: FnMut(&mut Graph, NodeId) -> NodeId,
	{
		let mut map = HashMap::new();
		let mut replaced = HashSet::new();
		for &node in nodes {
			let target = replacement(self, node);
			if target != node {
				replaced.insert(node);
				map.insert(node, target);
			} else {
				let kind = self.kind(node).clone();
				let stamp = *self.stamp(node);
				let copy = self.add_node(kind, stamp, vec![]);
				map.insert(node, copy);
			}
		}

		for &node in nodes {
			let copy = map[&node];
			if !replaced.contains(&node) {
				for index in 0..self.inputs(node).len() {
					let input = self.input(node, index);
					let target = match map.get(&input) {
						Some(&target) => target,
						None => replacement(self, input),
					};
					self.push_input(copy, target);
				}
				if let Some(state) = self.state(node) {
					let target = match map.get(&state) {
						Some(&target) => target,
						None => replacement(self, state),
					};
					self.set_state(copy, Some(target));
				}
			}
			if self.succs(copy).len() != self.succs(node).len() {
				continue;
			}
			for index in 0..self.succs(node).len() {
				let Some(succ) = self.succs(node)[index] else {
					continue;
				};
				let target = match map.get(&succ) {
					Some(&target) => Some(target),
					None => {
						let target = replacement(self, succ);
						(target != succ).then_some(target)
					}
				};
				if target.is_some() {
					self.set_succ(copy, index, target);
				}
			}
		}
		map
	}
}
