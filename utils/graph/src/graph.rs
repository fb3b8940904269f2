use std::{collections::VecDeque, fmt::Display};

use utils::{malformed, OptError, Result, DEFAULT_INT_BITS};

use crate::{
	node::{BinaryOp, ConvertOp, GuardsStage, Node, NodeId, NodeKind},
	stamp::{IntegerStamp, Stamp},
};

/// Arena of nodes forming one sea-of-nodes program graph.
#[derive(Clone)]
pub struct Graph {
	nodes: Vec<Node>,
	start: NodeId,
	live: usize,
	pub guards_stage: GuardsStage,
}

impl Default for Graph {
	fn default() -> Self {
		Self::new()
	}
}

impl Graph {
	pub fn new() -> Self {
		let mut graph = Self {
			nodes: Vec::new(),
			start: NodeId(0),
			live: 0,
			guards_stage: GuardsStage::default(),
		};
		graph.start = graph.add_node(NodeKind::Start, Stamp::Void, vec![]);
		graph
	}

	pub fn start(&self) -> NodeId {
		self.start
	}

	pub fn node(&self, id: NodeId) -> &Node {
		&self.nodes[id.index()]
	}

	pub fn kind(&self, id: NodeId) -> &NodeKind {
		&self.nodes[id.index()].kind
	}

	pub fn stamp(&self, id: NodeId) -> &Stamp {
		&self.nodes[id.index()].stamp
	}

	pub fn int_stamp(&self, id: NodeId) -> Option<IntegerStamp> {
		self.stamp(id).as_int().copied()
	}

	pub fn inputs(&self, id: NodeId) -> &[NodeId] {
		&self.nodes[id.index()].inputs
	}

	pub fn input(&self, id: NodeId, index: usize) -> NodeId {
		self.nodes[id.index()].inputs[index]
	}

	pub fn state(&self, id: NodeId) -> Option<NodeId> {
		self.nodes[id.index()].state
	}

	pub fn succs(&self, id: NodeId) -> &[Option<NodeId>] {
		&self.nodes[id.index()].succs
	}

	pub fn next(&self, id: NodeId) -> Option<NodeId> {
		self.succs(id).first().copied().flatten()
	}

	pub fn usages(&self, id: NodeId) -> &[NodeId] {
		&self.nodes[id.index()].usages
	}

	pub fn has_usages(&self, id: NodeId) -> bool {
		!self.usages(id).is_empty()
	}

	/// Distinct usages in first-seen order.
	pub fn distinct_usages(&self, id: NodeId) -> Vec<NodeId> {
		let mut out: Vec<NodeId> = Vec::new();
		for &usage in self.usages(id) {
			if !out.contains(&usage) {
				out.push(usage);
			}
		}
		out
	}

	pub fn pred(&self, id: NodeId) -> Option<NodeId> {
		self.nodes[id.index()].pred
	}

	pub fn is_alive(&self, id: NodeId) -> bool {
		self.nodes.get(id.index()).map_or(false, |node| node.alive)
	}

	pub fn node_count(&self) -> usize {
		self.live
	}

	/// Upper bound of every id handed out so far; ids at or above a saved
	/// bound belong to nodes created later.
	pub fn id_bound(&self) -> u32 {
		self.nodes.len() as u32
	}

	pub fn live_nodes(&self) -> impl Iterator<Item = NodeId> + '_ {
		self
			.nodes
			.iter()
			.enumerate()
			.filter(|(_, node)| node.alive)
			.map(|(index, _)| NodeId(index as u32))
	}

	pub fn add_node(
		&mut self,
		kind: NodeKind,
		stamp: Stamp,
		inputs: Vec<NodeId>,
	) -> NodeId {
		let id = NodeId(self.nodes.len() as u32);
		self.nodes.push(Node::new(kind, stamp));
		self.live += 1;
		for input in inputs {
			self.push_input(id, input);
		}
		id
	}

	pub fn add_fixed(&mut self, kind: NodeKind, inputs: Vec<NodeId>) -> NodeId {
		debug_assert!(kind.is_fixed());
		self.add_node(kind, Stamp::Void, inputs)
	}

	/// Adds a data node whose stamp is inferred from its inputs.
	pub fn add_floating(
		&mut self,
		kind: NodeKind,
		inputs: Vec<NodeId>,
	) -> NodeId {
		let stamp = self.infer_stamp(&kind, &inputs);
		self.add_node(kind, stamp, inputs)
	}

	pub fn constant(&mut self, value: i64) -> NodeId {
		self.constant_with_bits(value, DEFAULT_INT_BITS)
	}

	pub fn constant_with_bits(&mut self, value: i64, bits: u32) -> NodeId {
		let stamp = IntegerStamp::constant(bits, value);
		self.add_node(NodeKind::Constant(stamp.lower), Stamp::Int(stamp), vec![])
	}

	pub fn logic_constant(&mut self, value: bool) -> NodeId {
		self.add_node(NodeKind::Constant(value as i64), Stamp::Logic, vec![])
	}

	pub fn parameter(&mut self, index: u32, stamp: IntegerStamp) -> NodeId {
		self.add_node(NodeKind::Parameter(index), Stamp::Int(stamp), vec![])
	}

	pub fn binary(&mut self, op: BinaryOp, x: NodeId, y: NodeId) -> NodeId {
		self.add_floating(NodeKind::Binary(op), vec![x, y])
	}

	pub fn set_stamp(&mut self, id: NodeId, stamp: Stamp) {
		self.nodes[id.index()].stamp = stamp;
	}

	pub fn set_kind(&mut self, id: NodeId, kind: NodeKind) {
		debug_assert_eq!(
			self.kind(id).succ_slots(),
			kind.succ_slots(),
			"kind change must keep the successor layout"
		);
		self.nodes[id.index()].kind = kind;
	}

	fn add_usage(&mut self, of: NodeId, user: NodeId) {
		self.nodes[of.index()].usages.push(user);
	}

	fn remove_usage(&mut self, of: NodeId, user: NodeId) {
		let usages = &mut self.nodes[of.index()].usages;
		if let Some(pos) = usages.iter().position(|&u| u == user) {
			usages.swap_remove(pos);
		}
	}

	pub fn push_input(&mut self, id: NodeId, value: NodeId) {
		self.nodes[id.index()].inputs.push(value);
		self.add_usage(value, id);
	}

	pub fn insert_input(&mut self, id: NodeId, index: usize, value: NodeId) {
		self.nodes[id.index()].inputs.insert(index, value);
		self.add_usage(value, id);
	}

	pub fn set_input(&mut self, id: NodeId, index: usize, value: NodeId) {
		let old = self.nodes[id.index()].inputs[index];
		if old == value {
			return;
		}
		self.nodes[id.index()].inputs[index] = value;
		self.remove_usage(old, id);
		self.add_usage(value, id);
	}

	pub fn remove_input(&mut self, id: NodeId, index: usize) -> NodeId {
		let old = self.nodes[id.index()].inputs.remove(index);
		self.remove_usage(old, id);
		old
	}

	pub fn replace_first_input(
		&mut self,
		id: NodeId,
		old: NodeId,
		new: NodeId,
	) -> bool {
		if let Some(index) = self.inputs(id).iter().position(|&i| i == old) {
			self.set_input(id, index, new);
			true
		} else if self.state(id) == Some(old) {
			self.set_state(id, Some(new));
			true
		} else {
			false
		}
	}

	/// Rewrites every edge of `id` that targets `old`.
	pub fn replace_all_inputs(&mut self, id: NodeId, old: NodeId, new: NodeId) {
		for index in 0..self.inputs(id).len() {
			if self.input(id, index) == old {
				self.set_input(id, index, new);
			}
		}
		if self.state(id) == Some(old) {
			self.set_state(id, Some(new));
		}
	}

	pub fn set_state(&mut self, id: NodeId, state: Option<NodeId>) {
		let old = self.nodes[id.index()].state;
		if old == state {
			return;
		}
		if let Some(old) = old {
			self.remove_usage(old, id);
		}
		if let Some(state) = state {
			self.add_usage(state, id);
		}
		self.nodes[id.index()].state = state;
	}

	pub fn clear_inputs(&mut self, id: NodeId) {
		let inputs = std::mem::take(&mut self.nodes[id.index()].inputs);
		for input in inputs {
			self.remove_usage(input, id);
		}
		self.set_state(id, None);
	}

	pub fn set_succ(&mut self, id: NodeId, index: usize, succ: Option<NodeId>) {
		if let Some(old) = self.nodes[id.index()].succs[index] {
			if self.nodes[old.index()].pred == Some(id) {
				self.nodes[old.index()].pred = None;
			}
		}
		if let Some(succ) = succ {
			if let Some(prev) = self.pred(succ) {
				if prev != id {
					self.detach_from(prev, succ);
				}
			}
			self.nodes[succ.index()].pred = Some(id);
		}
		self.nodes[id.index()].succs[index] = succ;
	}

	fn detach_from(&mut self, pred: NodeId, succ: NodeId) {
		for slot in self.nodes[pred.index()].succs.iter_mut() {
			if *slot == Some(succ) {
				*slot = None;
			}
		}
	}

	pub fn set_next(&mut self, id: NodeId, next: Option<NodeId>) {
		self.set_succ(id, 0, next);
	}

	pub fn clear_succs(&mut self, id: NodeId) {
		for index in 0..self.succs(id).len() {
			self.set_succ(id, index, None);
		}
	}

	/// Points the predecessor of `old` at `new` instead.
	pub fn replace_at_predecessor(&mut self, old: NodeId, new: Option<NodeId>) {
		if let Some(pred) = self.pred(old) {
			if let Some(index) =
				self.succs(pred).iter().position(|&s| s == Some(old))
			{
				self.set_succ(pred, index, new);
			}
			self.nodes[old.index()].pred = None;
		}
	}

	pub fn replace_at_usages(&mut self, old: NodeId, new: NodeId) {
		self.replace_at_matching_usages(old, new, |_, _| true);
	}

	pub fn replace_at_matching_usages(
		&mut self,
		old: NodeId,
		new: NodeId,
		mut filter: impl FnMut(&Graph, NodeId) -> bool,
	) {
		if old == new {
			return;
		}
		for usage in self.distinct_usages(old) {
			if filter(self, usage) {
				self.replace_all_inputs(usage, old, new);
			}
		}
	}

	/// Removes `id` from the graph. The node must have no usages left.
	pub fn kill(&mut self, id: NodeId) {
		if !self.is_alive(id) {
			return;
		}
		debug_assert!(
			!self.has_usages(id),
			"killing {} which still has usages {:?}",
			id,
			self.usages(id)
		);
		self.clear_inputs(id);
		self.clear_succs(id);
		self.replace_at_predecessor(id, None);
		self.nodes[id.index()].alive = false;
		self.live -= 1;
	}

	pub fn as_constant(&self, id: NodeId) -> Option<i64> {
		match self.kind(id) {
			NodeKind::Constant(value) => Some(*value),
			_ => self.stamp(id).as_int().and_then(|s| s.as_constant()),
		}
	}

	pub fn is_constant(&self, id: NodeId) -> bool {
		self.as_constant(id).is_some()
	}

	/// The merge an end flows into.
	pub fn merge_of_end(&self, end: NodeId) -> Option<NodeId> {
		match self.kind(end) {
			NodeKind::LoopEnd => self.inputs(end).first().copied(),
			NodeKind::End => self
				.usages(end)
				.iter()
				.copied()
				.find(|&u| self.kind(u).is_merge() && self.inputs(u).contains(&end)),
			_ => None,
		}
	}

	pub fn end_index(&self, merge: NodeId, end: NodeId) -> Option<usize> {
		self.inputs(merge).iter().position(|&e| e == end)
	}

	pub fn phis(&self, merge: NodeId) -> Vec<NodeId> {
		let mut phis: Vec<NodeId> = self
			.usages(merge)
			.iter()
			.copied()
			.filter(|&u| {
				matches!(self.kind(u), NodeKind::Phi) && self.input(u, 0) == merge
			})
			.collect();
		phis.sort();
		phis.dedup();
		phis
	}

	pub fn is_phi_at(&self, merge: NodeId, value: NodeId) -> bool {
		matches!(self.kind(value), NodeKind::Phi) && self.input(value, 0) == merge
	}

	pub fn phi_values(&self, phi: NodeId) -> &[NodeId] {
		&self.inputs(phi)[1..]
	}

	pub fn phi_value_at(&self, phi: NodeId, index: usize) -> NodeId {
		self.input(phi, index + 1)
	}

	/// Value a phi takes when control arrives through `end`.
	pub fn phi_value_for_end(&self, phi: NodeId, end: NodeId) -> Result<NodeId> {
		let merge = self.input(phi, 0);
		match self.end_index(merge, end) {
			Some(index) => Ok(self.phi_value_at(phi, index)),
			None => malformed(format!("{} is not an end of {}", end, merge)),
		}
	}

	pub fn proxies(&self, exit: NodeId) -> Vec<NodeId> {
		let mut proxies: Vec<NodeId> = self
			.usages(exit)
			.iter()
			.copied()
			.filter(|&u| {
				matches!(self.kind(u), NodeKind::Proxy) && self.input(u, 1) == exit
			})
			.collect();
		proxies.sort();
		proxies.dedup();
		proxies
	}

	pub fn forward_ends(&self, loop_begin: NodeId) -> Vec<NodeId> {
		self
			.inputs(loop_begin)
			.iter()
			.copied()
			.filter(|&e| matches!(self.kind(e), NodeKind::End))
			.collect()
	}

	pub fn loop_ends(&self, loop_begin: NodeId) -> Vec<NodeId> {
		self
			.inputs(loop_begin)
			.iter()
			.copied()
			.filter(|&e| matches!(self.kind(e), NodeKind::LoopEnd))
			.collect()
	}

	pub fn single_forward_end(&self, loop_begin: NodeId) -> Result<NodeId> {
		let ends = self.forward_ends(loop_begin);
		if ends.len() == 1 {
			Ok(ends[0])
		} else {
			Err(OptError::ForwardEndCount(loop_begin.0, ends.len()))
		}
	}

	pub fn loop_exits(&self, loop_begin: NodeId) -> Vec<NodeId> {
		let mut exits: Vec<NodeId> = self
			.usages(loop_begin)
			.iter()
			.copied()
			.filter(|&u| matches!(self.kind(u), NodeKind::LoopExit))
			.collect();
		exits.sort();
		exits.dedup();
		exits
	}

	/// Detaches `end` from its merge together with the matching phi values.
	/// Returns the detached values; callers kill the ones left unused.
	pub fn remove_end(&mut self, merge: NodeId, end: NodeId) -> Result<Vec<NodeId>> {
		let index = match self.end_index(merge, end) {
			Some(index) => index,
			None => return malformed(format!("{} is not an end of {}", end, merge)),
		};
		let mut values = Vec::new();
		for phi in self.phis(merge) {
			values.push(self.remove_input(phi, index + 1));
		}
		self.remove_input(merge, index);
		Ok(values)
	}

	pub fn infer_stamp(&self, kind: &NodeKind, inputs: &[NodeId]) -> Stamp {
		let int = |i: usize| {
			inputs
				.get(i)
				.and_then(|&id| self.int_stamp(id))
				.unwrap_or_else(|| IntegerStamp::unrestricted(DEFAULT_INT_BITS))
		};
		match kind {
			NodeKind::Binary(op) => {
				let (x, y) = (int(0), int(1));
				Stamp::Int(match op {
					BinaryOp::Add => x.add(&y),
					BinaryOp::Sub => x.sub(&y),
					BinaryOp::Mul => x.mul(&y),
					BinaryOp::Shl => x.shl(&y),
					BinaryOp::And => x.bitwise(&y, true),
					BinaryOp::Or | BinaryOp::Xor => x.bitwise(&y, false),
				})
			}
			NodeKind::Negate => Stamp::Int(int(0).negate()),
			NodeKind::Convert(op, bits) => Stamp::Int(match op {
				ConvertOp::SignExtend => int(0).sign_extend(*bits),
				ConvertOp::ZeroExtend => int(0).zero_extend(*bits),
				ConvertOp::Narrow => int(0).narrow(*bits),
			}),
			NodeKind::Compare(_) => Stamp::Logic,
			NodeKind::Pi | NodeKind::Proxy => inputs
				.first()
				.map_or(Stamp::int(DEFAULT_INT_BITS), |&v| *self.stamp(v)),
			NodeKind::Phi => inputs
				.get(1)
				.map_or(Stamp::int(DEFAULT_INT_BITS), |&v| self.stamp(v).unrestricted()),
			NodeKind::FrameState(_) => Stamp::Void,
			_ if kind.is_fixed() => Stamp::Void,
			_ => Stamp::int(DEFAULT_INT_BITS),
		}
	}

	/// Re-infers stamps starting at `roots` and following usages until
	/// nothing changes. Phi stamps are never narrowed, so this terminates.
	/// A pi keeps the part of its declared range its input still allows.
	pub fn refresh_stamps(&mut self, roots: impl IntoIterator<Item = NodeId>) {
		let mut worklist: VecDeque<NodeId> = roots.into_iter().collect();
		while let Some(id) = worklist.pop_front() {
			if !self.is_alive(id) {
				continue;
			}
			let kind = self.kind(id).clone();
			if kind.is_fixed()
				|| matches!(
					kind,
					NodeKind::Phi
						| NodeKind::Constant(_)
						| NodeKind::Parameter(_)
						| NodeKind::FrameState(_)
				) {
				continue;
			}
			let mut stamp = self.infer_stamp(&kind, self.inputs(id));
			if let (NodeKind::Pi, Stamp::Int(input), Stamp::Int(declared)) =
				(&kind, stamp, *self.stamp(id))
			{
				let (lower, upper) = (input.lower.max(declared.lower), input.upper.min(declared.upper));
				if lower <= upper {
					stamp = Stamp::Int(IntegerStamp::new(declared.bits, lower, upper));
				}
			}
			if stamp != *self.stamp(id) {
				self.set_stamp(id, stamp);
				worklist.extend(self.distinct_usages(id));
			}
		}
	}

	fn describe(&self, f: &mut std::fmt::Formatter<'_>, id: NodeId) -> std::fmt::Result {
		let node = self.node(id);
		let inputs: Vec<String> = node.inputs.iter().map(|i| i.to_string()).collect();
		write!(f, "{} = {}({})", id, node.kind.name(), inputs.join(", "))?;
		if let Some(state) = node.state {
			write!(f, " @{}", state)?;
		}
		let succs: Vec<String> = node
			.succs
			.iter()
			.map(|s| s.map_or("_".to_string(), |s| s.to_string()))
			.collect();
		if !succs.is_empty() {
			write!(f, " -> [{}]", succs.join(", "))?;
		}
		if cfg!(feature = "debug") {
			write!(f, " : {}", node.stamp)?;
		}
		Ok(())
	}
}

impl Display for Graph {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		for id in self.live_nodes() {
			self.describe(f, id)?;
			writeln!(f)?;
		}
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::node::Condition;

	#[test]
	fn usages_follow_edges() {
		let mut g = Graph::new();
		let a = g.constant(1);
		let b = g.constant(2);
		let add = g.binary(BinaryOp::Add, a, a);
		assert_eq!(g.usages(a).len(), 2);
		g.set_input(add, 1, b);
		assert_eq!(g.usages(a), &[add]);
		assert_eq!(g.usages(b), &[add]);
		g.replace_at_usages(a, b);
		assert!(!g.has_usages(a));
		assert_eq!(g.usages(b).len(), 2);
		// stamps are not refreshed on rewiring
		assert_eq!(g.as_constant(add), Some(2));
		g.refresh_stamps([add]);
		assert_eq!(g.as_constant(add), Some(4));
	}

	#[test]
	fn successors_track_predecessor() {
		let mut g = Graph::new();
		let begin = g.add_fixed(NodeKind::Begin, vec![]);
		let ret = g.add_fixed(NodeKind::Return, vec![]);
		g.set_next(g.start(), Some(begin));
		g.set_next(begin, Some(ret));
		assert_eq!(g.pred(ret), Some(begin));
		g.replace_at_predecessor(begin, Some(ret));
		assert_eq!(g.next(g.start()), Some(ret));
		assert_eq!(g.pred(ret), Some(g.start()));
		assert_eq!(g.next(begin), None);
	}

	#[test]
	fn stamps_refresh_through_usages() {
		let mut g = Graph::new();
		let p = g.parameter(0, IntegerStamp::unrestricted(32));
		let one = g.constant(1);
		let add = g.binary(BinaryOp::Add, p, one);
		let cmp = g.add_floating(NodeKind::Compare(Condition::Lt), vec![add, one]);
		assert_eq!(*g.stamp(cmp), Stamp::Logic);
		assert!(g.int_stamp(add).unwrap().is_unrestricted());
		let two = g.constant(2);
		g.set_input(add, 0, two);
		g.refresh_stamps([add]);
		assert_eq!(g.as_constant(add), Some(3));
	}

	#[test]
	fn kill_detaches() {
		let mut g = Graph::new();
		let a = g.constant(1);
		let neg = g.add_floating(NodeKind::Negate, vec![a]);
		let count = g.node_count();
		g.kill(neg);
		assert!(!g.is_alive(neg));
		assert!(!g.has_usages(a));
		assert_eq!(g.node_count(), count - 1);
	}
}
