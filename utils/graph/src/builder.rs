use utils::DEFAULT_INT_BITS;

use crate::{
	graph::Graph,
	node::{BinaryOp, Condition, ConvertOp, NodeId, NodeKind, StateKind},
	stamp::{IntegerStamp, Stamp},
};

/// Appends structured control flow to a graph one fixed node at a time.
///
/// The cursor is the fixed node whose `next` receives the following
/// node; branching and ending nodes clear it until `set_cursor`.
pub struct GraphBuilder {
	graph: Graph,
	cursor: Option<NodeId>,
}

impl Default for GraphBuilder {
	fn default() -> Self {
		Self::new()
	}
}

impl GraphBuilder {
	pub fn new() -> Self {
		let graph = Graph::new();
		let cursor = Some(graph.start());
		Self { graph, cursor }
	}

	pub fn graph(&self) -> &Graph {
		&self.graph
	}

	pub fn graph_mut(&mut self) -> &mut Graph {
		&mut self.graph
	}

	pub fn finish(self) -> Graph {
		self.graph
	}

	pub fn cursor(&self) -> Option<NodeId> {
		self.cursor
	}

	pub fn set_cursor(&mut self, at: NodeId) {
		self.cursor = Some(at);
	}

	pub fn param(&mut self, index: u32, bits: u32, lower: i64, upper: i64) -> NodeId {
		self.graph.parameter(index, IntegerStamp::new(bits, lower, upper))
	}

	pub fn int_param(&mut self, index: u32) -> NodeId {
		self
			.graph
			.parameter(index, IntegerStamp::unrestricted(DEFAULT_INT_BITS))
	}

	pub fn constant(&mut self, value: i64) -> NodeId {
		self.graph.constant(value)
	}

	pub fn binary(&mut self, op: BinaryOp, x: NodeId, y: NodeId) -> NodeId {
		self.graph.binary(op, x, y)
	}

	pub fn add(&mut self, x: NodeId, y: NodeId) -> NodeId {
		self.binary(BinaryOp::Add, x, y)
	}

	pub fn sub(&mut self, x: NodeId, y: NodeId) -> NodeId {
		self.binary(BinaryOp::Sub, x, y)
	}

	pub fn mul(&mut self, x: NodeId, y: NodeId) -> NodeId {
		self.binary(BinaryOp::Mul, x, y)
	}

	pub fn negate(&mut self, x: NodeId) -> NodeId {
		self.graph.add_floating(NodeKind::Negate, vec![x])
	}

	pub fn convert(&mut self, op: ConvertOp, bits: u32, x: NodeId) -> NodeId {
		self.graph.add_floating(NodeKind::Convert(op, bits), vec![x])
	}

	pub fn pi(&mut self, x: NodeId) -> NodeId {
		self.graph.add_floating(NodeKind::Pi, vec![x])
	}

	/// Pi asserting a narrower range for `x`.
	pub fn pi_with_stamp(&mut self, x: NodeId, stamp: IntegerStamp) -> NodeId {
		let pi = self.pi(x);
		self.graph.set_stamp(pi, Stamp::Int(stamp));
		pi
	}

	pub fn compare(&mut self, cond: Condition, x: NodeId, y: NodeId) -> NodeId {
		self.graph.add_floating(NodeKind::Compare(cond), vec![x, y])
	}

	pub fn state(&mut self, kind: StateKind, values: Vec<NodeId>) -> NodeId {
		self.graph.add_floating(NodeKind::FrameState(kind), values)
	}

	pub fn attach_state(&mut self, node: NodeId, state: NodeId) {
		self.graph.set_state(node, Some(state));
	}

	fn link(&mut self, node: NodeId) {
		debug_assert!(self.cursor.is_some(), "no open control flow at {}", node);
		if let Some(at) = self.cursor {
			self.graph.set_next(at, Some(node));
		}
		self.cursor = (self.graph.kind(node).succ_slots() == 1).then_some(node);
	}

	/// Links a new fixed node after the cursor.
	pub fn append(&mut self, kind: NodeKind, inputs: Vec<NodeId>) -> NodeId {
		let node = self.graph.add_fixed(kind, inputs);
		self.link(node);
		node
	}

	pub fn emit(&mut self, value: NodeId) -> NodeId {
		self.append(NodeKind::Emit, vec![value])
	}

	pub fn guard(&mut self, condition: NodeId) -> NodeId {
		self.append(NodeKind::Guard, vec![condition])
	}

	pub fn ret(&mut self, value: Option<NodeId>) -> NodeId {
		self.append(NodeKind::Return, value.into_iter().collect())
	}

	pub fn trap(&mut self) -> NodeId {
		self.append(NodeKind::Trap, vec![])
	}

	pub fn end(&mut self) -> NodeId {
		self.append(NodeKind::End, vec![])
	}

	pub fn merge(&mut self, ends: Vec<NodeId>) -> NodeId {
		let merge = self.graph.add_fixed(NodeKind::Merge, ends);
		self.cursor = Some(merge);
		merge
	}

	pub fn phi(&mut self, merge: NodeId, values: Vec<NodeId>) -> NodeId {
		let mut inputs = vec![merge];
		inputs.extend(values);
		self.graph.add_floating(NodeKind::Phi, inputs)
	}

	pub fn add_phi_input(&mut self, phi: NodeId, value: NodeId) {
		self.graph.push_input(phi, value);
	}

	/// Ends the current block and opens a loop header after it.
	pub fn begin_loop(&mut self, loop_frequency: f64) -> NodeId {
		let end = self.end();
		let loop_begin = self.graph.add_fixed(
			NodeKind::LoopBegin {
				loop_frequency,
				unswitches: 0,
			},
			vec![end],
		);
		self.cursor = Some(loop_begin);
		loop_begin
	}

	/// Closes the current block with a back edge of `loop_begin`. Phis of
	/// the header need one more value each afterwards.
	pub fn loop_end(&mut self, loop_begin: NodeId) -> NodeId {
		let end = self.append(NodeKind::LoopEnd, vec![loop_begin]);
		self.graph.push_input(loop_begin, end);
		end
	}

	pub fn loop_exit(&mut self, loop_begin: NodeId) -> NodeId {
		self.append(NodeKind::LoopExit, vec![loop_begin])
	}

	pub fn proxy(&mut self, value: NodeId, exit: NodeId) -> NodeId {
		self.graph.add_floating(NodeKind::Proxy, vec![value, exit])
	}

	/// Two-way branch on `condition`; returns the (true, false) begins.
	pub fn branch(&mut self, condition: NodeId, true_probability: f64) -> (NodeId, NodeId) {
		let split = self.append(NodeKind::If { true_probability }, vec![condition]);
		let t = self.graph.add_fixed(NodeKind::Begin, vec![]);
		let f = self.graph.add_fixed(NodeKind::Begin, vec![]);
		self.graph.set_succ(split, 0, Some(t));
		self.graph.set_succ(split, 1, Some(f));
		self.cursor = None;
		(t, f)
	}

	/// Loop test whose one side leaves `loop_begin`; returns the
	/// (body, exit) successors.
	pub fn exit_branch(
		&mut self,
		condition: NodeId,
		true_probability: f64,
		loop_begin: NodeId,
		exit_on_true: bool,
	) -> (NodeId, NodeId) {
		let split = self.append(NodeKind::If { true_probability }, vec![condition]);
		let body = self.graph.add_fixed(NodeKind::Begin, vec![]);
		let exit = self.graph.add_fixed(NodeKind::LoopExit, vec![loop_begin]);
		let (t, f) = if exit_on_true { (exit, body) } else { (body, exit) };
		self.graph.set_succ(split, 0, Some(t));
		self.graph.set_succ(split, 1, Some(f));
		self.cursor = None;
		(body, exit)
	}

	/// Multi-way branch; returns one begin per key followed by the default.
	pub fn switch(
		&mut self,
		value: NodeId,
		keys: Vec<i64>,
		probabilities: Vec<f64>,
	) -> Vec<NodeId> {
		let slots = keys.len() + 1;
		let split = self.append(NodeKind::Switch { keys, probabilities }, vec![value]);
		let mut begins = Vec::new();
		for index in 0..slots {
			let begin = self.graph.add_fixed(NodeKind::Begin, vec![]);
			self.graph.set_succ(split, index, Some(begin));
			begins.push(begin);
		}
		self.cursor = None;
		begins
	}
}
