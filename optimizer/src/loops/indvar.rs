use std::collections::{HashMap, VecDeque};

use graph::{
	BinaryOp, ConvertOp, Graph, IntegerStamp, NodeBitMap, NodeId, NodeKind,
	Stamp,
};
use log::trace;

use super::loop_ex::LoopShape;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct IvId(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
	Up,
	Down,
	Unknown,
}

impl Direction {
	pub fn opposite(self) -> Self {
		match self {
			Direction::Up => Direction::Down,
			Direction::Down => Direction::Up,
			Direction::Unknown => Direction::Unknown,
		}
	}
}

/// How a derived offset combines its base with the invariant operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OffsetKind {
	/// base + offset
	Add,
	/// base - offset
	Sub,
	/// offset - base
	SubFrom,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scale {
	Node(NodeId),
	Constant(i64),
}

#[derive(Debug, Clone, PartialEq)]
pub enum IvKind {
	/// Header phi advanced by an invariant stride on every back edge.
	Basic {
		init: NodeId,
		raw_stride: NodeId,
		op: NodeId,
		subtract: bool,
	},
	DerivedOffset {
		base: IvId,
		offset: NodeId,
		kind: OffsetKind,
	},
	DerivedScaled {
		base: IvId,
		scale: Scale,
	},
	DerivedConverted {
		base: IvId,
		stamp: Stamp,
	},
}

#[derive(Debug, Clone, PartialEq)]
pub struct InductionVariable {
	/// Node whose value follows the recurrence.
	pub value: NodeId,
	pub kind: IvKind,
}

impl InductionVariable {
	pub fn base(&self) -> Option<IvId> {
		match self.kind {
			IvKind::Basic { .. } => None,
			IvKind::DerivedOffset { base, .. }
			| IvKind::DerivedScaled { base, .. }
			| IvKind::DerivedConverted { base, .. } => Some(base),
		}
	}

	pub fn is_basic(&self) -> bool {
		matches!(self.kind, IvKind::Basic { .. })
	}
}

/// All induction variables of one loop, keyed by the node carrying them.
///
/// Derived variables point at their base by id, so chains of any length
/// are walked with plain loops. Nodes materialized for init and stride
/// values are remembered and dropped again by `delete_unused_nodes`.
#[derive(Debug, Clone, Default)]
pub struct InductionVariables {
	ivs: Vec<InductionVariable>,
	by_node: HashMap<NodeId, IvId>,
	init_nodes: HashMap<IvId, NodeId>,
	stride_nodes: HashMap<IvId, NodeId>,
	created: Vec<NodeId>,
}

fn basic_step(
	graph: &Graph,
	op: NodeId,
	phi: NodeId,
	is_outside: &impl Fn(NodeId) -> bool,
) -> Option<(NodeId, bool)> {
	let NodeKind::Binary(kind) = graph.kind(op) else {
		return None;
	};
	let (x, y) = (graph.input(op, 0), graph.input(op, 1));
	match kind {
		BinaryOp::Add if x == phi && is_outside(y) => Some((y, false)),
		BinaryOp::Add if y == phi && is_outside(x) => Some((x, false)),
		BinaryOp::Sub if x == phi && is_outside(y) => Some((y, true)),
		_ => None,
	}
}

fn derive(
	graph: &Graph,
	op: NodeId,
	base: IvId,
	base_value: NodeId,
	is_outside: &impl Fn(NodeId) -> bool,
) -> Option<IvKind> {
	let inputs = graph.inputs(op);
	match graph.kind(op) {
		NodeKind::Binary(BinaryOp::Add) => {
			let (x, y) = (inputs[0], inputs[1]);
			let offset = if x == base_value { y } else { x };
			(offset != base_value && is_outside(offset)).then_some(IvKind::DerivedOffset {
				base,
				offset,
				kind: OffsetKind::Add,
			})
		}
		NodeKind::Binary(BinaryOp::Sub) => {
			let (x, y) = (inputs[0], inputs[1]);
			if x == base_value && y != base_value && is_outside(y) {
				Some(IvKind::DerivedOffset {
					base,
					offset: y,
					kind: OffsetKind::Sub,
				})
			} else if y == base_value && x != base_value && is_outside(x) {
				Some(IvKind::DerivedOffset {
					base,
					offset: x,
					kind: OffsetKind::SubFrom,
				})
			} else {
				None
			}
		}
		NodeKind::Negate => Some(IvKind::DerivedScaled {
			base,
			scale: Scale::Constant(-1),
		}),
		NodeKind::Binary(BinaryOp::Mul) => {
			let (x, y) = (inputs[0], inputs[1]);
			let other = if x == base_value { y } else { x };
			if other == base_value || !is_outside(other) {
				return None;
			}
			let scale = match graph.as_constant(other) {
				Some(value) => Scale::Constant(value),
				None => Scale::Node(other),
			};
			Some(IvKind::DerivedScaled { base, scale })
		}
		NodeKind::Binary(BinaryOp::Shl) => {
			let (x, y) = (inputs[0], inputs[1]);
			let bits = graph.stamp(op).bits() as i64;
			match graph.as_constant(y) {
				Some(shift) if x == base_value && (0..bits.min(63)).contains(&shift) => {
					Some(IvKind::DerivedScaled {
						base,
						scale: Scale::Constant(1i64 << shift),
					})
				}
				_ => None,
			}
		}
		NodeKind::Pi | NodeKind::Convert(ConvertOp::SignExtend, _) => {
			Some(IvKind::DerivedConverted {
				base,
				stamp: *graph.stamp(op),
			})
		}
		NodeKind::Convert(ConvertOp::ZeroExtend, _) => graph
			.int_stamp(base_value)
			.filter(|s| s.is_non_negative())
			.map(|_| IvKind::DerivedConverted {
				base,
				stamp: *graph.stamp(op),
			}),
		_ => None,
	}
}

impl InductionVariables {
	/// Discovers the basic variables of the loop header and everything
	/// derived from them inside `loop_nodes`.
	pub fn find(graph: &Graph, shape: &LoopShape, loop_nodes: &NodeBitMap) -> Self {
		let mut result = Self::default();
		let loop_begin = shape.loop_begin;
		let is_outside = |n: NodeId| !loop_nodes.is_marked(n);
		let Ok(forward) = graph.single_forward_end(loop_begin) else {
			return result;
		};
		let loop_ends = graph.loop_ends(loop_begin);
		if loop_ends.is_empty() {
			return result;
		}

		let mut queue = VecDeque::new();
		for phi in graph.phis(loop_begin) {
			if graph.int_stamp(phi).is_none() {
				continue;
			}
			let Ok(back) = graph.phi_value_for_end(phi, loop_ends[0]) else {
				continue;
			};
			let same_back = loop_ends
				.iter()
				.all(|&end| graph.phi_value_for_end(phi, end).ok() == Some(back));
			if !same_back {
				continue;
			}
			let Some((raw_stride, subtract)) = basic_step(graph, back, phi, &is_outside)
			else {
				continue;
			};
			let Ok(init) = graph.phi_value_for_end(phi, forward) else {
				continue;
			};
			let id = result.push(InductionVariable {
				value: phi,
				kind: IvKind::Basic {
					init,
					raw_stride,
					op: back,
					subtract,
				},
			});
			queue.push_back(id);
		}

		while let Some(base) = queue.pop_front() {
			let base_value = result.ivs[base.0].value;
			for op in graph.distinct_usages(base_value) {
				if is_outside(op) || result.by_node.contains_key(&op) {
					continue;
				}
				let kind = graph.kind(op);
				if kind.is_fixed()
					|| matches!(kind, NodeKind::Phi | NodeKind::Proxy | NodeKind::FrameState(_))
				{
					continue;
				}
				// the step of a basic variable feeds only its own phi
				if graph.usages(op).len() == 1 && graph.usages(op)[0] == base_value {
					continue;
				}
				if graph.int_stamp(op).is_none() {
					continue;
				}
				if let Some(kind) = derive(graph, op, base, base_value, &is_outside) {
					let id = result.push(InductionVariable { value: op, kind });
					queue.push_back(id);
				}
			}
		}
		trace!("found {} induction variables in {}", result.len(), loop_begin);
		result
	}

	fn push(&mut self, iv: InductionVariable) -> IvId {
		let id = IvId(self.ivs.len());
		self.by_node.insert(iv.value, id);
		self.ivs.push(iv);
		id
	}

	pub fn len(&self) -> usize {
		self.ivs.len()
	}

	pub fn is_empty(&self) -> bool {
		self.ivs.is_empty()
	}

	pub fn get(&self, node: NodeId) -> Option<IvId> {
		self.by_node.get(&node).copied()
	}

	pub fn iv(&self, id: IvId) -> &InductionVariable {
		&self.ivs[id.0]
	}

	pub fn iter(&self) -> impl Iterator<Item = (IvId, &InductionVariable)> {
		self.ivs.iter().enumerate().map(|(i, iv)| (IvId(i), iv))
	}

	/// Variables from the basic one down to `id`.
	pub fn chain(&self, id: IvId) -> Vec<IvId> {
		let mut chain = vec![id];
		let mut current = id;
		while let Some(base) = self.ivs[current.0].base() {
			chain.push(base);
			current = base;
		}
		chain.reverse();
		chain
	}

	pub fn basic_of(&self, id: IvId) -> IvId {
		self.chain(id)[0]
	}

	pub fn direction(&self, graph: &Graph, id: IvId) -> Direction {
		let mut direction = Direction::Unknown;
		for step in self.chain(id) {
			direction = match &self.ivs[step.0].kind {
				IvKind::Basic {
					raw_stride,
					subtract,
					..
				} => {
					let stamp = graph.int_stamp(*raw_stride);
					let up = match stamp {
						Some(s) if s.is_strictly_positive() => Direction::Up,
						Some(s) if s.is_strictly_negative() => Direction::Down,
						_ => Direction::Unknown,
					};
					if *subtract {
						up.opposite()
					} else {
						up
					}
				}
				IvKind::DerivedOffset { kind, .. } => match kind {
					OffsetKind::SubFrom => direction.opposite(),
					_ => direction,
				},
				IvKind::DerivedScaled { scale, .. } => {
					let sign = match scale {
						Scale::Constant(c) => c.signum(),
						Scale::Node(n) => match graph.int_stamp(*n) {
							Some(s) if s.is_strictly_positive() => 1,
							Some(s) if s.is_strictly_negative() => -1,
							_ => 0,
						},
					};
					match sign {
						1 => direction,
						-1 => direction.opposite(),
						_ => Direction::Unknown,
					}
				}
				IvKind::DerivedConverted { .. } => direction,
			};
		}
		direction
	}

	fn scale_value(graph: &Graph, scale: Scale) -> Option<i64> {
		match scale {
			Scale::Constant(c) => Some(c),
			Scale::Node(n) => graph.as_constant(n),
		}
	}

	pub fn constant_stride(&self, graph: &Graph, id: IvId) -> Option<i64> {
		let mut stride = 0i64;
		for step in self.chain(id) {
			stride = match &self.ivs[step.0].kind {
				IvKind::Basic {
					raw_stride,
					subtract,
					..
				} => {
					let raw = graph.as_constant(*raw_stride)?;
					if *subtract {
						raw.checked_neg()?
					} else {
						raw
					}
				}
				IvKind::DerivedOffset { kind, .. } => match kind {
					OffsetKind::SubFrom => stride.checked_neg()?,
					_ => stride,
				},
				IvKind::DerivedScaled { scale, .. } => {
					stride.checked_mul(Self::scale_value(graph, *scale)?)?
				}
				IvKind::DerivedConverted { .. } => stride,
			};
		}
		Some(stride)
	}

	pub fn is_constant_stride(&self, graph: &Graph, id: IvId) -> bool {
		self.constant_stride(graph, id).is_some()
	}

	/// Initial value of `id` when everything it depends on is constant.
	pub fn constant_init(&self, graph: &Graph, id: IvId) -> Option<i64> {
		self.init_stamp(graph, id).and_then(|s| s.as_constant())
	}

	/// Range of the value `id` takes on loop entry, folded along the chain
	/// from the stamps of the invariant operands. No nodes are created.
	pub fn init_stamp(&self, graph: &Graph, id: IvId) -> Option<IntegerStamp> {
		let mut stamp: Option<IntegerStamp> = None;
		for step in self.chain(id) {
			let iv = &self.ivs[step.0];
			stamp = Some(match &iv.kind {
				IvKind::Basic { init, .. } => graph.int_stamp(*init)?,
				IvKind::DerivedOffset { offset, kind, .. } => {
					let base = stamp?;
					let offset = graph.int_stamp(*offset)?;
					match kind {
						OffsetKind::Add => base.add(&offset),
						OffsetKind::Sub => base.sub(&offset),
						OffsetKind::SubFrom => offset.sub(&base),
					}
				}
				IvKind::DerivedScaled { scale, .. } => {
					let base = stamp?;
					let scale = match scale {
						Scale::Constant(c) => IntegerStamp::constant(base.bits, *c),
						Scale::Node(n) => graph.int_stamp(*n)?,
					};
					base.mul(&scale)
				}
				IvKind::DerivedConverted { stamp: target, .. } => {
					let base = stamp?;
					let target = target.as_int()?;
					match graph.kind(iv.value) {
						NodeKind::Convert(ConvertOp::SignExtend, bits) => base.sign_extend(*bits),
						NodeKind::Convert(ConvertOp::ZeroExtend, bits) => base.zero_extend(*bits),
						_ => {
							let (lower, upper) =
								(base.lower.max(target.lower), base.upper.min(target.upper));
							if lower <= upper {
								IntegerStamp::new(target.bits, lower, upper)
							} else {
								*target
							}
						}
					}
				}
			});
		}
		stamp
	}

	pub fn value_node(&self, id: IvId) -> NodeId {
		self.ivs[id.0].value
	}

	fn scale_node(&mut self, graph: &mut Graph, scale: Scale, bits: u32) -> NodeId {
		match scale {
			Scale::Node(n) => n,
			Scale::Constant(c) => {
				let node = graph.constant_with_bits(c, bits);
				self.created.push(node);
				node
			}
		}
	}

	fn track(&mut self, node: NodeId) -> NodeId {
		self.created.push(node);
		node
	}

	/// Node computing the value `id` takes on loop entry. Created on first
	/// request and reused afterwards.
	pub fn init_node(&mut self, graph: &mut Graph, id: IvId) -> NodeId {
		if let Some(&node) = self.init_nodes.get(&id) {
			if graph.is_alive(node) {
				return node;
			}
		}
		let iv = self.ivs[id.0].clone();
		let node = match iv.kind {
			IvKind::Basic { init, .. } => init,
			IvKind::DerivedOffset { base, offset, kind } => {
				let base = self.init_node(graph, base);
				let node = match kind {
					OffsetKind::Add => graph.binary(BinaryOp::Add, base, offset),
					OffsetKind::Sub => graph.binary(BinaryOp::Sub, base, offset),
					OffsetKind::SubFrom => graph.binary(BinaryOp::Sub, offset, base),
				};
				self.track(node)
			}
			IvKind::DerivedScaled { base, scale } => {
				let base = self.init_node(graph, base);
				let bits = graph.stamp(iv.value).bits();
				let scale = self.scale_node(graph, scale, bits);
				let node = graph.binary(BinaryOp::Mul, base, scale);
				self.track(node)
			}
			IvKind::DerivedConverted { base, .. } => {
				let base = self.init_node(graph, base);
				match graph.kind(iv.value).clone() {
					NodeKind::Convert(op, bits) => {
						let node = graph.add_floating(NodeKind::Convert(op, bits), vec![base]);
						self.track(node)
					}
					_ => base,
				}
			}
		};
		self.init_nodes.insert(id, node);
		node
	}

	/// Node computing the per-iteration change of `id`.
	pub fn stride_node(&mut self, graph: &mut Graph, id: IvId) -> NodeId {
		if let Some(&node) = self.stride_nodes.get(&id) {
			if graph.is_alive(node) {
				return node;
			}
		}
		let iv = self.ivs[id.0].clone();
		let node = match iv.kind {
			IvKind::Basic {
				raw_stride,
				subtract,
				..
			} => {
				if subtract {
					let node = graph.add_floating(NodeKind::Negate, vec![raw_stride]);
					self.track(node)
				} else {
					raw_stride
				}
			}
			IvKind::DerivedOffset { base, kind, .. } => {
				let base = self.stride_node(graph, base);
				if kind == OffsetKind::SubFrom {
					let node = graph.add_floating(NodeKind::Negate, vec![base]);
					self.track(node)
				} else {
					base
				}
			}
			IvKind::DerivedScaled { base, scale } => {
				let base = self.stride_node(graph, base);
				let bits = graph.stamp(iv.value).bits();
				let scale = self.scale_node(graph, scale, bits);
				let node = graph.binary(BinaryOp::Mul, base, scale);
				self.track(node)
			}
			IvKind::DerivedConverted { base, .. } => {
				let base = self.stride_node(graph, base);
				match graph.kind(iv.value).clone() {
					// strides may be negative, so they are always sign-extended
					NodeKind::Convert(_, bits) if bits > graph.stamp(base).bits() => {
						let node = graph
							.add_floating(NodeKind::Convert(ConvertOp::SignExtend, bits), vec![base]);
						self.track(node)
					}
					NodeKind::Convert(_, bits) => {
						let node =
							graph.add_floating(NodeKind::Convert(ConvertOp::Narrow, bits), vec![base]);
						self.track(node)
					}
					_ => base,
				}
			}
		};
		self.stride_nodes.insert(id, node);
		node
	}

	/// Removes init and stride nodes created here that nothing uses.
	pub fn delete_unused_nodes(&mut self, graph: &mut Graph) {
		for node in self.created.drain(..).rev() {
			if graph.is_alive(node) && !graph.has_usages(node) {
				graph.kill_with_unused_floating_inputs(node);
			}
		}
		self.init_nodes.clear();
		self.stride_nodes.clear();
	}
}
