use std::fmt::Display;

use crate::stamp::{wrap, Stamp};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub u32);

impl NodeId {
	pub fn index(self) -> usize {
		self.0 as usize
	}
}

impl Display for NodeId {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "n{}", self.0)
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOp {
	Add,
	Sub,
	Mul,
	Shl,
	And,
	Or,
	Xor,
}

impl BinaryOp {
	pub fn is_associative(self) -> bool {
		!matches!(self, BinaryOp::Sub | BinaryOp::Shl)
	}

	pub fn eval(self, bits: u32, x: i64, y: i64) -> i64 {
		let (x, y) = (x as i128, y as i128);
		let value = match self {
			BinaryOp::Add => x + y,
			BinaryOp::Sub => x - y,
			BinaryOp::Mul => x.wrapping_mul(y),
			BinaryOp::Shl => x << (y as u32 & (bits.max(1) - 1)).min(63),
			BinaryOp::And => x & y,
			BinaryOp::Or => x | y,
			BinaryOp::Xor => x ^ y,
		};
		wrap(bits, value)
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConvertOp {
	SignExtend,
	ZeroExtend,
	Narrow,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Condition {
	Eq,
	Ne,
	Lt,
	Le,
	Gt,
	Ge,
	// unsigned
	Bt,
	Be,
	At,
	Ae,
}

impl Condition {
	pub fn negate(self) -> Self {
		use Condition::*;
		match self {
			Eq => Ne,
			Ne => Eq,
			Lt => Ge,
			Ge => Lt,
			Le => Gt,
			Gt => Le,
			Bt => Ae,
			Ae => Bt,
			Be => At,
			At => Be,
		}
	}

	/// Condition obtained by swapping the operands.
	pub fn mirror(self) -> Self {
		use Condition::*;
		match self {
			Eq => Eq,
			Ne => Ne,
			Lt => Gt,
			Gt => Lt,
			Le => Ge,
			Ge => Le,
			Bt => At,
			At => Bt,
			Be => Ae,
			Ae => Be,
		}
	}

	pub fn is_unsigned(self) -> bool {
		use Condition::*;
		matches!(self, Bt | Be | At | Ae)
	}

	pub fn eval(self, bits: u32, x: i64, y: i64) -> bool {
		use Condition::*;
		let mask = if bits >= 64 { u64::MAX } else { (1u64 << bits) - 1 };
		let (ux, uy) = (x as u64 & mask, y as u64 & mask);
		match self {
			Eq => x == y,
			Ne => x != y,
			Lt => x < y,
			Le => x <= y,
			Gt => x > y,
			Ge => x >= y,
			Bt => ux < uy,
			Be => ux <= uy,
			At => ux > uy,
			Ae => ux >= uy,
		}
	}
}

/// Flavour of a frame state. Exception and unwind states carry a unique
/// identity and must never be duplicated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StateKind {
	Normal,
	AfterException,
	Unwind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum GuardsStage {
	#[default]
	FloatingGuards,
	FixedDeopts,
}

/// Input layout per kind:
/// - `Merge`/`LoopBegin`: ordered ends, loop begins list forward ends first
/// - `LoopEnd`/`LoopExit`: `[loop_begin]`
/// - `Phi`: `[merge, values..]` aligned with the merge ends
/// - `Proxy`: `[value, loop_exit]`
/// - `If`/`Guard`: `[condition]`, `Switch`/`Emit`/`Return`: `[value]`
#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
	Start,
	Begin,
	Merge,
	LoopBegin { loop_frequency: f64, unswitches: u32 },
	End,
	LoopEnd,
	LoopExit,
	If { true_probability: f64 },
	Switch { keys: Vec<i64>, probabilities: Vec<f64> },
	Return,
	Trap,
	Guard,
	Anchor,
	Infopoint,
	ControlFlowAnchor,
	Emit,

	Parameter(u32),
	Constant(i64),
	Phi,
	Proxy,
	Binary(BinaryOp),
	Negate,
	Convert(ConvertOp, u32),
	Pi,
	Compare(Condition),
	FrameState(StateKind),
}

impl NodeKind {
	pub fn is_fixed(&self) -> bool {
		use NodeKind::*;
		matches!(
			self,
			Start
				| Begin | Merge
				| LoopBegin { .. }
				| End | LoopEnd
				| LoopExit | If { .. }
				| Switch { .. }
				| Return | Trap
				| Guard | Anchor
				| Infopoint | ControlFlowAnchor
				| Emit
		)
	}

	pub fn is_begin_like(&self) -> bool {
		use NodeKind::*;
		matches!(self, Start | Begin | Merge | LoopBegin { .. } | LoopExit)
	}

	pub fn is_merge(&self) -> bool {
		matches!(self, NodeKind::Merge | NodeKind::LoopBegin { .. })
	}

	pub fn is_end(&self) -> bool {
		matches!(self, NodeKind::End | NodeKind::LoopEnd)
	}

	pub fn is_control_split(&self) -> bool {
		matches!(self, NodeKind::If { .. } | NodeKind::Switch { .. })
	}

	pub fn is_loop_begin(&self) -> bool {
		matches!(self, NodeKind::LoopBegin { .. })
	}

	/// Nodes the interpreter treats as fall-through control.
	pub fn is_pass_through(&self) -> bool {
		use NodeKind::*;
		matches!(self, Guard | Anchor | Infopoint)
	}

	pub fn succ_slots(&self) -> usize {
		use NodeKind::*;
		match self {
			If { .. } => 2,
			Switch { keys, .. } => keys.len() + 1,
			End | LoopEnd | Return | Trap => 0,
			kind if kind.is_fixed() => 1,
			_ => 0,
		}
	}

	pub fn name(&self) -> String {
		use NodeKind::*;
		match self {
			LoopBegin { unswitches, .. } => format!("LoopBegin(u{})", unswitches),
			If { true_probability } => format!("If(p{:.2})", true_probability),
			Switch { keys, .. } => format!("Switch{:?}", keys),
			Parameter(index) => format!("Param({})", index),
			Constant(value) => format!("Const({})", value),
			Binary(op) => format!("{:?}", op),
			Convert(op, bits) => format!("{:?}->i{}", op, bits),
			Compare(cond) => format!("Cmp{:?}", cond),
			FrameState(kind) => format!("State({:?})", kind),
			other => {
				let text = format!("{:?}", other);
				text.split_whitespace().next().unwrap_or_default().to_string()
			}
		}
	}
}

#[derive(Debug, Clone)]
pub struct Node {
	pub(crate) kind: NodeKind,
	pub(crate) stamp: Stamp,
	pub(crate) inputs: Vec<NodeId>,
	pub(crate) state: Option<NodeId>,
	pub(crate) succs: Vec<Option<NodeId>>,
	pub(crate) usages: Vec<NodeId>,
	pub(crate) pred: Option<NodeId>,
	pub(crate) alive: bool,
}

impl Node {
	pub(crate) fn new(kind: NodeKind, stamp: Stamp) -> Self {
		let succs = vec![None; kind.succ_slots()];
		Self {
			kind,
			stamp,
			inputs: Vec::new(),
			state: None,
			succs,
			usages: Vec::new(),
			pred: None,
			alive: true,
		}
	}

	pub fn kind(&self) -> &NodeKind {
		&self.kind
	}

	pub fn stamp(&self) -> &Stamp {
		&self.stamp
	}

	pub fn inputs(&self) -> &[NodeId] {
		&self.inputs
	}

	pub fn state(&self) -> Option<NodeId> {
		self.state
	}

	pub fn succs(&self) -> &[Option<NodeId>] {
		&self.succs
	}

	pub fn usages(&self) -> &[NodeId] {
		&self.usages
	}

	pub fn pred(&self) -> Option<NodeId> {
		self.pred
	}

	pub fn is_alive(&self) -> bool {
		self.alive
	}

	/// Inputs followed by the state edge, the full set of edges that are
	/// recorded as usages on their targets.
	pub fn input_edges(&self) -> impl Iterator<Item = NodeId> + '_ {
		self.inputs.iter().copied().chain(self.state)
	}
}
