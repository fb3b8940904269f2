use graph::{Condition, Graph, IntegerStamp, NodeBitMap, NodeId, NodeKind};
use log::{debug, trace};

use super::{
	indvar::{Direction, InductionVariables, IvId},
	loop_ex::LoopShape,
};

/// Facts about a loop whose trip count is governed by one induction
/// variable compared against an invariant limit at the loop header.
#[derive(Debug, Clone, PartialEq)]
pub struct CountedLoopInfo {
	pub iv: IvId,
	pub limit: NodeId,
	/// The limit itself is still reached (`<=` or `>=` tests).
	pub one_off: bool,
	pub direction: Direction,
	pub if_node: NodeId,
	pub body_successor: NodeId,
	pub exit_successor: NodeId,
	exit_count: usize,
}

impl CountedLoopInfo {
	pub(crate) fn detect(
		graph: &Graph,
		shape: &LoopShape,
		loop_nodes: &NodeBitMap,
		ivs: &InductionVariables,
	) -> Option<Self> {
		let loop_begin = shape.loop_begin;
		let mut next = graph.next(loop_begin)?;
		while graph.kind(next).is_pass_through() {
			next = graph.next(next)?;
		}
		if !matches!(graph.kind(next), NodeKind::If { .. }) {
			return None;
		}
		let if_node = next;
		let (t, f) = (graph.succs(if_node)[0]?, graph.succs(if_node)[1]?);
		let leaves = |n: NodeId| {
			matches!(graph.kind(n), NodeKind::LoopExit) && graph.input(n, 0) == loop_begin
		};
		// the condition we keep is the one under which the loop continues
		let (body, exit, negated) = if leaves(t) {
			(f, t, true)
		} else if leaves(f) {
			(t, f, false)
		} else {
			return None;
		};

		let compare = graph.input(if_node, 0);
		let NodeKind::Compare(condition) = graph.kind(compare) else {
			return None;
		};
		if condition.is_unsigned() {
			debug!(
				"missed counted loop {}: unsigned comparison {}",
				loop_begin, compare
			);
			return None;
		}
		let is_outside = |n: NodeId| !loop_nodes.is_marked(n);
		let (x, y) = (graph.input(compare, 0), graph.input(compare, 1));
		let (iv, limit, mut condition) = match (ivs.get(x), ivs.get(y)) {
			(Some(iv), _) if is_outside(y) => (iv, y, *condition),
			(_, Some(iv)) if is_outside(x) => (iv, x, condition.mirror()),
			_ => return None,
		};
		if negated {
			condition = condition.negate();
		}

		let direction = ivs.direction(graph, iv);
		let one_off = match (condition, direction) {
			(Condition::Eq, _) => return None,
			(Condition::Ne, Direction::Unknown) => return None,
			(Condition::Ne, _) => {
				if !Self::ne_terminates(graph, ivs, iv, limit, direction) {
					return None;
				}
				false
			}
			(Condition::Lt, Direction::Up) | (Condition::Gt, Direction::Down) => false,
			(Condition::Le, Direction::Up) | (Condition::Ge, Direction::Down) => true,
			_ => return None,
		};
		trace!(
			"counted loop {}: {} {:?} limit {} one_off {}",
			loop_begin,
			ivs.value_node(iv),
			direction,
			limit,
			one_off
		);
		Some(Self {
			iv,
			limit,
			one_off,
			direction,
			if_node,
			body_successor: body,
			exit_successor: exit,
			exit_count: shape.exits.len(),
		})
	}

	/// A `!=` test only ends the loop when the variable moves by one and
	/// starts on the right side of the limit.
	fn ne_terminates(
		graph: &Graph,
		ivs: &InductionVariables,
		iv: IvId,
		limit: NodeId,
		direction: Direction,
	) -> bool {
		match ivs.constant_stride(graph, iv) {
			Some(1) | Some(-1) => {}
			_ => return false,
		}
		let (Some(init), Some(limit)) = (ivs.init_stamp(graph, iv), graph.int_stamp(limit)) else {
			return false;
		};
		match direction {
			Direction::Up => init.upper <= limit.lower,
			Direction::Down => init.lower >= limit.upper,
			Direction::Unknown => false,
		}
	}

	/// Upper bound on the number of iterations when init, stride and limit
	/// are all constant. Loops that never run count as zero.
	pub fn constant_max_trip_count(&self, graph: &Graph, ivs: &InductionVariables) -> Option<u64> {
		let init = ivs.constant_init(graph, self.iv)? as i128;
		let stride = ivs.constant_stride(graph, self.iv)?;
		let limit = graph.as_constant(self.limit)? as i128;
		let step = stride.unsigned_abs() as i128;
		if step == 0 {
			return None;
		}
		let mut range = match self.direction {
			Direction::Up => limit - init,
			Direction::Down => init - limit,
			Direction::Unknown => return None,
		};
		if self.one_off {
			range += 1;
		}
		if range <= 0 {
			return Some(0);
		}
		u64::try_from((range + step - 1) / step).ok()
	}

	/// Whether the counted test is the only way out of the loop.
	pub fn is_exact_trip_count(&self) -> bool {
		self.exit_count == 1
	}

	pub fn constant_exact_trip_count(
		&self,
		graph: &Graph,
		ivs: &InductionVariables,
	) -> Option<u64> {
		if !self.is_exact_trip_count() {
			return None;
		}
		self.constant_max_trip_count(graph, ivs)
	}

	/// Whether the variable can step past the limit without wrapping.
	pub fn counter_never_overflows(&self, graph: &Graph, ivs: &InductionVariables) -> bool {
		let Some(stride) = ivs.constant_stride(graph, self.iv) else {
			return false;
		};
		if stride.unsigned_abs() == 1 && !self.one_off {
			return true;
		}
		let Some(limit) = graph.int_stamp(self.limit) else {
			return false;
		};
		let step = stride.unsigned_abs() as i128;
		let extra = if self.one_off { 1 } else { 0 };
		match self.direction {
			Direction::Up => limit.upper as i128 + extra + step - 1 <= IntegerStamp::max_value(limit.bits) as i128,
			Direction::Down => limit.lower as i128 - extra - step + 1 >= IntegerStamp::min_value(limit.bits) as i128,
			Direction::Unknown => false,
		}
	}
}
