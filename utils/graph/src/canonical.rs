use log::trace;
use utils::Result;

use crate::{
	graph::Graph,
	node::{NodeId, NodeKind},
};

impl Graph {
	/// Folds constants among the nodes created at or after `mark`.
	///
	/// Data nodes with a single-value stamp become constants, comparisons
	/// of constants become logic constants and branches on a constant
	/// condition lose their dead successors. Returns whether anything
	/// changed.
	pub fn fold_constants(&mut self, mark: u32) -> Result<bool> {
		let mut changed = false;
		loop {
			let mut progress = false;
			let ids: Vec<NodeId> = (mark..self.id_bound()).map(NodeId).collect();
			for id in ids {
				if !self.is_alive(id) {
					continue;
				}
				progress |= self.fold_one(id)?;
			}
			if !progress {
				break;
			}
			changed = true;
		}
		Ok(changed)
	}

	fn fold_one(&mut self, id: NodeId) -> Result<bool> {
		match self.kind(id).clone() {
			NodeKind::Binary(_)
			| NodeKind::Negate
			| NodeKind::Convert(..)
			| NodeKind::Pi
			| NodeKind::Proxy => {
				let Some(stamp) = self.int_stamp(id) else {
					return Ok(false);
				};
				match stamp.as_constant() {
					Some(value) if self.has_usages(id) => {
						let constant = self.constant_with_bits(value, stamp.bits);
						self.replace_at_usages(id, constant);
						self.kill_with_unused_floating_inputs(id);
						Ok(true)
					}
					_ => Ok(false),
				}
			}
			NodeKind::Compare(cond) => {
				let (x, y) = (self.input(id, 0), self.input(id, 1));
				match (self.as_constant(x), self.as_constant(y)) {
					(Some(a), Some(b)) if self.has_usages(id) => {
						let bits = self.stamp(x).bits();
						let constant = self.logic_constant(cond.eval(bits, a, b));
						self.replace_at_usages(id, constant);
						self.kill_with_unused_floating_inputs(id);
						Ok(true)
					}
					_ => Ok(false),
				}
			}
			NodeKind::Phi => {
				let Some(&merge) = self.inputs(id).first() else {
					return Ok(false);
				};
				if !matches!(self.kind(merge), NodeKind::Merge) {
					return Ok(false);
				}
				let mut values = self.phi_values(id).iter().filter(|&&v| v != id);
				let Some(&first) = values.next() else {
					return Ok(false);
				};
				if values.all(|&v| v == first) {
					self.replace_at_usages(id, first);
					self.kill_with_unused_floating_inputs(id);
					return Ok(true);
				}
				Ok(false)
			}
			NodeKind::If { .. } => {
				let Some(value) = self.as_constant(self.input(id, 0)) else {
					return Ok(false);
				};
				let index = if value != 0 { 0 } else { 1 };
				let Some(survivor) = self.succs(id)[index] else {
					return Ok(false);
				};
				trace!("fold {} to successor {}", id, survivor);
				self.remove_split_propagate(id, survivor)?;
				Ok(true)
			}
			NodeKind::Switch { keys, .. } => {
				let Some(value) = self.as_constant(self.input(id, 0)) else {
					return Ok(false);
				};
				let index = keys.iter().position(|&k| k == value).unwrap_or(keys.len());
				let Some(survivor) = self.succs(id)[index] else {
					return Ok(false);
				};
				trace!("fold {} to successor {}", id, survivor);
				self.remove_split_propagate(id, survivor)?;
				Ok(true)
			}
			_ => Ok(false),
		}
	}
}

#[cfg(test)]
mod tests {
	use test_log::test;

	use super::*;
	use crate::{builder::GraphBuilder, node::Condition};

	#[test]
	fn folds_branch_on_constants() {
		let mut b = GraphBuilder::new();
		let three = b.constant(3);
		let four = b.constant(4);
		let sum = b.add(three, four);
		let ten = b.constant(10);
		let cond = b.compare(Condition::Lt, sum, ten);
		let (t, f) = b.branch(cond, 0.5);
		b.set_cursor(t);
		b.emit(sum);
		b.ret(None);
		b.set_cursor(f);
		b.trap();
		let mut g = b.finish();
		assert!(g.fold_constants(0).unwrap());
		assert!(!g.is_alive(f));
		assert!(!g.is_alive(sum));
		assert_eq!(g.next(g.start()), Some(t));
		let emit = g.next(t).unwrap();
		assert_eq!(g.as_constant(g.input(emit, 0)), Some(7));
	}

	#[test]
	fn phi_without_values_is_skipped() {
		let mut g = Graph::new();
		let phi = g.add_floating(NodeKind::Phi, vec![]);
		let negated = g.add_floating(NodeKind::Negate, vec![phi]);
		assert!(!g.fold_constants(0).unwrap());
		assert!(g.is_alive(phi));
		assert_eq!(g.inputs(negated), &[phi]);
	}
}
