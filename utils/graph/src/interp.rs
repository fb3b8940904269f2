use std::collections::HashMap;

use utils::{OptError, Result, MAX_INTERP_STEPS};

use crate::{
	graph::Graph,
	node::{ConvertOp, NodeId, NodeKind},
	stamp::wrap,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
	Returned(Option<i64>),
	Trapped,
	StepLimit,
}

/// Observable behaviour of one run: every emitted value in order and how
/// the run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Execution {
	pub emitted: Vec<i64>,
	pub outcome: Outcome,
}

/// Reference interpreter walking fixed nodes from the start node and
/// evaluating floating nodes on demand.
pub struct Interpreter<'a> {
	graph: &'a Graph,
	args: Vec<i64>,
	phi_values: HashMap<NodeId, i64>,
	step_limit: usize,
}

fn fail<T>(msg: String) -> Result<T> {
	Err(OptError::Interpreter(msg))
}

impl<'a> Interpreter<'a> {
	pub fn new(graph: &'a Graph, args: Vec<i64>) -> Self {
		Self {
			graph,
			args,
			phi_values: HashMap::new(),
			step_limit: MAX_INTERP_STEPS,
		}
	}

	pub fn with_step_limit(mut self, step_limit: usize) -> Self {
		self.step_limit = step_limit;
		self
	}

	fn bits(&self, id: NodeId) -> u32 {
		self.graph.stamp(id).bits().max(1)
	}

	fn eval(&self, id: NodeId) -> Result<i64> {
		let g = self.graph;
		match g.kind(id) {
			NodeKind::Constant(value) => Ok(*value),
			NodeKind::Parameter(index) => match self.args.get(*index as usize) {
				Some(&value) => Ok(wrap(self.bits(id), value as i128)),
				None => fail(format!("missing argument {}", index)),
			},
			NodeKind::Phi => match self.phi_values.get(&id) {
				Some(&value) => Ok(value),
				None => fail(format!("{} read before its merge was reached", id)),
			},
			NodeKind::Proxy | NodeKind::Pi => self.eval(g.input(id, 0)),
			NodeKind::Binary(op) => {
				let x = self.eval(g.input(id, 0))?;
				let y = self.eval(g.input(id, 1))?;
				Ok(op.eval(self.bits(id), x, y))
			}
			NodeKind::Negate => {
				let x = self.eval(g.input(id, 0))?;
				Ok(wrap(self.bits(id), -(x as i128)))
			}
			NodeKind::Convert(op, bits) => {
				let input = g.input(id, 0);
				let x = self.eval(input)?;
				Ok(match op {
					ConvertOp::SignExtend => x,
					ConvertOp::ZeroExtend => {
						let from = self.bits(input);
						if from >= 64 {
							x
						} else {
							(x as u64 & ((1u64 << from) - 1)) as i64
						}
					}
					ConvertOp::Narrow => wrap(*bits, x as i128),
				})
			}
			NodeKind::Compare(cond) => {
				let (a, b) = (g.input(id, 0), g.input(id, 1));
				let x = self.eval(a)?;
				let y = self.eval(b)?;
				Ok(cond.eval(self.bits(a), x, y) as i64)
			}
			kind => fail(format!("cannot evaluate {} ({})", id, kind.name())),
		}
	}

	fn next(&self, id: NodeId) -> Result<NodeId> {
		match self.graph.next(id) {
			Some(next) => Ok(next),
			None => Err(OptError::DanglingControl(id.0)),
		}
	}

	/// Assigns the phis of the merge reached through `end`; all values
	/// are read before any phi is written.
	fn enter_merge(&mut self, end: NodeId) -> Result<NodeId> {
		let g = self.graph;
		let Some(merge) = g.merge_of_end(end) else {
			return fail(format!("{} flows into no merge", end));
		};
		let Some(index) = g.end_index(merge, end) else {
			return fail(format!("{} is not an end of {}", end, merge));
		};
		let mut values = Vec::new();
		for phi in g.phis(merge) {
			values.push((phi, self.eval(g.phi_value_at(phi, index))?));
		}
		self.phi_values.extend(values);
		Ok(merge)
	}

	pub fn run(mut self) -> Result<Execution> {
		let g = self.graph;
		let mut emitted = Vec::new();
		let mut current = g.start();
		let mut steps = 0;
		let outcome = loop {
			steps += 1;
			if steps > self.step_limit {
				break Outcome::StepLimit;
			}
			current = match g.kind(current) {
				NodeKind::Start
				| NodeKind::Begin
				| NodeKind::Merge
				| NodeKind::LoopBegin { .. }
				| NodeKind::LoopExit
				| NodeKind::Anchor
				| NodeKind::Infopoint
				| NodeKind::ControlFlowAnchor => self.next(current)?,
				NodeKind::Guard => {
					if self.eval(g.input(current, 0))? == 0 {
						break Outcome::Trapped;
					}
					self.next(current)?
				}
				NodeKind::Emit => {
					emitted.push(self.eval(g.input(current, 0))?);
					self.next(current)?
				}
				NodeKind::If { .. } => {
					let taken = if self.eval(g.input(current, 0))? != 0 { 0 } else { 1 };
					g.succs(current)[taken].ok_or(OptError::DanglingControl(current.0))?
				}
				NodeKind::Switch { keys, .. } => {
					let value = self.eval(g.input(current, 0))?;
					let taken = keys.iter().position(|&k| k == value).unwrap_or(keys.len());
					g.succs(current)[taken].ok_or(OptError::DanglingControl(current.0))?
				}
				NodeKind::End | NodeKind::LoopEnd => self.enter_merge(current)?,
				NodeKind::Return => {
					let value = match g.inputs(current).first() {
						Some(&v) => Some(self.eval(v)?),
						None => None,
					};
					break Outcome::Returned(value);
				}
				NodeKind::Trap => break Outcome::Trapped,
				kind => return fail(format!("{} ({}) is not control", current, kind.name())),
			};
		};
		Ok(Execution { emitted, outcome })
	}
}

pub fn execute(graph: &Graph, args: Vec<i64>) -> Result<Execution> {
	Interpreter::new(graph, args).run()
}

#[cfg(test)]
mod tests {
	use test_log::test;

	use super::*;
	use crate::{builder::GraphBuilder, node::Condition};

	#[test]
	fn sums_in_a_loop() {
		// s = 0; for (i = 0; i < n; i++) { s += i; emit(i) } return s
		let mut b = GraphBuilder::new();
		let n = b.int_param(0);
		let zero = b.constant(0);
		let one = b.constant(1);
		let lb = b.begin_loop(5.0);
		let i = b.phi(lb, vec![zero]);
		let s = b.phi(lb, vec![zero]);
		let cond = b.compare(Condition::Lt, i, n);
		let (body, exit) = b.exit_branch(cond, 0.8, lb, false);
		b.set_cursor(body);
		b.emit(i);
		let s1 = b.add(s, i);
		let i1 = b.add(i, one);
		b.loop_end(lb);
		b.add_phi_input(i, i1);
		b.add_phi_input(s, s1);
		b.set_cursor(exit);
		let out = b.proxy(s, exit);
		b.ret(Some(out));
		let g = b.finish();

		let run = execute(&g, vec![4]).unwrap();
		assert_eq!(run.emitted, vec![0, 1, 2, 3]);
		assert_eq!(run.outcome, Outcome::Returned(Some(6)));
		let run = execute(&g, vec![-3]).unwrap();
		assert_eq!(run.outcome, Outcome::Returned(Some(0)));
		let run = Interpreter::new(&g, vec![1000]).with_step_limit(50).run().unwrap();
		assert_eq!(run.outcome, Outcome::StepLimit);
	}
}
