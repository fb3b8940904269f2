//! Graph fixtures shared by the loop tests.

use graph::{interp::execute, Condition, Graph, GraphBuilder, NodeId, NodeKind};
use rand::{rngs::StdRng, Rng, SeedableRng};

#[derive(Clone, Debug)]
pub struct LoopSpec {
	pub init: i64,
	/// `None` reads the limit from parameter 0.
	pub limit: Option<i64>,
	pub stride: i64,
	pub cond: Condition,
	pub iv_on_right: bool,
	pub exit_on_true: bool,
	pub subtract: bool,
}

impl LoopSpec {
	pub fn new(init: i64, limit: i64, stride: i64, cond: Condition) -> Self {
		Self {
			init,
			limit: Some(limit),
			stride,
			cond,
			iv_on_right: false,
			exit_on_true: false,
			subtract: false,
		}
	}

	pub fn param_limit(init: i64, cond: Condition) -> Self {
		Self {
			limit: None,
			..Self::new(init, 0, 1, cond)
		}
	}

	/// Steps with `i - |stride|` instead of `i + stride`.
	pub fn subtracting(mut self) -> Self {
		self.subtract = true;
		self
	}

	pub fn iv_on_right(mut self) -> Self {
		self.iv_on_right = true;
		self
	}

	pub fn exit_on_true(mut self) -> Self {
		self.exit_on_true = true;
		self
	}
}

pub struct BuiltLoop {
	pub graph: Graph,
	pub loop_begin: NodeId,
	pub iv: NodeId,
	pub increment: NodeId,
	pub compare: NodeId,
	pub exit: NodeId,
	pub body: NodeId,
	pub limit: NodeId,
	/// Proxy of the counter returned after the loop.
	pub result: NodeId,
}

/// `for (i = init; i cond limit; i += stride) emit(i); return i`
pub fn simple_loop(spec: &LoopSpec) -> BuiltLoop {
	let mut b = GraphBuilder::new();
	let limit = match spec.limit {
		Some(value) => b.constant(value),
		None => b.param(0, 32, -10, 30),
	};
	let init = b.constant(spec.init);
	let loop_begin = b.begin_loop(10.0);
	let iv = b.phi(loop_begin, vec![init]);
	let compare = if spec.iv_on_right {
		b.compare(spec.cond, limit, iv)
	} else {
		b.compare(spec.cond, iv, limit)
	};
	let (body, exit) = b.exit_branch(compare, 0.9, loop_begin, spec.exit_on_true);
	b.set_cursor(body);
	b.emit(iv);
	let increment = if spec.subtract {
		let step = b.constant(spec.stride.abs());
		b.sub(iv, step)
	} else {
		let step = b.constant(spec.stride);
		b.add(iv, step)
	};
	b.loop_end(loop_begin);
	b.add_phi_input(iv, increment);
	b.set_cursor(exit);
	let result = b.proxy(iv, exit);
	b.ret(Some(result));
	BuiltLoop {
		graph: b.finish(),
		loop_begin,
		iv,
		increment,
		compare,
		exit,
		body,
		limit,
		result,
	}
}

/// Runs both graphs on the same random arguments and compares what they
/// emit and how they end.
pub fn assert_equivalent(before: &Graph, after: &Graph, params: usize, seed: u64) {
	let mut rng = StdRng::seed_from_u64(seed);
	let runs = if params == 0 { 1 } else { 32 };
	for _ in 0..runs {
		let args: Vec<i64> = (0..params).map(|_| rng.gen_range(-10..30)).collect();
		let expected = execute(before, args.clone()).unwrap();
		let actual = execute(after, args.clone()).unwrap();
		assert_eq!(expected, actual, "runs differ on {:?}", args);
	}
}

pub struct InvariantBranch {
	pub graph: Graph,
	pub loop_begin: NodeId,
	pub split: NodeId,
}

fn set_unswitches(b: &mut GraphBuilder, loop_begin: NodeId, count: u32) {
	let graph = b.graph_mut();
	if let NodeKind::LoopBegin { loop_frequency, .. } = graph.kind(loop_begin).clone() {
		graph.set_kind(
			loop_begin,
			NodeKind::LoopBegin {
				loop_frequency,
				unswitches: count,
			},
		);
	}
}

// for (i = 0; i < 8; i++) { <body>; emit(phi) }
fn invariant_loop(
	frequency: f64,
	unswitches: u32,
	anchored: bool,
	split_on: impl FnOnce(&mut GraphBuilder, NodeId, NodeId) -> (NodeId, Vec<(NodeId, NodeId)>),
) -> InvariantBranch {
	let mut b = GraphBuilder::new();
	let flag = b.int_param(0);
	let zero = b.constant(0);
	let loop_begin = b.begin_loop(frequency);
	set_unswitches(&mut b, loop_begin, unswitches);
	let i = b.phi(loop_begin, vec![zero]);
	let limit = b.constant(8);
	let cmp = b.compare(Condition::Lt, i, limit);
	let (body, exit) = b.exit_branch(cmp, 0.9, loop_begin, false);
	b.set_cursor(body);
	if anchored {
		b.append(NodeKind::ControlFlowAnchor, vec![]);
	}
	let (split, ends) = split_on(&mut b, flag, i);
	let merge = b.merge(ends.iter().map(|&(end, _)| end).collect());
	let joined = b.phi(merge, ends.iter().map(|&(_, value)| value).collect());
	b.emit(joined);
	let one = b.constant(1);
	let next = b.add(i, one);
	b.loop_end(loop_begin);
	b.add_phi_input(i, next);
	b.set_cursor(exit);
	b.ret(None);
	InvariantBranch {
		graph: b.finish(),
		loop_begin,
		split,
	}
}

fn branch_on_sign(b: &mut GraphBuilder, flag: NodeId, i: NodeId) -> (NodeId, Vec<(NodeId, NodeId)>) {
	let zero = b.constant(0);
	let negative = b.compare(Condition::Lt, flag, zero);
	let (t, f) = b.branch(negative, 0.5);
	let split = b.graph().pred(t).unwrap();
	b.set_cursor(t);
	let doubled = b.add(i, i);
	b.emit(i);
	let e1 = b.end();
	b.set_cursor(f);
	let negated = b.negate(i);
	let e2 = b.end();
	(split, vec![(e1, doubled), (e2, negated)])
}

/// A counted loop whose body branches on the sign of parameter 0.
pub fn invariant_branch_loop(frequency: f64, unswitches: u32) -> InvariantBranch {
	invariant_loop(frequency, unswitches, false, branch_on_sign)
}

/// Like `invariant_branch_loop` with a control flow anchor in the body.
pub fn anchored_loop() -> InvariantBranch {
	invariant_loop(10.0, 0, true, branch_on_sign)
}

/// A loop switching on parameter 0 with keys 0 and 1 and a default.
pub fn invariant_switch_loop() -> InvariantBranch {
	invariant_loop(10.0, 0, false, |b, flag, i| {
		let arms = b.switch(flag, vec![0, 1], vec![0.4, 0.4, 0.2]);
		let split = b.graph().pred(arms[0]).unwrap();
		let mut ends = Vec::new();
		for (k, &arm) in arms.iter().enumerate() {
			b.set_cursor(arm);
			let offset = b.constant(k as i64 * 100);
			let value = b.add(i, offset);
			b.emit(offset);
			ends.push((b.end(), value));
		}
		(split, ends)
	})
}
