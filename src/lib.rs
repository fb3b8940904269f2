//! Loop analysis and transformation for a sea-of-nodes program graph.
//!
//! `graph` holds the program representation, `optimizer::loops` the loop
//! analyses and transformations, and `utils` the shared error and option
//! types.

pub use graph;
pub use optimizer;
pub use utils;

use graph::Graph;
use log::info;
use optimizer::Optimizer;
use utils::{LoopOptions, Result};

/// Peels, fully unrolls and unswitches the loops of `graph` as far as
/// `options` allow. Returns whether the graph changed.
pub fn optimize_loops(graph: &mut Graph, options: LoopOptions) -> Result<bool> {
	let before = graph.node_count();
	let changed = Optimizer::new(options).apply(graph)?;
	info!("loop optimization: {} -> {} nodes", before, graph.node_count());
	Ok(changed)
}

#[cfg(test)]
mod tests {
	use graph::{interp::execute, Condition, GraphBuilder};
	use optimizer::loops::LoopsData;
	use rand::{rngs::StdRng, Rng, SeedableRng};
	use test_log::test;

	use super::*;

	// s = 0
	// for (i = 0; i < 6; i++) { if (mode < 0) s += i else s -= i; emit(s) }
	// for (j = 0; j < n; j++) emit(j)
	// return s
	fn program() -> Graph {
		let mut b = GraphBuilder::new();
		let mode = b.int_param(0);
		let n = b.param(1, 32, 0, 40);
		let zero = b.constant(0);
		let one = b.constant(1);

		let first = b.begin_loop(6.0);
		let i = b.phi(first, vec![zero]);
		let s = b.phi(first, vec![zero]);
		let six = b.constant(6);
		let c1 = b.compare(Condition::Lt, i, six);
		let (body, exit) = b.exit_branch(c1, 0.85, first, false);
		b.set_cursor(body);
		let negative = b.compare(Condition::Lt, mode, zero);
		let (t, f) = b.branch(negative, 0.3);
		b.set_cursor(t);
		let added = b.add(s, i);
		let e1 = b.end();
		b.set_cursor(f);
		let subtracted = b.sub(s, i);
		let e2 = b.end();
		let merge = b.merge(vec![e1, e2]);
		let s1 = b.phi(merge, vec![added, subtracted]);
		b.emit(s1);
		let i1 = b.add(i, one);
		b.loop_end(first);
		b.add_phi_input(i, i1);
		b.add_phi_input(s, s1);
		b.set_cursor(exit);
		let total = b.proxy(s, exit);

		let second = b.begin_loop(20.0);
		let j = b.phi(second, vec![zero]);
		let c2 = b.compare(Condition::Lt, j, n);
		let (body, exit) = b.exit_branch(c2, 0.95, second, false);
		b.set_cursor(body);
		b.emit(j);
		let j1 = b.add(j, one);
		b.loop_end(second);
		b.add_phi_input(j, j1);
		b.set_cursor(exit);
		b.ret(Some(total));
		b.finish()
	}

	#[test]
	fn optimized_program_behaves_the_same() {
		let reference = program();
		let mut graph = reference.clone();
		assert!(optimize_loops(&mut graph, LoopOptions::default()).unwrap());
		// the short loop is gone, the parameter bounded one stays
		assert_eq!(LoopsData::new(&graph).unwrap().loops().len(), 1);

		let mut rng = StdRng::seed_from_u64(17);
		for _ in 0..32 {
			let args = vec![rng.gen_range(-5..5), rng.gen_range(0..40)];
			assert_eq!(
				execute(&reference, args.clone()).unwrap(),
				execute(&graph, args).unwrap()
			);
		}
	}

	#[test]
	fn nothing_enabled_means_no_change() {
		let mut graph = program();
		let options = LoopOptions {
			peel: false,
			full_unroll: false,
			unswitch: false,
			..LoopOptions::default()
		};
		assert!(!optimize_loops(&mut graph, options).unwrap());
	}
}
