use graph::{Graph, NodeBitMap, NodeId, NodeKind};
use log::trace;

use super::loop_ex::LoopEx;

// op(op(variant, a), b) => op(variant, op(a, b)) when a and b are invariant
fn reassociate(graph: &mut Graph, node: NodeId, loop_nodes: &NodeBitMap) -> Option<NodeId> {
	let NodeKind::Binary(op) = *graph.kind(node) else {
		return None;
	};
	if !op.is_associative() {
		return None;
	}
	let invariant = |n: NodeId| !loop_nodes.is_marked(n);
	let (x, y) = (graph.input(node, 0), graph.input(node, 1));
	if invariant(x) == invariant(y) {
		return None;
	}
	let (outer_invariant, inner) = if invariant(x) { (x, y) } else { (y, x) };
	if *graph.kind(inner) != NodeKind::Binary(op) {
		return None;
	}
	let (a, b) = (graph.input(inner, 0), graph.input(inner, 1));
	let (inner_invariant, variant) = match (invariant(a), invariant(b)) {
		(true, false) => (a, b),
		(false, true) => (b, a),
		_ => return None,
	};
	let combined = graph.binary(op, outer_invariant, inner_invariant);
	Some(graph.binary(op, variant, combined))
}

impl LoopEx {
	/// Regroups associative operations so their invariant operands form a
	/// subexpression of their own. Returns how many nodes were rewritten.
	pub fn reassociate_invariants(&mut self, graph: &mut Graph) -> usize {
		let mut loop_nodes = self.whole_nodes(graph).clone();
		let candidates: Vec<NodeId> = loop_nodes
			.live(graph)
			.into_iter()
			.filter(|&n| matches!(graph.kind(n), NodeKind::Binary(op) if op.is_associative()))
			.collect();
		let mut count = 0;
		for node in candidates {
			if !graph.is_alive(node) {
				continue;
			}
			let Some(result) = reassociate(graph, node, &loop_nodes) else {
				continue;
			};
			// the new outer node still varies with the loop
			loop_nodes.mark(result);
			graph.replace_at_usages(node, result);
			graph.kill_with_unused_floating_inputs(node);
			count += 1;
		}
		if count > 0 {
			trace!("reassociated {} nodes in {}", count, self.loop_begin());
			self.invalidate();
		}
		count
	}
}

#[cfg(test)]
mod tests {
	use graph::{interp::execute, Condition, GraphBuilder};
	use test_log::test;

	use crate::loops::loop_data::LoopsData;

	#[test]
	fn invariant_operands_are_grouped() {
		let mut b = GraphBuilder::new();
		let a = b.int_param(0);
		let c = b.int_param(1);
		let lb = b.begin_loop(10.0);
		let zero = b.constant(0);
		let i = b.phi(lb, vec![zero]);
		let limit = b.constant(6);
		let cmp = b.compare(Condition::Lt, i, limit);
		let (body, exit) = b.exit_branch(cmp, 0.9, lb, false);
		b.set_cursor(body);
		let partial = b.add(i, a);
		let sum = b.add(c, partial);
		b.emit(sum);
		let one = b.constant(1);
		let next = b.add(i, one);
		b.loop_end(lb);
		b.add_phi_input(i, next);
		b.set_cursor(exit);
		b.ret(None);
		let reference = b.finish();

		let mut graph = reference.clone();
		let mut data = LoopsData::new(&graph).unwrap();
		let id = data.outer_first()[0];
		assert_eq!(data.get_mut(id).reassociate_invariants(&mut graph), 1);
		assert!(!graph.is_alive(sum));
		assert!(!graph.is_alive(partial));
		for args in [vec![1, 2], vec![-7, 40], vec![i32::MAX as i64, 5]] {
			assert_eq!(
				execute(&reference, args.clone()).unwrap(),
				execute(&graph, args).unwrap()
			);
		}
	}

	#[test]
	fn variant_operands_are_left_alone() {
		let mut b = GraphBuilder::new();
		let lb = b.begin_loop(10.0);
		let zero = b.constant(0);
		let i = b.phi(lb, vec![zero]);
		let limit = b.constant(6);
		let cmp = b.compare(Condition::Lt, i, limit);
		let (body, exit) = b.exit_branch(cmp, 0.9, lb, false);
		b.set_cursor(body);
		let twice = b.add(i, i);
		let thrice = b.add(twice, i);
		b.emit(thrice);
		let one = b.constant(1);
		let next = b.add(i, one);
		b.loop_end(lb);
		b.add_phi_input(i, next);
		b.set_cursor(exit);
		b.ret(None);
		let mut graph = b.finish();

		let mut data = LoopsData::new(&graph).unwrap();
		let id = data.outer_first()[0];
		assert_eq!(data.get_mut(id).reassociate_invariants(&mut graph), 0);
	}
}
