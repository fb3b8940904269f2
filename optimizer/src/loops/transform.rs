use graph::{Graph, NodeId, NodeKind};
use log::{debug, warn};
use utils::{OptError, Result};

use super::{
	fragment::LoopFragment,
	loop_data::LoopsData,
	loop_ex::LoopEx,
};

/// Runs one iteration of `lx` in front of the loop.
pub fn peel(graph: &mut Graph, lx: &mut LoopEx) -> Result<()> {
	let original = lx.inside();
	let mut peeled = original.duplicate(graph)?;
	peeled.insert_before(graph, original)?;
	lx.invalidate();
	Ok(())
}

/// Peels the loop headed by `loop_begin` until constant folding removes
/// what is left of it. Gives up after `max_peels` iterations.
pub fn full_unroll(graph: &mut Graph, loop_begin: NodeId, max_peels: u64) -> Result<bool> {
	let mut peels = 0u64;
	loop {
		if !graph.is_alive(loop_begin) {
			break;
		}
		let mut data = LoopsData::new(graph)?;
		let Some(id) = data.loop_for_header(loop_begin) else {
			break;
		};
		if peels >= max_peels {
			warn!(
				"loop {} still present after {} peels, giving up",
				loop_begin, peels
			);
			return Ok(peels > 0);
		}
		let mark = graph.id_bound();
		peel(graph, data.get_mut(id))?;
		peels += 1;
		graph.fold_constants(mark)?;
	}
	debug!("fully unrolled {} after {} peels", loop_begin, peels);
	Ok(peels > 0)
}

/// Groups the splits inside `lx` that branch on a loop invariant value.
/// Splits in one group test the same value the same way.
pub fn find_unswitchable(graph: &Graph, lx: &mut LoopEx) -> Vec<Vec<NodeId>> {
	let nodes = lx.whole_nodes(graph).clone();
	let mut groups: Vec<(NodeId, NodeKind, Vec<NodeId>)> = Vec::new();
	for node in nodes.live(graph) {
		let kind = graph.kind(node);
		let key_kind = match kind {
			NodeKind::If { .. } => NodeKind::If {
				true_probability: 0.0,
			},
			NodeKind::Switch { keys, .. } if !keys.is_empty() => NodeKind::Switch {
				keys: keys.clone(),
				probabilities: Vec::new(),
			},
			_ => continue,
		};
		let value = graph.input(node, 0);
		if nodes.is_marked(value) {
			continue;
		}
		match groups
			.iter_mut()
			.find(|(v, k, _)| *v == value && *k == key_kind)
		{
			Some((_, _, members)) => members.push(node),
			None => groups.push((value, key_kind, vec![node])),
		}
	}
	groups.into_iter().map(|(_, _, members)| members).collect()
}

/// Specializes `lx` for every outcome of the invariant `splits`: a copy
/// of the first split is placed in front of the loop and each successor
/// gets its own version of the loop with the splits folded away.
pub fn unswitch(graph: &mut Graph, lx: &mut LoopEx, splits: &[NodeId]) -> Result<()> {
	let Some(&first) = splits.first() else {
		return Err(OptError::FragmentState("nothing to unswitch".to_string()));
	};
	let loop_begin = lx.loop_begin();
	if let NodeKind::LoopBegin {
		loop_frequency,
		unswitches,
	} = graph.kind(loop_begin).clone()
	{
		graph.set_kind(
			loop_begin,
			NodeKind::LoopBegin {
				loop_frequency,
				unswitches: unswitches + 1,
			},
		);
	}

	let whole = lx.whole();
	// the node set has to describe the loop before anything is rewired
	whole.nodes(graph);
	let entry = whole.entry_point(graph)?;
	let slots = graph.succs(first).len();
	let kind = graph.kind(first).clone();
	let inputs = graph.inputs(first).to_vec();
	let new_split = graph.add_fixed(kind, inputs);
	graph.replace_at_predecessor(entry, Some(new_split));
	let original_begin = graph.add_fixed(NodeKind::Begin, vec![]);
	graph.set_succ(new_split, 0, Some(original_begin));
	graph.set_next(original_begin, Some(entry));

	for position in 1..slots {
		let copy = whole.duplicate(graph)?;
		let copy_entry = copy.entry_point(graph)?;
		let begin = graph.add_fixed(NodeKind::Begin, vec![]);
		graph.set_succ(new_split, position, Some(begin));
		graph.set_next(begin, Some(copy_entry));
		for &split in splits {
			let Some(copied) = copy.duplicated(split) else {
				continue;
			};
			if !graph.is_alive(copied) {
				continue;
			}
			let survivor = graph.succs(copied)[position].ok_or_else(|| {
				OptError::MalformedGraph(format!("{} has no successor {}", copied, position))
			})?;
			graph.remove_split_propagate(copied, survivor)?;
		}
	}

	for &split in splits {
		if !graph.is_alive(split) {
			continue;
		}
		let survivor = graph.succs(split)[0].ok_or_else(|| {
			OptError::MalformedGraph(format!("{} has no first successor", split))
		})?;
		graph.remove_split_propagate(split, survivor)?;
	}
	lx.invalidate();
	debug!("unswitched {} on {:?}", loop_begin, splits);
	Ok(())
}
