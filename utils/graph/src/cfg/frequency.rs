use super::ControlFlowGraph;
use crate::{
	graph::Graph,
	node::{NodeId, NodeKind},
};

/// Relative execution frequency of every block, the start block being 1.
/// Branch probabilities split a frequency, loop headers scale the sum of
/// their forward predecessors by the loop frequency.
pub(super) fn compute_frequencies(graph: &Graph, cfg: &mut ControlFlowGraph) {
	let rpo = cfg.rpo.clone();
	for (index, &block) in rpo.iter().enumerate() {
		if index == 0 {
			cfg.blocks[block.0].frequency = 1.0;
			continue;
		}
		let begin = cfg.blocks[block.0].begin;
		let mut frequency = 0.0;
		for pred in cfg.blocks[block.0].preds.clone() {
			let end = cfg.blocks[pred.0].end;
			if matches!(graph.kind(end), NodeKind::LoopEnd) {
				continue;
			}
			frequency += cfg.blocks[pred.0].frequency * edge_probability(graph, end, begin);
		}
		if let NodeKind::LoopBegin { loop_frequency, .. } = graph.kind(begin) {
			frequency *= loop_frequency;
		}
		cfg.blocks[block.0].frequency = frequency;
	}
}

fn edge_probability(graph: &Graph, from: NodeId, to: NodeId) -> f64 {
	match graph.kind(from) {
		NodeKind::If { true_probability } => {
			if graph.succs(from)[0] == Some(to) {
				*true_probability
			} else {
				1.0 - true_probability
			}
		}
		NodeKind::Switch { probabilities, .. } => graph
			.succs(from)
			.iter()
			.position(|&s| s == Some(to))
			.and_then(|index| probabilities.get(index).copied())
			.unwrap_or(0.0),
		_ => 1.0,
	}
}
