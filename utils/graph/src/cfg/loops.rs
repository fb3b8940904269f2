use std::collections::HashSet;

use utils::{OptError, Result};

use super::{BlockId, ControlFlowGraph, LoopId};
use crate::{graph::Graph, node::NodeId};

/// Natural loop of one `LoopBegin` header.
#[derive(Debug, Clone)]
pub struct Loop {
	pub id: LoopId,
	pub header: BlockId,
	// sorted by id, header included
	pub blocks: Vec<BlockId>,
	pub latches: Vec<BlockId>,
	pub exits: Vec<BlockId>,
	pub parent: Option<LoopId>,
	pub children: Vec<LoopId>,
	pub depth: usize,
}

impl Loop {
	pub fn contains(&self, block: BlockId) -> bool {
		self.blocks.binary_search(&block).is_ok()
	}

	pub fn is_exit(&self, block: BlockId) -> bool {
		self.exits.contains(&block)
	}

	pub fn begin(&self, cfg: &ControlFlowGraph) -> NodeId {
		cfg.block(self.header).begin
	}
}

pub(super) fn compute_loops(
	graph: &Graph,
	cfg: &mut ControlFlowGraph,
) -> Result<Vec<Loop>> {
	let mut loops: Vec<Loop> = Vec::new();
	for &header in cfg.rpo.iter() {
		let begin = cfg.blocks[header.0].begin;
		if !graph.kind(begin).is_loop_begin() {
			continue;
		}
		let latches: Vec<BlockId> = graph
			.loop_ends(begin)
			.iter()
			.filter_map(|&end| cfg.block_for(end))
			.collect();
		let mut in_body: HashSet<BlockId> = HashSet::from([header]);
		let mut blocks = vec![header];
		let mut work = latches.clone();
		while let Some(block) = work.pop() {
			if in_body.insert(block) {
				blocks.push(block);
				work.extend(cfg.blocks[block.0].preds.iter().copied());
			}
		}
		for &block in blocks.iter() {
			if !cfg.dominates(header, block) {
				return Err(OptError::IrreducibleLoop(
					cfg.blocks[block.0].begin.0,
					begin.0,
				));
			}
		}
		blocks.sort();
		let exits: Vec<BlockId> = graph
			.loop_exits(begin)
			.iter()
			.filter_map(|&exit| cfg.block_for(exit))
			.collect();
		loops.push(Loop {
			id: LoopId(loops.len()),
			header,
			blocks,
			latches,
			exits,
			parent: None,
			children: Vec::new(),
			depth: 1,
		});
	}

	// headers come in reverse post order, so parents precede children
	for index in 0..loops.len() {
		let header = loops[index].header;
		let parent = (0..index)
			.filter(|&j| loops[j].contains(header))
			.min_by_key(|&j| loops[j].blocks.len());
		if let Some(parent) = parent {
			loops[index].parent = Some(LoopId(parent));
			loops[index].depth = loops[parent].depth + 1;
			loops[parent].children.push(LoopId(index));
		}
	}
	for lp in loops.iter() {
		for &block in lp.blocks.iter() {
			cfg.blocks[block.0].loop_id = Some(lp.id);
		}
	}
	Ok(loops)
}

#[cfg(test)]
mod tests {
	use test_log::test;

	use super::*;
	use crate::{builder::GraphBuilder, node::Condition};

	#[test]
	fn nested_loops() {
		let mut b = GraphBuilder::new();
		let n = b.int_param(0);
		let zero = b.constant(0);
		let one = b.constant(1);
		let outer = b.begin_loop(10.0);
		let i = b.phi(outer, vec![zero]);
		let c1 = b.compare(Condition::Lt, i, n);
		let (body, exit) = b.exit_branch(c1, 0.9, outer, false);
		b.set_cursor(body);
		let inner = b.begin_loop(10.0);
		let j = b.phi(inner, vec![zero]);
		let c2 = b.compare(Condition::Lt, j, n);
		let (inner_body, inner_exit) = b.exit_branch(c2, 0.9, inner, false);
		b.set_cursor(inner_body);
		let j1 = b.add(j, one);
		b.loop_end(inner);
		b.add_phi_input(j, j1);
		b.set_cursor(inner_exit);
		let i1 = b.add(i, one);
		b.loop_end(outer);
		b.add_phi_input(i, i1);
		b.set_cursor(exit);
		b.ret(None);
		let g = b.finish();

		let cfg = ControlFlowGraph::compute(&g).unwrap();
		assert_eq!(cfg.loops().len(), 2);
		let lo = &cfg.loops()[0];
		let li = &cfg.loops()[1];
		assert_eq!(lo.begin(&cfg), outer);
		assert_eq!(li.begin(&cfg), inner);
		assert_eq!(li.parent, Some(lo.id));
		assert_eq!(lo.children, vec![li.id]);
		assert_eq!((lo.depth, li.depth), (1, 2));
		assert!(lo.contains(cfg.block_for(inner_exit).unwrap()));
		assert!(!li.contains(cfg.block_for(inner_exit).unwrap()));
		assert_eq!(li.exits, vec![cfg.block_for(inner_exit).unwrap()]);
		assert_eq!(lo.exits, vec![cfg.block_for(exit).unwrap()]);
		let header = cfg.block_for(outer).unwrap();
		assert!((cfg.block(header).frequency - 10.0).abs() < 1e-9);
	}
}
