pub mod dominator;
pub mod frequency;
pub mod loops;

use std::collections::HashMap;

use log::trace;
use utils::{malformed, OptError, Result};

use crate::{
	graph::Graph,
	node::{NodeId, NodeKind},
};
pub use loops::Loop;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockId(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LoopId(pub usize);

/// Maximal run of fixed nodes from a begin-like node to the next split,
/// end or begin-like node.
#[derive(Debug, Clone)]
pub struct Block {
	pub id: BlockId,
	pub begin: NodeId,
	pub end: NodeId,
	pub nodes: Vec<NodeId>,
	pub preds: Vec<BlockId>,
	pub succs: Vec<BlockId>,
	pub dominator: Option<BlockId>,
	pub dominated: Vec<BlockId>,
	pub dom_depth: usize,
	pub postdominator: Option<BlockId>,
	pub loop_id: Option<LoopId>,
	pub frequency: f64,
}

pub struct ControlFlowGraph {
	blocks: Vec<Block>,
	block_of: HashMap<NodeId, BlockId>,
	rpo: Vec<BlockId>,
	loops: Vec<Loop>,
}

impl ControlFlowGraph {
	/// Builds blocks, dominators, postdominators, loops and block
	/// frequencies for everything reachable from the start node.
	pub fn compute(graph: &Graph) -> Result<Self> {
		let mut cfg = Self {
			blocks: Vec::new(),
			block_of: HashMap::new(),
			rpo: Vec::new(),
			loops: Vec::new(),
		};
		cfg.identify_blocks(graph)?;
		cfg.compute_dominators();
		cfg.compute_postdominators();
		cfg.loops = loops::compute_loops(graph, &mut cfg)?;
		frequency::compute_frequencies(graph, &mut cfg);
		trace!(
			"cfg: {} blocks, {} loops",
			cfg.blocks.len(),
			cfg.loops.len()
		);
		Ok(cfg)
	}

	fn identify_blocks(&mut self, graph: &Graph) -> Result<()> {
		let mut successor_begins: Vec<Vec<NodeId>> = Vec::new();
		let mut stack = vec![graph.start()];
		while let Some(begin) = stack.pop() {
			if self.block_of.contains_key(&begin) {
				continue;
			}
			let id = BlockId(self.blocks.len());
			let mut nodes = vec![begin];
			let mut current = begin;
			let targets: Vec<NodeId> = loop {
				let kind = graph.kind(current);
				if kind.succ_slots() == 1 {
					let next = graph
						.next(current)
						.ok_or(OptError::DanglingControl(current.0))?;
					if graph.kind(next).is_begin_like() {
						break vec![next];
					}
					nodes.push(next);
					current = next;
					continue;
				}
				match kind {
					NodeKind::If { .. } | NodeKind::Switch { .. } => {
						let mut targets = Vec::new();
						for succ in graph.succs(current) {
							targets.push(succ.ok_or(OptError::DanglingControl(current.0))?);
						}
						break targets;
					}
					NodeKind::End | NodeKind::LoopEnd => match graph.merge_of_end(current) {
						Some(merge) => break vec![merge],
						None => return malformed(format!("{} flows into no merge", current)),
					},
					_ => break vec![],
				}
			};
			for &node in nodes.iter() {
				self.block_of.insert(node, id);
			}
			self.blocks.push(Block {
				id,
				begin,
				end: current,
				nodes,
				preds: Vec::new(),
				succs: Vec::new(),
				dominator: None,
				dominated: Vec::new(),
				dom_depth: 0,
				postdominator: None,
				loop_id: None,
				frequency: 0.0,
			});
			// reversed so the first successor is visited first
			stack.extend(targets.iter().rev().copied());
			successor_begins.push(targets);
		}

		for (index, targets) in successor_begins.into_iter().enumerate() {
			for target in targets {
				let succ = self.block_of[&target];
				self.blocks[index].succs.push(succ);
				self.blocks[succ.0].preds.push(BlockId(index));
			}
		}
		Ok(())
	}

	fn compute_dominators(&mut self) {
		let n = self.blocks.len();
		let succs = |v: usize| -> Vec<usize> {
			self.blocks[v].succs.iter().map(|b| b.0).collect()
		};
		let preds = |v: usize| -> Vec<usize> {
			self.blocks[v].preds.iter().map(|b| b.0).collect()
		};
		let rpo = dominator::reverse_post_order(n, 0, &succs);
		let idom = dominator::immediate_dominators(n, 0, &succs, &preds);
		self.rpo = rpo.into_iter().map(BlockId).collect();
		for v in 1..n {
			if let Some(d) = idom[v] {
				self.blocks[v].dominator = Some(BlockId(d));
				self.blocks[d].dominated.push(BlockId(v));
			}
		}
		for index in 0..self.rpo.len() {
			let block = self.rpo[index];
			if let Some(d) = self.blocks[block.0].dominator {
				self.blocks[block.0].dom_depth = self.blocks[d.0].dom_depth + 1;
			}
		}
	}

	/// Postdominators on the reversed graph rooted at a virtual exit that
	/// every block without successors flows into.
	fn compute_postdominators(&mut self) {
		let n = self.blocks.len();
		let exit = n;
		let succs = |v: usize| -> Vec<usize> {
			if v == exit {
				(0..n).filter(|&b| self.blocks[b].succs.is_empty()).collect()
			} else {
				self.blocks[v].preds.iter().map(|b| b.0).collect()
			}
		};
		let preds = |v: usize| -> Vec<usize> {
			if v == exit {
				return vec![];
			}
			let block = &self.blocks[v];
			if block.succs.is_empty() {
				vec![exit]
			} else {
				block.succs.iter().map(|b| b.0).collect()
			}
		};
		let ipdom = dominator::immediate_dominators(n + 1, exit, &succs, &preds);
		for v in 0..n {
			self.blocks[v].postdominator = match ipdom[v] {
				Some(p) if p != exit => Some(BlockId(p)),
				_ => None,
			};
		}
	}

	pub fn blocks(&self) -> &[Block] {
		&self.blocks
	}

	pub fn block(&self, id: BlockId) -> &Block {
		&self.blocks[id.0]
	}

	pub fn block_for(&self, node: NodeId) -> Option<BlockId> {
		self.block_of.get(&node).copied()
	}

	pub fn rpo(&self) -> &[BlockId] {
		&self.rpo
	}

	pub fn loops(&self) -> &[Loop] {
		&self.loops
	}

	pub fn get_loop(&self, id: LoopId) -> &Loop {
		&self.loops[id.0]
	}

	pub fn dominates(&self, a: BlockId, b: BlockId) -> bool {
		let depth = self.blocks[a.0].dom_depth;
		let mut current = b;
		while self.blocks[current.0].dom_depth > depth {
			match self.blocks[current.0].dominator {
				Some(d) => current = d,
				None => return false,
			}
		}
		current == a
	}

	pub fn frequency(&self, node: NodeId) -> f64 {
		self
			.block_for(node)
			.map_or(0.0, |b| self.blocks[b.0].frequency)
	}
}

#[cfg(test)]
mod tests {
	use test_log::test;

	use super::*;
	use crate::{builder::GraphBuilder, node::Condition};

	#[test]
	fn diamond_blocks() {
		let mut b = GraphBuilder::new();
		let x = b.int_param(0);
		let zero = b.constant(0);
		let cond = b.compare(Condition::Lt, x, zero);
		let (t, f) = b.branch(cond, 0.25);
		b.set_cursor(t);
		let e1 = b.end();
		b.set_cursor(f);
		let e2 = b.end();
		let merge = b.merge(vec![e1, e2]);
		let ret = b.ret(None);
		let g = b.finish();
		let cfg = ControlFlowGraph::compute(&g).unwrap();
		assert_eq!(cfg.blocks().len(), 4);
		let entry = cfg.block_for(g.start()).unwrap();
		let bt = cfg.block_for(t).unwrap();
		let bm = cfg.block_for(merge).unwrap();
		assert_eq!(cfg.block_for(ret), Some(bm));
		assert_eq!(cfg.block(bm).dominator, Some(entry));
		assert_eq!(cfg.block(entry).postdominator, Some(bm));
		assert!(cfg.dominates(entry, bt));
		assert!(!cfg.dominates(bt, bm));
		assert!((cfg.frequency(t) - 0.25).abs() < 1e-9);
		assert!((cfg.frequency(ret) - 1.0).abs() < 1e-9);
	}

	#[test]
	fn dangling_control_is_reported() {
		let mut b = GraphBuilder::new();
		b.append(NodeKind::Anchor, vec![]);
		let g = b.finish();
		assert!(matches!(
			ControlFlowGraph::compute(&g),
			Err(OptError::DanglingControl(_))
		));
	}
}
