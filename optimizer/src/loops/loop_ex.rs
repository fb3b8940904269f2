use graph::{ControlFlowGraph, Graph, Loop, LoopId, NodeBitMap, NodeId, NodeKind, StateKind};
use utils::Result;

use super::{
	counted::CountedLoopInfo,
	fragment::{compute_nodes, LoopFragment, LoopFragmentInside, LoopFragmentWhole},
	indvar::InductionVariables,
};

/// Fixed-node view of one loop, captured when the control flow graph was
/// computed. Fragments and induction variables are derived from it.
#[derive(Debug, Clone)]
pub struct LoopShape {
	pub loop_begin: NodeId,
	pub block_begins: Vec<NodeId>,
	// every fixed node of every block of the loop
	pub fixed_nodes: Vec<NodeId>,
	pub exits: Vec<NodeId>,
}

impl LoopShape {
	fn new(lp: &Loop, cfg: &ControlFlowGraph) -> Self {
		let mut block_begins = Vec::new();
		let mut fixed_nodes = Vec::new();
		for &id in lp.blocks.iter() {
			let block = cfg.block(id);
			block_begins.push(block.begin);
			fixed_nodes.extend(block.nodes.iter().copied());
		}
		let exits = lp.exits.iter().map(|&id| cfg.block(id).begin).collect();
		Self {
			loop_begin: lp.begin(cfg),
			block_begins,
			fixed_nodes,
			exits,
		}
	}
}

/// One loop of the graph together with lazily computed facts about it.
///
/// All caches describe the graph as it was when they were filled; any
/// transformation of the loop has to call `invalidate` afterwards.
pub struct LoopEx {
	id: LoopId,
	shape: LoopShape,
	depth: usize,
	parent: Option<LoopId>,
	inside: Option<LoopFragmentInside>,
	whole: Option<LoopFragmentWhole>,
	counted: Option<CountedLoopInfo>,
	ivs: Option<InductionVariables>,
}

impl LoopEx {
	pub(crate) fn new(lp: &Loop, cfg: &ControlFlowGraph) -> Self {
		Self {
			id: lp.id,
			shape: LoopShape::new(lp, cfg),
			depth: lp.depth,
			parent: lp.parent,
			inside: None,
			whole: None,
			counted: None,
			ivs: None,
		}
	}

	pub fn id(&self) -> LoopId {
		self.id
	}

	pub fn loop_begin(&self) -> NodeId {
		self.shape.loop_begin
	}

	pub fn shape(&self) -> &LoopShape {
		&self.shape
	}

	pub fn depth(&self) -> usize {
		self.depth
	}

	pub fn parent(&self) -> Option<LoopId> {
		self.parent
	}

	pub fn get_loop<'c>(&self, cfg: &'c ControlFlowGraph) -> &'c Loop {
		cfg.get_loop(self.id)
	}

	pub fn inside(&mut self) -> &mut LoopFragmentInside {
		let shape = &self.shape;
		self
			.inside
			.get_or_insert_with(|| LoopFragmentInside::new(shape.clone()))
	}

	pub fn whole(&mut self) -> &mut LoopFragmentWhole {
		let shape = &self.shape;
		self
			.whole
			.get_or_insert_with(|| LoopFragmentWhole::new(shape.clone()))
	}

	pub fn whole_nodes(&mut self, graph: &Graph) -> &NodeBitMap {
		self.whole().nodes(graph)
	}

	/// Number of nodes in the whole loop.
	pub fn size(&mut self, graph: &Graph) -> usize {
		self.whole_nodes(graph).live(graph).len()
	}

	pub fn is_outside_loop(&mut self, graph: &Graph, node: NodeId) -> bool {
		!self.whole_nodes(graph).is_marked(node)
	}

	/// Induction variables of the loop, found on first use.
	pub fn induction_variables(&mut self, graph: &Graph) -> &InductionVariables {
		self.induction_variables_mut(graph)
	}

	/// Mutable view for building init and stride nodes.
	pub(crate) fn induction_variables_mut(&mut self, graph: &Graph) -> &mut InductionVariables {
		let shape = &self.shape;
		let whole = self
			.whole
			.get_or_insert_with(|| LoopFragmentWhole::new(shape.clone()));
		self
			.ivs
			.get_or_insert_with(|| InductionVariables::find(graph, shape, whole.nodes(graph)))
	}

	/// Tries to recognise the loop as counted and caches the result.
	pub fn detect_counted(&mut self, graph: &Graph) -> bool {
		if self.counted.is_some() {
			return true;
		}
		self.induction_variables(graph);
		let (Some(whole), Some(ivs)) = (self.whole.as_mut(), self.ivs.as_ref()) else {
			return false;
		};
		self.counted = CountedLoopInfo::detect(graph, &self.shape, whole.nodes(graph), ivs);
		self.counted.is_some()
	}

	pub fn is_counted(&self) -> bool {
		self.counted.is_some()
	}

	pub fn counted(&self) -> Option<&CountedLoopInfo> {
		self.counted.as_ref()
	}

	/// Counted facts paired with the induction variables they refer to.
	pub fn counted_with_ivs(&self) -> Option<(&CountedLoopInfo, &InductionVariables)> {
		Some((self.counted.as_ref()?, self.ivs.as_ref()?))
	}

	pub fn constant_max_trip_count(&mut self, graph: &Graph) -> Option<u64> {
		if !self.detect_counted(graph) {
			return None;
		}
		let (counted, ivs) = self.counted_with_ivs()?;
		counted.constant_max_trip_count(graph, ivs)
	}

	pub fn constant_exact_trip_count(&mut self, graph: &Graph) -> Option<u64> {
		if !self.detect_counted(graph) {
			return None;
		}
		let (counted, ivs) = self.counted_with_ivs()?;
		counted.constant_exact_trip_count(graph, ivs)
	}

	pub fn loop_frequency(&self, graph: &Graph) -> f64 {
		match graph.kind(self.loop_begin()) {
			NodeKind::LoopBegin { loop_frequency, .. } => *loop_frequency,
			_ => 1.0,
		}
	}

	pub fn unswitches(&self, graph: &Graph) -> u32 {
		match graph.kind(self.loop_begin()) {
			NodeKind::LoopBegin { unswitches, .. } => *unswitches,
			_ => 0,
		}
	}

	/// Probability of reaching the loop from the enclosing code.
	pub fn entry_probability(&self, graph: &Graph, cfg: &ControlFlowGraph) -> Result<f64> {
		let forward = graph.single_forward_end(self.loop_begin())?;
		Ok(cfg.frequency(forward))
	}

	/// Whether copies of this loop would be valid: no node of the loop may
	/// pin the control flow or record an exceptional state.
	pub fn can_duplicate_loop(&mut self, graph: &Graph) -> bool {
		self.whole_nodes(graph).iter().all(|node| {
			!graph.is_alive(node)
				|| !matches!(
					graph.kind(node),
					NodeKind::ControlFlowAnchor
						| NodeKind::FrameState(StateKind::AfterException)
						| NodeKind::FrameState(StateKind::Unwind)
				)
		})
	}

	/// Nodes only reachable through `branch`: the blocks it dominates,
	/// without the loop exits, plus their floating nodes.
	pub fn nodes_in_loop_branch(
		&self,
		graph: &Graph,
		cfg: &ControlFlowGraph,
		branch: NodeId,
	) -> NodeBitMap {
		let lp = self.get_loop(cfg);
		let Some(start) = cfg.block_for(branch) else {
			return NodeBitMap::new(graph);
		};
		let mut fixed = Vec::new();
		let mut stack = vec![start];
		while let Some(block) = stack.pop() {
			if lp.is_exit(block) || !lp.contains(block) {
				continue;
			}
			fixed.extend(cfg.block(block).nodes.iter().copied());
			stack.extend(cfg.block(block).dominated.iter().copied());
		}
		compute_nodes(graph, &fixed, &[])
	}

	/// Drops cached fragments after the loop's node set changed.
	pub fn invalidate_fragments(&mut self) {
		self.inside = None;
		self.whole = None;
	}

	pub fn invalidate(&mut self) {
		self.invalidate_fragments();
		self.counted = None;
		self.ivs = None;
	}

	pub(crate) fn take_ivs(&mut self) -> Option<InductionVariables> {
		self.ivs.take()
	}
}
