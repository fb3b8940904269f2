use graph::{Graph, NodeId};
use log::{debug, info};
use utils::{LoopOptions, Result};

use super::LoopPeeling;
use crate::{
	loops::{peel, DefaultLoopPolicies, LoopPolicies, LoopsData},
	LoopOptimizer,
};

impl LoopOptimizer for LoopPeeling {
	fn new(options: LoopOptions) -> Self {
		Self { options }
	}
	// 每个循环至多剥一次，外层优先
	fn apply(self, graph: &mut Graph) -> Result<bool> {
		let policies = DefaultLoopPolicies::new(self.options);
		let data = LoopsData::new(graph)?;
		let headers: Vec<NodeId> =
			data.outer_first().into_iter().map(|id| data.get(id).loop_begin()).collect();

		let mut flag = false;
		for header in headers {
			if !graph.is_alive(header) {
				continue;
			}
			let mut data = LoopsData::new(graph)?;
			let Some(id) = data.loop_for_header(header) else {
				continue;
			};
			let (lx, cfg) = data.split_mut(id);
			if !policies.should_peel(graph, cfg, lx) {
				debug!("not peeling {}", header);
				continue;
			}
			peel(graph, lx)?;
			data.delete_unused_nodes(graph);
			info!("peeled one iteration of {}", header);
			flag = true;
		}
		Ok(flag)
	}
}
