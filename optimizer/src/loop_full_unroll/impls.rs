use std::collections::HashSet;

use graph::{Graph, NodeId};
use log::{debug, info, warn};
use utils::{LoopOptions, Result, FULL_UNROLL_MAX_APPLICATION};

use super::LoopFullUnroll;
use crate::{
	loops::{full_unroll, DefaultLoopPolicies, LoopPolicies, LoopsData},
	LoopOptimizer,
};

impl LoopOptimizer for LoopFullUnroll {
	fn new(options: LoopOptions) -> Self {
		Self { options }
	}
	fn apply(self, graph: &mut Graph) -> Result<bool> {
		// 内层优先，每轮只展开一个循环，之后重新分析
		fn pick(
			graph: &mut Graph,
			policies: &DefaultLoopPolicies,
			given_up: &HashSet<NodeId>,
		) -> Result<Option<(NodeId, u64)>> {
			let mut data = LoopsData::new(graph)?;
			data.detect_counted_loops(graph);
			let mut target = None;
			for id in data.inner_first() {
				let lx = data.get_mut(id);
				if !lx.is_counted() || given_up.contains(&lx.loop_begin()) {
					continue;
				}
				if policies.should_full_unroll(graph, lx) {
					target = lx
						.constant_max_trip_count(graph)
						.map(|trips| (lx.loop_begin(), trips));
					break;
				}
			}
			data.delete_unused_nodes(graph);
			Ok(target)
		}

		let policies = DefaultLoopPolicies::new(self.options);
		let mut given_up = HashSet::new();
		let mut flag = false;
		for _ in 0..FULL_UNROLL_MAX_APPLICATION {
			let Some((header, trips)) = pick(graph, &policies, &given_up)? else {
				break;
			};
			debug!("fully unrolling {} with at most {} trips", header, trips);
			flag |= full_unroll(graph, header, trips.saturating_add(1))?;
			if graph.is_alive(header) {
				warn!("{} survived full unrolling", header);
				given_up.insert(header);
			} else {
				info!("fully unrolled {}", header);
			}
		}
		Ok(flag)
	}
}
