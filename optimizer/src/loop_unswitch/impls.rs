use graph::Graph;
use log::{debug, info, trace};
use utils::{LoopOptions, Result};

use super::LoopUnswitch;
use crate::{
	loops::{find_unswitchable, unswitch, DefaultLoopPolicies, LoopPolicies, LoopsData},
	LoopOptimizer,
};

impl LoopOptimizer for LoopUnswitch {
	fn new(options: LoopOptions) -> Self {
		Self { options }
	}
	fn apply(self, graph: &mut Graph) -> Result<bool> {
		// 找到第一个值得外提的不变分支组并执行，返回是否改变了图
		fn solve(graph: &mut Graph, policies: &DefaultLoopPolicies) -> Result<bool> {
			let mut data = LoopsData::new(graph)?;
			for id in data.outer_first() {
				if !policies.should_try_unswitch(graph, data.get(id)) {
					continue;
				}
				let (lx, cfg) = data.split_mut(id);
				let groups = find_unswitchable(graph, lx);
				trace!("{} has {} invariant split groups", lx.loop_begin(), groups.len());
				let Some(splits) = groups
					.into_iter()
					.find(|splits| policies.should_unswitch(graph, cfg, lx, splits))
				else {
					debug!("no affordable unswitch for {}", lx.loop_begin());
					continue;
				};
				let header = lx.loop_begin();
				unswitch(graph, lx, &splits)?;
				data.delete_unused_nodes(graph);
				info!("unswitched {} on {} splits", header, splits.len());
				return Ok(true);
			}
			Ok(false)
		}

		let policies = DefaultLoopPolicies::new(self.options);
		let mut flag = false;
		while solve(graph, &policies)? {
			flag = true;
		}
		Ok(flag)
	}
}

#[cfg(test)]
mod tests {
	use graph::NodeKind;
	use test_log::test;

	use super::*;
	use crate::loops::test_utils::*;

	#[test]
	fn stops_at_the_unswitch_limit() {
		let built = invariant_branch_loop(10.0, 0);
		let mut graph = built.graph.clone();
		let options = LoopOptions {
			loop_max_unswitch: 1,
			..LoopOptions::default()
		};
		assert!(LoopUnswitch::new(options).apply(&mut graph).unwrap());
		let data = LoopsData::new(&graph).unwrap();
		assert_eq!(data.loops().len(), 2);
		for lx in data.loops() {
			assert_eq!(lx.unswitches(&graph), 1);
		}
		assert!(!graph.is_alive(built.split));
		// the original loop serves the first successor
		assert!(data.loop_for_header(built.loop_begin).is_some());
		assert_equivalent(&built.graph, &graph, 1, 4);
	}

	#[test]
	fn each_version_is_free_of_the_split() {
		let built = invariant_branch_loop(10.0, 0);
		let mut graph = built.graph.clone();
		assert!(LoopUnswitch::new(LoopOptions::default()).apply(&mut graph).unwrap());
		let mut data = LoopsData::new(&graph).unwrap();
		for id in data.outer_first() {
			let lx = data.get_mut(id);
			assert!(find_unswitchable(&graph, lx).is_empty());
			let ifs = lx
				.whole_nodes(&graph)
				.live(&graph)
				.into_iter()
				.filter(|&n| matches!(graph.kind(n), NodeKind::If { .. }))
				.count();
			// only the loop test is left
			assert_eq!(ifs, 1);
		}
		assert_equivalent(&built.graph, &graph, 1, 8);
	}

	#[test]
	fn anchored_loops_stay() {
		let built = anchored_loop();
		let mut graph = built.graph.clone();
		assert!(!LoopUnswitch::new(LoopOptions::default()).apply(&mut graph).unwrap());
		assert!(graph.is_alive(built.split));
	}
}
