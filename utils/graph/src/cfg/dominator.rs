/// Immediate dominators over an abstract graph of `n` vertices using the
/// Cooper-Harvey-Kennedy iteration on reverse post order.
///
/// Unreachable vertices get `None`; the entry maps to itself.
pub fn immediate_dominators(
	n: usize,
	entry: usize,
	succs: &dyn Fn(usize) -> Vec<usize>,
	preds: &dyn Fn(usize) -> Vec<usize>,
) -> Vec<Option<usize>> {
	let rpo = reverse_post_order(n, entry, succs);
	let mut order = vec![usize::MAX; n];
	for (index, &v) in rpo.iter().enumerate() {
		order[v] = index;
	}
	let mut idom: Vec<Option<usize>> = vec![None; n];
	idom[entry] = Some(entry);

	let intersect = |idom: &Vec<Option<usize>>, mut a: usize, mut b: usize| {
		while a != b {
			while order[a] > order[b] {
				a = idom[a].unwrap_or(entry);
			}
			while order[b] > order[a] {
				b = idom[b].unwrap_or(entry);
			}
		}
		a
	};

	let mut changed = true;
	while changed {
		changed = false;
		for &v in rpo.iter().skip(1) {
			let mut new_idom: Option<usize> = None;
			for p in preds(v) {
				if order[p] == usize::MAX || idom[p].is_none() {
					continue;
				}
				new_idom = Some(match new_idom {
					None => p,
					Some(current) => intersect(&idom, p, current),
				});
			}
			if new_idom.is_some() && idom[v] != new_idom {
				idom[v] = new_idom;
				changed = true;
			}
		}
	}
	idom
}

pub fn reverse_post_order(
	n: usize,
	entry: usize,
	succs: &dyn Fn(usize) -> Vec<usize>,
) -> Vec<usize> {
	let mut visited = vec![false; n];
	let mut post = Vec::with_capacity(n);
	let mut stack: Vec<(usize, Vec<usize>, usize)> = vec![(entry, succs(entry), 0)];
	visited[entry] = true;
	while let Some((v, children, index)) = stack.last_mut() {
		if *index < children.len() {
			let child = children[*index];
			*index += 1;
			if !visited[child] {
				visited[child] = true;
				let grand = succs(child);
				stack.push((child, grand, 0));
			}
		} else {
			post.push(*v);
			stack.pop();
		}
	}
	post.reverse();
	post
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn diamond_with_loop() {
		// 0 -> 1 -> {2, 3} -> 4 -> 1, 4 -> 5
		let edges: Vec<Vec<usize>> =
			vec![vec![1], vec![2, 3], vec![4], vec![4], vec![1, 5], vec![]];
		let preds = |v: usize| {
			(0..edges.len())
				.filter(|&u| edges[u].contains(&v))
				.collect::<Vec<_>>()
		};
		let succs = |v: usize| edges[v].clone();
		let idom = immediate_dominators(6, 0, &succs, &preds);
		assert_eq!(idom, vec![Some(0), Some(0), Some(1), Some(1), Some(1), Some(4)]);
	}
}
