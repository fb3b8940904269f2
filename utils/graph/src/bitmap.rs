use crate::{graph::Graph, node::NodeId};

/// Set of nodes backed by one bit per node id; grows when marking ids
/// created after the map.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeBitMap {
	words: Vec<u64>,
	count: usize,
}

impl NodeBitMap {
	const BITS_PER_WORD: usize = 64;

	pub fn new(graph: &Graph) -> Self {
		let words = (graph.id_bound() as usize).div_ceil(Self::BITS_PER_WORD);
		Self {
			words: vec![0; words],
			count: 0,
		}
	}

	fn word_and_bit(id: NodeId) -> (usize, u64) {
		let index = id.index();
		(index / Self::BITS_PER_WORD, 1u64 << (index % Self::BITS_PER_WORD))
	}

	pub fn is_marked(&self, id: NodeId) -> bool {
		let (word, bit) = Self::word_and_bit(id);
		self.words.get(word).map_or(false, |w| w & bit != 0)
	}

	pub fn mark(&mut self, id: NodeId) {
		let (word, bit) = Self::word_and_bit(id);
		if word >= self.words.len() {
			self.words.resize(word + 1, 0);
		}
		if self.words[word] & bit == 0 {
			self.words[word] |= bit;
			self.count += 1;
		}
	}

	pub fn clear(&mut self, id: NodeId) {
		let (word, bit) = Self::word_and_bit(id);
		if let Some(w) = self.words.get_mut(word) {
			if *w & bit != 0 {
				*w &= !bit;
				self.count -= 1;
			}
		}
	}

	pub fn count(&self) -> usize {
		self.count
	}

	pub fn is_empty(&self) -> bool {
		self.count == 0
	}

	pub fn iter(&self) -> impl Iterator<Item = NodeId> + '_ {
		self.words.iter().enumerate().flat_map(|(index, &word)| {
			let mut rest = word;
			std::iter::from_fn(move || {
				if rest == 0 {
					return None;
				}
				let bit = rest.trailing_zeros() as usize;
				rest &= rest - 1;
				Some(NodeId((index * Self::BITS_PER_WORD + bit) as u32))
			})
		})
	}

	/// Marked ids that are still alive in `graph`, in id order.
	pub fn live(&self, graph: &Graph) -> Vec<NodeId> {
		self.iter().filter(|&id| graph.is_alive(id)).collect()
	}
}

impl FromIterator<NodeId> for NodeBitMap {
	fn from_iter<T: IntoIterator<Item = NodeId>>(iter: T) -> Self {
		let mut map = NodeBitMap::default();
		for id in iter {
			map.mark(id);
		}
		map
	}
}
