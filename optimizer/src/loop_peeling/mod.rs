use utils::LoopOptions;

pub mod impls;

pub struct LoopPeeling {
	options: LoopOptions,
}
