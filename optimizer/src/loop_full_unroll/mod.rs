use utils::LoopOptions;

pub mod impls;

pub struct LoopFullUnroll {
	options: LoopOptions,
}
