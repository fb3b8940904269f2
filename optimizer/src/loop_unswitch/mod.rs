use utils::LoopOptions;

pub mod impls;

pub struct LoopUnswitch {
	options: LoopOptions,
}
