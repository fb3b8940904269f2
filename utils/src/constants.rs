pub const MINIMUM_PEEL_PROBABILITY: f64 = 0.35;
pub const MAXIMUM_DESIRED_SIZE: usize = 20000;

pub const EXACT_FULL_UNROLL_MAX_NODES: usize = 1200;
pub const FULL_UNROLL_MAX_NODES: usize = 300;
pub const FULL_UNROLL_MAX_ITERATIONS: u64 = 600;
// 一次 apply 中最多完全展开的循环个数
pub const FULL_UNROLL_MAX_APPLICATION: usize = 60;

pub const LOOP_MAX_UNSWITCH: u32 = 3;
pub const LOOP_UNSWITCH_MAX_INCREASE: usize = 500;
pub const LOOP_UNSWITCH_TRIVIAL: usize = 10;
pub const LOOP_UNSWITCH_FREQUENCY_BOOST: f64 = 10.0;

// 超过后解释器直接停止
pub const MAX_INTERP_STEPS: usize = 100000;

pub const DEFAULT_INT_BITS: u32 = 32;
