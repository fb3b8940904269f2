pub mod counted;
pub mod fragment;
pub mod indvar;
pub mod loop_data;
pub mod loop_ex;
pub mod policies;
pub mod reassociate;
pub mod transform;

#[cfg(test)]
pub(crate) mod test_utils;

pub use counted::CountedLoopInfo;
pub use fragment::{LoopFragment, LoopFragmentInside, LoopFragmentWhole};
pub use indvar::{Direction, InductionVariable, InductionVariables, IvId, IvKind};
pub use loop_data::LoopsData;
pub use loop_ex::{LoopEx, LoopShape};
pub use policies::{DefaultLoopPolicies, LoopPolicies};
pub use transform::{find_unswitchable, full_unroll, peel, unswitch};
