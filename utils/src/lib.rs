pub mod constants;
pub mod errors;
pub mod options;

pub use constants::*;
pub use errors::*;
pub use options::LoopOptions;
