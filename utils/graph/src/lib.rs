pub mod bitmap;
pub mod builder;
mod canonical;
pub mod cfg;
mod duplicate;
pub mod graph;
pub mod interp;
mod kill;
pub mod node;
pub mod stamp;

pub use bitmap::NodeBitMap;
pub use builder::GraphBuilder;
pub use cfg::{BlockId, ControlFlowGraph, Loop, LoopId};
pub use graph::Graph;
pub use node::{
	BinaryOp, Condition, ConvertOp, GuardsStage, NodeId, NodeKind, StateKind,
};
pub use stamp::{IntegerStamp, Stamp};
