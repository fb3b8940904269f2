use thiserror::Error;

/// Failures of the loop engine and of the graph analyses it consumes.
///
/// Node identities are carried as raw arena indices so this crate stays
/// independent of the graph crate.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OptError {
	#[error("control node n{0} has an unset successor")]
	DanglingControl(u32),
	#[error("irreducible loop: block at n{0} is not dominated by header n{1}")]
	IrreducibleLoop(u32, u32),
	#[error("malformed graph: {0}")]
	MalformedGraph(String),
	#[error("fragment misuse: {0}")]
	FragmentState(String),
	#[error("loop n{0} has {1} forward ends, expected exactly one")]
	ForwardEndCount(u32, usize),
	#[error("phi n{0} has {1} values but its merge has {2} ends")]
	PhiArity(u32, usize, usize),
	#[error("interpreter: {0}")]
	Interpreter(String),
}

pub type Result<T> = std::result::Result<T, OptError>;

pub fn malformed<T>(msg: impl Into<String>) -> Result<T> {
	Err(OptError::MalformedGraph(msg.into()))
}
