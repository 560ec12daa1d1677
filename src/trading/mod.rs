pub mod dispatcher;
pub mod fills;
pub mod leader_tracker;
pub mod orchestrator;
pub mod positions;

pub use dispatcher::{DispatchOutcome, DispatchRequest, Dispatcher};
pub use orchestrator::Orchestrator;
pub use positions::{Position, PositionLedger};
