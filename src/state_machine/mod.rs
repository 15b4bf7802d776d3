mod report;
mod state;

pub use report::{COMPLETED, InvocationReport};
pub use state::{DriverState, StateMachine, TransitionError};
