pub mod dispatcher;
pub mod error;
pub mod status;

pub use dispatcher::{Dispatcher, DispatcherBuilder};
pub use error::DispatchError;
pub use status::{DispatchPhase, DispatchStatus, Drain, Progress, RunReport, StopReason};
