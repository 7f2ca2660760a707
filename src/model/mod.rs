pub mod operation;
pub mod session;

pub use operation::{Color, Coord, Operation, Region, ResourceId};
pub use session::{PendingOperation, Session, SessionId};
