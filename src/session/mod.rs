pub mod manager;
pub mod reconcile;

pub use manager::{Preflight, ResumeMode, SessionError, SessionManager};
pub use reconcile::find_missing;
