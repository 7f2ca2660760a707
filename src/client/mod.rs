pub mod http;
pub mod memory;
pub mod race;
pub mod traits;

pub use http::HttpGridClient;
pub use memory::MemoryGrid;
pub use race::RacedClient;
pub use traits::{
    FailureKind, PolicyHint, ReadError, RemoteReader, RequestClient, SendError, ServerStatus,
};
