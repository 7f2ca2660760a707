//! Rate-limited, resumable dispatch of keyed write operations to a remote grid.
//!
//! A [`dispatch::Dispatcher`] drains a session's queue one send at a time
//! through a [`limiter::RateLimiter`], persisting progress through a
//! [`storage::CheckpointStore`] so an interrupted batch can be resumed or
//! validated against remote state with a [`session::SessionManager`].

pub mod cli;
pub mod client;
pub mod config;
pub mod dispatch;
pub mod limiter;
pub mod model;
pub mod session;
pub mod storage;
