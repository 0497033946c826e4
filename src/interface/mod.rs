pub mod handler;

pub use handler::{ElectionHandler, LeaderContext};
