mod message;
mod stats;
mod health;

pub use message::*;
pub use stats::*;
pub use health::*;
