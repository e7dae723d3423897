//! HTTP handlers.

pub mod archives;
pub mod downloads;
pub mod health;
pub mod progress;

pub use archives::*;
pub use downloads::*;
pub use health::*;
pub use progress::*;
