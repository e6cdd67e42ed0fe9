//! Rate limiting logic and state management.

mod key;
mod limiter;
mod store;
mod window;

pub use key::{ClientIdentifier, ClientKey};
pub use limiter::{Decision, LimitPolicy, RateLimitStatus, RateLimiter};
pub use store::{InMemoryStore, RateLimitStore};
pub use window::WindowState;
