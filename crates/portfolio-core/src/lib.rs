pub mod config;
pub mod error;
pub mod rate_limiter;
pub mod retry;
pub mod stats;
pub mod traits;
pub mod types;

pub use config::PortfolioConfig;
pub use error::{PortfolioError, Result};
pub use rate_limiter::RateLimiter;
pub use retry::{retry, RetryPolicy};
pub use traits::*;
pub use types::*;
