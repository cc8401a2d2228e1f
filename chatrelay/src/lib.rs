pub mod apology;
pub mod client;
pub mod clock;
pub mod config;
pub mod error;
pub mod fallback;
pub mod providers;
pub mod registry;
pub mod retry;
pub mod types;

// Re-exports for convenience
pub use client::{RelayBuilder, RelayClient};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{ConfigManager, RelayConfig};
pub use error::{AiError, ErrorKind, RelayError};
pub use fallback::{FallbackManager, FallbackPolicy};
pub use providers::Adapter;
pub use registry::ProviderRegistry;
pub use retry::{RetryConfig, RetryDriver, backoff_delay, retry_same};
pub use tokio_util::sync::CancellationToken;
pub use types::*;
