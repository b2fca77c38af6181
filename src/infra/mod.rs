pub mod flags;
pub mod rate_limit;
pub mod reporter;
pub mod retry;

pub use flags::{ComponentToggle, FeatureToggleManager, FlagsSnapshot, PathChoice, ToggleMode};
pub use rate_limit::{RateLimiter, TokenBucket};
pub use reporter::{write_json_atomic, ArtifactReporter};
pub use retry::{compute_backoff, RetryPolicy};
