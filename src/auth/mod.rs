mod refresh;
mod resolver;

pub use refresh::{HttpTokenRefresher, TokenRefresher};
pub use resolver::{AuthAttempt, AuthFallbackResolver, AuthPolicy, Resolution};
