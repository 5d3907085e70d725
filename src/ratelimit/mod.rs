//! Rule matching and fixed-window counting.

mod counter;
mod index;
mod key;
mod limiter;
mod rules;

pub use counter::{check_and_increment, CounterDecision};
pub use index::RuleIndex;
pub use key::{KeyPart, RequestDescriptor, RuleKey};
pub use limiter::RateLimiter;
pub use rules::{RateLimitRule, RulesConfig, TimeInterval};
