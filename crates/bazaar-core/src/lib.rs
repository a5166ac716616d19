pub mod keys;
pub mod metrics;
pub mod time;

pub use keys::{KeySpace, counter_key, lock_key};
pub use time::{Clock, ManualClock, SharedClock, SystemClock, day_key, now_utc, unix_millis};
