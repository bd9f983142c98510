pub mod retry;

pub use retry::{with_retry, with_retry_notify, RetryPolicy};
