pub mod aggregate;
pub mod cancel;
pub mod diff;
pub mod http;
pub mod pipeline;
pub mod retry;
