//! Cooperative cancellation for polling loops and graph invocations.

mod token;

pub use token::CancellationToken;
