//! Backend implementations of [`crate::DurableQueue`], [`crate::RateLimiter`],
//! and [`crate::StatsCache`].

pub mod memory;
pub mod redis;
