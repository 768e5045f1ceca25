#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![forbid(unsafe_code)]

pub mod chain;
pub mod entities;
pub mod matcher;
pub mod policy;
pub mod pool;
pub mod queue;
pub mod worker;
