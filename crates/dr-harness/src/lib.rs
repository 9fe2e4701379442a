pub mod circuit_breaker;
pub mod error;
pub mod invoker;
pub mod shutdown;
