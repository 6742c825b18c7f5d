//! Redis storage implementations.

mod cache;
mod token_store;

pub use cache::RedisCache;
pub use token_store::RedisTokenStore;
