//! Mock storage implementations for testing and the standalone profile.

mod cache;
mod change_stream;
mod document_store;
mod token_store;

pub use cache::MockCache;
pub use change_stream::MockChangeStream;
pub use document_store::{matches, MockDocumentStore, OID_FIELD};
pub use token_store::MockTokenStore;
