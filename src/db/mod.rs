//! Persistence layer: MongoDB wrapper, document schemas, and the
//! storage capability traits the services depend on.

pub mod mongo;
pub mod schemas;
pub mod store;

pub use mongo::{MongoClient, MongoCollection};
pub use store::{
    CredentialStore, MemoryCredentialStore, MemoryTokenStore, MongoCredentialStore,
    MongoTokenStore, TokenStore,
};
