pub mod chats;
pub mod connection;
pub mod memory;
pub mod messages;
pub mod rest;
pub mod store;
pub mod tree;
pub mod users;

pub use connection::{connect_store, StoreConfig};
pub use memory::MemoryStore;
pub use rest::RestStore;
pub use store::{server_timestamp, DataStore, SnapshotCallback, Subscription};
