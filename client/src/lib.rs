pub mod constants;
pub mod context;
pub mod db;
pub mod error;
pub mod handlers;
pub mod models;
pub mod services;
pub mod sync;
pub mod utils;

pub use context::{AppContext, Settings, Workspace};
pub use db::connection::connect_store;
pub use error::{ChatError, MatchmakingError, StoreError};
pub use utils::config::Config;
