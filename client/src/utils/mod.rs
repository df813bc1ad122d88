pub mod config;
pub mod ids;
pub mod logging;

pub use config::Config;
pub use ids::{chat_id, PushIdGenerator};
pub use logging::init_logging;
