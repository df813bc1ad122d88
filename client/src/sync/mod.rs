pub mod chats;
pub mod directory;
pub mod matchmaking;
pub mod messages;
pub mod online;
pub mod session;

pub use chats::{ChatSync, SelectedChat};
pub use directory::DirectorySync;
pub use matchmaking::{MatchState, MatchmakingSession};
pub use messages::MessageSync;
pub use online::OnlineCounter;
pub use session::{IdentitySession, SessionState};
