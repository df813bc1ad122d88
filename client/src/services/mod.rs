pub mod identity;
pub mod matchmaking;

pub use identity::{IdentityProvider, MemoryIdentityProvider, Principal, RestIdentityProvider};
pub use matchmaking::{MatchmakingApi, MatchmakingClient};
