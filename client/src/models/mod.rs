pub mod chats;
pub mod matches;
pub mod messages;
pub mod users;

pub use chats::{Chat, ChatPreview};
pub use matches::{
    AnonymousIdentity, EndMatchRequest, MatchOutcome, MatchRequest, ProcessMatchReply,
    WaitingUsersReply,
};
pub use messages::{AnonymousMessage, Message, MessageRecord};
pub use users::{User, UsernameEntry};
