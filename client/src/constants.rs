// =============================================================================
// Chatsync Constants
// =============================================================================
// This file contains all constants used throughout the client to enable
// easy tuning and configuration from a single location.

use std::time::Duration;

// =============================================================================
// STORE PATHS
// =============================================================================

/// Profiles, keyed by user id
pub const USERS_PATH: &str = "users";

/// Secondary username index, keyed by user id
pub const USERNAMES_PATH: &str = "usernames";

/// Exclusive username claims, keyed by lowercase username
pub const USERNAME_CLAIMS_PATH: &str = "username_claims";

/// Chat summaries, keyed by deterministic chat id
pub const CHATS_PATH: &str = "chats";

/// Flat collection of authenticated messages
pub const MESSAGES_PATH: &str = "messages";

/// Flat collection of anonymous (matchmaking) messages
pub const ANONYMOUS_MESSAGES_PATH: &str = "anonymous_messages";

/// Separator between the two sorted participant ids of a chat id
pub const CHAT_ID_SEPARATOR: &str = "_";

// =============================================================================
// MESSAGES
// =============================================================================

/// Text that replaces the content of a soft-deleted message
pub const DELETED_MESSAGE_TOMBSTONE: &str = "This message was deleted";

/// Preview shown for a chat that has no messages yet
pub const EMPTY_CHAT_PREVIEW: &str = "No messages yet";

/// Display name used when a profile carries no usable name
pub const UNKNOWN_USER_NAME: &str = "Unknown User";

// =============================================================================
// MATCHMAKING
// =============================================================================

/// Default matchmaking service location
pub const DEFAULT_MATCHMAKER_URL: &str = "http://127.0.0.1:5000";

/// How often a waiting session re-issues its pairing request
pub const DEFAULT_MATCH_POLL_INTERVAL_SECS: u64 = 5;

/// How often the online user count is refreshed
pub const DEFAULT_ONLINE_COUNT_INTERVAL_SECS: u64 = 30;

/// Status returned by the service when a pair has been formed
pub const MATCH_FOUND_STATUS: &str = "match_found";

/// Status returned by the service while no partner is available
pub const WAITING_FOR_MATCH_STATUS: &str = "waiting_for_match";

/// Prefix of generated anonymous display names
pub const ANONYMOUS_NAME_PREFIX: &str = "Stranger";

/// Request timeout for matchmaking calls
pub const MATCHMAKER_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

// =============================================================================
// IDENTITY VALIDATION
// =============================================================================

/// Minimum username length
pub const MIN_USERNAME_LENGTH: usize = 3;

/// Minimum password length
pub const MIN_PASSWORD_LENGTH: usize = 6;

/// Default identity provider endpoint
pub const DEFAULT_IDENTITY_URL: &str = "https://identitytoolkit.googleapis.com/v1";

// =============================================================================
// REALTIME STORE
// =============================================================================

/// Delay before a dropped event stream is re-opened
pub const STREAM_RECONNECT_DELAY: Duration = Duration::from_secs(1);

/// Alphabet for push ids, ordered by ASCII value so ids sort by creation time
pub const PUSH_ID_CHARS: &[u8; 64] =
    b"-0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ_abcdefghijklmnopqrstuvwxyz";

// =============================================================================
// SERVER CONFIGURATION
// =============================================================================

/// Log filter used when `RUST_LOG` is unset
pub const DEFAULT_LOG_FILTER: &str =
    "chatsync=info,chat=debug,matchmaker_stub=debug,purge_orphans=debug,tower_http=debug";

/// Default port of the local matchmaker stub if not specified in environment
pub const DEFAULT_STUB_PORT: u16 = 5000;
