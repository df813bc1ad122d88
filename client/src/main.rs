use std::collections::HashSet;
use std::time::Duration;

use chatsync::db::users;
use chatsync::models::{AnonymousMessage, Message, MessageRecord};
use chatsync::sync::{MatchState, MatchmakingSession, OnlineCounter};
use chatsync::{utils, AppContext, Config};
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

const WAITING_COUNT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Parser)]
#[command(name = "chat", about = "Terminal client for one-to-one and anonymous chat")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create an account with a unique username
    Signup {
        #[arg(long)]
        email: String,
        #[arg(long)]
        password: String,
        #[arg(long)]
        username: String,
    },
    /// List other users and your chats
    Users {
        #[arg(long)]
        email: String,
        #[arg(long)]
        password: String,
        /// Only show users matching this term
        #[arg(long)]
        search: Option<String>,
    },
    /// Chat with another user by username
    Talk {
        #[arg(long)]
        email: String,
        #[arg(long)]
        password: String,
        #[arg(long)]
        with: String,
    },
    /// Find an anonymous partner sharing your interests
    Anon {
        #[arg(long, value_delimiter = ',', required = true)]
        interests: Vec<String>,
    },
    /// Show how many users are waiting for a match
    Waiting,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    utils::init_logging();

    let cli = Cli::parse();
    let config = Config::from_env()?;
    let context = AppContext::from_config(&config)?;

    match cli.command {
        Command::Signup {
            email,
            password,
            username,
        } => {
            let user = context.session().sign_up(&email, &password, &username).await?;
            info!("✅ Created account {} for {}", user.label(), user.email);
            context.sign_out().await?;
        }
        Command::Users {
            email,
            password,
            search,
        } => {
            context.session().sign_in(&email, &password).await?;
            let workspace = context.open_workspace().await?;
            let people = workspace.directory.search(search.as_deref().unwrap_or(""));
            println!("Users:");
            for user in people {
                let presence = if user.is_online { "online" } else { "offline" };
                println!("  {:<20} {:<8} {}", user.label(), presence, user.email);
            }
            println!("Chats:");
            for preview in workspace.chats.previews() {
                println!("  {:<20} {}", preview.name, preview.last_message);
            }
            context.sign_out().await?;
        }
        Command::Talk {
            email,
            password,
            with,
        } => {
            context.session().sign_in(&email, &password).await?;
            let result = talk(&context, &with).await;
            context.sign_out().await?;
            result?;
        }
        Command::Anon { interests } => anon(&context, interests).await?,
        Command::Waiting => {
            let counter = context.online_counter();
            let mut count = counter.watch();
            let _ = tokio::time::timeout(WAITING_COUNT_TIMEOUT, count.changed()).await;
            match *count.borrow() {
                Some(waiting) => println!("{} users waiting for a match", waiting),
                None => println!("Online count unavailable"),
            }
        }
    }

    Ok(())
}

async fn talk(context: &AppContext, username: &str) -> anyhow::Result<()> {
    let workspace = context.open_workspace().await?;
    let uid = users::get_uid_by_username(context.store().as_ref(), username)
        .await?
        .ok_or_else(|| anyhow::anyhow!("No user named '{}'", username))?;
    let peer = match workspace.directory.find(&uid) {
        Some(peer) => peer,
        None => users::get_user(context.store().as_ref(), &uid)
            .await?
            .ok_or_else(|| anyhow::anyhow!("No profile for '{}'", username))?,
    };

    let selected = workspace.chats.start_chat(&peer)?;
    let messages = workspace
        .chats
        .messages()
        .ok_or_else(|| anyhow::anyhow!("Chat {} is not open", selected.chat_id))?;
    println!("Chatting with {}. /delete <id>, /drop or /quit.", peer.label());

    let mut view = messages.watch();
    let mut printed = HashSet::new();
    print_new(view.borrow_and_update().as_slice(), &mut printed, describe_message);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            changed = view.changed() => {
                if changed.is_err() {
                    break;
                }
                print_new(view.borrow_and_update().as_slice(), &mut printed, describe_message);
            }
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                let line = line.trim();
                if line == "/quit" {
                    break;
                } else if line == "/drop" {
                    workspace.chats.delete_chat(&selected.chat_id).await?;
                    println!("Chat deleted");
                    break;
                } else if let Some(id) = line.strip_prefix("/delete ") {
                    if let Err(e) = workspace.chats.soft_delete(id.trim()).await {
                        warn!("Could not delete: {}", e);
                    }
                } else if let Err(e) = workspace.chats.send(line).await {
                    warn!("Could not send: {}", e);
                }
            }
        }
    }
    Ok(())
}

enum Leave {
    Next,
    Quit,
}

async fn anon(context: &AppContext, interests: Vec<String>) -> anyhow::Result<()> {
    let counter = context.online_counter();
    let session = context.matchmaking(interests)?;
    println!("You are {}", session.identity().display_name);

    loop {
        if let Err(e) = session.restart().await {
            println!("Could not find a match. Please try again. ({})", e);
            return Ok(());
        }
        if !wait_for_match(&session, &counter).await? {
            return Ok(());
        }
        let leave = converse(&session).await?;
        session.end().await;
        if let Leave::Quit = leave {
            return Ok(());
        }
    }
}

/// Blocks until matched. Returns false when the search ended instead.
async fn wait_for_match(session: &MatchmakingSession, counter: &OnlineCounter) -> anyhow::Result<bool> {
    let mut state = session.watch();
    loop {
        let current = state.borrow_and_update().clone();
        match current {
            MatchState::Matched { .. } => return Ok(true),
            MatchState::Ended { error } => {
                println!("Search ended{}", error.map(|e| format!(": {}", e)).unwrap_or_default());
                return Ok(false);
            }
            _ => match counter.count() {
                Some(waiting) => println!("Waiting for a partner ({} online)...", waiting),
                None => println!("Waiting for a partner..."),
            },
        }
        tokio::select! {
            changed = state.changed() => changed?,
            _ = tokio::signal::ctrl_c() => {
                session.end().await;
                return Ok(false);
            }
        }
    }
}

async fn converse(session: &MatchmakingSession) -> anyhow::Result<Leave> {
    println!("Matched! Say hi. /delete <id>, /next or /quit.");
    let mut view = session
        .watch_messages()
        .ok_or_else(|| anyhow::anyhow!("Match closed before it opened"))?;
    let mut printed = HashSet::new();
    print_new(view.borrow_and_update().as_slice(), &mut printed, describe_anonymous);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            changed = view.changed() => {
                if changed.is_err() {
                    return Ok(Leave::Quit);
                }
                print_new(view.borrow_and_update().as_slice(), &mut printed, describe_anonymous);
            }
            line = lines.next_line() => {
                let Some(line) = line? else { return Ok(Leave::Quit) };
                let line = line.trim();
                if line == "/quit" {
                    return Ok(Leave::Quit);
                } else if line == "/next" {
                    return Ok(Leave::Next);
                } else if let Some(id) = line.strip_prefix("/delete ") {
                    if let Err(e) = session.soft_delete(id.trim()).await {
                        warn!("Could not delete: {}", e);
                    }
                } else if let Err(e) = session.send(line).await {
                    warn!("Could not send: {}", e);
                }
            }
            _ = tokio::signal::ctrl_c() => return Ok(Leave::Quit),
        }
    }
}

/// Prints messages not seen before, or seen before they were deleted.
fn print_new<M: MessageRecord>(messages: &[M], printed: &mut HashSet<(String, bool)>, describe: fn(&M) -> String) {
    for message in messages {
        if printed.insert((message.id().to_string(), message.is_deleted())) {
            println!("[{}] {}", message.id(), describe(message));
        }
    }
}

fn describe_message(message: &Message) -> String {
    format!("{}: {}", message.sender_name, message.message)
}

fn describe_anonymous(message: &AnonymousMessage) -> String {
    format!("{}: {}", message.anonymous_display_name, message.message)
}
