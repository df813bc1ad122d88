use anyhow::Result;
use chatsync::db::messages::{find_orphans, remove_messages};
use chatsync::db::{connect_store, StoreConfig};
use chatsync::utils;
use clap::{Arg, Command};
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    utils::init_logging();

    let matches = Command::new("purge-orphans")
        .about("Remove messages whose chat no longer exists")
        .arg(
            Arg::new("confirm")
                .long("confirm")
                .help("Actually delete the orphaned messages (otherwise only list them)")
                .action(clap::ArgAction::SetTrue),
        )
        .get_matches();

    let confirm = matches.get_flag("confirm");

    let store_config = StoreConfig::from_env()?;
    let store = connect_store(&store_config)?;
    info!("Connected to store");

    info!("🔄 Looking for orphaned messages...");
    let orphans = find_orphans(store.as_ref()).await?;
    if orphans.is_empty() {
        info!("✅ No orphaned messages found");
        return Ok(());
    }
    for id in &orphans {
        info!("  orphan: {}", id);
    }
    info!("Found {} orphaned messages", orphans.len());

    if !confirm {
        warn!("⚠️  Deletion not confirmed. Use --confirm to remove them.");
        return Ok(());
    }

    info!("🔄 Removing orphaned messages...");
    remove_messages(store.as_ref(), &orphans).await?;
    info!("✅ Removed {} orphaned messages", orphans.len());

    Ok(())
}
