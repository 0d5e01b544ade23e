use tracing::{info, warn};

use crate::scheduler::Scheduler;
use crate::store::SqliteStore;

/// Top of every hour
const HEARTBEAT_CRON: &str = "0 0 * * * *";

/// Register built-in background jobs
pub async fn register_builtin_tasks(scheduler: &Scheduler, store: SqliteStore) -> anyhow::Result<()> {
    scheduler
        .add_cron_job(HEARTBEAT_CRON, "heartbeat", move || {
            let store = store.clone();
            Box::pin(async move { heartbeat(&store).await })
        })
        .await?;

    Ok(())
}

async fn heartbeat(store: &SqliteStore) {
    match store.stats().await {
        Ok((users, reminders)) => {
            info!("Heartbeat: {} users, {} reminders", users, reminders)
        }
        Err(e) => warn!("Heartbeat could not read the store: {:#}", e),
    }
}
