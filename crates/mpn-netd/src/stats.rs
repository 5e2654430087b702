//! Periodic one-line health log.

use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::registry::Registry;

pub async fn log_server_stats(registry: Arc<Registry>) {
    loop {
        info!(
            games = registry.room_count(),
            ports_in_use = registry.ports_in_use(),
            "server stats"
        );
        tokio::time::sleep(Duration::from_secs(60)).await;
    }
}
