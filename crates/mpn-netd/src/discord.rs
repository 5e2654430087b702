//! Fire-and-forget Discord webhook announcements for new rooms. Room
//! creation never waits on these; failures are logged and dropped.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::warn;

use crate::room::Room;

const USER_AGENT: &str = "mpnBot (mpn-server, 1)";

/// Announce a newly created room. Public rooms go to every configured
/// channel; everything also goes to the dev channel when set.
pub fn announce_room(server_name: &str, room: &Arc<Room>) {
    let is_public = room.meta.password.is_empty();
    let visibility = if is_public { "public" } else { "private" };
    let message = format!(
        "New {} netplay room running in {} has been created! Come play {}",
        visibility, server_name, room.meta.game_name
    );
    let emulator = room.meta.emulator.to_uppercase();

    tokio::spawn(async move {
        let client = reqwest::Client::new();
        if is_public {
            for i in 0..10 {
                if let Ok(channel) = std::env::var(format!("{emulator}_CHANNEL_{i}")) {
                    if !channel.is_empty() {
                        publish(&client, &channel, &message).await;
                    }
                }
            }
        }
        if let Ok(channel) = std::env::var(format!("{emulator}_DEV_CHANNEL")) {
            if !channel.is_empty() {
                publish(&client, &channel, &message).await;
            }
        }
    });
}

async fn publish(client: &reqwest::Client, channel: &str, message: &str) {
    let body = HashMap::from([("content", message)]);
    match client
        .post(channel)
        .header(reqwest::header::USER_AGENT, USER_AGENT)
        .json(&body)
        .send()
        .await
    {
        Ok(response) => {
            if !response.status().is_success() {
                warn!(status = %response.status(), "webhook rejected announcement");
            }
        }
        Err(e) => warn!(error = %e, "could not send webhook request"),
    }
}
