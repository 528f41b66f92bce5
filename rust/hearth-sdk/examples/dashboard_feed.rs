//! Connect to a hub, print the lights it knows about, then follow live
//! state changes.
//!
//! ```sh
//! HUB_URL=ws://hub.local:8123/api/websocket \
//! HUB_API=http://hub.local:8123/api \
//! HUB_TOKEN=... \
//! cargo run --example dashboard_feed
//! ```

use anyhow::Context;
use hearth_sdk::{Channel, HearthClient, HearthConfig, Intent};
use tokio::time::{sleep, Duration};
use url::Url;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "hearth_sdk=debug".into()),
        )
        .init();

    let ws_url = std::env::var("HUB_URL").context("HUB_URL not set")?;
    let api_url = Url::parse(&std::env::var("HUB_API").context("HUB_API not set")?)?;
    let token = std::env::var("HUB_TOKEN").context("HUB_TOKEN not set")?;

    let client = HearthClient::new(ws_url, api_url, token, HearthConfig::default());
    client.init().await?;

    for light in client.store().all_in_domain("light").await {
        let name = light
            .attribute("friendly_name")
            .and_then(|v| v.as_str())
            .unwrap_or(&light.entity_id)
            .to_string();
        println!("{name}: {}", light.state);
    }

    client.router().subscribe(Channel::AllChanges, |change| {
        if let Some(state) = &change.new_state {
            println!("{} -> {}", change.entity_id, state.state);
        }
    });

    // Flip the first light on at 80% for demonstration purposes.
    if let Some(light) = client.store().all_in_domain("light").await.first() {
        client
            .dispatcher()
            .execute(
                &light.entity_id,
                Intent::TurnOn {
                    brightness: Some(80),
                    hs_color: None,
                },
            )
            .await?;
    }

    sleep(Duration::from_secs(60)).await;
    client.teardown().await;
    Ok(())
}
