use std::time::Duration;

use queued_http::{BackoffConfig, QueueClient, QueueOptions, RequestDescriptor};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,queued_http=debug")),
        )
        .init();

    let base_url = std::env::var("QUEUED_HTTP_BASE_URL").unwrap_or_else(|_| "https://httpbin.org".to_owned());

    let client = QueueClient::new().with_options(QueueOptions {
        timeout_ms: 5_000,
        retry_enabled: true,
        backoff: BackoffConfig {
            initial_timeout_ms: 500,
            max_retries: 3,
            ..BackoffConfig::default()
        },
        ..QueueOptions::default()
    })?;
    let queue = client.new_queue();

    let pending: Vec<_> = ["/get", "/status/503", "/delay/1"]
        .into_iter()
        .map(|path| {
            client.send(
                RequestDescriptor::get(format!("{base_url}{path}"))
                    .timeout(Duration::from_secs(3))
                    .queue(&queue)
                    .on_failure(move |err| tracing::warn!(path, error = %err, "retrying")),
            )
        })
        .collect();

    for completion in pending {
        match completion.await {
            Ok(response) => println!("{} {} bytes", response.status, response.body.len()),
            Err(err) => println!("failed: {err}"),
        }
    }

    Ok(())
}
