use std::future::Future;

use anyhow::Context;
use tracing::{debug, error, info};

use sharebook_api::{Config, ShareBook, Subscription};
use sharebook_types::api::LoginRequest;
use sharebook_types::models::Message;

/// Signs in and logs the unread message count every time it changes, until
/// interrupted.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Config first: it loads .env, which may set RUST_LOG
    let config = Config::from_env()?;

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "sharebook=info,sharebook_api=debug".into()),
        )
        .init();

    let email = std::env::var("SHAREBOOK_EMAIL").context("SHAREBOOK_EMAIL is not set")?;
    let password = std::env::var("SHAREBOOK_PASSWORD").context("SHAREBOOK_PASSWORD is not set")?;

    let client = ShareBook::open(config)?;
    let session = client.auth().login(LoginRequest { email, password }).await?;
    info!("Watching unread messages for {} ({})", session.email, session.user_id);

    let interrupted = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Cannot listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    let mut unread = client.messages().subscribe_unread(session.user_id);
    watch_unread(&mut unread, interrupted).await;

    unread.cancel().await;
    client.shutdown().await;
    Ok(())
}

/// Log every unread snapshot until `shutdown` resolves or the feed ends.
/// Returns the number of snapshots seen.
async fn watch_unread<F>(unread: &mut Subscription<Vec<Message>>, shutdown: F) -> usize
where
    F: Future<Output = ()>,
{
    // One signal future for the whole loop, so a signal is never dropped
    // between iterations.
    tokio::pin!(shutdown);
    let mut seen = 0;

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("Interrupted, shutting down");
                break;
            }
            snapshot = unread.next() => match snapshot {
                Some(Ok(messages)) => {
                    seen += 1;
                    info!("{} unread message(s)", messages.len());
                    for message in &messages {
                        debug!("  from {} at {}: {}", message.sender_id, message.timestamp, message.text);
                    }
                }
                Some(Err(e)) => {
                    error!("Unread feed failed: {:#}", e);
                    break;
                }
                None => break,
            }
        }
    }

    seen
}
