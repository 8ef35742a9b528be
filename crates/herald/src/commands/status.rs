//! `herald status`: show the state of a running server.

use anyhow::{Context, Result};

pub async fn run(config_path: &str, port: Option<u16>, server: Option<&str>) -> Result<()> {
    let client = super::connect(config_path, port, server).await?;

    client
        .health()
        .await
        .with_context(|| format!("No server reachable at {}", client.base_url()))?;

    let session = client.status().await.context("Failed to fetch session status")?;
    let queue = client.queue_stats().await.context("Failed to fetch queue stats")?;

    println!("Session:   {}", session.phase);
    if let Some(id) = &session.session_id {
        println!("  id:      {id}");
    }
    if let Some(account) = &session.account {
        println!("  account: {account}");
    }
    println!(
        "Queue:     {} queued, {} in flight{}",
        queue.queued,
        queue.in_flight,
        if queue.is_processing { " (processing)" } else { "" }
    );
    println!(
        "  totals:  {} sent, {} failed, {} accepted",
        queue.sent_total, queue.failed_total, queue.queued_total
    );
    Ok(())
}
