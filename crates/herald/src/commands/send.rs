//! `herald send`: submit a message through a running server.

use anyhow::{Context, Result};

use herald::api::{SendMessageRequest, SendMessageResponse};

/// Message given on the command line.
#[derive(Debug)]
pub struct OutgoingMessage {
    pub title: String,
    pub message: String,
    pub to: Option<String>,
}

pub async fn run(
    outgoing: OutgoingMessage,
    config_path: &str,
    port: Option<u16>,
    server: Option<&str>,
) -> Result<()> {
    let client = super::connect(config_path, port, server).await?;

    let request = SendMessageRequest {
        title: Some(outgoing.title),
        message: Some(outgoing.message),
        to: outgoing.to,
        priority: None,
    };

    let response = client.send(&request).await.context("Failed to send message")?;
    match response {
        SendMessageResponse::Sent {
            id,
            message_id,
            attempts,
            ..
        } => println!("Sent {id} as {message_id} after {attempts} attempt(s)"),
        SendMessageResponse::Queued { id } => {
            println!("Queued {id}; delivery continues in the background")
        }
    }
    Ok(())
}
