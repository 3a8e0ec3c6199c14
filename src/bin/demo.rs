use graphmail::{ClientConfig, ListMessagesQuery, MailClient, MailError};
use std::process::ExitCode;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

const ENV_USER_ID: &str = "GRAPH_USER_ID";

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(error = %err, "graphmail demo failed");
            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<(), MailError> {
    let user_id = std::env::var(ENV_USER_ID)
        .map_err(|_| MailError::Validation(format!("{ENV_USER_ID} is not set")))?;
    let config = ClientConfig::from_env()?.with_throttle_callback(|percentage| {
        tracing::warn!(percentage, "mailbox is close to its throttling limit");
    });
    let client = MailClient::new(config)?;

    let query = ListMessagesQuery {
        top: Some(10),
        select: vec![
            "subject".to_string(),
            "from".to_string(),
            "receivedDateTime".to_string(),
        ],
        order_by: Some("receivedDateTime desc".to_string()),
        ..ListMessagesQuery::default()
    };
    let messages = client.list_messages(&user_id, "inbox", &query)?;
    for message in &messages {
        let subject = message
            .get("subject")
            .and_then(|s| s.as_str())
            .unwrap_or("(no subject)");
        let from = message
            .pointer("/from/emailAddress/address")
            .and_then(|s| s.as_str())
            .unwrap_or("unknown sender");
        println!("{from}\t{subject}");
    }
    info!(count = messages.len(), throttle = ?client.throttle_state(), "inbox listed");
    Ok(())
}
