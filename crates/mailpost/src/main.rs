//! Mailpost - submit one message over SMTP and print the outcome as JSON.
//!
//! ```text
//! mailpost <config.json> <sender> <recipient> <body-file>...
//! ```
//!
//! The body files are sent back to back as one message. Ctrl-C cancels the
//! submission in flight.

use anyhow::{Context, bail};
use mailpost_core::{SubmitConfig, Submitter};
use mailpost_smtp::Address;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const USAGE: &str = "usage: mailpost <config.json> <sender> <recipient> <body-file>...";

/// Parsed command line.
struct Args {
    config: String,
    sender: String,
    recipient: String,
    bodies: Vec<String>,
}

impl Args {
    fn parse(args: impl IntoIterator<Item = String>) -> anyhow::Result<Self> {
        let mut args = args.into_iter();
        let (Some(config), Some(sender), Some(recipient)) = (args.next(), args.next(), args.next())
        else {
            bail!(USAGE);
        };
        let bodies: Vec<String> = args.collect();
        if bodies.is_empty() {
            bail!(USAGE);
        }
        Ok(Self {
            config,
            sender,
            recipient,
            bodies,
        })
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "mailpost=info,mailpost_core=debug,mailpost_smtp=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse(std::env::args().skip(1))?;

    let json = tokio::fs::read_to_string(&args.config)
        .await
        .with_context(|| format!("reading {}", args.config))?;
    let config = SubmitConfig::from_json(&json).context("parsing configuration")?;
    info!(host = %config.host, port = config.port, "Starting mailpost");

    let sender = Address::new(args.sender.as_str()).context("sender address")?;
    let recipient = Address::new(args.recipient.as_str()).context("recipient address")?;

    let mut bodies = Vec::with_capacity(args.bodies.len());
    for path in &args.bodies {
        let file = tokio::fs::File::open(path)
            .await
            .with_context(|| format!("opening {path}"))?;
        bodies.push(Some(file));
    }

    let (canceller, token) = mailpost_smtp::cancel::pair();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, cancelling submission");
            canceller.cancel();
        }
    });

    let mut submitter = Submitter::new(config)?.with_cancel(token);
    let outcome = submitter
        .measured_submit(&sender, &recipient, &mut bodies)
        .await?;
    submitter.quit().await;

    println!("{}", serde_json::to_string_pretty(&outcome)?);
    if !outcome.is_pass() {
        std::process::exit(1);
    }
    Ok(())
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::redundant_clone,
    clippy::manual_string_new,
    clippy::needless_collect,
    clippy::unreadable_literal,
    clippy::used_underscore_items,
    clippy::similar_names
)]
mod tests {
    use super::*;

    fn strings(args: &[&str]) -> Vec<String> {
        args.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn test_parse_args() {
        let args =
            Args::parse(strings(&["c.json", "a@example.com", "b@example.com", "x", "y"])).unwrap();
        assert_eq!(args.config, "c.json");
        assert_eq!(args.sender, "a@example.com");
        assert_eq!(args.recipient, "b@example.com");
        assert_eq!(args.bodies, vec!["x", "y"]);
    }

    #[test]
    fn test_parse_args_needs_a_body() {
        let err = Args::parse(strings(&["c.json", "a@example.com", "b@example.com"]))
            .err()
            .unwrap();
        assert_eq!(err.to_string(), USAGE);
    }
}
