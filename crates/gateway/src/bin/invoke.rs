//! Serve one event from a file or stdin and print the response envelope.

use anyhow::Context;
use clap::Parser;
use gateway::{config::get_configuration, event};
use inference::NativeService;
use serde_json::Value;
use std::{fs, io::Read, path::PathBuf};

#[derive(Parser, Debug)]
#[command(about = "Run Grad-CAM on a single `{\"image\": <base64>}` event")]
struct Args {
    /// Event JSON file; reads stdin when omitted
    #[arg(short, long)]
    event: Option<PathBuf>,

    /// Print the bare body instead of the gateway envelope
    #[arg(long)]
    raw: bool,
}

fn read_event(path: Option<&PathBuf>) -> anyhow::Result<Value> {
    let text = match path {
        Some(path) => fs::read_to_string(path)
            .with_context(|| format!("failed to read event file {}", path.display()))?,
        None => {
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .context("failed to read event from stdin")?;
            buf
        }
    };
    serde_json::from_str(&text).context("event is not valid JSON")
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = get_configuration().context("failed to load configuration")?;
    common::setup_stderr_logging(config.log_level, config.environment);

    let payload = read_event(args.event.as_ref())?;
    let service = match NativeService::from_config(&config.model) {
        Ok(service) => Some(service),
        Err(err) => {
            tracing::error!(error = ?err, "Model load failed");
            None
        }
    };

    let response = event::invoke(service.as_ref(), &payload);
    let output = if args.raw {
        response.body
    } else {
        response.envelope()
    };
    println!("{output}");
    Ok(())
}
