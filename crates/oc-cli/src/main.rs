//! Operator CLI for the dispatcher and position sync engine. Talks to a
//! running `oc-daemon` over HTTP — it holds no state of its own.

use std::io::{self, Write};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::{json, Value};

#[derive(Parser)]
#[command(name = "oc")]
#[command(about = "orchestration control CLI", long_about = None)]
struct Cli {
    /// Base URL of the running oc-daemon.
    #[arg(long, global = true, default_value = "http://127.0.0.1:9000")]
    base_url: String,

    /// With no subcommand, drops into the interactive menu.
    #[command(subcommand)]
    cmd: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Dispatcher (PRD) commands
    Dispatcher {
        #[command(subcommand)]
        cmd: DispatcherCmd,
    },

    /// Position sync engine (PSE) commands
    Positions {
        #[command(subcommand)]
        cmd: PositionsCmd,
    },

    /// Interactive menu: submit envelope / queue size / close / quit.
    Menu,
}

#[derive(Subcommand)]
enum DispatcherCmd {
    /// Submit a request envelope into a priority bucket.
    Submit {
        /// Bucket name, e.g. "regular" or "position_prior".
        #[arg(long)]
        bucket: String,
        /// Callback URL the activity call is made against.
        #[arg(long)]
        url: String,
        /// HTTP method. Defaults to GET.
        #[arg(long, default_value = "GET")]
        method: String,
        /// JSON params/body, inline.
        #[arg(long)]
        payload: Option<String>,
    },
    /// Print the current size of every bucket queue.
    Queue,
    /// Print full dispatcher stats (run id, totals, paused buckets, ...).
    Stats,
    /// Pause one or more buckets.
    Pause { buckets: Vec<String> },
    /// Resume one or more buckets.
    Resume { buckets: Vec<String> },
    /// Replace the dispatch priority order (must be a permutation of the
    /// existing fourteen buckets).
    SetPriority { order: Vec<String> },
    /// Ask the worker to close after its current queues drain.
    Close,
}

#[derive(Subcommand)]
enum PositionsCmd {
    /// Print sync engine status (running, sequence, tracked positions).
    Status,
    /// Start the websocket + poll loops.
    Start,
    /// Stop the websocket + poll loops.
    Stop,
    /// Subscribe the realtime websocket feed to an extra symbol.
    Subscribe { symbol: String },
    /// Unsubscribe a symbol from the realtime websocket feed.
    Unsubscribe { symbol: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let client = reqwest::Client::new();

    match cli.cmd {
        None | Some(Commands::Menu) => run_menu(&client, &cli.base_url).await,
        Some(Commands::Dispatcher { cmd }) => run_dispatcher(&client, &cli.base_url, cmd).await,
        Some(Commands::Positions { cmd }) => run_positions(&client, &cli.base_url, cmd).await,
    }
}

/// Submits one envelope into `bucket`, mirroring the mapping shape
/// `oc-envelope::from_mapping` expects (`url_callback`/`method`/`params`).
async fn submit_envelope(
    client: &reqwest::Client,
    base_url: &str,
    bucket: &str,
    url: String,
    method: String,
    payload: Option<Value>,
) -> Result<reqwest::Response> {
    let mut mapping = serde_json::Map::new();
    mapping.insert("url_callback".to_string(), Value::String(url));
    mapping.insert("method".to_string(), Value::String(method));
    if let Some(parsed) = payload {
        mapping.insert("params".to_string(), parsed);
    }
    let body = json!({ "bucket": bucket, "payload": Value::Object(mapping) });
    client
        .post(format!("{base_url}/v1/dispatcher/submit"))
        .json(&body)
        .send()
        .await
        .context("submitting envelope")
}

async fn fetch_queue(client: &reqwest::Client, base_url: &str) -> Result<reqwest::Response> {
    client
        .get(format!("{base_url}/v1/dispatcher/queue"))
        .send()
        .await
        .context("fetching queue sizes")
}

async fn close_dispatcher(client: &reqwest::Client, base_url: &str) -> Result<reqwest::Response> {
    client
        .post(format!("{base_url}/v1/dispatcher/close"))
        .send()
        .await
        .context("closing dispatcher")
}

/// Interactive 4-action menu against a running `oc-daemon`: submit envelope,
/// print queue size, close (with a confirmation prompt), quit.
async fn run_menu(client: &reqwest::Client, base_url: &str) -> Result<()> {
    println!("orchestration control — interactive menu");
    println!("base_url={base_url}");

    loop {
        println!("\n1. Submit an envelope");
        println!("2. Show queue size");
        println!("3. Close the dispatcher");
        println!("4. Quit");

        match prompt("\nchoice (1-4): ")?.trim() {
            "1" => {
                let bucket = prompt("bucket (e.g. regular): ")?.trim().to_string();
                let url = prompt("callback url: ")?.trim().to_string();
                let method = {
                    let raw = prompt("method [GET]: ")?.trim().to_uppercase();
                    if raw.is_empty() { "GET".to_string() } else { raw }
                };
                let payload_raw = prompt("JSON payload (optional): ")?.trim().to_string();
                let payload = if payload_raw.is_empty() {
                    None
                } else {
                    match serde_json::from_str::<Value>(&payload_raw) {
                        Ok(v) => Some(v),
                        Err(_) => {
                            println!("invalid JSON payload, discarding");
                            None
                        }
                    }
                };
                match submit_envelope(client, base_url, &bucket, url, method, payload).await {
                    Ok(response) => print_status_and_body(response).await?,
                    Err(e) => println!("error submitting envelope: {e:#}"),
                }
            }
            "2" => match fetch_queue(client, base_url).await {
                Ok(response) => print_status_and_body(response).await?,
                Err(e) => println!("error fetching queue size: {e:#}"),
            },
            "3" => {
                let confirm = prompt("close the dispatcher? (y/N): ")?;
                if confirm.trim().eq_ignore_ascii_case("y") {
                    match close_dispatcher(client, base_url).await {
                        Ok(response) => print_status_and_body(response).await?,
                        Err(e) => println!("error closing dispatcher: {e:#}"),
                    }
                }
            }
            "4" => {
                println!("bye");
                break;
            }
            _ => println!("invalid choice"),
        }
    }
    Ok(())
}

fn prompt(label: &str) -> Result<String> {
    print!("{label}");
    io::stdout().flush().context("flushing stdout")?;
    let mut line = String::new();
    io::stdin().read_line(&mut line).context("reading stdin")?;
    Ok(line)
}

async fn run_dispatcher(client: &reqwest::Client, base_url: &str, cmd: DispatcherCmd) -> Result<()> {
    match cmd {
        DispatcherCmd::Submit {
            bucket,
            url,
            method,
            payload,
        } => {
            let parsed_payload = payload
                .map(|raw| serde_json::from_str(&raw).context("--payload must be valid JSON"))
                .transpose()?;
            let response =
                submit_envelope(client, base_url, &bucket, url, method, parsed_payload).await?;
            print_status_and_body(response).await
        }
        DispatcherCmd::Queue => {
            let response = fetch_queue(client, base_url).await?;
            print_status_and_body(response).await
        }
        DispatcherCmd::Stats => {
            let response = client
                .get(format!("{base_url}/v1/dispatcher/stats"))
                .send()
                .await
                .context("fetching dispatcher stats")?;
            print_status_and_body(response).await
        }
        DispatcherCmd::Pause { buckets } => {
            let response = client
                .post(format!("{base_url}/v1/dispatcher/pause"))
                .json(&json!({ "buckets": buckets }))
                .send()
                .await
                .context("pausing buckets")?;
            print_status_and_body(response).await
        }
        DispatcherCmd::Resume { buckets } => {
            let response = client
                .post(format!("{base_url}/v1/dispatcher/resume"))
                .json(&json!({ "buckets": buckets }))
                .send()
                .await
                .context("resuming buckets")?;
            print_status_and_body(response).await
        }
        DispatcherCmd::SetPriority { order } => {
            let response = client
                .post(format!("{base_url}/v1/dispatcher/priority"))
                .json(&json!({ "order": order }))
                .send()
                .await
                .context("setting priority order")?;
            print_status_and_body(response).await
        }
        DispatcherCmd::Close => {
            let response = close_dispatcher(client, base_url).await?;
            print_status_and_body(response).await
        }
    }
}

async fn run_positions(client: &reqwest::Client, base_url: &str, cmd: PositionsCmd) -> Result<()> {
    match cmd {
        PositionsCmd::Status => {
            let response = client
                .get(format!("{base_url}/v1/positions/status"))
                .send()
                .await
                .context("fetching sync status")?;
            print_status_and_body(response).await
        }
        PositionsCmd::Start => {
            let response = client
                .post(format!("{base_url}/v1/positions/control/start"))
                .send()
                .await
                .context("starting sync engine")?;
            print_status_and_body(response).await
        }
        PositionsCmd::Stop => {
            let response = client
                .post(format!("{base_url}/v1/positions/control/stop"))
                .send()
                .await
                .context("stopping sync engine")?;
            print_status_and_body(response).await
        }
        PositionsCmd::Subscribe { symbol } => {
            let response = client
                .post(format!("{base_url}/v1/positions/subscriptions/{symbol}"))
                .send()
                .await
                .context("subscribing symbol")?;
            print_status_and_body(response).await
        }
        PositionsCmd::Unsubscribe { symbol } => {
            let response = client
                .delete(format!("{base_url}/v1/positions/subscriptions/{symbol}"))
                .send()
                .await
                .context("unsubscribing symbol")?;
            print_status_and_body(response).await
        }
    }
}

async fn print_status_and_body(response: reqwest::Response) -> Result<()> {
    let status = response.status();
    let text = response.text().await.unwrap_or_default();
    println!("status={status}");
    if !text.is_empty() {
        println!("{text}");
    }
    Ok(())
}
