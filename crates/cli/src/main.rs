use clap::{Parser, Subcommand};
use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::Message;

#[derive(Parser)]
#[command(name = "framerelay")]
#[command(about = "Framerelay CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show version
    Version,

    /// Run the relay server (HTTP health + WebSocket frame relay on one port).
    Serve {
        /// Config file path (default: FRAMERELAY_CONFIG_PATH or ~/.framerelay/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<std::path::PathBuf>,

        /// Listen port (default from config or 8080; PORT env also applies)
        #[arg(long, short)]
        port: Option<u16>,
    },

    /// Join a relay as a client: each stdin line is published as a frame's
    /// actions, and every relayed frame is printed one per line.
    Join {
        /// Relay WebSocket URL.
        #[arg(long, default_value = "ws://127.0.0.1:8080/ws")]
        url: String,

        /// Player id to join as (defaults to one derived from the process id).
        #[arg(long, value_name = "ID")]
        player_id: Option<String>,
    },
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Version) => {
            println!("framerelay {}", env!("CARGO_PKG_VERSION"));
        }
        Some(Commands::Serve { config, port }) => {
            if let Err(e) = run_serve(config, port).await {
                log::error!("serve failed: {}", e);
                std::process::exit(1);
            }
        }
        Some(Commands::Join { url, player_id }) => {
            if let Err(e) = run_join(url, player_id).await {
                log::error!("join failed: {}", e);
                std::process::exit(1);
            }
        }
        None => {
            println!("Run with --help for usage");
        }
    }
}

async fn run_serve(
    config_path: Option<std::path::PathBuf>,
    port: Option<u16>,
) -> anyhow::Result<()> {
    let (mut config, _path) = lib::config::load_config(config_path)?;
    config.relay.port = lib::config::resolve_port(&config);
    if let Some(p) = port {
        config.relay.port = p;
    }
    log::info!("starting relay on {}:{}", config.relay.bind, config.relay.port);
    lib::relay::run_relay(config).await
}

async fn run_join(url: String, player_id: Option<String>) -> anyhow::Result<()> {
    let me = player_id.unwrap_or_else(|| format!("player_{}", std::process::id()));
    let url = format!("{}?player_id={}", url, me);
    let (ws, _) = tokio_tungstenite::connect_async(url.as_str()).await?;
    let (mut ws_tx, mut ws_rx) = ws.split();
    println!("joined as {} via {}", me, url);

    // Print every relayed frame; coalesced batches arrive newline-separated.
    let printer = tokio::spawn(async move {
        while let Some(Ok(msg)) = ws_rx.next().await {
            if let Message::Text(text) = msg {
                for line in text.lines() {
                    println!("< {}", line);
                }
            }
        }
    });

    let stdin = std::io::stdin();
    let mut frame_num: i64 = 0;
    loop {
        let mut line = String::new();
        if stdin.read_line(&mut line)? == 0 {
            break;
        }
        let input = line.trim();
        if input.is_empty() {
            continue;
        }
        if input.eq_ignore_ascii_case("/exit") || input.eq_ignore_ascii_case("/quit") {
            break;
        }

        frame_num += 1;
        let frame = serde_json::json!({
            "player_id": me,
            "frame_num": frame_num,
            "timestamp": 0,
            "actions": { "input": input },
        });
        ws_tx.send(Message::Text(frame.to_string())).await?;
    }

    printer.abort();
    Ok(())
}
