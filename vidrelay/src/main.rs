use std::sync::Arc;
use std::time::Duration;

use anyhow::{Result, anyhow};
use clap::Parser;
use tokio::signal;
use tracing::{error, info, warn};

use vidrelay::{PlayerEvent, PlayerSession, ProxyMode, RelayConfig, WebView, event_channel};

#[derive(Parser, Debug)]
#[command(name = "vidrelay")]
#[command(about = "Loopback relay that serves a stream player page and bridges its events")]
struct Args {
    /// Stream URL (DASH .mpd or HLS .m3u8)
    url: String,

    /// Treat the stream as live (enables autoplay)
    #[arg(long)]
    live: bool,

    /// First loopback port to try
    #[arg(short, long, default_value = "8080")]
    port: u16,

    /// Number of consecutive ports to try
    #[arg(long, default_value = "10")]
    port_count: u16,

    /// License key passed to the player script
    #[arg(long)]
    license_key: Option<String>,

    /// Seconds to wait for the page to report ready
    #[arg(long, default_value = "30")]
    init_timeout: u64,

    /// Whether media requests go through the local proxy
    #[arg(long, value_enum, default_value = "auto")]
    proxy: ProxyMode,
}

/**
    Stands in for an embedded web view: asks the user to open the page
    in any browser, which then talks to the relay over HTTP only.
*/
struct ConsoleWebView;

impl WebView for ConsoleWebView {
    fn navigate(&self, url: &str) -> Result<()> {
        println!("Open {url} in a browser to start playback");
        Ok(())
    }

    fn evaluate_script(&self, _script: &str) -> Result<()> {
        Err(anyhow!("an external browser cannot run host scripts"))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    vidrelay::logging::init("vidrelay=info");
    let args = Args::parse();

    let mut config = RelayConfig::default()
        .with_ports(args.port, args.port_count)
        .with_init_timeout(Duration::from_secs(args.init_timeout))
        .with_proxy_mode(args.proxy);
    if let Some(key) = args.license_key {
        config = config.with_license_key(key);
    }

    let (events_tx, mut events_rx) = event_channel();
    let events_handle = tokio::spawn(async move {
        while let Some(event) = events_rx.recv().await {
            match event {
                PlayerEvent::StateChanged(state) => info!(%state, "player state"),
                PlayerEvent::Error(e) => error!(error = %e, "player error"),
                PlayerEvent::Debug(message) => info!(%message, "page debug"),
            }
        }
    });

    let session = PlayerSession::start(config, Arc::new(ConsoleWebView), events_tx).await?;

    tokio::select! {
        result = session.initialize_with_url(&args.url, args.live) => match result {
            Ok(_) => info!("player ready, press Ctrl+C to stop"),
            Err(e) => warn!(error = %e, "initialization failed, still serving until Ctrl+C"),
        },
        _ = signal::ctrl_c() => {
            session.dispose().await;
            return Ok(());
        }
    }

    signal::ctrl_c().await?;
    println!("\nShutting down...");
    session.dispose().await;
    drop(session);
    let _ = events_handle.await;

    println!("Done.");
    Ok(())
}
