use chrono::Local;
use clap::Parser;
use log::{error, info};
use std::net::SocketAddr;
use whatsapp_bridge::automation::ws::WsAutomationClient;
use whatsapp_bridge::bridge::Bridge;
use whatsapp_bridge::config::BridgeConfig;
use whatsapp_bridge::server;

#[derive(Parser, Debug)]
#[command(
    name = "whatsapp-bridge",
    about = "Relay engine between a WhatsApp session driver and real-time UI observers"
)]
struct Args {
    /// Address the observer/REST server listens on
    #[arg(long, default_value = "127.0.0.1:4000")]
    listen: SocketAddr,

    /// WebSocket URL of the WhatsApp session driver
    #[arg(long, default_value = "ws://127.0.0.1:4100/engine")]
    driver_url: String,
}

fn main() {
    let args = Args::parse();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format(|buf, record| {
            use std::io::Write;
            writeln!(
                buf,
                "{} [{:<5}] [{}] - {}",
                Local::now().format("%H:%M:%S"),
                record.level(),
                record.target(),
                record.args()
            )
        })
        .init();

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .expect("Failed to build tokio runtime");

    if let Err(e) = rt.block_on(run(args)) {
        error!("fatal: {e}");
        std::process::exit(1);
    }
}

async fn run(args: Args) -> anyhow::Result<()> {
    let config = BridgeConfig::default();

    // Losing the driver adapter at startup is the one fatal condition:
    // an engine without its event source must not come up half-alive.
    let (automation, events) =
        WsAutomationClient::connect(&args.driver_url, config.driver_request_timeout)
            .await
            .map_err(|e| anyhow::anyhow!("automation driver adapter init failed: {e}"))?;

    let bridge = Bridge::new(config, automation);
    bridge.start_background_tasks();
    tokio::spawn(bridge.clone().run(events));

    tokio::select! {
        result = server::serve(bridge, args.listen) => result,
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown requested");
            Ok(())
        }
    }
}
