use clap::Parser;
use log::info;
use server::{Broker, BrokerConfig, BrokerServer};
use std::time::Duration;

/// Command line arguments
#[derive(Parser, Debug)]
#[command(author, version, about = "Couchplay session broker")]
struct Args {
    /// IP address to bind to
    #[arg(short = 'H', long, default_value = "127.0.0.1")]
    host: String,
    /// Port to listen on
    #[arg(short, long, default_value = "8080")]
    port: u16,
    /// Minimum milliseconds between gameplay events per connection and key
    /// (0 disables flood control)
    #[arg(short, long, default_value = "0")]
    flood_delay: u64,
    /// Message pushed to every new connection
    #[arg(short, long, default_value = "MOTD: welcome to couchplay")]
    motd: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args = Args::parse();

    let broker = Broker::new(BrokerConfig {
        flood_control_delay: Duration::from_millis(args.flood_delay),
        motd: args.motd,
    });

    let address = format!("{}:{}", args.host, args.port);
    info!("Starting couchplay broker on {}", address);

    let server = BrokerServer::bind(&address, broker).await?;
    server.run().await?;
    Ok(())
}
