//! Subscribe to a data type and validate everything that arrives.
//!
//! ```sh
//! cargo run --example subscribe -- --api 127.0.0.1:7001 --data-type 540
//! ```

use std::net::SocketAddr;

use anyhow::Result;
use clap::Parser;
use gossip_sdk::client::ApiClient;

#[derive(Parser, Debug)]
struct Args {
    /// API socket of the local daemon.
    #[arg(long, default_value = "127.0.0.1:7001")]
    api: SocketAddr,
    /// Data type to subscribe to.
    #[arg(long, default_value_t = 540)]
    data_type: u16,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().init();
    let args = Args::parse();

    let mut client = ApiClient::connect(args.api).await?;
    client.subscribe(args.data_type).await?;
    println!("subscribed to data type {}", args.data_type);

    loop {
        let notification = client.next_notification().await?;
        println!(
            "notification {} (type {}): {}",
            notification.msg_id,
            notification.data_type,
            String::from_utf8_lossy(&notification.data)
        );
        client.validate(notification.msg_id, true).await?;
    }
}
