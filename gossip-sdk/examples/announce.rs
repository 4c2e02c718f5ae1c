//! Push one announcement into a running daemon, after first probing how it
//! copes with hostile input: a lone unframed garbage byte, then a whole
//! frame with a code outside the gossip range. Both are fatal for the
//! connection that sends them — and for nothing else — so each probe uses
//! its own connection and the real announce a fresh third one.
//!
//! ```sh
//! cargo run --example announce -- --api 127.0.0.1:7001 --data-type 540 "p2p is very cool!"
//! ```

use std::net::SocketAddr;

use anyhow::Result;
use clap::Parser;
use gossip_sdk::client::ApiClient;
use gossip_sdk::wire::Message;

#[derive(Parser, Debug)]
struct Args {
    /// API socket of the local daemon.
    #[arg(long, default_value = "127.0.0.1:7001")]
    api: SocketAddr,
    /// Data type to announce under.
    #[arg(long, default_value_t = 540)]
    data_type: u16,
    /// Hop budget; 0 floods without a limit.
    #[arg(long, default_value_t = 0)]
    ttl: u8,
    /// Payload text.
    message: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().init();
    let args = Args::parse();

    // A single byte that never completes a header. The daemon reads a
    // truncated frame and drops the connection.
    let mut garbage = ApiClient::connect(args.api).await?;
    garbage.send_raw(b"s").await?;
    drop(garbage);
    println!("garbage byte sent");

    // A well-formed frame with code 404, outside the gossip range. Also
    // fatal for this connection, harmless for the daemon.
    let mut unknown = ApiClient::connect(args.api).await?;
    unknown
        .send(&Message::Other {
            code: 404,
            data: b"message not found".to_vec(),
        })
        .await?;
    drop(unknown);
    println!("unknown code 404 sent");

    let mut client = ApiClient::connect(args.api).await?;
    client
        .announce(args.ttl, args.data_type, args.message.as_bytes())
        .await?;
    println!("announced {} bytes as type {}", args.message.len(), args.data_type);
    Ok(())
}
