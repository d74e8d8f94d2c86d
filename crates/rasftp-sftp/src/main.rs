//! rasftp demo: writes, reads back and stats a file through the SFTP adapter
//! against the in-memory server.

use rasftp_sftp::mock::MockSftpServer;
use rasftp_sftp::{create_storage, ConnectOptions};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const DEFAULT_URI: &str = "sftp://demo@localhost/tmp/rasftp-demo.bin";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .init();

    let args: Vec<String> = std::env::args().collect();
    let uri = args.get(1).map(String::as_str).unwrap_or(DEFAULT_URI);
    let options: ConnectOptions = match args.get(2) {
        Some(json) => serde_json::from_str(json)?,
        None => ConnectOptions::default(),
    };
    tracing::info!("rasftp demo against {}", uri);

    let server = MockSftpServer::new();
    let storage = create_storage(server.transport(), uri, &options)?;

    storage.write(0, b"hello, sftp".to_vec()).await?;
    let head = storage.read(0, 5).await?;
    let stat = storage.stat().await?;
    storage.close().await?;

    println!("read: {}", String::from_utf8_lossy(&head));
    println!("stat: {}", serde_json::to_string(&stat)?);
    Ok(())
}
