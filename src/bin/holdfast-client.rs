//! Line-mode client: forwards stdin lines to the server and prints every
//! message it sends back.

use clap::Parser;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_util::codec::{FramedRead, LinesCodec};
use tracing::info;

use holdfast::limits::MAX_LINE_LEN;

#[derive(Parser, Debug)]
#[command(name = "holdfast-client")]
#[command(about = "Connect to a holdfast server and send commands from stdin", long_about = None)]
struct Cli {
    /// Server address
    #[arg(long, default_value = "127.0.0.1:8080")]
    addr: String,

    /// Client name sent in the handshake
    #[arg(long, default_value = "client1")]
    name: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();
    let cli = Cli::parse();

    let socket = TcpStream::connect(&cli.addr).await?;
    let framed = tokio_util::codec::Framed::new(socket, LinesCodec::new_with_max_length(MAX_LINE_LEN));
    let (mut sink, mut stream) = framed.split::<String>();
    sink.send(format!("Name {}", cli.name)).await?;
    info!("connected to {} as {}", cli.addr, cli.name);

    let listener = tokio::spawn(async move {
        while let Some(Ok(msg)) = stream.next().await {
            info!("message received: {msg}");
        }
        info!("server closed the connection");
    });

    let mut stdin = FramedRead::new(tokio::io::stdin(), LinesCodec::new_with_max_length(MAX_LINE_LEN));
    while let Some(line) = stdin.next().await {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        sink.send(line).await?;
    }

    info!("stdin closed, disconnecting");
    sink.close().await?;
    listener.abort();
    Ok(())
}
