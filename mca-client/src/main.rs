//! Remote console client: prints every frame the supervisor sends and sends
//! each stdin line as one frame.
//!
//! Usage: `mca-client [host] [port]`

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::TcpStream;
use tracing_subscriber::EnvFilter;

use mca::protocol::{read_frame, write_frame, FrameError, DISCONNECT, SHUTDOWN};

const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 25566;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .init();

    let mut args = std::env::args().skip(1);
    let host = args.next().unwrap_or_else(|| DEFAULT_HOST.to_string());
    let port = match args.next() {
        Some(port) => port.parse::<u16>()?,
        None => DEFAULT_PORT,
    };

    let stream = TcpStream::connect((host.as_str(), port)).await?;
    tracing::info!("Connected to {}:{}", host, port);
    let (mut reader, mut writer) = stream.into_split();

    let mut printer = tokio::spawn(async move {
        loop {
            match read_frame(&mut reader).await {
                Ok(text) if text == SHUTDOWN => {
                    println!("Server closed the console");
                    break;
                }
                Ok(text) => println!("{}", text),
                Err(FrameError::Closed) => break,
                Err(e) => {
                    tracing::error!("Connection error: {}", e);
                    break;
                }
            }
        }
    });

    let mut input = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = input.next_line() => {
                let Some(line) = line? else { break };
                let line = line.trim_end();
                if line.is_empty() {
                    continue;
                }
                if line == DISCONNECT {
                    break;
                }
                write_frame(&mut writer, line).await?;
            }
            _ = &mut printer => return Ok(()),
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    // 정상 종료 알림, 이미 끊긴 경우 무시
    let _ = write_frame(&mut writer, DISCONNECT).await;
    printer.abort();
    Ok(())
}
