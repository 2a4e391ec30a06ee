use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

use mca::config::{McaConfig, ServerLayout};
use mca::console::{ConsoleHandler, Origin};
use mca::dispatcher::{CommandDispatcher, Control, DispatcherParts};
use mca::supervisor::{recovery, JavaLauncher};
use mca::update::HttpSource;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
    tracing::info!("MCA starting");

    let config_path = McaConfig::resolve_path();
    let config = McaConfig::load(&config_path)?;
    let root = std::env::current_dir()?;
    let layout = ServerLayout::new(&root, &config.server_jar);

    let mut input = BufReader::new(tokio::io::stdin()).lines();
    handle_orphan(&layout.recovery(), &mut input).await?;

    // 로컬 콘솔 출력
    let (local_tx, mut local_rx) = mpsc::unbounded_channel::<String>();
    tokio::spawn(async move {
        while let Some(line) = local_rx.recv().await {
            println!("{}", line);
        }
    });

    let launcher = Arc::new(JavaLauncher {
        program: config.java.clone(),
        args: config.server_args(),
        working_dir: root.clone(),
    });
    let source = Arc::new(HttpSource::new(&config.update_url)?);
    let autostart_console = config.console_autostart;

    let dispatcher = CommandDispatcher::new(DispatcherParts::new(
        layout,
        config,
        config_path,
        launcher,
        source,
        local_tx.clone(),
    ));

    dispatcher.startup_artifact_check().await;
    let _ = local_tx.send(dispatcher.welcome().await);
    if autostart_console {
        dispatcher.dispatch("mca start", Origin::Local).await;
    }

    loop {
        tokio::select! {
            line = input.next_line() => {
                let line = match line {
                    Ok(Some(line)) => line,
                    Ok(None) => break,
                    Err(e) => {
                        tracing::error!("Failed to read console input: {}", e);
                        break;
                    }
                };
                let line = line.trim_end();
                if line.is_empty() {
                    continue;
                }
                if dispatcher.dispatch(line, Origin::Local).await == Control::Exit {
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Shutdown signal received, cleaning up...");
                break;
            }
        }
    }

    dispatcher.shutdown().await;
    tracing::info!("MCA shutting down");
    Ok(())
}

/// A recovery file left behind means the last run died with its server
/// possibly still alive. Ask before killing it.
async fn handle_orphan(recovery_path: &Path, input: &mut Lines<BufReader<Stdin>>) -> anyhow::Result<()> {
    let Some(orphan) = recovery::find_orphan(recovery_path) else {
        recovery::clear(recovery_path);
        return Ok(());
    };

    print!("Previously started minecraft server process (PID: {}) found. Kill it? Y/N: ", orphan.pid);
    std::io::stdout().flush()?;

    let answer = input.next_line().await?.unwrap_or_default();
    if answer.trim().eq_ignore_ascii_case("y") {
        match recovery::kill(orphan.pid) {
            Ok(()) => println!("Process killed"),
            Err(e) => tracing::error!("Failed to kill process {}: {}", orphan.pid, e),
        }
    }
    recovery::clear(recovery_path);
    Ok(())
}
