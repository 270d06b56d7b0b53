use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

pub(crate) fn install(shutdown_token: CancellationToken) -> JoinSet<()> {
    let mut join_set = JoinSet::new();

    join_set.spawn(async move {
        if let Err(e) = wait_for_signal(shutdown_token).await {
            tracing::error!("Failed to install signal handlers: {e}");
        }
    });

    join_set
}

async fn wait_for_signal(shutdown_token: CancellationToken) -> std::io::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigquit = signal(SignalKind::quit())?;

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Received Ctrl-C signal.");
        }
        _ = sigterm.recv() => {
            tracing::info!("Received SIGTERM signal.");
        }
        _ = sigquit.recv() => {
            tracing::info!("Received SIGQUIT signal.");
        }
    }

    shutdown_token.cancel();

    Ok(())
}
