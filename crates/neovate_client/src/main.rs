use neovate_api::AppSnapshot;
use neovate_backend::DesktopServices;
use neovate_client::{Client, ClientConfig, UiShell, UiSurface, WsTransport};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// Stands in for a window: logs what would be rendered.
struct HeadlessShell;

impl UiShell for HeadlessShell {
    fn mount(&mut self, snapshot: &AppSnapshot) {
        for repo in &snapshot.repos {
            tracing::info!(
                path = %repo.path,
                name = %repo.name,
                workspaces = repo.workspaces.len(),
                "repo"
            );
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let config = ClientConfig::from_env();
    let services = DesktopServices::new()?;
    tracing::info!(
        root = %services.root().display(),
        url = %config.backend_url,
        disconnect_policy = config.disconnect_policy.as_str(),
        "starting neovate"
    );

    let transport = Arc::new(WsTransport::new(config.backend_url.clone()));
    let client = Client::start(services, transport, &mut HeadlessShell, &config).await?;

    let mut surface = client.surface.clone();
    let watch_surface = async move {
        while surface.changed().await.is_ok() {
            match &*surface.borrow_and_update() {
                UiSurface::Waiting => tracing::info!("waiting for backend"),
                UiSurface::Ready { notice: None } => tracing::info!("ui ready"),
                UiSurface::Ready {
                    notice: Some(notice),
                } => tracing::warn!(%notice, "ui ready"),
            }
        }
    };

    tokio::select! {
        _ = watch_surface => {}
        res = tokio::signal::ctrl_c() => {
            if let Err(err) = res {
                tracing::warn!(error = %err, "failed to listen for ctrl-c");
            }
        }
    }

    tracing::info!("shutting down");
    client.shutdown().await
}
