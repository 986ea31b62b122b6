pub mod reconcile;
pub mod server;

use tokio::task::JoinHandle;

use crate::{prelude::*, state::AppState};

const RESTART_DELAY: Duration = Duration::from_secs(5);

#[async_trait]
pub trait Plugin: Send + Sync {
  fn name(&self) -> &'static str {
    std::any::type_name::<Self>()
  }

  async fn start(&self, app: Arc<AppState>) -> anyhow::Result<()>;
}

/// Runs long-lived plugins and restarts any that stop or crash.
pub struct App {
  plugins: Vec<Arc<dyn Plugin>>,
}

impl App {
  pub fn new() -> Self {
    Self { plugins: Vec::new() }
  }

  pub fn register<P: Plugin + 'static>(mut self, plugin: P) -> Self {
    self.plugins.push(Arc::new(plugin));
    self
  }

  /// Aborting a returned handle stops its supervisor for good.
  pub fn run(self, app: Arc<AppState>) -> Vec<JoinHandle<()>> {
    self
      .plugins
      .into_iter()
      .map(|plugin| tokio::spawn(supervise(plugin, app.clone())))
      .collect()
  }
}

async fn supervise(plugin: Arc<dyn Plugin>, app: Arc<AppState>) {
  let name = plugin.name();
  info!("SYSTEM: plugin `{name}` started");

  loop {
    let task = {
      let (plugin, app) = (plugin.clone(), app.clone());
      tokio::spawn(async move { plugin.start(app).await })
    };

    match task.await {
      Ok(Ok(())) => warn!("Plugin `{name}` returned without an error"),
      Ok(Err(err)) => error!("Plugin `{name}` failed: {err:#}"),
      Err(err) if err.is_cancelled() => {
        info!("Plugin `{name}` cancelled");
        break;
      }
      Err(_) => error!("Plugin `{name}` panicked"),
    }

    time::sleep(RESTART_DELAY).await;
    info!("SYSTEM: restarting plugin `{name}`");
  }
}
