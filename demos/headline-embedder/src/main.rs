mod model;

use std::error::Error;
use std::sync::Arc;
use candle_core::Device;
use teppan::backend::candle::CandleBackend;
use teppan::{Scheduler, SchedulerConfig, ShutdownMode};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use crate::model::{tokenize, Embedder};

const HEADLINES: &[&str] = &[
    "Central bank holds rates steady amid cooling inflation",
    "Local team clinches title in overtime thriller",
    "New battery chemistry promises faster charging",
    "Storm warning issued for coastal towns",
    "Startup raises funding to expand chip design",
    "City council approves new bike lanes downtown",
    "Researchers map deep ocean currents with drones",
    "Film festival opens with record attendance",
    "Rail strike disrupts morning commute",
    "Open source compiler reaches version two",
    "Drought pushes grain prices higher",
    "Museum unveils restored medieval tapestry",
];

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = SchedulerConfig::from_env()?;
    let device = Device::Cpu;
    let embedder = Embedder::new(&device)?;
    let scheduler = Arc::new(Scheduler::spawn(CandleBackend::new(embedder), config)?);

    let handles = HEADLINES.iter().enumerate().map(|(idx, headline)| {
        let scheduler = scheduler.clone();
        let tokens = tokenize(headline, &device);
        tokio::spawn(async move {
            let embedding = scheduler.infer(tokens?).await?;
            let values = embedding.to_vec1::<f32>()?;
            info!(idx, headline, head = ?&values[..4], "embedded");
            Ok::<_, Box<dyn Error + Send + Sync>>(())
        })
    }).collect::<Vec<_>>();

    for handle in futures::future::join_all(handles).await {
        match handle {
            Ok(Ok(())) => {}
            Ok(Err(err)) => warn!(error = %err, "embedding failed"),
            Err(err) => warn!(error = %err, "embedding task panicked"),
        }
    }

    scheduler.shutdown(ShutdownMode::Drain).await;
    let stats = scheduler.stats();
    info!(
        requests = stats.submitted,
        batches = stats.batches_dispatched,
        failed = stats.failed,
        "done"
    );
    Ok(())
}
