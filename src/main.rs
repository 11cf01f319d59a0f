use latticekv::config::{Config, NodeSettings};
use latticekv::topology::types::Tier;
use latticekv::worker::ServerWorker;
use std::path::Path;
use std::sync::Arc;

const DEFAULT_CONFIG_PATH: &str = "conf/latticekv.yml";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let self_tier = match std::env::var("SERVER_TYPE") {
        Ok(kind) => match Tier::parse(&kind) {
            Some(tier) => tier,
            None => {
                eprintln!("Unrecognized server type {kind}. Valid types are memory or ebs.");
                std::process::exit(1);
            }
        },
        Err(_) => {
            tracing::info!("no SERVER_TYPE set, starting in memory mode");
            Tier::Memory
        }
    };

    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());
    let config = Config::load(Path::new(&config_path))?;
    let settings = Arc::new(NodeSettings::from_config(&config, self_tier));

    tracing::info!(
        "starting {} node {} with {} worker(s)",
        settings.self_tier,
        settings.private_ip,
        settings.thread_count()
    );

    let mut workers = Vec::new();
    for tid in 0..settings.thread_count() {
        let settings = settings.clone();
        workers.push(tokio::spawn(async move {
            let mut worker = ServerWorker::new(settings, tid).await?;
            worker.bootstrap().await?;
            worker.run().await
        }));
    }

    // Workers only return on self-depart; wait for all of them so in-flight
    // redistribution finishes before the process exits.
    for worker in workers {
        worker.await??;
    }

    Ok(())
}
