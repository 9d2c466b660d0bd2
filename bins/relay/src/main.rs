use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use relay_config::RelayConfig;
use relay_core::BackendId;
use relay_engine::RelayEngine;
use tracing::info;
use tracing_subscriber::EnvFilter;

const WORKERS: usize = 4;
const RUN_FOR: Duration = Duration::from_secs(2);

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config/relay.toml".to_string());
    let config = RelayConfig::load(&config_path)?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level)),
        )
        .init();

    info!(?config, "relay starting");

    let engine = RelayEngine::new(config.virtual_nodes);
    for spec in &config.backends {
        engine.add_backend(BackendId(spec.id), spec.weight);
    }

    // Workers route a stream of synthetic keys while the main thread churns
    // backend membership underneath them.
    let stop = AtomicBool::new(false);
    thread::scope(|s| {
        for worker in 0..WORKERS {
            let engine = &engine;
            let stop = &stop;
            s.spawn(move || {
                let mut key_no = 0u64;
                while !stop.load(Ordering::Relaxed) {
                    let key = format!("user-{key_no}");
                    let _ = engine.pick(&key);
                    key_no += 1;
                }
                let served = engine.local_picks().unwrap_or(0);
                info!(worker, served, "worker done");
            });
        }

        thread::sleep(RUN_FOR / 2);
        let extra = BackendId(100);
        engine.add_backend(extra, 1);
        thread::sleep(RUN_FOR / 2);
        engine.remove_backend(extra);

        stop.store(true, Ordering::Relaxed);
    });

    info!(readers = engine.reader_threads(), "workload drained");
    for backend in engine.backends()? {
        info!(
            id = backend.id.0,
            picks = backend.take_picks(),
            "distribution"
        );
    }

    Ok(())
}
