use anyhow::Context;
use std::sync::Arc;

use kiln_runtime::api::{HttpApiConfig, HttpApiServer};
use kiln_runtime::config::KilnConfig;
use kiln_runtime::ControlPlane;

pub async fn run(config: KilnConfig) -> anyhow::Result<()> {
    println!("✓ Starting Kiln control plane...");

    let plane = Arc::new(ControlPlane::from_config(config).context("building control plane")?);
    println!(
        "✓ Loaded {} model(s) and {} service(s)",
        plane.catalog().list_models().len(),
        plane.services().descriptors().count()
    );

    match plane.boot().await {
        Ok(report) => {
            println!(
                "✓ Boot completed: {} phase(s) in {} ms",
                report.phases.len(),
                report.elapsed_ms
            );
        }
        Err(e) => {
            eprintln!("✗ Boot failed: {}", e);
            plane.shutdown().await;
            return Err(e).context("booting services");
        }
    }

    let guardian = plane.start_guardian();
    println!(
        "✓ Health guardian polling every {:?}",
        plane.config().health.interval
    );

    let server = HttpApiServer::new(HttpApiConfig::from(&plane.config().server), plane.clone());
    println!("✓ HTTP API listening on http://{}", server.address());
    println!("→ Press Ctrl-C to stop");

    let served = server.start_with_shutdown(shutdown_signal()).await;

    println!("\n→ Shutting down...");
    guardian.stop().await;
    plane.shutdown().await;

    served.context("serving HTTP API")?;
    println!("✓ Stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
}
