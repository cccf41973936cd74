use std::path::Path;
use std::sync::Arc;

use kiln_runtime::config::{self, KilnConfig};
use kiln_runtime::services::{
    CommandLauncher, LogBuffer, NetworkProbe, ServiceGraph, ServicesFile,
};
use kiln_runtime::{LocalEngine, ModelCatalog, OllamaEngine};

/// Run every check; returns whether all of them passed.
pub async fn run(config_path: Option<&Path>) -> bool {
    println!("🔍 Checking Kiln setup...\n");

    let mut all_ok = true;

    print!("• Checking configuration... ");
    let config = match KilnConfig::load(config_path) {
        Ok(config) => {
            match config_path {
                Some(path) => println!("✓ {} is valid", path.display()),
                None => println!("✓ Using built-in defaults (no kiln.toml found)"),
            }
            config
        }
        Err(e) => {
            println!("✗ {}", e);
            return false;
        }
    };

    print!("• Checking model catalogue... ");
    match ModelCatalog::from_path(&config.catalogs.models) {
        Ok(catalog) => {
            let pinned: f64 = catalog
                .always_resident_models()
                .iter()
                .map(|m| m.footprint_gb)
                .sum();
            if pinned > config.accelerator.usable_capacity_gb() {
                println!(
                    "✗ Always-resident models need {:.1} GB but only {:.1} GB is usable",
                    pinned,
                    config.accelerator.usable_capacity_gb()
                );
                all_ok = false;
            } else {
                println!("✓ {} model(s)", catalog.list_models().len());
            }
        }
        Err(e) => {
            println!("✗ {}", e);
            all_ok = false;
        }
    }

    print!("• Checking service catalogue... ");
    let services: Result<ServicesFile, _> = config::load_catalog(&config.catalogs.services);
    match services.map_err(|e| e.to_string()).and_then(|file| {
        ServiceGraph::new(
            file,
            Arc::new(NetworkProbe::new(config.health.probe_timeout)),
            Arc::new(CommandLauncher::new()),
            Arc::new(LogBuffer::new(config.health.log_capacity)),
        )
        .map_err(|e| e.to_string())
    }) {
        Ok(graph) => println!(
            "✓ {} service(s) in {} boot phase(s)",
            graph.descriptors().count(),
            graph.phases().len()
        ),
        Err(e) => {
            println!("✗ {}", e);
            all_ok = false;
        }
    }

    print!("• Checking local engine... ");
    match OllamaEngine::new(&config.engine) {
        Ok(engine) => match engine.list_models().await {
            Ok(tags) => {
                let count = tags["models"].as_array().map(|m| m.len()).unwrap_or(0);
                println!("✓ {} reachable, {} model(s) installed", engine.endpoint(), count);
            }
            Err(e) => {
                println!("✗ {}", e);
                println!("  Start it with: ollama serve");
                all_ok = false;
            }
        },
        Err(e) => {
            println!("✗ {}", e);
            all_ok = false;
        }
    }

    print!("• Checking cloud fallback... ");
    let ready: Vec<&str> = config
        .cloud
        .providers
        .iter()
        .filter(|p| p.credentials().is_some())
        .map(|p| p.name.as_str())
        .collect();
    if config.cloud.providers.is_empty() {
        println!("○ No providers configured (local only)");
    } else if ready.is_empty() {
        println!("○ Providers configured but no credentials found");
    } else {
        println!("✓ {}", ready.join(", "));
    }

    print!("• Checking API port... ");
    if std::net::TcpListener::bind((config.server.host.as_str(), config.server.port)).is_ok() {
        println!("✓ {}:{} available", config.server.host, config.server.port);
    } else {
        println!(
            "○ {}:{} in use (is kiln already running?)",
            config.server.host, config.server.port
        );
    }

    println!();
    if all_ok {
        println!("✅ All checks passed! You're ready to run: kiln up");
    } else {
        println!("⚠️  Some checks failed. Fix the issues above before running kiln up");
    }
    all_ok
}
