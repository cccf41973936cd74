use anyhow::Context;
use serde_json::Value;
use std::time::Duration;

use kiln_runtime::config::KilnConfig;

pub async fn run(config: &KilnConfig, url: Option<String>) -> anyhow::Result<()> {
    let base = url.unwrap_or_else(|| format!("http://{}:{}", config.server.host, config.server.port));
    let base = base.trim_end_matches('/');

    println!("📊 Kiln Status ({})\n", base);

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(5))
        .build()
        .context("building HTTP client")?;

    let status: Value = match client.get(format!("{}/api/status", base)).send().await {
        Ok(response) if response.status().is_success() => {
            response.json().await.context("decoding /api/status")?
        }
        Ok(response) => {
            println!("✗ Control plane answered {}", response.status());
            std::process::exit(1);
        }
        Err(_) => {
            println!("✗ Not running (start with: kiln up)");
            std::process::exit(1);
        }
    };

    println!("Uptime: {}s", status["uptime_seconds"].as_u64().unwrap_or(0));

    println!("\n🧩 Services:");
    match status["services"].as_array() {
        Some(services) if !services.is_empty() => {
            for service in services {
                let state = service["state"].as_str().unwrap_or("unknown");
                let glyph = match state {
                    "healthy" => "✓",
                    "dormant" => "○",
                    "starting" => "…",
                    _ => "✗",
                };
                print!(
                    "  {} {:<20} {:<10} phase {}",
                    glyph,
                    service["id"].as_str().unwrap_or("?"),
                    state,
                    service["phase"].as_u64().unwrap_or(0)
                );
                if let Some(error) = service["last_error"].as_str() {
                    print!("  ({})", error);
                }
                println!();
            }
        }
        _ => println!("  (none)"),
    }

    let gpu = &status["accelerator"];
    println!("\n💾 Accelerator ({}):", gpu["source"].as_str().unwrap_or("unknown"));
    println!(
        "  • Used {:.1} / {:.1} GB, {:.1} GB free",
        gpu["used_gb"].as_f64().unwrap_or(0.0),
        gpu["capacity_gb"].as_f64().unwrap_or(0.0),
        gpu["free_gb"].as_f64().unwrap_or(0.0)
    );
    println!(
        "  • {} model(s) resident, {:.1} GB budget free",
        gpu["resident_models"].as_u64().unwrap_or(0),
        gpu["budget_free_gb"].as_f64().unwrap_or(0.0)
    );

    let routing = &status["routing"];
    println!("\n🔀 Routing:");
    println!(
        "  • {} request(s): {} local, {} cloud, {} failed",
        routing["total_requests"].as_u64().unwrap_or(0),
        routing["local_success"].as_u64().unwrap_or(0),
        routing["cloud_fallback"].as_u64().unwrap_or(0),
        routing["failed"].as_u64().unwrap_or(0)
    );

    println!();
    Ok(())
}
