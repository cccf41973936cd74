use anyhow::Context;

use kiln_runtime::config::KilnConfig;
use kiln_runtime::ModelCatalog;

pub fn run(config: &KilnConfig) -> anyhow::Result<()> {
    let catalog = ModelCatalog::from_path(&config.catalogs.models).with_context(|| {
        format!(
            "loading model catalogue from {}",
            config.catalogs.models.display()
        )
    })?;

    println!("🧠 Model registry ({})\n", config.catalogs.models.display());
    println!(
        "{:<28} {:>8}  {:<6} ROLES",
        "MODEL", "GB", "PINNED"
    );
    for model in catalog.list_models() {
        let marker = if model.name == catalog.get_default_model() {
            "*"
        } else {
            " "
        };
        println!(
            "{}{:<27} {:>8.1}  {:<6} {}",
            marker,
            model.name,
            model.footprint_gb,
            if model.always_resident { "yes" } else { "" },
            model.roles.join(", ")
        );
    }

    let pinned: f64 = catalog
        .always_resident_models()
        .iter()
        .map(|m| m.footprint_gb)
        .sum();
    println!();
    println!("* default model");
    println!(
        "Usable capacity {:.1} GB, {:.1} GB pinned, unknown models assumed {:.1} GB",
        config.accelerator.usable_capacity_gb(),
        pinned,
        catalog.default_footprint_gb()
    );
    if pinned > config.accelerator.usable_capacity_gb() {
        println!("⚠️  Always-resident models exceed usable capacity");
    }
    Ok(())
}
