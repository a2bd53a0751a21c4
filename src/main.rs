mod cli;

use anyhow::{Result, bail};
use clap::Parser;
use cli::{Cli, Commands, Target};
use drydock::gateway::EndpointRef;
use drydock::orchestrator::UpgradeRequest;
use drydock::{Drydock, DrydockConfig};
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config_path = cli.config.clone().unwrap_or_else(DrydockConfig::default_path);

    if let Commands::Init { force } = cli.command {
        if config_path.exists() && !force {
            bail!("{} already exists (use --force to overwrite)", config_path.display());
        }
        DrydockConfig::default().save(&config_path)?;
        println!("Wrote {}", config_path.display());
        return Ok(());
    }

    let config = DrydockConfig::load_or_default(&config_path)?;
    let _log_guard = config.logging.init(cli.verbose)?;

    info!("🚢 Drydock starting up...");
    let drydock = Drydock::new(config)?;

    match cli.command {
        Commands::Check { target, all, json } => {
            let updates = drydock.check_updates(&endpoint(&target)).await?;
            let shown: Vec<_> = updates
                .iter()
                .filter(|u| all || u.info.has_update)
                .collect();

            if json {
                println!("{}", serde_json::to_string_pretty(&shown)?);
                return Ok(());
            }
            if shown.is_empty() {
                println!("All {} containers are up to date", updates.len());
                return Ok(());
            }

            println!(
                "{:<25} {:<40} {:<12} {:<12} {:<8}",
                "CONTAINER", "IMAGE", "CURRENT", "LATEST", "UPDATE"
            );
            println!("{}", "─".repeat(100));
            for update in shown {
                let latest = match &update.info.latest_digest {
                    Some(digest) => short_digest(digest),
                    None => update.info.latest_tag.clone(),
                };
                let current = update
                    .info
                    .current_digest
                    .as_deref()
                    .map(short_digest)
                    .unwrap_or_else(|| update.info.current_tag.clone());
                println!(
                    "{:<25} {:<40} {:<12} {:<12} {:<8}",
                    update.container.name,
                    update.image.to_string(),
                    current,
                    latest,
                    if update.info.has_update { "⬆️" } else { "" }
                );
            }
        }

        Commands::Upgrade {
            target,
            containers,
            image,
            json,
        } => {
            if image.is_some() && containers.len() > 1 {
                bail!("--image applies to a single container");
            }
            let requests: Vec<UpgradeRequest> = containers
                .iter()
                .map(|container| {
                    let request =
                        UpgradeRequest::new(target.gateway.clone(), target.endpoint, container);
                    match &image {
                        Some(image) => request.with_image(image.clone()),
                        None => request,
                    }
                })
                .collect();

            let results = drydock.orchestrator().upgrade_many(&requests).await;
            let mut failed = 0;
            for (request, result) in requests.iter().zip(results) {
                match result {
                    Ok(outcome) if json => println!("{}", serde_json::to_string_pretty(&outcome)?),
                    Ok(outcome) => {
                        println!(
                            "✅ {}: {} -> {} ({})",
                            outcome.old_container.name,
                            outcome.old_image,
                            outcome.new_image,
                            outcome.new_container.short_id
                        );
                        for dependent in &outcome.dependents {
                            match &dependent.error {
                                Some(error) => {
                                    println!("   ⚠️  {} failed: {}", dependent.name, error)
                                }
                                None => println!("   ↳ {} {}", dependent.name, dependent.action),
                            }
                        }
                    }
                    Err(e) => {
                        failed += 1;
                        eprintln!("❌ {}: {}", request.container, e);
                    }
                }
            }
            if failed > 0 {
                bail!("{} of {} upgrades failed", failed, requests.len());
            }
        }

        Commands::Deps { target, json } => {
            let graph = drydock.dependency_graph(&endpoint(&target)).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(graph.edges())?);
                return Ok(());
            }
            if graph.edges().is_empty() {
                println!("No containers share another container's network");
            }
            for edge in graph.edges() {
                println!("{} ({})", edge.provider.name, edge.provider.short_id);
                for dependent in &edge.dependents {
                    println!("  └─ {} [{}]", dependent.identity.name, dependent.reason);
                }
            }
        }

        Commands::Init { .. } => {}
    }

    Ok(())
}

fn endpoint(target: &Target) -> EndpointRef {
    EndpointRef::new(target.gateway.clone(), target.endpoint)
}

fn short_digest(digest: &str) -> String {
    let hex = digest.strip_prefix("sha256:").unwrap_or(digest);
    hex.chars().take(12).collect()
}
