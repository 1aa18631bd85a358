use anyhow::Context as _;
use siirto::cluster::Kubectl;
use clap::Parser;
use siirto::config::Cli;
use siirto::controller::sleeper::TokioSleeper;
use siirto::controller::{run, Context};
use siirto::resource::{parse_documents, Resource};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info};

/// Parse every manifest file, in argument order
async fn load_manifests(paths: &[PathBuf]) -> anyhow::Result<Vec<Resource>> {
    let mut manifests = Vec::new();
    for path in paths {
        manifests.extend(load_manifest_file(path).await?);
    }
    Ok(manifests)
}

async fn load_manifest_file(path: &Path) -> anyhow::Result<Vec<Resource>> {
    let contents = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read manifest {}", path.display()))?;
    let documents = parse_documents(&contents)
        .with_context(|| format!("Invalid manifest {}", path.display()))?;
    info!(path = %path.display(), documents = documents.len(), "Loaded manifest");
    Ok(documents)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let Cli { config, manifests } = Cli::parse();

    info!(
        action = %config.action,
        strategy = %config.strategy,
        namespace = config.namespace.as_deref().unwrap_or("<default>"),
        manifests = manifests.len(),
        "Starting siirto"
    );

    let manifests = load_manifests(&manifests).await?;

    let cluster = Kubectl::new(config.kubectl_path.clone(), config.namespace.clone());
    let action = config.action;
    let ctx = Context::new(Arc::new(cluster), Arc::new(TokioSleeper), config);

    match run(action, &manifests, &ctx).await {
        Ok(outcome) => {
            for applied in &outcome.applied {
                info!(resource = %applied, "Applied");
            }
            for deleted in &outcome.deleted {
                info!(resource = %deleted, "Deleted");
            }
            Ok(())
        }
        Err(e) => {
            error!(error = %e, action = %action, "Rollout action failed");
            Err(e.into())
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[path = "main_test.rs"]
mod tests;
