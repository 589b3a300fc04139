//! `check` and `simulate`.
//!
//! Both run the real controller against in-memory plugins registered
//! under whatever plugin names the group document uses. Callers talk to it
//! through a `LazyGroup`, the same way a remote CLI would.

use std::future::Future;
use std::path::Path;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, bail};
use tracing::{debug, info};

use fleet_core::{ControllerOptions, GroupSpec};
use fleetgrid_fake::{FakeFlavor, FakeInstances};
use fleetgrid_group::GroupRegistry;
use fleetgrid_plugin::{GroupDescription, GroupPlugin, LazyGroup, PluginResult, PluginSet};

type FoundGroup = Pin<Box<dyn Future<Output = PluginResult<Arc<dyn GroupPlugin>>> + Send>>;

pub fn read_spec(path: &Path) -> anyhow::Result<GroupSpec> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("invalid group document {}", path.display()))
}

/// A controller backed by fake plugins named after `spec`'s plugins.
fn simulator(spec: &GroupSpec, options: &ControllerOptions) -> anyhow::Result<LazyGroup> {
    let config = spec.config()?;
    let plugins = PluginSet::new();
    plugins.register_instance(&config.instance.plugin, Arc::new(FakeInstances::new()));
    plugins.register_flavor(&config.flavor.plugin, Arc::new(FakeFlavor::new()));

    let registry: Arc<dyn GroupPlugin> = Arc::new(GroupRegistry::new(
        plugins.instance_lookup(),
        plugins.flavor_lookup(),
        options.clone(),
    ));
    let finder = Arc::new(move || {
        let registry = registry.clone();
        let found: FoundGroup = Box::pin(async move { Ok(registry) });
        found
    });
    Ok(LazyGroup::new(finder, options.lazy_retry.as_duration()))
}

/// Validate a document and print what committing it would do.
pub async fn check(path: &Path, options: &ControllerOptions) -> anyhow::Result<String> {
    let spec = read_spec(path)?;
    let group = simulator(&spec, options)?;
    let explanation = group.commit_group(spec, true).await?;
    Ok(explanation)
}

pub struct Simulation<'a> {
    pub spec: &'a Path,
    /// A second document committed once the first has converged.
    pub then: Option<&'a Path>,
    pub resize: Option<u32>,
    pub timeout: Duration,
}

/// Commit a document, let it converge, apply the follow-up changes, and
/// return the final group description.
pub async fn simulate(
    run: Simulation<'_>,
    options: &ControllerOptions,
) -> anyhow::Result<GroupDescription> {
    let spec = read_spec(run.spec)?;
    let id = spec.id.clone();
    let group = simulator(&spec, options)?;

    println!("{}", group.commit_group(spec, false).await?);
    settle(&group, &id, options, run.timeout).await?;

    if let Some(path) = run.then {
        let next = read_spec(path)?;
        if next.id != id {
            bail!("{} describes group '{}', expected '{id}'", path.display(), next.id);
        }
        println!("{}", group.commit_group(next, false).await?);
        settle(&group, &id, options, run.timeout).await?;
    }

    if let Some(size) = run.resize {
        group.set_size(&id, size).await?;
        println!("Resized group {id} to {size}");
        settle(&group, &id, options, run.timeout).await?;
    }

    let described = group.describe_group(&id).await?;
    group.free_group(&id).await?;
    Ok(described)
}

/// Wait until no update is in flight and the group has its full size.
async fn settle(
    group: &LazyGroup,
    id: &str,
    options: &ControllerOptions,
    timeout: Duration,
) -> anyhow::Result<()> {
    let deadline = tokio::time::Instant::now() + timeout;
    let poll = options.poll_interval().max(Duration::from_millis(1));
    loop {
        let described = group.describe_group(id).await?;
        let size = group.size(id).await? as usize;
        debug!(group = id, have = described.instances.len(), want = size, converged = described.converged, "waiting");
        if described.converged && described.instances.len() == size {
            info!(group = id, size, "group settled");
            return Ok(());
        }
        if tokio::time::Instant::now() >= deadline {
            bail!(
                "group {id} did not settle within {}",
                fleet_core::HumanDuration::from(timeout)
            );
        }
        tokio::time::sleep(poll).await;
    }
}
