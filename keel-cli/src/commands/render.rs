//! `keel render` and `keel diff`: preview a deploy without applying it.

use anyhow::{bail, Context, Result};
use clap::Args;

use keel_core::{config, Artifact, AutoTriggers, PipelineConfig};
use keel_deploy::{diff::diff_against_target, ApplyDeployer, Deployer, DeployerMux, StaticLabels};
use keel_dev::{ArtifactBuilder, PrebuiltBuilder};
use keel_event::StateStore;

use super::ProjectArgs;

/// Arguments for `keel render`.
#[derive(Args, Debug)]
pub struct RenderArgs {
    #[command(flatten)]
    pub project: ProjectArgs,

    /// Override an artifact's reference, as `<image>=<ref>` (repeatable).
    #[arg(long = "image")]
    pub images: Vec<String>,
}

impl RenderArgs {
    pub fn run(self) -> Result<()> {
        let (config, artifacts) = load(&self.project, &self.images)?;
        let store = StateStore::new(config.image_names(), AutoTriggers::default());
        let mux = DeployerMux::new(
            config
                .deploy
                .iter()
                .map(|deploy| {
                    Box::new(ApplyDeployer::from_config(&config, deploy, store.clone()))
                        as Box<dyn Deployer>
                })
                .collect(),
        );

        let rendered = mux
            .render(&artifacts, &[&StaticLabels::managed_by()])
            .context("render failed")?;
        print!("{rendered}");
        if !rendered.is_empty() && !rendered.ends_with('\n') {
            println!();
        }
        Ok(())
    }
}

/// Arguments for `keel diff`.
#[derive(Args, Debug)]
pub struct DiffArgs {
    #[command(flatten)]
    pub project: ProjectArgs,

    /// Override an artifact's reference, as `<image>=<ref>` (repeatable).
    #[arg(long = "image")]
    pub images: Vec<String>,
}

impl DiffArgs {
    pub fn run(self) -> Result<()> {
        let (config, artifacts) = load(&self.project, &self.images)?;
        let store = StateStore::new(config.image_names(), AutoTriggers::default());
        let labels = StaticLabels::managed_by();

        let mut any = false;
        for deploy in &config.deploy {
            let deployer = ApplyDeployer::from_config(&config, deploy, store.clone());
            let rendered = deployer
                .render_manifests(&artifacts, &[&labels])
                .with_context(|| format!("render failed for target {}", deploy.target.display()))?;
            let diffs = diff_against_target(&rendered, deployer.applier().tool())
                .with_context(|| format!("diff failed for target {}", deploy.target.display()))?;
            for diff in diffs {
                any = true;
                print!("{}", diff.unified_diff);
                if !diff.unified_diff.ends_with('\n') {
                    println!();
                }
            }
        }

        if !any {
            println!("No differences.");
        }
        Ok(())
    }
}

/// Load the config and resolve every artifact, applying `--image` overrides.
fn load(project: &ProjectArgs, overrides: &[String]) -> Result<(PipelineConfig, Vec<Artifact>)> {
    let path = project.config_path();
    let config = config::load_at(&path)
        .with_context(|| format!("failed to load {}", path.display()))?;

    let mut artifacts = Vec::with_capacity(config.artifacts.len());
    for artifact in &config.artifacts {
        artifacts.push(
            PrebuiltBuilder
                .build(artifact)
                .with_context(|| format!("cannot resolve image '{}'", artifact.image))?,
        );
    }

    for entry in overrides {
        let Some((image, reference)) = entry.split_once('=') else {
            bail!("invalid --image '{entry}'; expected <image>=<ref>");
        };
        match artifacts.iter_mut().find(|a| a.image_name == image) {
            Some(existing) => existing.tag = reference.to_string(),
            None => artifacts.push(Artifact::new(image, reference)),
        }
    }
    Ok((config, artifacts))
}
