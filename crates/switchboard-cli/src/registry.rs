//! Built-in source and target definitions.

use std::sync::Arc;

use async_trait::async_trait;
use switchboard_core::{CommandLine, ExecutionContext, RefPolicy, TagFilter, TagOrder};
use switchboard_pipeline::{
    Collaborators, PackageSource, PipelineError, SourceSpec, StandardTarget, Target, TargetSpec,
};

/// Numba development build.
pub fn numba_source() -> PackageSource {
    PackageSource::new(
        "numba",
        SourceSpec::Channel {
            channels: vec!["numba/label/dev".to_string()],
            packages: vec!["numba".to_string(), "numpy".to_string()],
        },
    )
    .with_diagnostics(CommandLine::parse("numba -s"))
}

fn last_tag() -> RefPolicy {
    RefPolicy::latest(TagFilter::any(), TagOrder::Raw)
}

fn last_tag_without_v_prefix() -> RefPolicy {
    RefPolicy::latest(TagFilter::any().exclude_prefix("v"), TagOrder::Raw)
}

fn awkward_array() -> Arc<dyn Target> {
    Arc::new(StandardTarget::new(
        TargetSpec::new("awkward-array")
            .cloned_from("https://github.com/scikit-hep/awkward-array", last_tag())
            .dependency("numpy pytest")
            .install_command("python setup.py install")
            .install_command_in("awkward-numba", "python setup.py install")
            .test_command("pytest tests/test_numba.py"),
    ))
}

fn clifford() -> Arc<dyn Target> {
    Arc::new(StandardTarget::new(
        TargetSpec::new("clifford")
            .cloned_from("https://github.com/pygae/clifford.git", last_tag())
            .dependency("future numpy scipy numba pip nose h5py")
            .install_command("python setup.py install")
            .test_command("nosetests"),
    ))
}

/// HPAT is installed from its conda channels rather than from a checkout.
pub struct HpatTarget {
    spec: TargetSpec,
}

impl HpatTarget {
    const INSTALL_SPEC: &'static str = "-c ehsantn -c anaconda -c conda-forge hpat";

    pub fn new() -> Self {
        Self {
            spec: TargetSpec::new("hpat")
                .dependency("pyspark openjdk scipy")
                .dependency("-c ehsantn h5py")
                .test_command("python -m hpat.tests.gen_test_data")
                .test_command("python -m hpat.runtests"),
        }
    }
}

impl Default for HpatTarget {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Target for HpatTarget {
    fn spec(&self) -> &TargetSpec {
        &self.spec
    }

    async fn install(
        &self,
        tools: &Collaborators,
        ctx: &ExecutionContext,
    ) -> switchboard_pipeline::Result<()> {
        tools
            .environments
            .install(ctx, self.name(), Self::INSTALL_SPEC)
            .await?;
        Ok(())
    }
}

fn librosa() -> Arc<dyn Target> {
    Arc::new(StandardTarget::new(
        TargetSpec::new("librosa")
            .cloned_from("https://github.com/librosa/librosa.git", last_tag_without_v_prefix())
            .dependency("pip numpy scipy coverage scikit-learn matplotlib pytest")
            .dependency("-c conda-forge ffmpeg")
            .install_command("pip install --pre -e .[tests]")
            .test_command("pytest"),
    ))
}

fn umap() -> Arc<dyn Target> {
    Arc::new(StandardTarget::new(
        TargetSpec::new("umap")
            .cloned_from("https://github.com/lmcinnes/umap", last_tag_without_v_prefix())
            .dependency("numpy scikit-learn scipy nose")
            .install_command("pip install -e .")
            .test_command("nosetests -s umap"),
    ))
}

/// Every registered target, in registry order.
pub fn all_targets() -> Vec<Arc<dyn Target>> {
    vec![
        awkward_array(),
        clifford(),
        Arc::new(HpatTarget::new()),
        librosa(),
        umap(),
    ]
}

pub fn target_names() -> Vec<String> {
    all_targets().iter().map(|t| t.name().to_string()).collect()
}

/// Registered targets named in `names`, in registry order. An empty
/// selection means every target.
pub fn select_targets(names: &[String]) -> Result<Vec<Arc<dyn Target>>, PipelineError> {
    let all = all_targets();
    if let Some(unknown) = names
        .iter()
        .find(|name| !all.iter().any(|t| t.name() == name.as_str()))
    {
        return Err(PipelineError::UnknownTarget(unknown.clone()));
    }
    if names.is_empty() {
        return Ok(all);
    }
    Ok(all
        .into_iter()
        .filter(|t| names.iter().any(|name| name == t.name()))
        .collect())
}
