//! The four build stages.
//!
//! Each stage owns exactly one target path from [`ArtifactLayout`], puts it
//! through the cache gate with the request's `force` flag, checks that its
//! inputs exist, and then produces the target by running a tool (or, for the
//! publish stage, copying a file).

use std::fmt;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::artifacts::ArtifactLayout;
use crate::cache::{self, CacheDecision};
use crate::config::ForgeConfig;
use crate::error::StageError;
use crate::identity::CircuitIdentity;
use crate::process::{self, OutputSink, ProcessSpec};

/// A pipeline stage, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Stage {
    Compile,
    GenerateProvingKey,
    GenerateVerificationKey,
    PublishInputScript,
}

impl Stage {
    /// Every stage; later entries consume earlier entries' artifacts.
    pub const ALL: [Stage; 4] = [
        Stage::Compile,
        Stage::GenerateProvingKey,
        Stage::GenerateVerificationKey,
        Stage::PublishInputScript,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Compile => "compile",
            Self::GenerateProvingKey => "proving-key",
            Self::GenerateVerificationKey => "verification-key",
            Self::PublishInputScript => "publish-input-script",
        }
    }

    /// The artifact whose presence decides whether this stage runs.
    pub fn target(self, layout: &ArtifactLayout) -> PathBuf {
        match self {
            Self::Compile => layout.circuit_dir().to_path_buf(),
            Self::GenerateProvingKey => layout.proving_key(),
            Self::GenerateVerificationKey => layout.verification_key(),
            Self::PublishInputScript => layout.published_input_script(),
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether a stage did work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StageStatus {
    Ran,
    Skipped,
}

/// Everything a stage needs for one circuit.
pub struct StageContext<'a> {
    pub config: &'a ForgeConfig,
    pub identity: &'a CircuitIdentity,
    pub layout: &'a ArtifactLayout,
    pub force: bool,
    pub cancel: &'a CancellationToken,
}

/// Run one stage to completion.
///
/// A cancelled context fails the stage before the cache gate can delete
/// anything.
pub async fn run(stage: Stage, ctx: &StageContext<'_>) -> Result<StageStatus, StageError> {
    if ctx.cancel.is_cancelled() {
        return Err(StageError::Cancelled {
            program: stage.as_str().to_string(),
        });
    }
    match stage {
        Stage::Compile => compile(ctx).await,
        Stage::GenerateProvingKey => generate_proving_key(ctx).await,
        Stage::GenerateVerificationKey => generate_verification_key(ctx).await,
        Stage::PublishInputScript => publish_input_script(ctx).await,
    }
}

/// Compile the circuit source to R1CS plus a witness-generator bundle.
pub async fn compile(ctx: &StageContext<'_>) -> Result<StageStatus, StageError> {
    let target = ctx.layout.circuit_dir();
    let source = ctx.layout.circuit_source();
    if !admit(target, ctx.force, &[source.clone()]).await?.should_run() {
        tracing::info!("skipping compilation of {}", ctx.identity);
        return Ok(StageStatus::Skipped);
    }

    tokio::fs::create_dir_all(target)
        .await
        .map_err(|e| StageError::fs("create", target, e))?;

    tracing::info!("compiling {} from {}", ctx.identity, source.display());
    let spec = ProcessSpec::new(&ctx.config.compiler)
        .arg(&source)
        .args(["--r1cs", "--wasm", "-o"])
        .arg(target)
        .arg("-l")
        .arg(&ctx.config.library_path)
        .timeout(ctx.config.stage_timeout());
    let program = spec.program().to_string();
    process::run(spec, ctx.cancel).await?.check(&program)?;

    expect_output(&ctx.layout.r1cs()).await?;
    tracing::info!("compiled {}", ctx.identity);
    Ok(StageStatus::Ran)
}

/// Create the proving key from the R1CS and the trusted-setup file.
///
/// The tool's stdout is appended to `{name}_zkey.log`; it is long-running and
/// gets a raised heap ceiling through `NODE_OPTIONS`.
pub async fn generate_proving_key(ctx: &StageContext<'_>) -> Result<StageStatus, StageError> {
    let target = ctx.layout.proving_key();
    let r1cs = ctx.layout.r1cs();
    let inputs = [r1cs.clone(), ctx.config.trusted_setup_path.clone()];
    if !admit(&target, ctx.force, &inputs).await?.should_run() {
        tracing::info!("skipping proving key generation for {}", ctx.identity);
        return Ok(StageStatus::Skipped);
    }

    let log = ctx.layout.proving_key_log();
    if ctx.force {
        remove_if_present(&log).await?;
    }

    tracing::info!("generating proving key for {}", ctx.identity);
    let spec = ProcessSpec::new(&ctx.config.keygen)
        .args(["zkey", "new"])
        .arg(&r1cs)
        .arg(&ctx.config.trusted_setup_path)
        .arg(&target)
        .arg("-v")
        .env("NODE_OPTIONS", ctx.config.keygen_node_options())
        .stdout(OutputSink::AppendFile(log))
        .timeout(ctx.config.stage_timeout());
    let program = spec.program().to_string();
    process::run(spec, ctx.cancel).await?.check(&program)?;

    expect_output(&target).await?;
    tracing::info!("generated proving key for {}", ctx.identity);
    Ok(StageStatus::Ran)
}

/// Export the verification key from the proving key.
pub async fn generate_verification_key(ctx: &StageContext<'_>) -> Result<StageStatus, StageError> {
    let target = ctx.layout.verification_key();
    let zkey = ctx.layout.proving_key();
    if !admit(&target, ctx.force, &[zkey.clone()]).await?.should_run() {
        tracing::info!("skipping verification key export for {}", ctx.identity);
        return Ok(StageStatus::Skipped);
    }

    tracing::info!("exporting verification key for {}", ctx.identity);
    let spec = ProcessSpec::new(&ctx.config.keygen)
        .args(["zkey", "export", "verificationkey"])
        .arg(&zkey)
        .arg(&target)
        .timeout(ctx.config.stage_timeout());
    let program = spec.program().to_string();
    process::run(spec, ctx.cancel).await?.check(&program)?;

    expect_output(&target).await?;
    tracing::info!("exported verification key for {}", ctx.identity);
    Ok(StageStatus::Ran)
}

/// Copy the generic input-generation script next to the compiled bundle.
pub async fn publish_input_script(ctx: &StageContext<'_>) -> Result<StageStatus, StageError> {
    let target = ctx.layout.published_input_script();
    let source = ctx.layout.input_script_source();
    let inputs = [source.clone(), ctx.layout.wasm_bundle_dir()];
    if !admit(&target, ctx.force, &inputs).await?.should_run() {
        tracing::info!("skipping input script publication for {}", ctx.identity);
        return Ok(StageStatus::Skipped);
    }

    tokio::fs::copy(&source, &target)
        .await
        .map_err(|e| StageError::fs("copy", &source, e))?;
    tracing::info!("published input script for {}", ctx.identity);
    Ok(StageStatus::Ran)
}

/// Cache gate plus input check.
///
/// Inputs are only required when the stage is going to run, and they are
/// checked before a forced rebuild deletes anything.
async fn admit(target: &Path, force: bool, inputs: &[PathBuf]) -> Result<CacheDecision, StageError> {
    if force || !cache::is_present(target).await? {
        for input in inputs {
            if !cache::is_present(input).await? {
                return Err(StageError::DependencyMissing { path: input.clone() });
            }
        }
    }
    cache::gate(target, force).await
}

async fn expect_output(path: &Path) -> Result<(), StageError> {
    if cache::is_present(path).await? {
        Ok(())
    } else {
        Err(StageError::MissingOutput {
            path: path.to_path_buf(),
        })
    }
}

async fn remove_if_present(path: &Path) -> Result<(), StageError> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(StageError::fs("remove", path, e)),
    }
}
