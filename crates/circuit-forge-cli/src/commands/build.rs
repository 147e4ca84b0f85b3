use anyhow::{bail, Result};

use circuit_forge_core::artifacts::ArtifactLayout;
use circuit_forge_core::stage::StageStatus;
use circuit_forge_core::store::{CircuitStore, JsonFileStore};
use circuit_forge_core::{toolchain, BuildRequest, CircuitIdentity, ForgeConfig, Pipeline};

use crate::output;
use crate::BuildTarget;

/// Build one circuit's artifacts.
///
/// The circuit is named directly (`--slug`/`--name`) or resolved from an entry
/// id through a store file. Ctrl-C kills the running tool and fails the build;
/// rerunning without `--force` resumes from the first missing artifact.
pub async fn run(config: ForgeConfig, target: &BuildTarget, force: bool, json: bool) -> Result<()> {
    let identity = resolve(target).await?;
    if !json {
        output::print_header(&format!("circuit-forge build: {identity}"));
        output::print_key_value("Output", &config.circuit_output_root.display().to_string());
        output::print_key_value("Force", if force { "yes" } else { "no" });
    }

    if let Err(missing) = toolchain::check_prerequisites(&config) {
        for m in missing.iter().filter(|_| !json) {
            output::print_warning(&format!(
                "{} not found (install: {}); stages that need it will fail",
                m.tool, m.install
            ));
        }
    }

    let layout = ArtifactLayout::new(&config, &identity);
    let pipeline = Pipeline::new(config);
    let cancel = pipeline.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel.cancel();
        }
    });

    let spinner = output::spinner(&format!("Building {identity}"));
    let result = pipeline
        .build(&BuildRequest::new(identity.clone(), force))
        .await;
    spinner.finish_and_clear();

    let report = match result {
        Ok(report) => report,
        Err(e) => {
            output::print_error(&format!("{e}"));
            let mut source = std::error::Error::source(&e);
            while let Some(cause) = source {
                output::print_error(&format!("  caused by: {cause}"));
                source = cause.source();
            }
            bail!("build of {identity} failed");
        }
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    let total = report.stages.len();
    for (i, stage) in report.stages.iter().enumerate() {
        let status = match stage.status {
            StageStatus::Ran => format!("ran ({:.1}s)", stage.elapsed.as_secs_f64()),
            StageStatus::Skipped => "skipped (artifact present)".to_string(),
        };
        output::print_step(i + 1, total, &format!("{:<22} {status}", stage.stage.as_str()));
    }

    if report.is_noop() {
        output::print_success("Nothing to do; all artifacts present");
    } else {
        output::print_success("Build complete");
    }
    output::print_key_value("R1CS", &layout.r1cs().display().to_string());
    output::print_key_value("PK", &layout.proving_key().display().to_string());
    output::print_key_value("VK", &layout.verification_key().display().to_string());
    output::print_key_value(
        "Inputs",
        &layout.published_input_script().display().to_string(),
    );

    Ok(())
}

async fn resolve(target: &BuildTarget) -> Result<CircuitIdentity> {
    match (&target.slug, &target.name, &target.entry, &target.store) {
        (Some(slug), Some(name), None, _) => Ok(CircuitIdentity::new(slug, name)?),
        (None, None, Some(entry), Some(store)) => {
            let store = JsonFileStore::open(store)?;
            Ok(store.require(entry).await?)
        }
        _ => bail!("pass either --slug and --name, or --entry with --store"),
    }
}
