use anyhow::{bail, Result};

use circuit_forge_core::{toolchain, ForgeConfig};

use crate::output;

/// Report missing tools, old tool versions, and a missing trusted-setup file.
pub async fn run(config: &ForgeConfig) -> Result<()> {
    output::print_header("circuit-forge check");
    output::print_key_value("Compiler", &config.compiler);
    output::print_key_value("Key generator", &config.keygen);

    let mut failed = false;
    match toolchain::check_prerequisites(config) {
        Ok(()) => output::print_success("All required tools found"),
        Err(missing) => {
            failed = true;
            for m in &missing {
                output::print_error(&format!("Missing tool: {} (install: {})", m.tool, m.install));
            }
        }
    }

    for w in toolchain::check_versions(config).await {
        output::print_warning(&format!(
            "{}: found v{}, minimum v{} recommended",
            w.tool, w.found, w.minimum
        ));
    }

    if config.trusted_setup_path.is_file() {
        output::print_success(&format!(
            "Trusted setup: {}",
            config.trusted_setup_path.display()
        ));
    } else {
        failed = true;
        output::print_error(&format!(
            "Trusted setup file not found: {}",
            config.trusted_setup_path.display()
        ));
    }

    if failed {
        bail!("toolchain check failed");
    }
    Ok(())
}
