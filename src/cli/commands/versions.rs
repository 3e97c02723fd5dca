//! CLI implementation for `incubate versions`
//!
//! Lists the versions of a package found across the package paths.

use anyhow::{bail, Result};

use crate::cli::GlobalOptions;
use crate::core::catalog::{ManifestDirs, ManifestSource};

/// Execute the versions command
pub fn execute(options: &GlobalOptions, name: &str) -> Result<()> {
    let config = options.builder_config()?;
    if config.package_paths.is_empty() {
        bail!("no package path given (use --package-path or INCUBATE_PACKAGE_PATH)");
    }

    let versions = ManifestDirs::new(config.package_paths).versions(name);
    if versions.is_empty() {
        bail!("Package not found: {name}");
    }

    if options.json {
        let list: Vec<String> = versions.iter().map(ToString::to_string).collect();
        println!("{}", serde_json::json!({ "name": name, "versions": list }));
    } else {
        for version in versions {
            println!("{name}-{version}");
        }
    }
    Ok(())
}
