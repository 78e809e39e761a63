//! Validate a scenario file

use crate::scenario;
use anyhow::Result;
use std::path::Path;

/// Run the command
pub async fn run(path: &Path) -> Result<()> {
    println!("Validating {}...", path.display());

    let scenario = scenario::parse_file(path)?;

    println!("✓ Scenario valid");
    println!("  Units: {}", scenario.units.len());
    println!("  Routes: {}", scenario.routes.len());
    println!("  Failure policy: {:?}", scenario.settings.failure_policy);

    for unit in &scenario.units {
        if !unit.fail.is_empty() {
            let operations: Vec<_> = unit.fail.iter().map(|op| op.as_str()).collect();
            println!(
                "  ⚠ Unit '{}' is scripted to fail on: {}",
                unit.name,
                operations.join(", ")
            );
        }
    }

    // Routes nobody is active on are usually a typo
    for route in &scenario.routes {
        if !scenario.units.iter().any(|unit| unit.active_when.matches(route)) {
            println!("  ⚠ No unit is active on route '{}'", route);
        }
    }

    Ok(())
}
