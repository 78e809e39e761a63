//! Print the units active on a location

use crate::scenario;
use anyhow::Result;
use std::path::Path;

/// Run the command
pub async fn run(path: &Path, location: String, json: bool) -> Result<()> {
    let scenario = scenario::parse_file(path)?;
    let engine = scenario.build_engine(location.clone())?;

    let active = engine.check_activity(&location);

    if json {
        println!(
            "{}",
            serde_json::json!({ "location": location, "active": active })
        );
    } else if active.is_empty() {
        println!("No units are active on {}", location);
    } else {
        println!("Active on {}: {}", location, active.join(", "));
    }

    Ok(())
}
