use anyhow::Result;
use chrono::TimeZone;
use std::env;
use std::fs;
use std::process::Command;

fn main() -> Result<()> {
    // Add build timestamp
    let now = match env::var("SOURCE_DATE_EPOCH") {
        Ok(val) => chrono::Utc
            .timestamp_opt(val.parse::<i64>()?, 0)
            .single()
            .unwrap_or_else(chrono::Utc::now),
        Err(_) => chrono::Utc::now(),
    };

    println!(
        "cargo:rustc-env=BUILD_TIMESTAMP={}",
        now.format("%Y-%m-%d %H:%M:%S UTC")
    );

    // Get ogv library version using cargo metadata
    let ogv_version = get_ogv_version_from_metadata()
        .unwrap_or_else(|_| read_ogv_version_fallback().unwrap_or_else(|_| "unknown".to_string()));
    println!("cargo:rustc-env=OGV_VERSION={ogv_version}");

    // Tell cargo to rerun this build script if the ogv Cargo.toml changes
    println!("cargo:rerun-if-changed=ogv/Cargo.toml");

    Ok(())
}

/// Get ogv version using cargo metadata (works with published and local dependencies)
fn get_ogv_version_from_metadata() -> Result<String> {
    let output = Command::new("cargo")
        .args(["metadata", "--format-version", "1", "--no-deps"])
        .output()?;

    if !output.status.success() {
        anyhow::bail!("cargo metadata failed");
    }

    let metadata: serde_json::Value = serde_json::from_slice(&output.stdout)?;

    if let Some(packages) = metadata["packages"].as_array() {
        for package in packages {
            if package["name"].as_str() == Some("ogv") {
                if let Some(version) = package["version"].as_str() {
                    return Ok(version.to_string());
                }
            }
        }
    }

    anyhow::bail!("ogv package not found in metadata");
}

/// Fallback: manually parse ogv/Cargo.toml (for edge cases)
fn read_ogv_version_fallback() -> Result<String> {
    let toml_content = fs::read_to_string("ogv/Cargo.toml")?;

    for line in toml_content.lines() {
        let line = line.trim();
        if line.starts_with("version") && line.contains('=') {
            if let Some(equals_pos) = line.find('=') {
                let version_part = line[equals_pos + 1..].trim();
                let version = version_part.trim_matches('"').trim_matches('\'');
                return Ok(version.to_string());
            }
        }
    }

    anyhow::bail!("Could not find version in ogv/Cargo.toml");
}
