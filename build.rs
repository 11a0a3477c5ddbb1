use anyhow::Result;
use chrono::TimeZone;
use std::env;
use std::fs;
use std::process::Command;
use vergen_gitcl::{Emitter, GitclBuilder};

fn main() -> Result<()> {
    // Generate git information
    let gitcl = GitclBuilder::default()
        .describe(true, true, Some("[0-9]*"))
        .build()?;

    let gitcl_res = Emitter::default()
        .idempotent()
        .fail_on_error()
        .add_instructions(&gitcl)
        .and_then(|emitter| emitter.emit());

    if let Err(e) = gitcl_res {
        eprintln!("error occurred while generating instructions: {e:?}");
        Emitter::default().idempotent().fail_on_error().emit()?;
        println!("cargo:rustc-env=VERGEN_GIT_DESCRIBE=unknown");
    }

    // Add build timestamp
    let now = match env::var("SOURCE_DATE_EPOCH")
        .ok()
        .and_then(|val| val.parse::<i64>().ok())
        .and_then(|secs| chrono::Utc.timestamp_opt(secs, 0).single())
    {
        Some(ts) => ts,
        None => chrono::Utc::now(),
    };

    println!(
        "cargo:rustc-env=BUILD_TIMESTAMP={}",
        now.format("%Y-%m-%d %H:%M:%S UTC")
    );

    let iamf_version = get_iamf_version_from_metadata().unwrap_or_else(|_| {
        read_iamf_version_fallback().unwrap_or_else(|_| "unknown".to_string())
    });
    println!("cargo:rustc-env=IAMF_VERSION={iamf_version}");

    println!("cargo:rerun-if-changed=iamf/Cargo.toml");

    Ok(())
}

/// Get the iamf workspace member's version using cargo metadata
fn get_iamf_version_from_metadata() -> Result<String> {
    let output = Command::new("cargo")
        .args(["metadata", "--format-version", "1"])
        .output()?;

    if !output.status.success() {
        anyhow::bail!("cargo metadata failed");
    }

    let metadata: serde_json::Value = serde_json::from_slice(&output.stdout)?;

    let version = metadata["packages"]
        .as_array()
        .into_iter()
        .flatten()
        .filter(|package| package["name"].as_str() == Some("iamf"))
        .find_map(|package| package["version"].as_str());
    if let Some(version) = version {
        return Ok(version.to_string());
    }

    anyhow::bail!("iamf package not found in metadata");
}

/// Fallback: manually parse iamf/Cargo.toml
fn read_iamf_version_fallback() -> Result<String> {
    let toml_content = fs::read_to_string("iamf/Cargo.toml")?;

    for line in toml_content.lines() {
        let line = line.trim();
        if !line.starts_with("version") {
            continue;
        }
        if let Some((_, version_part)) = line.split_once('=') {
            let version = version_part.trim().trim_matches('"').trim_matches('\'');
            return Ok(version.to_string());
        }
    }

    anyhow::bail!("Could not find version in iamf/Cargo.toml");
}
