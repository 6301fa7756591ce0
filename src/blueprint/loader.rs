//! Filesystem blueprint discovery. A blueprint lives in its own sub-folder of
//! `AGENTS_DIR` containing `blueprint.yaml` (metadata + schemas) and, for
//! autonomous blueprints, `prompt.md`.
//!
//! The filesystem is a one-shot seed on startup; after that, blueprints are
//! mutated through the CRUD API (see §4.5's hot-discovery-vs-CRUD tradeoff —
//! this implementation picked "seed then API owns it" rather than making the
//! filesystem perpetually authoritative, since the API surface explicitly
//! supports blueprint PATCH/DELETE).

use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::Value;

use crate::store::models::{Blueprint, BlueprintStatus, BlueprintType, Demands};

#[derive(Debug, Deserialize)]
struct BlueprintFile {
    description: Option<String>,
    #[serde(rename = "type")]
    blueprint_type: BlueprintTypeFile,
    #[serde(default)]
    parameters_schema: Value,
    #[serde(default)]
    output_schema: Option<Value>,
    #[serde(default)]
    mcp_servers: Value,
    #[serde(default)]
    capabilities_required: std::collections::BTreeSet<String>,
    #[serde(default)]
    demands: Demands,
    #[serde(default)]
    hooks: Value,
    #[serde(default)]
    command: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "lowercase")]
enum BlueprintTypeFile {
    Autonomous,
    Procedural,
}

/// Loads every `*/blueprint.yaml` under `dir`. A directory that doesn't exist
/// yet yields an empty set rather than an error, so a fresh deployment can
/// start with zero blueprints and create them all via the API.
pub fn load_dir(dir: &Path) -> Result<Vec<Blueprint>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }

    let mut blueprints = Vec::new();
    for entry in std::fs::read_dir(dir).with_context(|| format!("reading {dir:?}"))? {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().to_string();
        let manifest_path = entry.path().join("blueprint.yaml");
        if !manifest_path.exists() {
            continue;
        }
        match load_one(&name, &entry.path(), &manifest_path) {
            Ok(bp) => blueprints.push(bp),
            Err(err) => {
                tracing::warn!(blueprint = %name, error = %err, "skipping malformed blueprint directory");
            }
        }
    }
    Ok(blueprints)
}

fn load_one(name: &str, dir: &Path, manifest_path: &Path) -> Result<Blueprint> {
    let raw = std::fs::read_to_string(manifest_path)
        .with_context(|| format!("reading {manifest_path:?}"))?;
    let manifest: BlueprintFile =
        serde_yaml::from_str(&raw).with_context(|| format!("parsing {manifest_path:?}"))?;

    let system_prompt = match manifest.blueprint_type {
        BlueprintTypeFile::Autonomous => {
            let prompt_path = dir.join("prompt.md");
            Some(
                std::fs::read_to_string(&prompt_path)
                    .with_context(|| format!("reading {prompt_path:?}"))?,
            )
        }
        BlueprintTypeFile::Procedural => None,
    };

    Ok(Blueprint {
        name: name.to_string(),
        description: manifest.description,
        blueprint_type: match manifest.blueprint_type {
            BlueprintTypeFile::Autonomous => BlueprintType::Autonomous,
            BlueprintTypeFile::Procedural => BlueprintType::Procedural,
        },
        system_prompt,
        parameters_schema: manifest.parameters_schema,
        output_schema: manifest.output_schema,
        mcp_servers: manifest.mcp_servers,
        capabilities_required: manifest.capabilities_required,
        demands: manifest.demands,
        hooks: manifest.hooks,
        status: BlueprintStatus::Active,
        command: manifest.command,
        runner_owned: false,
        owning_runner_id: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_directory_yields_empty_set() {
        let blueprints = load_dir(Path::new("/nonexistent/agents/dir")).unwrap();
        assert!(blueprints.is_empty());
    }

    #[test]
    fn loads_an_autonomous_blueprint_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let bp_dir = dir.path().join("echo");
        std::fs::create_dir_all(&bp_dir).unwrap();
        std::fs::write(
            bp_dir.join("blueprint.yaml"),
            "type: autonomous\ndescription: echoes the prompt\n",
        )
        .unwrap();
        std::fs::write(bp_dir.join("prompt.md"), "You are an echo agent.").unwrap();

        let blueprints = load_dir(dir.path()).unwrap();
        assert_eq!(blueprints.len(), 1);
        assert_eq!(blueprints[0].name, "echo");
        assert_eq!(blueprints[0].blueprint_type, BlueprintType::Autonomous);
        assert!(blueprints[0].system_prompt.is_some());
    }
}
