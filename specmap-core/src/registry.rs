//! Registry of trace databases known to this machine
//!
//! Lets the CLI address a database by project name instead of a file
//! path, with an optional default project.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Represents a registered trace database
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    /// Path to the trace database file
    pub path: String,
    /// Description of the project
    pub description: String,
}

/// Registry of all projects
#[derive(Debug, Serialize, Deserialize)]
pub struct Registry {
    pub projects: HashMap<String, Project>,
    /// Optional default project name
    pub default_project: Option<String>,
}

impl Registry {
    /// Loads the registry from the provided path
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read registry file: {:?}", path.as_ref()))?;

        serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse registry file: {:?}", path.as_ref()))
    }

    /// Gets a project by name
    pub fn get_project(&self, name: &str) -> Option<&Project> {
        self.projects.get(name)
    }

    /// Lists all project names
    pub fn list_projects(&self) -> Vec<&str> {
        self.projects.keys().map(|k| k.as_str()).collect()
    }

    /// Registers a new project or updates an existing one
    pub fn register_project(&mut self, name: String, path: String, description: String) {
        let project = Project { path, description };
        self.projects.insert(name, project);
    }

    /// Sets a project as the default
    pub fn set_default_project(&mut self, name: &str) -> Result<()> {
        if !self.projects.contains_key(name) {
            anyhow::bail!("Project '{}' not found in registry", name);
        }
        self.default_project = Some(name.to_string());
        Ok(())
    }

    /// Gets the default project if set
    pub fn get_default_project(&self) -> Option<(&str, &Project)> {
        if let Some(default_name) = &self.default_project {
            if let Some(project) = self.projects.get(default_name) {
                return Some((default_name, project));
            }
        }
        None
    }

    /// Save the registry to the specified path
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = serde_yaml::to_string(&self)?;

        if let Some(parent) = path.as_ref().parent() {
            fs::create_dir_all(parent)?;
        }

        fs::write(&path, content)
            .with_context(|| format!("Failed to write registry to {:?}", path.as_ref()))?;

        Ok(())
    }

    /// Creates an empty registry file if it doesn't exist
    pub fn create_default<P: AsRef<Path>>(path: P) -> Result<()> {
        if path.as_ref().exists() {
            return Ok(());
        }

        let registry = Registry {
            projects: HashMap::new(),
            default_project: None,
        };
        registry.save(path)
    }
}

/// Gets the path to the registry file
pub fn get_registry_path() -> Result<PathBuf> {
    // Check if SPECMAP_REGISTRY_PATH environment variable is set
    if let Ok(path) = std::env::var("SPECMAP_REGISTRY_PATH") {
        return Ok(PathBuf::from(path));
    }

    // Default to <config dir>/specmap/registry.yaml
    let config_dir = dirs::config_dir().context("Failed to determine config directory")?;

    Ok(config_dir.join("specmap").join("registry.yaml"))
}

/// Resolves the database path for a CLI invocation: an explicit project
/// name wins, then the registry default, then the provided fallback path.
pub fn determine_database_path(project: Option<&str>, fallback: &str) -> Result<PathBuf> {
    let registry_path = get_registry_path()?;

    if let Some(name) = project {
        let registry = Registry::load(&registry_path)
            .with_context(|| format!("No registry found while looking up project '{}'", name))?;
        let project = registry
            .get_project(name)
            .with_context(|| format!("Project '{}' not found in registry", name))?;
        return Ok(PathBuf::from(&project.path));
    }

    if let Ok(registry) = Registry::load(&registry_path) {
        if let Some((_, project)) = registry.get_default_project() {
            return Ok(PathBuf::from(&project.path));
        }
    }

    Ok(PathBuf::from(fallback))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_register_save_and_reload() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("registry.yaml");

        let mut registry = Registry {
            projects: HashMap::new(),
            default_project: None,
        };
        registry.register_project(
            "frames".into(),
            "/tmp/frames.yaml".into(),
            "frame parser traces".into(),
        );
        registry.set_default_project("frames").unwrap();
        registry.save(&path).unwrap();

        let reloaded = Registry::load(&path).unwrap();
        assert_eq!(reloaded.list_projects(), vec!["frames"]);
        let (name, project) = reloaded.get_default_project().unwrap();
        assert_eq!(name, "frames");
        assert_eq!(project.path, "/tmp/frames.yaml");
    }

    #[test]
    fn test_set_default_requires_known_project() {
        let mut registry = Registry {
            projects: HashMap::new(),
            default_project: None,
        };
        assert!(registry.set_default_project("missing").is_err());
    }
}
