//! Analysis configuration.
//!
//! Configuration is owned by the user and lives in `.ripple/config.yaml`.
//! Every section has defaults, so an empty file (or no file) is valid:
//!
//! ```yaml
//! type-equivalence:
//!   - [string, String]
//!   - [number, Integer]
//! confidence:
//!   data-flow: 0.5
//!   consistency: 0.5
//! plan:
//!   max-impacted-entities: 20
//!   pervasive-mismatch-fraction: 0.5
//! naming:
//!   mappings:
//!     UserInput: UpdateUserDTO
//!   strip-suffixes: [DTO, Dto]
//! ```
//!
//! A malformed file is one of the few fatal errors: analysis never runs with
//! a type-equivalence table it could not understand.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::types::Dimension;

/// Name of the per-workspace ripple directory
pub const RIPPLE_DIR_NAME: &str = ".ripple";

/// Name of the configuration file inside [`RIPPLE_DIR_NAME`]
pub const CONFIG_FILE_NAME: &str = "config.yaml";

/// Name of the graph database inside [`RIPPLE_DIR_NAME`]
pub const DATABASE_FILE_NAME: &str = "graph.db";

/// Top-level analysis configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct AnalysisConfig {
    /// Groups of type names that are interchangeable across the boundary
    pub type_equivalence: Vec<Vec<String>>,
    /// Per-dimension confidence gates for impact traversal
    pub confidence: ConfidenceThresholds,
    /// Change-plan classification thresholds
    pub plan: PlanThresholds,
    /// Frontend/backend type-name correspondence rules
    pub naming: NamingRules,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            type_equivalence: vec![
                vec!["string".to_string(), "String".to_string()],
                vec!["number".to_string(), "Integer".to_string()],
            ],
            confidence: ConfidenceThresholds::default(),
            plan: PlanThresholds::default(),
            naming: NamingRules::default(),
        }
    }
}

/// Minimum edge confidence followed during impact traversal, per dimension.
///
/// Reference edges are exact and are never gated.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct ConfidenceThresholds {
    /// Gate for heuristic data-flow edges
    pub data_flow: f64,
    /// Gate for frontend/backend consistency edges
    pub consistency: f64,
    /// Gate for contract edges
    pub contract: f64,
    /// Gate for configuration edges
    pub config: f64,
}

impl Default for ConfidenceThresholds {
    fn default() -> Self {
        Self {
            data_flow: 0.5,
            consistency: 0.5,
            contract: 0.0,
            config: 0.0,
        }
    }
}

impl ConfidenceThresholds {
    /// The gate applied to edges of `dimension`.
    #[must_use]
    pub fn for_dimension(&self, dimension: Dimension) -> f64 {
        match dimension {
            Dimension::Reference => 0.0,
            Dimension::DataFlow => self.data_flow,
            Dimension::Consistency => self.consistency,
            Dimension::Contract => self.contract,
            Dimension::Config => self.config,
        }
    }
}

/// Thresholds for change-plan strategy classification.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct PlanThresholds {
    /// Impact sizes above this are flagged for refactoring
    pub max_impacted_entities: usize,
    /// Fraction of contract pairs with mismatches above which mismatches are pervasive
    pub pervasive_mismatch_fraction: f64,
}

impl Default for PlanThresholds {
    fn default() -> Self {
        Self {
            max_impacted_entities: 20,
            pervasive_mismatch_fraction: 0.5,
        }
    }
}

/// Rules pairing frontend type names with backend type names.
///
/// Explicit `mappings` win; otherwise both names are reduced by stripping
/// the configured prefixes/suffixes and compared.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct NamingRules {
    /// Frontend type name to backend type name
    pub mappings: BTreeMap<String, String>,
    /// Prefixes removed before comparing names (`I` for `IUser`)
    pub strip_prefixes: Vec<String>,
    /// Suffixes removed before comparing names (`DTO`, `Request`)
    pub strip_suffixes: Vec<String>,
    /// Compare reduced names ignoring ASCII case
    pub case_insensitive: bool,
    /// Confidence assigned to pairs found by convention rather than mapping
    pub convention_confidence: f64,
}

impl Default for NamingRules {
    fn default() -> Self {
        Self {
            mappings: BTreeMap::new(),
            strip_prefixes: Vec::new(),
            strip_suffixes: Vec::new(),
            case_insensitive: false,
            convention_confidence: 0.8,
        }
    }
}

impl AnalysisConfig {
    /// Load configuration from a YAML file and validate it.
    ///
    /// # Errors
    ///
    /// Returns `Error::Io` if the file cannot be read and `Error::Config` if it
    /// does not parse or fails validation.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from YAML text and validate it.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if the text does not parse or fails validation.
    pub fn from_yaml(content: &str) -> Result<Self> {
        // An empty document deserializes as unit, not as an empty mapping.
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        let config: Self =
            serde_yaml::from_str(content).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load `.ripple/config.yaml` under `workspace`, or the defaults if absent.
    ///
    /// # Errors
    ///
    /// Same as [`AnalysisConfig::load`] when the file exists.
    pub fn load_or_default(workspace: &Path) -> Result<Self> {
        let path = Self::default_path(workspace);
        if path.is_file() {
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Location of the configuration file for a workspace.
    #[must_use]
    pub fn default_path(workspace: &Path) -> PathBuf {
        workspace.join(RIPPLE_DIR_NAME).join(CONFIG_FILE_NAME)
    }

    /// Save configuration as YAML.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` on serialization failure and `Error::Io` on write failure.
    pub fn save(&self, path: &Path) -> Result<()> {
        let content =
            serde_yaml::to_string(self).map_err(|e| Error::Config(format!("YAML error: {e}")))?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Check the configuration for contradictions and out-of-range values.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` describing the first problem found.
    pub fn validate(&self) -> Result<()> {
        self.validate_type_equivalence()?;

        let thresholds = [
            ("confidence.data-flow", self.confidence.data_flow),
            ("confidence.consistency", self.confidence.consistency),
            ("confidence.contract", self.confidence.contract),
            ("confidence.config", self.confidence.config),
            (
                "plan.pervasive-mismatch-fraction",
                self.plan.pervasive_mismatch_fraction,
            ),
            (
                "naming.convention-confidence",
                self.naming.convention_confidence,
            ),
        ];
        for (name, value) in thresholds {
            if !value.is_finite() || !(0.0..=1.0).contains(&value) {
                return Err(Error::Config(format!(
                    "{name} must be within [0, 1], got {value}"
                )));
            }
        }

        if self.plan.max_impacted_entities == 0 {
            return Err(Error::Config(
                "plan.max-impacted-entities must be at least 1".to_string(),
            ));
        }

        for (frontend, backend) in &self.naming.mappings {
            if frontend.trim().is_empty() || backend.trim().is_empty() {
                return Err(Error::Config(format!(
                    "naming.mappings contains an empty name: `{frontend}` -> `{backend}`"
                )));
            }
        }

        Ok(())
    }

    fn validate_type_equivalence(&self) -> Result<()> {
        let mut owner: HashMap<&str, usize> = HashMap::new();
        for (index, group) in self.type_equivalence.iter().enumerate() {
            if group.len() < 2 {
                return Err(Error::Config(format!(
                    "type-equivalence group {index} must list at least two types"
                )));
            }
            for name in group {
                let name = name.trim();
                if name.is_empty() {
                    return Err(Error::Config(format!(
                        "type-equivalence group {index} contains an empty type name"
                    )));
                }
                if let Some(previous) = owner.insert(name, index) {
                    if previous != index {
                        return Err(Error::Config(format!(
                            "type `{name}` appears in type-equivalence groups {previous} and {index}"
                        )));
                    }
                }
            }
        }
        Ok(())
    }
}
