//! TOML descriptions of feedback programs.
//!
//! A program file names the unit count, the ordered record struct, an
//! optional initializer preset and the GLSL for the update and render steps.
//! Table order is significant: the order of `[struct]` keys fixes the record
//! layout, and the order of each `params` table fixes the uniform block.

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use serde::de::{self, Deserializer, MapAccess};
use serde::Deserialize;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to parse program file: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid program file: {0}")]
    Invalid(String),
}

/// Ordered `name = "type"` entries.
pub type Declarations = Vec<(String, String)>;

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ProgramFile {
    pub units: u32,
    #[serde(rename = "struct", deserialize_with = "deserialize_declarations")]
    pub fields: Declarations,
    #[serde(default)]
    pub initialize: Initialize,
    pub update: StepSpec,
    pub render: StepSpec,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct StepSpec {
    pub glsl: String,
    #[serde(default, deserialize_with = "deserialize_declarations")]
    pub params: Declarations,
    /// Starting values for scalar `float` params.
    #[serde(default)]
    pub values: BTreeMap<String, f32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InitMode {
    /// Every record starts as zero bytes.
    #[default]
    Zero,
    /// Every component is drawn uniformly from `[min, max]`.
    Uniform,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Initialize {
    #[serde(default)]
    pub mode: InitMode,
    #[serde(default = "default_min")]
    pub min: f32,
    #[serde(default = "default_max")]
    pub max: f32,
    #[serde(default)]
    pub seed: Option<u64>,
}

impl Default for Initialize {
    fn default() -> Self {
        Self {
            mode: InitMode::Zero,
            min: default_min(),
            max: default_max(),
            seed: None,
        }
    }
}

fn default_min() -> f32 {
    -1.0
}

fn default_max() -> f32 {
    1.0
}

fn deserialize_declarations<'de, D>(deserializer: D) -> Result<Declarations, D::Error>
where
    D: Deserializer<'de>,
{
    struct Visitor;

    impl<'de> de::Visitor<'de> for Visitor {
        type Value = Declarations;

        fn expecting(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
            formatter.write_str("a table of name = \"glsl type\" entries")
        }

        fn visit_map<A>(self, mut map: A) -> Result<Self::Value, A::Error>
        where
            A: MapAccess<'de>,
        {
            let mut entries = Vec::with_capacity(map.size_hint().unwrap_or(0));
            while let Some((name, type_name)) = map.next_entry::<String, String>()? {
                entries.push((name, type_name));
            }
            Ok(entries)
        }
    }

    deserializer.deserialize_map(Visitor)
}

impl ProgramFile {
    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        let program: ProgramFile = toml::from_str(input)?;
        program.validate()?;
        Ok(program)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.units == 0 {
            return Err(ConfigError::Invalid("units must be at least 1".into()));
        }
        if self.fields.is_empty() {
            return Err(ConfigError::Invalid(
                "[struct] must declare at least one field".into(),
            ));
        }
        for (label, step) in [("update", &self.update), ("render", &self.render)] {
            if step.glsl.trim().is_empty() {
                return Err(ConfigError::Invalid(format!("[{label}] glsl is empty")));
            }
            if let Some(name) = step
                .values
                .keys()
                .find(|name| !step.params.iter().any(|(param, _)| param == *name))
            {
                return Err(ConfigError::Invalid(format!(
                    "[{label}.values] sets undeclared param '{name}'"
                )));
            }
        }
        let init = &self.initialize;
        if !(init.min.is_finite() && init.max.is_finite()) || init.min > init.max {
            return Err(ConfigError::Invalid(format!(
                "[initialize] range {}..{} is invalid",
                init.min, init.max
            )));
        }
        Ok(())
    }

    /// Field names in layout order.
    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(name, _)| name.as_str())
    }
}
