//! Circuit identity and build requests.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{ForgeError, Result};

/// Names one circuit's build tree (`slug`) and its template (`name`).
///
/// Both values become path components, so construction rejects anything
/// that could escape the output roots.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "RawIdentity")]
pub struct CircuitIdentity {
    slug: String,
    name: String,
}

#[derive(Deserialize)]
struct RawIdentity {
    slug: String,
    name: String,
}

impl TryFrom<RawIdentity> for CircuitIdentity {
    type Error = ForgeError;

    fn try_from(raw: RawIdentity) -> Result<Self> {
        Self::new(raw.slug, raw.name)
    }
}

impl CircuitIdentity {
    pub fn new(slug: impl Into<String>, name: impl Into<String>) -> Result<Self> {
        let slug = slug.into();
        let name = name.into();
        validate_component("slug", &slug)?;
        validate_component("name", &name)?;
        Ok(Self { slug, name })
    }

    pub fn slug(&self) -> &str {
        &self.slug
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for CircuitIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.slug, self.name)
    }
}

fn validate_component(field: &str, value: &str) -> Result<()> {
    if value.is_empty() {
        return Err(ForgeError::InvalidIdentity(format!("{field} is empty")));
    }
    if value == "." || value == ".." {
        return Err(ForgeError::InvalidIdentity(format!(
            "{field} '{value}' is not a valid path component"
        )));
    }
    if let Some(c) = value
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.')))
    {
        return Err(ForgeError::InvalidIdentity(format!(
            "{field} '{value}' contains '{c}'"
        )));
    }
    Ok(())
}

/// One invocation of the pipeline. `force` applies to every stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildRequest {
    pub identity: CircuitIdentity,
    pub force: bool,
}

impl BuildRequest {
    pub fn new(identity: CircuitIdentity, force: bool) -> Self {
        Self { identity, force }
    }
}
