//! Rule file schema.
//!
//! A rule file maps rule ids to definitions and may carry a mount table:
//! - `[rules.<id>]`: content types, severity, message template, pattern and
//!   optional remediation.
//! - `[[mounts]]`: known mount points and the storage they resolve to.
//! - `[mount_policy]`: source prefixes that a mount may be rewritten to.
//!
//! Values are kept as raw strings here; `rules::RuleSet` validates them and
//! reports descriptive load errors.

use serde::Deserialize;
use std::collections::BTreeMap;

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
/// Root of a rule file.
pub struct RuleFile {
    #[serde(default)]
    pub rules: BTreeMap<String, RuleDef>,
    #[serde(default)]
    pub mounts: Vec<MountDef>,
    #[serde(default)]
    pub mount_policy: Option<MountPolicy>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RuleDef {
    pub content_types: Vec<String>,
    pub severity: String,
    pub message: String,
    pub pattern: PatternDef,
    #[serde(default)]
    pub remediation: Option<RemediationDef>,
    /// Report every match in a unit instead of the first one only.
    #[serde(default)]
    pub every_match: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
/// Matcher declaration.
pub enum PatternDef {
    Substring {
        text: String,
    },
    Regex {
        regex: String,
    },
    Structural {
        matcher: String,
        #[serde(default)]
        mount_point: Option<String>,
    },
    /// Matches the file path itself (e.g. `*.scala`).
    Path {
        glob: String,
    },
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RemediationDef {
    /// Replacement template; `$name`, `${name}` and `$0` expand captures.
    pub replace: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
/// A known mount point and the storage URI behind it.
pub struct MountDef {
    pub mount_point: String,
    pub source: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MountPolicy {
    #[serde(default = "default_valid_prefixes")]
    pub valid_prefixes: Vec<String>,
}

impl Default for MountPolicy {
    fn default() -> Self {
        Self {
            valid_prefixes: default_valid_prefixes(),
        }
    }
}

pub fn default_valid_prefixes() -> Vec<String> {
    vec!["abfss://".into(), "s3://".into(), "gs://".into()]
}
