//! Rule set loading and validation.
//!
//! A `RuleSet` is built once per session from the embedded builtin rules
//! plus any user rule files, validated eagerly, and then passed by
//! reference to every evaluation. Rules are kept sorted by id, which fixes
//! evaluation order.

use crate::error::LoadError;
use crate::models::rules::{MountDef, MountPolicy, PatternDef, RuleDef, RuleFile};
use crate::models::{ContentType, Severity};
use crate::structural::StructuralKind;
use regex::Regex;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::PathBuf;

pub const BUILTIN_ORIGIN: &str = "<builtin>";
const BUILTIN_RULES: &str = include_str!("../rules/builtin.toml");

/// Mount sources that are platform-managed and never migrated.
const RESERVED_SOURCES: &[&str] = &[
    "DatabricksRoot",
    "DbfsReserved",
    "UnityCatalogVolumes",
    "databricks-datasets",
    "databricks-results",
    "databricks/mlflow-tracking",
    "databricks/mlflow-registry",
];

#[derive(Debug, Clone)]
pub enum Matcher {
    Substring(String),
    Regex(Regex),
    Structural(StructuralKind),
    /// Matches the repository-relative file path.
    Path(glob::Pattern),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Remediation {
    /// Replacement template expanded against the match captures.
    Template(String),
    /// Replace a mount prefix with the storage URI behind it.
    MountTarget { source: String },
}

#[derive(Debug, Clone)]
pub struct Rule {
    pub id: String,
    pub content_types: BTreeSet<ContentType>,
    pub severity: Severity,
    pub message: String,
    pub matcher: Matcher,
    pub remediation: Option<Remediation>,
    pub every_match: bool,
    /// Where the rule was defined (file path or `<builtin>`).
    pub origin: String,
}

impl Rule {
    pub fn applies_to(&self, content_type: ContentType) -> bool {
        self.content_types.contains(&content_type)
    }

    pub fn kind_label(&self) -> &'static str {
        match self.matcher {
            Matcher::Substring(_) => "substring",
            Matcher::Regex(_) => "regex",
            Matcher::Structural(StructuralKind::TwoLevelTable) => "two_level_table",
            Matcher::Structural(StructuralKind::MountPath { .. }) => "mount_path",
            Matcher::Path(_) => "path",
        }
    }

    /// Render the issue message. Unknown placeholders are kept verbatim.
    pub fn render_message(&self, matched: &str, captures: &BTreeMap<String, String>) -> String {
        let mut out = String::with_capacity(self.message.len());
        let mut rest = self.message.as_str();
        while let Some(open) = rest.find('{') {
            out.push_str(&rest[..open]);
            let after = &rest[open + 1..];
            let Some(close) = after.find('}') else {
                out.push_str(&rest[open..]);
                return out;
            };
            let key = &after[..close];
            match key {
                "match" => out.push_str(matched),
                "rule" => out.push_str(&self.id),
                _ => match captures.get(key) {
                    Some(v) => out.push_str(v),
                    None => {
                        out.push('{');
                        out.push_str(key);
                        out.push('}');
                    }
                },
            }
            rest = &after[close + 1..];
        }
        out.push_str(rest);
        out
    }

    /// Suggested replacement text for a match, if this rule can fix it.
    pub fn render_replacement(
        &self,
        matched: &str,
        captures: &BTreeMap<String, String>,
    ) -> Option<String> {
        match self.remediation.as_ref()? {
            Remediation::Template(template) => Some(expand_replacement(template, matched, captures)),
            Remediation::MountTarget { source } => {
                // FUSE paths are local file APIs; swapping in a URI breaks them.
                if captures.get("scheme").map(String::as_str) == Some("/dbfs") {
                    return None;
                }
                Some(source.trim_end_matches('/').to_string())
            }
        }
    }
}

/// Expand `$0`, `$name`, `${name}` and `$$` in a replacement template.
/// Unknown capture names expand to nothing.
pub fn expand_replacement(
    template: &str,
    matched: &str,
    captures: &BTreeMap<String, String>,
) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(pos) = rest.find('$') {
        out.push_str(&rest[..pos]);
        let after = &rest[pos + 1..];
        if let Some(tail) = after.strip_prefix('$') {
            out.push('$');
            rest = tail;
            continue;
        }
        let (name, tail) = if let Some(braced) = after.strip_prefix('{') {
            match braced.find('}') {
                Some(close) => (&braced[..close], &braced[close + 1..]),
                None => {
                    out.push('$');
                    rest = after;
                    continue;
                }
            }
        } else {
            let len = after
                .bytes()
                .take_while(|b| b.is_ascii_alphanumeric() || *b == b'_')
                .count();
            (&after[..len], &after[len..])
        };
        if name.is_empty() {
            out.push('$');
        } else if name == "0" {
            out.push_str(matched);
        } else if let Some(v) = captures.get(name) {
            out.push_str(v);
        }
        rest = tail;
    }
    out.push_str(rest);
    out
}

#[derive(Debug, Clone, Default)]
/// Immutable, id-ordered rule collection for one session.
pub struct RuleSet {
    rules: Vec<Rule>,
}

impl RuleSet {
    /// The embedded default rules only.
    pub fn builtin() -> Result<Self, LoadError> {
        Self::from_sources(&[(BUILTIN_ORIGIN.to_string(), BUILTIN_RULES.to_string())])
    }

    /// Load rule files from disk, optionally preceded by the builtin rules.
    pub fn load(paths: &[PathBuf], include_builtin: bool) -> Result<Self, LoadError> {
        let mut sources = Vec::new();
        if include_builtin {
            sources.push((BUILTIN_ORIGIN.to_string(), BUILTIN_RULES.to_string()));
        }
        for path in paths {
            let text = fs::read_to_string(path).map_err(|source| LoadError::Read {
                path: path.clone(),
                source,
            })?;
            sources.push((path.display().to_string(), text));
        }
        Self::from_sources(&sources)
    }

    /// Build from `(origin, toml text)` pairs. Any invalid definition fails
    /// the whole set.
    pub fn from_sources(sources: &[(String, String)]) -> Result<Self, LoadError> {
        let mut by_id: BTreeMap<String, Rule> = BTreeMap::new();
        for (origin, text) in sources {
            let file: RuleFile = toml::from_str(text).map_err(|e| LoadError::Parse {
                origin: origin.clone(),
                message: e.to_string(),
            })?;
            let mut compiled = Vec::new();
            for (id, def) in &file.rules {
                compiled.push(compile_rule(id, def, origin)?);
            }
            let policy = file.mount_policy.clone().unwrap_or_default();
            for mount in &file.mounts {
                if let Some(rule) = mount_rule(mount, &policy, origin)? {
                    compiled.push(rule);
                }
            }
            for rule in compiled {
                if let Some(existing) = by_id.get(&rule.id) {
                    return Err(LoadError::DuplicateRuleId {
                        id: rule.id.clone(),
                        first: existing.origin.clone(),
                        second: origin.clone(),
                    });
                }
                by_id.insert(rule.id.clone(), rule);
            }
            tracing::debug!(origin = %origin, rules = file.rules.len(), mounts = file.mounts.len(), "loaded rule file");
        }
        let mut rules: Vec<Rule> = by_id.into_values().collect();
        link_mount_shadows(&mut rules);
        Ok(Self { rules })
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    pub fn get(&self, id: &str) -> Option<&Rule> {
        self.rules
            .binary_search_by(|r| r.id.as_str().cmp(id))
            .ok()
            .map(|i| &self.rules[i])
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

fn compile_rule(id: &str, def: &RuleDef, origin: &str) -> Result<Rule, LoadError> {
    if id.trim().is_empty() {
        return Err(LoadError::invalid(id, "rule id must not be empty"));
    }
    if def.content_types.is_empty() {
        return Err(LoadError::NoContentTypes { rule: id.to_string() });
    }
    let mut content_types = BTreeSet::new();
    for value in &def.content_types {
        let ct = ContentType::parse(value).ok_or_else(|| LoadError::UnknownContentType {
            rule: id.to_string(),
            value: value.clone(),
        })?;
        content_types.insert(ct);
    }
    let severity = Severity::parse(&def.severity).ok_or_else(|| LoadError::UnknownSeverity {
        rule: id.to_string(),
        value: def.severity.clone(),
    })?;
    let matcher = match &def.pattern {
        PatternDef::Substring { text } => {
            if text.is_empty() {
                return Err(LoadError::invalid(id, "substring pattern must not be empty"));
            }
            Matcher::Substring(text.clone())
        }
        PatternDef::Regex { regex } => {
            let re = Regex::new(regex).map_err(|source| LoadError::InvalidRegex {
                rule: id.to_string(),
                source,
            })?;
            Matcher::Regex(re)
        }
        PatternDef::Structural {
            matcher,
            mount_point,
        } => {
            let kind = StructuralKind::from_name(matcher, mount_point.clone()).ok_or_else(|| {
                LoadError::UnknownMatcher {
                    rule: id.to_string(),
                    name: matcher.clone(),
                }
            })?;
            Matcher::Structural(kind)
        }
        PatternDef::Path { glob } => {
            let pattern = glob::Pattern::new(glob).map_err(|source| LoadError::InvalidGlob {
                rule: id.to_string(),
                source,
            })?;
            Matcher::Path(pattern)
        }
    };
    if matches!(matcher, Matcher::Path(_)) && def.remediation.is_some() {
        return Err(LoadError::invalid(id, "path rules cannot carry a remediation"));
    }
    Ok(Rule {
        id: id.to_string(),
        content_types,
        severity,
        message: def.message.clone(),
        matcher,
        remediation: def
            .remediation
            .as_ref()
            .map(|r| Remediation::Template(r.replace.clone())),
        every_match: def.every_match,
        origin: origin.to_string(),
    })
}

fn is_reserved_source(source: &str) -> bool {
    let source = source.trim().trim_end_matches('/');
    RESERVED_SOURCES.contains(&source)
}

/// Generate the `MOUNT:<point>` rule for a mount table entry.
fn mount_rule(
    mount: &MountDef,
    policy: &MountPolicy,
    origin: &str,
) -> Result<Option<Rule>, LoadError> {
    let point = mount.mount_point.trim().trim_end_matches('/');
    let id = format!("MOUNT:{}", point);
    if !point.starts_with("/mnt/") || point.len() <= "/mnt/".len() {
        return Err(LoadError::invalid(
            id,
            format!("mount point '{}' must be under /mnt/", mount.mount_point),
        ));
    }
    if is_reserved_source(&mount.source) {
        tracing::debug!(mount = point, source = %mount.source, "skipping reserved mount");
        return Ok(None);
    }
    let convertible = policy
        .valid_prefixes
        .iter()
        .any(|p| mount.source.starts_with(p.as_str()));
    let (message, remediation) = if convertible {
        (
            format!("mount {{mount}} is not supported; use {} directly", mount.source),
            Some(Remediation::MountTarget {
                source: mount.source.clone(),
            }),
        )
    } else {
        (
            format!(
                "mount {{mount}} points at {} which has no supported storage prefix",
                mount.source
            ),
            None,
        )
    };
    Ok(Some(Rule {
        id,
        content_types: [ContentType::Script, ContentType::Notebook, ContentType::Sql]
            .into_iter()
            .collect(),
        severity: Severity::Blocker,
        message,
        matcher: Matcher::Structural(StructuralKind::MountPath {
            mount_point: Some(point.to_string()),
            shadowed_by: Vec::new(),
        }),
        remediation,
        every_match: true,
        origin: origin.to_string(),
    }))
}

/// A path under both `/mnt/a` and `/mnt/a/b` belongs to the longer mount.
fn link_mount_shadows(rules: &mut [Rule]) {
    let points: Vec<String> = rules
        .iter()
        .filter_map(|r| match &r.matcher {
            Matcher::Structural(StructuralKind::MountPath {
                mount_point: Some(mp),
                ..
            }) => Some(mp.trim_end_matches('/').to_string()),
            _ => None,
        })
        .collect();
    for rule in rules.iter_mut() {
        if let Matcher::Structural(StructuralKind::MountPath {
            mount_point: Some(mp),
            shadowed_by,
        }) = &mut rule.matcher
        {
            let own = mp.trim_end_matches('/').to_string();
            *shadowed_by = points
                .iter()
                .filter(|p| p.len() > own.len() && p.starts_with(&format!("{}/", own)))
                .cloned()
                .collect();
        }
    }
}
