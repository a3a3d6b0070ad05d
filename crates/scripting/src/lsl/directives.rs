//! Compiler directives and the feature flags they resolve to

use crate::api::{ApiSurface, Feature};
use crate::error::CompileError;
use lslvm_core::CompatMode;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Directives collected while lexing
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Directives {
    /// `#!Mode:` value and its line
    pub mode: Option<(CompatMode, usize)>,
    /// `#!Enable:` names and their lines
    pub extensions: Vec<(String, usize)>,
    /// `#!UsesSinglePrecision`
    pub single_precision: bool,
}

impl Directives {
    /// Apply one directive line (without the leading `#`). Returns
    /// `Ok(false)` when the line is not a `#!` directive.
    pub fn apply(&mut self, body: &str, line: usize) -> Result<bool, CompileError> {
        let Some(directive) = body.strip_prefix('!') else {
            return Ok(false);
        };
        let directive = directive.trim();

        if let Some(mode) = strip_prefix_ignore_case(directive, "Mode:") {
            let parsed = CompatMode::parse(mode)
                .ok_or_else(|| CompileError::syntax(line, format!("unknown mode '{}'", mode.trim())))?;
            self.mode = Some((parsed, line));
        } else if let Some(name) = strip_prefix_ignore_case(directive, "Enable:") {
            for part in name.split(',').map(str::trim).filter(|s| !s.is_empty()) {
                self.extensions.push((part.to_string(), line));
            }
        } else if directive.eq_ignore_ascii_case("UsesSinglePrecision") {
            self.single_precision = true;
        } else {
            return Err(CompileError::lex(line, format!("unknown directive '#!{}'", directive)));
        }
        Ok(true)
    }
}

fn strip_prefix_ignore_case<'a>(text: &'a str, prefix: &str) -> Option<&'a str> {
    let head = text.get(..prefix.len())?;
    if head.eq_ignore_ascii_case(prefix) {
        Some(&text[prefix.len()..])
    } else {
        None
    }
}

/// Immutable per-compilation feature set
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeatureFlags {
    pub mode: CompatMode,
    /// Enabled extension bundles, by registered name
    pub extensions: BTreeSet<String>,
    pub features: BTreeSet<Feature>,
    pub single_precision: bool,
}

impl FeatureFlags {
    /// Flags a mode implies with no `#!Enable:` lines
    pub fn for_mode(mode: CompatMode, api: &ApiSurface) -> Self {
        let mut flags = Self {
            mode,
            ..Self::default()
        };
        for ext in api.extensions() {
            if ext.default_in.map_or(false, |m| mode.admits(m)) {
                flags.enable(&ext.name, &ext.features);
            }
        }
        flags
    }

    /// Resolve directives against the API's extension bundles
    pub fn resolve(
        directives: &Directives,
        default_mode: CompatMode,
        default_extensions: &[String],
        api: &ApiSurface,
    ) -> Result<Self, CompileError> {
        let mode = directives.mode.map(|(m, _)| m).unwrap_or(default_mode);
        let mut flags = Self::for_mode(mode, api);
        flags.single_precision = directives.single_precision;

        let requested = default_extensions
            .iter()
            .map(|name| (name.as_str(), 0))
            .chain(directives.extensions.iter().map(|(name, line)| (name.as_str(), *line)));

        for (name, line) in requested {
            let ext = api
                .extension(name)
                .ok_or_else(|| CompileError::syntax(line, format!("unknown extension '{}'", name)))?;
            flags.enable(&ext.name, &ext.features);
        }

        Ok(flags)
    }

    fn enable(&mut self, name: &str, features: &[Feature]) {
        self.extensions.insert(name.to_string());
        self.features.extend(features.iter().copied());
    }

    pub fn has(&self, feature: Feature) -> bool {
        self.features.contains(&feature)
    }

    /// Whether an API member with these requirements is visible
    pub fn admits(&self, compat: CompatMode, extension: Option<&str>) -> bool {
        self.mode.admits(compat) && extension.map_or(true, |e| self.extensions.contains(e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_directive_parsing() {
        let mut d = Directives::default();
        assert!(d.apply("!Mode:ASSL", 1).unwrap());
        assert!(d.apply("!Enable:Structs, NamedTimers", 2).unwrap());
        assert!(d.apply("!UsesSinglePrecision", 3).unwrap());
        assert!(!d.apply("include \"x\"", 4).unwrap());
        assert_eq!(d.mode, Some((CompatMode::Assl, 1)));
        assert_eq!(d.extensions.len(), 2);
        assert!(d.single_precision);
        let err = d.apply("!Mode:basic", 5).unwrap_err();
        assert_eq!(err.kind, crate::error::CompileErrorKind::Syntax);
    }

    #[test]
    fn test_mode_defaults() {
        let api = ApiSurface::standard();
        let lsl = FeatureFlags::for_mode(CompatMode::Lsl, &api);
        assert!(!lsl.has(Feature::Switch));

        let assl = FeatureFlags::for_mode(CompatMode::Assl, &api);
        assert!(assl.has(Feature::Switch));
        assert!(assl.has(Feature::ForEach));
        assert!(!assl.has(Feature::Structs));

        let aurora = FeatureFlags::for_mode(CompatMode::Aurora, &api);
        assert!(aurora.has(Feature::Structs));
        assert!(aurora.has(Feature::ExternRpc));
    }

    #[test]
    fn test_enable_in_baseline_mode() {
        let api = ApiSurface::standard();
        let mut d = Directives::default();
        d.apply("!Enable:switch", 1).unwrap();
        let flags = FeatureFlags::resolve(&d, CompatMode::Lsl, &[], &api).unwrap();
        assert!(flags.has(Feature::Switch));
        assert!(!flags.has(Feature::ForEach));

        d.apply("!Enable:Teleportation", 2).unwrap();
        let err = FeatureFlags::resolve(&d, CompatMode::Lsl, &[], &api).unwrap_err();
        assert_eq!(err.line, 2);
        assert_eq!(err.kind, crate::error::CompileErrorKind::Syntax);
    }
}
