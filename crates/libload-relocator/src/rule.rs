//! Relocation rules and class name matching.

use glob::{MatchOptions, Pattern};

use crate::{RelocationError, Result};

/// `*` stays inside one package segment, `**` crosses segments.
const CLASS_MATCH: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

/// A package relocation written with dotted names, e.g.
/// `com.google.gson` -> `org.example.libs.gson`.
///
/// `includes` and `excludes` narrow the rule down to specific classes. They
/// are dotted class-name globs such as `com.google.gson.internal.*`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Relocation {
    pattern: String,
    relocated_pattern: String,
    includes: Vec<String>,
    excludes: Vec<String>,
}

impl Relocation {
    pub fn new(pattern: impl Into<String>, relocated_pattern: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
            relocated_pattern: relocated_pattern.into(),
            includes: Vec::new(),
            excludes: Vec::new(),
        }
    }

    pub fn with_includes<I, S>(mut self, includes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.includes.extend(includes.into_iter().map(Into::into));
        self
    }

    pub fn with_excludes<I, S>(mut self, excludes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.excludes.extend(excludes.into_iter().map(Into::into));
        self
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    pub fn relocated_pattern(&self) -> &str {
        &self.relocated_pattern
    }

    pub fn includes(&self) -> &[String] {
        &self.includes
    }

    pub fn excludes(&self) -> &[String] {
        &self.excludes
    }

    /// Check the rule is well formed without relocating anything.
    pub fn validate(&self) -> Result<()> {
        self.compile().map(|_| ())
    }

    pub(crate) fn compile(&self) -> Result<CompiledRule> {
        validate_package(&self.pattern, self)?;
        validate_package(&self.relocated_pattern, self)?;

        Ok(CompiledRule {
            from_dot: self.pattern.clone(),
            to_dot: self.relocated_pattern.clone(),
            from_slash: self.pattern.replace('.', "/"),
            to_slash: self.relocated_pattern.replace('.', "/"),
            includes: compile_patterns(&self.includes)?,
            excludes: compile_patterns(&self.excludes)?,
        })
    }
}

fn validate_package(package: &str, rule: &Relocation) -> Result<()> {
    let reason = if package.is_empty() {
        Some("package name is empty")
    } else if package.starts_with('.') || package.ends_with('.') || package.contains("..") {
        Some("package name has an empty segment")
    } else if package
        .chars()
        .any(|c| matches!(c, '/' | ';' | '<' | '>' | '[') || c.is_whitespace())
    {
        Some("package name must be dotted without whitespace or descriptor characters")
    } else {
        None
    };

    match reason {
        Some(reason) => Err(RelocationError::InvalidRule {
            pattern: rule.pattern.clone(),
            relocated: rule.relocated_pattern.clone(),
            reason: reason.to_string(),
        }),
        None => Ok(()),
    }
}

fn compile_patterns(patterns: &[String]) -> Result<Vec<Pattern>> {
    patterns
        .iter()
        .map(|pattern| {
            Pattern::new(&pattern.replace('.', "/")).map_err(|source| {
                RelocationError::InvalidPattern {
                    pattern: pattern.clone(),
                    source,
                }
            })
        })
        .collect()
}

/// A rule with both name forms precomputed and its globs parsed.
#[derive(Debug)]
pub(crate) struct CompiledRule {
    pub(crate) from_dot: String,
    pub(crate) to_dot: String,
    pub(crate) from_slash: String,
    pub(crate) to_slash: String,
    includes: Vec<Pattern>,
    excludes: Vec<Pattern>,
}

impl CompiledRule {
    /// Whether the include/exclude filters select a slash-separated class name.
    pub(crate) fn selects(&self, class_name: &str) -> bool {
        let included = self.includes.is_empty()
            || self
                .includes
                .iter()
                .any(|p| p.matches_with(class_name, CLASS_MATCH));

        included
            && !self
                .excludes
                .iter()
                .any(|p| p.matches_with(class_name, CLASS_MATCH))
    }

    /// Relocate a slash-separated name (`com/example/Foo`).
    pub(crate) fn relocate_path(&self, name: &str) -> Option<String> {
        let rest = strip_package(name, &self.from_slash, '/')?;
        if !self.selects(name) {
            return None;
        }
        Some(format!("{}{}", self.to_slash, rest))
    }

    /// Relocate a dotted name (`com.example.Foo`).
    pub(crate) fn relocate_dotted(&self, name: &str) -> Option<String> {
        let rest = strip_package(name, &self.from_dot, '.')?;
        if !self.selects(&name.replace('.', "/")) {
            return None;
        }
        Some(format!("{}{}", self.to_dot, rest))
    }
}

/// Remainder of `name` after `package`, when `name` is the package itself or
/// lies somewhere below it.
fn strip_package<'a>(name: &'a str, package: &str, separator: char) -> Option<&'a str> {
    let rest = name.strip_prefix(package)?;
    (rest.is_empty() || rest.starts_with(separator)).then_some(rest)
}

/// Apply every rule in declared order, each one to the output of the previous.
pub(crate) fn relocate_path_all(name: &str, rules: &[CompiledRule]) -> Option<String> {
    apply_all(name, rules, CompiledRule::relocate_path)
}

pub(crate) fn relocate_dotted_all(name: &str, rules: &[CompiledRule]) -> Option<String> {
    apply_all(name, rules, CompiledRule::relocate_dotted)
}

fn apply_all(
    name: &str,
    rules: &[CompiledRule],
    apply: fn(&CompiledRule, &str) -> Option<String>,
) -> Option<String> {
    let mut current: Option<String> = None;
    for rule in rules {
        let input = current.as_deref().unwrap_or(name);
        if let Some(relocated) = apply(rule, input) {
            current = Some(relocated);
        }
    }
    current
}

#[cfg(test)]
mod tests {
    use super::*;

    fn compile(rule: Relocation) -> CompiledRule {
        rule.compile().unwrap()
    }

    #[test]
    fn test_relocate_path_respects_package_boundary() {
        let rule = compile(Relocation::new("com.example", "shaded.example"));

        assert_eq!(
            rule.relocate_path("com/example/Foo"),
            Some("shaded/example/Foo".to_string())
        );
        assert_eq!(rule.relocate_path("com/example"), Some("shaded/example".to_string()));
        assert_eq!(rule.relocate_path("com/examples/Foo"), None);
        assert_eq!(rule.relocate_path("org/com/example/Foo"), None);
    }

    #[test]
    fn test_relocate_dotted() {
        let rule = compile(Relocation::new("com.example", "shaded.example"));

        assert_eq!(
            rule.relocate_dotted("com.example.spi.Codec"),
            Some("shaded.example.spi.Codec".to_string())
        );
        assert_eq!(rule.relocate_dotted("com.examplex.Codec"), None);
    }

    #[test]
    fn test_includes_and_excludes() {
        let rule = compile(
            Relocation::new("com.example", "shaded.example")
                .with_includes(["com.example.api.*", "com.example.core.**"])
                .with_excludes(["com.example.core.internal.*"]),
        );

        assert!(rule.relocate_path("com/example/api/Client").is_some());
        assert!(rule.relocate_path("com/example/api/deep/Client").is_none());
        assert!(rule.relocate_path("com/example/core/a/b/Engine").is_some());
        assert!(rule.relocate_path("com/example/core/internal/Secret").is_none());
        assert!(rule.relocate_path("com/example/Other").is_none());
    }

    #[test]
    fn test_rules_apply_in_sequence() {
        let rules = vec![
            compile(Relocation::new("a.b", "c.d")),
            compile(Relocation::new("c.d", "e.f")),
        ];

        assert_eq!(relocate_path_all("a/b/Foo", &rules), Some("e/f/Foo".to_string()));
        assert_eq!(relocate_path_all("c/d/Bar", &rules), Some("e/f/Bar".to_string()));
        assert_eq!(relocate_path_all("x/y/Baz", &rules), None);
    }

    #[test]
    fn test_earlier_rule_output_is_not_reconsidered_by_itself() {
        let rules = vec![
            compile(Relocation::new("c.d", "e.f")),
            compile(Relocation::new("a.b", "c.d")),
        ];

        assert_eq!(relocate_path_all("a/b/Foo", &rules), Some("c/d/Foo".to_string()));
    }

    #[test]
    fn test_invalid_rules() {
        assert!(Relocation::new("", "x").validate().is_err());
        assert!(Relocation::new("com.example.", "x.y").validate().is_err());
        assert!(Relocation::new("com/example", "x.y").validate().is_err());
        assert!(Relocation::new("com..example", "x.y").validate().is_err());
        assert!(Relocation::new("com.example", "x.y")
            .with_includes(["com.example.[*"])
            .validate()
            .is_err());
        assert!(Relocation::new("com.example", "x.y").validate().is_ok());
    }
}
