//! URL template validation, materialization, and subdomain rotation (C1).

use std::sync::atomic::{AtomicUsize, Ordering};

const REQUIRED: [&str; 3] = ["{x}", "{y}", "{z}"];
const SUBDOMAIN: &str = "{s}";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UrlWarning {
    SubdomainsDeclaredButTemplateHasNoSlot,
    TemplateDeclaresSlotButNoSubdomainsConfigured,
}

impl UrlWarning {
    pub fn message(&self) -> &'static str {
        match self {
            UrlWarning::SubdomainsDeclaredButTemplateHasNoSlot => {
                "subdomains were provided but the template has no {s} placeholder; they will be unused"
            }
            UrlWarning::TemplateDeclaresSlotButNoSubdomainsConfigured => {
                "template declares {s} but no subdomains were configured; defaults will be used"
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateValidation {
    pub valid: bool,
    pub placeholders: Vec<&'static str>,
    pub missing: Vec<&'static str>,
    pub warnings: Vec<UrlWarning>,
}

/// Validates a URL template. Valid iff `{x}`, `{y}`, `{z}` are all present.
pub fn validate(template: &str, has_subdomains: bool) -> TemplateValidation {
    let mut placeholders = Vec::new();
    let mut missing = Vec::new();

    for slot in REQUIRED {
        if template.contains(slot) {
            placeholders.push(slot);
        } else {
            missing.push(slot);
        }
    }

    let has_slot = template.contains(SUBDOMAIN);
    if has_slot {
        placeholders.push(SUBDOMAIN);
    }

    let mut warnings = Vec::new();
    if has_subdomains && !has_slot {
        warnings.push(UrlWarning::SubdomainsDeclaredButTemplateHasNoSlot);
    }
    if has_slot && !has_subdomains {
        warnings.push(UrlWarning::TemplateDeclaresSlotButNoSubdomainsConfigured);
    }

    TemplateValidation {
        valid: missing.is_empty(),
        placeholders,
        missing,
        warnings,
    }
}

/// Textual substitution of each declared placeholder, once each, for one tile.
pub fn materialize(template: &str, x: u64, y: u64, z: u32, subdomain: Option<&str>) -> String {
    let mut out = template
        .replacen("{x}", &x.to_string(), 1)
        .replacen("{y}", &y.to_string(), 1)
        .replacen("{z}", &z.to_string(), 1);
    if let Some(s) = subdomain {
        out = out.replacen(SUBDOMAIN, s, 1);
    }
    out
}

/// Round-robins over a subdomain sequence. The rotation index advances
/// monotonically across every materialization in one run — never reset
/// mid-run, even across zoom levels.
pub struct SubdomainRotator {
    subdomains: Vec<String>,
    next: AtomicUsize,
}

impl SubdomainRotator {
    pub fn new(subdomains: Vec<String>) -> Self {
        Self {
            subdomains,
            next: AtomicUsize::new(0),
        }
    }

    /// `None` iff the rotator was built with an empty sequence (the `{s}`
    /// slot must then be absent from the template).
    pub fn next(&self) -> Option<&str> {
        if self.subdomains.is_empty() {
            return None;
        }
        let idx = self.next.fetch_add(1, Ordering::Relaxed) % self.subdomains.len();
        Some(self.subdomains[idx].as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_template_has_no_missing_slots() {
        let v = validate("https://{s}.tile.example/{z}/{x}/{y}.png", true);
        assert!(v.valid);
        assert!(v.missing.is_empty());
        assert!(v.warnings.is_empty());
    }

    #[test]
    fn missing_z_is_invalid() {
        let v = validate("https://tile.example/{x}/{y}.png", false);
        assert!(!v.valid);
        assert_eq!(v.missing, vec!["{z}"]);
    }

    #[test]
    fn warns_when_subdomains_given_but_no_slot() {
        let v = validate("https://tile.example/{z}/{x}/{y}.png", true);
        assert!(v.valid);
        assert_eq!(v.warnings, vec![UrlWarning::SubdomainsDeclaredButTemplateHasNoSlot]);
    }

    #[test]
    fn warns_when_slot_given_but_no_subdomains() {
        let v = validate("https://{s}.tile.example/{z}/{x}/{y}.png", false);
        assert_eq!(v.warnings, vec![UrlWarning::TemplateDeclaresSlotButNoSubdomainsConfigured]);
    }

    #[test]
    fn materialize_substitutes_each_placeholder_once() {
        let url = materialize("https://{s}.tile.example/{z}/{x}/{y}.png", 3, 4, 2, Some("b"));
        assert_eq!(url, "https://b.tile.example/2/3/4.png");
    }

    #[test]
    fn rotator_round_robins_monotonically() {
        let rotator = SubdomainRotator::new(vec!["a".into(), "b".into(), "c".into()]);
        let seq: Vec<_> = (0..5).map(|_| rotator.next().unwrap().to_string()).collect();
        assert_eq!(seq, vec!["a", "b", "c", "a", "b"]);
    }

    #[test]
    fn empty_rotator_yields_none() {
        let rotator = SubdomainRotator::new(Vec::new());
        assert_eq!(rotator.next(), None);
    }
}
