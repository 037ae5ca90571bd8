//! PMS (spot color) text classifier.
//!
//! Deterministic pattern matching over free text. Each unit of text (one
//! job line, or the order comment) is evaluated on its own:
//!
//! - if any **exclusion** pattern matches the unit, the unit is `Absent`
//!   regardless of inclusion matches;
//! - otherwise, if any **inclusion** pattern matches, the unit is `Present`;
//! - otherwise the unit is `Absent`.
//!
//! A job is `Present` when any of its units is `Present`. The classifier
//! never returns [`Classification::Unknown`].
//!
//! # Default patterns
//!
//! | Kind | Pattern | Example |
//! |------|---------|---------|
//! | include | `pms <digits>` | `PMS 123` |
//! | include | `pantone <digits>` | `Pantone 072` |
//! | include | `spot colo(u)r` | `2 spot colours` |
//! | include | `pms <name> <digits>` | `PMS Blue 072` |
//! | include | `pantone <name> <digits>` | `Pantone Red 032` |
//! | include | bare `pms` | `match pms` |
//! | exclude | `no pms`, `without pms` | `NO PMS required` |
//! | exclude | `no pantone`, `without pantone`, `no spot` | |
//! | exclude | `cmyk`, `process colo(u)r` | `CMYK only` |

use regex::Regex;
use serde::Serialize;

use crate::models::Classification;

pub const DEFAULT_INCLUSION_PATTERNS: &[&str] = &[
    r"\bpms\s*\d+\b",
    r"\bpantone\s*\d+\b",
    r"\bspot\s*colou?rs?\b",
    r"\bpms\s*[a-z]+\s*\d+\b",
    r"\bpantone\s*[a-z]+\s*\d+\b",
    r"\bpms\b",
];

pub const DEFAULT_EXCLUSION_PATTERNS: &[&str] = &[
    r"\bno\s+pms\b",
    r"\bwithout\s+pms\b",
    r"\bno\s+pantone\b",
    r"\bwithout\s+pantone\b",
    r"\bno\s+spot\b",
    r"\bcmyk\b",
    r"\bprocess\s+colou?rs?\b",
];

const EXCERPT_CHARS: usize = 100;

lazy_static::lazy_static! {
    static ref DEFAULT_CLASSIFIER: Classifier =
        Classifier::new(DEFAULT_INCLUSION_PATTERNS, DEFAULT_EXCLUSION_PATTERNS)
            .expect("default PMS patterns compile");
}

/// Collapse whitespace runs and lower-case the text.
pub fn normalize(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// The text of one job, split into independently classified units.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Deserialize, Serialize)]
pub struct JobText {
    /// One entry per job line (all cells joined).
    #[serde(default)]
    pub lines: Vec<String>,
    /// Free-text order comment.
    #[serde(default)]
    pub comment: Option<String>,
}

impl JobText {
    pub fn from_lines<I, S>(lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            lines: lines.into_iter().map(Into::into).collect(),
            comment: None,
        }
    }

    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }

    fn units(&self) -> impl Iterator<Item = (UnitKind, &str)> {
        self.lines
            .iter()
            .enumerate()
            .map(|(i, l)| (UnitKind::Line(i), l.as_str()))
            .chain(self.comment.iter().map(|c| (UnitKind::Comment, c.as_str())))
    }
}

/// Where in the job a unit came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "index", rename_all = "snake_case")]
pub enum UnitKind {
    Line(usize),
    Comment,
}

/// Result of classifying one unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnitVerdict {
    pub classification: Classification,
    /// Inclusion patterns that matched, in declaration order.
    pub inclusion_hits: Vec<String>,
    /// Exclusion patterns that matched, in declaration order.
    pub exclusion_hits: Vec<String>,
}

/// Result of classifying a whole job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Detection {
    pub classification: Classification,
    /// First unit that classified `Present`.
    pub matched_unit: Option<UnitKind>,
    /// Leading characters of the matched unit.
    pub excerpt: Option<String>,
    pub units_examined: usize,
}

impl Detection {
    pub fn has_pms(&self) -> bool {
        self.classification == Classification::Present
    }

    /// Human-readable note describing the detection.
    pub fn comment(&self) -> String {
        match (self.matched_unit, &self.excerpt) {
            (Some(UnitKind::Line(i)), Some(excerpt)) => {
                format!("PMS color found in job line {}: \"{}...\"", i, excerpt)
            }
            (Some(UnitKind::Line(i)), None) => format!("PMS color found in job line {}", i),
            (Some(UnitKind::Comment), _) => "PMS color found in order comment".to_string(),
            (None, _) => format!("No PMS color found in {} unit(s)", self.units_examined),
        }
    }
}

/// Compiled inclusion and exclusion pattern sets.
#[derive(Debug, Clone)]
pub struct Classifier {
    inclusion: Vec<Regex>,
    exclusion: Vec<Regex>,
}

impl Default for Classifier {
    fn default() -> Self {
        DEFAULT_CLASSIFIER.clone()
    }
}

impl Classifier {
    /// Compile the given patterns. Matching is always case-insensitive.
    pub fn new<S: AsRef<str>>(inclusion: &[S], exclusion: &[S]) -> Result<Self, regex::Error> {
        Ok(Self {
            inclusion: compile_all(inclusion)?,
            exclusion: compile_all(exclusion)?,
        })
    }

    /// Default patterns followed by caller-supplied extras.
    pub fn with_extra<S: AsRef<str>>(
        extra_inclusion: &[S],
        extra_exclusion: &[S],
    ) -> Result<Self, regex::Error> {
        let mut classifier = Self::default();
        classifier.inclusion.extend(compile_all(extra_inclusion)?);
        classifier.exclusion.extend(compile_all(extra_exclusion)?);
        Ok(classifier)
    }

    pub fn inclusion_patterns(&self) -> impl Iterator<Item = &str> {
        self.inclusion.iter().map(Regex::as_str)
    }

    pub fn exclusion_patterns(&self) -> impl Iterator<Item = &str> {
        self.exclusion.iter().map(Regex::as_str)
    }

    /// Classify a single unit of text.
    pub fn classify(&self, text: &str) -> Classification {
        let normalized = normalize(text);
        if normalized.is_empty() || self.exclusion.iter().any(|re| re.is_match(&normalized)) {
            return Classification::Absent;
        }
        if self.inclusion.iter().any(|re| re.is_match(&normalized)) {
            Classification::Present
        } else {
            Classification::Absent
        }
    }

    /// Classify a unit and report every pattern that matched.
    pub fn explain(&self, text: &str) -> UnitVerdict {
        let normalized = normalize(text);
        let hits = |set: &[Regex]| -> Vec<String> {
            set.iter()
                .filter(|re| re.is_match(&normalized))
                .map(|re| re.as_str().to_string())
                .collect()
        };
        let inclusion_hits = hits(&self.inclusion);
        let exclusion_hits = hits(&self.exclusion);
        let classification = if !inclusion_hits.is_empty() && exclusion_hits.is_empty() {
            Classification::Present
        } else {
            Classification::Absent
        };
        UnitVerdict {
            classification,
            inclusion_hits,
            exclusion_hits,
        }
    }

    /// Classify several units of one entity: `Present` if any unit is.
    pub fn classify_units<I, S>(&self, units: I) -> Classification
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let any = units
            .into_iter()
            .any(|u| self.classify(u.as_ref()) == Classification::Present);
        Classification::from_flag(any)
    }

    /// Classify every line and the comment of a job.
    pub fn detect(&self, job: &JobText) -> Detection {
        let mut examined = 0;
        let mut matched = None;
        for (kind, text) in job.units() {
            examined += 1;
            if matched.is_none() && self.classify(text) == Classification::Present {
                matched = Some((kind, excerpt(text)));
            }
        }
        match matched {
            Some((kind, excerpt)) => Detection {
                classification: Classification::Present,
                matched_unit: Some(kind),
                excerpt: Some(excerpt),
                units_examined: examined,
            },
            None => Detection {
                classification: Classification::Absent,
                matched_unit: None,
                excerpt: None,
                units_examined: examined,
            },
        }
    }
}

fn compile_all<S: AsRef<str>>(patterns: &[S]) -> Result<Vec<Regex>, regex::Error> {
    patterns
        .iter()
        .map(|p| Regex::new(&format!("(?i){}", p.as_ref())))
        .collect()
}

fn excerpt(text: &str) -> String {
    normalize(text).chars().take(EXCERPT_CHARS).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn c() -> Classifier {
        Classifier::default()
    }

    #[test]
    fn test_inclusion_without_exclusion_is_present() {
        assert_eq!(c().classify("PMS 123 spot color"), Classification::Present);
        assert_eq!(c().classify("Pantone 072"), Classification::Present);
        assert_eq!(c().classify("Two spot colours on sleeve"), Classification::Present);
        assert_eq!(c().classify("pms blue 072"), Classification::Present);
        assert_eq!(c().classify("match PMS"), Classification::Present);
    }

    #[test]
    fn test_exclusion_wins_within_unit() {
        assert_eq!(c().classify("NO PMS required, CMYK only"), Classification::Absent);
        assert_eq!(c().classify("PMS 185 but print CMYK"), Classification::Absent);
        assert_eq!(c().classify("without pms"), Classification::Absent);
        assert_eq!(c().classify("process colour, pantone 300"), Classification::Absent);
    }

    #[test]
    fn test_empty_and_whitespace_are_absent() {
        assert_eq!(c().classify(""), Classification::Absent);
        assert_eq!(c().classify("   \t\n "), Classification::Absent);
    }

    #[test]
    fn test_no_pattern_is_absent() {
        assert_eq!(c().classify("Embroidered polo, left chest"), Classification::Absent);
        assert_eq!(c().classify("see pmsx sheet"), Classification::Absent);
    }

    #[test]
    fn test_normalization_handles_case_and_spacing() {
        assert_eq!(normalize("  NO\u{a0}\u{a0}PMS\n here "), "no pms here");
        assert_eq!(c().classify("No\u{a0}PMS"), Classification::Absent);
        assert_eq!(c().classify("PANTONE\n\n 021"), Classification::Present);
    }

    #[test]
    fn test_units_are_ored() {
        assert_eq!(
            c().classify_units(["no pms here", "pantone 072"]),
            Classification::Present
        );
        assert_eq!(
            c().classify_units(["no pms here", "cmyk only", ""]),
            Classification::Absent
        );
        assert_eq!(c().classify_units(Vec::<String>::new()), Classification::Absent);
    }

    #[test]
    fn test_exclusion_is_local_to_its_unit() {
        let job = JobText::from_lines(["NO PMS on front"]).with_comment("back print pms 286");
        let detection = c().detect(&job);
        assert!(detection.has_pms());
        assert_eq!(detection.matched_unit, Some(UnitKind::Comment));
        assert_eq!(detection.units_examined, 2);
        assert_eq!(detection.comment(), "PMS color found in order comment");
    }

    #[test]
    fn test_detect_reports_first_matching_line() {
        let job = JobText::from_lines(["tee, white", "Pantone 072 blue ink", "pms 123"]);
        let detection = c().detect(&job);
        assert_eq!(detection.matched_unit, Some(UnitKind::Line(1)));
        assert_eq!(detection.excerpt.as_deref(), Some("pantone 072 blue ink"));
        assert!(detection.comment().starts_with("PMS color found in job line 1"));
    }

    #[test]
    fn test_detect_empty_job_is_absent() {
        let detection = c().detect(&JobText::default());
        assert_eq!(detection.classification, Classification::Absent);
        assert_eq!(detection.units_examined, 0);
    }

    #[test]
    fn test_explain_lists_hits_in_order() {
        let verdict = c().explain("PMS 123 CMYK");
        assert_eq!(verdict.classification, Classification::Absent);
        assert_eq!(
            verdict.inclusion_hits,
            vec![r"(?i)\bpms\s*\d+\b".to_string(), r"(?i)\bpms\b".to_string()]
        );
        assert_eq!(verdict.exclusion_hits, vec![r"(?i)\bcmyk\b".to_string()]);
    }

    #[test]
    fn test_extra_patterns_extend_defaults() {
        let classifier = Classifier::with_extra(&[r"\bfoil\s+stamp\b"], &[r"\bmono\b"]).unwrap();
        assert_eq!(classifier.classify("Foil stamp logo"), Classification::Present);
        assert_eq!(classifier.classify("pms 100 mono"), Classification::Absent);
        assert_eq!(classifier.classify("pms 100"), Classification::Present);
    }

    #[test]
    fn test_invalid_extra_pattern_is_error() {
        assert!(Classifier::with_extra(&["(unclosed"], &[] as &[&str]).is_err());
    }
}
