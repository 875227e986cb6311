//! Deterministic error-signature matching.
//!
//! The pattern matcher is synchronous and side-effect-free. It is the
//! guaranteed minimum-viable diagnosis: it must produce a candidate
//! even when every collector failed and the only input is the raw
//! error text, and it is the fallback target when the generative step
//! is unavailable.

use rca_common::{
    CandidateDiagnosis, ContextBundle, DiagnosisSource, ErrorCategory, Recommendation, Severity,
};
use regex::RegexBuilder;
use tracing::debug;

/// Confidence assigned when a known signature matched.
const MATCHED_CONFIDENCE: f64 = 0.5;

/// Baseline confidence when nothing matched. Non-zero: the raw error
/// text itself is still informative evidence.
const UNKNOWN_CONFIDENCE: f64 = 0.3;

/// One known error signature.
pub struct ErrorPattern {
    pub name: &'static str,
    pub category: ErrorCategory,
    pub severity: Severity,
    pub description: &'static str,
    pub recommendation: &'static str,
    regexes: Vec<regex::Regex>,
}

impl ErrorPattern {
    fn new(
        name: &'static str,
        category: ErrorCategory,
        severity: Severity,
        signatures: &[&str],
        description: &'static str,
        recommendation: &'static str,
    ) -> Self {
        let regexes = signatures
            .iter()
            .map(|s| {
                RegexBuilder::new(s)
                    .case_insensitive(true)
                    .build()
                    .unwrap_or_else(|e| panic!("invalid builtin pattern {name:?}: {e}"))
            })
            .collect();
        Self {
            name,
            category,
            severity,
            description,
            recommendation,
            regexes,
        }
    }

    fn find_matches(&self, text: &str) -> Vec<String> {
        let mut found = Vec::new();
        for regex in &self.regexes {
            for m in regex.find_iter(text) {
                found.push(m.as_str().to_string());
            }
        }
        found
    }

    fn hits(&self, line: &str) -> bool {
        self.regexes.iter().any(|r| r.is_match(line))
    }
}

/// Built-in signature table. Declaration order is the tie-breaker at
/// equal severity, so more specific rules come first.
pub fn default_patterns() -> Vec<ErrorPattern> {
    vec![
        ErrorPattern::new(
            "disk_full",
            ErrorCategory::ResourceExhaustion,
            Severity::Critical,
            &[r"No space left on device", r"Disk quota exceeded", r"ENOSPC"],
            "Disk space exhausted",
            "Clean up temporary files or increase disk allocation",
        ),
        ErrorPattern::new(
            "java_oom",
            ErrorCategory::ResourceExhaustion,
            Severity::High,
            &[
                r"java\.lang\.OutOfMemoryError",
                r"Java heap space",
                r"GC overhead limit exceeded",
                r"Metaspace",
            ],
            "Java process ran out of memory",
            "Increase executor memory or optimize data partitioning",
        ),
        ErrorPattern::new(
            "python_oom",
            ErrorCategory::ResourceExhaustion,
            Severity::High,
            &[
                r"MemoryError",
                r"Cannot allocate memory",
                r"killed.*OOM",
                r"OOMKilled",
            ],
            "Process ran out of memory",
            "Reduce batch size or increase container memory limits",
        ),
        ErrorPattern::new(
            "timeout",
            ErrorCategory::ResourceExhaustion,
            Severity::Medium,
            &[
                r"TimeoutError",
                r"timed out",
                r"deadline exceeded",
                r"execution timeout",
            ],
            "Operation timed out",
            "Increase the timeout or optimize the operation",
        ),
        ErrorPattern::new(
            "column_not_found",
            ErrorCategory::SchemaMismatch,
            Severity::High,
            &[
                r"column.*not found",
                r"KeyError.*column",
                r"no such column",
                r"Unknown column",
                r"AnalysisException.*cannot resolve",
            ],
            "Expected column not found in data",
            "Verify source schema and update the transformation",
        ),
        ErrorPattern::new(
            "type_mismatch",
            ErrorCategory::SchemaMismatch,
            Severity::Medium,
            &[
                r"cannot cast",
                r"type mismatch",
                r"invalid type",
                r"TypeError.*expected",
                r"cannot be converted to",
            ],
            "Data type mismatch",
            "Add type casting or fix source data types",
        ),
        ErrorPattern::new(
            "parse_error",
            ErrorCategory::SchemaMismatch,
            Severity::Medium,
            &[
                r"parse error",
                r"JSON.*invalid",
                r"malformed",
                r"unexpected token",
                r"XMLSyntaxError",
            ],
            "Failed to parse input data",
            "Check source data format and parser configuration",
        ),
        ErrorPattern::new(
            "connection_refused",
            ErrorCategory::SourceUnavailable,
            Severity::High,
            &[
                r"Connection refused",
                r"ECONNREFUSED",
                r"Could not connect",
                r"Connection reset",
            ],
            "Cannot connect to external service",
            "Check whether the source service is running and reachable",
        ),
        ErrorPattern::new(
            "http_5xx",
            ErrorCategory::SourceUnavailable,
            Severity::High,
            &[
                r"HTTP 5\d{2}",
                r"500 Internal Server Error",
                r"502 Bad Gateway",
                r"503 Service Unavailable",
                r"504 Gateway Timeout",
            ],
            "External API returned a server error",
            "Check external service status and retry",
        ),
        ErrorPattern::new(
            "dns_failure",
            ErrorCategory::SourceUnavailable,
            Severity::High,
            &[
                r"Name or service not known",
                r"getaddrinfo failed",
                r"DNS resolution failed",
                r"NXDOMAIN",
            ],
            "DNS resolution failed",
            "Check network configuration and DNS settings",
        ),
        ErrorPattern::new(
            "null_constraint",
            ErrorCategory::DataQuality,
            Severity::Medium,
            &[
                r"NOT NULL constraint",
                r"null value in column.*violates",
                r"Cannot insert NULL",
            ],
            "NULL value violates a constraint",
            "Add NULL handling or fix the source data",
        ),
        ErrorPattern::new(
            "unique_violation",
            ErrorCategory::DataQuality,
            Severity::Medium,
            &[r"unique constraint", r"duplicate key", r"IntegrityError.*UNIQUE"],
            "Duplicate key violation",
            "Add deduplication logic or use an upsert",
        ),
        ErrorPattern::new(
            "assertion_failed",
            ErrorCategory::DataQuality,
            Severity::Medium,
            &[
                r"AssertionError",
                r"data quality check failed",
                r"expectation.*failed",
            ],
            "Data quality assertion failed",
            "Investigate the data quality issue in the source",
        ),
        ErrorPattern::new(
            "auth_failure",
            ErrorCategory::PermissionError,
            Severity::High,
            &[
                r"401 Unauthorized",
                r"403 Forbidden",
                r"Access Denied",
                r"PermissionDenied",
                r"authentication failed",
            ],
            "Authentication or authorization failed",
            "Check credentials and permissions",
        ),
        ErrorPattern::new(
            "token_expired",
            ErrorCategory::PermissionError,
            Severity::Medium,
            &[
                r"token.*expired",
                r"JWT.*expired",
                r"session.*expired",
                r"credential.*expired",
            ],
            "Authentication token expired",
            "Refresh authentication tokens",
        ),
        ErrorPattern::new(
            "ssl_error",
            ErrorCategory::NetworkError,
            Severity::High,
            &[
                r"SSL.*error",
                r"certificate verify failed",
                r"SSLError",
                r"CERTIFICATE_VERIFY_FAILED",
            ],
            "SSL/TLS connection error",
            "Check SSL certificates and configuration",
        ),
    ]
}

/// Matches error text against the signature table.
pub struct PatternMatcher {
    patterns: Vec<ErrorPattern>,
}

impl PatternMatcher {
    pub fn new() -> Self {
        Self {
            patterns: default_patterns(),
        }
    }

    pub fn with_patterns(patterns: Vec<ErrorPattern>) -> Self {
        Self { patterns }
    }

    /// All matching patterns with their matched strings, most severe
    /// first; declaration order breaks ties.
    pub fn match_all<'a>(&'a self, text: &str) -> Vec<(&'a ErrorPattern, Vec<String>)> {
        let mut matches: Vec<(usize, &ErrorPattern, Vec<String>)> = self
            .patterns
            .iter()
            .enumerate()
            .filter_map(|(i, p)| {
                let found = p.find_matches(text);
                if found.is_empty() {
                    None
                } else {
                    Some((i, p, found))
                }
            })
            .collect();

        // Sort is stable, so equal severities keep declaration order.
        matches.sort_by(|a, b| b.1.severity.cmp(&a.1.severity));
        matches.into_iter().map(|(_, p, found)| (p, found)).collect()
    }

    /// The most likely primary error, if any signature matched.
    pub fn primary<'a>(&'a self, text: &str) -> Option<(&'a ErrorPattern, Vec<String>)> {
        self.match_all(text).into_iter().next()
    }

    /// Lines of the text that hit any signature, up to `max_lines`.
    pub fn extract_key_lines(&self, text: &str, max_lines: usize) -> Vec<String> {
        let mut key_lines = Vec::new();
        for line in text.lines() {
            if self.patterns.iter().any(|p| p.hits(line)) {
                key_lines.push(line.trim().to_string());
                if key_lines.len() >= max_lines {
                    break;
                }
            }
        }
        key_lines
    }

    /// Produce the deterministic candidate diagnosis for a bundle.
    pub fn analyze(&self, bundle: &ContextBundle) -> CandidateDiagnosis {
        let error_text = bundle.error_text();

        let candidate = match self.primary(&error_text) {
            Some((pattern, matched)) => {
                debug!(pattern = pattern.name, "Primary error signature matched");
                let mut evidence: Vec<String> = matched
                    .iter()
                    .take(3)
                    .map(|m| format!("Pattern match: {}", m))
                    .collect();
                if !error_text.is_empty() {
                    evidence.push(error_text.clone());
                }
                CandidateDiagnosis {
                    category: pattern.category,
                    severity: pattern.severity,
                    root_cause: pattern.description.to_string(),
                    root_cause_summary: pattern.description.to_string(),
                    evidence,
                    confidence: MATCHED_CONFIDENCE,
                    recommendations: vec![Recommendation::new(pattern.recommendation, 1)],
                    contributing_factors: Vec::new(),
                    immediate_action: None,
                    source: DiagnosisSource::Pattern,
                }
            }
            None => {
                let evidence = if error_text.is_empty() {
                    Vec::new()
                } else {
                    vec![error_text.clone()]
                };
                CandidateDiagnosis {
                    category: ErrorCategory::Unknown,
                    severity: Severity::Medium,
                    root_cause: "Unable to determine root cause from available information"
                        .to_string(),
                    root_cause_summary: "Unknown error, manual investigation required".to_string(),
                    evidence,
                    confidence: UNKNOWN_CONFIDENCE,
                    recommendations: vec![Recommendation::new("Review the full logs manually", 1)],
                    contributing_factors: Vec::new(),
                    immediate_action: None,
                    source: DiagnosisSource::Pattern,
                }
            }
        };

        candidate.clamp_confidence()
    }

    /// Render matches as prompt text for the generative analyzer.
    pub fn format_matches(&self, text: &str) -> String {
        let matches = self.match_all(text);
        if matches.is_empty() {
            return "No known error patterns detected.".to_string();
        }

        let mut lines = Vec::new();
        for (pattern, matched) in matches.iter().take(5) {
            lines.push(format!(
                "- {} ({}, {}): {}",
                pattern.name,
                pattern.category.as_str(),
                pattern.severity.as_str(),
                pattern.description
            ));
            lines.push(format!("  Matches: {}", matched[..matched.len().min(3)].join(", ")));
            lines.push(format!("  Recommendation: {}", pattern.recommendation));
        }
        lines.join("\n")
    }
}

impl Default for PatternMatcher {
    fn default() -> Self {
        Self::new()
    }
}
