//! Guardrail scanners.
//!
//! Content-safety checks gating both incoming queries and outgoing answers.
//! A scanner *activating* (flagging content) is a normal [`ScanResult`];
//! only scanner-internal faults surface as errors. Composition runs every
//! configured scanner without short-circuiting and keeps all individual
//! results for observability.

use serde::Serialize;

use crate::error::PipelineError;

/// Outcome of one guardrail check. `activated` holds exactly when
/// `risk_score` exceeds `threshold`; `is_valid` is its negation.
#[derive(Debug, Clone, Serialize)]
pub struct ScanResult {
    pub kind: String,
    pub activated: bool,
    pub guard_output: String,
    pub is_valid: bool,
    pub risk_score: f64,
    pub threshold: f64,
    pub scanned_text: String,
}

impl ScanResult {
    fn new(
        kind: &str,
        guard_output: String,
        risk_score: f64,
        threshold: f64,
        scanned_text: &str,
    ) -> Self {
        let activated = risk_score > threshold;
        Self {
            kind: kind.to_string(),
            activated,
            guard_output,
            is_valid: !activated,
            risk_score,
            threshold,
            scanned_text: scanned_text.to_string(),
        }
    }
}

/// A content-safety check over a single piece of text.
pub trait Scanner: Send + Sync {
    fn kind(&self) -> &'static str;
    fn scan(&self, text: &str) -> Result<ScanResult, PipelineError>;
}

/// Extension for scanners that need the full answer context. Plain scanners
/// get a blanket implementation that scans the response text alone.
pub trait OutputScanner: Send + Sync {
    fn kind(&self) -> &'static str;
    fn scan_output(
        &self,
        response: &str,
        query: &str,
        context: &str,
    ) -> Result<ScanResult, PipelineError>;
}

impl<T: Scanner> OutputScanner for T {
    fn kind(&self) -> &'static str {
        Scanner::kind(self)
    }
    fn scan_output(
        &self,
        response: &str,
        _query: &str,
        _context: &str,
    ) -> Result<ScanResult, PipelineError> {
        self.scan(response)
    }
}

/// Run every input scanner over the query. Never short-circuits; returns
/// `(any_activated, all_results)`.
pub fn run_input_scanners(
    scanners: &[Box<dyn Scanner>],
    query: &str,
) -> Result<(bool, Vec<ScanResult>), PipelineError> {
    let mut detected = false;
    let mut results = Vec::with_capacity(scanners.len());
    for scanner in scanners {
        let result = scanner
            .scan(query)
            .map_err(|e| scanner_fault(scanner.kind(), e))?;
        detected |= result.activated;
        results.push(result);
    }
    Ok((detected, results))
}

/// Run every output scanner over the synthesized answer.
pub fn run_output_scanners(
    scanners: &[Box<dyn OutputScanner>],
    response: &str,
    query: &str,
    context: &str,
) -> Result<(bool, Vec<ScanResult>), PipelineError> {
    let mut detected = false;
    let mut results = Vec::with_capacity(scanners.len());
    for scanner in scanners {
        let result = scanner
            .scan_output(response, query, context)
            .map_err(|e| scanner_fault(scanner.kind(), e))?;
        detected |= result.activated;
        results.push(result);
    }
    Ok((detected, results))
}

/// Attribute a scanner-internal failure to the scanner that raised it.
fn scanner_fault(kind: &str, err: PipelineError) -> PipelineError {
    match err {
        already @ PipelineError::Scanner { .. } => already,
        other => PipelineError::Scanner {
            kind: kind.to_string(),
            reason: other.to_string(),
        },
    }
}

// ============ Toxicity scanner ============

/// Weighted term/phrase lexicon. Weights are in [0, 1]; risk is the maximum
/// weight among matches, compared full-text against the threshold.
const TOXIC_TERMS: &[(&str, f64)] = &[
    // Threats and harassment
    ("kill yourself", 1.0),
    ("kill you", 1.0),
    ("i will hurt you", 1.0),
    ("go die", 1.0),
    ("die in a fire", 1.0),
    // Identity attacks
    ("subhuman", 1.0),
    ("vermin", 0.9),
    // Strong profanity and insults
    ("fuck", 0.7),
    ("fucking", 0.7),
    ("shit", 0.6),
    ("bitch", 0.8),
    ("asshole", 0.8),
    ("bastard", 0.7),
    ("moron", 0.6),
    ("idiot", 0.55),
    ("stupid", 0.55),
    ("dumbass", 0.7),
    ("scum", 0.7),
    ("loser", 0.55),
    ("pathetic", 0.55),
    ("worthless", 0.6),
    ("hate you", 0.7),
    // Mild
    ("damn", 0.2),
    ("hell", 0.2),
    ("crap", 0.2),
];

pub struct ToxicityScanner {
    threshold: f64,
}

impl ToxicityScanner {
    pub fn new(threshold: f64) -> Self {
        Self { threshold }
    }
}

impl Scanner for ToxicityScanner {
    fn kind(&self) -> &'static str {
        "Toxicity"
    }

    fn scan(&self, text: &str) -> Result<ScanResult, PipelineError> {
        let lower = text.to_lowercase();
        let mut risk: f64 = 0.0;
        let mut masked = text.to_string();

        for (term, weight) in TOXIC_TERMS {
            if contains_term(&lower, term) {
                risk = risk.max(*weight);
                masked = mask_term(&masked, term);
            }
        }

        Ok(ScanResult::new(
            Scanner::kind(self),
            masked,
            risk,
            self.threshold,
            text,
        ))
    }
}

/// Whole-word match for single terms, substring match for phrases.
fn contains_term(lower_text: &str, term: &str) -> bool {
    if term.contains(' ') {
        return lower_text.contains(term);
    }
    lower_text
        .split(|c: char| !c.is_alphanumeric())
        .any(|word| word == term)
}

fn mask_term(text: &str, term: &str) -> String {
    // Lowercasing can change byte length (e.g. 'İ' expands to two chars), so
    // matching walks the original text char by char instead of slicing it
    // with offsets found in a lowercased copy.
    let term_chars: Vec<char> = term.chars().collect();
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len());
    let mut i = 0;
    while i < chars.len() {
        match case_insensitive_match_len(&chars[i..], &term_chars) {
            Some(consumed) => {
                out.extend(std::iter::repeat('*').take(term_chars.len()));
                i += consumed;
            }
            None => {
                out.push(chars[i]);
                i += 1;
            }
        }
    }
    out
}

/// Number of chars at the head of `chars` whose lowercase form spells `term`
/// exactly, or `None` when it does not.
fn case_insensitive_match_len(chars: &[char], term: &[char]) -> Option<usize> {
    let mut ti = 0;
    let mut i = 0;
    while ti < term.len() {
        let c = *chars.get(i)?;
        for lc in c.to_lowercase() {
            if ti >= term.len() || lc != term[ti] {
                return None;
            }
            ti += 1;
        }
        i += 1;
    }
    Some(i)
}

// ============ Token-limit scanner ============

/// Approximate chars-per-token ratio; matches the estimate used for
/// chunk sizing.
const CHARS_PER_TOKEN: usize = 4;

/// Flags text whose estimated token count exceeds a fixed budget.
/// `risk_score` reports the estimated count and `threshold` the budget, so
/// an activated result always shows `risk_score > threshold`.
pub struct TokenLimitScanner {
    limit: usize,
}

impl TokenLimitScanner {
    pub fn new(limit: usize) -> Self {
        Self { limit }
    }

    pub fn estimate_tokens(text: &str) -> usize {
        text.chars().count().div_ceil(CHARS_PER_TOKEN)
    }
}

impl Scanner for TokenLimitScanner {
    fn kind(&self) -> &'static str {
        "Token limit"
    }

    fn scan(&self, text: &str) -> Result<ScanResult, PipelineError> {
        let tokens = Self::estimate_tokens(text);
        let guard_output: String = text.chars().take(self.limit * CHARS_PER_TOKEN).collect();

        Ok(ScanResult::new(
            Scanner::kind(self),
            guard_output,
            tokens as f64,
            self.limit as f64,
            text,
        ))
    }
}
