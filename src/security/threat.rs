//! Free-text threat detection and sanitization.
//!
//! # Responsibilities
//! - Reject empty and oversized input before any pattern work
//! - Reject query-injection and markup-injection attempts outright
//! - Apply a soft spam heuristic to text that passed the hard checks
//! - Entity-encode clean text for downstream use
//!
//! # Design Decisions
//! - Pattern families are compiled once into `RegexSet`s and checked in order
//! - Sanitizing is applied only to text that was accepted; flagged text is
//!   never "repaired" into an accepted value
//! - The spam heuristic needs several independent signals before it rejects,
//!   so ordinary emphatic chat text passes

use std::sync::LazyLock;

use regex::{Regex, RegexSet};

use crate::config::ThreatConfig;
use crate::security::reputation::ViolationKind;

static INJECTION: LazyLock<RegexSet> = LazyLock::new(|| {
    RegexSet::new([
        // statement keywords
        r"(?i)\bunion(\s+all)?\s+select\b",
        r#"(?i)\b(drop|truncate|alter)\s+(table|database|schema)\s+(if\s+exists\s+)?[\w.`"\[\]]+\s*(;|--|/\*)"#,
        r"(?i)\binsert\s+into\b.*\bvalues\s*\(",
        r#"(?i)\bdelete\s+from\s+[\w.]+\s*(;|--|\bwhere\s+[\w.]+\s*(=|<|>)\s*['"\d])"#,
        r"(?i)\bselect\s+\*\s+from\b",
        r#"(?i)\bselect\s+[\w*,\s.()]+?\s+from\s+[\w.]+\s*(--|/\*|;\s*$|\bwhere\s+[\w.]+\s*(=|<|>|\blike\b)\s*['"\d])"#,
        r"(?i)\bupdate\s+\w+\s+set\s+\w+\s*=",
        r"(?i)\binformation_schema\b",
        r"(?i)\b(load_file|char|concat)\s*\(\s*0x",
        r"(?i)\binto\s+(out|dump)file\b",
        r"(?i)\b(exec|execute)\s+(xp_|sp_)\w+",
        r"(?i)\bxp_cmdshell\b",
        // comments closing a quoted literal
        r#"['"]\s*(--|#)\s*$"#,
        r#"['"]\s*/\*"#,
        r";\s*--\s*$",
        r"/\*.*\*/",
        // tautologies
        r#"(?i)['"]\s*\b(or|and)\s+(['"][^'"]*['"]|\d+)\s*(=|<>|!=|<|>)\s*(['"]|\d)"#,
        r#"(?i)(['")]|\d)\s*\b(or|and)\s+\d+\s*=\s*\d+\b"#,
        r#"(?i)\bor\s+['"][^'"]*['"]\s*=\s*['"]"#,
        // time delays
        r"(?i)(\b(and|or|select|waitfor)\b|[;'])\s*\(?\s*(sleep|pg_sleep)\(\s*\d+\s*\)",
        r"(?i)\bbenchmark\(\s*\d+\s*,",
        r"(?i)\bwaitfor\s+delay\s+'\d",
        // stacked statements
        r"(?i);\s*(drop|truncate|alter|create)\s+(table|database|schema|user|view|procedure)\b",
        r"(?i);\s*(delete\s+from|insert\s+into|update\s+\w+\s+set|exec(ute)?\s+\w+|shutdown\s*(;|--|$))",
    ])
    .expect("injection patterns are valid")
});

static MARKUP: LazyLock<RegexSet> = LazyLock::new(|| {
    RegexSet::new([
        r"(?i)</?\s*script\b",
        r"(?i)<[a-z][^>]*\son[a-z]+\s*=",
        EVENT_HANDLER,
        r#"(?i)\b(href|src|action|formaction|background)\s*=\s*['"]?\s*(javascript|vbscript|livescript)\s*:"#,
        r"(?i)(javascript|vbscript|livescript)\s*:\S",
        r"(?i)\bdata\s*:\s*(text/html|application/(x-)?javascript|image/svg\+xml)",
        r"(?i)</?(iframe|frame|frameset|object|embed|applet|meta|link|base|form|svg|math|style)\b",
        r"(?i)<img\b[^>]*\bsrc\s*=",
        r"(?i)[:=]\s*expression\(",
        r#"(?i)@import\s+(url\(|['"])"#,
        r"(?i)-moz-binding\s*:",
        r"(?i)\bdocument\.(cookie|write|location)\b",
        r"(?i)\beval\(",
    ])
    .expect("markup patterns are valid")
});

const EVENT_HANDLER: &str = r"(?i)\bon(load|unload|error|click|dblclick|mouse[a-z]+|key[a-z]+|focus|blur|submit|change|input|abort|toggle|begin|animation[a-z]+|pointer[a-z]+|touch[a-z]+)\s*=";

static HANDLER_STRIP: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(EVENT_HANDLER).expect("handler pattern is valid"));

// keeps the character after the colon; a bare scheme word followed by
// whitespace is prose
static SCHEME_STRIP: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(?:javascript|vbscript|livescript)\s*:(\S)").expect("scheme pattern is valid")
});

static DATA_URI_STRIP: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\bdata\s*:\s*(text/html|application/(x-)?javascript|image/svg\+xml)")
        .expect("data uri pattern is valid")
});

static ENTITY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^&(#[0-9]{1,7}|#[xX][0-9a-fA-F]{1,6}|[A-Za-z][A-Za-z0-9]{1,31});")
        .expect("entity pattern is valid")
});

static URL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(https?://|www\.)\S+").expect("url pattern is valid"));

const PROMOTIONAL: &[&str] = &[
    "buy now",
    "click here",
    "free money",
    "limited offer",
    "limited time",
    "act now",
    "100% free",
    "make money",
    "earn cash",
    "work from home",
    "casino",
    "viagra",
    "crypto giveaway",
    "winner",
    "subscribe now",
];

/// Reason a piece of text was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Threat {
    Empty,
    TooLong,
    Injection,
    MarkupInjection,
    Spam,
}

impl Threat {
    pub fn tag(&self) -> &'static str {
        match self {
            Threat::Empty => "empty",
            Threat::TooLong => "too_long",
            Threat::Injection => "injection",
            Threat::MarkupInjection => "markup-injection",
            Threat::Spam => "spam",
        }
    }

    /// Injection families; everything else is a soft rejection.
    pub fn is_hard(&self) -> bool {
        matches!(self, Threat::Injection | Threat::MarkupInjection)
    }

    /// Violation to report against the sender, if any.
    pub fn violation(&self) -> Option<ViolationKind> {
        match self {
            Threat::Empty => None,
            Threat::TooLong => Some(ViolationKind::MalformedInput),
            Threat::Injection => Some(ViolationKind::SqlInjection),
            Threat::MarkupInjection => Some(ViolationKind::Xss),
            Threat::Spam => Some(ViolationKind::Spam),
        }
    }
}

/// Result of validating one free-text field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Validation {
    pub valid: bool,
    pub sanitized: Option<String>,
    pub threat: Option<Threat>,
}

impl Validation {
    fn clean(sanitized: String) -> Self {
        Self {
            valid: true,
            sanitized: Some(sanitized),
            threat: None,
        }
    }

    fn rejected(threat: Threat) -> Self {
        Self {
            valid: false,
            sanitized: None,
            threat: Some(threat),
        }
    }
}

/// Stateless free-text classifier.
pub struct ThreatDetector {
    config: ThreatConfig,
}

impl ThreatDetector {
    pub fn new(config: ThreatConfig) -> Self {
        Self { config }
    }

    pub fn default_max_length(&self) -> usize {
        self.config.default_max_length
    }

    /// Validate `text`, rejecting anything longer than `max_length` characters.
    pub fn validate(&self, text: &str, max_length: usize) -> Validation {
        if text.trim().is_empty() {
            return Validation::rejected(Threat::Empty);
        }
        if text.chars().count() > max_length {
            return Validation::rejected(Threat::TooLong);
        }
        if INJECTION.is_match(text) {
            return Validation::rejected(Threat::Injection);
        }
        if MARKUP.is_match(text) {
            return Validation::rejected(Threat::MarkupInjection);
        }
        if self.config.spam_detection && self.spam_signals(text) >= self.config.spam_threshold {
            return Validation::rejected(Threat::Spam);
        }

        Validation::clean(sanitize(text))
    }

    fn spam_signals(&self, text: &str) -> u32 {
        let lower = text.to_lowercase();
        let signals = [
            longest_run(text) >= self.config.repeated_run,
            URL.find_iter(text).count() > self.config.max_urls,
            PROMOTIONAL.iter().any(|k| lower.contains(k)),
            digit_runs(text, self.config.digit_run_length) > self.config.max_digit_runs,
        ];
        signals.iter().filter(|s| **s).count() as u32
    }
}

/// Strip control characters, dangerous schemes and inline handlers, collapse
/// whitespace, then entity-encode reserved characters. Applying it to its own
/// output returns the same string.
pub fn sanitize(text: &str) -> String {
    let mut stripped: String = text
        .chars()
        .filter(|c| !c.is_control() || c.is_whitespace())
        .collect();

    loop {
        let next = SCHEME_STRIP.replace_all(&stripped, "${1}");
        let next = DATA_URI_STRIP.replace_all(&next, "");
        let next = HANDLER_STRIP.replace_all(&next, "").into_owned();
        if next == stripped {
            break;
        }
        stripped = next;
    }

    let collapsed = stripped.split_whitespace().collect::<Vec<_>>().join(" ");
    encode_entities(&collapsed)
}

fn encode_entities(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for (i, c) in text.char_indices() {
        match c {
            '&' if ENTITY.is_match(&text[i..]) => out.push('&'),
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            '/' => out.push_str("&#x2F;"),
            '`' => out.push_str("&#x60;"),
            _ => out.push(c),
        }
    }
    out
}

fn longest_run(text: &str) -> usize {
    let mut longest = 0;
    let mut current = 0;
    let mut prev = None;
    for c in text.chars() {
        if Some(c) == prev {
            current += 1;
        } else {
            current = 1;
            prev = Some(c);
        }
        longest = longest.max(current);
    }
    longest
}

fn digit_runs(text: &str, min_len: usize) -> usize {
    text.split(|c: char| !c.is_ascii_digit())
        .filter(|run| run.len() >= min_len)
        .count()
}
