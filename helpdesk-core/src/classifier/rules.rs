//! Deterministic rule pass.
//!
//! Every rule family is evaluated; when several match, the highest
//! precedence wins: SENSITIVE > IDENTITY > HUMAN_REQUEST > REFUND >
//! COMPLAINT. No model is consulted here.

use super::{IdentityClaim, Intent};
use regex::Regex;
use std::sync::LazyLock;

type PatternTable = Vec<(&'static str, Regex)>;

fn compile(patterns: &[(&'static str, &str)]) -> PatternTable {
    patterns
        .iter()
        .map(|(name, pattern)| {
            (
                *name,
                Regex::new(pattern).expect("intent rule pattern should compile"),
            )
        })
        .collect()
}

static SENSITIVE_PATTERNS: LazyLock<PatternTable> = LazyLock::new(|| {
    compile(&[
        (
            "credential_disclosure",
            r"\b(?:give|tell|show|send|share|reveal|leak|dump|expose|list|what(?:'s| is| are))\b.{0,40}\b(?:passwords?|passcodes?|credentials?|api[ _-]?keys?|secret keys?|access tokens?|private keys?)\b",
        ),
        (
            "internal_system",
            r"\binternal (?:database|db|systems?|servers?|network|credentials?)\b",
        ),
        (
            "admin_access",
            r"\badmin(?:istrator)? (?:access|panel|password|credentials?|account)\b",
        ),
        (
            "personal_data",
            r"\b(?:social security(?: number)?|ssn|credit card numbers?|cvv)\b",
        ),
        ("fraud", r"\b(?:fraud|fraudulent|scam(?:med)?)\b"),
        ("account_compromise", r"\b(?:hacked|hacking|stolen account)\b"),
        ("legal", r"\b(?:legal|lawsuit|lawyer|sue)\b"),
    ])
});

static HUMAN_REQUEST_PATTERNS: LazyLock<PatternTable> = LazyLock::new(|| {
    compile(&[
        (
            "talk_to_human",
            r"\b(?:talk|speak|chat) (?:to|with) (?:a |an )?(?:human|person|real person|agent|representative|manager|someone)\b",
        ),
        ("real_agent", r"\breal (?:agent|person|human)\b"),
        ("human_agent", r"\bhuman (?:agent|support|being|operator)\b"),
        ("live_agent", r"\blive (?:agent|chat|support|person)\b"),
        (
            "want_human",
            r"\b(?:want|need) (?:a |an )?(?:human|agent|person|operator)\b",
        ),
        ("transfer", r"\b(?:connect|transfer) me\b"),
    ])
});

static REFUND_PATTERNS: LazyLock<PatternTable> = LazyLock::new(|| {
    compile(&[
        ("refund", r"\brefund(?:s|ed)?\b"),
        ("money_back", r"\bmoney back\b"),
        ("chargeback", r"\bchargeback\b"),
        ("reimburse", r"\breimburse(?:ment)?\b"),
    ])
});

// Questions *about* refunds are informational, not refund demands.
static REFUND_INFO_PATTERNS: LazyLock<PatternTable> = LazyLock::new(|| {
    compile(&[
        (
            "refund_policy",
            r"\brefund (?:policy|policies|rules|terms|conditions|process|procedure|steps)\b",
        ),
        ("about_refunds", r"\babout refunds?\b"),
        ("what_how_does", r"\b(?:what|how) does\b.*\brefund"),
        (
            "how_to_get",
            r"\bhow (?:can|do) i (?:get|request|apply for|ask for) a refund\b",
        ),
    ])
});

static COMPLAINT_PATTERNS: LazyLock<PatternTable> = LazyLock::new(|| {
    compile(&[
        ("complaint", r"\bcomplain(?:t|ts|ing)?\b"),
        ("anger", r"\b(?:angry|furious|upset)\b"),
        ("not_happy", r"\b(?:not happy|unhappy|disappointed|frustrat(?:ed|ing))\b"),
        (
            "bad_service",
            r"\b(?:bad|worst|terrible|awful|horrible|useless|ridiculous|unacceptable)\b",
        ),
    ])
});

static NAME_ASSERT_PATTERNS: LazyLock<PatternTable> = LazyLock::new(|| {
    compile(&[
        ("my_name_is", r"\bmy name is\s+([a-z]{2,}(?:\s[a-z]{2,})?)"),
        ("call_me", r"\bcall me\s+([a-z]{2,})"),
    ])
});

// "I am X" and friends only count when the whole message is the introduction.
static BARE_INTRO_PATTERNS: LazyLock<PatternTable> = LazyLock::new(|| {
    compile(&[
        ("i_am", r"^(?:(?:hi|hello|hey)[,!.]? )?i am ([a-z]{2,})(?: here)?[.!]*$"),
        ("i_m", r"^(?:(?:hi|hello|hey)[,!.]? )?i'm ([a-z]{2,})(?: here)?[.!]*$"),
        ("this_is", r"^(?:(?:hi|hello|hey)[,!.]? )?this is ([a-z]{2,})(?: here)?[.!]*$"),
    ])
});

static NAME_QUERY_PATTERNS: LazyLock<PatternTable> = LazyLock::new(|| {
    compile(&[
        ("what_is_my_name", r"\bwhat(?:'s| is) my name\b"),
        ("remember_my_name", r"\bdo you (?:remember|know) my name\b"),
        ("who_am_i", r"\bwho am i\b"),
    ])
});

static GREETING_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:hi|hello|hey|hiya|good (?:morning|afternoon|evening)|how are you)(?: there)?[\s!.?]*$")
        .expect("greeting pattern should compile")
});

/// Words that follow "I am" / "this is" but are not names
const NON_NAMES: &[&str] = &[
    "fine", "okay", "ok", "angry", "sad", "happy", "ready", "tired", "having", "trouble",
    "problem", "not", "very", "so", "really", "still", "just", "sorry", "looking", "trying",
    "unable", "going", "here", "new", "waiting", "interested", "calling", "writing", "asking",
    "good", "great", "upset", "frustrated", "confused", "done", "sure", "glad", "the", "an",
    "in", "on", "at", "from", "with", "bad", "your", "customer", "also", "getting", "facing",
    "disappointed", "unhappy", "worried", "concerned", "back", "ridiculous", "unacceptable",
    "terrible", "awful", "urgent", "about", "regarding", "my", "what", "how", "it", "is",
    "it's", "why", "wrong", "correct", "right", "annoyed", "furious", "useless", "worst",
    "hacked", "unable", "stuck", "locked", "charged", "billed",
];

/// Words that may follow a first name in "my name is X Y" but are not surnames
const NAME_CONNECTORS: &[&str] = &[
    "and", "but", "i", "please", "so", "from", "here", "the", "my", "can", "could", "would",
    "need", "want", "have", "am", "is", "was",
];

const NAME_KEY: &str = "name";

const BARE_INTRO_RULES: &[&str] = &["i_am", "i_m", "this_is"];

/// A matched rule
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleMatch {
    pub intent: Intent,
    pub identity: Option<IdentityClaim>,
    /// Name of the pattern that fired
    pub rule: &'static str,
}

/// Lowercase, straighten apostrophes, collapse whitespace
pub fn normalize(text: &str) -> String {
    text.replace(['\u{2019}', '\u{2018}'], "'")
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Bare greeting with no question attached
pub fn is_greeting(text: &str) -> bool {
    GREETING_PATTERN.is_match(&normalize(text))
}

/// The deterministic rule pass
#[derive(Debug, Clone, Copy, Default)]
pub struct RuleSet;

impl RuleSet {
    pub fn new() -> Self {
        Self
    }

    /// Highest-precedence rule match, if any
    pub fn evaluate(&self, text: &str) -> Option<RuleMatch> {
        self.matches(text)
            .into_iter()
            .min_by_key(|m| m.intent.precedence())
    }

    /// Every rule family that matches, one entry per family
    pub fn matches(&self, text: &str) -> Vec<RuleMatch> {
        let msg = normalize(text);
        let mut out = Vec::new();

        if let Some(rule) = first_hit(&SENSITIVE_PATTERNS, &msg) {
            out.push(plain(Intent::Sensitive, rule));
        }
        if let Some(m) = self.identity(&msg) {
            out.push(m);
        }
        if let Some(rule) = first_hit(&HUMAN_REQUEST_PATTERNS, &msg) {
            out.push(plain(Intent::HumanRequest, rule));
        }
        if let Some(rule) = first_hit(&REFUND_PATTERNS, &msg) {
            if first_hit(&REFUND_INFO_PATTERNS, &msg).is_none() {
                out.push(plain(Intent::Refund, rule));
            }
        }
        if let Some(rule) = first_hit(&COMPLAINT_PATTERNS, &msg) {
            out.push(plain(Intent::Complaint, rule));
        }

        // A bare-intro "name" that any other rule claims ("this is horrible", "this is fraud")
        let claimed = out
            .iter()
            .any(|m| !matches!(m.intent, Intent::IdentityAssert | Intent::IdentityQuery));
        if claimed {
            out.retain(|m| !BARE_INTRO_RULES.contains(&m.rule));
        }
        out
    }

    fn identity(&self, msg: &str) -> Option<RuleMatch> {
        let tables = [&*NAME_ASSERT_PATTERNS, &*BARE_INTRO_PATTERNS];
        for (rule, pattern) in tables.into_iter().flatten() {
            let Some(caps) = pattern.captures(msg) else {
                continue;
            };
            let Some(raw) = caps.get(1) else {
                continue;
            };
            if let Some(name) = clean_name(raw.as_str()) {
                return Some(RuleMatch {
                    intent: Intent::IdentityAssert,
                    identity: Some(IdentityClaim::Assert {
                        key: NAME_KEY.to_string(),
                        value: name,
                    }),
                    rule: *rule,
                });
            }
        }

        first_hit(&NAME_QUERY_PATTERNS, msg).map(|rule| RuleMatch {
            intent: Intent::IdentityQuery,
            identity: Some(IdentityClaim::Query {
                key: NAME_KEY.to_string(),
            }),
            rule,
        })
    }
}

fn first_hit(table: &PatternTable, msg: &str) -> Option<&'static str> {
    table
        .iter()
        .find(|(_, pattern)| pattern.is_match(msg))
        .map(|(name, _)| *name)
}

fn plain(intent: Intent, rule: &'static str) -> RuleMatch {
    RuleMatch {
        intent,
        identity: None,
        rule,
    }
}

/// Drop trailing connector words, reject non-names, title-case the rest
fn clean_name(raw: &str) -> Option<String> {
    let mut words: Vec<&str> = raw.split_whitespace().collect();
    while words.len() > 1 && words.last().is_some_and(|w| NAME_CONNECTORS.contains(w)) {
        words.pop();
    }
    let first = words.first()?;
    if NON_NAMES.contains(first) {
        return None;
    }
    Some(
        words
            .iter()
            .map(|w| title_case(w))
            .collect::<Vec<_>>()
            .join(" "),
    )
}

fn title_case(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
