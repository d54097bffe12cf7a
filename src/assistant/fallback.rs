//! Rule-based task parsing, used when no completion service is configured
//! or when it fails.
//!
//! Each concern is an ordered table evaluated top to bottom; the first rule
//! that matches wins. Order is part of the contract: "urgent, low priority"
//! is Urgent because "urgent" is checked before "low".

use once_cell::sync::Lazy;
use regex::{Captures, Regex};

use super::ParsedTask;
use crate::world::Priority;

pub const TITLE_LIMIT: usize = 50;
pub const DEFAULT_DURATION: u32 = 30;
pub const DEFAULT_CATEGORY: &str = "General";

// ── Tables ─────────────────────────────────────────────────────

const PRIORITY_RULES: &[(&str, Priority)] = &[
    ("urgent", Priority::Urgent),
    ("asap", Priority::Urgent),
    ("important", Priority::High),
    ("high priority", Priority::High),
    ("medium", Priority::Medium),
    ("low", Priority::Low),
    ("whenever", Priority::Low),
];

const CATEGORY_RULES: &[(&str, &[&str])] = &[
    ("Work", &["meeting", "report", "project", "work", "office"]),
    ("Personal", &["buy", "shopping", "grocery", "personal"]),
    ("Health", &["exercise", "gym", "doctor", "health", "fitness"]),
    ("Learning", &["study", "read", "learn", "course", "book"]),
    ("Home", &["clean", "home", "house", "repair"]),
];

struct DurationRule {
    pattern: Regex,
    minutes: fn(&Captures) -> Option<u32>,
}

impl DurationRule {
    fn new(pattern: &str, minutes: fn(&Captures) -> Option<u32>) -> Self {
        DurationRule {
            pattern: Regex::new(pattern).expect("duration pattern"),
            minutes,
        }
    }

    /// Minutes from the first match of this rule, if it matched and the
    /// value is usable (positive, no overflow).
    fn eval(&self, text: &str) -> Option<u32> {
        let caps = self.pattern.captures(text)?;
        (self.minutes)(&caps).filter(|m| *m > 0)
    }
}

fn leading_number(caps: &Captures) -> Option<u32> {
    caps.get(1)?.as_str().parse().ok()
}

static DURATION_RULES: Lazy<Vec<DurationRule>> = Lazy::new(|| {
    vec![
        DurationRule::new(r"(\d+)\s*hour", |c| leading_number(c)?.checked_mul(60)),
        DurationRule::new(r"(\d+)\s*hr", |c| leading_number(c)?.checked_mul(60)),
        DurationRule::new(r"(\d+)\s*min", leading_number),
        DurationRule::new(r"quick", |_| Some(15)),
        DurationRule::new(r"long", |_| Some(120)),
    ]
});

// ── Extraction ─────────────────────────────────────────────────

pub fn priority(lowered: &str) -> Priority {
    PRIORITY_RULES
        .iter()
        .find(|(keyword, _)| lowered.contains(keyword))
        .map(|(_, priority)| *priority)
        .unwrap_or(Priority::Medium)
}

pub fn duration(lowered: &str) -> u32 {
    DURATION_RULES
        .iter()
        .find_map(|rule| rule.eval(lowered))
        .unwrap_or(DEFAULT_DURATION)
}

pub fn category(lowered: &str) -> &'static str {
    CATEGORY_RULES
        .iter()
        .find(|(_, keywords)| keywords.iter().any(|k| lowered.contains(k)))
        .map(|(name, _)| *name)
        .unwrap_or(DEFAULT_CATEGORY)
}

/// First 50 characters, with "..." appended when something was cut.
pub fn title(text: &str) -> String {
    let mut title: String = text.chars().take(TITLE_LIMIT).collect();
    if text.chars().nth(TITLE_LIMIT).is_some() {
        title.push_str("...");
    }
    title
}

/// Parse free text without any outside help. Never fails.
pub fn parse(text: &str) -> ParsedTask {
    let lowered = text.to_lowercase();
    ParsedTask {
        title: title(text),
        description: text.to_string(),
        priority: priority(&lowered),
        estimated_duration: duration(&lowered),
        due_date: None,
        category_suggestion: category(&lowered).to_string(),
    }
}
