// 🏷️ Category Rules - Rules as Data
// Pattern lookup from free-text source categories and type lists to the fixed taxonomy

use crate::entities::Category;
use anyhow::{Context as AnyhowContext, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

// ============================================================================
// RULE DEFINITION
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategoryRule {
    /// Rule ID for tracking
    pub id: String,

    /// Pattern to match (supports wildcards with *)
    pub pattern: String,

    /// Category to assign
    pub category: Category,

    /// Priority (higher = applied first)
    #[serde(default = "default_priority")]
    pub priority: i32,
}

fn default_priority() -> i32 {
    0
}

impl CategoryRule {
    pub fn new(id: &str, pattern: &str, category: Category, priority: i32) -> Self {
        CategoryRule {
            id: id.to_string(),
            pattern: pattern.to_string(),
            category,
            priority,
        }
    }

    /// Check if pattern matches the given text.
    ///
    /// Both sides are lowercased and `_`/`-` become spaces, so a places type
    /// like `beauty_salon` and a directory label like "Beauty Salon" match the
    /// same rule. Without `*` the pattern must appear as whole words.
    pub fn matches(&self, text: &str) -> bool {
        let pattern = normalize_label(&self.pattern);
        let text = normalize_label(text);

        if pattern.is_empty() || text.is_empty() {
            return false;
        }

        if pattern.contains('*') {
            let parts: Vec<&str> = pattern.split('*').collect();

            // Text must start with first part
            if !parts[0].is_empty() && !text.starts_with(parts[0]) {
                return false;
            }

            let last = parts[parts.len() - 1];
            if !last.is_empty() && !text.ends_with(last) {
                return false;
            }

            // Middle parts appear in order
            let mut current_pos = parts[0].len();
            for part in &parts[1..parts.len() - 1] {
                if part.is_empty() {
                    continue;
                }
                match text.get(current_pos..).and_then(|rest| rest.find(part)) {
                    Some(pos) => current_pos += pos + part.len(),
                    None => return false,
                }
            }

            true
        } else {
            let wanted: Vec<&str> = pattern.split_whitespace().collect();
            let words: Vec<&str> = text.split_whitespace().collect();
            words.windows(wanted.len()).any(|w| w == wanted.as_slice())
        }
    }
}

fn normalize_label(s: &str) -> String {
    s.trim()
        .to_lowercase()
        .chars()
        .map(|c| if c == '_' || c == '-' || c == '/' || c == ',' || c == '&' { ' ' } else { c })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

// ============================================================================
// RULE TABLE
// ============================================================================

#[derive(Debug, Clone)]
pub struct CategoryRules {
    rules: Vec<CategoryRule>,
}

impl CategoryRules {
    /// Create an empty table (everything maps to `other`)
    pub fn new() -> Self {
        CategoryRules { rules: Vec::new() }
    }

    /// Load rules from JSON file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read category rules file: {:?}", path.as_ref()))?;

        let rules: Vec<CategoryRule> =
            serde_json::from_str(&content).context("Failed to parse category rules JSON")?;

        Ok(CategoryRules::from_rules(rules))
    }

    pub fn from_rules(mut rules: Vec<CategoryRule>) -> Self {
        // Higher priority first; id breaks ties so lookup order is stable
        rules.sort_by(|a, b| b.priority.cmp(&a.priority).then_with(|| a.id.cmp(&b.id)));
        CategoryRules { rules }
    }

    pub fn add_rule(&mut self, rule: CategoryRule) {
        self.rules.push(rule);
        self.rules
            .sort_by(|a, b| b.priority.cmp(&a.priority).then_with(|| a.id.cmp(&b.id)));
    }

    /// Classify one free-text label; unmatched → `Other`
    pub fn classify(&self, text: &str) -> Category {
        self.find(text).map(|r| r.category).unwrap_or(Category::Other)
    }

    /// Classify a list of type labels: the highest-priority rule matching any
    /// label wins, so `["point_of_interest", "cafe", "food"]` is a cafe.
    pub fn classify_all<S: AsRef<str>>(&self, labels: &[S]) -> Category {
        for rule in &self.rules {
            if labels.iter().any(|l| rule.matches(l.as_ref())) {
                return rule.category;
            }
        }
        Category::Other
    }

    fn find(&self, text: &str) -> Option<&CategoryRule> {
        self.rules.iter().find(|r| r.matches(text))
    }

    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }
}

impl Default for CategoryRules {
    /// Built-in table covering places API types and common directory labels
    fn default() -> Self {
        let table: &[(&str, Category, i32)] = &[
            // Specific types beat generic ones ("coffee shop" before "shop")
            ("barber*", Category::Beauty, 90),
            ("beauty salon", Category::Beauty, 90),
            ("hair*", Category::Beauty, 80),
            ("nail salon", Category::Beauty, 80),
            ("spa", Category::Beauty, 70),
            ("bakery", Category::Bakery, 90),
            ("pastry*", Category::Bakery, 80),
            ("cafe", Category::Cafe, 85),
            ("coffee*", Category::Cafe, 85),
            ("tea house", Category::Cafe, 80),
            ("night club", Category::Bar, 85),
            ("pub", Category::Bar, 80),
            ("bar", Category::Bar, 75),
            ("brewery", Category::Bar, 75),
            ("winery", Category::Bar, 70),
            ("supermarket", Category::Grocery, 85),
            ("grocery*", Category::Grocery, 85),
            ("convenience store", Category::Grocery, 80),
            ("gym", Category::Fitness, 85),
            ("fitness*", Category::Fitness, 85),
            ("yoga*", Category::Fitness, 80),
            ("pharmacy", Category::Health, 85),
            ("drugstore", Category::Health, 85),
            ("dentist", Category::Health, 80),
            ("doctor", Category::Health, 80),
            ("hospital", Category::Health, 80),
            ("clinic", Category::Health, 75),
            ("bank", Category::Finance, 85),
            ("atm", Category::Finance, 80),
            ("accounting", Category::Finance, 75),
            ("insurance*", Category::Finance, 75),
            ("gas station", Category::Automotive, 85),
            ("car *", Category::Automotive, 80),
            ("auto*", Category::Automotive, 75),
            ("hotel", Category::Lodging, 85),
            ("motel", Category::Lodging, 85),
            ("lodging", Category::Lodging, 85),
            ("hostel", Category::Lodging, 80),
            ("movie theater", Category::Entertainment, 85),
            ("bowling alley", Category::Entertainment, 85),
            ("museum", Category::Entertainment, 80),
            ("amusement park", Category::Entertainment, 80),
            ("restaurant", Category::Restaurant, 60),
            ("meal takeaway", Category::Restaurant, 60),
            ("meal delivery", Category::Restaurant, 60),
            ("pizza*", Category::Restaurant, 60),
            ("diner", Category::Restaurant, 60),
            ("food", Category::Restaurant, 40),
            ("clothing store", Category::Retail, 70),
            ("shoe store", Category::Retail, 70),
            ("book store", Category::Retail, 70),
            ("store", Category::Retail, 30),
            ("shop", Category::Retail, 30),
            ("shopping*", Category::Retail, 30),
            ("laundry", Category::Service, 60),
            ("plumber", Category::Service, 60),
            ("electrician", Category::Service, 60),
            ("locksmith", Category::Service, 60),
            ("service*", Category::Service, 20),
        ];

        let rules = table
            .iter()
            .map(|(pattern, category, priority)| {
                CategoryRule::new(&pattern.replace(' ', "_"), pattern, *category, *priority)
            })
            .collect();

        CategoryRules::from_rules(rules)
    }
}

// ============================================================================
// TESTS
// ============================================================================
