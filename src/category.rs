//! The fixed category taxonomy and the effective-category resolution rule.

/// The fixed set of category labels used across classification, budgets and
/// reporting.
pub const CATEGORIES: [&str; 15] = [
    "Housing",
    "Transportation",
    "Food",
    "Utilities",
    "Insurance",
    "Healthcare",
    "Debt Payments",
    "Entertainment",
    "Shopping",
    "Personal Care",
    "Education",
    "Travel",
    "Gifts & Donations",
    "Income",
    "Other",
];

/// The label shown when no category source has a value.
pub const UNCATEGORIZED: &str = "Uncategorized";

/// Returns true if `label` is one of the fixed [CATEGORIES].
pub fn is_known_category(label: &str) -> bool {
    CATEGORIES.contains(&label)
}

/// Resolve the category to display for a transaction.
///
/// The precedence is fixed: a category chosen by the user wins over the
/// automatic classification, which wins over the category reported by the
/// feed. Transactions with no category from any source resolve to
/// [UNCATEGORIZED]. The result is always derived from the three stored
/// fields and is never persisted, so it can never go stale.
pub fn effective_category<'a>(
    user_category: Option<&'a str>,
    auto_category: Option<&'a str>,
    upstream_category: Option<&'a str>,
) -> &'a str {
    user_category
        .or(auto_category)
        .or(upstream_category)
        .unwrap_or(UNCATEGORIZED)
}
