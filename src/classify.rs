//! The classification adapter: assigns a category to transaction text.
//!
//! An external text-classification capability can be plugged in behind
//! [CategoryModel]. The adapter never fails: any model error, and any model
//! answer outside the fixed taxonomy, falls back to a deterministic keyword
//! match, and finally to amount polarity.

use std::sync::{Arc, LazyLock};

use async_trait::async_trait;
use regex::Regex;
use time::Date;

use crate::{
    Error,
    category::{is_known_category, CATEGORIES},
};

/// The transaction fields used for classification.
#[derive(Debug, Clone)]
pub struct ClassifyRequest<'a> {
    /// The transaction display name.
    pub name: &'a str,
    /// Signed amount; negative values suggest incoming funds.
    pub amount: f64,
    /// The transaction date.
    pub date: Date,
    /// The raw statement description, when available.
    pub description: Option<&'a str>,
}

/// An external capability that classifies transaction text.
///
/// Implementations may call out to a remote model. Returning an error is
/// fine: the [ClassificationAdapter] downgrades every failure to the local
/// fallback.
#[async_trait]
pub trait CategoryModel: Send + Sync {
    /// Classify a transaction, returning a label from the fixed taxonomy.
    async fn classify(&self, request: &ClassifyRequest<'_>) -> Result<String, Error>;
}

/// Classifies transactions via an optional external model with a local
/// keyword fallback.
#[derive(Clone, Default)]
pub struct ClassificationAdapter {
    model: Option<Arc<dyn CategoryModel>>,
}

impl ClassificationAdapter {
    /// Create an adapter backed by an external model.
    pub fn new(model: Arc<dyn CategoryModel>) -> Self {
        Self { model: Some(model) }
    }

    /// Create an adapter that only uses the local keyword rules.
    pub fn local_only() -> Self {
        Self { model: None }
    }

    /// Classify a transaction. Never fails.
    ///
    /// Model failures and answers outside the fixed taxonomy are logged and
    /// replaced with [local_classify]'s result.
    pub async fn classify(&self, request: &ClassifyRequest<'_>) -> String {
        if let Some(model) = &self.model {
            match model.classify(request).await {
                Ok(label) => {
                    let label = label.trim();
                    if is_known_category(label) {
                        return label.to_owned();
                    }

                    tracing::warn!(
                        "category model returned a label outside the taxonomy: {label:?}"
                    );
                }
                Err(error) => {
                    tracing::warn!("category model failed, falling back to keywords: {error}");
                }
            }
        }

        local_classify(request)
    }
}

/// Keyword patterns for each category, checked in taxonomy order.
///
/// Patterns are matched against the lowercased name and description.
static CATEGORY_PATTERNS: LazyLock<Vec<(&'static str, Regex)>> = LazyLock::new(|| {
    [
        ("Housing", r"rent|mortgage|property|real estate|apartment|housing|landlord|lease|condo|hoa"),
        ("Transportation", r"uber|lyft|taxi|car|auto|gas|fuel|transit|train|bus|subway|metro|toll|parking"),
        ("Food", r"grocery|restaurant|coffee|food|dining|doordash|grubhub|ubereats|meal|cafe|diner|pizza|burger|bakery"),
        ("Utilities", r"electricity|water|power|utility|internet|cable|phone|cell|mobile|telecom|broadband"),
        ("Insurance", r"insurance|policy|premium|coverage|protect"),
        ("Healthcare", r"doctor|medical|health|hospital|clinic|pharmacy|prescription|dental|optical|therapy|healthcare"),
        ("Debt Payments", r"payment|loan|credit card|debt|interest|student loan|finance charge"),
        ("Entertainment", r"movie|entertainment|game|music|concert|theater|netflix|spotify|hulu|disney|streaming|subscription"),
        ("Shopping", r"amazon|walmart|target|store|mall|shop|retail|clothing|apparel|merchandise|purchase|online"),
        ("Personal Care", r"salon|spa|haircut|beauty|gym|fitness|personal care|cosmetic|makeup"),
        ("Education", r"tuition|school|college|university|class|course|education|book|student|learning"),
        ("Travel", r"travel|flight|airline|hotel|vacation|airbnb|booking|trip|lodging"),
        ("Gifts & Donations", r"gift|charity|donation|present|donate"),
        ("Income", r"payroll|salary|deposit|income|wage|earning|revenue|transfer"),
    ]
    .into_iter()
    .map(|(category, pattern)| {
        debug_assert!(CATEGORIES.contains(&category));
        (category, Regex::new(pattern).expect("invalid category pattern"))
    })
    .collect()
});

/// Deterministically classify a transaction from its text and amount.
///
/// Tries the keyword patterns first, then falls back to "Income" when the
/// amount polarity or text suggests incoming funds, and "Other" otherwise.
pub fn local_classify(request: &ClassifyRequest<'_>) -> String {
    let mut text = request.name.to_lowercase();
    if let Some(description) = request.description {
        text.push(' ');
        text.push_str(&description.to_lowercase());
    }

    for (category, pattern) in CATEGORY_PATTERNS.iter() {
        if pattern.is_match(&text) {
            return (*category).to_owned();
        }
    }

    if request.amount < 0.0 || text.contains("deposit") || text.contains("payment received") {
        return "Income".to_owned();
    }

    "Other".to_owned()
}

#[cfg(test)]
mod local_classify_tests {
    use time::macros::date;

    use crate::category::is_known_category;

    use super::{ClassifyRequest, local_classify};

    fn request(name: &'static str, amount: f64) -> ClassifyRequest<'static> {
        ClassifyRequest {
            name,
            amount,
            date: date!(2024 - 06 - 01),
            description: None,
        }
    }

    #[test]
    fn grocery_purchase_is_food() {
        assert_eq!(local_classify(&request("GROCERY STORE", 75.50)), "Food");
    }

    #[test]
    fn rideshare_is_transportation() {
        assert_eq!(local_classify(&request("UBER TRIP", 18.20)), "Transportation");
    }

    #[test]
    fn negative_amount_falls_back_to_income() {
        assert_eq!(local_classify(&request("ACME CORP", -2500.0)), "Income");
    }

    #[test]
    fn unknown_expense_falls_back_to_other() {
        assert_eq!(local_classify(&request("ZZZZZ", 10.0)), "Other");
    }

    #[test]
    fn description_contributes_to_matching() {
        let request = ClassifyRequest {
            name: "POS 1234",
            amount: 12.0,
            date: date!(2024 - 06 - 01),
            description: Some("AIRBNB LODGING"),
        };

        assert_eq!(local_classify(&request), "Travel");
    }

    #[test]
    fn result_is_always_within_the_taxonomy() {
        for (name, amount) in [
            ("GROCERY STORE", 10.0),
            ("ZZZZZ", 10.0),
            ("ZZZZZ", -10.0),
            ("", 0.0),
        ] {
            assert!(is_known_category(&local_classify(&request(name, amount))));
        }
    }
}
