//! The route paths served by the application.
//!
//! Handlers and tests reference these constants instead of string literals
//! so the router and the tests can never drift apart.

/// Register a new user.
pub const REGISTER: &str = "/auth/register";
/// Sign in with email and password.
pub const LOG_IN: &str = "/auth/login";
/// The authenticated user's profile.
pub const ME: &str = "/auth/me";

/// The user's accounts with computed totals.
pub const ACCOUNTS: &str = "/accounts";
/// One account by ID.
pub const ACCOUNT: &str = "/accounts/{id}";

/// The user's transactions with filters and pagination.
pub const TRANSACTIONS: &str = "/transactions";
/// One transaction by ID.
pub const TRANSACTION: &str = "/transactions/{id}";
/// Set the user-chosen category on a transaction.
pub const TRANSACTION_CATEGORY: &str = "/transactions/{id}/category";
/// Monthly income/expense statistics.
pub const MONTHLY_STATS: &str = "/transactions/stats/monthly";
/// Spending grouped by effective category.
pub const SPENDING_BY_CATEGORY: &str = "/transactions/stats/by-category";

/// Create a link token for the account linking flow.
pub const CREATE_LINK_TOKEN: &str = "/plaid/create-link-token";
/// Exchange a public token for an access credential.
pub const EXCHANGE_PUBLIC_TOKEN: &str = "/plaid/exchange-public-token";
/// Sync every linked credential on demand.
pub const SYNC_TRANSACTIONS: &str = "/plaid/sync-transactions";
/// Feed notifications; unauthenticated.
pub const WEBHOOK: &str = "/plaid/webhook";

/// The one-shot financial summary.
pub const SUMMARY: &str = "/summary";
/// The user's budgets.
pub const BUDGETS: &str = "/budgets";
/// The fixed category taxonomy.
pub const CATEGORIES: &str = "/categories";
/// Free-text finance questions.
pub const CHAT: &str = "/chat";
