//! License policy, expression evaluation and the policy cache.

mod cache;
mod defaults;
mod expr;
mod normalize;
mod snapshot;
mod store;
mod types;

pub use cache::LicenseCache;
pub use defaults::default_policies;
pub use expr::{evaluate, parse_expression, ExpressionError, LicenseExpr, LicenseRef};
pub use normalize::normalize_key;
pub use snapshot::{PolicySnapshot, DEFAULT_UNKNOWN_SCORE};
pub use store::{LicensePolicyStore, SqliteLicensePolicyStore};
pub use types::{LicensePolicyEntry, LicenseTier, LicenseVerdict, PolicyError, ScoreBands};
