// anvil-core/src/lib.rs
// Document model, expression evaluator and aggregation pipeline engine

pub mod aggregation;
pub mod database;
pub mod document;
pub mod error;
pub mod expression;
pub mod logging;
pub mod query;
pub mod value;
pub mod value_utils;

// Public exports
pub use aggregation::{Pipeline, Stage};
pub use database::DatabaseCore;
pub use document::Document;
pub use error::{AnvilError, Result};
pub use expression::{Expression, OpKind};
pub use logging::{get_log_level, set_log_level, LogLevel};
pub use query::{matches_filter, Filter};
pub use value::Value;
pub use value_utils::{canonical_key, get_path, set_path};
