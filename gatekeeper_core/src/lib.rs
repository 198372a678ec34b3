pub mod config;
pub mod coordination;
pub mod custom_filters;
pub mod dependencies;
pub mod eligibility;
pub mod error;
pub mod external_source;
pub mod holdings;
pub mod indexer;
pub mod jobs;
pub mod pipeline;
pub mod rate_limit;
pub mod rules;
pub mod session_lock;
