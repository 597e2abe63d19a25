pub mod cache;
pub mod queue;
pub mod schedule;

// Re-export command functions for convenience
pub use cache::{evict_cache, init_db, migrate_cache, seed_from_cache};
pub use queue::{drain, dump};
pub use schedule::{reset, schedule, ScheduleParams};
