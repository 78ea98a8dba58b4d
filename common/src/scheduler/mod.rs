// Scheduler module: cron window evaluation, schedule cache, trigger engine

pub mod cache;
pub mod engine;
pub mod window;

pub use cache::{CacheState, ScheduleCache, ScheduleSource};
pub use engine::{Trigger, TriggerConfig, TriggerEngine};
pub use window::should_fire;
