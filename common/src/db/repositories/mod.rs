// Repositories over the persistence collaborator

pub mod schedule;
pub mod subscription;
pub mod trigger;

pub use schedule::ScheduleRepository;
pub use subscription::EventSubscriptionRepository;
pub use trigger::TriggerRepository;
