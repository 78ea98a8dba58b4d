// Worker module: consumer-side processing of dispatch messages

pub mod findings;
pub mod jobs;

pub use findings::{EventSubscriptionSource, FindingsProcessor};
pub use jobs::{JobLauncher, LoggingJobLauncher};
