// Queue module for NATS JetStream dispatch

pub mod consumer;
pub mod nats;
pub mod publisher;

pub use consumer::{ConsumerState, MessageHandler, NatsDispatchConsumer};
pub use nats::{NatsClient, NatsConfig};
pub use publisher::{DispatchPublisher, NatsDispatchPublisher, NullDispatchPublisher};

use serde::{Deserialize, Serialize};
use std::fmt;

/// The dispatch topics this core produces to and consumes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Topic {
    /// Job launch requests, consumed by the job-execution path.
    JobRequests,
    /// Finding batches reported by running jobs.
    Findings,
    /// Timestamped job log lines.
    JobLogs,
}

impl Topic {
    /// Broker subject for this topic.
    pub fn subject(&self) -> &'static str {
        match self {
            Topic::JobRequests => "dispatch.jobs.requests",
            Topic::Findings => "dispatch.jobs.findings",
            Topic::JobLogs => "dispatch.jobs.logs",
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.subject())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_topic_subjects_are_distinct_and_under_the_stream_prefix() {
        let topics = [Topic::JobRequests, Topic::Findings, Topic::JobLogs];
        for topic in &topics {
            assert!(topic.subject().starts_with("dispatch."));
        }
        assert_ne!(Topic::JobRequests.subject(), Topic::Findings.subject());
        assert_ne!(Topic::Findings.subject(), Topic::JobLogs.subject());
    }
}
