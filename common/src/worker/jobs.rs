// Job-request processing: the hand-off to the job-execution collaborator

use crate::models::{DispatchBody, DispatchMessage, JobStartPayload, LogLevel, LogPayload};
use crate::queue::{DispatchPublisher, MessageHandler, Topic};
use anyhow::Context;
use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;

/// The job-execution collaborator seam. Whatever actually runs jobs
/// (a container orchestrator, a local runner) implements this.
#[async_trait]
pub trait JobLauncher: Send + Sync {
    async fn launch(
        &self,
        request: &JobStartPayload,
        correlation_id: Option<Uuid>,
    ) -> anyhow::Result<()>;
}

/// Default launcher: logs the launch and acknowledges it with a `log`
/// dispatch message correlated to the originating job.
pub struct LoggingJobLauncher {
    publisher: Arc<dyn DispatchPublisher>,
}

impl LoggingJobLauncher {
    pub fn new(publisher: Arc<dyn DispatchPublisher>) -> Self {
        Self { publisher }
    }
}

#[async_trait]
impl JobLauncher for LoggingJobLauncher {
    #[instrument(skip(self, request), fields(job_name = %request.job_name))]
    async fn launch(
        &self,
        request: &JobStartPayload,
        correlation_id: Option<Uuid>,
    ) -> anyhow::Result<()> {
        info!(
            job_name = %request.job_name,
            parameter_count = request.parameters.len(),
            "Launching job"
        );

        let log = DispatchMessage::log(
            LogPayload {
                timestamp: Utc::now().timestamp_millis(),
                level: LogLevel::Info,
                message: format!("Job '{}' accepted for execution", request.job_name),
            },
            correlation_id,
        );

        self.publisher
            .publish(Topic::JobLogs, std::slice::from_ref(&log))
            .await
            .context("failed to publish the job acceptance log")?;

        Ok(())
    }
}

/// Build the consumer handler for the job requests topic.
pub fn job_request_handler(launcher: Arc<dyn JobLauncher>) -> MessageHandler {
    Arc::new(move |message: DispatchMessage| {
        let launcher = launcher.clone();
        Box::pin(async move {
            let kind = message.kind();
            match message.body {
                DispatchBody::JobStart(payload) => {
                    launcher.launch(&payload, message.correlation_id).await
                }
                _ => anyhow::bail!("unexpected '{}' message on the job requests topic", kind),
            }
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::QueueError;
    use crate::models::JobParameter;
    use crate::queue::consumer::process_payload;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingPublisher {
        published: Mutex<Vec<(Topic, DispatchMessage)>>,
    }

    #[async_trait]
    impl DispatchPublisher for RecordingPublisher {
        async fn publish(
            &self,
            topic: Topic,
            messages: &[DispatchMessage],
        ) -> Result<(), QueueError> {
            let mut published = self.published.lock().unwrap();
            for message in messages {
                published.push((topic, message.clone()));
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn launch_publishes_a_correlated_acceptance_log() {
        let publisher = Arc::new(RecordingPublisher::default());
        let launcher = LoggingJobLauncher::new(publisher.clone());

        let correlation_id = Uuid::new_v4();
        launcher
            .launch(
                &JobStartPayload {
                    job_name: "TcpPortScanningJob".to_string(),
                    parameters: vec![JobParameter {
                        name: "targetIp".to_string(),
                        value: serde_json::json!("10.0.0.1"),
                    }],
                },
                Some(correlation_id),
            )
            .await
            .unwrap();

        let published = publisher.published.lock().unwrap();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].0, Topic::JobLogs);
        assert_eq!(published[0].1.correlation_id, Some(correlation_id));
        assert!(matches!(published[0].1.body, DispatchBody::Log(_)));
    }

    #[tokio::test]
    async fn handler_rejects_non_job_start_messages() {
        let publisher = Arc::new(RecordingPublisher::default());
        let handler = job_request_handler(Arc::new(LoggingJobLauncher::new(publisher.clone())));

        let message = DispatchMessage::log(
            LogPayload {
                timestamp: 0,
                level: LogLevel::Debug,
                message: "stray".to_string(),
            },
            None,
        );

        let result = handler(message).await;
        assert!(result.is_err());
        assert!(publisher.published.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn consumer_pipeline_feeds_job_starts_to_the_launcher() {
        let publisher = Arc::new(RecordingPublisher::default());
        let handler = job_request_handler(Arc::new(LoggingJobLauncher::new(publisher.clone())));

        let message = DispatchMessage::job_start(
            JobStartPayload {
                job_name: "DomainNameResolvingJob".to_string(),
                parameters: vec![],
            },
            Some(Uuid::new_v4()),
        );
        let payload = serde_json::to_vec(&message).unwrap();

        process_payload(Topic::JobRequests, &handler, &payload).await;

        assert_eq!(publisher.published.lock().unwrap().len(), 1);
    }
}
