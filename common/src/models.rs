use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Current version of the dispatch message envelope. Bump when the wire
/// format changes; consumers log a warning for newer versions but still
/// attempt to process them.
pub const DISPATCH_MESSAGE_VERSION: u32 = 1;

// ============================================================================
// Schedule Models
// ============================================================================

/// Unified view of a schedulable entity: an alarm (webhook notification on a
/// cron schedule) or a cron subscription (job launch on a cron schedule).
///
/// Entries are created and edited by the external CRUD layer; this core only
/// consumes point-in-time lists of them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleEntry {
    pub id: Uuid,
    pub name: String,
    /// Six-field cron expression with seconds resolution. Five-field classic
    /// expressions are accepted and evaluated with a seconds field of `0`.
    pub cron_expression: String,
    /// Disabled entries stay in the cache and are evaluated, but are never
    /// dispatched. Re-checked at dispatch time because snapshots are stale
    /// by design.
    pub is_enabled: bool,
    pub action: ScheduleAction,
}

/// What firing a schedule means. Both variants resolve to publishing one
/// dispatch message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ScheduleAction {
    /// Alarm: notify a webhook path through the notification delivery job.
    Webhook { path: String },
    /// Cron subscription: launch a named job with its parameter list.
    Job {
        job_name: String,
        parameters: Vec<JobParameter>,
    },
}

impl ScheduleEntry {
    /// Build the dispatch message this entry publishes when it fires.
    /// The entry id becomes the message's correlation id so downstream
    /// consumers can attribute the run to its schedule.
    pub fn to_dispatch_message(&self) -> DispatchMessage {
        match &self.action {
            ScheduleAction::Webhook { path } => DispatchMessage::job_start(
                JobStartPayload {
                    job_name: "webhook-notification".to_string(),
                    parameters: vec![JobParameter {
                        name: "path".to_string(),
                        value: serde_json::Value::String(path.clone()),
                    }],
                },
                Some(self.id),
            ),
            ScheduleAction::Job {
                job_name,
                parameters,
            } => DispatchMessage::job_start(
                JobStartPayload {
                    job_name: job_name.clone(),
                    parameters: parameters.clone(),
                },
                Some(self.id),
            ),
        }
    }
}

/// A named job parameter. Values are free-form JSON, as the job definitions
/// accept strings, numbers and structured arguments alike.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobParameter {
    pub name: String,
    pub value: serde_json::Value,
}

// ============================================================================
// Event Subscription Models
// ============================================================================

/// Read-only view of an event subscription: reacts to findings of a given
/// key by launching a job, rate-limited per correlation key by `cooldown_ms`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventSubscription {
    pub id: Uuid,
    pub name: String,
    /// The finding key this subscription reacts to (e.g. "HostnameIpFinding").
    pub finding_key: String,
    pub job_name: String,
    pub parameters: Vec<JobParameter>,
    /// Minimum elapsed time between two dispatches for the same
    /// (subscription, correlation key) pair.
    pub cooldown_ms: i64,
    pub is_enabled: bool,
}

/// Cooldown bookkeeping for one (subscription, correlation key) pair.
/// Created on the first qualifying event, conditionally updated afterwards,
/// never deleted by this core.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscriptionTrigger {
    pub subscription_id: Uuid,
    pub correlation_key: String,
    /// Epoch milliseconds of the last allowed dispatch.
    pub last_trigger: i64,
}

// ============================================================================
// Findings
// ============================================================================

/// A single finding reported by a job: the discovery of (or change to) an
/// asset, keyed by finding type and scoped to a correlation key identifying
/// the subject entity (a host, a domain, ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    pub key: String,
    pub correlation_key: String,
    #[serde(default)]
    pub data: serde_json::Value,
}

/// Findings travel in batches on the findings topic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FindingBatch {
    pub findings: Vec<Finding>,
}

// ============================================================================
// Dispatch Messages
// ============================================================================

/// Log severity carried by job log messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
}

/// Payload of a `job-start` dispatch message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobStartPayload {
    pub job_name: String,
    pub parameters: Vec<JobParameter>,
}

/// Payload of a `log` dispatch message: one timestamped log line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogPayload {
    /// Epoch milliseconds at which the line was emitted.
    pub timestamp: i64,
    pub level: LogLevel,
    pub message: String,
}

/// Kind-specific body of a dispatch message. Serialized adjacently tagged so
/// the envelope stays self-describing: `{"kind": "job-start", "payload": ...}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "payload", rename_all = "kebab-case")]
pub enum DispatchBody {
    JobStart(JobStartPayload),
    Finding(FindingBatch),
    Log(LogPayload),
}

/// The wire envelope published to and consumed from the dispatch queue.
///
/// Producer and consumer may run different deployed versions, so the
/// envelope carries an explicit version. The `id` is unique per message and
/// doubles as the broker-level deduplication key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchMessage {
    #[serde(rename = "v")]
    pub version: u32,
    pub id: Uuid,
    #[serde(
        rename = "correlationId",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub correlation_id: Option<Uuid>,
    #[serde(rename = "publishedAt")]
    pub published_at: DateTime<Utc>,
    #[serde(flatten)]
    pub body: DispatchBody,
}

impl DispatchMessage {
    fn new(body: DispatchBody, correlation_id: Option<Uuid>) -> Self {
        Self {
            version: DISPATCH_MESSAGE_VERSION,
            id: Uuid::new_v4(),
            correlation_id,
            published_at: Utc::now(),
            body,
        }
    }

    pub fn job_start(payload: JobStartPayload, correlation_id: Option<Uuid>) -> Self {
        Self::new(DispatchBody::JobStart(payload), correlation_id)
    }

    pub fn finding(batch: FindingBatch, correlation_id: Option<Uuid>) -> Self {
        Self::new(DispatchBody::Finding(batch), correlation_id)
    }

    pub fn log(payload: LogPayload, correlation_id: Option<Uuid>) -> Self {
        Self::new(DispatchBody::Log(payload), correlation_id)
    }

    /// Short label of the message kind, used in logs and metric labels.
    pub fn kind(&self) -> &'static str {
        match self.body {
            DispatchBody::JobStart(_) => "job-start",
            DispatchBody::Finding(_) => "finding",
            DispatchBody::Log(_) => "log",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dispatch_message_envelope_is_self_describing() {
        let message = DispatchMessage::job_start(
            JobStartPayload {
                job_name: "TcpPortScanningJob".to_string(),
                parameters: vec![JobParameter {
                    name: "targetIp".to_string(),
                    value: serde_json::json!("10.0.0.1"),
                }],
            },
            Some(Uuid::new_v4()),
        );

        let json: serde_json::Value = serde_json::to_value(&message).unwrap();
        assert_eq!(json["v"], 1);
        assert_eq!(json["kind"], "job-start");
        assert_eq!(json["payload"]["job_name"], "TcpPortScanningJob");
        assert!(json["correlationId"].is_string());
    }

    #[test]
    fn dispatch_message_round_trips() {
        let message = DispatchMessage::finding(
            FindingBatch {
                findings: vec![Finding {
                    key: "HostnameIpFinding".to_string(),
                    correlation_key: "host:10.0.0.1".to_string(),
                    data: serde_json::json!({ "ip": "10.0.0.1" }),
                }],
            },
            None,
        );

        let bytes = serde_json::to_vec(&message).unwrap();
        let decoded: DispatchMessage = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(decoded, message);
    }

    #[test]
    fn correlation_id_is_omitted_when_absent() {
        let message = DispatchMessage::log(
            LogPayload {
                timestamp: 1_701_306_000_000,
                level: LogLevel::Info,
                message: "job started".to_string(),
            },
            None,
        );

        let json = serde_json::to_string(&message).unwrap();
        assert!(!json.contains("correlationId"));
    }

    #[test]
    fn webhook_action_dispatches_notification_job() {
        let entry = ScheduleEntry {
            id: Uuid::new_v4(),
            name: "Nightly report".to_string(),
            cron_expression: "0 0 2 * * *".to_string(),
            is_enabled: true,
            action: ScheduleAction::Webhook {
                path: "/alarms/nightly".to_string(),
            },
        };

        let message = entry.to_dispatch_message();
        assert_eq!(message.correlation_id, Some(entry.id));
        match message.body {
            DispatchBody::JobStart(payload) => {
                assert_eq!(payload.job_name, "webhook-notification");
                assert_eq!(payload.parameters[0].name, "path");
            }
            other => panic!("expected job-start, got {:?}", other),
        }
    }

    #[test]
    fn job_action_carries_its_parameters() {
        let entry = ScheduleEntry {
            id: Uuid::new_v4(),
            name: "Weekly port scan".to_string(),
            cron_expression: "0 0 4 * * 1".to_string(),
            is_enabled: true,
            action: ScheduleAction::Job {
                job_name: "TcpPortScanningJob".to_string(),
                parameters: vec![JobParameter {
                    name: "targetIp".to_string(),
                    value: serde_json::json!("10.0.0.0/24"),
                }],
            },
        };

        match entry.to_dispatch_message().body {
            DispatchBody::JobStart(payload) => {
                assert_eq!(payload.job_name, "TcpPortScanningJob");
                assert_eq!(payload.parameters.len(), 1);
            }
            other => panic!("expected job-start, got {:?}", other),
        }
    }

    #[test]
    fn schedule_action_tagged_serialization() {
        let action = ScheduleAction::Webhook {
            path: "/alarms/1".to_string(),
        };
        let json: serde_json::Value = serde_json::to_value(&action).unwrap();
        assert_eq!(json["type"], "webhook");

        let action = ScheduleAction::Job {
            job_name: "DomainNameResolvingJob".to_string(),
            parameters: vec![],
        };
        let json: serde_json::Value = serde_json::to_value(&action).unwrap();
        assert_eq!(json["type"], "job");
    }
}
