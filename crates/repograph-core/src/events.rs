//! Push notifications for job transitions and progress milestones.
//!
//! Delivery is at-least-once and unordered across subscribers that lag;
//! `get_status` is the reconciling source of truth.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast::{self, Sender};

use crate::models::{Coverage, GraphVersionId, JobId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Milestone {
    CrawlingDone,
    ParsingDone,
    MappingDone,
    GraphBuilt,
    InferenceDone,
}

impl Milestone {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CrawlingDone => "crawling_done",
            Self::ParsingDone => "parsing_done",
            Self::MappingDone => "mapping_done",
            Self::GraphBuilt => "graph_built",
            Self::InferenceDone => "inference_done",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobEvent {
    Queued {
        job_id: JobId,
        repo_ref: String,
        at: DateTime<Utc>,
    },
    Started {
        job_id: JobId,
        attempt: u32,
        at: DateTime<Utc>,
    },
    Progress {
        job_id: JobId,
        milestone: Milestone,
        progress_fraction: f64,
        at: DateTime<Utc>,
    },
    Retrying {
        job_id: JobId,
        attempt_count: u32,
        reason: String,
        at: DateTime<Utc>,
    },
    Completed {
        job_id: JobId,
        graph_version: GraphVersionId,
        coverage: Coverage,
        at: DateTime<Utc>,
    },
    Failed {
        job_id: JobId,
        attempt_count: u32,
        reason: String,
        at: DateTime<Utc>,
    },
}

impl JobEvent {
    pub fn job_id(&self) -> &str {
        match self {
            Self::Queued { job_id, .. }
            | Self::Started { job_id, .. }
            | Self::Progress { job_id, .. }
            | Self::Retrying { job_id, .. }
            | Self::Completed { job_id, .. }
            | Self::Failed { job_id, .. } => job_id,
        }
    }
}

#[derive(Clone, Debug)]
pub struct EventBus {
    sender: Sender<JobEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(1024);
        Self { sender }
    }

    pub fn send(&self, event: JobEvent) {
        if let Err(err) = self.sender.send(event) {
            // No subscribers attached.
            tracing::trace!(job_id = err.0.job_id(), "dropping job event");
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
