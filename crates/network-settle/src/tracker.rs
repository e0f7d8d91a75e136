//! In-flight request bookkeeping. Pure state: callers pass the clock in.

use std::collections::HashMap;
use std::time::Duration;

use tokio::time::Instant;

use crate::events::{NetworkEvent, ResourceType};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RequestMeta {
    pub url: String,
    pub started_at: Instant,
}

/// What an event did to the in-flight set.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Transition {
    /// A request entered the set; any pending quiet timer must be cancelled.
    Started,
    /// A request left the set. `idle` is true when the set is now empty.
    Completed { idle: bool },
    Ignored,
}

#[derive(Debug, Default)]
pub struct InflightTracker {
    inflight: HashMap<String, RequestMeta>,
    doc_by_frame: HashMap<String, String>,
}

impl InflightTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.inflight.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inflight.is_empty()
    }

    pub fn contains(&self, request_id: &str) -> bool {
        self.inflight.contains_key(request_id)
    }

    pub fn document_request(&self, frame_id: &str) -> Option<&str> {
        self.doc_by_frame.get(frame_id).map(String::as_str)
    }

    pub fn apply(&mut self, event: NetworkEvent, now: Instant) -> Transition {
        match event {
            NetworkEvent::RequestWillBeSent {
                request_id,
                url,
                resource_type,
                frame_id,
            } => self.on_request(request_id, url, resource_type, frame_id, now),
            NetworkEvent::LoadingFinished { request_id }
            | NetworkEvent::LoadingFailed { request_id }
            | NetworkEvent::RequestServedFromCache { request_id } => self.finish(&request_id),
            NetworkEvent::ResponseReceived { request_id, url } => {
                self.on_response(&request_id, &url)
            }
            NetworkEvent::FrameStoppedLoading { frame_id } => self.on_frame_stopped(&frame_id),
        }
    }

    pub fn on_request(
        &mut self,
        request_id: String,
        url: String,
        resource_type: Option<ResourceType>,
        frame_id: Option<String>,
        now: Instant,
    ) -> Transition {
        if resource_type.as_ref().is_some_and(ResourceType::is_streaming) {
            return Transition::Ignored;
        }
        if resource_type == Some(ResourceType::Document) {
            if let Some(frame) = frame_id {
                self.doc_by_frame.insert(frame, request_id.clone());
            }
        }
        self.inflight.insert(
            request_id,
            RequestMeta {
                url,
                started_at: now,
            },
        );
        Transition::Started
    }

    /// Synthetic `data:` resources may never report `loadingFinished`.
    pub fn on_response(&mut self, request_id: &str, url: &str) -> Transition {
        if url.starts_with("data:") {
            self.finish(request_id)
        } else {
            Transition::Ignored
        }
    }

    pub fn on_frame_stopped(&mut self, frame_id: &str) -> Transition {
        match self.doc_by_frame.get(frame_id).cloned() {
            Some(request_id) => self.finish(&request_id),
            None => Transition::Ignored,
        }
    }

    pub fn finish(&mut self, request_id: &str) -> Transition {
        if self.inflight.remove(request_id).is_none() {
            return Transition::Ignored;
        }
        self.doc_by_frame.retain(|_, req| req != request_id);
        Transition::Completed {
            idle: self.inflight.is_empty(),
        }
    }

    /// Removes every request in flight for at least `threshold`.
    pub fn sweep_stalled(&mut self, now: Instant, threshold: Duration) -> Vec<(String, RequestMeta)> {
        let stalled: Vec<String> = self
            .inflight
            .iter()
            .filter(|(_, meta)| now.saturating_duration_since(meta.started_at) >= threshold)
            .map(|(id, _)| id.clone())
            .collect();

        stalled
            .into_iter()
            .filter_map(|id| {
                let meta = self.inflight.remove(&id)?;
                self.doc_by_frame.retain(|_, req| *req != id);
                Some((id, meta))
            })
            .collect()
    }

    pub fn outstanding(&self) -> Vec<(&str, &RequestMeta)> {
        self.inflight
            .iter()
            .map(|(id, meta)| (id.as_str(), meta))
            .collect()
    }
}
