//! Decoding of the CDP events the settle watcher reacts to.

use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

/// CDP `Network.ResourceType` values the watcher treats specially.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ResourceType {
    Document,
    WebSocket,
    EventSource,
    Other(String),
}

impl ResourceType {
    pub fn parse(raw: &str) -> Self {
        match raw {
            "Document" => Self::Document,
            "WebSocket" => Self::WebSocket,
            "EventSource" => Self::EventSource,
            other => Self::Other(other.to_string()),
        }
    }

    /// Long-lived streams never finish, so they never count as in flight.
    pub fn is_streaming(&self) -> bool {
        matches!(self, Self::WebSocket | Self::EventSource)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum NetworkEvent {
    RequestWillBeSent {
        request_id: String,
        url: String,
        resource_type: Option<ResourceType>,
        frame_id: Option<String>,
    },
    LoadingFinished {
        request_id: String,
    },
    LoadingFailed {
        request_id: String,
    },
    RequestServedFromCache {
        request_id: String,
    },
    ResponseReceived {
        request_id: String,
        url: String,
    },
    FrameStoppedLoading {
        frame_id: String,
    },
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RequestWillBeSentParams {
    request_id: String,
    request: UrlHolder,
    #[serde(rename = "type", default)]
    resource_type: Option<String>,
    #[serde(default)]
    frame_id: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RequestIdParams {
    request_id: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResponseReceivedParams {
    request_id: String,
    response: UrlHolder,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct FrameParams {
    frame_id: String,
}

#[derive(Deserialize)]
struct UrlHolder {
    #[serde(default)]
    url: String,
}

impl NetworkEvent {
    /// Decodes a raw CDP event. Unrelated methods and malformed payloads yield `None`.
    pub fn from_cdp(method: &str, params: &Value) -> Option<Self> {
        let decoded = match method {
            "Network.requestWillBeSent" => {
                RequestWillBeSentParams::deserialize(params).map(|p| Self::RequestWillBeSent {
                    request_id: p.request_id,
                    url: p.request.url,
                    resource_type: p.resource_type.as_deref().map(ResourceType::parse),
                    frame_id: p.frame_id,
                })
            }
            "Network.loadingFinished" => RequestIdParams::deserialize(params)
                .map(|p| Self::LoadingFinished { request_id: p.request_id }),
            "Network.loadingFailed" => RequestIdParams::deserialize(params)
                .map(|p| Self::LoadingFailed { request_id: p.request_id }),
            "Network.requestServedFromCache" => RequestIdParams::deserialize(params)
                .map(|p| Self::RequestServedFromCache { request_id: p.request_id }),
            "Network.responseReceived" => {
                ResponseReceivedParams::deserialize(params).map(|p| Self::ResponseReceived {
                    request_id: p.request_id,
                    url: p.response.url,
                })
            }
            "Page.frameStoppedLoading" => FrameParams::deserialize(params)
                .map(|p| Self::FrameStoppedLoading { frame_id: p.frame_id }),
            _ => return None,
        };

        match decoded {
            Ok(event) => Some(event),
            Err(err) => {
                debug!(target: "network-settle", method, %err, "skipping malformed network event");
                None
            }
        }
    }
}
