use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use kube::api::{ApiResource, DynamicObject, GroupVersionKind, WatchEvent, WatchParams};
use kube::{Api, Client};

use crate::domain::Event;
use crate::errors::{AppError, AppResult};
use crate::source::mapping::{self, MapError};

/// One item read off an open watch.
#[derive(Debug)]
pub enum WatchItem {
    Mapped(Event),
    /// The object was not a usable event. Dropped by the caller.
    Rejected(MapError),
}

/// Items of one watch. An `Err` ends the watch; so does the end of the stream.
pub type WatchStream = BoxStream<'static, AppResult<WatchItem>>;

/// The upstream event API: opens one watch per call.
#[async_trait]
pub trait EventWatch: Send + Sync {
    async fn open(&self) -> AppResult<WatchStream>;
}

/// Which upstream event shape this process reads. Chosen once at startup.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ApiFlavor {
    /// `core/v1` Event.
    CoreV1,
    /// `events.k8s.io/v1` Event.
    EventsV1,
}

impl ApiFlavor {
    pub fn api_resource(self) -> ApiResource {
        let gvk = match self {
            ApiFlavor::CoreV1 => GroupVersionKind::gvk("", "v1", "Event"),
            ApiFlavor::EventsV1 => GroupVersionKind::gvk("events.k8s.io", "v1", "Event"),
        };
        ApiResource::from_gvk_with_plural(&gvk, "events")
    }

    pub fn decode(self, obj: DynamicObject) -> Result<Event, MapError> {
        let value = serde_json::to_value(obj)?;
        let event = match self {
            ApiFlavor::CoreV1 => mapping::map_core_v1(serde_json::from_value(value)?)?,
            ApiFlavor::EventsV1 => mapping::map_events_v1(serde_json::from_value(value)?)?,
        };
        Ok(event)
    }
}

/// Cluster-wide event watch through the Kubernetes API.
pub struct KubeEventWatch {
    client: Client,
    flavor: ApiFlavor,
}

impl KubeEventWatch {
    pub fn new(client: Client, flavor: ApiFlavor) -> Self {
        Self { client, flavor }
    }

    pub fn flavor(&self) -> ApiFlavor {
        self.flavor
    }
}

#[async_trait]
impl EventWatch for KubeEventWatch {
    async fn open(&self) -> AppResult<WatchStream> {
        let ar = self.flavor.api_resource();
        let api: Api<DynamicObject> = Api::all_with(self.client.clone(), &ar);

        let stream = api.watch(&WatchParams::default(), "0").await?;
        let flavor = self.flavor;

        let items = stream.filter_map(move |res| async move {
            match res {
                Ok(WatchEvent::Added(obj))
                | Ok(WatchEvent::Modified(obj))
                | Ok(WatchEvent::Deleted(obj)) => Some(Ok(match flavor.decode(obj) {
                    Ok(ev) => WatchItem::Mapped(ev),
                    Err(e) => WatchItem::Rejected(e),
                })),
                Ok(WatchEvent::Bookmark(_)) => None,
                Ok(WatchEvent::Error(e)) => Some(Err(AppError::Other(format!(
                    "watch error {} ({}): {}",
                    e.code, e.reason, e.message
                )))),
                Err(e) => Some(Err(AppError::Kube(e))),
            }
        });

        Ok(items.boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn dynamic(v: serde_json::Value) -> DynamicObject {
        serde_json::from_value(v).unwrap()
    }

    #[test]
    fn api_resources_point_at_the_right_groups() {
        let core = ApiFlavor::CoreV1.api_resource();
        assert_eq!(core.group, "");
        assert_eq!(core.api_version, "v1");
        assert_eq!(core.plural, "events");

        let current = ApiFlavor::EventsV1.api_resource();
        assert_eq!(current.group, "events.k8s.io");
        assert_eq!(current.api_version, "events.k8s.io/v1");
    }

    #[test]
    fn decodes_core_v1_object() {
        let obj = dynamic(json!({
            "apiVersion": "v1",
            "kind": "Event",
            "metadata": { "name": "e", "namespace": "ns1", "uid": "u1" },
            "message": "hello",
            "type": "Normal",
            "firstTimestamp": "2025-01-02T03:04:05Z",
            "count": 2
        }));

        let ev = ApiFlavor::CoreV1.decode(obj).unwrap();
        assert_eq!(ev.uid(), "u1");
        assert_eq!(ev.namespace(), "ns1");
        assert_eq!(ev.count(), 2);
    }

    #[test]
    fn decodes_events_v1_object() {
        let obj = dynamic(json!({
            "apiVersion": "events.k8s.io/v1",
            "kind": "Event",
            "metadata": { "name": "e", "namespace": "ns1", "uid": "u1" },
            "note": "hello",
            "eventTime": "2025-01-02T03:04:05.000001Z",
            "series": { "count": 4, "lastObservedTime": "2025-01-02T03:05:05.000001Z" }
        }));

        let ev = ApiFlavor::EventsV1.decode(obj).unwrap();
        assert_eq!(ev.message(), "hello");
        assert_eq!(ev.count(), 4);
    }

    #[test]
    fn object_without_uid_is_rejected() {
        let obj = dynamic(json!({
            "apiVersion": "v1",
            "kind": "Event",
            "metadata": { "name": "e" },
            "message": "hello",
            "firstTimestamp": "2025-01-02T03:04:05Z"
        }));

        let err = ApiFlavor::CoreV1.decode(obj).unwrap_err();
        assert!(matches!(err, MapError::Invalid(_)));
    }
}
