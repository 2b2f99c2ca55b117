use k8s_openapi::apimachinery::pkg::apis::meta::v1::APIGroupList;
use kube::Client;

use crate::source::watch::ApiFlavor;

const EVENTS_GROUP: &str = "events.k8s.io";
const EVENTS_VERSION: &str = "v1";

/// Asks the API server which event API to read.
///
/// Runs once per process. Any discovery failure falls back to `core/v1`.
pub async fn detect_flavor(client: &Client) -> ApiFlavor {
    match client.list_api_groups().await {
        Ok(groups) => {
            let flavor = flavor_from_groups(&groups);
            tracing::info!(flavor = ?flavor, "selected event API");
            flavor
        }
        Err(e) => {
            tracing::warn!(error = %e, "API group discovery failed; using core/v1 events");
            ApiFlavor::CoreV1
        }
    }
}

pub fn flavor_from_groups(groups: &APIGroupList) -> ApiFlavor {
    let served = groups.groups.iter().any(|g| {
        g.name == EVENTS_GROUP && g.versions.iter().any(|v| v.version == EVENTS_VERSION)
    });

    if served {
        ApiFlavor::EventsV1
    } else {
        ApiFlavor::CoreV1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::{APIGroup, GroupVersionForDiscovery};

    fn group(name: &str, versions: &[&str]) -> APIGroup {
        APIGroup {
            name: name.to_string(),
            versions: versions
                .iter()
                .map(|v| GroupVersionForDiscovery {
                    group_version: format!("{name}/{v}"),
                    version: v.to_string(),
                })
                .collect(),
            ..Default::default()
        }
    }

    #[test]
    fn picks_events_v1_when_served() {
        let groups = APIGroupList {
            groups: vec![group("apps", &["v1"]), group("events.k8s.io", &["v1", "v1beta1"])],
        };
        assert_eq!(flavor_from_groups(&groups), ApiFlavor::EventsV1);
    }

    #[test]
    fn falls_back_without_events_v1() {
        let only_beta = APIGroupList {
            groups: vec![group("events.k8s.io", &["v1beta1"])],
        };
        assert_eq!(flavor_from_groups(&only_beta), ApiFlavor::CoreV1);

        let empty = APIGroupList { groups: vec![] };
        assert_eq!(flavor_from_groups(&empty), ApiFlavor::CoreV1);
    }
}
