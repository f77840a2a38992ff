use eds_controller_core::ClusterLoadAssignment;
use serde::{Deserialize, Serialize};

pub const TYPE_URL: &str = "type.googleapis.com/envoy.api.v2.ClusterLoadAssignment";

/// A client's request for a set of cluster load assignments.
///
/// Fields that Envoy sends but that do not affect the response (such as `node`) are ignored.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DiscoveryRequest {
    /// The version the client last accepted, if any.
    pub version_info: String,

    /// Cluster names to return. When empty, all clusters are returned.
    pub resource_names: Vec<String>,

    /// Defaults to [`TYPE_URL`] when unset.
    pub type_url: String,

    pub response_nonce: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveryResponse {
    pub version_info: String,
    pub resources: Vec<Resource>,
    pub type_url: String,
    pub nonce: String,
}

/// A cluster load assignment, tagged with its type as Envoy expects of an `Any`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resource {
    #[serde(rename = "@type")]
    pub type_url: String,

    #[serde(flatten)]
    pub assignment: ClusterLoadAssignment,
}

// === impl DiscoveryRequest ===

impl DiscoveryRequest {
    pub fn is_wildcard(&self) -> bool {
        self.resource_names.is_empty()
    }

    pub fn type_url(&self) -> &str {
        if self.type_url.is_empty() {
            TYPE_URL
        } else {
            &self.type_url
        }
    }

    pub(crate) fn matches(&self, cla: &ClusterLoadAssignment) -> bool {
        self.is_wildcard() || self.resource_names.contains(&cla.cluster_name)
    }
}

// === impl Resource ===

impl From<ClusterLoadAssignment> for Resource {
    fn from(assignment: ClusterLoadAssignment) -> Self {
        Self {
            type_url: TYPE_URL.to_string(),
            assignment,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use eds_controller_core::LbEndpoint;

    #[test]
    fn parses_envoy_request() {
        let req = serde_json::from_str::<DiscoveryRequest>(
            r#"{
                "versionInfo": "3",
                "node": {"id": "envoy", "cluster": "ingress"},
                "resourceNames": ["default/kuard/foo"],
                "typeUrl": "type.googleapis.com/envoy.api.v2.ClusterLoadAssignment",
                "responseNonce": "7"
            }"#,
        )
        .unwrap();
        assert_eq!(
            req,
            DiscoveryRequest {
                version_info: "3".to_string(),
                resource_names: vec!["default/kuard/foo".to_string()],
                type_url: TYPE_URL.to_string(),
                response_nonce: "7".to_string(),
            }
        );
        assert!(!req.is_wildcard());
    }

    #[test]
    fn empty_request_is_wildcard() {
        let req = serde_json::from_str::<DiscoveryRequest>("{}").unwrap();
        assert!(req.is_wildcard());
        assert_eq!(req.type_url(), TYPE_URL);
    }

    #[test]
    fn resources_are_typed() {
        let cla = ClusterLoadAssignment::new(
            "default/simple",
            Some(LbEndpoint::new("192.168.183.24:8080".parse().unwrap(), 5)),
        );
        let json = serde_json::to_value(Resource::from(cla.clone())).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "@type": TYPE_URL,
                "clusterName": "default/simple",
                "endpoints": [{
                    "lbEndpoints": [{
                        "endpoint": {
                            "address": {
                                "socketAddress": {
                                    "protocol": "TCP",
                                    "address": "192.168.183.24",
                                    "portValue": 8080,
                                }
                            }
                        },
                        "loadBalancingWeight": 5,
                    }]
                }]
            })
        );

        let resource = serde_json::from_value::<Resource>(json).unwrap();
        assert_eq!(resource.assignment, cla);
    }
}
