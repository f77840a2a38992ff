//! Envoy EDS resources, modeled with the JSON field names Envoy uses on the wire.

use crate::DEFAULT_LB_WEIGHT;
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, SocketAddr};

/// The member set for a single upstream cluster.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterLoadAssignment {
    pub cluster_name: String,
    pub endpoints: Vec<LocalityLbEndpoints>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalityLbEndpoints {
    pub lb_endpoints: Vec<LbEndpoint>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LbEndpoint {
    pub endpoint: Endpoint,

    /// Unset when the endpoint should receive the proxy's default weight.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub load_balancing_weight: Option<u32>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Endpoint {
    pub address: Address,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Address {
    pub socket_address: SocketAddress,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SocketAddress {
    pub protocol: Protocol,
    pub address: IpAddr,
    pub port_value: u16,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Protocol {
    #[default]
    #[serde(rename = "TCP")]
    Tcp,
}

// === impl ClusterLoadAssignment ===

impl ClusterLoadAssignment {
    /// Builds an assignment with all endpoints in a single locality.
    pub fn new(
        cluster_name: impl Into<String>,
        lb_endpoints: impl IntoIterator<Item = LbEndpoint>,
    ) -> Self {
        Self {
            cluster_name: cluster_name.into(),
            endpoints: vec![LocalityLbEndpoints {
                lb_endpoints: lb_endpoints.into_iter().collect(),
            }],
        }
    }

    pub fn lb_endpoints(&self) -> impl Iterator<Item = &LbEndpoint> + '_ {
        self.endpoints.iter().flat_map(|l| l.lb_endpoints.iter())
    }
}

// === impl LbEndpoint ===

impl LbEndpoint {
    /// The weight is only materialized when it differs from the proxy's default.
    pub fn new(addr: SocketAddr, weight: u32) -> Self {
        Self {
            endpoint: Endpoint {
                address: Address {
                    socket_address: SocketAddress {
                        protocol: Protocol::Tcp,
                        address: addr.ip(),
                        port_value: addr.port(),
                    },
                },
            },
            load_balancing_weight: (weight != DEFAULT_LB_WEIGHT).then_some(weight),
        }
    }

    pub fn socket_addr(&self) -> SocketAddr {
        let SocketAddress {
            address,
            port_value,
            ..
        } = self.endpoint.address.socket_address;
        SocketAddr::new(address, port_value)
    }

    pub fn weight(&self) -> u32 {
        self.load_balancing_weight.unwrap_or(DEFAULT_LB_WEIGHT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_weight_is_omitted() {
        let ep = LbEndpoint::new("192.168.183.24:8080".parse().unwrap(), 1);
        assert_eq!(ep.load_balancing_weight, None);
        assert_eq!(ep.weight(), 1);

        let ep = LbEndpoint::new("192.168.183.24:8080".parse().unwrap(), 5);
        assert_eq!(ep.load_balancing_weight, Some(5));
        assert_eq!(ep.weight(), 5);
    }

    #[test]
    fn serializes_envoy_json() {
        let cla = ClusterLoadAssignment::new(
            "default/simple",
            vec![
                LbEndpoint::new("10.0.0.1:8080".parse().unwrap(), 1),
                LbEndpoint::new("10.0.0.2:8080".parse().unwrap(), 10),
            ],
        );
        let json = serde_json::to_value(&cla).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "clusterName": "default/simple",
                "endpoints": [{
                    "lbEndpoints": [
                        {
                            "endpoint": {
                                "address": {
                                    "socketAddress": {
                                        "protocol": "TCP",
                                        "address": "10.0.0.1",
                                        "portValue": 8080,
                                    }
                                }
                            }
                        },
                        {
                            "endpoint": {
                                "address": {
                                    "socketAddress": {
                                        "protocol": "TCP",
                                        "address": "10.0.0.2",
                                        "portValue": 8080,
                                    }
                                }
                            },
                            "loadBalancingWeight": 10,
                        },
                    ]
                }]
            })
        );
    }
}
