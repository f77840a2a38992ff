use ahash::AHashSet as HashSet;
use eds_controller_k8s_api::{EndpointPort, Endpoints};
use std::{
    collections::{BTreeMap, BTreeSet},
    net::{IpAddr, SocketAddr},
};
use tracing::warn;

/// Determines how cluster names are derived from a service.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum ClusterNaming {
    /// `{namespace}/{service}[/{port}]`
    #[default]
    NamespaceQualified,

    /// `{service}[/{port}]`. Services that share a name across namespaces share a cluster.
    NamespaceExcluded,
}

/// An `Endpoints` resource's addresses, grouped by port name.
///
/// Only named ports are kept unless every port in the resource is unnamed, in which case all
/// addresses are held in a single unnamed group.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub(crate) struct PortGroups(BTreeMap<Option<String>, BTreeSet<Member>>);

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) struct Member {
    pub addr: SocketAddr,
    pub node: Option<String>,
}

// === impl ClusterNaming ===

impl ClusterNaming {
    pub fn cluster_name(&self, namespace: &str, service: &str, port: Option<&str>) -> String {
        match (self, port) {
            (Self::NamespaceQualified, None) => format!("{namespace}/{service}"),
            (Self::NamespaceQualified, Some(port)) => format!("{namespace}/{service}/{port}"),
            (Self::NamespaceExcluded, None) => service.to_string(),
            (Self::NamespaceExcluded, Some(port)) => format!("{service}/{port}"),
        }
    }
}

// === impl PortGroups ===

impl PortGroups {
    pub(crate) fn from_endpoints(ep: &Endpoints) -> Self {
        let subsets = ep.subsets.as_deref().unwrap_or_default();

        let port_names = subsets
            .iter()
            .flat_map(|ss| ss.ports.iter().flatten())
            .map(port_name)
            .collect::<HashSet<_>>();
        let unnamed = port_names.len() == 1 && port_names.contains(&None);

        let mut groups = BTreeMap::<Option<String>, BTreeSet<Member>>::new();
        for subset in subsets {
            for port in subset.ports.iter().flatten() {
                let name = port_name(port);
                if name.is_none() && !unnamed {
                    continue;
                }

                let members = groups.entry(name.map(Into::into)).or_default();
                let Ok(port) = u16::try_from(port.port) else {
                    warn!(port = port.port, "Skipping invalid port");
                    continue;
                };
                if port == 0 {
                    warn!("Skipping zero port");
                    continue;
                }

                for addr in subset.addresses.iter().flatten() {
                    match addr.ip.parse::<IpAddr>() {
                        Ok(ip) => {
                            members.insert(Member {
                                addr: SocketAddr::new(ip, port),
                                node: addr.node_name.clone(),
                            });
                        }
                        Err(error) => warn!(%error, ip = %addr.ip, "Skipping invalid address"),
                    }
                }
            }
        }

        Self(groups)
    }

    /// Returns the cluster names this resource contributes to.
    pub(crate) fn cluster_names(
        &self,
        naming: ClusterNaming,
        namespace: &str,
        service: &str,
    ) -> impl Iterator<Item = String> + '_ {
        let namespace = namespace.to_string();
        let service = service.to_string();
        self.0
            .keys()
            .map(move |port| naming.cluster_name(&namespace, &service, port.as_deref()))
    }

    /// Returns the members this resource contributes to the named cluster.
    pub(crate) fn members<'a>(
        &'a self,
        naming: ClusterNaming,
        namespace: &'a str,
        service: &'a str,
        cluster: &'a str,
    ) -> impl Iterator<Item = &'a Member> + 'a {
        self.0
            .iter()
            .filter(move |(port, _)| {
                naming.cluster_name(namespace, service, port.as_deref()) == cluster
            })
            .flat_map(|(_, members)| members.iter())
    }

    pub(crate) fn has_node(&self, node: &str) -> bool {
        self.0
            .values()
            .flatten()
            .any(|m| m.node.as_deref() == Some(node))
    }
}

fn port_name(port: &EndpointPort) -> Option<&str> {
    port.name.as_deref().filter(|n| !n.is_empty())
}
