#![deny(rust_2018_idioms)]
#![forbid(unsafe_code)]

mod event;

pub use self::event::{Event, Kind, ResourceEvent};
pub use k8s_openapi::{
    api::{
        self,
        core::v1::{EndpointAddress, EndpointPort, EndpointSubset, Endpoints, Node},
    },
    apimachinery::pkg::apis::meta::v1::ObjectMeta,
};
pub use kube::ResourceExt;
