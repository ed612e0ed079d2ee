//! Resource kinds built on the shared reconciler.

pub mod gateway;
pub mod kubernetes;

pub use gateway::{FqdnProxyObserved, GatewayFqdnProxy, GatewayNameProxy, NameProxyObserved};
pub use kubernetes::{ClusterNode, ClusterNodeObserved, KubernetesCluster, KubernetesObserved};
