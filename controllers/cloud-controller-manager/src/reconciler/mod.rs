//! Reconcilers behind the cloud provider capabilities.
//!
//! - `instances`: Node to compute instance resolution and node addresses
//! - `zones`: zone and region lookup
//! - `target_groups`: target group membership derived from Nodes
//! - `load_balancer`: network load balancers for LoadBalancer Services
//! - `routes`: pod CIDR routes in the VPC route table

pub mod instances;
pub mod load_balancer;
pub mod routes;
pub mod target_groups;
#[cfg(test)]
mod target_groups_test;
pub mod zones;
