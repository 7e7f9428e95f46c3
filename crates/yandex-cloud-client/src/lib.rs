//! Yandex Cloud REST API Client
//!
//! A Rust client library for the parts of the Yandex Cloud API a Kubernetes
//! cloud controller manager needs: compute instances, VPC subnets and route
//! tables, network load balancers and target groups.
//!
//! Every mutating call returns a long-running operation; the client waits for
//! it and hands back the finished resource, so callers never see operations.
//!
//! # Example
//!
//! ```no_run
//! use yandex_cloud_client::{CloudApi, Credentials, YandexCloudClient};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = YandexCloudClient::new(
//!     Credentials::IamToken("t1.9euelZ...".to_string()),
//!     "b1gfolder".to_string(),
//!     "ru-central1".to_string(),
//! )?;
//!
//! // Exact-name lookup, `None` when absent
//! if let Some(instance) = client.find_instance_by_name("worker-0").await? {
//!     println!("{} is {:?}", instance.name, instance.status);
//! }
//!
//! // Mutations block until the operation completes
//! let groups = client.list_target_groups().await?;
//! println!("{} target groups", groups.len());
//! # Ok(())
//! # }
//! ```
//!
//! # Features
//!
//! - **Operation waiting**: mutating calls poll `operation.api.cloud.yandex.net`
//! - **Idempotent deletes**: deleting a missing resource succeeds
//! - **Ambiguity detection**: lookups by unique name fail on duplicates
//! - **Pagination**: list calls follow `nextPageToken`
//! - **Metadata credentials**: instance service-account tokens, cached and refreshed

pub mod client;
pub mod common;
pub mod error;
pub mod metadata;
pub mod models;
#[path = "trait.rs"]
pub mod cloud_trait;
#[cfg(feature = "test-util")]
pub mod mock;

pub use client::{Endpoints, YandexCloudClient};
pub use cloud_trait::CloudApi;
pub use common::HttpClient;
pub use common::auth::Credentials;
pub use error::CloudError;
pub use metadata::{InstanceLocation, MetadataClient};
pub use models::*;
#[cfg(feature = "test-util")]
pub use mock::{MockCall, MockCloudClient};
