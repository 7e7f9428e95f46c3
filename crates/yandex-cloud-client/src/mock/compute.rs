//! Compute operations for MockCloudClient

use super::MockCloudClient;
use crate::error::CloudError;
use crate::models::*;

pub async fn get_instance(client: &MockCloudClient, instance_id: &str) -> Result<Instance, CloudError> {
    client.injected("get_instance")?;
    client.record_read();
    client
        .instances
        .lock()
        .unwrap()
        .get(instance_id)
        .cloned()
        .ok_or_else(|| CloudError::NotFound(format!("Instance {} not found", instance_id)))
}

pub async fn find_instance_by_name(client: &MockCloudClient, name: &str) -> Result<Option<Instance>, CloudError> {
    client.injected("find_instance_by_name")?;
    client.record_read();
    let mut matches: Vec<Instance> = client
        .instances
        .lock()
        .unwrap()
        .values()
        .filter(|instance| instance.name == name)
        .cloned()
        .collect();

    if matches.len() > 1 {
        return Err(CloudError::Ambiguous(format!(
            "{} instances named {:?} found in folder {}",
            matches.len(),
            name,
            client.folder_id
        )));
    }
    Ok(matches.pop())
}
