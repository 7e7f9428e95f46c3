//! Load balancing operations for MockCloudClient
//!
//! Handles target groups and network load balancers

use super::{MockCall, MockCloudClient};
use crate::error::CloudError;
use crate::models::*;

pub async fn list_target_groups(client: &MockCloudClient) -> Result<Vec<TargetGroup>, CloudError> {
    client.injected("list_target_groups")?;
    client.record_read();
    let mut groups: Vec<TargetGroup> = client.target_groups.lock().unwrap().values().cloned().collect();
    groups.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(groups)
}

pub async fn get_target_group_by_name(client: &MockCloudClient, name: &str) -> Result<Option<TargetGroup>, CloudError> {
    client.injected("get_target_group_by_name")?;
    client.record_read();
    let mut matches: Vec<TargetGroup> = client
        .target_groups
        .lock()
        .unwrap()
        .values()
        .filter(|tg| tg.name == name)
        .cloned()
        .collect();

    if matches.len() > 1 {
        return Err(CloudError::Ambiguous(format!(
            "{} target groups named {:?} found in folder {}",
            matches.len(),
            name,
            client.folder_id
        )));
    }
    Ok(matches.pop())
}

pub async fn create_target_group(client: &MockCloudClient, request: CreateTargetGroupRequest) -> Result<TargetGroup, CloudError> {
    client.injected("create_target_group")?;
    client.record(MockCall::CreateTargetGroup {
        name: request.name.clone(),
        targets: request.targets.clone(),
    });

    let mut groups = client.target_groups.lock().unwrap();
    if groups.values().any(|tg| tg.name == request.name) {
        return Err(CloudError::AlreadyExists(format!("Target group {} already exists", request.name)));
    }

    let tg = TargetGroup {
        id: client.next_id("enp"),
        folder_id: request.folder_id,
        name: request.name,
        region_id: request.region_id,
        targets: request.targets,
        labels: request.labels,
    };
    groups.insert(tg.id.clone(), tg.clone());
    Ok(tg)
}

pub async fn add_targets(client: &MockCloudClient, target_group_id: &str, targets: Vec<Target>) -> Result<TargetGroup, CloudError> {
    client.injected("add_targets")?;
    client.record(MockCall::AddTargets {
        target_group_id: target_group_id.to_string(),
        targets: targets.clone(),
    });

    let mut groups = client.target_groups.lock().unwrap();
    let tg = groups
        .get_mut(target_group_id)
        .ok_or_else(|| CloudError::NotFound(format!("Target group {} not found", target_group_id)))?;
    for target in targets {
        if !tg.targets.contains(&target) {
            tg.targets.push(target);
        }
    }
    Ok(tg.clone())
}

pub async fn remove_targets(client: &MockCloudClient, target_group_id: &str, targets: Vec<Target>) -> Result<TargetGroup, CloudError> {
    client.injected("remove_targets")?;
    client.record(MockCall::RemoveTargets {
        target_group_id: target_group_id.to_string(),
        targets: targets.clone(),
    });

    let mut groups = client.target_groups.lock().unwrap();
    let tg = groups
        .get_mut(target_group_id)
        .ok_or_else(|| CloudError::NotFound(format!("Target group {} not found", target_group_id)))?;
    tg.targets.retain(|t| !targets.contains(t));
    Ok(tg.clone())
}

pub async fn delete_target_group(client: &MockCloudClient, target_group_id: &str) -> Result<(), CloudError> {
    client.injected("delete_target_group")?;
    client.record(MockCall::DeleteTargetGroup {
        target_group_id: target_group_id.to_string(),
    });
    // Deleting a missing group is a success
    client.target_groups.lock().unwrap().remove(target_group_id);
    Ok(())
}

pub async fn get_load_balancer_by_name(client: &MockCloudClient, name: &str) -> Result<Option<NetworkLoadBalancer>, CloudError> {
    client.injected("get_load_balancer_by_name")?;
    client.record_read();
    let mut matches: Vec<NetworkLoadBalancer> = client
        .load_balancers
        .lock()
        .unwrap()
        .values()
        .filter(|lb| lb.name == name)
        .cloned()
        .collect();

    if matches.len() > 1 {
        return Err(CloudError::Ambiguous(format!(
            "{} network load balancers named {:?} found in folder {}",
            matches.len(),
            name,
            client.folder_id
        )));
    }
    Ok(matches.pop())
}

/// Turn a listener spec into the listener the API would report
fn materialize_listener(client: &MockCloudClient, spec: ListenerSpec) -> Listener {
    let (address, subnet_id, ip_version) = match (spec.external_address_spec, spec.internal_address_spec) {
        (_, Some(internal)) => {
            let address = internal.address.unwrap_or_else(|| {
                let n = client.next_id("").trim_start_matches('0').to_string();
                format!("10.128.0.{}", n)
            });
            (address, internal.subnet_id, internal.ip_version)
        }
        (Some(external), None) => {
            let address = external.address.unwrap_or_else(|| {
                let n = client.next_id("").trim_start_matches('0').to_string();
                format!("203.0.113.{}", n)
            });
            (address, String::new(), external.ip_version)
        }
        (None, None) => (String::new(), String::new(), IpVersion::Ipv4),
    };

    Listener {
        name: spec.name,
        address,
        port: spec.port,
        protocol: spec.protocol,
        target_port: spec.target_port,
        subnet_id,
        ip_version,
    }
}

pub async fn create_load_balancer(client: &MockCloudClient, request: CreateNetworkLoadBalancerRequest) -> Result<NetworkLoadBalancer, CloudError> {
    client.injected("create_load_balancer")?;
    client.record(MockCall::CreateLoadBalancer {
        name: request.name.clone(),
        lb_type: request.lb_type,
    });

    if client.load_balancers.lock().unwrap().values().any(|lb| lb.name == request.name) {
        return Err(CloudError::AlreadyExists(format!("Network load balancer {} already exists", request.name)));
    }

    let listeners = request
        .listener_specs
        .into_iter()
        .map(|spec| materialize_listener(client, spec))
        .collect();
    let lb = NetworkLoadBalancer {
        id: client.next_id("enp"),
        folder_id: request.folder_id,
        name: request.name,
        region_id: request.region_id,
        status: "ACTIVE".to_string(),
        lb_type: request.lb_type,
        listeners,
        attached_target_groups: request.attached_target_groups,
    };
    client.load_balancers.lock().unwrap().insert(lb.id.clone(), lb.clone());
    Ok(lb)
}

pub async fn delete_load_balancer(client: &MockCloudClient, load_balancer_id: &str) -> Result<(), CloudError> {
    client.injected("delete_load_balancer")?;
    client.record(MockCall::DeleteLoadBalancer {
        load_balancer_id: load_balancer_id.to_string(),
    });
    client.load_balancers.lock().unwrap().remove(load_balancer_id);
    Ok(())
}

fn with_load_balancer<F>(client: &MockCloudClient, load_balancer_id: &str, update: F) -> Result<NetworkLoadBalancer, CloudError>
where
    F: FnOnce(&mut NetworkLoadBalancer) -> Result<(), CloudError>,
{
    let mut balancers = client.load_balancers.lock().unwrap();
    let lb = balancers
        .get_mut(load_balancer_id)
        .ok_or_else(|| CloudError::NotFound(format!("Network load balancer {} not found", load_balancer_id)))?;
    update(lb)?;
    Ok(lb.clone())
}

pub async fn add_listener(client: &MockCloudClient, load_balancer_id: &str, listener: ListenerSpec) -> Result<NetworkLoadBalancer, CloudError> {
    client.injected("add_listener")?;
    client.record(MockCall::AddListener {
        load_balancer_id: load_balancer_id.to_string(),
        listener_name: listener.name.clone(),
    });

    let materialized = materialize_listener(client, listener);
    with_load_balancer(client, load_balancer_id, |lb| {
        if lb.listeners.iter().any(|l| l.name == materialized.name) {
            return Err(CloudError::AlreadyExists(format!("Listener {} already exists", materialized.name)));
        }
        lb.listeners.push(materialized);
        Ok(())
    })
}

pub async fn remove_listener(client: &MockCloudClient, load_balancer_id: &str, listener_name: &str) -> Result<NetworkLoadBalancer, CloudError> {
    client.injected("remove_listener")?;
    client.record(MockCall::RemoveListener {
        load_balancer_id: load_balancer_id.to_string(),
        listener_name: listener_name.to_string(),
    });

    with_load_balancer(client, load_balancer_id, |lb| {
        lb.listeners.retain(|l| l.name != listener_name);
        Ok(())
    })
}

pub async fn attach_target_group(client: &MockCloudClient, load_balancer_id: &str, attached: AttachedTargetGroup) -> Result<NetworkLoadBalancer, CloudError> {
    client.injected("attach_target_group")?;
    client.record(MockCall::AttachTargetGroup {
        load_balancer_id: load_balancer_id.to_string(),
        target_group_id: attached.target_group_id.clone(),
    });

    with_load_balancer(client, load_balancer_id, |lb| {
        if lb.attached_target_groups.iter().any(|a| a.target_group_id == attached.target_group_id) {
            return Err(CloudError::AlreadyExists(format!(
                "Target group {} already attached",
                attached.target_group_id
            )));
        }
        lb.attached_target_groups.push(attached);
        Ok(())
    })
}

pub async fn detach_target_group(client: &MockCloudClient, load_balancer_id: &str, target_group_id: &str) -> Result<NetworkLoadBalancer, CloudError> {
    client.injected("detach_target_group")?;
    client.record(MockCall::DetachTargetGroup {
        load_balancer_id: load_balancer_id.to_string(),
        target_group_id: target_group_id.to_string(),
    });

    with_load_balancer(client, load_balancer_id, |lb| {
        lb.attached_target_groups.retain(|a| a.target_group_id != target_group_id);
        Ok(())
    })
}
