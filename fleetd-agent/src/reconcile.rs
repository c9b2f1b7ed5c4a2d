//! Startup reconciliation (§4.H): reconciles the store's view of this node's
//! instances against driver reality, best-effort.

use fleetd_core::instance::InstanceState;
use fleetd_core::{InstanceId, NodeId};
use fleetd_driver::ComputeDriver;
use fleetd_registry::Registry;
use std::collections::HashSet;
use std::sync::Arc;

pub async fn reconcile(registry: &Registry, driver: &Arc<dyn ComputeDriver>, node_id: &NodeId) {
    let store_instances = match registry.list_instances().await {
        Ok(v) => v,
        Err(e) => {
            tracing::warn!(error = %e, "reconciliation: failed to list instances from store");
            return;
        }
    };
    let mine: Vec<_> = store_instances
        .into_iter()
        .filter(|i| i.node_id.as_ref() == Some(node_id))
        .collect();

    let driver_instances = match driver.list().await {
        Ok(v) => v,
        Err(e) => {
            tracing::warn!(error = %e, "reconciliation: failed to list instances from driver");
            return;
        }
    };
    let driver_ids: HashSet<InstanceId> = driver_instances.iter().map(|i| i.id.clone()).collect();
    let store_ids: HashSet<InstanceId> = mine.iter().map(|i| i.id.clone()).collect();

    // Missing from driver: the store thinks this node owns it but the driver
    // has no record — mark it failed.
    for mut instance in mine {
        if !driver_ids.contains(&instance.id) && instance.state != InstanceState::Deleted {
            tracing::warn!(instance_id = %instance.id, "instance missing from driver after restart");
            if instance
                .transition(
                    InstanceState::Failed,
                    Some("lost after restart".to_string()),
                )
                .is_ok()
            {
                if let Err(e) = registry.put_instance(&instance).await {
                    tracing::warn!(error = %e, instance_id = %instance.id, "failed to persist reconciled instance");
                }
            }
        }
    }

    // Missing from store: the driver still has it but the store has
    // forgotten it — delete via driver.
    for instance in driver_instances {
        if !store_ids.contains(&instance.id) {
            tracing::warn!(instance_id = %instance.id, "instance missing from store, deleting via driver");
            if let Err(e) = driver.delete(&instance.id).await {
                tracing::warn!(error = %e, instance_id = %instance.id, "failed to delete orphaned driver instance");
            }
        }
    }
}
