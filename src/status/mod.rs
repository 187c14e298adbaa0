use futures::future::join_all;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::time::{interval, Duration};

use crate::adapters::Connector;
use crate::db::{NotFoundError, Store};
use crate::models::{device_status, event_type, Connectivity, Device, DeviceFilter};
use crate::ws::Hub;

/// Status checker periodically probes each device's management port
pub struct StatusChecker {
    store: Store,
    connector: Arc<dyn Connector>,
    ws_hub: Option<Arc<Hub>>,
    interval: Duration,
    stop_tx: Option<tokio::sync::oneshot::Sender<()>>,
}

impl StatusChecker {
    pub fn new(store: Store, connector: Arc<dyn Connector>, ws_hub: Option<Arc<Hub>>, interval: Duration) -> Self {
        Self {
            store,
            connector,
            ws_hub,
            interval,
            stop_tx: None,
        }
    }

    /// Start the status checker
    pub fn start(&mut self) {
        let (stop_tx, mut stop_rx) = tokio::sync::oneshot::channel();
        self.stop_tx = Some(stop_tx);

        let store = self.store.clone();
        let connector = self.connector.clone();
        let ws_hub = self.ws_hub.clone();
        let period = self.interval;

        tokio::spawn(async move {
            let mut ticker = interval(period);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = check_all_devices(&store, connector.as_ref(), ws_hub.as_deref()).await {
                            tracing::warn!("Error checking device status: {}", e);
                        }
                    }
                    _ = &mut stop_rx => {
                        tracing::info!("Status checker stopped");
                        break;
                    }
                }
            }
        });
    }

    /// Stop the status checker
    pub fn stop(&mut self) {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
    }
}

/// Probe every device once; returns how many changed status
pub(crate) async fn check_all_devices(store: &Store, connector: &dyn Connector, ws_hub: Option<&Hub>) -> anyhow::Result<usize> {
    let devices = store.list_devices(&DeviceFilter::default()).await?;
    let probes = join_all(devices.iter().map(|d| connector.probe(d))).await;

    let mut changed = 0;
    for (device, is_reachable) in devices.iter().zip(probes) {
        let new_status = if is_reachable { device_status::ONLINE } else { device_status::OFFLINE };

        // Online devices are rewritten every pass to refresh last_seen
        if device.status == new_status && !is_reachable {
            continue;
        }
        match apply_status(store, device, new_status, ws_hub).await {
            Ok(true) => changed += 1,
            Ok(false) => {}
            Err(e) => tracing::warn!("Failed to update status for {}: {}", device.hostname, e),
        }
    }

    Ok(changed)
}

/// Write `new_status`; a transition is logged and broadcast. Returns whether the status changed.
async fn apply_status(store: &Store, device: &Device, new_status: &str, ws_hub: Option<&Hub>) -> anyhow::Result<bool> {
    store.update_device_status(device.id, new_status).await?;
    if device.status == new_status {
        return Ok(false);
    }

    tracing::info!("Device {} is now {}", device.hostname, new_status);
    if let Err(e) = store
        .log_event(event_type::STATUS, &format!("{} changed from {} to {}", device.hostname, device.status, new_status))
        .await
    {
        tracing::warn!("Failed to record status event: {}", e);
    }
    if let Some(hub) = ws_hub {
        hub.broadcast_device_status(device.id, &device.hostname, new_status).await;
    }
    Ok(true)
}

/// Manual status override. Unchanged statuses are left untouched.
/// The next status pass replaces the override with what it observes.
pub(crate) async fn override_status(store: &Store, device_id: i64, status: &str, ws_hub: Option<&Hub>) -> anyhow::Result<Device> {
    let device = store
        .get_device(device_id)
        .await?
        .ok_or_else(|| NotFoundError::new("Device", &device_id.to_string()))?;
    if device.status == status {
        return Ok(device);
    }

    apply_status(store, &device, status, ws_hub).await?;
    store
        .get_device(device_id)
        .await?
        .ok_or_else(|| NotFoundError::new("Device", &device_id.to_string()).into())
}

/// Reachability of the named devices (ids or hostnames), or of every device when `names` is None.
/// Stored statuses are not touched.
pub(crate) async fn connectivity_report(
    store: &Store,
    connector: &dyn Connector,
    names: Option<Vec<String>>,
) -> anyhow::Result<BTreeMap<String, Connectivity>> {
    let targets: Vec<(String, Option<Device>)> = match names {
        Some(names) => {
            let mut targets = Vec::with_capacity(names.len());
            for name in names {
                let device = store.resolve_device(&name).await?;
                targets.push((name, device));
            }
            targets
        }
        None => store
            .list_devices(&DeviceFilter::default())
            .await?
            .into_iter()
            .map(|d| (d.hostname.clone(), Some(d)))
            .collect(),
    };

    let reachable = join_all(targets.iter().map(|(_, device)| async move {
        match device {
            Some(d) => Some(connector.probe(d).await),
            None => None,
        }
    }))
    .await;

    let results = targets
        .into_iter()
        .zip(reachable)
        .map(|((name, _), reachable)| {
            let result = match reachable {
                Some(true) => Connectivity {
                    status: device_status::ONLINE.to_string(),
                    error: None,
                },
                Some(false) => Connectivity {
                    status: device_status::OFFLINE.to_string(),
                    error: Some("management port unreachable".to_string()),
                },
                None => Connectivity {
                    status: device_status::UNKNOWN.to_string(),
                    error: Some("device not in inventory".to_string()),
                },
            };
            (name, result)
        })
        .collect();
    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::simulated::SimulatedConnector;
    use crate::db::temp_store;

    #[tokio::test]
    async fn test_status_transitions_are_logged_once() {
        let (store, _dir) = temp_store().await;
        let lab = SimulatedConnector::default();
        lab.set_unreachable("R18", true);

        // Every seeded device starts as unknown
        assert_eq!(check_all_devices(&store, &lab, None).await.unwrap(), 6);
        assert_eq!(check_all_devices(&store, &lab, None).await.unwrap(), 0);

        let r18 = store.get_device(4).await.unwrap().unwrap();
        assert_eq!(r18.status, device_status::OFFLINE);
        assert!(r18.last_seen.is_none());
        let r15 = store.get_device(1).await.unwrap().unwrap();
        assert_eq!(r15.status, device_status::ONLINE);
        assert!(r15.last_seen.is_some());

        lab.set_unreachable("R18", false);
        assert_eq!(check_all_devices(&store, &lab, None).await.unwrap(), 1);

        let events = store.list_events(50).await.unwrap();
        assert_eq!(events.iter().filter(|e| e.event_type == event_type::STATUS).count(), 7);
    }

    #[tokio::test]
    async fn test_status_override_logs_only_changes() {
        let (store, _dir) = temp_store().await;

        let device = override_status(&store, 2, device_status::OFFLINE, None).await.unwrap();
        assert_eq!(device.status, device_status::OFFLINE);
        let device = override_status(&store, 2, device_status::OFFLINE, None).await.unwrap();
        assert_eq!(device.status, device_status::OFFLINE);

        let events = store.list_events(50).await.unwrap();
        let status_events: Vec<_> = events.iter().filter(|e| e.event_type == event_type::STATUS).collect();
        assert_eq!(status_events.len(), 1);
        assert_eq!(status_events[0].message, "R16 changed from unknown to offline");

        let err = override_status(&store, 404, device_status::ONLINE, None).await.unwrap_err();
        assert!(err.downcast_ref::<NotFoundError>().is_some());
    }

    #[tokio::test]
    async fn test_connectivity_report_by_name() {
        let (store, _dir) = temp_store().await;
        let lab = SimulatedConnector::default();
        lab.set_unreachable("R18", true);

        let names = vec!["R15".to_string(), "4".to_string(), "R99".to_string()];
        let report = connectivity_report(&store, &lab, Some(names)).await.unwrap();
        assert_eq!(report.len(), 3);
        assert_eq!(report["R15"].status, device_status::ONLINE);
        assert!(report["R15"].error.is_none());
        assert_eq!(report["4"].status, device_status::OFFLINE);
        assert_eq!(report["R99"].status, device_status::UNKNOWN);
        assert_eq!(report["R99"].error.as_deref(), Some("device not in inventory"));

        let all = connectivity_report(&store, &lab, None).await.unwrap();
        assert_eq!(all.len(), 6);
        assert_eq!(all.values().filter(|c| c.status == device_status::ONLINE).count(), 5);

        // Reporting does not rewrite stored status
        let r18 = store.get_device(4).await.unwrap().unwrap();
        assert_eq!(r18.status, device_status::UNKNOWN);
    }
}
