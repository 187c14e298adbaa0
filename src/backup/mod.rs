use anyhow::Result;
use std::collections::HashMap;
use std::sync::Arc;

use crate::db::{NotFoundError, Store};
use crate::models::*;

/// Baseline refers to a backup taken from a different device
#[derive(Debug, thiserror::Error)]
#[error("backup {backup_id} belongs to device {owner}, not {device_id}")]
pub struct BaselineMismatch {
    pub backup_id: i64,
    pub device_id: i64,
    pub owner: i64,
}

/// Backup service: manual saves, baselines and deviation checks.
/// Dispatched jobs write their own backups through the store.
pub struct BackupService {
    store: Store,
}

impl BackupService {
    pub fn new(store: Store) -> Arc<Self> {
        Arc::new(Self { store })
    }

    /// Store externally captured output against a device (id or hostname)
    pub async fn save_manual(&self, req: &SaveBackupRequest) -> Result<Backup> {
        let device = self
            .store
            .resolve_device(&req.device)
            .await?
            .ok_or_else(|| NotFoundError::new("Device", &req.device))?;

        let backup = self
            .store
            .save_backup(&NewBackup {
                device_id: device.id,
                device_name: device.hostname.clone(),
                job_id: None,
                command: req.command.clone(),
                method: req.method.clone(),
                content: req.content.clone(),
            })
            .await?;

        tracing::info!("Saved manual backup {} for {} ({} bytes)", backup.id, device.hostname, backup.size);
        if let Err(e) = self
            .store
            .log_event(event_type::RETRIEVAL, &format!("Manual backup saved for {}", device.hostname))
            .await
        {
            tracing::warn!("Failed to record backup event: {}", e);
        }
        Ok(backup)
    }

    pub async fn set_baseline(&self, device_id: i64, backup_id: i64) -> Result<Baseline> {
        let device = self
            .store
            .get_device(device_id)
            .await?
            .ok_or_else(|| NotFoundError::new("Device", &device_id.to_string()))?;
        let backup = self
            .store
            .get_backup(backup_id)
            .await?
            .ok_or_else(|| NotFoundError::new("Backup", &backup_id.to_string()))?;

        if backup.device_id != device.id {
            return Err(BaselineMismatch {
                backup_id,
                device_id,
                owner: backup.device_id,
            }
            .into());
        }

        let baseline = self.store.set_baseline(device_id, backup_id).await?;
        tracing::info!("Baseline for {} set to backup {}", device.hostname, backup_id);
        Ok(baseline)
    }

    /// Compare a backup with its device's baseline.
    /// Warn and critical results land in the device's deviation history.
    pub async fn check_deviation(&self, backup_id: i64) -> Result<DeviationReport> {
        let backup = self
            .store
            .get_backup(backup_id)
            .await?
            .ok_or_else(|| NotFoundError::new("Backup", &backup_id.to_string()))?;

        let baseline = match self.store.get_baseline(backup.device_id).await? {
            Some(b) => self.store.get_backup(b.backup_id).await?,
            None => None,
        };

        let Some(baseline) = baseline else {
            return Ok(DeviationReport {
                backup_id,
                device_id: backup.device_id,
                baseline_backup_id: None,
                has_baseline: false,
                added: Vec::new(),
                removed: Vec::new(),
                severity: Severity::Info,
            });
        };

        let (added, removed) = diff_lines(&baseline.content, &backup.content);
        let severity = classify(added.iter().chain(removed.iter()).map(String::as_str));
        if !added.is_empty() || !removed.is_empty() {
            tracing::debug!(
                "Backup {} deviates from baseline {}: +{} -{} ({:?})",
                backup_id,
                baseline.id,
                added.len(),
                removed.len(),
                severity
            );
        }

        let report = DeviationReport {
            backup_id,
            device_id: backup.device_id,
            baseline_backup_id: Some(baseline.id),
            has_baseline: true,
            added,
            removed,
            severity,
        };

        if report.severity > Severity::Info && self.store.record_deviation(&report, baseline.id).await? {
            tracing::info!(
                "Recorded {} deviation for {} (backup {} vs baseline {})",
                report.severity.as_str(),
                backup.device_name,
                backup_id,
                baseline.id
            );
        }
        Ok(report)
    }

    /// Recorded deviations for a device, newest first
    pub async fn deviation_history(&self, device_id: i64, limit: i64) -> Result<Vec<DeviationEvent>> {
        if self.store.get_device(device_id).await?.is_none() {
            return Err(NotFoundError::new("Device", &device_id.to_string()).into());
        }
        self.store.list_deviations(device_id, limit).await
    }
}

/// Lines that carry no configuration: separators and banners printed by `show run`
fn is_noise(line: &str) -> bool {
    line.is_empty()
        || line == "!"
        || line == "end"
        || line.starts_with("Building configuration")
        || line.starts_with("Current configuration")
        || line.starts_with("[MOCK]")
}

fn config_lines(content: &str) -> impl Iterator<Item = &str> {
    content.lines().map(str::trim).filter(|l| !is_noise(l))
}

/// Multiset line diff: (added in `current`, removed from `baseline`), each in
/// the order it appears.
pub fn diff_lines(baseline: &str, current: &str) -> (Vec<String>, Vec<String>) {
    let mut remaining: HashMap<&str, usize> = HashMap::new();
    for line in config_lines(baseline) {
        *remaining.entry(line).or_insert(0) += 1;
    }

    let mut added = Vec::new();
    for line in config_lines(current) {
        match remaining.get_mut(line) {
            Some(n) if *n > 0 => *n -= 1,
            _ => added.push(line.to_string()),
        }
    }

    let mut removed = Vec::new();
    for line in config_lines(baseline) {
        if let Some(n) = remaining.get_mut(line) {
            if *n > 0 {
                *n -= 1;
                removed.push(line.to_string());
            }
        }
    }

    (added, removed)
}

const CRITICAL_MARKERS: &[&str] = &["interface ", "access-list", "ip access", "acl ", "route-map"];
const WARN_MARKERS: &[&str] = &["hostname", "banner"];

/// Worst severity among the changed lines
pub fn classify<'a>(changed: impl Iterator<Item = &'a str>) -> Severity {
    changed
        .map(|line| {
            let line = line.to_lowercase();
            if CRITICAL_MARKERS.iter().any(|m| line.contains(m)) {
                Severity::Critical
            } else if WARN_MARKERS.iter().any(|m| line.contains(m)) {
                Severity::Warn
            } else {
                Severity::Info
            }
        })
        .max()
        .unwrap_or(Severity::Info)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::temp_store;

    fn manual(device: &str, content: &str) -> SaveBackupRequest {
        SaveBackupRequest {
            device: device.to_string(),
            command: "show running-config".to_string(),
            method: "manual".to_string(),
            content: content.to_string(),
        }
    }

    #[test]
    fn test_diff_lines_is_multiset() {
        let baseline = "Building configuration...\n!\nhostname R1\nlogging host 10.0.0.1\nlogging host 10.0.0.1\nend";
        let current = "hostname R1\nlogging host 10.0.0.1\nntp server 10.0.0.2\n";
        let (added, removed) = diff_lines(baseline, current);
        assert_eq!(added, vec!["ntp server 10.0.0.2"]);
        assert_eq!(removed, vec!["logging host 10.0.0.1"]);
    }

    #[test]
    fn test_classify() {
        assert_eq!(classify(std::iter::empty()), Severity::Info);
        assert_eq!(classify(["ntp server 1.1.1.1"].into_iter()), Severity::Info);
        assert_eq!(classify(["hostname R9", "ntp server 1.1.1.1"].into_iter()), Severity::Warn);
        assert_eq!(
            classify(["banner motd ^hi^", "ip access-list extended MGMT"].into_iter()),
            Severity::Critical
        );
        assert_eq!(classify(["Interface Gi0/1"].into_iter()), Severity::Critical);
    }

    #[tokio::test]
    async fn test_manual_save_resolves_hostname() {
        let (store, _dir) = temp_store().await;
        let service = BackupService::new(store.clone());

        let backup = service.save_manual(&manual("R16", "hostname R16")).await.unwrap();
        assert_eq!(backup.device_id, 2);
        assert_eq!(backup.method, "manual");
        assert!(backup.job_id.is_none());

        let err = service.save_manual(&manual("R99", "x")).await.unwrap_err();
        assert!(err.downcast_ref::<NotFoundError>().is_some());
    }

    #[tokio::test]
    async fn test_deviation_against_baseline() {
        let (store, _dir) = temp_store().await;
        let service = BackupService::new(store.clone());

        let base = service
            .save_manual(&manual("1", "hostname R15\ninterface Gi0/1\n ip address 10.0.0.1 255.255.255.0"))
            .await
            .unwrap();

        let report = service.check_deviation(base.id).await.unwrap();
        assert!(!report.has_baseline);
        assert_eq!(report.severity, Severity::Info);

        service.set_baseline(1, base.id).await.unwrap();

        let same = service.save_manual(&manual("1", &base.content)).await.unwrap();
        let report = service.check_deviation(same.id).await.unwrap();
        assert!(report.has_baseline);
        assert!(report.added.is_empty() && report.removed.is_empty());

        let changed = service
            .save_manual(&manual("1", "hostname R15-core\ninterface Gi0/1\n ip address 10.0.0.1 255.255.255.0"))
            .await
            .unwrap();
        let report = service.check_deviation(changed.id).await.unwrap();
        assert_eq!(report.baseline_backup_id, Some(base.id));
        assert_eq!(report.added, vec!["hostname R15-core"]);
        assert_eq!(report.removed, vec!["hostname R15"]);
        assert_eq!(report.severity, Severity::Warn);
    }

    #[tokio::test]
    async fn test_deviation_history_skips_info_and_repeats() {
        let (store, _dir) = temp_store().await;
        let service = BackupService::new(store.clone());

        let base = service.save_manual(&manual("R19", "hostname R19\nntp server 10.0.0.2")).await.unwrap();
        service.set_baseline(5, base.id).await.unwrap();

        let ntp = service.save_manual(&manual("R19", "hostname R19\nntp server 10.0.0.3")).await.unwrap();
        assert_eq!(service.check_deviation(ntp.id).await.unwrap().severity, Severity::Info);

        let acl = service
            .save_manual(&manual("R19", "hostname R19\nntp server 10.0.0.2\nip access-list standard MGMT"))
            .await
            .unwrap();
        let report = service.check_deviation(acl.id).await.unwrap();
        assert_eq!(report.severity, Severity::Critical);
        service.check_deviation(acl.id).await.unwrap();

        let renamed = service.save_manual(&manual("R19", "hostname R19-edge\nntp server 10.0.0.2")).await.unwrap();
        service.check_deviation(renamed.id).await.unwrap();

        let history = service.deviation_history(5, 50).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].backup_id, renamed.id);
        assert_eq!(history[0].severity, Severity::Warn);
        assert_eq!((history[0].added, history[0].removed), (1, 1));
        assert_eq!(history[1].backup_id, acl.id);
        assert_eq!(history[1].baseline_backup_id, base.id);
        assert_eq!((history[1].added, history[1].removed), (1, 0));

        assert!(service.deviation_history(1, 50).await.unwrap().is_empty());
        let err = service.deviation_history(404, 50).await.unwrap_err();
        assert!(err.downcast_ref::<NotFoundError>().is_some());
    }

    #[tokio::test]
    async fn test_baseline_must_belong_to_device() {
        let (store, _dir) = temp_store().await;
        let service = BackupService::new(store.clone());
        let other = service.save_manual(&manual("R17", "hostname R17")).await.unwrap();

        let err = service.set_baseline(1, other.id).await.unwrap_err();
        assert!(err.downcast_ref::<BaselineMismatch>().is_some());

        let err = service.set_baseline(1, 9999).await.unwrap_err();
        assert!(err.downcast_ref::<NotFoundError>().is_some());
    }
}
