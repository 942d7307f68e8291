// Copyright (c) FleetWire contributors.
// Licensed under the MIT License.

//! [`RuleEngine`]: the threshold-rule evaluation loop (§4.5). Every `eval_interval`, for each
//! tenant with at least one enabled rule, queries the latest sample per device and opens or
//! closes a [`FleetAlert`] per `(tenant, device, rule)` fingerprint accordingly. No state is
//! carried between iterations beyond what's already in the [`AlertStore`](RelationalStore).

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;

use crate::dispatch::Dispatcher;
use crate::health::HealthCounters;
use crate::model::{AlertRule, AlertStatus, FleetAlert};
use crate::scope::Scope;
use crate::store::{RelationalStore, StoreError, TimeSeriesStore};

/// Compute the fingerprint a rule's alerts for one device share: stable across evaluation
/// rounds, so an open alert for the same `(tenant, device, rule)` is found and updated rather
/// than duplicated.
#[must_use]
pub fn fingerprint(tenant_id: &str, device_id: &str, rule_id: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    tenant_id.hash(&mut hasher);
    device_id.hash(&mut hasher);
    rule_id.hash(&mut hasher);
    hasher.finish()
}

/// Periodic threshold-rule evaluator.
pub struct RuleEngine {
    relational: Arc<dyn RelationalStore>,
    time_series: Arc<dyn TimeSeriesStore>,
    dispatcher: Arc<Dispatcher>,
    health: Arc<HealthCounters>,
    eval_interval: Duration,
    fresh_window: chrono::Duration,
}

impl RuleEngine {
    /// Build an engine evaluating every `eval_interval`. `fresh_window` bounds how stale a
    /// device's latest sample may be before a rule neither opens nor closes for it (default
    /// `3 * eval_interval`, per §4.5's missing-data policy). Every newly opened alert is fanned
    /// out to the tenant's enabled integrations via `dispatcher` before this call returns.
    #[must_use]
    pub fn new(
        relational: Arc<dyn RelationalStore>,
        time_series: Arc<dyn TimeSeriesStore>,
        dispatcher: Arc<Dispatcher>,
        health: Arc<HealthCounters>,
        eval_interval: Duration,
        fresh_window: Duration,
    ) -> Self {
        Self {
            relational,
            time_series,
            dispatcher,
            health,
            eval_interval,
            fresh_window: chrono::Duration::from_std(fresh_window).unwrap_or(chrono::Duration::seconds(45)),
        }
    }

    /// Run the evaluation loop until `cancel` fires.
    pub async fn run(&self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.eval_interval);
        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    log::info!("rule engine stopping");
                    return;
                }
                _ = ticker.tick() => {
                    if let Err(err) = self.evaluate_once().await {
                        log::error!("rule evaluation pass failed: {err}");
                    }
                }
            }
        }
    }

    /// Run exactly one evaluation pass across every active tenant.
    pub async fn evaluate_once(&self) -> Result<(), StoreError> {
        let now = Utc::now();
        let system = Scope::operator(
            "system:rule-engine",
            "evaluate_rules",
            None,
            "internal",
            &crate::audit::AuditLog::new(),
        );
        let tenants = self.relational.list_tenants(&system).await?;

        for tenant in tenants {
            if tenant.status != crate::model::TenantStatus::Active {
                continue;
            }
            let scope = Scope::tenant(tenant.tenant_id.clone());
            let rules = self.relational.list_enabled_rules(&scope).await?;
            for rule in rules {
                self.evaluate_rule(&scope, &rule, now).await?;
            }
        }
        self.health.record_rule_eval_cycle();
        Ok(())
    }

    async fn evaluate_rule(&self, scope: &Scope, rule: &AlertRule, now: DateTime<Utc>) -> Result<(), StoreError> {
        let samples = self
            .time_series
            .query_latest(&rule.tenant_id, None, &[rule.metric_name.clone()], 1)
            .await?;

        for sample in samples {
            if let Some(sites) = &rule.site_filter {
                // Site filtering requires the device registry's siteId; evaluate only against
                // devices that currently carry one of the allowed sites.
                let Ok(Some(device)) = self.relational.get_device(scope, &sample.device_id).await else {
                    continue;
                };
                if !sites.iter().any(|s| s == &device.site_id) {
                    continue;
                }
            }

            if now - sample.ts > self.fresh_window {
                continue; // missing-data policy: stale sample, neither opens nor closes
            }

            let Some(value) = sample.value.as_numeric() else {
                continue;
            };
            let fp = fingerprint(&rule.tenant_id, &sample.device_id, &rule.rule_id);
            let cmp = rule.operator.eval(value, rule.threshold);
            let existing = self.relational.find_active_alert_by_fingerprint(scope, fp).await?;

            match (cmp, existing) {
                (true, None) => {
                    let alert = FleetAlert {
                        alert_id: uuid::Uuid::new_v4().to_string(),
                        tenant_id: rule.tenant_id.clone(),
                        device_id: sample.device_id.clone(),
                        alert_type: "THRESHOLD".to_string(),
                        severity: rule.severity,
                        status: AlertStatus::Open,
                        silenced: false,
                        summary: format!(
                            "{} {:?} {} (value={})",
                            rule.metric_name, rule.operator, rule.threshold, value
                        ),
                        created_at: now,
                        closed_at: None,
                        fingerprint: fp,
                        details: serde_json::json!({
                            "rule": { "ruleId": rule.rule_id, "metricName": rule.metric_name, "threshold": rule.threshold },
                            "observation": { "value": value, "deviceId": sample.device_id, "ts": sample.ts },
                        }),
                    };
                    match self.relational.insert_alert(scope, alert.clone()).await {
                        Ok(()) => {
                            self.health.record_alert_opened();
                            self.fan_out_alert(scope, &alert).await?;
                        }
                        Err(StoreError::Conflict(_)) => {}
                        Err(err) => return Err(err),
                    }
                }
                (false, Some(alert)) if matches!(alert.status, AlertStatus::Open | AlertStatus::Acknowledged) => {
                    self.relational
                        .update_alert_status(scope, &alert.alert_id, AlertStatus::Closed, Some(now))
                        .await?;
                    self.health.record_alert_closed();
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// Enqueue a delivery job for `alert` against every enabled integration in its tenant.
    /// A failure dispatching to one integration doesn't block the others.
    async fn fan_out_alert(&self, scope: &Scope, alert: &FleetAlert) -> Result<(), StoreError> {
        for integration in self.relational.list_enabled_integrations(scope).await? {
            if let Err(err) = self.dispatcher.dispatch_alert(scope, alert, &integration.integration_id).await {
                log::error!("failed to dispatch alert {} to integration {}: {err}", alert.alert_id, integration.integration_id);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{CompareOp, DeviceRegistryRecord, DeviceStatus, Tenant, TenantStatus, TelemetryPoint};
    use crate::store::{MemoryStore, MemoryTimeSeriesStore};
    use fleetwire_protocol::MetricValue;

    async fn engine_with_rule() -> (RuleEngine, Arc<MemoryStore>, Arc<MemoryTimeSeriesStore>) {
        let relational = Arc::new(MemoryStore::new());
        relational.seed_tenant(Tenant {
            tenant_id: "t1".to_string(),
            status: TenantStatus::Active,
        });
        let scope = Scope::tenant("t1");
        relational
            .put_device(
                &scope,
                DeviceRegistryRecord {
                    tenant_id: "t1".to_string(),
                    device_id: "d1".to_string(),
                    site_id: "site-a".to_string(),
                    status: DeviceStatus::Active,
                    provisioning_secret: "secret".to_string(),
                    created_at: Utc::now(),
                    decommissioned_at: None,
                },
            )
            .await
            .unwrap();
        relational
            .put_rule(
                &scope,
                AlertRule {
                    rule_id: "r1".to_string(),
                    tenant_id: "t1".to_string(),
                    name: "high temp".to_string(),
                    metric_name: "temp_c".to_string(),
                    operator: CompareOp::Gt,
                    threshold: 80.0,
                    severity: 3,
                    site_filter: None,
                    enabled: true,
                },
            )
            .await
            .unwrap();

        let time_series = Arc::new(MemoryTimeSeriesStore::new());
        let dispatcher = Arc::new(Dispatcher::new(relational.clone()));
        let engine = RuleEngine::new(
            relational.clone(),
            time_series.clone(),
            dispatcher,
            Arc::new(HealthCounters::new()),
            Duration::from_secs(15),
            Duration::from_secs(45),
        );
        (engine, relational, time_series)
    }

    #[tokio::test]
    async fn opens_alert_when_threshold_breached() {
        let (engine, relational, time_series) = engine_with_rule().await;
        time_series
            .write_batch(vec![TelemetryPoint {
                tenant_id: "t1".to_string(),
                device_id: "d1".to_string(),
                ts: Utc::now(),
                metric_name: "temp_c".to_string(),
                value: MetricValue::Numeric(95.0),
            }])
            .await
            .unwrap();

        engine.evaluate_once().await.unwrap();

        let alerts = relational.list_alerts(&Scope::tenant("t1")).await.unwrap();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].status, AlertStatus::Open);
    }

    #[tokio::test]
    async fn closes_alert_when_threshold_no_longer_breached() {
        let (engine, relational, time_series) = engine_with_rule().await;
        time_series
            .write_batch(vec![TelemetryPoint {
                tenant_id: "t1".to_string(),
                device_id: "d1".to_string(),
                ts: Utc::now(),
                metric_name: "temp_c".to_string(),
                value: MetricValue::Numeric(95.0),
            }])
            .await
            .unwrap();
        engine.evaluate_once().await.unwrap();

        time_series
            .write_batch(vec![TelemetryPoint {
                tenant_id: "t1".to_string(),
                device_id: "d1".to_string(),
                ts: Utc::now(),
                metric_name: "temp_c".to_string(),
                value: MetricValue::Numeric(10.0),
            }])
            .await
            .unwrap();
        engine.evaluate_once().await.unwrap();

        let alerts = relational.list_alerts(&Scope::tenant("t1")).await.unwrap();
        assert_eq!(alerts[0].status, AlertStatus::Closed);
    }

    #[tokio::test]
    async fn nan_sample_is_ignored() {
        let (engine, relational, time_series) = engine_with_rule().await;
        time_series
            .write_batch(vec![TelemetryPoint {
                tenant_id: "t1".to_string(),
                device_id: "d1".to_string(),
                ts: Utc::now(),
                metric_name: "temp_c".to_string(),
                value: MetricValue::Numeric(f64::NAN),
            }])
            .await
            .unwrap();

        engine.evaluate_once().await.unwrap();

        assert!(relational.list_alerts(&Scope::tenant("t1")).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn stale_sample_neither_opens_nor_closes() {
        let (engine, relational, time_series) = engine_with_rule().await;
        time_series
            .write_batch(vec![TelemetryPoint {
                tenant_id: "t1".to_string(),
                device_id: "d1".to_string(),
                ts: Utc::now() - chrono::Duration::seconds(3600),
                metric_name: "temp_c".to_string(),
                value: MetricValue::Numeric(95.0),
            }])
            .await
            .unwrap();

        engine.evaluate_once().await.unwrap();

        assert!(relational.list_alerts(&Scope::tenant("t1")).await.unwrap().is_empty());
    }
}
