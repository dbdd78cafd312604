//! The `Scheduler` trait (spec §4.C "cron scheduling") and its two
//! implementations. `LocalScheduler` parses 5-field cron expressions with
//! the `cron` crate and ticks once a second off a `ScheduledThreadPool`,
//! enqueueing onto whatever `Queue` it was built with. `RemoteScheduler`
//! defers to an external event service, consistent with `RemoteQueue`.

use std::str::FromStr;
use std::sync::{Arc, Mutex};
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::Utc;
use cron::Schedule;
use scheduled_thread_pool::ScheduledThreadPool;

use crate::error::JobError;
use crate::job::ScheduleRule;
use crate::queue::Queue;

#[async_trait]
pub trait Scheduler: Send + Sync {
    async fn register(&self, rule: ScheduleRule) -> Result<(), JobError>;
    async fn list(&self) -> Result<Vec<ScheduleRule>, JobError>;
    async fn unregister(&self, rule_id: &str) -> Result<(), JobError>;
}

struct Registered {
    rule: ScheduleRule,
    schedule: Schedule,
    last_fired: Option<chrono::DateTime<Utc>>,
}

struct Inner {
    rules: Mutex<Vec<Registered>>,
    queue: Arc<dyn Queue>,
}

/// Owns its own 1-second tick; every tick it checks each registered rule's
/// `cron::Schedule` for a fire time since it last fired and enqueues onto
/// the backing `Queue` when one is due.
pub struct LocalScheduler {
    inner: Arc<Inner>,
    _pool: Arc<ScheduledThreadPool>,
}

impl LocalScheduler {
    pub fn new(queue: Arc<dyn Queue>) -> Self {
        let inner = Arc::new(Inner {
            rules: Mutex::new(Vec::new()),
            queue,
        });
        let pool = Arc::new(ScheduledThreadPool::new(1));
        let tick_inner = inner.clone();
        pool.execute_at_fixed_rate(
            StdDuration::from_secs(1),
            StdDuration::from_secs(1),
            move || tick(&tick_inner),
        );
        Self { inner, _pool: pool }
    }
}

fn tick(inner: &Arc<Inner>) {
    let now = Utc::now();
    let mut rules = inner.rules.lock().unwrap();
    for reg in rules.iter_mut() {
        if !reg.rule.enabled {
            continue;
        }
        let since = reg.last_fired.unwrap_or(now - chrono::Duration::seconds(2));
        if let Some(next) = reg.schedule.after(&since).take(1).next() {
            if next <= now {
                reg.last_fired = Some(now);
                let queue = inner.queue.clone();
                let job_type = reg.rule.job_type;
                let payload = reg.rule.payload.clone();
                tokio::spawn(async move {
                    let _ = queue
                        .enqueue(job_type, payload, crate::job::EnqueueOptions::default())
                        .await;
                });
            }
        }
    }
}

#[async_trait]
impl Scheduler for LocalScheduler {
    async fn register(&self, rule: ScheduleRule) -> Result<(), JobError> {
        let schedule = Schedule::from_str(&rule.cron)
            .map_err(|e| JobError::InvalidPayload(format!("bad cron expression: {}", e)))?;
        let mut rules = self.inner.rules.lock().unwrap();
        rules.retain(|r| r.rule.id != rule.id);
        rules.push(Registered {
            rule,
            schedule,
            last_fired: None,
        });
        Ok(())
    }

    async fn list(&self) -> Result<Vec<ScheduleRule>, JobError> {
        Ok(self
            .inner
            .rules
            .lock()
            .unwrap()
            .iter()
            .map(|r| r.rule.clone())
            .collect())
    }

    async fn unregister(&self, rule_id: &str) -> Result<(), JobError> {
        self.inner.rules.lock().unwrap().retain(|r| r.rule.id != rule_id);
        Ok(())
    }
}

/// Defers scheduling to an external event service. `list()` is a documented
/// stub (spec §4.C notes the remote scheduler's registry lives outside this
/// process) — it returns whatever the service reports without caching.
pub struct RemoteScheduler {
    client: reqwest::Client,
    base_url: String,
}

impl RemoteScheduler {
    pub fn new(base_url: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url,
        }
    }
}

#[async_trait]
impl Scheduler for RemoteScheduler {
    async fn register(&self, rule: ScheduleRule) -> Result<(), JobError> {
        let resp = self
            .client
            .post(format!("{}/schedules", self.base_url))
            .json(&rule)
            .send()
            .await
            .map_err(|e| JobError::QueueUnavailable(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(JobError::QueueUnavailable(format!(
                "scheduler service returned {}",
                resp.status()
            )));
        }
        Ok(())
    }

    async fn list(&self) -> Result<Vec<ScheduleRule>, JobError> {
        let resp = self
            .client
            .get(format!("{}/schedules", self.base_url))
            .send()
            .await
            .map_err(|e| JobError::QueueUnavailable(e.to_string()))?;
        resp.json::<Vec<ScheduleRule>>()
            .await
            .map_err(|e| JobError::QueueUnavailable(e.to_string()))
    }

    async fn unregister(&self, rule_id: &str) -> Result<(), JobError> {
        let resp = self
            .client
            .delete(format!("{}/schedules/{}", self.base_url, rule_id))
            .send()
            .await
            .map_err(|e| JobError::QueueUnavailable(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(JobError::QueueUnavailable(format!(
                "scheduler service returned {}",
                resp.status()
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::job::JobType;
    use crate::queue::LocalQueue;

    #[tokio::test]
    async fn register_rejects_malformed_cron() {
        let queue: Arc<dyn Queue> = Arc::new(LocalQueue::new());
        let scheduler = LocalScheduler::new(queue);
        let result = scheduler
            .register(ScheduleRule {
                id: "bad".into(),
                cron: "not a cron expression".into(),
                job_type: JobType::HealthCheck,
                payload: serde_json::json!({}),
                enabled: true,
            })
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn register_then_list_round_trips_the_rule() {
        let queue: Arc<dyn Queue> = Arc::new(LocalQueue::new());
        let scheduler = LocalScheduler::new(queue);
        scheduler
            .register(ScheduleRule {
                id: "every-minute".into(),
                cron: "0 * * * * *".into(),
                job_type: JobType::HealthCheck,
                payload: serde_json::json!({}),
                enabled: true,
            })
            .await
            .unwrap();
        let rules = scheduler.list().await.unwrap();
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].id, "every-minute");
    }
}
