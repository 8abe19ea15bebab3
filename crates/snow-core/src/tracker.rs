// Copyright (c) 2024-2026 Snow Contributors
//
// SPDX-License-Identifier: Apache-2.0
//! Process-wide observable registry of running sub-agents.
//!
//! Each instance carries two inbound queues — user injections and messages
//! from sibling agents — which the sub-agent loop drains at iteration
//! boundaries.  Results of agents spawned *by* sub-agents land in the
//! spawned-results queue for the main loop to inject between tool rounds.
//!
//! The snapshot list is rebuilt on every mutation so observers can hold a
//! consistent `Vec` between changes; change notifications go out over a
//! watch channel carrying a version counter.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

/// Public view of one running instance.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunningAgentInfo {
    /// Unique per spawn.  Instances spawned by other sub-agents get a
    /// `spawn-` prefix; `wait_for_spawned_agents` keys off it.
    pub instance_id: String,
    /// The agent type (config id).
    pub agent_id: String,
    pub name: String,
    pub prompt: String,
    pub started_at: DateTime<Utc>,
}

/// A message sent from one running agent to another.
#[derive(Debug, Clone)]
pub struct InterAgentMessage {
    pub from_instance: String,
    pub from_agent_id: String,
    pub content: String,
}

/// The outcome of a sub-agent spawned by another sub-agent, buffered until
/// the main loop drains it.
#[derive(Debug, Clone)]
pub struct SpawnedResult {
    pub instance_id: String,
    pub agent_id: String,
    pub name: String,
    pub result: String,
}

struct InstanceState {
    info: RunningAgentInfo,
    user_queue: VecDeque<String>,
    inter_agent_queue: VecDeque<InterAgentMessage>,
}

#[derive(Default)]
struct TrackerInner {
    instances: HashMap<String, InstanceState>,
    /// Registration order, for stable listings and first-instance lookup.
    order: Vec<String>,
    spawned_results: VecDeque<SpawnedResult>,
}

pub struct RunningAgentTracker {
    inner: Mutex<TrackerInner>,
    version_tx: tokio::sync::watch::Sender<u64>,
}

impl Default for RunningAgentTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl RunningAgentTracker {
    pub fn new() -> Self {
        let (version_tx, _) = tokio::sync::watch::channel(0);
        Self {
            inner: Mutex::new(TrackerInner::default()),
            version_tx,
        }
    }

    fn bump(&self) {
        self.version_tx.send_modify(|v| *v += 1);
    }

    pub fn register(&self, info: RunningAgentInfo) {
        let mut inner = self.inner.lock().expect("tracker lock");
        inner.order.push(info.instance_id.clone());
        inner.instances.insert(
            info.instance_id.clone(),
            InstanceState {
                info,
                user_queue: VecDeque::new(),
                inter_agent_queue: VecDeque::new(),
            },
        );
        drop(inner);
        self.bump();
    }

    pub fn unregister(&self, instance_id: &str) {
        let mut inner = self.inner.lock().expect("tracker lock");
        inner.instances.remove(instance_id);
        inner.order.retain(|id| id != instance_id);
        drop(inner);
        self.bump();
    }

    /// Snapshot of all running instances, in registration order.
    pub fn list(&self) -> Vec<RunningAgentInfo> {
        let inner = self.inner.lock().expect("tracker lock");
        inner
            .order
            .iter()
            .filter_map(|id| inner.instances.get(id))
            .map(|s| s.info.clone())
            .collect()
    }

    pub fn count(&self) -> usize {
        self.inner.lock().expect("tracker lock").instances.len()
    }

    /// Change notifications: the receiver observes a bumped version after
    /// every register/unregister.
    pub fn subscribe(&self) -> tokio::sync::watch::Receiver<u64> {
        self.version_tx.subscribe()
    }

    /// Queue a user injection for a specific instance.
    pub fn enqueue_user_message(&self, instance_id: &str, content: impl Into<String>) -> bool {
        let mut inner = self.inner.lock().expect("tracker lock");
        match inner.instances.get_mut(instance_id) {
            Some(s) => {
                s.user_queue.push_back(content.into());
                true
            }
            None => false,
        }
    }

    /// Deliver a message to the first running instance of `target_agent_id`.
    /// Observed by the target only at its next iteration boundary.
    pub fn enqueue_inter_agent(
        &self,
        target_agent_id: &str,
        message: InterAgentMessage,
    ) -> Result<String, String> {
        let mut inner = self.inner.lock().expect("tracker lock");
        let target_instance = inner
            .order
            .iter()
            .find(|id| {
                inner
                    .instances
                    .get(*id)
                    .map(|s| s.info.agent_id == target_agent_id)
                    .unwrap_or(false)
            })
            .cloned();
        match target_instance {
            Some(id) => {
                inner
                    .instances
                    .get_mut(&id)
                    .expect("instance present")
                    .inter_agent_queue
                    .push_back(message);
                Ok(id)
            }
            None => Err(format!("no running instance of agent '{target_agent_id}'")),
        }
    }

    pub fn drain_user_messages(&self, instance_id: &str) -> Vec<String> {
        let mut inner = self.inner.lock().expect("tracker lock");
        inner
            .instances
            .get_mut(instance_id)
            .map(|s| s.user_queue.drain(..).collect())
            .unwrap_or_default()
    }

    pub fn drain_inter_agent(&self, instance_id: &str) -> Vec<InterAgentMessage> {
        let mut inner = self.inner.lock().expect("tracker lock");
        inner
            .instances
            .get_mut(instance_id)
            .map(|s| s.inter_agent_queue.drain(..).collect())
            .unwrap_or_default()
    }

    pub fn push_spawned_result(&self, result: SpawnedResult) {
        self.inner
            .lock()
            .expect("tracker lock")
            .spawned_results
            .push_back(result);
        self.bump();
    }

    pub fn drain_spawned_results(&self) -> Vec<SpawnedResult> {
        self.inner
            .lock()
            .expect("tracker lock")
            .spawned_results
            .drain(..)
            .collect()
    }

    fn has_spawn_instances(&self) -> bool {
        self.inner
            .lock()
            .expect("tracker lock")
            .instances
            .keys()
            .any(|id| id.starts_with("spawn-"))
    }

    /// Resolve once no `spawn-*` instances remain, the timeout elapses, or
    /// `cancel` fires.  Returns true when the queue actually drained.
    pub async fn wait_for_spawned_agents(
        &self,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> bool {
        if !self.has_spawn_instances() {
            return true;
        }
        let mut rx = self.subscribe();
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return false,
                _ = tokio::time::sleep_until(deadline) => return !self.has_spawn_instances(),
                changed = rx.changed() => {
                    if changed.is_err() {
                        return !self.has_spawn_instances();
                    }
                    if !self.has_spawn_instances() {
                        return true;
                    }
                }
            }
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn info(instance: &str, agent: &str) -> RunningAgentInfo {
        RunningAgentInfo {
            instance_id: instance.into(),
            agent_id: agent.into(),
            name: agent.into(),
            prompt: "task".into(),
            started_at: Utc::now(),
        }
    }

    #[test]
    fn register_list_unregister() {
        let t = RunningAgentTracker::new();
        t.register(info("i1", "agent_plan"));
        t.register(info("i2", "agent_code"));
        assert_eq!(t.count(), 2);
        let list = t.list();
        assert_eq!(list[0].instance_id, "i1");
        assert_eq!(list[1].instance_id, "i2");

        t.unregister("i1");
        assert_eq!(t.count(), 1);
        assert_eq!(t.list()[0].instance_id, "i2");
    }

    #[test]
    fn user_messages_queue_in_order() {
        let t = RunningAgentTracker::new();
        t.register(info("i1", "a"));
        assert!(t.enqueue_user_message("i1", "first"));
        assert!(t.enqueue_user_message("i1", "second"));
        assert_eq!(t.drain_user_messages("i1"), vec!["first", "second"]);
        assert!(t.drain_user_messages("i1").is_empty(), "drain empties");
    }

    #[test]
    fn enqueue_to_unknown_instance_fails() {
        let t = RunningAgentTracker::new();
        assert!(!t.enqueue_user_message("ghost", "x"));
    }

    #[test]
    fn inter_agent_targets_first_instance_of_type() {
        let t = RunningAgentTracker::new();
        t.register(info("i1", "agent_plan"));
        t.register(info("i2", "agent_plan"));
        let target = t
            .enqueue_inter_agent(
                "agent_plan",
                InterAgentMessage {
                    from_instance: "i9".into(),
                    from_agent_id: "agent_code".into(),
                    content: "hello".into(),
                },
            )
            .unwrap();
        assert_eq!(target, "i1", "first registered instance wins");
        assert_eq!(t.drain_inter_agent("i1").len(), 1);
        assert!(t.drain_inter_agent("i2").is_empty());
    }

    #[test]
    fn inter_agent_without_target_errors() {
        let t = RunningAgentTracker::new();
        let err = t
            .enqueue_inter_agent(
                "missing",
                InterAgentMessage {
                    from_instance: "x".into(),
                    from_agent_id: "y".into(),
                    content: "z".into(),
                },
            )
            .unwrap_err();
        assert!(err.contains("missing"));
    }

    #[test]
    fn spawned_results_drain_in_order() {
        let t = RunningAgentTracker::new();
        t.push_spawned_result(SpawnedResult {
            instance_id: "spawn-1".into(),
            agent_id: "a".into(),
            name: "A".into(),
            result: "r1".into(),
        });
        t.push_spawned_result(SpawnedResult {
            instance_id: "spawn-2".into(),
            agent_id: "b".into(),
            name: "B".into(),
            result: "r2".into(),
        });
        let drained = t.drain_spawned_results();
        assert_eq!(drained.len(), 2);
        assert_eq!(drained[0].result, "r1");
        assert!(t.drain_spawned_results().is_empty());
    }

    #[tokio::test]
    async fn subscribe_observes_mutations() {
        let t = RunningAgentTracker::new();
        let mut rx = t.subscribe();
        let before = *rx.borrow();
        t.register(info("i1", "a"));
        rx.changed().await.unwrap();
        assert!(*rx.borrow() > before);
    }

    #[tokio::test]
    async fn wait_resolves_immediately_without_spawn_instances() {
        let t = RunningAgentTracker::new();
        t.register(info("i1", "a")); // not spawn-prefixed
        assert!(
            t.wait_for_spawned_agents(Duration::from_millis(50), &CancellationToken::new())
                .await
        );
    }

    #[tokio::test]
    async fn wait_resolves_when_spawn_instance_unregisters() {
        let t = std::sync::Arc::new(RunningAgentTracker::new());
        t.register(info("spawn-i1", "a"));
        let t2 = std::sync::Arc::clone(&t);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            t2.unregister("spawn-i1");
        });
        assert!(
            t.wait_for_spawned_agents(Duration::from_secs(5), &CancellationToken::new())
                .await
        );
    }

    #[tokio::test]
    async fn wait_times_out_when_spawn_instance_remains() {
        let t = RunningAgentTracker::new();
        t.register(info("spawn-stuck", "a"));
        let resolved = t
            .wait_for_spawned_agents(Duration::from_millis(50), &CancellationToken::new())
            .await;
        assert!(!resolved);
    }

    #[tokio::test]
    async fn wait_honours_cancellation() {
        let t = RunningAgentTracker::new();
        t.register(info("spawn-stuck", "a"));
        let cancel = CancellationToken::new();
        cancel.cancel();
        assert!(!t.wait_for_spawned_agents(Duration::from_secs(5), &cancel).await);
    }
}
