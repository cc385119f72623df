//! The embeddable facade: a [`Service`] manages many concurrently running
//! [`Session`]s, each one driving a single chromium instance's
//! interception pipeline end to end (§4.8).

use std::sync::Arc;

use dashmap::DashMap;
use futures::FutureExt;
use tokio_util::sync::CancellationToken;

use crate::action_executor::ActionExecutor;
use crate::cdp::target::list_targets;
use crate::cdp::{fetch, network};
use crate::error::{SessionError, SessionResult};
use crate::event_dispatcher::EventDispatcher;
use crate::handler::Handler;
use crate::interceptor_loop;
use crate::model::{NetworkEvent, RuleConfig, SessionConfig, SessionId, TargetId};
use crate::pending::PendingPool;
use crate::regex_cache::RegexCache;
use crate::rule_engine::{RuleEngine, StatsSnapshot};
use crate::target_manager::TargetManager;
use crate::worker_pool::WorkerPool;

/// One chromium instance's interception pipeline: its own rule engine,
/// pending pool, worker pool and set of attached targets (§3, §4.8).
pub struct Session {
    id: SessionId,
    devtools_url: String,
    rule_engine: Arc<RuleEngine>,
    handler: Arc<Handler>,
    dispatcher: Arc<EventDispatcher>,
    pool: Arc<WorkerPool>,
    targets: Arc<TargetManager>,
    cancel: CancellationToken,
}

impl Session {
    /// Probe `devtools_url` (§4.8's connectivity check), wire up the
    /// pipeline, and start the worker pool and the orphan sweep ticker.
    /// Does not attach to any target itself — call `attach_target` for
    /// that.
    pub async fn start(id: SessionId, devtools_url: String, config: SessionConfig) -> SessionResult<Arc<Self>> {
        let config = config.with_defaults();
        list_targets(&devtools_url)
            .await
            .map_err(|err| SessionError::DevToolsUnreachable(err.to_string()))?;

        let regex_cache = Arc::new(RegexCache::new());
        let rule_engine = Arc::new(RuleEngine::new(Arc::clone(&regex_cache)));
        let action_executor = Arc::new(ActionExecutor::new(Arc::clone(&regex_cache)));
        let pending = Arc::new(PendingPool::new());
        let dispatcher = Arc::new(EventDispatcher::new(config.pending_capacity));
        let pool = Arc::new(WorkerPool::new(config.concurrency as isize, Some(config.pending_capacity)));
        pool.start();
        let targets = Arc::new(TargetManager::new());

        let handler = Arc::new(Handler::new(
            Some(Arc::clone(&rule_engine)),
            action_executor,
            Arc::clone(&pending),
            Arc::clone(&dispatcher),
            id.clone(),
            config.body_size_threshold,
            config.process_timeout,
        ));

        let cancel = CancellationToken::new();
        let session = Arc::new(Self {
            id,
            devtools_url,
            rule_engine,
            handler,
            dispatcher,
            pool,
            targets,
            cancel: cancel.clone(),
        });

        spawn_orphan_sweep(pending, cancel);
        Ok(session)
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn load_rules(&self, config: RuleConfig) {
        self.rule_engine.update(config);
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.rule_engine.get_stats()
    }

    /// Attach to `target_id` (or the first page target when `None`),
    /// enable the `Network`/`Fetch` domains, and spawn its interceptor
    /// loop. Idempotent: re-attaching an already-attached target returns
    /// the same `TargetId` without enabling the domains or spawning a
    /// second loop (§4.7).
    pub async fn attach_target(&self, target_id: Option<&str>) -> SessionResult<TargetId> {
        let target = self
            .targets
            .attach_target(&self.devtools_url, target_id, &self.cancel)
            .await?;

        if let Some(events) = target.take_events().await {
            target
                .client
                .execute(network::EnableParams::default())
                .await
                .map_err(SessionError::Transport)?;
            target
                .client
                .execute(fetch::EnableParams::default())
                .await
                .map_err(SessionError::Transport)?;

            interceptor_loop::spawn_loop(
                target.client.clone(),
                target.target_id.clone(),
                events,
                Arc::clone(&self.handler),
                Arc::clone(&self.pool),
                Arc::clone(&self.targets),
                target.cancel.clone(),
            );
        }

        Ok(target.target_id.clone())
    }

    /// Best-effort `Fetch.disable` then drop the target from the registry
    /// (§4.7, §4.8).
    pub async fn detach_target(&self, target_id: &TargetId) {
        if let Some(target) = self.targets.get(target_id) {
            if let Err(err) = target.client.execute(fetch::DisableParams::default()).await {
                tracing::warn!(%err, %target_id, "Fetch.disable failed during detach");
            }
        }
        self.targets.detach_target(target_id);
    }

    pub fn subscribe_events(&self) -> futures::channel::mpsc::Receiver<NetworkEvent> {
        self.dispatcher.subscribe()
    }

    pub fn attached_target_count(&self) -> usize {
        self.targets.len()
    }

    /// Cancel every attached target's loop, stop the worker pool, and best
    /// effort disable `Fetch` on each one (§4.8). Takes `&self` so it can
    /// be driven from a `Service::stop_session` that still needs the
    /// `Arc` afterwards to drop it from the registry.
    pub async fn stop(&self) {
        for target in self.targets.all() {
            if let Err(err) = target.client.execute(fetch::DisableParams::default()).await {
                tracing::warn!(%err, target_id = %target.target_id, "Fetch.disable failed during session stop");
            }
            self.targets.detach_target(&target.target_id);
        }
        self.pool.stop();
        self.cancel.cancel();
    }
}

fn spawn_orphan_sweep(pending: Arc<PendingPool>, cancel: CancellationToken) {
    crate::spawn::spawn(async move {
        loop {
            let sleep = crate::timer::sleep(crate::pending::SWEEP_INTERVAL);
            futures::pin_mut!(sleep);
            futures::select! {
                _ = cancel.cancelled().fuse() => break,
                _ = sleep.fuse() => {
                    let removed = pending.sweep_orphans();
                    if removed > 0 {
                        tracing::debug!(removed, "swept orphaned pending requests");
                    }
                }
            }
        }
    });
}

/// Multi-session facade: the crate's top-level embeddable entry point
/// (§4.8). Each `SessionId` maps to an independently running `Session`.
#[derive(Default)]
pub struct Service {
    sessions: DashMap<SessionId, Arc<Session>>,
}

impl Service {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn start_session(&self, id: SessionId, devtools_url: String, config: SessionConfig) -> SessionResult<()> {
        let session = Session::start(id.clone(), devtools_url, config).await?;
        self.sessions.insert(id, session);
        Ok(())
    }

    pub async fn stop_session(&self, id: &SessionId) -> SessionResult<()> {
        let (_, session) = self
            .sessions
            .remove(id)
            .ok_or_else(|| SessionError::SessionNotFound(id.clone()))?;
        session.stop().await;
        Ok(())
    }

    pub fn session(&self, id: &SessionId) -> SessionResult<Arc<Session>> {
        self.sessions
            .get(id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| SessionError::SessionNotFound(id.clone()))
    }

    pub fn load_rules(&self, id: &SessionId, config: RuleConfig) -> SessionResult<()> {
        self.session(id)?.load_rules(config);
        Ok(())
    }

    pub async fn attach_target(&self, id: &SessionId, target_id: Option<&str>) -> SessionResult<TargetId> {
        self.session(id)?.attach_target(target_id).await
    }

    pub async fn detach_target(&self, id: &SessionId, target_id: &TargetId) -> SessionResult<()> {
        self.session(id)?.detach_target(target_id).await;
        Ok(())
    }

    pub fn subscribe_events(&self, id: &SessionId) -> SessionResult<futures::channel::mpsc::Receiver<NetworkEvent>> {
        Ok(self.session(id)?.subscribe_events())
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }
}
