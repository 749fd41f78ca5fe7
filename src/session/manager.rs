use super::*;

use std::sync::Weak;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

impl SessionPool {
    /// Creates a pool that opens sessions over SSH.
    pub fn new(config: SshConfig) -> Result<Self, ConnectError> {
        Self::with_connector(config, Arc::new(SshConnector))
    }

    /// Creates a pool that opens sessions through `connector`.
    pub fn with_connector(
        config: SshConfig,
        connector: Arc<dyn Connector>,
    ) -> Result<Self, ConnectError> {
        config.validate()?;
        Ok(Self {
            connector,
            config: Arc::new(config),
            sessions: RwLock::new(HashMap::new()),
            key_locks: RwLock::new(HashMap::new()),
        })
    }

    pub fn config(&self) -> &SshConfig {
        &self.config
    }

    /// Runs `commands` on `target` and returns the output framed by the first command.
    pub async fn run(&self, target: &Target, commands: &[String]) -> Result<String, ConnectError> {
        let key = target.session_key();
        self.acquire_and_use(target, &key, commands).await
    }

    /// Gets or creates the session for `key` and runs `commands` on it.
    ///
    /// The whole sequence holds the key's mutex, so concurrent calls for the
    /// same key are strictly serialized and share one connection.
    pub async fn acquire_and_use(
        &self,
        target: &Target,
        key: &SessionKey,
        commands: &[String],
    ) -> Result<String, ConnectError> {
        if commands.is_empty() {
            return Err(ConnectError::EmptyCommandBatch);
        }

        let key_lock = self.key_lock(key).await;
        let _guard = key_lock.lock().await;

        let session = self.checkout(target, key).await?;
        let output = session.execute(commands).await;
        session.touch();
        Ok(output)
    }

    /// Returns a live session for `key`, replacing a cached one that fails its probe.
    ///
    /// Caller must hold the key's mutex.
    async fn checkout(
        &self,
        target: &Target,
        key: &SessionKey,
    ) -> Result<Arc<ShellSession>, ConnectError> {
        let cached = self.sessions.read().await.get(key).cloned();
        if let Some(session) = cached {
            if session.probe().await {
                debug!("Cache hit: {}", key);
                session.touch();
                return Ok(session);
            }
            debug!("Cached session {} failed liveness probe. Replacing.", key);
            self.sessions.write().await.remove(key);
            session.close().await;
        } else {
            debug!("Cache miss, creating new session for {}...", key);
        }

        let session = ShellSession::open(self.connector.as_ref(), target, self.config.clone())
            .await
            .inspect_err(|e| warn!("{} Failed to open session: {}", key, e))?;
        let family = session.initialize(target.family).await;
        session.touch();

        let session = Arc::new(session);
        self.sessions
            .write()
            .await
            .insert(key.clone(), session.clone());
        debug!("New session for {} ({}) has been cached.", key, family);
        Ok(session)
    }

    /// Per-key mutex, created on first use and kept for the pool's lifetime.
    async fn key_lock(&self, key: &SessionKey) -> Arc<Mutex<()>> {
        let existing = self.key_locks.read().await.get(key).cloned();
        if let Some(lock) = existing {
            return lock;
        }
        let mut locks = self.key_locks.write().await;
        locks
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Closes and evicts every session unused for longer than the idle timeout.
    ///
    /// A session whose key mutex is held by an in-flight call is skipped and
    /// reconsidered on the next sweep. Returns the evicted keys.
    pub async fn sweep_idle(&self) -> Vec<SessionKey> {
        let idle_timeout = self.config.idle_timeout();
        let mut evicted = Vec::new();
        {
            let mut sessions = self.sessions.write().await;
            let locks = self.key_locks.read().await;
            sessions.retain(|key, session| {
                let idle = session.idle_for();
                if idle <= idle_timeout {
                    return true;
                }
                if locks.get(key).is_some_and(|lock| lock.try_lock().is_err()) {
                    debug!("Idle session {} is in use, skipping eviction", key);
                    return true;
                }
                debug!("Evicting session {}, unused for {:?}", key, idle);
                evicted.push((key.clone(), session.clone()));
                false
            });
        }

        let mut keys = Vec::with_capacity(evicted.len());
        for (key, session) in evicted {
            session.close().await;
            keys.push(key);
        }
        keys
    }

    /// Starts the periodic idle sweep.
    ///
    /// The task holds only a weak reference and stops once the pool is dropped.
    pub fn spawn_idle_sweep(self: &Arc<Self>) -> JoinHandle<()> {
        let pool: Weak<Self> = Arc::downgrade(self);
        let period = self.config.sweep_interval();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(pool) = pool.upgrade() else {
                    debug!("Session pool dropped, stopping idle sweep");
                    break;
                };
                let evicted = pool.sweep_idle().await;
                if !evicted.is_empty() {
                    debug!("Idle sweep evicted {} session(s)", evicted.len());
                }
            }
        })
    }

    /// Whether a session is currently cached for `key`.
    pub async fn contains(&self, key: &SessionKey) -> bool {
        self.sessions.read().await.contains_key(key)
    }

    /// Number of cached sessions.
    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    /// Memoized family of the cached session for `key`.
    pub async fn cached_family(&self, key: &SessionKey) -> Option<DeviceFamily> {
        self.sessions
            .read()
            .await
            .get(key)
            .and_then(|session| session.family())
    }

    /// Closes every cached session, waiting for in-flight calls on each key to finish.
    pub async fn close_all(&self) {
        let keys: Vec<SessionKey> = self.sessions.read().await.keys().cloned().collect();
        for key in keys {
            let key_lock = self.key_lock(&key).await;
            let _guard = key_lock.lock().await;
            let removed = self.sessions.write().await.remove(&key);
            if let Some(session) = removed {
                session.close().await;
            }
        }
    }
}
