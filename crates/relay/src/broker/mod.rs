// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Session exchange broker: one actor task per domain.
//!
//! The actor exclusively owns the domain's [`SessionStore`] and its
//! [`WaiterRegistry`]; everything else talks to it through a bounded
//! command channel via [`BrokerHandle`]. The expiry sweep runs on a timer
//! inside the same loop, so it never overlaps itself or a mutation.
//!
//! Resolution is split around the actor: the handle is claimed, the
//! identity resolver and token issuer run on the caller's task, and the
//! result is committed (or the claim released) back on the actor. Upstream
//! latency for one session therefore never stalls another.

pub mod registry;
pub mod waiters;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::config::MAX_DURATION_SECS;
use crate::error::BrokerError;
use crate::identity::{Identity, Resolvers};
use crate::session::store::SessionStore;
use crate::session::{epoch_ms, generate_handle, Method, SessionRecord};
use crate::token::TokenIssuer;

use self::waiters::{Wake, WaiterRegistry};

/// Timing and capacity knobs for a broker actor.
#[derive(Debug, Clone)]
pub struct BrokerSettings {
    /// Records older than this are deleted by the sweep.
    pub session_ttl: Duration,
    pub sweep_interval: Duration,
    /// Upper bound on a single `await_token` call.
    pub await_timeout: Duration,
    /// Command channel capacity.
    pub mailbox: usize,
}

impl Default for BrokerSettings {
    fn default() -> Self {
        Self {
            session_ttl: Duration::from_secs(3600),
            sweep_interval: Duration::from_secs(3600),
            await_timeout: Duration::from_secs(600),
            mailbox: 256,
        }
    }
}

/// Evidence presented to [`BrokerHandle::resolve`].
pub enum Proof {
    /// Authorization code returned by the identity provider.
    ProviderCode(String),
    /// Campus credentials, checked against the portal during resolution.
    CampusPassword { username: String, password: String },
    /// Campus username already verified by the caller.
    CampusVerified { username: String },
}

impl std::fmt::Debug for Proof {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ProviderCode(_) => f.write_str("ProviderCode(..)"),
            Self::CampusPassword { username, .. } => {
                f.debug_struct("CampusPassword").field("username", username).finish_non_exhaustive()
            }
            Self::CampusVerified { username } => {
                f.debug_struct("CampusVerified").field("username", username).finish()
            }
        }
    }
}

/// Outcome of a successful resolution, carrying what the HTTP layer needs to route.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub token: String,
    pub method: Method,
    pub context: Option<String>,
}

/// Result of [`BrokerHandle::await_token`]. A timeout is not an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AwaitOutcome {
    Token(String),
    Pending,
}

/// Read-only view of a session, without its token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionView {
    pub handle: String,
    pub method: Method,
    pub context: Option<String>,
    pub resolved: bool,
    #[serde(rename = "age_secs", serialize_with = "as_secs")]
    pub age: Duration,
}

fn as_secs<S: serde::Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u64(d.as_secs())
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BrokerStats {
    pub sessions: usize,
    pub waiters: usize,
}

enum Claim {
    /// Already resolved; replay the stored result.
    Resolved(Resolution),
    /// Claim granted; the caller must commit or release.
    Granted { method: Method },
}

enum Watch {
    Ready(String),
    Parked { waiter: u64, rx: oneshot::Receiver<Wake> },
}

type Reply<T> = oneshot::Sender<Result<T, BrokerError>>;

enum Command {
    Begin { method: Method, context: Option<String>, reply: Reply<String> },
    Claim { handle: String, reply: Reply<Claim> },
    Commit { handle: String, token: String, reply: Reply<Resolution> },
    Release { handle: String },
    Inspect { handle: String, reply: Reply<SessionView> },
    Watch { handle: String, reply: Reply<Watch> },
    Unwatch { handle: String, waiter: u64 },
    Sweep { reply: oneshot::Sender<usize> },
    Stats { reply: oneshot::Sender<BrokerStats> },
}

/// The actor state. Only ever touched from its own task.
pub struct Broker {
    domain: String,
    store: Box<dyn SessionStore>,
    waiters: WaiterRegistry,
    /// Handles with a resolution in flight.
    claims: HashSet<String>,
    session_ttl: Duration,
}

impl Broker {
    /// Spawn the actor for `domain` and return a handle to it.
    ///
    /// The actor stops when `shutdown` is cancelled or every handle is dropped.
    pub fn spawn(
        domain: &str,
        store: Box<dyn SessionStore>,
        resolvers: Resolvers,
        issuer: Arc<TokenIssuer>,
        settings: BrokerSettings,
        shutdown: CancellationToken,
    ) -> BrokerHandle {
        let (tx, rx) = mpsc::channel(settings.mailbox.max(1));
        let broker = Self {
            domain: domain.to_owned(),
            store,
            waiters: WaiterRegistry::new(),
            claims: HashSet::new(),
            session_ttl: settings.session_ttl,
        };
        tokio::spawn(broker.run(rx, settings.sweep_interval, shutdown));
        BrokerHandle {
            domain: Arc::from(domain),
            tx,
            resolvers,
            issuer,
            await_timeout: settings.await_timeout,
        }
    }

    async fn run(
        mut self,
        mut rx: mpsc::Receiver<Command>,
        sweep_interval: Duration,
        shutdown: CancellationToken,
    ) {
        // Clamped so the timer's deadline arithmetic cannot overflow `Instant`.
        let period = sweep_interval.min(Duration::from_secs(MAX_DURATION_SECS));
        let mut timer = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = timer.tick() => {
                    self.sweep();
                }
                cmd = rx.recv() => match cmd {
                    Some(cmd) => self.handle(cmd),
                    None => break,
                },
            }
        }
        tracing::debug!(domain = %self.domain, "broker stopped");
    }

    fn handle(&mut self, cmd: Command) {
        match cmd {
            Command::Begin { method, context, reply } => {
                let _ = reply.send(self.begin(method, context));
            }
            Command::Claim { handle, reply } => {
                let _ = reply.send(self.claim(&handle));
            }
            Command::Commit { handle, token, reply } => {
                let _ = reply.send(self.commit(&handle, token));
            }
            Command::Release { handle } => {
                self.claims.remove(&handle);
            }
            Command::Inspect { handle, reply } => {
                let _ = reply.send(self.inspect(&handle));
            }
            Command::Watch { handle, reply } => {
                // Caller gave up before the reply arrived; drop its registration.
                if let Err(Ok(Watch::Parked { waiter, .. })) = reply.send(self.watch(&handle)) {
                    self.waiters.unregister(&handle, waiter);
                }
            }
            Command::Unwatch { handle, waiter } => {
                self.waiters.unregister(&handle, waiter);
            }
            Command::Sweep { reply } => {
                let _ = reply.send(self.sweep());
            }
            Command::Stats { reply } => {
                let _ = reply.send(BrokerStats {
                    sessions: self.store.len(),
                    waiters: self.waiters.len(),
                });
            }
        }
    }

    fn begin(&mut self, method: Method, context: Option<String>) -> Result<String, BrokerError> {
        let mut handle = generate_handle();
        while self.store.get(&handle).is_some() {
            handle = generate_handle();
        }
        let record = SessionRecord::new(handle.clone(), method, context);
        self.store.insert(record.clone()).map_err(storage)?;
        tracing::info!(
            domain = %self.domain,
            handle = %short(&handle),
            method = %record.method,
            "session started"
        );
        Ok(handle)
    }

    fn claim(&mut self, handle: &str) -> Result<Claim, BrokerError> {
        let record = self.store.get(handle).ok_or(BrokerError::SessionExpired)?;
        if let (true, Some(token)) = (record.resolved, record.token) {
            return Ok(Claim::Resolved(Resolution {
                token,
                method: record.method,
                context: record.context,
            }));
        }
        if !self.claims.insert(handle.to_owned()) {
            return Err(BrokerError::ResolutionInProgress);
        }
        Ok(Claim::Granted { method: record.method })
    }

    fn commit(&mut self, handle: &str, token: String) -> Result<Resolution, BrokerError> {
        self.claims.remove(handle);
        let mut record = self.store.get(handle).ok_or(BrokerError::SessionExpired)?;
        record.complete(token.clone()).map_err(storage)?;
        self.store.update(record.clone()).map_err(storage)?;

        let woken = self.waiters.wake(handle, &token);
        tracing::info!(
            domain = %self.domain,
            handle = %short(handle),
            method = %record.method,
            woken,
            "session resolved"
        );
        Ok(Resolution { token, method: record.method, context: record.context })
    }

    fn inspect(&self, handle: &str) -> Result<SessionView, BrokerError> {
        let record = self.store.get(handle).ok_or(BrokerError::SessionExpired)?;
        Ok(SessionView {
            age: record.age(epoch_ms()),
            handle: record.handle,
            method: record.method,
            context: record.context,
            resolved: record.resolved,
        })
    }

    fn watch(&mut self, handle: &str) -> Result<Watch, BrokerError> {
        let record = self.store.get(handle).ok_or(BrokerError::SessionExpired)?;
        if let (true, Some(token)) = (record.resolved, record.token) {
            return Ok(Watch::Ready(token));
        }
        let (waiter, rx) = self.waiters.register(handle);
        Ok(Watch::Parked { waiter, rx })
    }

    /// Delete every record older than the TTL. Parked waiters on deleted
    /// handles are woken with [`Wake::Expired`].
    fn sweep(&mut self) -> usize {
        let now = epoch_ms();
        let expired: Vec<String> = self
            .store
            .ages(now)
            .into_iter()
            .filter(|(_, age)| *age > self.session_ttl)
            .map(|(handle, _)| handle)
            .collect();
        if expired.is_empty() {
            return 0;
        }

        let removed = match self.store.remove(&expired) {
            Ok(n) => n,
            Err(e) => {
                tracing::warn!(domain = %self.domain, err = %e, "sweep failed to persist");
                return 0;
            }
        };
        let mut expired_waiters = 0;
        for handle in &expired {
            self.claims.remove(handle);
            expired_waiters += self.waiters.expire(handle);
        }
        tracing::info!(domain = %self.domain, removed, expired_waiters, "swept expired sessions");
        removed
    }
}

/// Cloneable client side of a broker actor.
#[derive(Clone)]
pub struct BrokerHandle {
    domain: Arc<str>,
    tx: mpsc::Sender<Command>,
    resolvers: Resolvers,
    issuer: Arc<TokenIssuer>,
    await_timeout: Duration,
}

impl std::fmt::Debug for BrokerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BrokerHandle").field("domain", &self.domain).finish_non_exhaustive()
    }
}

impl BrokerHandle {
    pub fn domain(&self) -> &str {
        &self.domain
    }

    /// Start a new session and return its handle.
    pub async fn begin(
        &self,
        method: Method,
        context: Option<String>,
    ) -> Result<String, BrokerError> {
        self.call(|reply| Command::Begin { method, context, reply }).await?
    }

    /// Turn `proof` into a token and complete the session.
    ///
    /// An already-resolved handle replays its stored result without calling
    /// any resolver. A failed attempt leaves the session pending.
    pub async fn resolve(&self, handle: &str, proof: Proof) -> Result<Resolution, BrokerError> {
        let claim = self.call(|reply| Command::Claim { handle: handle.to_owned(), reply }).await??;
        let method = match claim {
            Claim::Resolved(resolution) => {
                tracing::debug!(handle = %short(handle), "replaying resolved session");
                return Ok(resolution);
            }
            Claim::Granted { method } => method,
        };

        let guard = ReleaseGuard::new(self.tx.clone(), handle);
        let token = match self.mint(&method, proof).await {
            Ok(token) => token,
            Err(e) => {
                tracing::warn!(
                    domain = %self.domain,
                    handle = %short(handle),
                    method = %method,
                    err = %e,
                    "session resolution failed"
                );
                guard.release().await;
                return Err(e);
            }
        };
        let committed =
            self.call(|reply| Command::Commit { handle: handle.to_owned(), token, reply }).await?;
        // Commit clears the claim itself.
        guard.disarm();
        committed
    }

    /// Complete a campus session for a username the caller already verified.
    pub async fn login_campus(
        &self,
        handle: &str,
        username: &str,
    ) -> Result<Resolution, BrokerError> {
        self.resolve(handle, Proof::CampusVerified { username: username.to_owned() }).await
    }

    /// Wait (bounded) for the session's token.
    pub async fn await_token(&self, handle: &str) -> Result<AwaitOutcome, BrokerError> {
        let watch = self.call(|reply| Command::Watch { handle: handle.to_owned(), reply }).await??;
        let (waiter, mut rx) = match watch {
            Watch::Ready(token) => return Ok(AwaitOutcome::Token(token)),
            Watch::Parked { waiter, rx } => (waiter, rx),
        };

        let guard = UnwatchGuard::new(self.tx.clone(), handle, waiter);
        let wake = tokio::select! {
            wake = &mut rx => {
                // Delivered wakes are already drained from the registry.
                guard.disarm();
                wake
            }
            _ = tokio::time::sleep(self.await_timeout) => {
                guard.unwatch().await;
                match rx.try_recv() {
                    Ok(wake) => Ok(wake),
                    Err(_) => return Ok(AwaitOutcome::Pending),
                }
            }
        };
        match wake {
            Ok(Wake::Token(token)) => Ok(AwaitOutcome::Token(token)),
            Ok(Wake::Expired) => Err(BrokerError::SessionExpired),
            Err(_) => Err(BrokerError::Unavailable),
        }
    }

    pub async fn inspect(&self, handle: &str) -> Result<SessionView, BrokerError> {
        self.call(|reply| Command::Inspect { handle: handle.to_owned(), reply }).await?
    }

    /// Run the expiry sweep now; returns how many records were deleted.
    pub async fn sweep_now(&self) -> Result<usize, BrokerError> {
        self.call(|reply| Command::Sweep { reply }).await
    }

    pub async fn stats(&self) -> Result<BrokerStats, BrokerError> {
        self.call(|reply| Command::Stats { reply }).await
    }

    async fn call<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, BrokerError> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(make(reply)).await.map_err(|_| BrokerError::Unavailable)?;
        rx.await.map_err(|_| BrokerError::Unavailable)
    }

    async fn identify(&self, method: &Method, proof: Proof) -> Result<Identity, BrokerError> {
        match proof {
            Proof::ProviderCode(code) => {
                let provider = &self.resolvers.provider;
                let identity = provider.exchange(&code).await?;
                if method.requires_membership() && !provider.is_member(&identity).await? {
                    return Err(BrokerError::MembershipDenied { org: provider.org().to_owned() });
                }
                Ok(Identity { tag: provider.tag().to_owned(), user_id: identity.user_id.to_string() })
            }
            Proof::CampusPassword { username, password } => {
                let campus = &self.resolvers.campus;
                campus.verify(&username, &password).await?;
                Ok(Identity { tag: campus.tag().to_owned(), user_id: username })
            }
            Proof::CampusVerified { username } => {
                Ok(Identity { tag: self.resolvers.campus.tag().to_owned(), user_id: username })
            }
        }
    }

    async fn mint(&self, method: &Method, proof: Proof) -> Result<String, BrokerError> {
        let identity = self.identify(method, proof).await?;
        Ok(self.issuer.issue(&identity.subject(), None)?)
    }
}

/// Releases a resolution claim if the resolving task goes away before committing.
struct ReleaseGuard {
    tx: mpsc::Sender<Command>,
    handle: Option<String>,
}

impl ReleaseGuard {
    fn new(tx: mpsc::Sender<Command>, handle: &str) -> Self {
        Self { tx, handle: Some(handle.to_owned()) }
    }

    /// Release now, waiting for mailbox space.
    async fn release(mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = self.tx.send(Command::Release { handle }).await;
        }
    }

    fn disarm(mut self) {
        self.handle = None;
    }
}

impl Drop for ReleaseGuard {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            post(&self.tx, Command::Release { handle });
        }
    }
}

/// Unregisters a parked waiter whose `await_token` future was dropped mid-wait.
struct UnwatchGuard {
    tx: mpsc::Sender<Command>,
    target: Option<(String, u64)>,
}

impl UnwatchGuard {
    fn new(tx: mpsc::Sender<Command>, handle: &str, waiter: u64) -> Self {
        Self { tx, target: Some((handle.to_owned(), waiter)) }
    }

    async fn unwatch(mut self) {
        if let Some((handle, waiter)) = self.target.take() {
            let _ = self.tx.send(Command::Unwatch { handle, waiter }).await;
        }
    }

    fn disarm(mut self) {
        self.target = None;
    }
}

impl Drop for UnwatchGuard {
    fn drop(&mut self) {
        if let Some((handle, waiter)) = self.target.take() {
            post(&self.tx, Command::Unwatch { handle, waiter });
        }
    }
}

/// Best-effort send from a synchronous context.
fn post(tx: &mpsc::Sender<Command>, cmd: Command) {
    match tx.try_send(cmd) {
        Ok(()) | Err(mpsc::error::TrySendError::Closed(_)) => {}
        Err(mpsc::error::TrySendError::Full(cmd)) => {
            if let Ok(rt) = tokio::runtime::Handle::try_current() {
                let tx = tx.clone();
                rt.spawn(async move {
                    let _ = tx.send(cmd).await;
                });
            }
        }
    }
}

/// Log-safe prefix of a session handle.
fn short(handle: &str) -> &str {
    handle.get(..6).unwrap_or(handle)
}

fn storage(e: anyhow::Error) -> BrokerError {
    BrokerError::Storage(format!("{e:#}"))
}

#[cfg(test)]
#[path = "broker_tests.rs"]
mod tests;
