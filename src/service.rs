// Caller-facing layer - user sessions on top of the portal pipeline
use crate::{
    browser::Launcher,
    config::PortalConfig,
    models::{AssignmentRecord, Availability, Credentials, GradeRecord, ScrapeError, ServiceError, UserSession},
    pool::SlotLease,
    scraping::Portal
};

use chrono::Local;
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, fmt, sync::Arc};
use tokio::sync::RwLock;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Opaque handle to one user's session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionHandle(Uuid);

impl fmt::Display for SessionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

pub struct GradeService<L: Launcher> {
    portal: Portal<L>,
    sessions: RwLock<HashMap<SessionHandle, UserSession>>,
}

impl<L: Launcher> GradeService<L> {
    pub fn new(launcher: L, config: PortalConfig) -> Result<Self, ServiceError> {
        Ok(Self {
            portal: Portal::new(launcher, config)?,
            sessions: RwLock::new(HashMap::new()),
        })
    }

    pub fn portal(&self) -> &Portal<L> {
        &self.portal
    }

    // Open the default slot before the first caller shows up
    pub async fn warm_up(&self) -> Result<(), ScrapeError> {
        self.portal.pool().warm_up().await
    }

    async fn publish(&self, handle: SessionHandle, user: &UserSession) {
        let mut sessions = self.sessions.write().await;
        // a logout while fetching wins over late results
        if let Some(stored) = sessions.get_mut(&handle) {
            *stored = user.clone();
        }
    }

    // Log in, on failure the session is dropped again
    async fn open_session(&self, credentials: Credentials) -> Result<(SessionHandle, SlotLease<L::Tab>, UserSession), ServiceError> {
        if credentials.username.is_empty() || credentials.password.is_empty() {
            warn!("login attempt without username or password");
            return Err(ServiceError::MissingCredentials);
        }

        let handle = SessionHandle(Uuid::new_v4());
        let mut user = UserSession::new(credentials);
        self.sessions.write().await.insert(handle, user.clone());

        match self.portal.login(&mut user).await {
            Ok(lease) => {
                self.publish(handle, &user).await;
                Ok((handle, lease, user))
            }
            Err(e) => {
                // the true cause stays in the log, the caller gets the generic message
                warn!(user = %user.username, cause = %e, "rejecting login");
                self.sessions.write().await.remove(&handle);
                Err(ServiceError::LoginRejected)
            }
        }
    }

    // Grades then assignments, publishing after each step
    async fn run_fetches(&self, handle: SessionHandle, lease: SlotLease<L::Tab>, mut user: UserSession) {
        match self.portal.fetch_grades(&lease, &mut user).await {
            Ok(()) => {
                self.publish(handle, &user).await;
                if let Err(e) = self.portal.fetch_assignments(lease, &mut user).await {
                    error!(user = %user.username, cause = %e, "assignments unavailable");
                }
            }
            Err(e) => {
                error!(user = %user.username, cause = %e, "grades unavailable");
                self.portal.hand_back(lease, Some(&e)).await;
            }
        }

        user.forget_password();
        self.publish(handle, &user).await;
    }

    /// Log in and fetch everything before returning.
    pub async fn submit_credentials(&self, credentials: Credentials) -> Result<SessionHandle, ServiceError> {
        let (handle, lease, user) = self.open_session(credentials).await?;
        self.run_fetches(handle, lease, user).await;
        Ok(handle)
    }

    /// Log in, then fetch in the background. Poll with
    /// [`get_grades`](Self::get_grades) and [`get_assignments`](Self::get_assignments).
    pub async fn begin_session(self: &Arc<Self>, credentials: Credentials) -> Result<SessionHandle, ServiceError> {
        let (handle, lease, user) = self.open_session(credentials).await?;

        let service = Arc::clone(self);
        tokio::spawn(async move {
            service.run_fetches(handle, lease, user).await;
        });

        Ok(handle)
    }

    pub async fn session(&self, handle: SessionHandle) -> Result<UserSession, ServiceError> {
        self.sessions.read().await.get(&handle).cloned().ok_or(ServiceError::UnknownSession)
    }

    pub async fn get_grades(&self, handle: SessionHandle) -> Result<Availability<Vec<GradeRecord>>, ServiceError> {
        let sessions = self.sessions.read().await;
        let user = sessions.get(&handle).ok_or(ServiceError::UnknownSession)?;

        Ok(if user.grades_ready && !user.grades.is_empty() {
            Availability::Ready(user.grades.clone())
        } else {
            Availability::NotReady
        })
    }

    pub async fn get_assignments(&self, handle: SessionHandle) -> Result<Availability<Vec<Vec<AssignmentRecord>>>, ServiceError> {
        let sessions = self.sessions.read().await;
        let user = sessions.get(&handle).ok_or(ServiceError::UnknownSession)?;

        Ok(if user.assignments_ready {
            Availability::Ready(user.assignments.clone())
        } else {
            Availability::NotReady
        })
    }

    /// Forget the user. Slots already handed back are not touched.
    pub async fn logout(&self, handle: SessionHandle) {
        if let Some(user) = self.sessions.write().await.remove(&handle) {
            info!(user = %user.username, "logged out");
        }
    }

    /// Drop sessions older than the configured TTL, returns how many went.
    pub async fn purge_expired(&self) -> usize {
        let ttl = chrono::Duration::from_std(self.portal.config().session_ttl).unwrap_or(chrono::Duration::MAX);
        let now = Local::now();

        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, user| now - user.timing.started_at <= ttl);

        let purged = before - sessions.len();
        if purged > 0 {
            info!(purged, "expired sessions dropped");
        }
        purged
    }

    pub async fn shutdown(&self) {
        self.portal.pool().shutdown().await;
    }
}
