// Data acquisition layer - drives a pool slot through the portal
use crate::{
    browser::{Launcher, Tab},
    business::{assignment_class_count, merge_mobile_averages},
    config::PortalConfig,
    extractor::{TableSpec, ASSIGNMENTS, DESKTOP_GRADES, MOBILE_GRADES, NO_MATCHING_RECORDS},
    models::{AssignmentRecord, GradeRecord, MobileGrade, Password, ScrapeError, UserSession},
    pool::{SlotLease, SlotPool}
};

use chrono::Local;
use std::{future::Future, sync::Arc, time::Duration};
use tokio::{sync::Mutex, time::Instant};
use tracing::{debug, error, info, warn};

/// Keeps successive login attempts at least `spacing` apart, process-wide.
pub struct LoginThrottle {
    spacing: Duration,
    last_login: Mutex<Option<Instant>>,
}

impl LoginThrottle {
    pub fn new(spacing: Duration) -> Self {
        Self { spacing, last_login: Mutex::new(None) }
    }

    /// Wait until this caller may attempt a login. Returns how long it slept.
    pub async fn wait_turn(&self) -> Duration {
        // held while sleeping so queued callers are spaced out one by one
        let mut last_login = self.last_login.lock().await;
        let mut waited = Duration::ZERO;

        if let Some(previous) = *last_login {
            let since = previous.elapsed();
            if since < self.spacing {
                waited = self.spacing - since;
                debug!(wait_ms = waited.as_millis() as u64, "spacing out login attempt");
                tokio::time::sleep(waited).await;
            }
        }

        *last_login = Some(Instant::now());
        waited
    }
}

// The portal: its configuration, its slots and the table layouts it serves
pub struct Portal<L: Launcher> {
    config: Arc<PortalConfig>,
    pool: SlotPool<L>,
    throttle: LoginThrottle,
    mobile_grades: TableSpec,
    desktop_grades: TableSpec,
    assignments: TableSpec,
}

impl<L: Launcher> Portal<L> {
    pub fn new(launcher: L, config: PortalConfig) -> Result<Self, ScrapeError> {
        let selectors = &config.selectors;
        let mobile_grades = TableSpec::new(&selectors.mobile_rows, &selectors.mobile_cells, MOBILE_GRADES)?;
        let desktop_grades = TableSpec::new(&selectors.desktop_rows, &selectors.desktop_cells, DESKTOP_GRADES)?;
        let assignments = TableSpec::new(&selectors.assignment_rows, &selectors.assignment_cells, ASSIGNMENTS)?;

        Ok(Self {
            pool: SlotPool::new(launcher, &config),
            throttle: LoginThrottle::new(config.login_spacing),
            config: Arc::new(config),
            mobile_grades,
            desktop_grades,
            assignments,
        })
    }

    pub fn config(&self) -> &PortalConfig {
        &self.config
    }

    pub fn pool(&self) -> &SlotPool<L> {
        &self.pool
    }

    // Every wait on the browser is bounded, a silent portal must not pin a slot
    async fn bounded<F, R>(&self, step: &'static str, fut: F) -> Result<R, ScrapeError>
    where
        F: Future<Output = Result<R, ScrapeError>>,
    {
        tokio::time::timeout(self.config.navigation_timeout, fut)
            .await
            .map_err(|_| ScrapeError::NavigationTimeout { step })?
    }

    /// Give a slot back: torn down after a timeout, released otherwise.
    pub async fn hand_back(&self, lease: SlotLease<L::Tab>, failure: Option<&ScrapeError>) {
        match failure {
            Some(e) if e.is_timeout() => self.pool.discard(lease).await,
            _ => self.pool.release(lease).await,
        }
    }

    /// Throttle, claim a slot and log in on it.
    pub async fn login(&self, user: &mut UserSession) -> Result<SlotLease<L::Tab>, ScrapeError> {
        self.throttle.wait_turn().await;
        let lease = self.pool.acquire().await?;
        self.authenticate(lease, user).await
    }

    /// Log the user in on `lease`.
    ///
    /// On success the lease comes back for the fetch steps and the user is
    /// marked logged in. On failure the slot has already been handed back
    /// and the error says why.
    pub async fn authenticate(&self, lease: SlotLease<L::Tab>, user: &mut UserSession) -> Result<SlotLease<L::Tab>, ScrapeError> {
        user.slot_index = lease.index();

        let Some(password) = user.password.clone() else {
            self.pool.release(lease).await;
            return Err(ScrapeError::AuthFailure { reason: "no password on session".to_string() });
        };

        match self.submit_login(lease.tab(), &user.username, &password).await {
            Ok(landed) if self.config.is_logged_in_url(&landed) => {
                let elapsed_secs = (Local::now() - user.timing.started_at).num_milliseconds() as f64 / 1000.0;
                user.timing.login_elapsed_secs = Some(elapsed_secs);
                user.logged_in = true;

                info!(user = %user.username, slot = lease.index(), elapsed_secs, "User logged in");
                Ok(lease)
            }
            Ok(landed) => {
                warn!(user = %user.username, slot = lease.index(), url = %landed, "Login failed: post-login URL not recognised");
                self.pool.release(lease).await;
                Err(ScrapeError::AuthFailure { reason: format!("landed on {}", landed) })
            }
            Err(e) => {
                warn!(user = %user.username, slot = lease.index(), cause = %e, "Login failed");
                self.hand_back(lease, Some(&e)).await;
                Err(ScrapeError::AuthFailure { reason: e.to_string() })
            }
        }
    }

    // Fill and submit the login form, returns where the portal took us
    async fn submit_login(&self, tab: &L::Tab, username: &str, password: &Password) -> Result<String, ScrapeError> {
        let selectors = &self.config.selectors;

        // a reused slot may still be on the login page with old input in it
        let current = self.bounded("current url", tab.url()).await?;
        if current != self.config.login_url {
            self.bounded("login page", tab.goto(&self.config.login_url)).await?;
        } else {
            self.bounded("clear username", tab.clear_input(&selectors.username)).await?;
            self.bounded("clear password", tab.clear_input(&selectors.password)).await?;
        }

        self.bounded("type username", tab.type_into(&selectors.username, username)).await?;
        self.bounded("type password", tab.type_into(&selectors.password, password.expose())).await?;
        self.bounded("login submit", tab.click_and_wait(&selectors.submit)).await?;

        self.bounded("post-login url", tab.url()).await
    }

    /// Fill `user.grades` from the mobile summary and the desktop class list.
    pub async fn fetch_grades(&self, lease: &SlotLease<L::Tab>, user: &mut UserSession) -> Result<(), ScrapeError> {
        if !user.logged_in {
            return Err(ScrapeError::NotLoggedIn);
        }
        let tab = lease.tab();

        // mobile view, the grid is rendered client side after load
        let home_url = self.bounded("home url", tab.url()).await?;
        let mobile_url = format!("{}{}", home_url, self.config.mobile_grades_ext);
        self.bounded("mobile grades", tab.goto(&mobile_url)).await?;
        self.bounded("mobile grades grid", tab.wait_for_selector(&self.config.selectors.mobile_rows)).await?;

        let html = self.bounded("mobile grades content", tab.content()).await?;
        let mobile: Vec<MobileGrade> = self.mobile_grades
            .extract_html(&html)
            .iter()
            .map(MobileGrade::from_record)
            .collect();
        if mobile.is_empty() {
            warn!(user = %user.username, table = self.mobile_grades.name(), "no rows extracted");
        }

        // some accounts get a non-HTML response here, the list still loads
        if let Err(e) = self.bounded("desktop grades", tab.goto(&self.config.desktop_grades_url)).await {
            warn!(user = %user.username, cause = %e, "ignoring desktop grades navigation error");
        }

        let html = self.bounded("desktop grades content", tab.content()).await?;
        let mut grades: Vec<GradeRecord> = self.desktop_grades
            .extract_html(&html)
            .iter()
            .map(GradeRecord::from_record)
            .collect();
        if grades.is_empty() {
            warn!(user = %user.username, table = self.desktop_grades.name(), "no rows extracted, retry later");
        }

        for mismatch in merge_mobile_averages(&mut grades, &mobile) {
            error!(
                user = %user.username,
                class = %mismatch.class,
                row = mismatch.row,
                "no mobile average for class, keeping desktop value"
            );
        }

        #[cfg(debug_assertions)]
        debug!(user = %user.username, ?grades, "merged grade records");

        info!(user = %user.username, classes = grades.len(), "Fetched grades");
        user.grades = grades;
        user.grades_ready = true;
        Ok(())
    }

    /// Fill `user.assignments` class by class, then hand the slot back.
    pub async fn fetch_assignments(&self, lease: SlotLease<L::Tab>, user: &mut UserSession) -> Result<(), ScrapeError> {
        let result = self.walk_assignments(lease.tab(), user).await;
        if let Err(e) = &result {
            error!(user = %user.username, cause = %e, "assignment fetch failed");
        }
        self.hand_back(lease, result.as_ref().err()).await;
        result
    }

    async fn walk_assignments(&self, tab: &L::Tab, user: &mut UserSession) -> Result<(), ScrapeError> {
        if !user.logged_in {
            return Err(ScrapeError::NotLoggedIn);
        }
        let selectors = &self.config.selectors;

        self.bounded("assignments list", tab.click_and_wait(&selectors.assignments_link)).await?;
        self.bounded("term filter", tab.select_value(&selectors.term_filter, &self.config.all_terms_value)).await?;
        tokio::time::sleep(self.config.settle_delay).await;

        let class_count = assignment_class_count(user.grades.len(), self.config.skip_last_class);
        if class_count < user.grades.len() {
            debug!(user = %user.username, classes = user.grades.len(), visiting = class_count, "skipping trailing class");
        }

        let mut assignments: Vec<Vec<AssignmentRecord>> = Vec::with_capacity(class_count);

        for class_index in 0..class_count {
            assignments.push(self.collect_class_pages(tab, user, class_index).await?);

            // move on to the next class unless this was the last one visited
            if class_index + 1 < class_count {
                if !self.bounded("next class control", tab.exists(&selectors.next_class)).await? {
                    warn!(user = %user.username, class_index, "no control to reach the next class, stopping");
                    break;
                }
                self.bounded("next class", tab.click_and_wait(&selectors.next_class)).await?;
            }
        }

        info!(user = %user.username, classes = assignments.len(), "Fetched assignments");
        user.assignments = assignments;
        user.assignments_ready = true;
        Ok(())
    }

    // All pages of the class currently shown
    async fn collect_class_pages(&self, tab: &L::Tab, user: &UserSession, class_index: usize) -> Result<Vec<AssignmentRecord>, ScrapeError> {
        let mut records = Vec::new();

        for page in 0..self.config.max_pages_per_class {
            let html = self.bounded("assignments content", tab.content()).await?;
            let rows = self.assignments.extract_html(&html);
            if rows.is_empty() && !html.contains(NO_MATCHING_RECORDS) {
                warn!(user = %user.username, class_index, page, table = self.assignments.name(), "no rows extracted and no empty-table marker");
            }
            records.extend(rows.iter().map(AssignmentRecord::from_record));

            let Some(next_page) = &self.config.selectors.next_page else {
                return Ok(records);
            };
            if !self.bounded("next page control", tab.exists(next_page)).await? {
                return Ok(records);
            }
            debug!(user = %user.username, class_index, page, "following next page");
            self.bounded("next page", tab.click_and_wait(next_page)).await?;
        }

        warn!(
            user = %user.username,
            class_index,
            max_pages = self.config.max_pages_per_class,
            "page limit reached for class"
        );
        Ok(records)
    }
}
