// Slot pool - one warm long-lived tab plus throwaway tabs for overlapping logins
use crate::{
    browser::{Launcher, Tab},
    config::PortalConfig,
    models::ScrapeError
};

use std::{
    future::Future,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::{sync::Mutex, time::Instant};
use tracing::{debug, info, warn};

/// Index of the long-lived slot.
pub const DEFAULT_SLOT: usize = 0;

// State of slot 0, the only slot that is ever reused
struct DefaultSlot<T> {
    tab: Option<Arc<T>>,
    busy_since: Option<Instant>,
    // bumped on every claim so a reclaimed lease cannot free the new claimant
    generation: u64,
}

/// A claimed slot. Hand it back with [`SlotPool::release`] or [`SlotPool::discard`].
pub struct SlotLease<T> {
    index: usize,
    generation: u64,
    tab: Arc<T>,
}

impl<T> SlotLease<T> {
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn tab(&self) -> &T {
        &self.tab
    }

    pub fn is_disposable(&self) -> bool {
        self.index != DEFAULT_SLOT
    }
}

pub struct SlotPool<L: Launcher> {
    launcher: L,
    login_url: String,
    stale_after: Duration,
    navigation_timeout: Duration,
    default_slot: Mutex<DefaultSlot<L::Tab>>,
    next_index: AtomicUsize,
}

impl<L: Launcher> SlotPool<L> {
    pub fn new(launcher: L, config: &PortalConfig) -> Self {
        Self {
            launcher,
            login_url: config.login_url.clone(),
            stale_after: config.stale_after,
            navigation_timeout: config.navigation_timeout,
            default_slot: Mutex::new(DefaultSlot { tab: None, busy_since: None, generation: 0 }),
            next_index: AtomicUsize::new(DEFAULT_SLOT + 1),
        }
    }

    async fn bounded<F, R>(&self, step: &'static str, fut: F) -> Result<R, ScrapeError>
    where
        F: Future<Output = Result<R, ScrapeError>>,
    {
        tokio::time::timeout(self.navigation_timeout, fut)
            .await
            .map_err(|_| ScrapeError::NavigationTimeout { step })?
    }

    // Launch a tab and park it on the login page
    async fn open_slot(&self) -> Result<L::Tab, ScrapeError> {
        let tab = self.bounded("browser launch", self.launcher.launch()).await?;
        if let Err(e) = self.bounded("login page", tab.goto(&self.login_url)).await {
            let _ = tab.close().await;
            return Err(e);
        }
        Ok(tab)
    }

    /// Open slot 0 ahead of the first login.
    pub async fn warm_up(&self) -> Result<(), ScrapeError> {
        let generation = {
            let mut slot = self.default_slot.lock().await;
            if slot.tab.is_some() || slot.busy_since.is_some() {
                return Ok(());
            }
            claim(&mut slot)
        };

        self.launch_default(generation).await?;

        let mut slot = self.default_slot.lock().await;
        if slot.generation == generation {
            slot.busy_since = None;
        }
        info!(login_url = %self.login_url, "default slot ready");
        Ok(())
    }

    // Launch slot 0 for the claim `generation`, the lock is not held meanwhile
    async fn launch_default(&self, generation: u64) -> Result<Arc<L::Tab>, ScrapeError> {
        let opened = self.open_slot().await;

        let mut slot = self.default_slot.lock().await;
        let current = slot.generation == generation;
        match opened {
            Ok(tab) => {
                let tab = Arc::new(tab);
                if current {
                    slot.tab = Some(Arc::clone(&tab));
                }
                Ok(tab)
            }
            Err(e) => {
                if current {
                    slot.busy_since = None;
                }
                Err(e)
            }
        }
    }

    /// Whether slot 0 has been claimed for longer than the staleness threshold.
    pub async fn is_stale(&self) -> bool {
        let slot = self.default_slot.lock().await;
        self.stale(&slot)
    }

    fn stale(&self, slot: &DefaultSlot<L::Tab>) -> bool {
        slot.busy_since.is_some_and(|since| since.elapsed() > self.stale_after)
    }

    pub async fn is_default_busy(&self) -> bool {
        self.default_slot.lock().await.busy_since.is_some()
    }

    /// Claim slot 0 if it is free, otherwise open a disposable slot.
    ///
    /// The slot 0 lock only covers the claim itself, a caller launching or
    /// navigating a browser never makes a competing caller wait.
    pub async fn acquire(&self) -> Result<SlotLease<L::Tab>, ScrapeError> {
        let claimed = {
            let mut slot = self.default_slot.lock().await;

            if self.stale(&slot) {
                warn!(stale_after_secs = self.stale_after.as_secs(), "default slot presumed abandoned, reclaiming");
                slot.busy_since = None;
            }

            if slot.busy_since.is_none() {
                let generation = claim(&mut slot);
                Some((generation, slot.tab.clone()))
            } else {
                None
            }
        };

        if let Some((generation, tab)) = claimed {
            let tab = match tab {
                Some(tab) => tab,
                // uninitialized or torn down earlier
                None => self.launch_default(generation).await?,
            };
            debug!(slot = DEFAULT_SLOT, "slot claimed");
            return Ok(SlotLease { index: DEFAULT_SLOT, generation, tab });
        }

        // slot 0 is taken, a throwaway slot keeps the two logins apart
        let index = self.next_index.fetch_add(1, Ordering::SeqCst);
        let tab = self.open_slot().await?;
        info!(slot = index, "opened disposable slot");

        Ok(SlotLease { index, generation: 0, tab: Arc::new(tab) })
    }

    async fn is_current(&self, lease: &SlotLease<L::Tab>) -> bool {
        self.default_slot.lock().await.generation == lease.generation
    }

    // Slot 0 was reclaimed and claimed again while `lease` was out.
    // Its tab is closed unless the new claimant is using the same one.
    async fn drop_superseded(&self, lease: &SlotLease<L::Tab>) {
        let shared = self.default_slot
            .lock()
            .await
            .tab
            .as_ref()
            .is_some_and(|tab| Arc::ptr_eq(tab, &lease.tab));

        if shared {
            debug!(slot = DEFAULT_SLOT, "release of a superseded lease ignored");
        } else {
            close_tab(lease).await;
        }
    }

    /// Return a slot after use: slot 0 goes back to the login page and is
    /// freed, a disposable slot is closed for good.
    pub async fn release(&self, lease: SlotLease<L::Tab>) {
        if lease.is_disposable() {
            close_tab(&lease).await;
            return;
        }
        if !self.is_current(&lease).await {
            self.drop_superseded(&lease).await;
            return;
        }

        let returned = self.bounded("login page", lease.tab.goto(&self.login_url)).await;

        let mut slot = self.default_slot.lock().await;
        if slot.generation != lease.generation {
            drop(slot);
            self.drop_superseded(&lease).await;
            return;
        }
        slot.busy_since = None;

        match returned {
            Ok(()) => debug!(slot = DEFAULT_SLOT, "slot freed"),
            Err(e) => {
                warn!(error = %e, "default slot could not return to login page, tearing down");
                slot.tab = None;
                drop(slot);
                close_tab(&lease).await;
            }
        }
    }

    /// Tear a slot down after a hung or broken session. Slot 0 is freed and
    /// relaunched on its next claim.
    pub async fn discard(&self, lease: SlotLease<L::Tab>) {
        if lease.is_disposable() {
            close_tab(&lease).await;
            return;
        }

        let mut slot = self.default_slot.lock().await;
        if slot.generation != lease.generation {
            drop(slot);
            self.drop_superseded(&lease).await;
            return;
        }
        slot.tab = None;
        slot.busy_since = None;
        drop(slot);

        close_tab(&lease).await;
    }

    pub async fn shutdown(&self) {
        let tab = {
            let mut slot = self.default_slot.lock().await;
            slot.busy_since = None;
            slot.tab.take()
        };
        if let Some(tab) = tab {
            if let Err(e) = tab.close().await {
                warn!(error = %e, "default slot close error");
            }
        }
    }
}

// Mark slot 0 busy for a new holder, returns the claim's generation
fn claim<T>(slot: &mut DefaultSlot<T>) -> u64 {
    slot.busy_since = Some(Instant::now());
    slot.generation += 1;
    slot.generation
}

async fn close_tab<T: Tab>(lease: &SlotLease<T>) {
    match lease.tab.close().await {
        Ok(()) => debug!(slot = lease.index, "slot closed"),
        Err(e) => warn!(slot = lease.index, error = %e, "slot close error"),
    }
}
