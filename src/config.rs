// Portal configuration: URLs, selectors, timeouts and thresholds
use std::{path::PathBuf, time::Duration};

use tracing::warn;

pub const LOGIN_URL: &str = "https://aspen.cps.edu/aspen/logon.do";
pub const DESKTOP_GRADES_URL: &str = "https://aspen.cps.edu/aspen/portalClassList.do?navkey=academics.classes.list";
pub const MOBILE_GRADES_EXT: &str = "list/academics.classes.list";

/// How a post-login URL is recognised as a successful login.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginMarker {
    /// The path segment right before the last one equals this text,
    /// e.g. `#` for `https://aspen.cps.edu/aspen/#/`.
    PathSegment(String),
    /// The URL is exactly this landing page (older portal).
    LandingUrl(String),
}

impl LoginMarker {
    pub fn matches(&self, url: &str) -> bool {
        match self {
            LoginMarker::PathSegment(marker) => {
                let segments: Vec<&str> = url.split('/').collect();
                segments.len() >= 2 && segments[segments.len() - 2] == marker.as_str()
            }
            LoginMarker::LandingUrl(landing) => url == landing.as_str(),
        }
    }
}

// CSS selectors the pipeline relies on, all portal coupling lives here
#[derive(Debug, Clone)]
pub struct Selectors {
    pub username: String,
    pub password: String,
    pub submit: String,
    pub mobile_rows: String,
    pub mobile_cells: String,
    pub desktop_rows: String,
    pub desktop_cells: String,
    pub assignments_link: String,
    pub term_filter: String,
    pub assignment_rows: String,
    pub assignment_cells: String,
    pub next_class: String,
    // in-class pagination control, none on the current portal
    pub next_page: Option<String>,
}

impl Default for Selectors {
    fn default() -> Self {
        Self {
            username: "#username".to_string(),
            password: "#password".to_string(),
            submit: "input.primary.button".to_string(),
            mobile_rows: ".ui-grid-row".to_string(),
            mobile_cells: ".ui-grid-cell".to_string(),
            desktop_rows: "#dataGrid .listHeader, #dataGrid .listCell".to_string(),
            desktop_cells: "td".to_string(),
            assignments_link: r#"a[title="List of assignments"]"#.to_string(),
            term_filter: r#"select[name="gradeTermOid"]"#.to_string(),
            assignment_rows: ".listCell".to_string(),
            assignment_cells: "td".to_string(),
            next_class: "#nextButton".to_string(),
            next_page: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PortalConfig {
    pub login_url: String,
    pub desktop_grades_url: String,
    pub mobile_grades_ext: String,
    pub login_markers: Vec<LoginMarker>,
    pub selectors: Selectors,
    // term filter value meaning "all terms"
    pub all_terms_value: String,
    pub headless: bool,
    pub navigation_timeout: Duration,
    pub stale_after: Duration,
    pub login_spacing: Duration,
    pub settle_delay: Duration,
    pub session_ttl: Duration,
    pub max_pages_per_class: usize,
    pub skip_last_class: bool,
}

impl Default for PortalConfig {
    fn default() -> Self {
        Self {
            login_url: LOGIN_URL.to_string(),
            desktop_grades_url: DESKTOP_GRADES_URL.to_string(),
            mobile_grades_ext: MOBILE_GRADES_EXT.to_string(),
            login_markers: vec![LoginMarker::PathSegment("#".to_string())],
            selectors: Selectors::default(),
            all_terms_value: String::new(),
            headless: true,
            navigation_timeout: Duration::from_secs(30),
            stale_after: Duration::from_secs(100),
            login_spacing: Duration::from_millis(3000),
            settle_delay: Duration::from_millis(500),
            session_ttl: Duration::from_secs(100 * 60),
            max_pages_per_class: 25,
            skip_last_class: true,
        }
    }
}

impl PortalConfig {
    /// Defaults overridden by `OAK_*` variables, `.env` included.
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(url) = lookup("OAK_LOGIN_URL") {
            config.login_url = url;
        }
        if let Some(url) = lookup("OAK_DESKTOP_GRADES_URL") {
            config.desktop_grades_url = url;
        }
        if let Some(url) = lookup("OAK_LANDING_URL") {
            config.login_markers.push(LoginMarker::LandingUrl(url));
        }
        if let Some(selector) = lookup("OAK_PAGE_NEXT_SELECTOR").filter(|s| !s.is_empty()) {
            config.selectors.next_page = Some(selector);
        }
        // any value shows the browser, like HEAD=1 did
        if lookup("OAK_HEAD").is_some_and(|v| !v.is_empty()) {
            config.headless = false;
        }
        if let Some(secs) = parse_number(&lookup, "OAK_NAV_TIMEOUT_SECS") {
            config.navigation_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = parse_number(&lookup, "OAK_STALE_SECS") {
            config.stale_after = Duration::from_secs(secs);
        }
        if let Some(ms) = parse_number(&lookup, "OAK_LOGIN_SPACING_MS") {
            config.login_spacing = Duration::from_millis(ms);
        }
        if let Some(flag) = lookup("OAK_SKIP_LAST_CLASS") {
            config.skip_last_class = !matches!(flag.as_str(), "0" | "false" | "no");
        }

        config
    }

    // Whether the URL after submitting the login form means success
    pub fn is_logged_in_url(&self, url: &str) -> bool {
        self.login_markers.iter().any(|marker| marker.matches(url))
    }
}

/// Where log lines go besides the console.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogSettings {
    // no log files at all when unset
    pub dir: Option<PathBuf>,
    pub error_file: String,
    pub combined_file: String,
    pub console: bool,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            dir: Some(PathBuf::from(".")),
            error_file: "error.log".to_string(),
            combined_file: "combined.log".to_string(),
            console: true,
        }
    }
}

impl LogSettings {
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    // Never logs, it runs before the subscriber exists
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut settings = Self::default();

        if let Some(dir) = lookup("OAK_LOG_DIR") {
            settings.dir = (!dir.is_empty()).then(|| PathBuf::from(dir));
        }
        if let Some(name) = lookup("OAK_ERROR_LOG").filter(|s| !s.is_empty()) {
            settings.error_file = name;
        }
        if let Some(name) = lookup("OAK_COMBINED_LOG").filter(|s| !s.is_empty()) {
            settings.combined_file = name;
        }
        // production keeps only the files
        if lookup("OAK_ENV").is_some_and(|env| env == "production") {
            settings.console = false;
        }

        settings
    }
}

fn parse_number(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<u64> {
    let raw = lookup(key)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!(key, value = %raw, "ignoring non-numeric setting");
            None
        }
    }
}
