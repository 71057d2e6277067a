#![allow(dead_code)]

use oak_grades::{
    browser::{Launcher, Tab},
    extractor::has_element,
    PortalConfig, ScrapeError,
};
use std::sync::{
    atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
    Arc, Mutex,
};
use std::{io, time::Duration};

pub const LOGIN_URL: &str = "https://portal.test/aspen/logon.do";
pub const HOME_URL: &str = "https://portal.test/aspen/#/";
pub const DESKTOP_URL: &str = "https://portal.test/aspen/portalClassList.do?navkey=academics.classes.list";
pub const ASSIGNMENTS_URL: &str = "https://portal.test/aspen/portalAssignmentList.do";
pub const USERNAME: &str = "student1";
pub const PASSWORD: &str = "correct-horse";

pub fn test_config() -> PortalConfig {
    PortalConfig {
        login_url: LOGIN_URL.to_string(),
        desktop_grades_url: DESKTOP_URL.to_string(),
        ..PortalConfig::default()
    }
}

const LOGIN_PAGE: &str = r#"<html><body><form>
    <input id="username" name="username"><input id="password" name="password" type="password">
    <input class="primary button" type="submit" value="Log On">
</form></body></html>"#;

const MOBILE_PAGE: &str = r#"<html><body><div class="ui-grid">
    <div class="ui-grid-row"><div class="ui-grid-cell">Algebra II</div><div class="ui-grid-cell">NGUYEN, T</div><div class="ui-grid-cell">91.2 A</div></div>
    <div class="ui-grid-row"><div class="ui-grid-cell">Chemistry</div><div class="ui-grid-cell">OKAFOR, C</div><div class="ui-grid-cell">84 B</div></div>
    <div class="ui-grid-row"><div class="ui-grid-cell">World Studies</div><div class="ui-grid-cell">REYES, M</div><div class="ui-grid-cell">77.5 C</div></div>
</div></body></html>"#;

const DESKTOP_PAGE: &str = r#"<html><body>
<a title="List of assignments" href="portalAssignmentList.do">Assignments</a>
<table id="dataGrid">
    <tr class="listHeader"><td></td><td>Description</td><td>Teacher</td><td>Term</td><td>Period</td><td>Room</td><td>Average</td><td>Absent</td><td>Tardy</td></tr>
    <tr class="listCell"><td><input type="checkbox"></td><td>Algebra II</td><td>NGUYEN, T</td><td>S1</td><td>1</td><td>210</td><td>91</td><td>2</td><td>0</td></tr>
    <tr class="listCell"><td><input type="checkbox"></td><td>Chemistry</td><td>OKAFOR, C</td><td>S1</td><td>2</td><td>
        114 </td><td>84</td><td>0</td><td>1</td></tr>
    <tr class="listCell"><td><input type="checkbox"></td><td>World Studies</td><td>REYES, M</td><td>S1</td><td>3</td><td></td><td>77</td><td>1</td><td>1</td></tr>
</table></body></html>"#;

pub fn assignment_row(name: &str, score: &str) -> String {
    format!(
        r#"<tr class="listCell"><td><input type="checkbox"></td><td>{name}</td><td>9/3/2024</td><td>9/10/2024</td><td>Homework</td><td>20%</td><td>{name} (alt)</td><td>long</td><td>{score}%</td><td>{score} / 100</td><td>{score}</td></tr>"#
    )
}

fn class_page(rows: &[String], has_next: bool) -> String {
    let next = if has_next { r##"<a id="nextButton" href="#">Next</a>"## } else { "" };
    format!(
        r#"<html><body><select name="gradeTermOid"><option value="">All</option></select>
        <table>{}</table>{}</body></html>"#,
        rows.join(""),
        next
    )
}

// Scripted portal shared by every tab a launcher opens
pub struct FakePortal {
    pub class_pages: Vec<Vec<String>>,
    pub hang_on_submit: AtomicBool,
    pub hang_on_mobile_grid: AtomicBool,
    pub fail_desktop_goto: AtomicBool,
    pub fail_launch: AtomicBool,
    pub launch_delay_ms: AtomicU64,
    pub login_goto_delay_ms: AtomicU64,
}

impl FakePortal {
    pub fn new() -> Self {
        Self::with_class_pages(vec![
            vec![assignment_row("Problem Set 1", "95"), assignment_row("Quiz 1", "88")],
            vec![r#"<tr class="listCell"><td>No matching records</td></tr>"#.to_string()],
            vec![assignment_row("Essay", "79")],
        ])
    }

    pub fn with_class_pages(class_pages: Vec<Vec<String>>) -> Self {
        Self {
            class_pages,
            hang_on_submit: AtomicBool::new(false),
            hang_on_mobile_grid: AtomicBool::new(false),
            fail_desktop_goto: AtomicBool::new(false),
            fail_launch: AtomicBool::new(false),
            launch_delay_ms: AtomicU64::new(0),
            login_goto_delay_ms: AtomicU64::new(0),
        }
    }
}

#[derive(Default)]
struct TabState {
    url: String,
    username: String,
    password: String,
    class_page: usize,
    term: Option<String>,
}

pub struct FakeTab {
    pub id: usize,
    portal: Arc<FakePortal>,
    state: Mutex<TabState>,
    closed: AtomicBool,
    close_count: Arc<AtomicUsize>,
}

impl FakeTab {
    pub fn current_url(&self) -> String {
        self.state.lock().unwrap().url.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn selected_term(&self) -> Option<String> {
        self.state.lock().unwrap().term.clone()
    }

    fn page(&self) -> String {
        let state = self.state.lock().unwrap();
        match state.url.as_str() {
            LOGIN_URL => LOGIN_PAGE.to_string(),
            url if url == format!("{}list/academics.classes.list", HOME_URL) => MOBILE_PAGE.to_string(),
            DESKTOP_URL => DESKTOP_PAGE.to_string(),
            ASSIGNMENTS_URL => {
                let pages = &self.portal.class_pages;
                let index = state.class_page.min(pages.len() - 1);
                class_page(&pages[index], index + 1 < pages.len())
            }
            _ => "<html><body></body></html>".to_string(),
        }
    }
}

impl Tab for FakeTab {
    async fn goto(&self, url: &str) -> Result<(), ScrapeError> {
        let delay = self.portal.login_goto_delay_ms.load(Ordering::SeqCst);
        if url == LOGIN_URL && delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }

        let mut state = self.state.lock().unwrap();
        state.url = url.to_string();
        state.username.clear();
        state.password.clear();

        // the page still loads, only the navigation reports an error
        if url == DESKTOP_URL && self.portal.fail_desktop_goto.load(Ordering::SeqCst) {
            return Err(ScrapeError::Navigation(format!("{}: net::ERR_ABORTED", url)));
        }
        Ok(())
    }

    async fn url(&self) -> Result<String, ScrapeError> {
        Ok(self.current_url())
    }

    async fn content(&self) -> Result<String, ScrapeError> {
        Ok(self.page())
    }

    async fn clear_input(&self, selector: &str) -> Result<(), ScrapeError> {
        let mut state = self.state.lock().unwrap();
        match selector {
            "#username" => state.username.clear(),
            "#password" => state.password.clear(),
            _ => return Err(ScrapeError::ElementNotFound(selector.to_string())),
        }
        Ok(())
    }

    async fn type_into(&self, selector: &str, text: &str) -> Result<(), ScrapeError> {
        // typing appends, like a real keyboard
        let mut state = self.state.lock().unwrap();
        match selector {
            "#username" => state.username.push_str(text),
            "#password" => state.password.push_str(text),
            _ => return Err(ScrapeError::ElementNotFound(selector.to_string())),
        }
        Ok(())
    }

    async fn click_and_wait(&self, selector: &str) -> Result<(), ScrapeError> {
        if selector == "input.primary.button" && self.portal.hang_on_submit.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }

        let mut state = self.state.lock().unwrap();
        let url = state.url.clone();
        match (url.as_str(), selector) {
            (LOGIN_URL, "input.primary.button") => {
                if state.username == USERNAME && state.password == PASSWORD {
                    state.url = HOME_URL.to_string();
                }
            }
            (DESKTOP_URL, r#"a[title="List of assignments"]"#) => {
                state.url = ASSIGNMENTS_URL.to_string();
                state.class_page = 0;
            }
            (ASSIGNMENTS_URL, "#nextButton") if state.class_page + 1 < self.portal.class_pages.len() => {
                state.class_page += 1;
            }
            _ => return Err(ScrapeError::ElementNotFound(selector.to_string())),
        }
        Ok(())
    }

    async fn wait_for_selector(&self, selector: &str) -> Result<(), ScrapeError> {
        if selector == ".ui-grid-row" && self.portal.hang_on_mobile_grid.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        if has_element(&self.page(), selector)? {
            Ok(())
        } else {
            Err(ScrapeError::ElementNotFound(selector.to_string()))
        }
    }

    async fn exists(&self, selector: &str) -> Result<bool, ScrapeError> {
        has_element(&self.page(), selector)
    }

    async fn select_value(&self, selector: &str, value: &str) -> Result<(), ScrapeError> {
        if !has_element(&self.page(), selector)? {
            return Err(ScrapeError::ElementNotFound(selector.to_string()));
        }
        self.state.lock().unwrap().term = Some(value.to_string());
        Ok(())
    }

    async fn close(&self) -> Result<(), ScrapeError> {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.close_count.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

#[derive(Clone)]
pub struct FakeLauncher {
    pub portal: Arc<FakePortal>,
    pub launched: Arc<AtomicUsize>,
    pub closed: Arc<AtomicUsize>,
}

impl FakeLauncher {
    pub fn new() -> Self {
        Self::serving(FakePortal::new())
    }

    pub fn serving(portal: FakePortal) -> Self {
        Self {
            portal: Arc::new(portal),
            launched: Arc::new(AtomicUsize::new(0)),
            closed: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn launched(&self) -> usize {
        self.launched.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }
}

impl Launcher for FakeLauncher {
    type Tab = FakeTab;

    async fn launch(&self) -> Result<FakeTab, ScrapeError> {
        let delay = self.portal.launch_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        if self.portal.fail_launch.load(Ordering::SeqCst) {
            return Err(ScrapeError::BrowserLaunch("no chromium in test".to_string()));
        }
        let id = self.launched.fetch_add(1, Ordering::SeqCst);
        Ok(FakeTab {
            id,
            portal: Arc::clone(&self.portal),
            state: Mutex::new(TabState { url: "about:blank".to_string(), ..Default::default() }),
            closed: AtomicBool::new(false),
            close_count: Arc::clone(&self.closed),
        })
    }
}

// Collects formatted log lines so tests can look for a warning
#[derive(Clone, Default)]
pub struct LogCapture(Arc<Mutex<Vec<u8>>>);

impl LogCapture {
    pub fn subscriber(&self) -> impl tracing::Subscriber + Send + Sync + 'static {
        let capture = self.clone();
        tracing_subscriber::fmt()
            .with_writer(move || capture.clone())
            .with_ansi(false)
            .with_max_level(tracing::Level::DEBUG)
            .finish()
    }

    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

impl io::Write for LogCapture {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
