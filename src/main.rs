use anyhow::{bail, Context, Result};
use clap::Parser;
use oak_grades::{
    browser::ChromeLauncher,
    business::current_time,
    logging, Availability, Credentials, GradeService, LogSettings, PortalConfig
};
use serde_json::json;
use tracing::info;

// Log into the portal once and print grades and assignments as JSON
#[derive(Debug, Parser)]
#[command(name = "oak-grades", version, about)]
struct Cli {
    #[arg(long, env = "OAK_USERNAME")]
    username: String,

    #[arg(long, env = "OAK_PASSWORD", hide_env_values = true)]
    password: String,

    /// Show the browser window
    #[arg(long)]
    head: bool,

    /// Log to the console as JSON lines instead of plain text
    #[arg(long)]
    json_logs: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // .env first so clap can see OAK_USERNAME / OAK_PASSWORD from it
    let log_settings = LogSettings::from_env();
    let cli = Cli::parse();
    let _log_guards = logging::init(&log_settings, cli.json_logs).context("could not open log files")?;

    // after the subscriber, so bad settings get their warning
    let mut config = PortalConfig::from_env();

    if cli.head {
        config.headless = false;
    }

    info!(login_url = %config.login_url, headless = config.headless, "starting portal session");

    let launcher = ChromeLauncher::new(config.headless);
    let service = GradeService::new(launcher, config).context("invalid portal configuration")?;
    service.warm_up().await.context("could not open the default browser slot")?;

    let credentials = Credentials { username: cli.username, password: cli.password };
    let outcome = service.submit_credentials(credentials).await;

    let handle = match outcome {
        Ok(handle) => handle,
        Err(e) => {
            service.shutdown().await;
            bail!(e);
        }
    };

    let grades = service.get_grades(handle).await?;
    let assignments = service.get_assignments(handle).await?;
    let session = service.session(handle).await?;
    service.logout(handle).await;
    service.shutdown().await;

    if !grades.is_ready() {
        bail!("the portal returned no grades, try again later");
    }

    let report = json!({
        "user": session.username,
        "fetchedAt": current_time(),
        "loginSeconds": session.timing.login_elapsed_secs,
        "grades": grades.ready().unwrap_or_default(),
        "assignments": match assignments {
            Availability::Ready(assignments) => json!(assignments),
            Availability::NotReady => json!(null),
        },
    });

    println!("{}", serde_json::to_string_pretty(&report).context("could not serialize report")?);

    Ok(())
}
