mod auth;
mod channel;
mod config;
mod console;
mod notify;
mod session;

use anyhow::{bail, Context, Result};
use auth::{AccessToken, AuthorizationRequest};
use channel::WebSocketConnector;
use clap::{Parser, Subcommand};
use config::ControllerConfig;
use notify::Notification;
use session::SessionManager;
use smartlight_shared::actions;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::time::{timeout_at, Instant};

use tracing::{debug, error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Time given to link tasks to send their close frames on exit
const CLOSE_GRACE: Duration = Duration::from_millis(250);

#[derive(Debug, Parser)]
#[command(name = "smartlight-controller", version, about = "Control a Smart Light through ARTIK Cloud")]
struct Cli {
    /// Path to the TOML config file
    #[arg(short, long, default_value = config::CONFIG_FILENAME)]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Obtain a user access token through the browser login
    Login,
    /// Open both channels and control the light interactively
    Run {
        /// User access token from `login`; authorizes the firehose
        #[arg(long, env = "SMARTLIGHT_ACCESS_TOKEN", hide_env_values = true)]
        access_token: Option<String>,
    },
    /// Send a single action (`on`, `off`, or any action name) and wait for the ack
    Send {
        action: String,
        #[arg(long, default_value_t = 10)]
        timeout_secs: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing; stdout is reserved for console output
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    if rustls::crypto::ring::default_provider().install_default().is_err() {
        warn!("A TLS crypto provider was already installed");
    }

    let cli = Cli::parse();

    let mut config = ControllerConfig::load(&cli.config)?;
    config.apply_env();

    match cli.command {
        Command::Login => login(&config).await,
        Command::Run { access_token } => run(&config, access_token).await,
        Command::Send {
            action,
            timeout_secs,
        } => send(&config, &action, Duration::from_secs(timeout_secs)).await,
    }
}

/// Print the authorization URL and turn the pasted redirect into a token
async fn login(config: &ControllerConfig) -> Result<()> {
    config.validate_oauth()?;
    let request = AuthorizationRequest::new(&config.oauth)?;
    debug!("Login state nonce {}", request.state());

    println!("Open this URL in a browser and sign in:\n\n  {}\n", request.url());
    println!("Then paste the URL you were redirected to ({}...):", config.oauth.redirect_uri);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if !request.is_redirect(line) {
            println!("That is not the redirect URL, try again:");
            continue;
        }

        let token = request.complete(line)?;
        info!("Login succeeded");
        println!("Access token: {}", token.secret());
        println!("Token type:   {}", token.token_type());
        if let Some(at) = token.expires_at_ms() {
            println!("Expires at:   {} ms", at);
        }
        println!("\nExport it as SMARTLIGHT_ACCESS_TOKEN for `run`.");
        return Ok(());
    }

    bail!("stdin closed before a redirect URL was entered")
}

fn start_session(config: &ControllerConfig) -> Result<SessionManager> {
    config.validate().context("Invalid configuration")?;
    info!(
        "Controlling {} ({})",
        config.device.name, config.device.id
    );
    info!("  firehose: {}", config.endpoints.firehose_url);
    info!("  device channel: {}", config.endpoints.control_url);
    Ok(SessionManager::new(
        config.session_config(),
        Arc::new(WebSocketConnector),
    ))
}

const HELP: &str = "Commands: on | off | status | connect | disconnect | login | help | quit";

/// Interactive mode
async fn run(config: &ControllerConfig, access_token: Option<String>) -> Result<()> {
    let session = start_session(config)?;

    if let Some(secret) = access_token.filter(|t| !t.trim().is_empty()) {
        session
            .set_access_token(AccessToken::new(secret.trim(), "bearer", None))
            .await?;
    }

    tokio::spawn(console::run_observer(session.subscribe()));
    println!("Controlling device {}", session.device_id());

    println!("WebSocket /live: connecting ...");
    session.connect_telemetry().await?;
    println!("WebSocket /websocket: connecting ...");
    session.connect_control().await?;
    println!("{}", HELP);

    let mut pending_login = None;
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                if !handle_input(&session, &mut pending_login, line.trim()).await {
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
        }
    }

    session.shutdown().await?;
    tokio::time::sleep(CLOSE_GRACE).await;
    Ok(())
}

/// Returns false when the user asked to quit
async fn handle_input(
    session: &SessionManager,
    pending_login: &mut Option<AuthorizationRequest>,
    input: &str,
) -> bool {
    if let Some(request) = pending_login.as_ref().filter(|r| r.is_redirect(input)) {
        match request.complete(input) {
            Ok(token) => {
                *pending_login = None;
                if let Err(e) = relogin_telemetry(session, token).await {
                    error!("{}", e);
                }
            }
            Err(e) => println!("Login failed: {}", e),
        }
        return true;
    }

    match input.to_ascii_lowercase().as_str() {
        "" => {}
        "on" => report_submission(session.turn_on().await),
        "off" => report_submission(session.turn_off().await),
        "status" => match session.status().await {
            Ok(status) => println!(
                "telemetry: {}, control: {}",
                status.telemetry, status.control
            ),
            Err(e) => error!("{}", e),
        },
        "connect" => {
            for result in [
                session.connect_telemetry().await,
                session.connect_control().await,
            ] {
                if let Err(e) = result {
                    println!("{}", e);
                }
            }
        }
        "disconnect" => {
            for result in [
                session.disconnect_telemetry().await,
                session.disconnect_control().await,
            ] {
                if let Err(e) = result {
                    error!("{}", e);
                }
            }
        }
        "login" => match session.authorization_request() {
            Ok(request) => {
                println!("Open this URL, sign in, then paste the redirect URL:\n  {}", request.url());
                *pending_login = Some(request);
            }
            Err(e) => println!("Cannot start login: {}", e),
        },
        "help" | "?" => println!("{}", HELP),
        "quit" | "exit" | "q" => return false,
        other => println!("Unknown command '{}'. {}", other, HELP),
    }
    true
}

/// Reopen the firehose with a fresh user token
async fn relogin_telemetry(session: &SessionManager, token: AccessToken) -> Result<()> {
    info!("Login succeeded, reconnecting telemetry");
    session.set_access_token(token).await?;
    session.disconnect_telemetry().await?;
    session.connect_telemetry().await?;
    Ok(())
}

fn report_submission(result: Result<session::Submission, session::SubmitError>) {
    match result {
        Ok(submission) => println!("Sent {} (ts {})", submission.cid, submission.ts),
        Err(e) => println!("Not sent: {}", e),
    }
}

/// Map the short forms onto action names
fn action_name(action: &str) -> &str {
    match action.to_ascii_lowercase().as_str() {
        "on" => actions::SET_ON,
        "off" => actions::SET_OFF,
        _ => action,
    }
}

/// One-shot mode: register, send one action, wait for its ack
async fn send(config: &ControllerConfig, action: &str, wait: Duration) -> Result<()> {
    let session = start_session(config)?;
    let mut rx = session.subscribe();
    let deadline = Instant::now() + wait;

    session.connect_control().await?;
    wait_for(&mut rx, deadline, |n| matches!(n, Notification::ControlRegistered))
        .await
        .context("Device registration failed")?;

    let submission = session.send_action(action_name(action)).await?;
    info!("Sent {} at {}", submission.cid, submission.ts);

    let ack = wait_for(&mut rx, deadline, |n| matches!(n, Notification::ControlAck { .. }))
        .await
        .context("No acknowledgement")?;
    println!("{}", console::render(&ack));

    session.shutdown().await?;
    tokio::time::sleep(CLOSE_GRACE).await;
    Ok(())
}

/// Wait for a notification matching `want`; a control error or close fails the wait
async fn wait_for(
    rx: &mut broadcast::Receiver<Notification>,
    deadline: Instant,
    want: impl Fn(&Notification) -> bool,
) -> Result<Notification> {
    loop {
        let notification = match timeout_at(deadline, rx.recv()).await {
            Err(_) => bail!("timed out"),
            Ok(Err(RecvError::Lagged(missed))) => {
                warn!("Missed {} notifications", missed);
                continue;
            }
            Ok(Err(RecvError::Closed)) => bail!("session stopped"),
            Ok(Ok(notification)) => notification,
        };

        if want(&notification) {
            return Ok(notification);
        }
        match notification {
            Notification::ControlError { reason } | Notification::ControlClosed { reason } => {
                bail!(reason)
            }
            other => info!("{}", console::render(&other)),
        }
    }
}
