//! Command-line surface and the interactive terminal driver

use std::io::Write as _;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, info, warn};

use crate::audio::{list_input_devices, CpalInput};
use crate::network::HttpInterpretationClient;
use crate::state::{AppConfig, ConfigManager, StateEventEmitter};
use crate::utils::error::{AppError, ErrorContext};
use crate::workflow::{PaymentWorkflow, WorkflowError, WorkflowOptions, WorkflowSnapshot};

/// VPay - voice-driven payment capture client
#[derive(Parser, Debug)]
#[command(name = "vpay", version, about)]
pub struct Cli {
    /// Path to the JSON config file (defaults to the platform config dir)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Base URL of the interpretation service
    #[arg(long, env = "VPAY_SERVICE_URL", global = true)]
    pub service_url: Option<String>,

    /// Input device name (defaults to the system default microphone)
    #[arg(short, long, global = true)]
    pub device: Option<String>,

    /// Seconds before returning to the payment phase after authentication
    #[arg(long, global = true)]
    pub auto_reset_secs: Option<u64>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Run the interactive payment workflow (default)
    Run,
    /// List audio input devices
    Devices,
    /// Check that the interpretation service is reachable
    Health,
    /// Inspect or create the config file
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum ConfigAction {
    /// Print the effective configuration
    Show,
    /// Print the config file location
    Path,
    /// Write a default config file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

impl Cli {
    /// Config file location, honouring `--config`
    pub fn config_path(&self) -> anyhow::Result<PathBuf> {
        match &self.config {
            Some(path) => Ok(path.clone()),
            None => Ok(ConfigManager::default_path()?),
        }
    }

    /// Loads the config file and applies command-line overrides
    pub fn load_config(&self) -> anyhow::Result<AppConfig> {
        let path = self.config_path()?;
        let mut config = ConfigManager::load(&path)
            .with_context(|| format!("failed to load config from {}", path.display()))?;
        self.apply_overrides(&mut config);
        config.validate()?;
        Ok(config)
    }

    /// Command-line flags win over file values
    pub fn apply_overrides(&self, config: &mut AppConfig) {
        if let Some(url) = &self.service_url {
            config.service.base_url = url.clone();
        }
        if let Some(device) = &self.device {
            config.audio.input_device_id = Some(device.clone());
        }
        if let Some(secs) = self.auto_reset_secs {
            config.workflow.auto_reset_secs = secs;
        }
    }
}

/// Dispatches the parsed command line
pub async fn run(cli: Cli) -> anyhow::Result<()> {
    match cli.command.clone().unwrap_or(Command::Run) {
        Command::Run => run_interactive(cli.load_config()?).await,
        Command::Devices => list_devices(),
        Command::Health => check_health(&cli.load_config()?).await,
        Command::Config { action } => config_command(&cli, action),
    }
}

fn list_devices() -> anyhow::Result<()> {
    let devices = list_input_devices()?;

    println!("Input devices:");
    for device in devices {
        let marker = if device.is_default { "*" } else { " " };
        let rates = device
            .sample_rates
            .iter()
            .map(u32::to_string)
            .collect::<Vec<_>>()
            .join(", ");
        println!(" {} {} [{} Hz]", marker, device.name, rates);
    }

    Ok(())
}

async fn check_health(config: &AppConfig) -> anyhow::Result<()> {
    let client = HttpInterpretationClient::new(&config.service)?;
    let health = client.health().await?;

    if health.is_healthy() {
        println!("{}: healthy", client.health_url());
        Ok(())
    } else {
        anyhow::bail!("{} reported status '{}'", client.health_url(), health.status)
    }
}

fn config_command(cli: &Cli, action: ConfigAction) -> anyhow::Result<()> {
    let path = cli.config_path()?;

    match action {
        ConfigAction::Show => {
            let config = cli.load_config()?;
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
        ConfigAction::Path => println!("{}", path.display()),
        ConfigAction::Init { force } => {
            if path.exists() && !force {
                anyhow::bail!(
                    "{} already exists (use --force to overwrite)",
                    path.display()
                );
            }
            ConfigManager::save(&path, &AppConfig::default())?;
            println!("Wrote {}", path.display());
        }
    }

    Ok(())
}

/// A line typed into the interactive driver
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DriverCommand {
    Toggle,
    Reset,
    Cancel,
    Status,
    Help,
    Quit,
    Unknown(String),
}

impl DriverCommand {
    pub fn parse(line: &str) -> Self {
        match line.trim().to_ascii_lowercase().as_str() {
            "" | "t" | "toggle" => Self::Toggle,
            "r" | "reset" => Self::Reset,
            "c" | "cancel" => Self::Cancel,
            "s" | "status" => Self::Status,
            "h" | "?" | "help" => Self::Help,
            "q" | "quit" | "exit" => Self::Quit,
            other => Self::Unknown(other.to_string()),
        }
    }
}

const HELP: &str = "Enter: start/stop recording   r: reset   c: cancel recording   s: status   q: quit";

async fn run_interactive(config: AppConfig) -> anyhow::Result<()> {
    let client = HttpInterpretationClient::new(&config.service)?;

    match client.health().await {
        Ok(health) if health.is_healthy() => debug!("Interpretation service is healthy"),
        Ok(health) => warn!(status = %health.status, "Interpretation service reports degraded health"),
        Err(e) => warn!(error = %e, url = %client.health_url(), "Interpretation service unreachable"),
    }

    let workflow = Arc::new(PaymentWorkflow::new(
        Arc::new(CpalInput::new()),
        config.audio.to_constraints(),
        Arc::new(client),
        WorkflowOptions::from(&config.workflow),
    ));

    let mut emitter = StateEventEmitter::start(workflow.state_manager(), |event| {
        println!("[{}]", event.state);
    });

    info!(
        service = %config.service.base_url,
        auto_reset_secs = config.workflow.auto_reset_secs,
        "VPay ready"
    );
    println!("VPay voice payments");
    println!("{}", HELP);
    println!("Say something like \"Pay 20 dollars to Starbucks\".");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    while let Some(line) = lines.next_line().await? {
        match DriverCommand::parse(&line) {
            DriverCommand::Toggle => {
                // The submission runs in the background so the prompt stays live
                let workflow = Arc::clone(&workflow);
                tokio::spawn(async move {
                    let outcome = workflow.toggle_recording().await;
                    report(&workflow, outcome.map(|_| ()));
                });
            }
            DriverCommand::Reset => report(&workflow, workflow.reset().await.map(|_| ())),
            DriverCommand::Cancel => {
                report(&workflow, workflow.cancel_recording().await.map(|_| ()))
            }
            DriverCommand::Status => print!("{}", render_snapshot(&workflow.snapshot())),
            DriverCommand::Help => println!("{}", HELP),
            DriverCommand::Quit => break,
            DriverCommand::Unknown(input) => println!("Unknown command '{}'. {}", input, HELP),
        }
        let _ = std::io::stdout().flush();
    }

    if workflow.state().is_recording() {
        let _ = workflow.cancel_recording().await;
    }

    // Give the emitter a moment to print the final transition
    tokio::time::sleep(Duration::from_millis(20)).await;
    emitter.stop().await;

    info!("VPay stopped");
    Ok(())
}

fn report(workflow: &PaymentWorkflow, outcome: Result<(), WorkflowError>) {
    match outcome {
        Ok(()) => print!("{}", render_snapshot(&workflow.snapshot())),
        Err(err) => {
            let context = ErrorContext::from(&err);
            println!("! {}", context.status_line());
            if let Some(hint) = AppError::from(err).recovery_hint() {
                println!("  {}", hint);
            }
        }
    }
    let _ = std::io::stdout().flush();
}

/// Renders the snapshot as the terminal status panel
pub fn render_snapshot(snapshot: &WorkflowSnapshot) -> String {
    let mut out = String::new();

    out.push_str(&format!(
        "State:       {} (phase: {})\n",
        snapshot.state, snapshot.phase
    ));

    if let Some(transcript) = &snapshot.transcript {
        out.push_str(&format!("Transcript:  {}\n", transcript));
    }
    if let Some(analysis) = &snapshot.analysis {
        if analysis.has_payment_command {
            if let Some(action) = &analysis.action {
                out.push_str(&format!("Action:      {}\n", action));
            }
            if let Some(amount) = snapshot.amount_display() {
                out.push_str(&format!("Amount:      {}\n", amount));
            }
            if let Some(recipient) = snapshot.recipient() {
                out.push_str(&format!("Recipient:   {}\n", recipient));
            }
            if let Some(confidence) = snapshot.confidence_display() {
                out.push_str(&format!("Confidence:  {}\n", confidence));
            }
        } else {
            out.push_str("No payment command detected\n");
        }
    }
    if let Some(auth) = &snapshot.authentication {
        let verdict = match (auth.authenticated, &auth.user_id) {
            (true, Some(user)) => format!("authenticated as {}", user),
            (true, None) => "authenticated".to_string(),
            (false, _) => "not authenticated".to_string(),
        };
        match snapshot.similarity_display() {
            Some(similarity) => {
                out.push_str(&format!("Voice match: {} ({})\n", similarity, verdict))
            }
            None => out.push_str(&format!("Voice match: {}\n", verdict)),
        }
    }
    if let Some(path) = &snapshot.recording_path {
        out.push_str(&format!("Recording:   {}\n", path.display()));
    }
    if let Some(status) = &snapshot.status_message {
        out.push_str(&format!("Status:      {}\n", status));
    }

    if !snapshot.device_available {
        out.push_str("Microphone unavailable; recording is disabled\n");
    } else if snapshot.shows_auth_prompt() && !snapshot.state.is_recording() {
        out.push_str("Press Enter and say your PIN to authenticate\n");
    }
    if snapshot.auto_reset_pending {
        out.push_str("Returning to a new payment shortly (r to reset now)\n");
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::{AuthenticationOutcome, PaymentAnalysis};
    use crate::state::{WorkflowPhase, WorkflowState};

    fn snapshot(state: WorkflowState) -> WorkflowSnapshot {
        WorkflowSnapshot {
            state,
            phase: state.phase(),
            controls_enabled: state.controls_enabled(),
            device_available: true,
            auto_reset_pending: false,
            transcript: None,
            analysis: None,
            authentication: None,
            failure: None,
            status_message: None,
            recording_path: None,
            recording_duration_ms: None,
        }
    }

    #[test]
    fn test_parse_driver_commands() {
        assert_eq!(DriverCommand::parse(""), DriverCommand::Toggle);
        assert_eq!(DriverCommand::parse("  R "), DriverCommand::Reset);
        assert_eq!(DriverCommand::parse("cancel"), DriverCommand::Cancel);
        assert_eq!(DriverCommand::parse("s"), DriverCommand::Status);
        assert_eq!(DriverCommand::parse("q"), DriverCommand::Quit);
        assert_eq!(
            DriverCommand::parse("pay"),
            DriverCommand::Unknown("pay".to_string())
        );
    }

    #[test]
    fn test_cli_overrides() {
        let cli = Cli::parse_from([
            "vpay",
            "--service-url",
            "https://pay.example.com",
            "--device",
            "USB Mic",
            "--auto-reset-secs",
            "9",
            "health",
        ]);
        assert_eq!(cli.command, Some(Command::Health));

        let mut config = AppConfig::default();
        cli.apply_overrides(&mut config);
        assert_eq!(config.service.base_url, "https://pay.example.com");
        assert_eq!(config.audio.input_device_id.as_deref(), Some("USB Mic"));
        assert_eq!(config.workflow.auto_reset_secs, 9);
    }

    #[test]
    fn test_cli_config_subcommand() {
        let cli = Cli::parse_from(["vpay", "config", "init", "--force"]);
        assert_eq!(
            cli.command,
            Some(Command::Config {
                action: ConfigAction::Init { force: true }
            })
        );
    }

    #[test]
    fn test_render_payment_analysis() {
        let mut snap = snapshot(WorkflowState::AwaitingPin);
        snap.transcript = Some("pay twenty dollars to Starbucks".to_string());
        snap.analysis = Some(PaymentAnalysis {
            transcript: "pay twenty dollars to Starbucks".to_string(),
            has_payment_command: true,
            action: Some("pay".to_string()),
            amount_minor_units: Some(2000),
            currency: Some("USD".to_string()),
            recipient: Some("Starbucks".to_string()),
            confidence: Some(0.9),
            status_message: "Please say your PIN".to_string(),
            next_phase: WorkflowPhase::AuthCapture,
        });
        snap.status_message = Some("Please say your PIN".to_string());

        let text = render_snapshot(&snap);
        assert!(text.contains("State:       AwaitingPin (phase: auth)"));
        assert!(text.contains("Amount:      $20.00"));
        assert!(text.contains("Recipient:   Starbucks"));
        assert!(text.contains("Confidence:  90.0%"));
        assert!(text.contains("say your PIN to authenticate"));
    }

    #[test]
    fn test_render_authentication() {
        let mut snap = snapshot(WorkflowState::AuthResolved);
        snap.authentication = Some(AuthenticationOutcome {
            authenticated: true,
            user_id: Some("user-1".to_string()),
            similarity_score: Some(0.93),
            status_message: "Payment authorized".to_string(),
        });
        snap.auto_reset_pending = true;

        let text = render_snapshot(&snap);
        assert!(text.contains("Voice match: 93.0% (authenticated as user-1)"));
        assert!(text.contains("Returning to a new payment shortly"));
        assert!(!text.contains("say your PIN"));
    }

    #[test]
    fn test_render_device_unavailable() {
        let mut snap = snapshot(WorkflowState::AwaitingCommand);
        snap.device_available = false;
        snap.status_message = Some("Microphone access is unavailable".to_string());

        let text = render_snapshot(&snap);
        assert!(text.contains("recording is disabled"));
    }
}
