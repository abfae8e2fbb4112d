use anyhow::{Context, Result};
use animatek_ipc::{
    CalendarRegistration, IpcError, LightRequest, Request, Response, SessionPatch, TimerAction,
    TimerSnapshot, SOCKET_PATH,
};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixStream;

#[derive(Parser)]
#[command(name = "animatekctl")]
#[command(about = "Control the Animatek session timer", long_about = None)]
struct Cli {
    /// Control socket of the running daemon
    #[arg(long, env = "ANIMATEK_SOCKET", default_value = SOCKET_PATH)]
    socket: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the timer
    Start,
    /// Pause the timer
    Pause,
    /// Resume the timer
    Resume,
    /// Reset the timer
    Reset,
    /// Finish the session now and record it
    Finish,
    /// Add (or with a negative value, remove) seconds
    Add {
        #[arg(allow_hyphen_values = true)]
        seconds: i64,
    },
    /// Set the session duration in minutes
    Duration { minutes: u64 },
    /// Set the category (also becomes the session name)
    Category { name: String },
    /// Set the session name
    Name { name: String },
    /// Set the session language
    Language { code: String },
    /// Set the session type (e.g. privada, publica)
    Type { kind: String },
    /// Get timer status
    Status,
    /// Show the configuration, or merge a JSON object into it
    Config {
        #[arg(long)]
        set: Option<String>,
    },
    /// List completed sessions
    Sessions,
    /// Delete a session by id
    Delete { id: i64 },
    /// Delete every session
    Clear,
    /// Edit a stored session
    Patch {
        id: i64,
        #[arg(long)]
        url: Option<String>,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        category: Option<String>,
        #[arg(long)]
        minutes: Option<i64>,
    },
    /// Minutes and hours per category
    Stats,
    /// Replace local sessions with the spreadsheet contents
    Import,
    /// Control the lights
    Lights {
        #[command(subcommand)]
        command: LightCommands,
    },
}

#[derive(Subcommand)]
enum LightCommands {
    On { device: Option<String> },
    Off { device: Option<String> },
    Color { device: String, color: String },
    Brightness { device: String, percent: u8 },
    Preset { name: String },
    Blink,
    Status,
}

impl Commands {
    fn into_request(self) -> Result<Request> {
        let timer = Request::Timer;
        Ok(match self {
            Commands::Start => timer(TimerAction::Start),
            Commands::Pause => timer(TimerAction::Pause),
            Commands::Resume => timer(TimerAction::Resume),
            Commands::Reset => timer(TimerAction::Reset),
            Commands::Finish => timer(TimerAction::Finish),
            Commands::Add { seconds } => timer(TimerAction::Add(seconds)),
            Commands::Duration { minutes } => timer(TimerAction::SetDurationSec(
                minutes
                    .checked_mul(60)
                    .and_then(|secs| i64::try_from(secs).ok())
                    .with_context(|| format!("{minutes} minutes is out of range"))?,
            )),
            Commands::Category { name } => timer(TimerAction::SetCategory(name)),
            Commands::Name { name } => timer(TimerAction::SetSessionName(name)),
            Commands::Language { code } => timer(TimerAction::SetLanguage(code)),
            Commands::Type { kind } => timer(TimerAction::SetSessionType(kind)),
            Commands::Status => Request::Status,
            Commands::Config { set: None } => Request::GetConfig,
            Commands::Config { set: Some(json) } => Request::UpdateConfig(
                serde_json::from_str(&json).context("--set expects a JSON object")?,
            ),
            Commands::Sessions => Request::ListSessions,
            Commands::Delete { id } => Request::DeleteSession { id },
            Commands::Clear => Request::ClearSessions,
            Commands::Patch {
                id,
                url,
                name,
                category,
                minutes,
            } => Request::PatchSession {
                id,
                patch: SessionPatch {
                    url,
                    session_name: name,
                    category,
                    duration_min: minutes,
                    duration_sec: minutes.map(|m| m * 60),
                    ..Default::default()
                },
            },
            Commands::Stats => Request::Stats,
            Commands::Import => Request::ImportFromSheet,
            Commands::Lights { command } => Request::Lights(match command {
                LightCommands::On { device: None } => LightRequest::AllOn,
                LightCommands::Off { device: None } => LightRequest::AllOff,
                LightCommands::On { device: Some(device) } => {
                    LightRequest::Power { device, on: true }
                }
                LightCommands::Off { device: Some(device) } => {
                    LightRequest::Power { device, on: false }
                }
                LightCommands::Color { device, color } => LightRequest::Color { device, color },
                LightCommands::Brightness { device, percent } => {
                    LightRequest::Brightness { device, percent }
                }
                LightCommands::Preset { name } => LightRequest::Preset { name },
                LightCommands::Blink => LightRequest::Blink,
                LightCommands::Status => LightRequest::Status,
            }),
        })
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let request = cli.command.into_request()?;

    let response = send_request(&cli.socket, &request).await?;

    match response {
        Response::Ok => println!("OK"),
        Response::State(state) => print_state(&state),
        Response::Config(config) => println!("{}", serde_json::to_string_pretty(&config)?),
        Response::Sessions(sessions) => {
            for s in sessions {
                let registered = match s.calendar() {
                    Some(CalendarRegistration::External(_)) => "calendar",
                    Some(CalendarRegistration::Local(_)) => "ics",
                    None => "-",
                };
                println!(
                    "{}  {}  {:>4} min  {:<12} {} {}  [{}]",
                    s.id,
                    s.start.format("%Y-%m-%d %H:%M"),
                    s.duration_min,
                    s.category,
                    s.language,
                    s.session_type,
                    registered
                );
            }
        }
        Response::Session(s) => println!("{} updated: {} {} min", s.id, s.category, s.duration_min),
        Response::Removed(n) => println!("Removed {} session(s)", n),
        Response::Stats(stats) => {
            for (category, hours) in &stats.totals_hours {
                println!("{:<16} {:>8.2} h", category, hours);
            }
            println!("{} session(s)", stats.count);
        }
        Response::Imported(n) => println!("Imported {} session(s)", n),
        Response::Devices(devices) => {
            for d in devices {
                let color = d
                    .color
                    .map(|c| format!("rgb({}, {}, {})", c.r, c.g, c.b))
                    .unwrap_or_else(|| "-".to_string());
                let brightness = d
                    .brightness
                    .map(|b| format!("{b}%"))
                    .unwrap_or_else(|| "-".to_string());
                println!("{:<10} {:<12} {:<8} {:>5} {}", d.key, d.name, d.power, brightness, color);
            }
        }
        Response::Error(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    }

    Ok(())
}

fn print_state(state: &TimerSnapshot) {
    let remaining = state.remaining_sec;
    println!("State: {:?}", state.state);
    println!(
        "Remaining: {:02}:{:02}:{:02} of {} min",
        remaining / 3600,
        (remaining % 3600) / 60,
        remaining % 60,
        state.duration_sec / 60
    );
    println!("Category: {} ({})", state.category, state.session_name);
    println!("Language: {}  Type: {}", state.language, state.session_type);
}

async fn send_request(socket: &Path, request: &Request) -> Result<Response> {
    let mut stream = UnixStream::connect(socket)
        .await
        .map_err(|_| IpcError::ConnectionRefused)
        .with_context(|| format!("Could not connect to {:?}", socket))?;

    let msg = serde_json::to_vec(request)?;
    stream.write_all(&msg).await?;
    stream.write_all(b"\n").await?;

    // Session lists can be large; read until the daemon closes
    let mut buf = Vec::new();
    stream.read_to_end(&mut buf).await?;
    let response: Response = serde_json::from_slice(&buf)?;

    Ok(response)
}
