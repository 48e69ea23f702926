mod error;

use clap::{Parser, Subcommand};
use error::App;
use tokio::process::Command;
use zbus::{proxy, Connection};

type StdResult<T> = std::result::Result<T, App>;

#[proxy(
    interface = "org.cybertelly.Player",
    default_service = "org.cybertelly.Player",
    default_path = "/org/cybertelly/Player"
)]
trait Player {
    async fn test_connection(&self) -> zbus::Result<()>;
    async fn play(&self, number: u32) -> zbus::Result<String>;
    async fn play_name(&self, name: &str) -> zbus::Result<String>;
    async fn stop(&self) -> zbus::Result<()>;
    async fn set_volume(&self, level: u8) -> zbus::Result<()>;
    async fn toggle_mute(&self) -> zbus::Result<()>;
    async fn list_channels(&self) -> zbus::Result<Vec<String>>;
    async fn status(&self) -> zbus::Result<String>;
    async fn quit(&self) -> zbus::Result<()>;
}

#[derive(Parser)]
#[command(name = "tvctl", about = "Control the cybertelly player.", version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Play a channel by number or name")]
    Play(PlayCommand),

    #[command(about = "Stop playback")]
    Stop,

    #[command(about = "Set the volume (0-100)")]
    Volume {
        #[arg(value_parser = clap::value_parser!(u8).range(0..=100))]
        level: u8,
    },

    #[command(about = "Mute or unmute")]
    Mute,

    #[command(about = "List the channels")]
    Channels,

    #[command(about = "Show the player status")]
    Status,

    #[command(about = "Start cybertelly")]
    Start,

    #[command(about = "Quit cybertelly")]
    Quit,
}

#[derive(Parser)]
struct PlayCommand {
    #[arg(short = 'n', long = "number", help = "Channel number, starting at 1")]
    number: Option<u32>,
    #[arg(short = 'c', long = "channel", help = "Channel name")]
    name: Option<String>,
}

#[tokio::main]
async fn main() -> StdResult<()> {
    let cli = Cli::parse();
    let connection = Connection::session().await?;
    let proxy = PlayerProxy::new(&connection).await?;
    handle_command(cli, proxy).await
}

async fn handle_command(cli: Cli, proxy: PlayerProxy<'_>) -> StdResult<()> {
    if let Commands::Start = cli.command {
        return start_cybertelly(&proxy).await;
    }
    if !is_running(&proxy).await {
        return Err(App::NotRunning);
    }

    match cli.command {
        Commands::Play(play) => {
            let name = match (play.number, play.name) {
                (Some(number), None) => proxy.play(number).await?,
                (None, Some(name)) => proxy.play_name(&name).await?,
                _ => {
                    return Err(App::InvalidInput(
                        "Give either a channel number or a channel name".to_string(),
                    ))
                }
            };
            println!("Playing {name}");
        }
        Commands::Stop => {
            proxy.stop().await?;
            println!("Stopped");
        }
        Commands::Volume { level } => proxy.set_volume(level).await?,
        Commands::Mute => proxy.toggle_mute().await?,
        Commands::Channels => {
            for (number, name) in proxy.list_channels().await?.iter().enumerate() {
                println!("{:>4}  {name}", number + 1);
            }
        }
        Commands::Status => print!("{}", proxy.status().await?),
        Commands::Quit => {
            proxy.quit().await?;
            println!("cybertelly has quit");
        }
        Commands::Start => {}
    }
    Ok(())
}

async fn is_running(proxy: &PlayerProxy<'_>) -> bool {
    proxy.test_connection().await.is_ok()
}

async fn start_cybertelly(proxy: &PlayerProxy<'_>) -> StdResult<()> {
    if is_running(proxy).await {
        println!("cybertelly is already running");
        return Ok(());
    }

    let current_exe_path = std::env::current_exe()?;
    let exe_dir = current_exe_path.parent().ok_or_else(|| {
        App::InvalidInput("Failed to get the directory of the executable".to_string())
    })?;
    let player_path = exe_dir.join("cybertelly");
    if !player_path.exists() {
        return Err(App::InvalidInput(
            "cybertelly executable not found in the same directory".to_string(),
        ));
    }

    let child = Command::new(player_path).arg("run").spawn()?;
    println!("cybertelly started, process ID: {:?}", child.id());
    Ok(())
}
