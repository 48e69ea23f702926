mod config;
mod dbus;
mod diagnostics;
mod error;
mod notifier;
mod player;
mod source;
mod worker;

use crate::config::{Config, Paths};
use crate::diagnostics::{DiagnosticLog, LOG_FILE_NAME};
use crate::error::App;
use crate::notifier::LogNotifier;
use crate::player::session::{PlaybackSession, SessionTimings};
use crate::player::{Intent, Player};
use crate::source::tvh::ServerCheck;
use crate::source::ChannelSource;
use crate::worker::gst_engine::GstFactory;
use crate::worker::handle::{ExecutionContext, WorkerHandle};
use clap::{Parser, Subcommand};
use flexi_logger::{Cleanup, Criterion, Duplicate, FileSpec, Logger, LoggerHandle, Naming};
use log::{error, info};
use std::path::PathBuf;
use std::process;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task;

#[derive(Parser)]
#[command(
    name = "cybertelly",
    about = "TV player for TVHeadend servers and M3U playlists.",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Start the player (default)")]
    Run(RunCommand),

    #[command(about = "Print the channel list of the configured source")]
    Channels,

    #[command(name = "worker", hide = true)]
    Worker,
}

#[derive(Parser, Default)]
struct RunCommand {
    #[arg(
        short = 'w',
        long = "window-handle",
        default_value_t = 0,
        help = "Native window to render into; 0 lets the engine open its own"
    )]
    window_handle: u64,
    #[arg(short = 'c', long = "channel", help = "Channel number to start with")]
    channel: Option<u32>,
    #[arg(long = "in-process", help = "Run the media engine on a thread instead of a child process")]
    in_process: bool,
}

#[tokio::main]
async fn main() -> Result<(), App> {
    let cli = Cli::parse();

    if let Some(Commands::Worker) = cli.command {
        Logger::try_with_str("warn")?.log_to_stderr().start()?;
        let result = worker::process::serve_stdio(GstFactory).await;
        if let Err(e) = &result {
            error!("Media worker failed: {e}");
        }
        return result;
    }

    let home_dir = std::env::var("HOME")
        .map_err(|e| App::Io(format!("Failed to get HOME environment variable: {e}")))?;
    let paths = Paths::from_home(&PathBuf::from(home_dir));
    paths.create_dirs().await?;
    let _logger = start_logger(&paths)?;

    let config = Config::load(&paths.config_file()).await?;
    let source = ChannelSource::from_config(&config, &paths.m3u())?;

    match cli.command.unwrap_or(Commands::Run(RunCommand::default())) {
        Commands::Channels => {
            if let ChannelSource::Tvh(client) = &source {
                let check = client.check().await;
                if check != ServerCheck::Ok {
                    return Err(App::Network(format!(
                        "TVHeadend server {}: {check:?}",
                        config.tvh_server.url
                    )));
                }
            }
            for (number, channel) in source.channels().await?.iter().enumerate() {
                println!("{:>4}  {}", number + 1, channel.name);
            }
        }
        Commands::Run(run) => run_player(run, config, source, &paths).await?,
        Commands::Worker => {}
    }
    process::exit(0);
}

fn start_logger(paths: &Paths) -> Result<LoggerHandle, App> {
    let handle = Logger::try_with_str("info")?
        .log_to_file(FileSpec::default().directory(paths.logs()))
        .rotate(
            Criterion::Size(1_000_000),
            Naming::Timestamps,
            Cleanup::KeepLogFiles(3),
        )
        .duplicate_to_stderr(Duplicate::None)
        .start()?;
    Ok(handle)
}

async fn run_player(
    run: RunCommand,
    config: Config,
    source: ChannelSource,
    paths: &Paths,
) -> Result<(), App> {
    let out_of_process = config.worker.out_of_process && !run.in_process;
    let (control, context) = if out_of_process {
        let program = std::env::current_exe()?;
        let (control, context) = worker::process::spawn(&program)?;
        (control, Box::new(context) as Box<dyn ExecutionContext>)
    } else {
        let (control, context) = worker::spawn_thread(GstFactory)?;
        (control, Box::new(context) as Box<dyn ExecutionContext>)
    };
    info!(
        "Media worker running {}",
        if out_of_process {
            "out of process"
        } else {
            "in process"
        }
    );

    let session = PlaybackSession::new(
        WorkerHandle::new(control, context),
        config.volume,
        SessionTimings::default(),
    );
    let log = DiagnosticLog::new(paths.root.join(LOG_FILE_NAME));
    let notifier = LogNotifier::new(&config.language);
    let engine_args = config.engine_args.clone();
    let mut player = Player::new(session, source, log, notifier)
        .with_config(config, paths.config_file());
    player.load_channels().await;
    player.setup_engine(run.window_handle, engine_args).await;

    let (intent_sender, intent_receiver) = mpsc::channel(8);
    let (stop_sender, _) = watch::channel(());

    task::spawn({
        let intent_sender = intent_sender.clone();
        let stop_signal = stop_sender.clone();
        async move {
            if let Err(e) = dbus::run_dbus_server(intent_sender, stop_signal).await {
                error!("DBus server error: {e}");
            }
        }
    });

    if let Some(number) = run.channel {
        let index = usize::try_from(number.saturating_sub(1)).unwrap_or_default();
        let (reply, answer) = oneshot::channel();
        intent_sender.send(Intent::PlayChannel(index, reply)).await?;
        task::spawn(async move {
            match answer.await {
                Ok(Ok(name)) => info!("Started with {name}"),
                Ok(Err(e)) => error!("Start channel: {e}"),
                Err(_) => {}
            }
        });
    }

    player.run(intent_receiver, stop_sender).await
}
