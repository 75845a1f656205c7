use std::collections::HashSet;
use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

mod bus;
mod channel;
mod console;
mod mock;
mod reconciler;
mod state;

use channel::ChannelRegistry;
use channel::ws::WsConnector;
use console::{ConsoleCommand, HELP, ParseError};
use matchsync::{ClientCommand, MockServerSection, Namespace, Outcome, events};
use reconciler::Subscription;
use state::config::SystemConfig;
use state::{ClientError, ClientState, PromptClaim};

#[derive(Parser, Debug, Clone)]
#[command(name = "matchsync", about = "Battle matchmaking client")]
struct Cli {
    /// Config file path (default: ~/.config/matchsync/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Bearer credential for the battle server
    #[arg(long, global = true, env = "MATCHSYNC_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Server base URL, overrides `[server] url`
    #[arg(long, global = true)]
    server: Option<String>,

    /// Locale sent as Accept-Language, overrides `[server] locale`
    #[arg(long, global = true)]
    locale: Option<String>,

    /// Debug logging (ignored when RUST_LOG is set)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug, Clone)]
enum Command {
    /// Interactive console: queue, answer prompts, follow the match
    Play {
        /// Accept every match-found prompt automatically
        #[arg(long)]
        auto_accept: bool,
    },
    /// Log every frame of one namespace
    Tail {
        #[arg(long, value_enum)]
        namespace: Namespace,
        /// Also join the rooms of this match (matching namespace)
        #[arg(long)]
        match_id: Option<String>,
    },
    /// Run the scripted mock battle server
    MockServer {
        /// Bind address (default: `[mock_server] bind`)
        #[arg(long)]
        bind: Option<String>,
        /// Rounds per scripted match
        #[arg(long, default_value_t = 3)]
        rounds: u32,
    },
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else if cli.verbose {
        EnvFilter::new("matchsync=debug,audit=debug")
    } else {
        EnvFilter::new("matchsync=info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    tracing::debug!("debug logging enabled");

    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(state::config::default_config_path);
    let system = SystemConfig::new(config_path);
    system.override_with(|config| {
        if let Some(url) = &cli.server {
            config.server.url = url.clone();
        }
        if let Some(locale) = &cli.locale {
            config.server.locale = locale.clone();
        }
        if let Command::Play { auto_accept: true } = cli.command {
            config.matching.auto_accept = true;
        }
    });

    let rt = tokio::runtime::Runtime::new()?;

    match cli.command.clone() {
        Command::MockServer { bind, rounds } => {
            let bind = bind
                .or_else(|| system.snapshot().mock_server.map(|m| m.bind))
                .unwrap_or_else(|| MockServerSection::default().bind);
            let settings = mock::MockSettings {
                rounds,
                ..Default::default()
            };
            rt.block_on(mock::run(&bind, settings))
        }
        Command::Play { .. } => {
            let client = connect(system, cli.token)?;
            let result = rt.block_on(play(&client));
            client.logout();
            result
        }
        Command::Tail {
            namespace,
            match_id,
        } => {
            let client = connect(system, cli.token)?;
            let result = rt.block_on(tail(&client, namespace, match_id));
            client.logout();
            result
        }
    }
}

/// Build the client against the configured server and log in.
fn connect(system: SystemConfig, token: Option<String>) -> anyhow::Result<ClientState> {
    let token = token
        .filter(|t| !t.trim().is_empty())
        .context("no credential: pass --token or set MATCHSYNC_TOKEN")?;
    let config = system.snapshot();
    tracing::info!("server {} (locale {})", config.server.url, config.server.locale);

    let connector = WsConnector::new(config.server.url.clone(), config.transport.clone());
    let registry = ChannelRegistry::new(Box::new(connector), config.server.locale.clone());
    let client = ClientState::new(system, registry);
    client.login(token);
    Ok(client)
}

// ---------------------------------------------------------------------------
// play
// ---------------------------------------------------------------------------

fn report(action: &str, outcome: Outcome) {
    if let Outcome::Dropped(reason) = outcome {
        println!("{action} ignored: {reason}");
    }
}

async fn play(client: &ClientState) -> anyhow::Result<()> {
    let matching = client.mount_matching()?;
    let notifications = client.mount_notifications()?;
    let mut sessions = client.matches.subscribe();
    let mut toasts = client.notifications.subscribe();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut prompt: Option<PromptClaim> = None;
    let mut printed: HashSet<String> = HashSet::new();

    println!("{HELP}");
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            session = sessions.recv() => {
                let Ok(session) = session else { break };
                // The console renders the prompt itself while it is open.
                if session.prompt_open {
                    prompt.get_or_insert_with(|| client.matches.claim_prompt());
                } else {
                    prompt = None;
                }
                println!("> {}", console::describe(&session));
            }
            visible = toasts.recv() => {
                let Ok(visible) = visible else { break };
                for toast in &visible {
                    if printed.insert(toast.notification.notification_id.clone()) {
                        println!("* {}", console::describe_toast(toast));
                    }
                }
            }
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                match ConsoleCommand::parse(&line) {
                    Ok(ConsoleCommand::Queue) => report("queue", matching.join_queue()),
                    Ok(ConsoleCommand::Leave) => {
                        if !matching.leave_queue() {
                            println!("not in queue");
                        }
                    }
                    Ok(ConsoleCommand::Accept) => report("accept", matching.accept()),
                    Ok(ConsoleCommand::Reject) => report("reject", matching.reject()),
                    Ok(ConsoleCommand::Dismiss(id)) => {
                        if !client.dismiss_notification(&id) {
                            println!("no visible notification {id}");
                        }
                    }
                    Ok(ConsoleCommand::Status) => {
                        println!("> {}", console::describe(&client.matches.snapshot()));
                    }
                    Ok(ConsoleCommand::Help) => println!("{HELP}"),
                    Ok(ConsoleCommand::Quit) => break,
                    Err(ParseError::Empty) => {}
                    Err(e) => println!("{e}\n{HELP}"),
                }
            }
        }
    }

    drop(prompt);
    notifications.unmount();
    matching.unmount();
    Ok(())
}

// ---------------------------------------------------------------------------
// tail
// ---------------------------------------------------------------------------

async fn tail(
    client: &ClientState,
    namespace: Namespace,
    match_id: Option<String>,
) -> anyhow::Result<()> {
    let credential = client.credential().ok_or(ClientError::NotAuthenticated)?;
    let channel = client.registry.acquire(namespace, &credential);
    let mut subscription = Subscription::new(channel);

    subscription.on(events::ANY, move |frame| {
        tracing::info!("{namespace}: {} {}", frame.event, frame.data);
    });
    subscription.join_on_connect(move |channel| match (namespace, &match_id) {
        (Namespace::User, _) => channel.send_command(ClientCommand::JoinUserRoom),
        (Namespace::Matching, Some(id)) => {
            channel.send_command(ClientCommand::JoinMatchingRoom {
                match_id: id.clone(),
            });
            channel.send_command(ClientCommand::JoinUserMatchRoom {
                match_id: id.clone(),
            });
        }
        (Namespace::Matching, None) => {}
    });

    tracing::info!("tailing {namespace}, Ctrl-C to stop");
    tokio::signal::ctrl_c().await?;
    subscription.cancel();
    Ok(())
}
