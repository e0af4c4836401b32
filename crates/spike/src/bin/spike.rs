use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use tracing::warn;

use spike::agent::{self, AgentObserver, AnthropicClient, Message};
use spike::apps::AppRegistry;
use spike::config::{
    discover, ConfigWatcher, CredentialStore, DiscoverOptions, EnvCredentials, ResolvedConfig,
};
use spike::fleet::Fleet;
use spike::reconnect::ReconnectScheduler;
use spike::server::{self, SharedFleet};
use spike::session::{NoPrompter, Prompter, ShellOutcome, ShellSession};
use spike::status;
use spike::toolset::ToolsetController;

#[derive(Parser)]
#[command(name = "spike")]
#[command(about = "Federate MCP tool servers behind a single endpoint")]
struct Cli {
    /// Verbose diagnostic logging to stderr.
    #[arg(long, global = true)]
    verbose: bool,

    /// Extra config file (absolute or relative to the working directory).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Inline upstream addition: `name=command args...` or `name=url`.
    /// Repeatable; applied after every config file.
    #[arg(long = "server", global = true)]
    servers: Vec<String>,

    /// Base URL for the injected first-party upstream.
    #[arg(long, global = true, default_value = "https://spike.land")]
    base_url: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum TransportArg {
    Stdio,
    Http,
    Sse,
}

#[derive(Subcommand)]
enum Command {
    /// Expose the aggregated tool catalog as an MCP server.
    Serve {
        #[arg(long, value_enum, default_value_t = TransportArg::Stdio)]
        transport: TransportArg,
        #[arg(long, default_value_t = 7337)]
        port: u16,
        /// Require this key in `X-Api-Key` on the HTTP transports.
        #[arg(long)]
        api_key: Option<String>,
        /// Expose original tool names without the server prefix.
        #[arg(long)]
        no_prefix: bool,
        /// Reload config files on change.
        #[arg(long)]
        watch: bool,
    },
    /// Chat with an LLM that can call the aggregated tools.
    Chat {
        #[arg(long, default_value_t = agent::DEFAULT_MAX_TURNS)]
        max_turns: usize,
        #[arg(long)]
        model: Option<String>,
    },
    /// Interactive session shell over the aggregated tools.
    Shell,
    /// Probe every configured upstream and report reachability.
    Status,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let cwd = std::env::current_dir().context("read working directory")?;
    let mut options = DiscoverOptions::new(cwd);
    options.config_path = cli.config.clone();
    options.inline_servers = cli.servers.clone();
    options.base_url = cli.base_url.clone();

    let credentials: Arc<dyn CredentialStore> = Arc::new(EnvCredentials);
    let config = discover(&options, credentials.as_ref()).await?;

    match cli.command {
        Command::Serve {
            transport,
            port,
            api_key,
            no_prefix,
            watch,
        } => run_serve(config, options, credentials, transport, port, api_key, no_prefix, watch).await,
        Command::Chat { max_turns, model } => run_chat(config, max_turns, model).await,
        Command::Shell => run_shell(config).await,
        Command::Status => run_status(config).await,
    }
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "warn" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));
    // stdout is reserved for MCP frames; diagnostics go to stderr.
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn build_fleet(config: &ResolvedConfig, no_prefix: bool) -> Fleet {
    let mut fleet = Fleet::new().with_no_prefix(no_prefix);
    if config.lazy_loading && !config.toolsets.is_empty() {
        fleet = fleet.with_toolsets(ToolsetController::new(config.toolsets.clone()));
    }
    fleet.connect_all(config).await;
    fleet
}

#[allow(clippy::too_many_arguments)]
async fn run_serve(
    config: ResolvedConfig,
    options: DiscoverOptions,
    credentials: Arc<dyn CredentialStore>,
    transport: TransportArg,
    port: u16,
    api_key: Option<String>,
    no_prefix: bool,
    watch: bool,
) -> anyhow::Result<()> {
    let fleet = server::shared(build_fleet(&config, no_prefix).await);
    let (scheduler, monitor) = spawn_reconnect_monitor(fleet.clone());

    let watcher = if watch {
        let (watcher, mut changes) =
            ConfigWatcher::spawn(&config, options, credentials, spike::config::DEFAULT_DEBOUNCE);
        let fleet_for_reload = fleet.clone();
        tokio::spawn(async move {
            while let Some(new_config) = changes.recv().await {
                let mut fleet = fleet_for_reload.lock().await;
                fleet.apply_config_diff(&new_config).await;
            }
        });
        Some(watcher)
    } else {
        None
    };

    let result = match transport {
        TransportArg::Stdio => server::serve_stdio(fleet).await,
        TransportArg::Http => server::serve_http(fleet, port, api_key).await,
        TransportArg::Sse => server::serve_sse(fleet, port, api_key).await,
    };

    monitor.abort();
    scheduler.cancel_all();
    if let Some(watcher) = watcher {
        watcher.stop();
    }
    result
}

/// Watches the fleet for upstreams that dropped their connection and hands
/// them to the backoff scheduler.
fn spawn_reconnect_monitor(
    fleet: SharedFleet,
) -> (Arc<ReconnectScheduler>, tokio::task::JoinHandle<()>) {
    let reconnect: spike::reconnect::ReconnectFn = {
        let fleet = fleet.clone();
        Arc::new(move |name, config| {
            let fleet = fleet.clone();
            Box::pin(async move { fleet.lock().await.reconnect(&name, config).await })
        })
    };
    let scheduler = Arc::new(ReconnectScheduler::new(reconnect));

    let monitor = tokio::spawn({
        let scheduler = scheduler.clone();
        async move {
            let mut interval = tokio::time::interval(std::time::Duration::from_secs(5));
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                let disconnected: Vec<_> = {
                    let fleet = fleet.lock().await;
                    fleet
                        .server_names()
                        .into_iter()
                        .filter_map(|name| {
                            let upstream = fleet.upstream(&name)?;
                            (!upstream.connected())
                                .then(|| (name.clone(), upstream.config().clone()))
                        })
                        .collect()
                };
                for (name, config) in disconnected {
                    if scheduler.has_pending(&name) || scheduler.has_given_up(&name) {
                        continue;
                    }
                    scheduler.schedule_reconnect(name, config);
                }
            }
        }
    });

    (scheduler, monitor)
}

struct TerminalObserver;

impl AgentObserver for TerminalObserver {
    fn on_text_delta(&mut self, delta: &str) {
        use std::io::Write;
        print!("{delta}");
        let _ = std::io::stdout().flush();
    }

    fn on_tool_call_start(
        &mut self,
        _id: &str,
        name: &str,
        server: &str,
        _input: &serde_json::Value,
    ) {
        eprintln!("→ {name} ({server})");
    }

    fn on_tool_call_end(&mut self, _id: &str, _result: &str, is_error: bool) {
        if is_error {
            eprintln!("  ✗ tool failed");
        }
    }
}

async fn run_chat(
    config: ResolvedConfig,
    max_turns: usize,
    model: Option<String>,
) -> anyhow::Result<()> {
    let mut client = AnthropicClient::from_env()?;
    if let Some(model) = model {
        client = client.with_model(model);
    }

    let mut fleet = build_fleet(&config, false).await;
    let mut messages: Vec<Message> = Vec::new();
    let mut observer = TerminalObserver;

    let stdin = std::io::stdin();
    loop {
        eprint!("you> ");
        let mut line = String::new();
        if stdin.read_line(&mut line)? == 0 {
            break;
        }
        let prompt = line.trim();
        if prompt.is_empty() {
            continue;
        }
        if prompt == "/quit" || prompt == "/exit" {
            break;
        }

        agent::run_agent_loop(
            &client,
            &mut fleet,
            &mut messages,
            prompt,
            max_turns,
            &mut observer,
        )
        .await?;
        println!();
    }

    fleet.close_all().await;
    Ok(())
}

struct StdinPrompter;

impl Prompter for StdinPrompter {
    fn prompt(&mut self, question: &str) -> Option<String> {
        use std::io::Write;
        eprint!("{question}");
        let _ = std::io::stderr().flush();
        let mut answer = String::new();
        match std::io::stdin().read_line(&mut answer) {
            Ok(0) | Err(_) => None,
            Ok(_) => Some(answer.trim_end_matches(['\r', '\n']).to_string()),
        }
    }
}

async fn run_shell(config: ResolvedConfig) -> anyhow::Result<()> {
    let mut fleet = build_fleet(&config, false).await;

    let mut registry = AppRegistry::bundled();
    registry.refresh_from_remote(&mut fleet).await;
    let mut shell = ShellSession::new(registry);

    let interactive = atty_stdin();
    let stdin = std::io::stdin();
    loop {
        eprint!("spike> ");
        let mut line = String::new();
        if stdin.read_line(&mut line)? == 0 {
            break;
        }

        let outcome = if interactive {
            shell.handle_line(&mut fleet, &line, &mut StdinPrompter).await
        } else {
            shell.handle_line(&mut fleet, &line, &mut NoPrompter).await
        };
        match outcome {
            ShellOutcome::Output(output) => {
                if !output.is_empty() {
                    println!("{output}");
                }
            }
            ShellOutcome::Quit => break,
        }
    }

    fleet.close_all().await;
    Ok(())
}

fn atty_stdin() -> bool {
    use std::io::IsTerminal;
    std::io::stdin().is_terminal()
}

async fn run_status(config: ResolvedConfig) -> anyhow::Result<()> {
    if config.upstreams.is_empty() {
        eprintln!("No upstreams configured.");
        std::process::exit(1);
    }

    let statuses = status::probe_all(&config, status::DEFAULT_PROBE_TIMEOUT).await;
    let mut any_failed = false;
    for status in &statuses {
        match &status.outcome {
            Ok(tools) => println!("{}: ok ({tools} tools)", status.name),
            Err(err) => {
                any_failed = true;
                println!("{}: unreachable ({err})", status.name);
            }
        }
    }

    if any_failed {
        warn!("one or more upstreams are unreachable");
        std::process::exit(1);
    }
    Ok(())
}
