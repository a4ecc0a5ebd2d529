mod config;
mod prompt;
mod reconciler;
mod registry;
mod session;
mod stream;
mod traits;
mod types;

#[cfg(test)]
mod testing;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::AppConfig;
use crate::registry::{ConnectionMonitor, RegistryClient};
use crate::session::Session;
use crate::traits::{CommandOutput, CommandRunner, FileEntry, FileStore, KeyValueStore};

/// Files under the current working directory, read with tokio's fs.
struct WorkspaceFiles {
    root: PathBuf,
}

impl WorkspaceFiles {
    fn resolve(&self, path: &str) -> PathBuf {
        self.root.join(path)
    }
}

#[async_trait]
impl FileStore for WorkspaceFiles {
    async fn get(&self, path: &str) -> anyhow::Result<String> {
        Ok(tokio::fs::read_to_string(self.resolve(path)).await?)
    }

    async fn list(&self, dir: &str) -> anyhow::Result<Vec<FileEntry>> {
        let mut entries = Vec::new();
        let mut reader = tokio::fs::read_dir(self.resolve(dir)).await?;
        while let Some(entry) = reader.next_entry().await? {
            entries.push(FileEntry {
                name: entry.file_name().to_string_lossy().to_string(),
                is_dir: entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false),
            });
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    async fn write(&self, path: &str, text: &str) -> anyhow::Result<()> {
        Ok(tokio::fs::write(self.resolve(path), text).await?)
    }
}

/// Runs commands through the login shell, capturing both output streams.
struct ShellRunner;

#[async_trait]
impl CommandRunner for ShellRunner {
    async fn run(&self, command: &str) -> anyhow::Result<CommandOutput> {
        let output = tokio::process::Command::new("sh")
            .arg("-c")
            .arg(command)
            .output()
            .await?;
        Ok(CommandOutput {
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }
}

/// One file per key under a state directory.
struct FileKvStore {
    dir: PathBuf,
}

impl FileKvStore {
    fn key_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", key))
    }
}

#[async_trait]
impl KeyValueStore for FileKvStore {
    async fn get(&self, key: &str) -> anyhow::Result<Option<String>> {
        match tokio::fs::read_to_string(self.key_path(key)).await {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn set(&self, key: &str, value: &str) -> anyhow::Result<()> {
        tokio::fs::create_dir_all(&self.dir).await?;
        Ok(tokio::fs::write(self.key_path(key), value).await?)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Handle CLI arguments
    let args: Vec<String> = std::env::args().collect();
    if args.len() > 1 {
        match args[1].as_str() {
            "--version" | "-V" => {
                println!("localspark {}", env!("CARGO_PKG_VERSION"));
                return Ok(());
            }
            "--help" | "-h" => {
                println!("localspark {}", env!("CARGO_PKG_VERSION"));
                println!("{}\n", env!("CARGO_PKG_DESCRIPTION"));
                println!("Usage: localspark\n");
                println!("Reads config.toml from the working directory when present.\n");
                println!("Interactive commands:");
                println!("  /models            List models the server advertises");
                println!("  /model <name>      Switch the active model");
                println!("  /ctx <paths...>    Attach files to subsequent prompts");
                println!("  /ls [dir]          List project files");
                println!("  /run <command>     Run a command, record output in the log");
                println!("  /apply <path>      Write the last suggested code block to a file");
                println!("  /status            Show server liveness");
                println!("  /clear             Drop the conversation");
                println!("  /quit              Save and exit");
                println!("\nOptions:");
                println!("  -h, --help       Print help");
                println!("  -V, --version    Print version");
                return Ok(());
            }
            other => {
                eprintln!("Unknown argument: {}", other);
                std::process::exit(2);
            }
        }
    }

    let config_path = Path::new("config.toml");
    let config = if config_path.exists() {
        AppConfig::load(config_path)?
    } else {
        AppConfig::default()
    };

    let registry = Arc::new(RegistryClient::new(
        &config.server.base_url,
        Duration::from_secs(config.server.connect_timeout_secs),
    )?);

    let mut config = config;
    if config.server.model.is_empty() {
        let models = registry.list_models().await?;
        match models.first() {
            Some(model) => {
                info!(model = %model.name, "No model configured, using the first advertised one");
                config.server.model = model.name.clone();
            }
            None => anyhow::bail!("the inference server advertises no models"),
        }
    }

    let monitor = ConnectionMonitor::start(
        registry.clone(),
        Duration::from_secs(config.registry.poll_interval_secs),
    );

    let cwd = std::env::current_dir()?;
    let files = Arc::new(WorkspaceFiles { root: cwd.clone() });
    let mut session = Session::new(
        &config,
        files.clone(),
        Arc::new(ShellRunner),
        Arc::new(FileKvStore {
            dir: cwd.join(".localspark"),
        }),
    )?;
    if let Err(e) = session.restore().await {
        warn!(error = %e, "Could not restore the saved conversation, starting fresh");
    }

    println!(
        "localspark {} (model {} at {})",
        env!("CARGO_PKG_VERSION"),
        config.server.model,
        config.server.base_url
    );

    let mut context_paths: Vec<String> = Vec::new();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("> ");
        use std::io::Write as _;
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        if let Some(rest) = line.strip_prefix('/') {
            let mut parts = rest.splitn(2, ' ');
            let command = parts.next().unwrap_or("");
            let arg = parts.next().unwrap_or("").trim();
            match command {
                "quit" | "exit" => break,
                "models" => match registry.list_models().await {
                    Ok(models) => {
                        for model in models {
                            match model.size {
                                Some(size) => println!("  {} ({} bytes)", model.name, size),
                                None => println!("  {}", model.name),
                            }
                        }
                    }
                    Err(e) => eprintln!("{}", e),
                },
                "model" if !arg.is_empty() => {
                    session.set_model(arg);
                    println!("Model set to {}", arg);
                }
                "ctx" => {
                    context_paths = arg.split_whitespace().map(str::to_string).collect();
                    println!("Attached {} context file(s)", context_paths.len());
                }
                "ls" => {
                    let dir = if arg.is_empty() { "." } else { arg };
                    match files.list(dir).await {
                        Ok(entries) => {
                            for entry in entries {
                                if entry.is_dir {
                                    println!("  {}/", entry.name);
                                } else {
                                    println!("  {}", entry.name);
                                }
                            }
                        }
                        Err(e) => eprintln!("{}", e),
                    }
                }
                "apply" if !arg.is_empty() => match session.apply_last_code_block(arg).await {
                    Ok(()) => println!("Wrote {}", arg),
                    Err(e) => eprintln!("{}", e),
                },
                "run" if !arg.is_empty() => match session.run_command(arg).await {
                    Ok(turn) => println!("{}", turn.text),
                    Err(e) => eprintln!("{}", e),
                },
                "status" => {
                    if monitor.is_connected() {
                        println!("Server is reachable");
                    } else {
                        println!("Server is unreachable");
                    }
                }
                "clear" => {
                    session.clear();
                    println!("Conversation cleared");
                }
                other => eprintln!("Unknown command: /{}", other),
            }
            continue;
        }

        match session.send_message(line, &context_paths).await {
            Ok(Some(turn)) => println!("{}", turn.text),
            Ok(None) => println!("(no response)"),
            Err(e) => eprintln!("{}", e),
        }
    }

    if let Err(e) = session.save().await {
        warn!(error = %e, "Could not save the conversation");
    }
    monitor.stop().await;
    Ok(())
}
