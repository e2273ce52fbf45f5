//! singclient CLI
//!
//! A small front end over the singularity-client library:
//! - pull images from Singularity Hub or Docker Hub
//! - run a command in a throwaway instance
//! - copy a file or directory out of an instance as a tar archive
//! - list running instances

use std::env;
use std::path::PathBuf;
use std::process;
use std::time::Duration;

use singularity_client::{
    ArchiveEntry, Client, ClientConfig, ContainerArchive, EntryKind, Result,
};
use tracing_subscriber::EnvFilter;

/// Configuration from environment variables
struct Config {
    /// Runtime binary override
    binary: Option<String>,
    /// Run runtime calls behind sudo
    sudo: bool,
    /// Inherit the caller's environment instead of a clean one
    inherit_env: bool,
    /// Parent directory for archive scratch directories
    scratch_dir: Option<String>,
    /// Timeout for runtime calls, in seconds
    timeout_secs: Option<u64>,
    /// Verbose mode
    verbose: bool,
}

impl Config {
    fn from_env() -> Self {
        Self {
            binary: env::var("SINGCLIENT_BINARY").ok().filter(|b| !b.is_empty()),
            sudo: env_bool("SINGCLIENT_SUDO"),
            inherit_env: env_bool("SINGCLIENT_INHERIT_ENV"),
            scratch_dir: env::var("SINGCLIENT_SCRATCH_DIR").ok().filter(|d| !d.is_empty()),
            timeout_secs: env::var("SINGCLIENT_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.trim().parse().ok())
                .filter(|secs| *secs > 0),
            verbose: env_bool("SINGCLIENT_VERBOSE"),
        }
    }

    fn client_config(&self) -> ClientConfig {
        let mut config = ClientConfig::default()
            .with_sudo(self.sudo)
            .with_clean_env(!self.inherit_env)
            .with_timeout(self.timeout_secs.map(Duration::from_secs));
        if let Some(ref binary) = self.binary {
            config = config.with_binary(binary.clone());
        }
        if let Some(ref dir) = self.scratch_dir {
            config = config.with_scratch_root(dir);
        }
        config
    }
}

fn env_bool(name: &str) -> bool {
    env::var(name).is_ok_and(|v| v == "1" || v == "true")
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

/// Parsed subcommand
#[derive(Debug, PartialEq)]
enum Action {
    Help,
    Version,
    List { json: bool },
    Pull {
        image: String,
        name: Option<String>,
        ext: Option<String>,
        dir: Option<PathBuf>,
    },
    Exec {
        image: String,
        name: Option<String>,
        command: Vec<String>,
    },
    Archive {
        image: String,
        path: String,
        name: Option<String>,
        keep: bool,
    },
}

/// Take the value following a flag
fn flag_value(args: &[String], i: usize) -> std::result::Result<String, String> {
    args.get(i + 1)
        .cloned()
        .ok_or_else(|| format!("{} requires a value", args[i]))
}

fn parse_args(args: &[String]) -> std::result::Result<Action, String> {
    let Some(first) = args.first() else {
        return Ok(Action::Help);
    };

    match first.as_str() {
        "--help" | "-h" | "help" => Ok(Action::Help),
        "--version" | "-v" | "version" => Ok(Action::Version),
        "list" => Ok(Action::List {
            json: args[1..].iter().any(|a| a == "--json"),
        }),
        "pull" => {
            let mut image = None;
            let mut name = None;
            let mut ext = None;
            let mut dir = None;
            let mut i = 1;
            while i < args.len() {
                match args[i].as_str() {
                    "--name" => {
                        name = Some(flag_value(args, i)?);
                        i += 2;
                    }
                    "--ext" => {
                        ext = Some(flag_value(args, i)?);
                        i += 2;
                    }
                    "--dir" => {
                        dir = Some(PathBuf::from(flag_value(args, i)?));
                        i += 2;
                    }
                    other if image.is_none() && !other.starts_with('-') => {
                        image = Some(other.to_string());
                        i += 1;
                    }
                    other => return Err(format!("Unexpected argument: {}", other)),
                }
            }
            Ok(Action::Pull {
                image: image.ok_or("pull requires an image reference")?,
                name,
                ext,
                dir,
            })
        }
        "exec" => {
            let separator = args.iter().position(|a| a == "--");
            let (head, command) = match separator {
                Some(idx) => (&args[1..idx], args[idx + 1..].to_vec()),
                None => (&args[1..args.len().min(2)], args.get(2..).unwrap_or(&[]).to_vec()),
            };
            let mut image = None;
            let mut name = None;
            let mut i = 0;
            while i < head.len() {
                if head[i] == "--name" {
                    name = Some(flag_value(head, i)?);
                    i += 2;
                } else {
                    image = Some(head[i].clone());
                    i += 1;
                }
            }
            if command.is_empty() {
                return Err("exec requires a command".to_string());
            }
            Ok(Action::Exec {
                image: image.ok_or("exec requires an image")?,
                name,
                command,
            })
        }
        "archive" => {
            let mut positional = Vec::new();
            let mut name = None;
            let mut keep = false;
            let mut i = 1;
            while i < args.len() {
                match args[i].as_str() {
                    "--name" => {
                        name = Some(flag_value(args, i)?);
                        i += 2;
                    }
                    "--keep" => {
                        keep = true;
                        i += 1;
                    }
                    other => {
                        positional.push(other.to_string());
                        i += 1;
                    }
                }
            }
            if positional.len() != 2 {
                return Err("archive requires an image and a path".to_string());
            }
            let path = positional.pop().unwrap_or_default();
            let image = positional.pop().unwrap_or_default();
            Ok(Action::Archive {
                image,
                path,
                name,
                keep,
            })
        }
        other => Err(format!("Unknown command: {}", other)),
    }
}

/// Generate an instance name for throwaway instances
fn generate_instance_name() -> String {
    let id = uuid::Uuid::new_v4().simple().to_string();
    format!("singclient-{}", &id[..8])
}

fn main() {
    let config = Config::from_env();
    init_tracing(config.verbose);

    let args: Vec<String> = env::args().skip(1).collect();
    let action = match parse_args(&args) {
        Ok(action) => action,
        Err(e) => {
            eprintln!("Error: {}", e);
            print_usage();
            process::exit(1);
        }
    };

    // The client is dropped (and torn down) inside run(), before we exit
    let code = match run(&config, action) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {}", e);
            1
        }
    };
    process::exit(code);
}

fn run(config: &Config, action: Action) -> Result<i32> {
    match action {
        Action::Help => {
            print_usage();
            Ok(0)
        }
        Action::Version => {
            println!("singclient version: {}", env!("CARGO_PKG_VERSION"));
            let client = Client::new(config.client_config());
            match client.version() {
                Ok(version) => println!("Runtime: {}", version),
                Err(e) => println!("Runtime: not available ({})", e),
            }
            client.teardown();
            Ok(0)
        }
        Action::List { json } => {
            let client = Client::new(config.client_config());
            let running = client.list_running();
            client.teardown();
            let output = running?;
            if json {
                let lines: Vec<&str> = output.lines().collect();
                println!(
                    "{}",
                    serde_json::to_string_pretty(&lines).unwrap_or_else(|_| "[]".to_string())
                );
            } else {
                print!("{}", output);
            }
            Ok(0)
        }
        Action::Pull {
            image,
            name,
            ext,
            dir,
        } => {
            let client = Client::new(config.client_config());
            let pulled = client.pull(&image, name.as_deref(), ext.as_deref(), dir.as_deref());
            client.teardown();
            println!("{}", pulled?.display());
            Ok(0)
        }
        Action::Exec {
            image,
            name,
            command,
        } => {
            let client = Client::new(config.client_config());
            let name = name.unwrap_or_else(generate_instance_name);
            let outcome = client
                .new_instance(&image, &name)
                .and_then(|_| client.execute(&name, &command, &client.config().exec_options()));
            client.teardown();

            let result = outcome?;
            print!("{}", result.stdout_string());
            eprint!("{}", result.stderr_string());
            Ok(result.exit_code)
        }
        Action::Archive {
            image,
            path,
            name,
            keep,
        } => {
            let client = Client::new(config.client_config());
            let name = name.unwrap_or_else(generate_instance_name);
            let outcome = client
                .new_instance(&image, &name)
                .and_then(|_| client.copy_archive(&name, &path));
            client.list_instances();
            client.teardown();

            let archive = outcome?;
            println!("{}", archive.path().display());
            println!("-----------------");
            for entry in drain_archive(archive, keep)? {
                let marker = match entry.kind {
                    EntryKind::Directory => "d",
                    EntryKind::File => "f",
                    EntryKind::Symlink => "l",
                    EntryKind::HardLink => "h",
                    EntryKind::Other => "?",
                };
                println!("{} {} ({} bytes)", marker, entry.path.display(), entry.size);
            }
            println!("-----------------");
            Ok(0)
        }
    }
}

/// Read every entry, then delete the scratch directory unless `keep` is set.
/// The directory is removed even when reading fails.
fn drain_archive(mut archive: ContainerArchive, keep: bool) -> Result<Vec<ArchiveEntry>> {
    let summaries = archive.summaries();
    if !keep {
        archive.remove()?;
    }
    summaries
}

/// Print usage information
fn print_usage() {
    println!(
        r#"Usage: singclient <command> [options]

Commands:
  pull <ref> [--name <file>] [--ext <ext>] [--dir <folder>]
                          Pull a shub:// or docker:// image into a folder
  exec <image> [--name <instance>] -- <command> [args...]
                          Start an instance, run a command in it, stop it
  archive <image> <path> [--name <instance>] [--keep]
                          Copy a file or directory out of an instance as .tar.gz
  list [--json]           List instances the runtime reports as running
  version, --version      Show client and runtime versions
  help, --help            Show this message

Environment:
  SINGCLIENT_BINARY       Runtime binary (default: singularity)
  SINGCLIENT_SUDO         Run runtime calls with sudo (1/true)
  SINGCLIENT_INHERIT_ENV  Pass the caller's environment through (1/true)
  SINGCLIENT_SCRATCH_DIR  Parent directory for archive scratch directories
  SINGCLIENT_TIMEOUT_SECS Kill runtime calls after this many seconds
  SINGCLIENT_VERBOSE      Debug logging (1/true); RUST_LOG overrides

Examples:
  singclient pull docker://godlovedc/lolcow --dir ./images
  singclient exec lolcow_latest.sif -- which fortune
  singclient archive lolcow_latest.sif /usr/games/"#
    );
}
