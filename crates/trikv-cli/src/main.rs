//! trikv: command-line client, interactive shell and load generator.

use std::time::Instant;

use anyhow::{Context, Result};
use clap::{FromArgMatches, Parser, Subcommand};
use rand::distributions::Alphanumeric;
use rand::Rng;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use tracing_subscriber::EnvFilter;

use trikv_net::{Client, ListenAddress};

#[derive(Parser, Debug)]
#[command(name = "trikv", version, about = "Talk to a trikv server")]
struct Cli {
    /// Server address (tcp://host:port or unix:///path)
    #[arg(short, long, default_value = "tcp://127.0.0.1:5555")]
    addr: ListenAddress,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    #[command(flatten)]
    Op(Op),
    /// Open an interactive shell
    Shell,
    /// Write and read back random keys, reporting mismatches
    Bench {
        /// Number of keys to write
        #[arg(long, default_value_t = 1000)]
        count: usize,
        /// Length of each key and value
        #[arg(long, default_value_t = 16)]
        size: usize,
    },
}

/// Single requests, shared by the command line and the shell.
#[derive(Subcommand, Debug)]
enum Op {
    /// Ask the server for its current time
    Time,
    /// Print the value stored under a key
    Get { key: String },
    /// Store a value under a key
    Set { key: String, value: String },
    /// Delete a key, printing the removed value
    Remove { key: String },
}

#[derive(Subcommand, Debug)]
enum ShellCmd {
    #[command(flatten)]
    Op(Op),
    /// Leave the shell
    #[command(alias = "quit")]
    Exit,
}

impl Op {
    async fn run(self, client: &mut Client) -> Result<()> {
        match self {
            Op::Time => print!("{}", client.time().await?),
            Op::Get { key } => println!("{}", client.get(key).await?),
            Op::Set { key, value } => println!("{}", client.set(key, value).await?),
            Op::Remove { key } => println!("{}", client.remove(key).await?),
        }
        Ok(())
    }
}

fn parse_shell_line(line: &str) -> Result<ShellCmd> {
    let args = shell_words::split(line)?;
    let cmd = ShellCmd::augment_subcommands(clap::Command::new("shell"));
    let matches = cmd.multicall(true).subcommand_required(true).try_get_matches_from(args)?;
    Ok(ShellCmd::from_arg_matches(&matches)?)
}

async fn shell(client: &mut Client) -> Result<()> {
    let mut editor = DefaultEditor::new()?;
    loop {
        // rustyline blocks; read on a blocking thread and hand the editor back
        let (line, returned) = tokio::task::spawn_blocking(move || {
            let line = editor.readline("trikv> ");
            (line, editor)
        })
        .await?;
        editor = returned;

        let line = match line {
            Ok(line) if line.trim().is_empty() => continue,
            Ok(line) => line,
            Err(ReadlineError::Interrupted | ReadlineError::Eof) => break,
            Err(err) => return Err(err.into()),
        };
        let _ = editor.add_history_entry(line.as_str());

        match parse_shell_line(&line) {
            Ok(ShellCmd::Exit) => break,
            Ok(ShellCmd::Op(op)) => {
                if let Err(err) = op.run(client).await {
                    println!("error: {}", err);
                }
            }
            Err(err) => println!("{}", err),
        }
    }
    Ok(())
}

fn random_string(rng: &mut impl Rng, len: usize) -> String {
    rng.sample_iter(&Alphanumeric).take(len).map(char::from).collect()
}

async fn bench(client: &mut Client, count: usize, size: usize) -> Result<()> {
    let mut rng = rand::thread_rng();
    let pairs: Vec<(String, String)> = (0..count)
        .map(|_| (random_string(&mut rng, size), random_string(&mut rng, size)))
        .collect();

    let start = Instant::now();
    let mut failures = 0usize;
    for (key, value) in &pairs {
        if client.set(key.as_str(), value.as_str()).await? != *value {
            failures += 1;
        }
    }
    for (key, value) in &pairs {
        if client.get(key.as_str()).await? != *value {
            failures += 1;
        }
    }
    let elapsed = start.elapsed();

    let ops = (count * 2) as f64;
    println!(
        "{} requests in {:.2?} ({:.0} ops/s), {} failures",
        count * 2,
        elapsed,
        ops / elapsed.as_secs_f64().max(f64::EPSILON),
        failures
    );
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();
    let cli = Cli::parse();

    let mut client = Client::default();
    client
        .connect(&cli.addr)
        .await
        .with_context(|| format!("failed to connect to {}", cli.addr))?;

    match cli.command {
        Commands::Op(op) => op.run(&mut client).await?,
        Commands::Shell => shell(&mut client).await?,
        Commands::Bench { count, size } => bench(&mut client, count, size).await?,
    }
    client.close();
    Ok(())
}
