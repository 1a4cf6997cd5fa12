// Tachyon CLI.

use std::path::PathBuf;
use std::sync::Arc;

use clap::error::ErrorKind;
use clap::Parser;

use tachyon::environment::{Config, Environment};
use tachyon::parser::Playbook;
use tachyon::remote::{push_and_run, RemoteOptions};
use tachyon::runtime::expand::infer_string;
use tachyon::runtime::scope::NestedScope;
use tachyon::runtime::value::Value;
use tachyon::Runner;
use tachyon::Scope;

#[derive(Parser)]
#[command(
    name = "tachyon",
    about = "Declarative configuration management",
    version
)]
struct Cli {
    /// Set a variable (k=v, type-inferred)
    #[arg(short = 's', long = "set", value_name = "KEY=VALUE")]
    set: Vec<String>,

    /// Show command output
    #[arg(short = 'o', long = "output")]
    output: bool,

    /// Run the playbook on another host
    #[arg(short = 't', long = "host")]
    host: Option<String>,

    /// Use a development tachyon on the remote host
    #[arg(long)]
    dev: bool,

    /// Clean the host cache before using it
    #[arg(long = "clean-host")]
    clean_host: bool,

    /// Show all information about commands
    #[arg(short = 'd', long)]
    debug: bool,

    /// The release to use when remotely invoking tachyon
    #[arg(long, default_value = "dev")]
    release: String,

    /// Playbook file to run
    playbook: PathBuf,
}

#[tokio::main]
async fn main() {
    std::process::exit(run().await);
}

async fn run() -> i32 {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            let code = match err.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => 2,
                _ => 1,
            };
            let _ = err.print();
            return code;
        }
    };

    if let Some(host) = &cli.host {
        println!("=== Executing playbook on {}", host);

        let opts = RemoteOptions {
            host: host.clone(),
            playbook: cli.playbook.clone(),
            debug: cli.debug,
            clean_host: cli.clean_host,
            dev: cli.dev,
            release: cli.release.clone(),
        };

        return match push_and_run(&opts, |msg| println!("=== {}", msg)).await {
            Ok(()) => 0,
            Err(err) => {
                eprintln!("{}", err);
                1
            }
        };
    }

    let vars = Arc::new(NestedScope::root());
    for entry in &cli.set {
        match entry.split_once('=') {
            Some((k, v)) => vars.set(k, infer_string(v)),
            None => vars.set(entry, Value::Bool(true)),
        }
    }

    let config = Config {
        show_command_output: cli.output,
        debug: cli.debug,
    };
    let env = Environment::new(vars, config);

    let playbook = match Playbook::load(&env, &cli.playbook).await {
        Ok(pb) => pb,
        Err(err) => {
            eprintln!("Error loading plays: {}", err);
            return 1;
        }
    };

    // relative paths in commands resolve against the playbook
    if let Err(err) = std::env::set_current_dir(&playbook.base_dir) {
        eprintln!(
            "Unable to enter {}: {}",
            playbook.base_dir.display(),
            err
        );
        return 1;
    }

    let mut runner = Runner::new(playbook.plays, env.report.clone());
    match runner.run(&env).await {
        Ok(()) => 0,
        Err(err) => {
            eprintln!("Error running playbook: {}", err);
            1
        }
    }
}
