use argh::FromArgs;
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use std::path::PathBuf;
use std::time::Duration;
use task_exec::{EngineConfig, Runner};

#[derive(FromArgs)]
/// Run task commands. With no command, reads commands interactively.
struct Args {
    #[argh(option, short = 'd')]
    /// working directory for the command (defaults to the current directory)
    dir: Option<PathBuf>,

    #[argh(switch, short = 'c')]
    /// record the output and print it again after the command finished
    capture: bool,

    #[argh(switch, short = 's')]
    /// start the command in the background and wait for it before exiting
    start: bool,

    #[argh(switch, short = 'b')]
    /// treat the command as a bash script
    bash: bool,

    #[argh(option, default = "String::from(\".go\")")]
    /// executable suffix that triggers a build before starting
    source_suffix: String,

    #[argh(option, default = "String::from(\"go install\")")]
    /// command used to build source targets
    build_command: String,

    #[argh(option, default = "String::from(\"bash\")")]
    /// interpreter used for bash scripts
    bash_path: String,

    #[argh(option, default = "50")]
    /// poll interval in milliseconds for background processes
    poll_ms: u64,

    #[argh(switch, short = 'v')]
    /// verbose logging
    verbose: bool,

    #[argh(positional, greedy)]
    /// the command line to run
    command: Vec<String>,
}

fn init_logging(verbose: bool) {
    use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

    let filter = if verbose {
        EnvFilter::new("task_exec=debug,info")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("task_exec=info,warn"))
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();
}

fn main() -> anyhow::Result<()> {
    let args: Args = argh::from_env();
    init_logging(args.verbose);

    let runner = Runner::new(engine_config(&args));

    let result = if args.command.is_empty() {
        repl(&runner, args.dir.clone())
    } else {
        run_once(&runner, &args)
    };

    runner.wait();
    for err in runner.async_errors() {
        tracing::error!("background command failed: {err}");
    }
    result
}

fn engine_config(args: &Args) -> EngineConfig {
    EngineConfig::default()
        .source_suffix(args.source_suffix.clone())
        .build_command(args.build_command.clone())
        .bash(args.bash_path.clone())
        .poll_interval(Duration::from_millis(args.poll_ms))
}

fn run_once(runner: &Runner, args: &Args) -> anyhow::Result<()> {
    let line = args.command.join(" ");
    let wd = args.dir.as_deref();
    if args.start {
        runner.start(&line, wd)?;
    } else if args.capture {
        let output = if args.bash {
            runner.bash_output(&line, wd)?
        } else {
            runner.run_output(&line, wd)?
        };
        print!("{output}");
    } else if args.bash {
        runner.bash(&line, wd)?;
    } else {
        runner.run(&line, wd)?;
    }
    Ok(())
}

/// Interactive loop: `start CMD` runs in the background, `bash SCRIPT` goes
/// through bash, `cd DIR` changes the directory used for following commands.
fn repl(runner: &Runner, mut dir: Option<PathBuf>) -> anyhow::Result<()> {
    let mut rl = DefaultEditor::new()?;

    loop {
        match rl.readline("task> ") {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                rl.add_history_entry(line)?;
                if line == "exit" {
                    break;
                }

                let wd = dir.as_deref();
                let result = if let Some(rest) = line.strip_prefix("start ") {
                    runner.start(rest, wd)
                } else if let Some(rest) = line.strip_prefix("bash ") {
                    runner.bash(rest, wd)
                } else if let Some(rest) = line.strip_prefix("cd ") {
                    let target = match &dir {
                        Some(current) => current.join(rest.trim()),
                        None => PathBuf::from(rest.trim()),
                    };
                    if target.is_dir() {
                        dir = Some(target);
                    } else {
                        eprintln!("cd: {}: not a directory", target.display());
                    }
                    Ok(())
                } else {
                    runner.run(line, wd)
                };

                if let Err(err) = result {
                    eprintln!("error: {err}");
                }
                for err in runner.async_errors() {
                    eprintln!("background error: {err}");
                }
            }
            Err(ReadlineError::Interrupted) => {
                println!("Interrupted");
                break;
            }
            Err(ReadlineError::Eof) => break,
            Err(err) => return Err(err.into()),
        }
    }

    Ok(())
}
