//! `mailshot` command-line interface.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use mailshot::config::{MailerConfig, DEFAULT_CONFIG_FILE};
use mailshot::providers::{LoggerMailer, Pop3Mailbox, SmtpSession};
use mailshot::{letter, logging, Batch, BatchResult, BounceChecker, BounceReport, Letter, MailError, Mailer, TokioSleeper};

/// Send personalised emails to a recipient list and report bounce-backs.
#[derive(Debug, Parser)]
#[command(name = "mailshot", version, about)]
struct Cli {
    /// Mailer config file
    #[arg(long, global = true, env = "MAILSHOT_CONFIG", default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// More log output (repeatable)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Only warnings and errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Send a letter to every recipient
    Send(SendArgs),
    /// Check whether a directory is a valid letter
    Check {
        /// Letter directory
        letter: PathBuf,
    },
    /// Create a new letter directory from the built-in template
    Create {
        /// Name (path) of the new letter
        name: PathBuf,
    },
    /// Validate the mailer config
    Config {
        /// Print the resolved config (password masked)
        #[arg(long)]
        show: bool,
    },
}

#[derive(Debug, Args)]
struct SendArgs {
    /// Letter directory
    letter: PathBuf,

    /// Send only the first message, to your own address
    #[arg(long)]
    test: bool,

    /// Build and log every message without connecting to the server
    #[arg(long)]
    no_send: bool,

    /// Skip the POP3 bounce check
    #[arg(long)]
    no_bounce_check: bool,

    /// Print the batch result as JSON
    #[arg(long)]
    json: bool,
}

impl Cli {
    fn verbosity(&self) -> i8 {
        if self.quiet {
            -1
        } else {
            self.verbose.min(i8::MAX as u8) as i8
        }
    }
}

fn print_result(result: &BatchResult) {
    println!("{}/{} emails sent successfully", result.succeeded, result.attempted);
    for failure in &result.failed {
        println!("  failed: {} ({})", failure.to, failure.reason);
    }
    match &result.bounced {
        BounceReport::Confirmed(list) if list.is_empty() => {
            println!("No bounce-backs found, all emails were delivered");
        }
        BounceReport::Confirmed(list) => {
            println!("Emails sent to these addresses bounced back:");
            for address in list {
                println!("  {}", address);
            }
            println!("Please check these addresses.");
        }
        BounceReport::Undetermined(reason) => {
            println!("Bounce check failed, bounced addresses unknown: {}", reason);
        }
    }
}

async fn send(config_path: &Path, args: SendArgs) -> Result<ExitCode, MailError> {
    let config = MailerConfig::load(config_path)?;
    let letter = Letter::load(&args.letter, &config.account)?;
    let emails = letter.emails()?;

    tracing::info!(
        subject = %letter.config().subject,
        recipients = emails.len(),
        test = args.test,
        "Sending letter {}",
        letter.dir().display()
    );

    let credentials = config.account.credentials();
    let sender = config.account.sender_address();

    let mailer: Box<dyn Mailer> = if args.no_send {
        Box::new(LoggerMailer::full())
    } else {
        Box::new(SmtpSession::open(&credentials, &config.smtp).await?)
    };

    let sleeper = TokioSleeper;
    let mut batch = Batch::new(&sleeper);
    if args.test {
        batch = batch.test_mode(sender.email.as_str());
    }
    if !args.no_bounce_check && !args.no_send {
        batch = batch.bounce_check(BounceChecker::new(config.batch.settle()).ignoring(&sender.email));
    }

    let result = batch
        .run(mailer, emails, Pop3Mailbox::connect(&credentials, &config.pop3))
        .await;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        print_result(&result);
    }
    Ok(ExitCode::SUCCESS)
}

fn check(config_path: &Path, dir: &Path) -> ExitCode {
    // The account domain only matters for completing bare local-parts.
    let domain = MailerConfig::load(config_path)
        .ok()
        .and_then(|c| c.account.domain);
    let issues = Letter::check(dir, domain.as_deref());
    if issues.is_empty() {
        println!("Letter is valid");
        ExitCode::SUCCESS
    } else {
        for issue in &issues {
            eprintln!("  {}", issue);
        }
        eprintln!("Letter is invalid");
        ExitCode::FAILURE
    }
}

fn show_config(config_path: &Path, show: bool) -> Result<ExitCode, MailError> {
    let config = MailerConfig::load(config_path)?;
    if show {
        print!("{}", config.masked()?);
    } else {
        println!("{} is valid", config_path.display());
    }
    Ok(ExitCode::SUCCESS)
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let log_file = match &cli.command {
        Command::Send(args) if args.letter.is_dir() => Some(args.letter.join("log.txt")),
        _ => None,
    };
    if let Err(e) = logging::init(cli.verbosity(), log_file.as_deref()) {
        eprintln!("{}", e);
        return ExitCode::FAILURE;
    }

    let outcome = match cli.command {
        Command::Send(args) => send(&cli.config, args).await,
        Command::Check { letter } => Ok(check(&cli.config, &letter)),
        Command::Create { name } => letter::create(&name).map(|()| {
            println!("Letter {} created", name.display());
            ExitCode::SUCCESS
        }),
        Command::Config { show } => show_config(&cli.config, show),
    };

    match outcome {
        Ok(code) => code,
        Err(MailError::InvalidLetter(issues)) => {
            for issue in &issues {
                tracing::error!("{}", issue);
            }
            eprintln!("Letter is invalid");
            ExitCode::FAILURE
        }
        Err(e) => {
            tracing::error!(error = %e, fatal = e.is_fatal(), "mailshot failed");
            eprintln!("{}", e);
            ExitCode::FAILURE
        }
    }
}
