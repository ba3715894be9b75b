use crate::{
    app::{
        App, FolderPrompt, FolderRole, Notice, NoticeLevel, PathChoice, Shell, SourceChoice,
        SyncReport, SyncTarget,
    },
    config::PathKey,
    fetch, ui,
};
use anyhow::{bail, Context, Result};
use std::{
    io::{self, BufRead, Write},
    path::{Path, PathBuf},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OutputFormat {
    Text,
    Json,
}

impl OutputFormat {
    fn parse(value: &str) -> Option<Self> {
        match value {
            "json" => Some(OutputFormat::Json),
            "text" => Some(OutputFormat::Text),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct SyncOptions {
    from: Option<PathBuf>,
    to: Option<PathBuf>,
    download: bool,
    file_id: Option<String>,
    assume_yes: bool,
}

#[derive(Debug, PartialEq, Eq)]
enum CliAction {
    Ui,
    Sync {
        target: SyncTarget,
        options: SyncOptions,
    },
    Paths(OutputFormat),
    Help,
    Version,
}

pub fn run() -> Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    match parse_args(&args)? {
        CliAction::Ui => {
            let mut app = App::initialize()?;
            ui::run(&mut app)
        }
        CliAction::Sync { target, options } => {
            let mut app = App::initialize()?;
            run_sync(&mut app, target, options)
        }
        CliAction::Paths(format) => {
            let app = App::initialize()?;
            print_paths(&app, format)
        }
        CliAction::Help => {
            print_help();
            Ok(())
        }
        CliAction::Version => {
            println!("modsync v{}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

fn parse_args(args: &[String]) -> Result<CliAction> {
    let Some(first) = args.first() else {
        return Ok(CliAction::Ui);
    };

    match first.as_str() {
        "--help" | "-h" | "help" => Ok(CliAction::Help),
        "--version" | "-V" | "version" => Ok(CliAction::Version),
        "ui" => Ok(CliAction::Ui),
        "paths" => {
            let mut format = OutputFormat::Text;
            let mut iter = args[1..].iter();
            while let Some(arg) = iter.next() {
                let value = if let Some(value) = arg.strip_prefix("--format=") {
                    value.to_string()
                } else if arg == "--format" {
                    iter.next().cloned().context("--format requires a value")?
                } else {
                    bail!("Unknown option for paths: {arg}");
                };
                format = OutputFormat::parse(&value)
                    .with_context(|| format!("Unknown format: {value}"))?;
            }
            Ok(CliAction::Paths(format))
        }
        "sync" => {
            let target = args
                .get(1)
                .context("sync requires an option: client, server or minecraft")?;
            let target = SyncTarget::parse(target)
                .with_context(|| format!("Unknown sync option: {target}"))?;
            let options = parse_sync_options(&args[2..])?;
            if options.download && target != SyncTarget::Minecraft {
                bail!("--download only applies to the minecraft option");
            }
            Ok(CliAction::Sync { target, options })
        }
        other => bail!("Unknown command: {other} (see --help)"),
    }
}

fn parse_sync_options(args: &[String]) -> Result<SyncOptions> {
    let mut options = SyncOptions::default();
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--from" => {
                let value = iter.next().context("--from requires a path")?;
                options.from = Some(PathBuf::from(value));
            }
            "--to" => {
                let value = iter.next().context("--to requires a path")?;
                options.to = Some(PathBuf::from(value));
            }
            "--file-id" => {
                let value = iter.next().context("--file-id requires a value")?;
                options.file_id = Some(value.clone());
            }
            "--download" | "-d" => options.download = true,
            "--yes" | "-y" => options.assume_yes = true,
            other => bail!("Unknown option for sync: {other}"),
        }
    }
    if options.download && options.from.is_some() {
        bail!("--download and --from are mutually exclusive");
    }
    Ok(options)
}

fn run_sync(app: &mut App, target: SyncTarget, options: SyncOptions) -> Result<()> {
    if options.download && !app.downloads_available() {
        bail!("This build was compiled without download support");
    }
    if options.file_id.is_some() {
        app.file_id = fetch::resolve_file_id(options.file_id.as_deref());
    }

    let stdin = io::stdin();
    let mut shell = CliShell {
        options,
        input: stdin.lock(),
    };
    match app.run_sync(target, &mut shell)? {
        SyncReport::Replaced { .. } => Ok(()),
        SyncReport::Cancelled => {
            println!("Cancelled; nothing was changed.");
            Ok(())
        }
        SyncReport::Failed { message } => bail!(message),
    }
}

/// Answers prompts from command-line flags, falling back to remembered paths.
struct CliShell<R> {
    options: SyncOptions,
    input: R,
}

impl<R: BufRead> Shell for CliShell<R> {
    fn pick_folder(&mut self, prompt: &FolderPrompt) -> Result<PathChoice> {
        let explicit = match prompt.role {
            FolderRole::Origin => self.options.from.clone(),
            FolderRole::Destination => self.options.to.clone(),
        };
        let path = explicit.unwrap_or_else(|| prompt.default.clone());
        if path.as_os_str().is_empty() {
            let flag = match prompt.role {
                FolderRole::Origin => "--from",
                FolderRole::Destination => "--to",
            };
            bail!("{}: pass {flag} <path>. {}", prompt.title, prompt.hint);
        }
        println!("{}: {}", prompt.title, path.display());
        Ok(PathChoice::Accepted(path))
    }

    fn confirm_replace(&mut self, source: &Path, destination: &Path) -> Result<bool> {
        println!("Copy:    {}", source.display());
        println!("Replace: {}", destination.display());
        if self.options.assume_yes {
            return Ok(true);
        }
        print!("The destination 'mods' folder will be deleted. Continue? [y/N] ");
        io::stdout().flush().context("flush stdout")?;
        let mut answer = String::new();
        self.input
            .read_line(&mut answer)
            .context("read confirmation")?;
        Ok(is_yes(&answer))
    }

    fn choose_source(&mut self) -> Result<SourceChoice> {
        Ok(if self.options.download {
            SourceChoice::Download
        } else {
            SourceChoice::Local
        })
    }

    fn busy(&mut self, message: &str) -> Result<()> {
        println!("{message}");
        Ok(())
    }

    fn notify(&mut self, notice: Notice) -> Result<()> {
        match notice.level {
            NoticeLevel::Info => println!("{}: {}", notice.title, notice.message),
            NoticeLevel::Warn | NoticeLevel::Error => {
                eprintln!("{}: {}", notice.title, notice.message)
            }
        }
        Ok(())
    }
}

fn is_yes(answer: &str) -> bool {
    matches!(answer.trim().to_lowercase().as_str(), "y" | "yes")
}

fn print_paths(app: &App, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => {
            let raw = serde_json::to_string_pretty(&app.paths).context("serialize paths")?;
            println!("{raw}");
        }
        OutputFormat::Text => {
            println!("Config file: {}", app.config_path().display());
            for key in PathKey::ALL {
                println!("  {:<20} {}", key.as_str(), app.paths.get(key).display());
            }
            println!(
                "  {:<20} {}",
                "downloads",
                if app.downloads_available() {
                    "available"
                } else {
                    "unavailable"
                }
            );
        }
    }
    Ok(())
}

fn print_help() {
    println!("modsync v{}", env!("CARGO_PKG_VERSION"));
    println!();
    println!("Usage:");
    println!("  modsync                         Open the terminal UI");
    println!("  modsync sync <option> [flags]   Replace a mods folder without the UI");
    println!("  modsync paths [--format json]   Show remembered folders");
    println!("  modsync help | version");
    println!();
    println!("Options: client, server, minecraft");
    println!();
    println!("Sync flags:");
    println!("  --from <path>     Folder that contains the source 'mods' folder");
    println!("  --to <path>       Folder that contains the destination 'mods' folder");
    println!("  --download, -d    (minecraft) Download the modpack instead of --from");
    println!("  --file-id <id>    Override the modpack archive id");
    println!("  --yes, -y         Do not ask before deleting the destination 'mods'");
    println!();
    println!(
        "Environment: {} overrides the archive id, {} sets the log filter.",
        fetch::FILE_ID_ENV,
        crate::logging::LOG_ENV
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn args(values: &[&str]) -> Vec<String> {
        values.iter().map(|value| value.to_string()).collect()
    }

    fn prompt(role: FolderRole, default: &str) -> FolderPrompt {
        FolderPrompt {
            role,
            title: "Pick".to_string(),
            default: PathBuf::from(default),
            hint: "",
        }
    }

    #[test]
    fn no_arguments_opens_the_ui() {
        assert_eq!(parse_args(&[]).unwrap(), CliAction::Ui);
    }

    #[test]
    fn parses_sync_with_flags() {
        let action = parse_args(&args(&[
            "sync", "client", "--from", "/a", "--to", "/b", "-y",
        ]))
        .unwrap();

        assert_eq!(
            action,
            CliAction::Sync {
                target: SyncTarget::Client,
                options: SyncOptions {
                    from: Some(PathBuf::from("/a")),
                    to: Some(PathBuf::from("/b")),
                    assume_yes: true,
                    ..Default::default()
                },
            }
        );
    }

    #[test]
    fn rejects_bad_sync_usage() {
        assert!(parse_args(&args(&["sync"])).is_err());
        assert!(parse_args(&args(&["sync", "proxy"])).is_err());
        assert!(parse_args(&args(&["sync", "server", "--download"])).is_err());
        assert!(parse_args(&args(&["sync", "minecraft", "--download", "--from", "/a"])).is_err());
        assert!(parse_args(&args(&["sync", "client", "--to"])).is_err());
    }

    #[test]
    fn parses_paths_format() {
        assert_eq!(
            parse_args(&args(&["paths", "--format=json"])).unwrap(),
            CliAction::Paths(OutputFormat::Json)
        );
        assert_eq!(
            parse_args(&args(&["paths", "--format", "text"])).unwrap(),
            CliAction::Paths(OutputFormat::Text)
        );
        assert!(parse_args(&args(&["paths", "--format", "yaml"])).is_err());
    }

    #[test]
    fn shell_prefers_flags_over_defaults() {
        let mut shell = CliShell {
            options: SyncOptions {
                to: Some(PathBuf::from("/flag")),
                ..Default::default()
            },
            input: Cursor::new(Vec::new()),
        };

        assert_eq!(
            shell.pick_folder(&prompt(FolderRole::Origin, "/remembered")).unwrap(),
            PathChoice::Accepted(PathBuf::from("/remembered"))
        );
        assert_eq!(
            shell.pick_folder(&prompt(FolderRole::Destination, "/remembered")).unwrap(),
            PathChoice::Accepted(PathBuf::from("/flag"))
        );
        assert!(shell.pick_folder(&prompt(FolderRole::Origin, "")).is_err());
    }

    #[test]
    fn shell_confirmation_reads_answer() {
        let mut yes = CliShell {
            options: SyncOptions::default(),
            input: Cursor::new(b"Y\n".to_vec()),
        };
        let mut no = CliShell {
            options: SyncOptions::default(),
            input: Cursor::new(b"\n".to_vec()),
        };

        assert!(yes.confirm_replace(Path::new("/a"), Path::new("/b")).unwrap());
        assert!(!no.confirm_replace(Path::new("/a"), Path::new("/b")).unwrap());
    }
}
