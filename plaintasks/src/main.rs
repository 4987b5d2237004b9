use std::{
    fs,
    path::{Path, PathBuf},
    str::FromStr,
};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use plaintasks::outline::{self, LineInfo};
use plaintasks::{Config, Document, LineKind, Selection, TaskCommands, TextDocument, Vocabulary};
use tracing::{debug, info};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(
    name = "plaintasks",
    about = "Plain-text task list commands: new, complete, cancel and archive",
    version
)]
struct Cli {
    /// Enable verbose logging for debugging.
    #[arg(long, global = true)]
    verbose: bool,
    /// TOML settings file. Built-in defaults are used when omitted.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Print how every line of a task file is classified.
    Classify(ClassifyArgs),

    /// Turn plain lines into tasks, or open a new task below the last row.
    New(EditArgs),

    /// Toggle the selected tasks between open and done.
    Complete(EditArgs),

    /// Toggle the selected tasks between open and cancelled.
    Cancel(EditArgs),

    /// Move done and cancelled tasks into the archive section.
    Archive(EditArgs),
}

#[derive(Debug, Args)]
struct ClassifyArgs {
    /// Task file to inspect.
    input: PathBuf,
    /// Emit JSON instead of a table.
    #[arg(long)]
    json: bool,
    /// Columns a tab counts for when measuring indentation.
    #[arg(long, default_value_t = 4)]
    tab_size: usize,
}

#[derive(Debug, Args)]
struct EditArgs {
    /// Task file to edit.
    input: PathBuf,
    /// Rows to act on, 1-based and inclusive: `7` or `3:12`. Defaults to the whole file.
    #[arg(long)]
    lines: Option<LineRange>,
    /// Overwrite the file instead of printing to stdout.
    #[arg(long)]
    in_place: bool,
    /// Columns a tab counts for when measuring indentation.
    #[arg(long, default_value_t = 4)]
    tab_size: usize,
    /// Indent new and archived lines with tabs instead of spaces.
    #[arg(long)]
    tabs: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct LineRange {
    first: usize,
    last: usize,
}

impl FromStr for LineRange {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let parse = |part: &str| -> std::result::Result<usize, String> {
            part.trim()
                .parse::<usize>()
                .map_err(|e| format!("invalid line number {part:?}: {e}"))
                .and_then(|n| {
                    if n == 0 {
                        Err("line numbers start at 1".to_string())
                    } else {
                        Ok(n)
                    }
                })
        };
        let (first, last) = match s.split_once(':') {
            Some((a, b)) => (parse(a)?, parse(b)?),
            None => {
                let n = parse(s)?;
                (n, n)
            }
        };
        if last < first {
            return Err(format!("range {first}:{last} runs backwards"));
        }
        Ok(Self { first, last })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Action {
    New,
    Complete,
    Cancel,
    Archive,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    let config = load_config(cli.config.as_deref())?;
    match cli.command {
        Commands::Classify(args) => handle_classify(args, config),
        Commands::New(args) => handle_edit(args, config, Action::New),
        Commands::Complete(args) => handle_edit(args, config, Action::Complete),
        Commands::Cancel(args) => handle_edit(args, config, Action::Cancel),
        Commands::Archive(args) => handle_edit(args, config, Action::Archive),
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose {
        "plaintasks=debug"
    } else {
        "plaintasks=warn"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    // stdout carries the edited document
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn load_config(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(path) => {
            debug!(?path, "loading config");
            Config::load(path).with_context(|| format!("loading config {:?}", path))
        }
        None => Ok(Config::default()),
    }
}

fn handle_classify(args: ClassifyArgs, config: Config) -> Result<()> {
    let ClassifyArgs {
        input,
        json,
        tab_size,
    } = args;
    let text = fs::read_to_string(&input).with_context(|| format!("reading {:?}", input))?;
    let vocab = Vocabulary::new(&config).context("invalid configuration")?;
    let doc = TextDocument::from_text(&text);
    let report = outline::describe(doc.lines(), &vocab, tab_size);

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        for line in &report {
            println!("{}", render_line_info(line));
        }
    }
    Ok(())
}

fn kind_label(kind: LineKind) -> &'static str {
    match kind {
        LineKind::ItemOpen => "open",
        LineKind::ItemDone => "done",
        LineKind::ItemCancel => "cancelled",
        LineKind::Header => "header",
        LineKind::Separator => "separator",
        LineKind::Plain => "plain",
    }
}

fn render_line_info(info: &LineInfo) -> String {
    let mut out = format!(
        "{:>4} {:<10} {:>3}",
        info.index + 1,
        kind_label(info.kind),
        info.level
    );
    if let Some(title) = &info.title {
        out.push_str(&format!(" {title}"));
    }
    if !info.project.is_empty() {
        out.push_str(&format!(" [{}]", info.project));
    }
    out
}

fn handle_edit(args: EditArgs, config: Config, action: Action) -> Result<()> {
    let EditArgs {
        input,
        lines,
        in_place,
        tab_size,
        tabs,
    } = args;
    let text = fs::read_to_string(&input).with_context(|| format!("reading {:?}", input))?;
    let edited = apply_action(&text, config, action, lines, tab_size, tabs)?;

    if in_place {
        fs::write(&input, edited.as_bytes()).with_context(|| format!("writing {:?}", input))?;
        info!(?action, path = ?input, "updated in place");
    } else {
        print!("{edited}");
    }
    Ok(())
}

fn apply_action(
    text: &str,
    config: Config,
    action: Action,
    lines: Option<LineRange>,
    tab_size: usize,
    tabs: bool,
) -> Result<String> {
    let commands = TaskCommands::new(config).context("invalid configuration")?;
    let mut doc = TextDocument::from_text(text).with_indent(tab_size, !tabs);
    let selection = match lines {
        Some(range) => Selection::rows_between(range.first - 1, range.last - 1),
        None => Selection::rows_between(0, doc.line_count() - 1),
    };
    doc.set_selection(selection);

    let changed = match action {
        Action::New => commands.new_task(&mut doc).map(|_| 1),
        Action::Complete => commands.complete(&mut doc),
        Action::Cancel => commands.cancel(&mut doc),
        Action::Archive => commands.archive(&mut doc),
    }
    .with_context(|| format!("running {action:?}"))?;
    debug!(?action, changed, "command finished");
    Ok(doc.text())
}

#[cfg(test)]
mod tests {
    use super::*;
    use plaintasks::SEPARATOR;
    use std::fs;

    #[test]
    fn line_ranges_parse_single_and_span() {
        assert_eq!(
            "7".parse::<LineRange>(),
            Ok(LineRange { first: 7, last: 7 })
        );
        assert_eq!(
            "3:12".parse::<LineRange>(),
            Ok(LineRange { first: 3, last: 12 })
        );
        assert!("0".parse::<LineRange>().is_err());
        assert!("9:2".parse::<LineRange>().is_err());
        assert!("a:b".parse::<LineRange>().is_err());
    }

    #[test]
    fn archive_in_place_rewrites_the_file() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let path = tmp.path().join("todo.txt");
        fs::write(&path, "# Home\n  ✔ dishes @done(24-03-01 08:00)\n  ☐ laundry\n")
            .expect("write todo");

        let args = EditArgs {
            input: path.clone(),
            lines: None,
            in_place: true,
            tab_size: 2,
            tabs: false,
        };
        handle_edit(args, Config::default(), Action::Archive).expect("archive");

        let text = fs::read_to_string(&path).expect("read back");
        assert_eq!(
            text,
            format!(
                "# Home\n  ☐ laundry\n{SEPARATOR}\nArchive:\n  ✔ dishes @done(24-03-01 08:00) @project(Home)\n"
            )
        );
    }

    #[test]
    fn untouched_crlf_lines_keep_their_endings() {
        let text = "☐ one\r\n☐ two\r\n";
        let range = Some(LineRange { first: 1, last: 1 });
        let out = apply_action(text, Config::default(), Action::Complete, range, 4, false)
            .expect("complete");
        assert!(out.ends_with("\r\n☐ two\r\n"), "{out:?}");
        assert_eq!(out.matches("\r\n").count(), 2);
    }

    #[test]
    fn selected_rows_limit_the_command() {
        let text = "☐ one\n☐ two\n☐ three\n";
        let range = Some(LineRange { first: 2, last: 2 });
        let out = apply_action(text, Config::default(), Action::Cancel, range, 4, false)
            .expect("cancel");
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines[0], "☐ one");
        assert!(lines[1].starts_with("✘ two @canceled("));
        assert_eq!(lines[2], "☐ three");
    }

    #[test]
    fn config_file_changes_the_vocabulary() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let path = tmp.path().join("plaintasks.toml");
        fs::write(
            &path,
            "task_bullet_open = \"[ ]\"\ntask_bullet_done = \"[x]\"\ntask_bullet_cancel = \"[-]\"\ndone_date = false\n",
        )
        .expect("write config");

        let config = load_config(Some(&path)).expect("load config");
        let out = apply_action("[ ] ship it", config, Action::Complete, None, 4, false)
            .expect("complete");
        assert_eq!(out, "[x] ship it @done");
    }

    #[test]
    fn invalid_config_is_reported_with_path() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let path = tmp.path().join("bad.toml");
        fs::write(&path, "task_bullet_open = \"\"\n").expect("write config");

        let err = load_config(Some(&path)).unwrap_err();
        assert!(format!("{err:#}").contains("task_bullet_open"));
    }

    #[test]
    fn line_info_renders_titles_and_projects() {
        let vocab = Vocabulary::new(&Config::default()).expect("vocabulary");
        let lines = ["# Home", "  ☐ sweep"];
        let report = outline::describe(&lines, &vocab, 4);
        assert_eq!(render_line_info(&report[0]), "   1 header       0 Home");
        assert_eq!(render_line_info(&report[1]), "   2 open         2 [Home]");
    }
}
