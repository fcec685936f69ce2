//! Purpose: `plugspace` CLI entry point and command dispatch.
//! Role: Binary crate root; parses args, runs commands, emits JSON on stdout.
//! Invariants: Commands emit JSON on stdout (pretty on a terminal, compact otherwise).
//! Invariants: Non-interactive errors are emitted as JSON on stderr.
//! Invariants: Process exit code is derived from `api::to_exit_code`.
//! Invariants: All namespace work goes through `api::Loader`.
#![allow(clippy::result_large_err)]
use std::error::Error as StdError;
use std::ffi::OsString;
use std::io::{self, IsTerminal};
use std::path::{Path, PathBuf};

use clap::{
    CommandFactory, Parser, Subcommand, ValueEnum, ValueHint, error::ErrorKind as ClapErrorKind,
};
use clap_complete::aot::Shell;
use serde_json::{Map, Value, json};
use tracing_subscriber::EnvFilter;

mod command_dispatch;

use plugspace::api::{
    ArchiveSummary, ArchiveWriter, DESCRIPTOR_ENTRY, Descriptor, Error, ErrorKind, Host,
    LoadReport, Loader, SharedScope, SymbolSummary, to_exit_code,
};
use plugspace::notice::{Notice, notice_json};
use plugspace::plugin_paths::{
    PluginNameResolveError, default_plugin_dir, resolve_named_plugin_path,
};

#[derive(Copy, Clone, Debug)]
struct RunOutcome {
    exit_code: i32,
}

impl RunOutcome {
    fn ok() -> Self {
        Self { exit_code: 0 }
    }

    fn with_code(exit_code: i32) -> Self {
        Self { exit_code }
    }
}

fn main() {
    init_tracing();
    let exit_code = match run() {
        Ok(outcome) => outcome.exit_code,
        Err((err, color_mode)) => {
            emit_error(&err, color_mode);
            to_exit_code(err.kind())
        }
    };
    std::process::exit(exit_code);
}

fn run() -> Result<RunOutcome, (Error, ColorMode)> {
    let cli = match Cli::try_parse_from(normalize_args(std::env::args_os())) {
        Ok(cli) => cli,
        Err(err) => match err.kind() {
            ClapErrorKind::DisplayHelp
            | ClapErrorKind::DisplayVersion
            | ClapErrorKind::DisplayHelpOnMissingArgumentOrSubcommand => {
                err.print().map_err(|io_err| {
                    (
                        Error::new(ErrorKind::Internal)
                            .with_message("failed to write help")
                            .with_source(io_err),
                        ColorMode::Auto,
                    )
                })?;
                let exit_code = if matches!(
                    err.kind(),
                    ClapErrorKind::DisplayHelpOnMissingArgumentOrSubcommand
                ) {
                    2
                } else {
                    0
                };
                return Ok(RunOutcome::with_code(exit_code));
            }
            _ => {
                let message = clap_error_summary(&err);
                let hint = clap_error_hint(&err);
                return Err((
                    Error::new(ErrorKind::Usage)
                        .with_message(message)
                        .with_hint(hint),
                    ColorMode::Auto,
                ));
            }
        },
    };

    let plugin_dir = cli.dir.unwrap_or_else(default_plugin_dir);
    let color_mode = cli.color;
    let settings = Settings {
        plugin_dir,
        libs: cli.lib,
        color_mode,
    };

    command_dispatch::dispatch_command(cli.command, &settings)
        .map_err(add_corrupt_hint)
        .map_err(add_io_hint)
        .map_err(add_internal_hint)
        .map_err(|err| (err, color_mode))
}

fn normalize_args<I>(args: I) -> Vec<OsString>
where
    I: IntoIterator<Item = OsString>,
{
    args.into_iter()
        .map(|arg| {
            let replacement = arg.to_str().and_then(|value| match value {
                "---help" => Some("--help"),
                "---version" => Some("--version"),
                _ => None,
            });
            replacement.map(OsString::from).unwrap_or_else(|| arg)
        })
        .collect()
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(io::stderr)
        .try_init();
}

#[derive(Parser)]
#[command(
    name = "plugspace",
    version,
    about = "Load plugin archives into isolated namespaces",
    help_template = r#"{about-with-newline}
{before-help}USAGE
  {usage}

COMMANDS
{subcommands}

OPTIONS
{options}

{after-help}
"#,
    long_about = None,
    before_help = r#"Each plugin archive gets its own namespace. A symbol is looked up in the
plugin itself, then in the shared libraries (--lib), then in the plugins it
depends on.
"#,
    after_help = r#"EXAMPLES
  $ plugspace pack ./alpha-src ~/.plugspace/plugins/alpha.plug
  $ plugspace list
  $ plugspace resolve alpha com.example.Widget
  $ plugspace --lib ./shared.plug resolve beta com.example.Util

LEARN MORE
  $ plugspace <command> --help"#,
    arg_required_else_help = true,
    disable_help_subcommand = false
)]
struct Cli {
    #[arg(
        long,
        global = true,
        help = "Plugin directory (default: ~/.plugspace/plugins)",
        value_hint = ValueHint::DirPath
    )]
    dir: Option<PathBuf>,
    #[arg(
        long = "lib",
        global = true,
        value_name = "ARCHIVE",
        help = "Shared library archive visible to every plugin (repeatable)",
        value_hint = ValueHint::FilePath
    )]
    lib: Vec<PathBuf>,
    #[arg(
        long,
        global = true,
        default_value = "auto",
        value_enum,
        help = "Colorize stderr diagnostics: auto|always|never"
    )]
    color: ColorMode,

    #[command(subcommand)]
    command: Command,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum ColorMode {
    Auto,
    Always,
    Never,
}

impl ColorMode {
    fn use_color(self, is_tty: bool) -> bool {
        match self {
            ColorMode::Auto => is_tty,
            ColorMode::Always => true,
            ColorMode::Never => false,
        }
    }
}

/// Resolved global flags shared by every command.
struct Settings {
    plugin_dir: PathBuf,
    libs: Vec<PathBuf>,
    color_mode: ColorMode,
}

#[derive(Subcommand)]
enum Command {
    #[command(
        about = "List plugins and whether they load",
        long_about = r#"Discover every .plug archive in the plugin directory and open them in
dependency order. Plugins with missing hard dependencies are reported as skipped."#
    )]
    List,
    #[command(
        arg_required_else_help = true,
        about = "Show an archive's descriptor, symbols, and signers",
        after_help = r#"EXAMPLES
  $ plugspace inspect alpha
  $ plugspace inspect ./build/alpha.plug"#
    )]
    Inspect {
        #[arg(help = "Plugin name or archive path")]
        plugin: String,
    },
    #[command(
        arg_required_else_help = true,
        about = "Resolve a symbol as seen from a plugin's namespace",
        after_help = r#"EXAMPLES
  $ plugspace resolve alpha com.example.Widget"#
    )]
    Resolve {
        #[arg(help = "Requesting plugin name")]
        plugin: String,
        #[arg(help = "Dotted symbol name (a.b.C)")]
        symbol: String,
    },
    #[command(
        arg_required_else_help = true,
        about = "Pack a source directory into a plugin archive",
        long_about = r#"Pack every file under SRC into a tar archive at OUT.
A symbol a.b.C is expected at SRC/a/b/C.code. When SRC has no plugin.json,
--name writes one."#,
        after_help = r#"EXAMPLES
  $ plugspace pack ./alpha-src alpha.plug
  $ plugspace pack ./beta-src beta.plug --name beta --depends alpha"#
    )]
    Pack {
        #[arg(help = "Source directory", value_hint = ValueHint::DirPath)]
        src: PathBuf,
        #[arg(help = "Output archive path", value_hint = ValueHint::FilePath)]
        out: PathBuf,
        #[arg(long, help = "Descriptor name written when SRC has no plugin.json")]
        name: Option<String>,
        #[arg(long = "plugin-version", default_value = "0", requires = "name")]
        plugin_version: String,
        #[arg(long = "depends", value_name = "PLUGIN", requires = "name")]
        depends: Vec<String>,
        #[arg(long = "soft-depends", value_name = "PLUGIN", requires = "name")]
        soft_depends: Vec<String>,
    },
    #[command(arg_required_else_help = true, about = "Generate shell completions")]
    Completion {
        #[arg(value_enum)]
        shell: Shell,
    },
    #[command(about = "Print version info")]
    Version,
}

fn resolve_plugin_ref(input: &str, plugin_dir: &Path) -> Result<PathBuf, Error> {
    if input.chars().any(std::path::is_separator) {
        return Ok(PathBuf::from(input));
    }
    resolve_named_plugin_path(input, plugin_dir).map_err(map_plugin_name_resolve_error)
}

fn map_plugin_name_resolve_error(err: PluginNameResolveError) -> Error {
    match err {
        PluginNameResolveError::ContainsPathSeparator => Error::new(ErrorKind::Usage)
            .with_message("plugin name must not contain path separators"),
        PluginNameResolveError::Empty => {
            Error::new(ErrorKind::Usage).with_message("plugin name must not be empty")
        }
    }
}

fn build_loader(settings: &Settings) -> Result<Loader, Error> {
    let mut shared = SharedScope::builder();
    for lib in &settings.libs {
        shared = shared.archive(lib)?;
    }
    let host = Host::new("plugspace", env!("CARGO_PKG_VERSION")).with_plugin_dir(&settings.plugin_dir);
    Ok(Loader::new(host).with_shared(shared.build()))
}

fn add_missing_plugin_hint(err: Error, plugin: &str) -> Error {
    if err.kind() != ErrorKind::NotFound || err.hint().is_some() {
        return err;
    }
    if err.symbol().is_some() {
        return err.with_hint(format!(
            "The symbol is not in {plugin}, the shared libraries, or any plugin it depends on."
        ));
    }
    err.with_hint("Check the name with `plugspace list`, or pass --dir.")
}

fn add_io_hint(err: Error) -> Error {
    if err.hint().is_some() {
        return err;
    }
    match err.kind() {
        ErrorKind::Permission => err.with_hint(
            "Permission denied. Check directory permissions or use --dir to a readable location.",
        ),
        ErrorKind::Busy => {
            err.with_hint("Archive is busy (another process is writing it). Retry shortly.")
        }
        ErrorKind::ReadFailure => {
            err.with_hint("Read failed. Check the path, filesystem, and that the archive is intact.")
        }
        _ => err,
    }
}

fn add_corrupt_hint(err: Error) -> Error {
    if err.kind() != ErrorKind::Corrupt || err.hint().is_some() {
        return err;
    }
    err.with_hint("Archive appears corrupt. Repack it with `plugspace pack`.")
}

fn add_internal_hint(err: Error) -> Error {
    if err.kind() != ErrorKind::Internal || err.hint().is_some() {
        return err;
    }
    err.with_hint(
        "Unexpected internal failure. Retry with RUST_LOG=debug and share command/context if it persists.",
    )
}

fn emit_load_notices(cmd: &str, report: &LoadReport, color_mode: ColorMode) {
    if !report.cyclic.is_empty() {
        let notice = Notice::now("cycle", cmd, "dependency cycle detected; loading anyway")
            .with_detail("plugins", json!(report.cyclic));
        emit_notice(&notice, color_mode);
    }
    for skipped in &report.skipped {
        let notice = Notice::now("skipped", cmd, skipped.reason.clone())
            .with_plugin(&skipped.name)
            .with_detail("missing", json!(skipped.missing));
        emit_notice(&notice, color_mode);
    }
}

fn emit_version_output() {
    if io::stdout().is_terminal() {
        println!("plugspace {}", env!("CARGO_PKG_VERSION"));
    } else {
        emit_json(json!({
            "name": "plugspace",
            "version": env!("CARGO_PKG_VERSION"),
        }));
    }
}

fn emit_json(value: Value) {
    let json = if io::stdout().is_terminal() {
        serde_json::to_string_pretty(&value)
    } else {
        serde_json::to_string(&value)
    }
    .unwrap_or_else(|_| "{\"error\":\"json encode failed\"}".to_string());
    println!("{json}");
}

#[derive(Copy, Clone, Debug)]
enum AnsiColor {
    Red,
    Yellow,
}

fn colorize_label(label: &str, enabled: bool, color: AnsiColor) -> String {
    if !enabled {
        return label.to_string();
    }
    let code = match color {
        AnsiColor::Red => "31",
        AnsiColor::Yellow => "33",
    };
    format!("\u{1b}[{code}m{label}\u{1b}[0m")
}

fn emit_error(err: &Error, color_mode: ColorMode) {
    let is_tty = io::stderr().is_terminal();
    if is_tty {
        eprintln!("{}", error_text(err, color_mode.use_color(is_tty)));
        return;
    }

    let value = error_json(err);
    let json = serde_json::to_string(&value).unwrap_or_else(|_| {
        "{\"error\":{\"kind\":\"Internal\",\"message\":\"json encode failed\"}}".to_string()
    });
    eprintln!("{json}");
}

fn emit_notice(notice: &Notice, color_mode: ColorMode) {
    let is_tty = io::stderr().is_terminal();
    if is_tty {
        let label = colorize_label("notice:", color_mode.use_color(is_tty), AnsiColor::Yellow);
        match &notice.plugin {
            Some(plugin) => eprintln!("{label} {} (plugin: {plugin})", notice.message),
            None => eprintln!("{label} {}", notice.message),
        }
        return;
    }

    let value = notice_json(notice);
    let json = serde_json::to_string(&value).unwrap_or_else(|_| {
        "{\"notice\":{\"kind\":\"Internal\",\"message\":\"json encode failed\"}}".to_string()
    });
    eprintln!("{json}");
}

fn error_message(err: &Error) -> String {
    if let Some(message) = err.message() {
        return message.to_string();
    }
    match err.kind() {
        ErrorKind::Internal => "internal error".to_string(),
        ErrorKind::Usage => "usage error".to_string(),
        ErrorKind::NotFound => "not found".to_string(),
        ErrorKind::EntryNotFound => "archive entry not found".to_string(),
        ErrorKind::ReadFailure => "archive read failed".to_string(),
        ErrorKind::AlreadyExists => "already exists".to_string(),
        ErrorKind::IdentityMismatch => "unit belongs to another namespace".to_string(),
        ErrorKind::AlreadyBound => "unit already bound".to_string(),
        ErrorKind::Closed => "namespace is closed".to_string(),
        ErrorKind::Busy => "resource is busy".to_string(),
        ErrorKind::Permission => "permission denied".to_string(),
        ErrorKind::Corrupt => "corrupt data".to_string(),
    }
}

fn error_causes(err: &Error) -> Vec<String> {
    let mut causes = Vec::new();
    let mut cur = err.source();
    while let Some(source) = cur {
        causes.push(source.to_string());
        cur = source.source();
    }
    causes
}

fn error_json(err: &Error) -> Value {
    let mut inner = Map::new();
    inner.insert("kind".to_string(), json!(format!("{:?}", err.kind())));
    inner.insert("message".to_string(), json!(error_message(err)));
    if let Some(hint) = err.hint() {
        inner.insert("hint".to_string(), json!(hint));
    }
    if let Some(path) = err.path() {
        inner.insert("path".to_string(), json!(path.display().to_string()));
    }
    if let Some(unit) = err.unit() {
        inner.insert("plugin".to_string(), json!(unit));
    }
    if let Some(symbol) = err.symbol() {
        inner.insert("symbol".to_string(), json!(symbol));
    }
    if let Some(entry) = err.entry() {
        inner.insert("entry".to_string(), json!(entry));
    }
    let causes = error_causes(err);
    if !causes.is_empty() {
        inner.insert("causes".to_string(), json!(causes));
    }

    let mut outer = Map::new();
    outer.insert("error".to_string(), Value::Object(inner));
    Value::Object(outer)
}

fn error_text(err: &Error, use_color: bool) -> String {
    let mut lines = Vec::new();
    lines.push(format!(
        "{} {}",
        colorize_label("error:", use_color, AnsiColor::Red),
        error_message(err)
    ));

    if let Some(hint) = err.hint() {
        lines.push(format!(
            "{} {hint}",
            colorize_label("hint:", use_color, AnsiColor::Yellow)
        ));
    }
    if let Some(path) = err.path() {
        lines.push(format!(
            "{} {}",
            colorize_label("path:", use_color, AnsiColor::Yellow),
            path.display()
        ));
    }
    if let Some(entry) = err.entry() {
        lines.push(format!(
            "{} {entry}",
            colorize_label("entry:", use_color, AnsiColor::Yellow)
        ));
    }

    let causes = error_causes(err);
    if let Some(cause) = causes.first() {
        lines.push(format!(
            "{} {cause}",
            colorize_label("caused by:", use_color, AnsiColor::Yellow)
        ));
    }

    lines.join("\n")
}

fn clap_error_summary(err: &clap::Error) -> String {
    for line in err.to_string().lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        if let Some(rest) = trimmed.strip_prefix("error:") {
            return rest.trim().to_string();
        }
        return trimmed.to_string();
    }
    "invalid arguments".to_string()
}

fn clap_error_hint(err: &clap::Error) -> String {
    let rendered = err.to_string();
    let usage = rendered
        .lines()
        .find_map(|line| line.trim().strip_prefix("Usage: "))
        .map(str::trim);

    let Some(usage) = usage else {
        return "Try `plugspace --help`.".to_string();
    };

    let tokens: Vec<&str> = usage.split_whitespace().collect();
    let Some(pos) = tokens.iter().position(|t| *t == "plugspace") else {
        return "Try `plugspace --help`.".to_string();
    };

    let parts: Vec<&str> = tokens
        .iter()
        .skip(pos + 1)
        .take_while(|token| {
            !(token.starts_with('-') || token.starts_with('<') || token.starts_with('['))
        })
        .copied()
        .collect();

    if parts.is_empty() {
        return "Try `plugspace --help`.".to_string();
    }
    format!("Try `plugspace {} --help`.", parts.join(" "))
}
