use std::fs;
use std::io::{self, IsTerminal, Read};
use std::path::{Path, PathBuf};

use addme_core::api::{
    AppendOutcome, MediaWikiClient, MediaWikiClientConfig, RenderRequest, WikiReadApi,
    WikiWriteApi,
};
use addme_core::comment::CommentForm;
use addme_core::config::{AddMeConfig, derive_wiki_url, load_config};
use addme_core::error::{GadgetError, render_alert};
use addme_core::gadget::{Gadget, GadgetSettings, SubmitRequest};
use addme_core::loader::SourcePages;
use addme_core::refresh::{PageView, RefreshOutcome};
use addme_core::runtime::{
    PathOverrides, ResolutionContext, ResolvedPaths, init_layout, resolve_paths,
};
use addme_core::settings::DEFAULT_ERROR_REPORT_PAGE;
use addme_core::triggers::find_triggers;
use anyhow::{Context, Result};
use clap::{Args, CommandFactory, Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(
    name = "addme",
    version,
    about = "Append signed comments to wiki page sections using on-wiki AddMe configuration"
)]
struct Cli {
    #[arg(long, global = true, value_name = "PATH")]
    project_root: Option<PathBuf>,
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,
    #[arg(long, global = true, value_name = "URL", help = "MediaWiki api.php endpoint")]
    api_url: Option<String>,
    #[arg(long, global = true, value_name = "CODE", help = "Interface language for messages")]
    lang: Option<String>,
    #[arg(long, global = true, help = "Print resolved runtime diagnostics")]
    diagnostics: bool,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Clone)]
struct RuntimeOptions {
    project_root: Option<PathBuf>,
    config: Option<PathBuf>,
    api_url: Option<String>,
    lang: Option<String>,
    diagnostics: bool,
}

impl RuntimeOptions {
    fn from_cli(cli: &Cli) -> Self {
        Self {
            project_root: cli.project_root.clone(),
            config: cli.config.clone(),
            api_url: cli.api_url.clone(),
            lang: cli.lang.clone(),
            diagnostics: cli.diagnostics,
        }
    }
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Create .addme/config.toml
    Init(InitArgs),
    /// List the AddMe buttons rendered on a page
    Triggers(TriggersArgs),
    /// Load a project's configuration and show the comment form labels
    Show(ProjectArgs),
    /// Show the live sections of the target page and which one is used
    Sections(ProjectArgs),
    /// Append a comment and reload the viewed page
    Submit(SubmitArgs),
}

#[derive(Debug, Args)]
struct InitArgs {
    #[arg(long, help = "Overwrite an existing config file")]
    force: bool,
}

#[derive(Debug, Args)]
struct TriggersArgs {
    page: String,
}

#[derive(Debug, Args)]
struct ProjectArgs {
    #[arg(long, value_name = "KEY")]
    project: String,
    #[arg(long, value_name = "TITLE", help = "Target page, as given by data-addme-page")]
    page: Option<String>,
    #[arg(long, value_name = "TITLE", help = "Page being viewed")]
    view: Option<String>,
}

#[derive(Debug, Args)]
struct SubmitArgs {
    #[arg(long, value_name = "KEY")]
    project: String,
    #[arg(long, value_name = "TITLE", help = "Target page, as given by data-addme-page")]
    page: Option<String>,
    #[arg(long, value_name = "TITLE", help = "Page being viewed")]
    view: String,
    #[arg(long, help = "Add the target page to the watchlist")]
    watch: bool,
    #[arg(long, short, value_name = "TEXT", help = "Comment text (read from stdin when omitted)")]
    message: Option<String>,
    #[arg(long, value_name = "PATH", help = "Write the reloaded page HTML here")]
    output: Option<PathBuf>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let runtime = RuntimeOptions::from_cli(&cli);
    load_env_files(&runtime);
    init_tracing();

    match cli.command {
        Some(Commands::Init(args)) => run_init(&runtime, args),
        Some(Commands::Triggers(args)) => run_triggers(&runtime, args),
        Some(Commands::Show(args)) => run_show(&runtime, args),
        Some(Commands::Sections(args)) => run_sections(&runtime, args),
        Some(Commands::Submit(args)) => run_submit(&runtime, args),
        None => {
            let mut command = Cli::command();
            command.print_help()?;
            println!();
            Ok(())
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(true)
        .init();
}

fn run_init(runtime: &RuntimeOptions, args: InitArgs) -> Result<()> {
    let paths = resolve_runtime_paths(runtime)?;
    let report = init_layout(&paths, args.force)?;

    println!("Initialized addme runtime layout");
    println!("project_root: {}", normalize_path(&paths.project_root));
    println!("state_dir: {}", normalize_path(&paths.state_dir));
    println!("config_path: {}", normalize_path(&paths.config_path));
    println!("created_dirs: {}", report.created_dirs.len());
    println!("wrote_config: {}", format_flag(report.wrote_config));
    if runtime.diagnostics {
        println!("\n[diagnostics]\n{}", paths.diagnostics());
    }
    Ok(())
}

fn run_triggers(runtime: &RuntimeOptions, args: TriggersArgs) -> Result<()> {
    let session = Session::open(runtime)?;
    let mut client = session.client()?;
    let rendered = client.render_page(&RenderRequest {
        page: args.page.clone(),
        language: session.settings.sources.user_language.clone(),
        skin: session.settings.skin.clone(),
    })?;
    let triggers = find_triggers(&rendered.html);

    println!("page: {} (revision {})", rendered.title, rendered.revision_id);
    println!("buttons: {}", triggers.len());
    for (position, trigger) in triggers.iter().enumerate() {
        match trigger.project() {
            Ok(project) => println!(
                "  {}. project={} page={}",
                position + 1,
                project,
                trigger.page().unwrap_or("<viewed page>")
            ),
            Err(error) => println!("  {}. {}", position + 1, error),
        }
    }
    session.print_diagnostics(runtime, client.request_count());
    Ok(())
}

fn run_show(runtime: &RuntimeOptions, args: ProjectArgs) -> Result<()> {
    let session = Session::open(runtime)?;
    let mut gadget = Gadget::new(session.client()?, session.settings.clone());

    let loaded = gadget
        .load(&args.project)
        .map_err(|error| alert(&error, DEFAULT_ERROR_REPORT_PAGE))?;
    let config_json = serde_json::to_string_pretty(&loaded.config)?;
    let warnings = loaded.warnings.clone();
    let message_count = loaded.messages.len();

    let viewed = args.view.as_deref().unwrap_or("<viewed page>");
    let target = gadget
        .target_page(&args.project, args.page.as_deref(), viewed)
        .map_err(|error| alert(&error, gadget.report_page(&args.project)))?;
    let dialog = gadget
        .open_dialog(&args.project)
        .map_err(|error| alert(&error, gadget.report_page(&args.project)))?;

    println!("project: {}", args.project);
    println!("target_page: {target}");
    println!("report_page: {}", gadget.report_page(&args.project));
    println!("messages: {message_count}");
    println!("config:\n{config_json}");
    println!("\n[dialog]\n{}", dialog.render_prompt());
    for warning in &warnings {
        println!("warning: {warning}");
    }
    session.print_diagnostics(runtime, gadget.api().request_count());
    Ok(())
}

fn run_sections(runtime: &RuntimeOptions, args: ProjectArgs) -> Result<()> {
    let session = Session::open(runtime)?;
    let mut gadget = Gadget::new(session.client()?, session.settings.clone());

    let target = match (args.page.as_deref(), args.view.as_deref()) {
        (None, None) => gadget
            .load(&args.project)
            .map_err(|error| alert(&error, DEFAULT_ERROR_REPORT_PAGE))?
            .config
            .page
            .clone()
            .context("no target page: pass --page or --view, or set `page` in the on-wiki configuration")?,
        (trigger_page, viewed) => gadget
            .target_page(&args.project, trigger_page, viewed.unwrap_or_default())
            .map_err(|error| alert(&error, DEFAULT_ERROR_REPORT_PAGE))?,
    };
    let preview = gadget
        .preview_sections(&args.project, &target)
        .map_err(|error| alert(&error, gadget.report_page(&args.project)))?;

    println!("page: {}", preview.page);
    println!("timestamp: {}", preview.timestamp);
    println!("sections: {}", preview.sections.len());
    for section in &preview.sections {
        let marker = if preview
            .chosen
            .as_ref()
            .is_some_and(|chosen| chosen.index == section.index)
        {
            "*"
        } else {
            " "
        };
        println!(
            " {marker} [{}] {}{} (#{})",
            section.index,
            "  ".repeat(usize::from(section.level.saturating_sub(1))),
            section.heading,
            section.anchor
        );
    }
    if let Some(problem) = &preview.problem {
        println!("problem: {problem}");
    }
    session.print_diagnostics(runtime, gadget.api().request_count());
    Ok(())
}

fn run_submit(runtime: &RuntimeOptions, args: SubmitArgs) -> Result<()> {
    let session = Session::open(runtime)?;
    let mut client = session.client()?;
    login_from_env(&mut client)?;
    let mut gadget = Gadget::new(client, session.settings.clone());

    let dialog = gadget
        .open_dialog(&args.project)
        .map_err(|error| alert(&error, gadget.report_page(&args.project)))?;
    let text = match args.message {
        Some(text) => text,
        None => {
            let stdin = io::stdin();
            if stdin.is_terminal() {
                eprintln!("{}\n(end with Ctrl-D)", dialog.render_prompt());
            }
            let mut text = String::new();
            stdin
                .lock()
                .read_to_string(&mut text)
                .context("failed to read comment from stdin")?;
            text
        }
    };

    let request = SubmitRequest {
        project: args.project.clone(),
        trigger_page: args.page.clone(),
        form: CommentForm {
            text,
            watch: args.watch,
        },
    };
    let mut view = PageView::new(args.view.clone());
    let report = match gadget.submit(&request, &mut view) {
        Ok(report) => report,
        Err(error) => {
            let recoverable = error.is_recoverable();
            let failure = alert(&error, gadget.report_page(&args.project));
            if recoverable {
                eprintln!("The comment was not saved; you can submit it again.");
            }
            return Err(failure);
        }
    };

    println!("page: {}", report.page);
    println!("section: {} ({})", report.section.index, report.section.heading);
    println!("revision: {}", format_revision(&report.outcome));
    match &report.refresh {
        RefreshOutcome::Refreshed {
            revision_id,
            feedback,
        } => {
            println!("reloaded: {} (revision {revision_id})", view.page);
            if !feedback.is_empty() {
                println!("{feedback}");
            }
            if let Some(path) = args.output.as_deref() {
                write_output(path, &view.html)?;
                println!("output: {}", normalize_path(path));
            }
        }
        RefreshOutcome::Redirect { url } => {
            println!("The comment was saved, but the page could not be reloaded.");
            println!("open: {url}");
        }
    }
    session.print_diagnostics(runtime, gadget.api().request_count());
    Ok(())
}

/// Resolved paths, local configuration and the session settings derived from them.
struct Session {
    paths: ResolvedPaths,
    config: AddMeConfig,
    settings: GadgetSettings,
    api_url_flag: Option<String>,
}

impl Session {
    fn open(runtime: &RuntimeOptions) -> Result<Self> {
        let paths = resolve_runtime_paths(runtime)?;
        let config = load_config(&paths.config_path)?;
        let mut settings = GadgetSettings::from_config(&config);

        if let Some(api_url) = runtime.api_url.as_deref() {
            settings.wiki_url = config.wiki.url.clone().or_else(|| derive_wiki_url(api_url));
        }
        if let Some(lang) = runtime.lang.as_deref() {
            settings.sources = SourcePages::new(config.config_page(), config.messages_page(), lang);
        }

        Ok(Self {
            paths,
            config,
            settings,
            api_url_flag: runtime.api_url.clone(),
        })
    }

    fn client(&self) -> Result<MediaWikiClient> {
        let mut client_config = MediaWikiClientConfig::from_config(&self.config);
        if let Some(api_url) = &self.api_url_flag {
            client_config.api_url = api_url.clone();
        }
        MediaWikiClient::new(client_config)
    }

    fn print_diagnostics(&self, runtime: &RuntimeOptions, requests: usize) {
        if !runtime.diagnostics {
            return;
        }
        println!("\n[diagnostics]\n{}", self.paths.diagnostics());
        println!(
            "user_language={}\nconfig_page={}\nmessages_page={}\napi_requests={requests}",
            self.settings.sources.user_language,
            self.settings.sources.config_page,
            self.settings.sources.base_messages_page,
        );
    }
}

fn login_from_env<A: WikiWriteApi>(api: &mut A) -> Result<()> {
    let username = std::env::var("WIKI_BOT_USER").unwrap_or_default();
    let password = std::env::var("WIKI_BOT_PASS").unwrap_or_default();
    if username.trim().is_empty() || password.is_empty() {
        warn!(target: "addme", "WIKI_BOT_USER/WIKI_BOT_PASS not set, editing anonymously");
        return Ok(());
    }
    api.login(username.trim(), &password)
        .with_context(|| format!("failed to log in as {}", username.trim()))?;
    info!(target: "addme", user = username.trim(), "logged in");
    Ok(())
}

fn alert(error: &GadgetError, report_page: &str) -> anyhow::Error {
    let text = render_alert(&error.to_string(), report_page);
    if let GadgetError::SaveFailed { detail, .. } = error {
        warn!(target: "addme", "{detail}");
    }
    anyhow::anyhow!(text)
}

fn write_output(path: &Path, html: &str) -> Result<()> {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    fs::write(path, html).with_context(|| format!("failed to write {}", path.display()))
}

/// Load `.env` from the working directory, then the project root's `.env` over it.
///
/// Runs before logging is set up so `RUST_LOG` may come from either file.
fn load_env_files(runtime: &RuntimeOptions) {
    dotenvy::dotenv().ok();

    let Ok(context) = ResolutionContext::from_process() else {
        return;
    };
    if let Ok(initial) = resolve_paths(&context, &path_overrides(runtime)) {
        let project_env = initial.project_root.join(".env");
        if project_env.exists() {
            let _ = dotenvy::from_path_override(&project_env);
        }
    }
}

fn resolve_runtime_paths(runtime: &RuntimeOptions) -> Result<ResolvedPaths> {
    let context = ResolutionContext::from_process()?;
    resolve_paths(&context, &path_overrides(runtime))
}

fn path_overrides(runtime: &RuntimeOptions) -> PathOverrides {
    PathOverrides {
        project_root: runtime.project_root.clone(),
        config: runtime.config.clone(),
    }
}

fn normalize_path(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

fn format_flag(value: bool) -> &'static str {
    if value { "yes" } else { "no" }
}

fn format_revision(outcome: &AppendOutcome) -> String {
    match outcome.new_revision_id {
        Some(revid) if !outcome.no_change => revid.to_string(),
        _ => "<unchanged, the page already had this text>".to_string(),
    }
}
