use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use sceneweaver_contracts::errors::truncate_text;
use sceneweaver_contracts::events::EventLog;
use sceneweaver_contracts::images::{ImageId, ImageRecord, Resolution};
use sceneweaver_contracts::session::SessionEvent;
use sceneweaver_contracts::storyboards::StoryboardSummary;
use sceneweaver_engine::{
    ClientConfig, DryrunBackend, HttpBackend, PoseImage, RegenerateRequest, StoryboardBackend,
    StoryboardCatalog, StoryboardView, SubmitOutcome,
};

#[derive(Debug, Parser)]
#[command(name = "sceneweaver", version, about = "Storyboard generation client")]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Args)]
struct GlobalArgs {
    /// Backend base URL (overrides SCENEWEAVER_API_BASE).
    #[arg(long, global = true)]
    api_base: Option<String>,
    /// Bearer token (overrides SCENEWEAVER_TOKEN).
    #[arg(long, global = true)]
    token: Option<String>,
    /// Use the offline backend instead of HTTP.
    #[arg(long, global = true)]
    dryrun: bool,
    /// File the offline backend keeps its images and storyboards in between runs
    /// (overrides SCENEWEAVER_DRYRUN_STATE; defaults to the system temp dir).
    #[arg(long, global = true, requires = "dryrun")]
    dryrun_state: Option<PathBuf>,
    /// Append session and mutation events to this JSONL file.
    #[arg(long, global = true)]
    events: Option<PathBuf>,
    /// Print machine-readable JSON instead of text.
    #[arg(long, global = true)]
    json: bool,
}

#[derive(Debug, Subcommand)]
enum Command {
    Generate(GenerateArgs),
    Images(ImagesArgs),
    Caption(CaptionArgs),
    Regenerate(RegenerateArgs),
    Delete(DeleteArgs),
    #[command(subcommand)]
    Storyboards(StoryboardsCommand),
}

#[derive(Debug, Parser)]
struct GenerateArgs {
    #[arg(long)]
    storyboard: i64,
    #[arg(long, conflicts_with = "story_file")]
    story: Option<String>,
    #[arg(long)]
    story_file: Option<PathBuf>,
    #[arg(long, default_value = "1:1")]
    resolution: Resolution,
    /// Poll interval in milliseconds (overrides SCENEWEAVER_POLL_INTERVAL_MS).
    #[arg(long)]
    poll_ms: Option<u64>,
}

#[derive(Debug, Parser)]
struct ImagesArgs {
    #[arg(long)]
    storyboard: i64,
    #[arg(long, default_value_t = 1)]
    page: usize,
}

#[derive(Debug, Parser)]
struct CaptionArgs {
    #[arg(long)]
    storyboard: i64,
    #[arg(long)]
    image: ImageId,
    #[arg(long)]
    text: String,
}

#[derive(Debug, Parser)]
struct RegenerateArgs {
    #[arg(long)]
    storyboard: i64,
    #[arg(long)]
    image: ImageId,
    #[arg(long)]
    prompt: String,
    /// Non-negative integer; anything else lets the server pick.
    #[arg(long, default_value = "")]
    seed: String,
    #[arg(long, default_value = "1:1")]
    resolution: Resolution,
    #[arg(long)]
    openpose: bool,
    #[arg(long)]
    pose_image: Option<PathBuf>,
}

#[derive(Debug, Parser)]
struct DeleteArgs {
    #[arg(long)]
    storyboard: i64,
    #[arg(long)]
    image: ImageId,
}

#[derive(Debug, Subcommand)]
enum StoryboardsCommand {
    List,
    Create {
        #[arg(long)]
        name: String,
    },
    Rename {
        #[arg(long)]
        id: i64,
        #[arg(long)]
        name: String,
    },
    Delete {
        #[arg(long)]
        id: i64,
    },
}

const EVENT_WAIT: Duration = Duration::from_millis(250);
const PATH_PREVIEW_CHARS: usize = 72;
const DRYRUN_STATE_FILE: &str = "sceneweaver-dryrun.json";
const DRYRUN_RELEASE_PER_POLL: usize = 1;

fn main() {
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("sceneweaver error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    let client = Client::from_args(&cli.global)?;
    match cli.command {
        Command::Generate(args) => run_generate(&client, args),
        Command::Images(args) => run_images(&client, args),
        Command::Caption(args) => run_caption(&client, args),
        Command::Regenerate(args) => run_regenerate(&client, args),
        Command::Delete(args) => run_delete(&client, args),
        Command::Storyboards(command) => run_storyboards(&client, command),
    }
}

struct Client {
    config: ClientConfig,
    images: Arc<dyn StoryboardBackend>,
    catalog: Arc<dyn StoryboardCatalog>,
    events: Option<PathBuf>,
    json: bool,
}

impl Client {
    fn from_args(args: &GlobalArgs) -> Result<Self> {
        let mut config = ClientConfig::from_env();
        if let Some(api_base) = args.api_base.as_deref() {
            config = config.with_api_base(api_base);
        }
        if args.token.is_some() {
            config = config.with_token(args.token.clone());
        }
        let (images, catalog) = if args.dryrun {
            let state_path = dryrun_state_path(args.dryrun_state.as_deref());
            let backend = Arc::new(DryrunBackend::open(state_path, DRYRUN_RELEASE_PER_POLL)?);
            let images: Arc<dyn StoryboardBackend> = backend.clone();
            let catalog: Arc<dyn StoryboardCatalog> = backend;
            (images, catalog)
        } else {
            let backend = Arc::new(HttpBackend::new(&config)?);
            let images: Arc<dyn StoryboardBackend> = backend.clone();
            let catalog: Arc<dyn StoryboardCatalog> = backend;
            (images, catalog)
        };
        Ok(Self {
            config,
            images,
            catalog,
            events: args.events.clone(),
            json: args.json,
        })
    }

    fn view(&self, storyboard_id: i64, config: ClientConfig) -> StoryboardView {
        let log = self
            .events
            .as_ref()
            .map(|path| EventLog::new(path.clone(), storyboard_id));
        StoryboardView::new(Arc::clone(&self.images), storyboard_id, config, log)
    }
}

fn dryrun_state_path(explicit: Option<&Path>) -> PathBuf {
    if let Some(path) = explicit {
        return path.to_path_buf();
    }
    env::var_os("SCENEWEAVER_DRYRUN_STATE")
        .filter(|value| !value.is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| env::temp_dir().join(DRYRUN_STATE_FILE))
}

fn read_story(story: Option<String>, story_file: Option<&Path>) -> Result<String> {
    match (story, story_file) {
        (Some(story), _) => Ok(story),
        (None, Some(path)) => fs::read_to_string(path)
            .with_context(|| format!("failed reading {}", path.display())),
        (None, None) => bail!("either --story or --story-file is required"),
    }
}

fn poll_interval(ms: u64) -> Duration {
    Duration::from_millis(ms.clamp(100, 60_000))
}

/// Exit status for events that end a generation run.
fn exit_code(event: &SessionEvent) -> Option<i32> {
    match event {
        SessionEvent::Completed { .. } => Some(0),
        SessionEvent::Failed { .. } => Some(1),
        SessionEvent::Cancelled { .. } => Some(130),
        _ => None,
    }
}

fn run_generate(client: &Client, args: GenerateArgs) -> Result<i32> {
    let story = read_story(args.story, args.story_file.as_deref())?;
    let mut config = client.config.clone();
    if let Some(ms) = args.poll_ms {
        config = config.with_poll_interval(poll_interval(ms));
    }

    let mut view = client.view(args.storyboard, config);
    view.load()
        .with_context(|| format!("failed loading storyboard {}", args.storyboard))?;
    let start = match view.submit(&story, args.resolution)? {
        SubmitOutcome::Started(start) => start,
        SubmitOutcome::AlreadyRunning => bail!("a generation is already running"),
    };
    if !client.json {
        println!(
            "Generating {} image(s) for storyboard {} ({} already present)",
            start.expected_new, args.storyboard, start.baseline_count
        );
    }

    let code = loop {
        let Some(event) = view.wait_event(EVENT_WAIT) else {
            continue;
        };
        if client.json {
            println!("{}", serde_json::to_string(&event)?);
        } else {
            print_event(&event);
        }
        if let Some(code) = exit_code(&event) {
            break code;
        }
    };

    if code == 0 && !client.json {
        print_page(&mut view);
    }
    Ok(code)
}

fn print_event(event: &SessionEvent) {
    match event {
        SessionEvent::Started { .. } | SessionEvent::Dispatched { .. } => {}
        SessionEvent::ProgressChanged {
            observed_new,
            expected_new,
            fraction,
            ..
        } => println!(
            "  {:>3.0}%  {observed_new}/{expected_new}",
            fraction * 100.0
        ),
        SessionEvent::PollFailed {
            consecutive_failures,
            message,
            ..
        } => eprintln!("  poll failed ({consecutive_failures}): {message}"),
        SessionEvent::Completed { observed_new, .. } => {
            println!("Done: {observed_new} new image(s).")
        }
        SessionEvent::Failed { message, .. } => eprintln!("Generation failed: {message}"),
        SessionEvent::Cancelled { .. } => eprintln!("Generation cancelled."),
    }
}

fn run_images(client: &Client, args: ImagesArgs) -> Result<i32> {
    let mut view = client.view(args.storyboard, client.config.clone());
    view.load()
        .with_context(|| format!("failed loading storyboard {}", args.storyboard))?;
    view.go_to_page(args.page);
    if client.json {
        let page = view
            .visible_page()
            .into_iter()
            .map(|visible| visible.record)
            .collect::<Vec<ImageRecord>>();
        println!("{}", serde_json::to_string_pretty(&page)?);
    } else {
        print_page(&mut view);
    }
    Ok(0)
}

fn print_page(view: &mut StoryboardView) {
    let page = view.visible_page();
    let len = view.len();
    let cursor = view.cursor();
    if page.is_empty() {
        println!("No images yet.");
        return;
    }
    println!(
        "Page {}/{} ({len} image(s))",
        cursor.page_number(),
        cursor.page_count(len)
    );
    for visible in page {
        println!(
            "{:<12} #{:<6} {}",
            visible.label, visible.record.id, visible.record.caption
        );
        println!(
            "             {}",
            truncate_text(&visible.record.image_path, PATH_PREVIEW_CHARS)
        );
    }
}

fn run_caption(client: &Client, args: CaptionArgs) -> Result<i32> {
    let view = client.view(args.storyboard, client.config.clone());
    let record = view.coordinator().update_caption(args.image, &args.text)?;
    print_record(client, &record)?;
    Ok(0)
}

fn run_regenerate(client: &Client, args: RegenerateArgs) -> Result<i32> {
    let view = client.view(args.storyboard, client.config.clone());
    let mut request = RegenerateRequest::new(args.prompt).with_seed_text(&args.seed);
    request.resolution = args.resolution;
    request.use_openpose = args.openpose;
    if let Some(path) = args.pose_image.as_deref() {
        request.pose_image = Some(PoseImage::from_path(path)?);
    }
    let outcome = view.coordinator().regenerate(args.image, &request)?;
    if !outcome.refreshed && !client.json {
        eprintln!("Image regenerated, but the list could not be refreshed.");
    }
    print_record(client, &outcome.record)?;
    Ok(0)
}

fn run_delete(client: &Client, args: DeleteArgs) -> Result<i32> {
    let mut view = client.view(args.storyboard, client.config.clone());
    view.delete_image(args.image)?;
    if !client.json {
        println!("Deleted image {}.", args.image);
    }
    Ok(0)
}

fn print_record(client: &Client, record: &ImageRecord) -> Result<()> {
    if client.json {
        println!("{}", serde_json::to_string_pretty(record)?);
    } else {
        println!("#{} {}", record.id, record.caption);
        println!("   {}", truncate_text(&record.image_path, PATH_PREVIEW_CHARS));
    }
    Ok(())
}

fn run_storyboards(client: &Client, command: StoryboardsCommand) -> Result<i32> {
    match command {
        StoryboardsCommand::List => {
            let boards = client.catalog.list_storyboards()?;
            if client.json {
                println!("{}", serde_json::to_string_pretty(&boards)?);
            } else if boards.is_empty() {
                println!("No storyboards yet.");
            } else {
                for board in &boards {
                    print_storyboard(board);
                }
            }
        }
        StoryboardsCommand::Create { name } => {
            let board = client.catalog.create_storyboard(&name)?;
            print_summary(client, &board)?;
        }
        StoryboardsCommand::Rename { id, name } => {
            let board = client.catalog.rename_storyboard(id, &name)?;
            print_summary(client, &board)?;
        }
        StoryboardsCommand::Delete { id } => {
            client.catalog.delete_storyboard(id)?;
            if !client.json {
                println!("Deleted storyboard {id}.");
            }
        }
    }
    Ok(0)
}

fn print_summary(client: &Client, board: &StoryboardSummary) -> Result<()> {
    if client.json {
        println!("{}", serde_json::to_string_pretty(board)?);
    } else {
        print_storyboard(board);
    }
    Ok(())
}

fn print_storyboard(board: &StoryboardSummary) {
    let updated = board
        .updated_at
        .as_deref()
        .or(board.created_at.as_deref())
        .unwrap_or("-");
    println!("{:>5}  {:<40} {}", board.id, board.name, updated);
}
