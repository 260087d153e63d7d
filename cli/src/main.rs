use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use pagedash::resources::{Page, PostFilter, Window};
use pagedash::{ApiClient, ApiError, ClientConfig, Notification, RequestOptions, SessionHandle, Timeouts, UploadProgress};
use serde_json::Value;
use tokio::sync::{broadcast, mpsc};
use tracing_subscriber::EnvFilter;

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error(transparent)]
    Api(#[from] ApiError),
    #[error("invalid JSON payload: {0}")]
    InvalidJson(#[from] serde_json::Error),
    #[error("invalid query pair `{0}`; expected key=value")]
    InvalidQuery(String),
    #[error("missing expected field `{0}`")]
    MissingField(&'static str),
    #[error("not signed in; run `pagedash login` first")]
    NotSignedIn,
}

#[derive(Parser, Debug)]
#[command(name = "pagedash", about = "Page analytics API CLI")]
struct Cli {
    #[arg(long, env = "PAGEDASH_API_BASE_URL", default_value = "http://localhost:8000")]
    base_url: String,

    #[arg(long, env = "PAGEDASH_API_PREFIX", default_value = "/api/v1")]
    api_prefix: String,

    #[arg(long, env = "PAGEDASH_SESSION_FILE", default_value = ".pagedash-session.json")]
    session_file: PathBuf,

    #[arg(long, env = "PAGEDASH_REQUEST_TIMEOUT_SECS", default_value_t = 30)]
    timeout_secs: u64,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    Login {
        #[arg(long)]
        email: String,
        #[arg(long, env = "PAGEDASH_PASSWORD", hide_env_values = true)]
        password: String,
    },
    Register {
        #[arg(long)]
        email: String,
        #[arg(long)]
        full_name: String,
        #[arg(long, env = "PAGEDASH_PASSWORD", hide_env_values = true)]
        password: String,
    },
    /// Exchange a Facebook user access token for a session.
    Facebook {
        #[arg(long, env = "PAGEDASH_FACEBOOK_TOKEN", hide_env_values = true)]
        token: String,
    },
    Logout,
    Whoami,
    Refresh,
    Health {
        #[arg(value_enum, default_value = "basic")]
        probe: Probe,
    },
    Api(ApiCommand),
    Pages(PagesCommand),
    Posts(PostsCommand),
    Analytics(AnalyticsCommand),
    Reports(ReportsCommand),
    Upload {
        path: String,
        file: PathBuf,
        #[arg(long, default_value = "file")]
        field: String,
    },
    Download {
        path: String,
        #[arg(long, default_value = ".")]
        dest: PathBuf,
        #[arg(long)]
        name: Option<String>,
    },
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum Probe {
    Basic,
    Ready,
    Live,
}

#[derive(Args, Debug)]
struct ApiCommand {
    #[command(subcommand)]
    command: ApiSubcommand,
}

/// Raw calls against any path under the API prefix.
#[derive(Subcommand, Debug)]
enum ApiSubcommand {
    Get {
        path: String,
        #[arg(long = "query", short = 'q', help = "key=value, repeatable")]
        query: Vec<String>,
    },
    Post {
        path: String,
        #[arg(long, default_value = "{}")]
        data: String,
    },
    Put {
        path: String,
        #[arg(long, default_value = "{}")]
        data: String,
    },
    Patch {
        path: String,
        #[arg(long, default_value = "{}")]
        data: String,
    },
    Delete {
        path: String,
    },
}

#[derive(Args, Debug)]
struct PagesCommand {
    #[command(subcommand)]
    command: PagesSubcommand,
}

#[derive(Subcommand, Debug)]
enum PagesSubcommand {
    List {
        #[arg(long, default_value_t = false)]
        active_only: bool,
    },
    Read {
        page_id: String,
    },
    Add {
        #[arg(long)]
        data: String,
    },
    Update {
        page_id: String,
        #[arg(long)]
        data: String,
    },
    Remove {
        page_id: String,
    },
    Sync {
        page_id: String,
    },
}

#[derive(Args, Debug)]
struct PostsCommand {
    #[command(subcommand)]
    command: PostsSubcommand,
}

#[derive(Subcommand, Debug)]
enum PostsSubcommand {
    List {
        #[arg(long)]
        page_id: Option<String>,
        #[arg(long)]
        post_type: Option<String>,
        #[arg(long)]
        start_date: Option<String>,
        #[arg(long)]
        end_date: Option<String>,
        #[arg(long)]
        limit: Option<u32>,
        #[arg(long)]
        skip: Option<u32>,
    },
    Read {
        post_id: String,
    },
    Top {
        page_id: String,
        #[arg(long)]
        metric: Option<String>,
        #[arg(long)]
        limit: Option<u32>,
        #[arg(long)]
        days: Option<u32>,
    },
}

#[derive(Args, Debug)]
struct AnalyticsCommand {
    #[command(subcommand)]
    command: AnalyticsSubcommand,
}

#[derive(Subcommand, Debug)]
enum AnalyticsSubcommand {
    Summary {
        page_id: String,
        #[arg(long)]
        days: Option<u32>,
    },
    Insights {
        page_id: String,
        #[arg(long)]
        start_date: Option<String>,
        #[arg(long)]
        end_date: Option<String>,
        #[arg(long)]
        metric_type: Option<String>,
    },
    Post {
        post_id: String,
    },
    Dashboard {
        page_id: String,
        #[arg(long)]
        days: Option<u32>,
    },
    Compare {
        #[arg(required = true)]
        page_ids: Vec<String>,
        #[arg(long)]
        days: Option<u32>,
    },
}

#[derive(Args, Debug)]
struct ReportsCommand {
    #[command(subcommand)]
    command: ReportsSubcommand,
}

#[derive(Subcommand, Debug)]
enum ReportsSubcommand {
    List {
        #[arg(long)]
        status: Option<String>,
        #[arg(long)]
        report_type: Option<String>,
    },
    Create {
        #[arg(long)]
        data: String,
    },
    Read {
        report_id: String,
    },
    Delete {
        report_id: String,
    },
    Summary,
    /// Request a download link and save the report file.
    Fetch {
        report_id: String,
        #[arg(long, default_value = ".")]
        dest: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<(), CliError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = ClientConfig::new(&cli.base_url)?
        .with_api_prefix(&cli.api_prefix)
        .with_timeouts(Timeouts { request_secs: cli.timeout_secs, ..Timeouts::default() })
        .with_session_file(cli.session_file.clone());

    let session = SessionHandle::load(&cli.session_file)?;
    let client = ApiClient::new(config, session.clone())?;
    let mut notifications = client.notifier().subscribe();

    let result = run(&client, cli.command).await;

    print_notifications(&mut notifications);
    session.save(&cli.session_file)?;
    result
}

async fn run(client: &ApiClient, command: Command) -> Result<(), CliError> {
    match command {
        Command::Login { email, password } => {
            let user = client.auth().login(&email, &password).await?;
            print_signed_in(user.as_ref().map(|u| u.email.as_str()));
            Ok(())
        }
        Command::Register { email, full_name, password } => {
            let user = client.auth().register(&email, &full_name, &password).await?;
            print_signed_in(user.as_ref().map(|u| u.email.as_str()));
            Ok(())
        }
        Command::Facebook { token } => {
            let user = client.auth().facebook_login(&token).await?;
            print_signed_in(user.as_ref().map(|u| u.email.as_str()));
            Ok(())
        }
        Command::Logout => {
            client.auth().logout().await?;
            println!("signed out");
            Ok(())
        }
        Command::Whoami => {
            if !client.session().is_authenticated() {
                return Err(CliError::NotSignedIn);
            }
            let user = client.auth().me().await?;
            print_json(&serde_json::to_value(user)?)
        }
        Command::Refresh => {
            client.auth().refresh().await?;
            println!("token refreshed");
            Ok(())
        }
        Command::Health { probe } => {
            let health = client.health();
            let json = match probe {
                Probe::Basic => health.check().await?,
                Probe::Ready => health.ready().await?,
                Probe::Live => health.live().await?,
            };
            print_json(&json)
        }
        Command::Api(api) => run_api(client, api).await,
        Command::Pages(pages) => run_pages(client, pages).await,
        Command::Posts(posts) => run_posts(client, posts).await,
        Command::Analytics(analytics) => run_analytics(client, analytics).await,
        Command::Reports(reports) => run_reports(client, reports).await,
        Command::Upload { path, file, field } => {
            let (tx, rx) = mpsc::channel(16);
            let printer = tokio::spawn(print_progress(rx));
            let result = client.upload::<Value>(&path, &file, &field, Some(tx)).await;
            let _ = printer.await;
            print_json(&result?.data)
        }
        Command::Download { path, dest, name } => {
            let saved = client.download(&path, &dest, name.as_deref()).await?;
            println!("{}", saved.display());
            Ok(())
        }
    }
}

async fn run_api(client: &ApiClient, api: ApiCommand) -> Result<(), CliError> {
    let json: Value = match api.command {
        ApiSubcommand::Get { path, query } => {
            let mut options = RequestOptions::default();
            for pair in query {
                let (key, value) = pair.split_once('=').ok_or_else(|| CliError::InvalidQuery(pair.clone()))?;
                options = options.query(key, value);
            }
            client.get(&path, options).await?
        }
        ApiSubcommand::Post { path, data } => client.post(&path, &serde_json::from_str::<Value>(&data)?).await?,
        ApiSubcommand::Put { path, data } => client.put(&path, &serde_json::from_str::<Value>(&data)?).await?,
        ApiSubcommand::Patch { path, data } => client.patch(&path, &serde_json::from_str::<Value>(&data)?).await?,
        ApiSubcommand::Delete { path } => client.delete(&path).await?,
    };
    print_json(&json)
}

async fn run_pages(client: &ApiClient, pages: PagesCommand) -> Result<(), CliError> {
    let api = client.pages();
    let json = match pages.command {
        PagesSubcommand::List { active_only } => api.list(active_only).await?,
        PagesSubcommand::Read { page_id } => api.get(&page_id).await?,
        PagesSubcommand::Add { data } => api.add(&serde_json::from_str(&data)?).await?,
        PagesSubcommand::Update { page_id, data } => api.update(&page_id, &serde_json::from_str(&data)?).await?,
        PagesSubcommand::Remove { page_id } => api.remove(&page_id).await?,
        PagesSubcommand::Sync { page_id } => api.sync(&page_id).await?,
    };
    print_json(&json)
}

async fn run_posts(client: &ApiClient, posts: PostsCommand) -> Result<(), CliError> {
    let api = client.posts();
    let json = match posts.command {
        PostsSubcommand::List { page_id, post_type, start_date, end_date, limit, skip } => {
            let filter = PostFilter { page_id, post_type, start_date, end_date };
            api.list(&filter, Page { limit, skip }).await?
        }
        PostsSubcommand::Read { post_id } => api.get(&post_id).await?,
        PostsSubcommand::Top { page_id, metric, limit, days } => {
            api.top_performing(&page_id, metric.as_deref(), limit, days).await?
        }
    };
    print_json(&json)
}

async fn run_analytics(client: &ApiClient, analytics: AnalyticsCommand) -> Result<(), CliError> {
    let api = client.analytics();
    let json = match analytics.command {
        AnalyticsSubcommand::Summary { page_id, days } => {
            let window = Window { days, ..Window::default() };
            api.page_summary(&page_id, &window).await?
        }
        AnalyticsSubcommand::Insights { page_id, start_date, end_date, metric_type } => {
            let window = Window { start_date, end_date, days: None };
            api.page_insights(&page_id, &window, metric_type.as_deref()).await?
        }
        AnalyticsSubcommand::Post { post_id } => api.post_insights(&post_id).await?,
        AnalyticsSubcommand::Dashboard { page_id, days } => api.dashboard(&page_id, days).await?,
        AnalyticsSubcommand::Compare { page_ids, days } => {
            let ids: Vec<&str> = page_ids.iter().map(String::as_str).collect();
            api.compare(&ids, days).await?
        }
    };
    print_json(&json)
}

async fn run_reports(client: &ApiClient, reports: ReportsCommand) -> Result<(), CliError> {
    let api = client.reports();
    let json = match reports.command {
        ReportsSubcommand::List { status, report_type } => {
            api.list(status.as_deref(), report_type.as_deref(), Page::default()).await?
        }
        ReportsSubcommand::Create { data } => api.create(&serde_json::from_str(&data)?).await?,
        ReportsSubcommand::Read { report_id } => api.get(&report_id).await?,
        ReportsSubcommand::Delete { report_id } => api.delete(&report_id).await?,
        ReportsSubcommand::Summary => api.summary().await?,
        ReportsSubcommand::Fetch { report_id, dest } => {
            let link = api.download_link(&report_id).await?;
            let url = link
                .get("download_url")
                .and_then(Value::as_str)
                .ok_or(CliError::MissingField("download_url"))?;
            let saved = client.download(url, &dest, None).await?;
            println!("{}", saved.display());
            return Ok(());
        }
    };
    print_json(&json)
}

async fn print_progress(mut rx: mpsc::Receiver<UploadProgress>) {
    let mut last = None;
    while let Some(progress) = rx.recv().await {
        let pct = progress.percent();
        if last != Some(pct) {
            eprintln!("uploaded {pct}% ({}/{} bytes)", progress.sent, progress.total);
            last = Some(pct);
        }
    }
}

fn print_notifications(rx: &mut broadcast::Receiver<Notification>) {
    while let Ok(notification) = rx.try_recv() {
        match &notification {
            Notification::ReauthRequired { login_path } => {
                eprintln!("{} (sign in at {login_path})", notification.message());
            }
            _ => eprintln!("{}", notification.message()),
        }
    }
}

fn print_signed_in(email: Option<&str>) {
    match email {
        Some(email) => println!("signed in as {email}"),
        None => println!("signed in"),
    }
}

fn print_json(value: &Value) -> Result<(), CliError> {
    let rendered = serde_json::to_string_pretty(value)?;
    println!("{rendered}");
    Ok(())
}
