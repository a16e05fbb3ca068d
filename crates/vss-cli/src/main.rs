//! `vss`: command-line front end for the VSS hosting plan engine.
//!
//! Every command runs against an in-memory store. Without `--state` the store
//! is seeded with the demo dataset on each run; with `--state <file>` it is
//! restored from (and saved back to) a JSON snapshot.

#![allow(clippy::print_stdout, clippy::print_stderr)]

mod config;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use serde_json::{Value, json};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;
use vss_core::asset::{AssetValidator, ZipSiteValidator};
use vss_core::catalog::{PlanPatch, PlanTier};
use vss_core::clock::{Clock, FixedClock, SystemClock, parse_date};
use vss_core::deploy::Upload;
use vss_core::platform::Platform;
use vss_core::request::{NewPlanRequest, RequestType, infer_request_type};
use vss_storage::{MemoryBackend, StorageBackend};

use crate::config::{CliConfig, LogFormat};

// ── ANSI color helpers ───────────────────────────────────────────────

const RESET: &str = "\x1b[0m";
const BOLD: &str = "\x1b[1m";
const DIM: &str = "\x1b[2m";
const RED: &str = "\x1b[31m";

// ── CLI structure ────────────────────────────────────────────────────

/// VSS: static-site hosting plans, quotas and deployments.
#[derive(Parser)]
#[command(
    name = "vss",
    version,
    about = "VSS CLI: manage hosting plans, plan requests, deployments and domains",
    long_about = None,
    after_help = format!(
        "{DIM}Environment variables:{RESET}\n  \
         VSS_TODAY              Pin the clock (YYYY-MM-DD)\n  \
         VSS_STATE              Snapshot file carried between runs\n  \
         VSS_DOMAIN_SUFFIX      Domain suffix (default: vss.io)\n  \
         VSS_SINGLE_DEPLOYMENT  One deployment per user (default: true)\n  \
         VSS_LOG_LEVEL          Log filter when RUST_LOG is unset (default: warn)\n  \
         VSS_LOG_FORMAT         pretty or json\n\n\
         {DIM}Examples:{RESET}\n  \
         vss --today 2026-02-14 users list\n  \
         vss --state vss.json requests create --user u4 --plan medium --months 2\n  \
         vss --state vss.json requests approve <id>\n  \
         vss validate site.zip --render index"
    ),
)]
struct Cli {
    /// Pin the clock to this date (YYYY-MM-DD).
    #[arg(long, global = true)]
    today: Option<NaiveDate>,

    /// JSON snapshot file to load the store from and save it back to.
    #[arg(long, global = true, env = "VSS_STATE")]
    state: Option<PathBuf>,

    /// Suffix for bare subdomain labels.
    #[arg(long, global = true)]
    domain_suffix: Option<String>,

    /// Allow several deployments per user (`deploy` creates instead of replacing).
    #[arg(long, global = true)]
    multi: bool,

    /// Log filter when `RUST_LOG` is unset.
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Plan catalog operations.
    Plans {
        #[command(subcommand)]
        action: PlanCommands,
    },
    /// User accounts.
    Users {
        #[command(subcommand)]
        action: UserCommands,
    },
    /// Deployments and their history.
    Deployments {
        #[command(subcommand)]
        action: DeploymentCommands,
    },
    /// Plan purchase, renewal and upgrade requests.
    Requests {
        #[command(subcommand)]
        action: RequestCommands,
    },
    /// Subscription ledger of a user.
    Ledger {
        /// User id.
        user: String,
    },
    /// Upload a new version of an existing deployment.
    Upload {
        /// Deployment id.
        deployment: String,
        #[command(flatten)]
        upload: UploadArgs,
    },
    /// Replace a user's deployment (single-deployment mode).
    Replace {
        /// User id.
        #[arg(long)]
        user: String,
        /// Subdomain label or full domain.
        #[arg(long)]
        domain: String,
        #[command(flatten)]
        upload: UploadArgs,
    },
    /// Deploy a site, replacing or creating depending on the deployment mode.
    Deploy {
        /// User id.
        #[arg(long)]
        user: String,
        /// Subdomain label or full domain.
        #[arg(long)]
        domain: String,
        #[command(flatten)]
        upload: UploadArgs,
    },
    /// Domain change requests.
    Domains {
        #[command(subcommand)]
        action: DomainCommands,
    },
    /// Bring stored deployment statuses in line with plan rules.
    Reconcile {
        /// Only reconcile this user.
        #[arg(long)]
        user: Option<String>,
    },
    /// Administrative overrides.
    Admin {
        #[command(subcommand)]
        action: AdminCommands,
    },
    /// Activity feed, newest last.
    Activity {
        /// Only entries of this user.
        #[arg(long)]
        user: Option<String>,
    },
    /// Platform-wide counters.
    Stats,
    /// Check a site archive and optionally render one of its pages.
    Validate {
        /// Path to the ZIP archive.
        path: PathBuf,
        /// Page to render (`index` for the archive's index page).
        #[arg(long)]
        render: Option<String>,
    },
}

#[derive(Subcommand)]
enum PlanCommands {
    /// Show every plan definition.
    List,
    /// Change a plan definition. Numbers are clamped to non-negative integers.
    Update {
        /// Tier: basic, medium or full.
        tier: PlanTier,
        /// Enable or disable the tier.
        #[arg(long)]
        enabled: Option<bool>,
        /// Monthly price.
        #[arg(long)]
        price: Option<String>,
        /// Disk quota in MB.
        #[arg(long)]
        max_disk: Option<String>,
        /// Per-upload limit in MB.
        #[arg(long)]
        max_upload: Option<String>,
    },
    /// Restore the built-in definitions.
    Reset,
}

#[derive(Subcommand)]
enum UserCommands {
    /// List users with their derived plan state.
    List,
    /// Show a user with deployments, requests and ledger.
    Show {
        /// User id.
        id: String,
    },
    /// Register a new client on the Basic plan.
    Register {
        #[arg(long)]
        name: String,
        #[arg(long)]
        email: String,
    },
}

#[derive(Subcommand)]
enum DeploymentCommands {
    /// List deployments with their effective status.
    List {
        /// Only deployments of this user.
        #[arg(long)]
        user: Option<String>,
    },
    /// Show a deployment with its versions and traffic.
    Show {
        /// Deployment id.
        id: String,
    },
    /// Version history, newest first.
    Versions {
        /// Deployment id.
        id: String,
    },
    /// Access log, newest first.
    Logs {
        /// Deployment id.
        id: String,
    },
}

#[derive(Subcommand)]
enum RequestCommands {
    /// File a plan request.
    Create {
        /// Requesting user id.
        #[arg(long)]
        user: String,
        /// Requested tier.
        #[arg(long)]
        plan: PlanTier,
        /// Number of months (at least 1).
        #[arg(long)]
        months: u32,
        /// Request type. Inferred from the user's current plan when omitted.
        #[arg(long = "type", value_enum)]
        kind: Option<RequestKind>,
        /// Free-text note for the admin.
        #[arg(long)]
        note: Option<String>,
    },
    /// Approve a pending request.
    Approve {
        /// Request id.
        id: String,
        /// Use this expiry instead of today plus the requested months.
        #[arg(long)]
        expires_at: Option<NaiveDate>,
    },
    /// Reject a pending request.
    Reject {
        /// Request id.
        id: String,
    },
    /// List requests, newest first.
    List {
        /// Only requests of this user.
        #[arg(long)]
        user: Option<String>,
    },
}

#[derive(Subcommand)]
enum DomainCommands {
    /// Ask to move a deployment to another subdomain.
    Request {
        /// Deployment id.
        deployment: String,
        /// Requested subdomain label or full domain.
        subdomain: String,
    },
    /// Approve a pending domain request.
    Approve {
        /// Domain request id.
        id: String,
    },
    /// Reject a pending domain request.
    Reject {
        /// Domain request id.
        id: String,
    },
    /// List domain requests.
    List {
        /// Only pending requests.
        #[arg(long)]
        pending: bool,
    },
}

#[derive(Subcommand)]
enum AdminCommands {
    /// Put a user on a tier (status Active).
    SetPlan {
        /// User id.
        user: String,
        /// Tier: basic, medium or full.
        tier: PlanTier,
        /// New expiry date. The current one is kept when omitted.
        #[arg(long)]
        expires_at: Option<NaiveDate>,
    },
    /// Suspend a user's plan.
    SuspendUser {
        /// User id.
        user: String,
        #[arg(long)]
        reason: Option<String>,
    },
    /// Reactivate a suspended plan.
    ReactivateUser {
        /// User id.
        user: String,
    },
    /// Suspend a single deployment.
    SuspendDeployment {
        /// Deployment id.
        id: String,
    },
    /// Lift a deployment suspension.
    ReactivateDeployment {
        /// Deployment id.
        id: String,
    },
}

#[derive(clap::Args)]
struct UploadArgs {
    /// Name of the uploaded archive.
    #[arg(long)]
    file: String,
    /// Archive size in MB.
    #[arg(long)]
    size_mb: f64,
}

impl UploadArgs {
    fn to_upload(&self) -> Upload {
        Upload::new(self.file.clone(), self.size_mb)
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum RequestKind {
    Purchase,
    Renewal,
    Upgrade,
}

impl From<RequestKind> for RequestType {
    fn from(kind: RequestKind) -> Self {
        match kind {
            RequestKind::Purchase => Self::Purchase,
            RequestKind::Renewal => Self::Renewal,
            RequestKind::Upgrade => Self::Upgrade,
        }
    }
}

// ── Entry point ──────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let mut config = CliConfig::from_env();
    if let Some(level) = &cli.log_level {
        config.log_level.clone_from(level);
    }
    if let Some(suffix) = &cli.domain_suffix {
        config.domain_suffix = suffix.trim().trim_start_matches('.').to_lowercase();
    }
    if cli.multi {
        config.single_deployment = false;
    }

    init_tracing(&config);

    match run(cli, &config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!();
            eprintln!("  {RED}{BOLD}✗ Error:{RESET} {e:#}");
            eprintln!();
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(config: &CliConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    match config.log_format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Pretty => builder.init(),
    }
}

async fn run(cli: Cli, config: &CliConfig) -> Result<()> {
    if let Commands::Validate { path, render } = &cli.command {
        return cmd_validate(path, render.as_deref()).await;
    }

    let clock: Arc<dyn Clock> = match resolve_today(cli.today, config)? {
        Some(date) => Arc::new(FixedClock::on(date)),
        None => Arc::new(SystemClock),
    };

    let session = Session::open(cli.state, clock, config).await?;
    dispatch(&session.platform, cli.command).await?;
    session.save().await
}

fn resolve_today(flag: Option<NaiveDate>, config: &CliConfig) -> Result<Option<NaiveDate>> {
    match (flag, config.today.as_deref()) {
        (Some(date), _) => Ok(Some(date)),
        (None, Some(raw)) => parse_date(raw)
            .map(Some)
            .with_context(|| format!("invalid VSS_TODAY '{raw}' (expected YYYY-MM-DD)")),
        (None, None) => Ok(None),
    }
}

// ── Session state ────────────────────────────────────────────────────

struct Session {
    platform: Platform,
    backend: MemoryBackend,
    state: Option<PathBuf>,
}

impl Session {
    async fn open(
        state: Option<PathBuf>,
        clock: Arc<dyn Clock>,
        config: &CliConfig,
    ) -> Result<Self> {
        let mut restored = None;
        if let Some(path) = &state {
            let exists = tokio::fs::try_exists(path)
                .await
                .with_context(|| format!("failed to access state file {}", path.display()))?;
            if exists {
                restored = Some(load_snapshot(path).await?);
            }
        }
        let seeded = restored.is_none();

        let backend = restored.unwrap_or_default();
        let storage: Arc<dyn StorageBackend> = Arc::new(backend.clone());
        let platform = Platform::new(&storage, clock, config.engine_config());

        if seeded {
            let summary = platform
                .load_demo()
                .await
                .context("failed to load demo dataset")?;
            debug!(users = summary.users, deployments = summary.deployments, "store seeded");
        }

        Ok(Self {
            platform,
            backend,
            state,
        })
    }

    async fn save(&self) -> Result<()> {
        let Some(path) = &self.state else {
            return Ok(());
        };

        let entries: BTreeMap<String, String> = self
            .backend
            .snapshot()
            .await
            .into_iter()
            .map(|(k, v)| (k, String::from_utf8_lossy(&v).into_owned()))
            .collect();
        let body = serde_json::to_vec_pretty(&entries).context("failed to encode state")?;
        tokio::fs::write(path, body)
            .await
            .with_context(|| format!("failed to write state file {}", path.display()))?;

        info!(path = %path.display(), keys = entries.len(), "state saved");
        Ok(())
    }
}

async fn load_snapshot(path: &Path) -> Result<MemoryBackend> {
    let body = tokio::fs::read(path)
        .await
        .with_context(|| format!("failed to read state file {}", path.display()))?;
    let entries: BTreeMap<String, String> = serde_json::from_slice(&body)
        .with_context(|| format!("state file {} is not a valid snapshot", path.display()))?;

    debug!(path = %path.display(), keys = entries.len(), "state restored");

    Ok(MemoryBackend::from_snapshot(
        entries
            .into_iter()
            .map(|(k, v)| (k, v.into_bytes()))
            .collect(),
    ))
}

// ── Command dispatch ─────────────────────────────────────────────────

async fn dispatch(platform: &Platform, cmd: Commands) -> Result<()> {
    match cmd {
        Commands::Plans { action } => cmd_plans(platform, action).await,
        Commands::Users { action } => cmd_users(platform, action).await,
        Commands::Deployments { action } => cmd_deployments(platform, action).await,
        Commands::Requests { action } => cmd_requests(platform, action).await,
        Commands::Ledger { user } => emit(&platform.requests().ledger_for_user(&user).await?),
        Commands::Upload { deployment, upload } => emit(
            &platform
                .deployments()
                .upload_new_version(&deployment, &upload.to_upload())
                .await?,
        ),
        Commands::Replace {
            user,
            domain,
            upload,
        } => emit(
            &platform
                .deployments()
                .replace_single_deployment(&user, &domain, &upload.to_upload(), None)
                .await?,
        ),
        Commands::Deploy {
            user,
            domain,
            upload,
        } => emit(&platform.deploy(&user, &domain, &upload.to_upload()).await?),
        Commands::Domains { action } => cmd_domains(platform, action).await,
        Commands::Reconcile { user } => match user {
            Some(id) => emit(&platform.reconcile_user(&id).await?),
            None => emit(&platform.reconcile_all().await?),
        },
        Commands::Admin { action } => cmd_admin(platform, action).await,
        Commands::Activity { user } => match user {
            Some(id) => emit(&platform.activity().list_for_user(&id).await?),
            None => emit(&platform.activity().list().await?),
        },
        Commands::Stats => emit(&platform.stats().await?),
        Commands::Validate { path, render } => cmd_validate(&path, render.as_deref()).await,
    }
}

async fn cmd_plans(platform: &Platform, action: PlanCommands) -> Result<()> {
    let catalog = platform.catalog();
    match action {
        PlanCommands::List => emit(&catalog.get_all().await?),
        PlanCommands::Update {
            tier,
            enabled,
            price,
            max_disk,
            max_upload,
        } => {
            let patch = PlanPatch::from_text(
                enabled,
                price.as_deref(),
                max_disk.as_deref(),
                max_upload.as_deref(),
            );
            emit(&catalog.update(tier, &patch).await?)
        }
        PlanCommands::Reset => {
            catalog.reset_to_defaults().await?;
            emit(&catalog.get_all().await?)
        }
    }
}

async fn cmd_users(platform: &Platform, action: UserCommands) -> Result<()> {
    match action {
        UserCommands::List => emit(&platform.user_views().await?),
        UserCommands::Show { id } => {
            let user = platform.user_view(&id).await?;
            let deployments = platform.deployment_views(Some(id.as_str())).await?;
            let requests = platform.requests().list_for_user(&id).await?;
            let ledger = platform.requests().ledger_for_user(&id).await?;
            print_json(&json!({
                "user": user,
                "deployments": deployments,
                "requests": requests,
                "ledger": ledger,
            }));
            Ok(())
        }
        UserCommands::Register { name, email } => emit(
            &platform
                .users()
                .register(&name, &email, platform.today())
                .await?,
        ),
    }
}

async fn cmd_deployments(platform: &Platform, action: DeploymentCommands) -> Result<()> {
    let service = platform.deployments();
    match action {
        DeploymentCommands::List { user } => {
            emit(&platform.deployment_views(user.as_deref()).await?)
        }
        DeploymentCommands::Show { id } => {
            let deployment = platform.deployment_view(&id).await?;
            let versions = service.versions(&id).await?;
            let traffic = service.traffic(&id).await?;
            print_json(&json!({
                "deployment": deployment,
                "versions": versions,
                "traffic": traffic,
            }));
            Ok(())
        }
        DeploymentCommands::Versions { id } => emit(&service.versions(&id).await?),
        DeploymentCommands::Logs { id } => emit(&service.access_logs(&id).await?),
    }
}

async fn cmd_requests(platform: &Platform, action: RequestCommands) -> Result<()> {
    let workflow = platform.requests();
    match action {
        RequestCommands::Create {
            user,
            plan,
            months,
            kind,
            note,
        } => {
            let request_type = match kind {
                Some(kind) => kind.into(),
                // An unknown user falls through to `create`, which reports it.
                None => match platform.user_view(&user).await {
                    Ok(view) => infer_request_type(view.effective_plan, plan),
                    Err(_) => RequestType::Purchase,
                },
            };
            let request = workflow
                .create(NewPlanRequest {
                    user_id: user,
                    request_type,
                    requested_plan: plan,
                    months,
                    note,
                })
                .await?;
            emit(&request)
        }
        RequestCommands::Approve { id, expires_at } => {
            emit(&workflow.approve(&id, expires_at).await?)
        }
        RequestCommands::Reject { id } => emit(&workflow.reject(&id).await?),
        RequestCommands::List { user } => match user {
            Some(id) => emit(&workflow.list_for_user(&id).await?),
            None => emit(&workflow.list().await?),
        },
    }
}

async fn cmd_domains(platform: &Platform, action: DomainCommands) -> Result<()> {
    let service = platform.deployments();
    match action {
        DomainCommands::Request {
            deployment,
            subdomain,
        } => emit(
            &service
                .create_domain_request(&deployment, &subdomain)
                .await?,
        ),
        DomainCommands::Approve { id } => emit(&service.approve_domain_request(&id).await?),
        DomainCommands::Reject { id } => emit(&service.reject_domain_request(&id).await?),
        DomainCommands::List { pending } => emit(&service.domain_requests(pending).await?),
    }
}

async fn cmd_admin(platform: &Platform, action: AdminCommands) -> Result<()> {
    let admin = platform.admin();
    match action {
        AdminCommands::SetPlan {
            user,
            tier,
            expires_at,
        } => emit(&admin.set_plan(&user, tier, expires_at).await?),
        AdminCommands::SuspendUser { user, reason } => {
            emit(&admin.suspend_user(&user, reason.as_deref()).await?)
        }
        AdminCommands::ReactivateUser { user } => emit(&admin.reactivate_user(&user).await?),
        AdminCommands::SuspendDeployment { id } => {
            emit(&platform.admin_suspend_deployment(&id).await?)
        }
        AdminCommands::ReactivateDeployment { id } => {
            emit(&platform.admin_reactivate_deployment(&id).await?)
        }
    }
}

async fn cmd_validate(path: &Path, render: Option<&str>) -> Result<()> {
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("failed to read archive {}", path.display()))?;
    let validator = ZipSiteValidator;

    let Some(page) = render else {
        let manifest = validator
            .validate(&bytes)
            .await
            .with_context(|| format!("{} is not a deployable site", path.display()))?;
        return emit(&manifest);
    };

    let mut session = validator
        .open_preview_session(&bytes)
        .await
        .with_context(|| format!("{} is not a deployable site", path.display()))?;
    let page = if page == "index" {
        session.index_path().to_owned()
    } else {
        page.to_owned()
    };
    let html = session.render(&page)?.to_owned();
    print_json(&json!({
        "index_path": session.index_path(),
        "pages": session.pages(),
        "page": page,
        "html": html,
    }));
    session.release_resources();
    Ok(())
}

// ── Output ───────────────────────────────────────────────────────────

fn emit<T: Serialize>(value: &T) -> Result<()> {
    let value = serde_json::to_value(value).context("failed to encode output")?;
    print_json(&value);
    Ok(())
}

fn print_json(value: &Value) {
    if value.is_null() {
        return;
    }
    match serde_json::to_string_pretty(value) {
        Ok(s) => println!("{s}"),
        Err(e) => eprintln!("failed to format JSON: {e}"),
    }
}
