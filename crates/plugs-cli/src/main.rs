use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::{error, info, warn};

use plugs_core::app::{AppBuilder, BuildError, PlugService, Submission, Upload};
use plugs_core::config::PlugsConfig;
use plugs_core::domain::{AssetRef, Backend, NewPlug, PlugError, PlugId, Result, UserId};
use plugs_core::impls::{InMemoryDatabase, InMemoryDirectory, InMemoryObjectStore};
use plugs_core::observability::init_tracing;
use plugs_core::ports::{Connector, CreditDirectory, ObjectStore, PlugStore};

const DEMO_VIEWS: usize = 6;
const HOUSE_ASSET: &str = "house/drink-default.png";

/// Plug rotation: serve, submit and moderate sponsored images.
#[derive(Parser)]
#[command(name = "plugs", version, about)]
struct Cli {
    /// Configuration file (default: plugs.toml in the working directory)
    #[arg(short, long, global = true, env = "PLUGS_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Walk through submit, review, approve, serve, delete and counts (default)
    Demo,

    /// Pick the next plug(s) and print presigned URLs
    Serve {
        /// Page the plug is shown on, recorded in the traffic log
        #[arg(default_value = "")]
        referer: String,

        /// Number of selections
        #[arg(short = 'n', long, default_value_t = 1)]
        count: usize,

        /// Signed-in viewer, if any
        #[arg(long)]
        viewer: Option<String>,
    },

    /// Upload an image and pay for its views
    Submit {
        owner: String,
        file: PathBuf,
        credits: i64,

        /// MIME type (guessed from the extension when omitted)
        #[arg(long)]
        content_type: Option<String>,
    },

    /// List sponsored plugs with preview URLs (admin)
    Pending { actor: String },

    /// Replace the approved set with exactly these ids (admin)
    Approve { actor: String, ids: Vec<i32> },

    /// Delete a plug and its image (admin)
    Delete { actor: String, id: i32 },

    /// Catalog counts
    Counts,
}

/// Print one JSON line per event.
fn emit<T: Serialize>(label: &str, value: &T) {
    match serde_json::to_string(value) {
        Ok(json) => println!("{label}: {json}"),
        Err(e) => warn!(label, error = %e, "could not encode event"),
    }
}

#[cfg(not(all(feature = "postgres", feature = "ldap", feature = "s3")))]
fn requires_feature(setting: &str, feature: &str) -> PlugError {
    PlugError::Config(format!(
        "backends.{setting} is set but plugs was built without the `{feature}` feature"
    ))
}

/// Connectors for the three backends.
///
/// A backend without a configured endpoint gets a seeded in-memory stand-in.
struct Backends {
    database: Box<dyn Connector<dyn PlugStore>>,
    directory: Box<dyn Connector<dyn CreditDirectory>>,
    objects: Box<dyn Connector<dyn ObjectStore>>,
}

impl Backends {
    async fn from_config(config: &PlugsConfig) -> Result<Self> {
        Ok(Self {
            database: database(config)?,
            directory: directory(config)?,
            objects: object_store(config).await?,
        })
    }
}

fn database(config: &PlugsConfig) -> Result<Box<dyn Connector<dyn PlugStore>>> {
    let b = &config.backends;
    if b.database_uri.is_empty() {
        info!(backend = %Backend::Relational, "no database_uri, using in-memory store");
        let db = InMemoryDatabase::new();
        // house plug: 無制限、最初から承認済み
        db.seed(NewPlug::house(AssetRef::new(HOUSE_ASSET), UserId::new("drink")), true);
        return Ok(Box::new(db));
    }
    #[cfg(feature = "postgres")]
    {
        use plugs_core::impls::PgConnector;
        Ok(Box::new(
            PgConnector::new(b.database_uri.clone()).max_connections(b.database_max_connections),
        ))
    }
    #[cfg(not(feature = "postgres"))]
    {
        Err(requires_feature("database_uri", "postgres"))
    }
}

fn directory(config: &PlugsConfig) -> Result<Box<dyn Connector<dyn CreditDirectory>>> {
    let b = &config.backends;
    if b.directory_host.is_empty() {
        info!(backend = %Backend::Directory, "no directory_host, using in-memory directory");
        let directory = InMemoryDirectory::new();
        directory.add_user("alice", 3, &[]);
        directory.add_user("root", 0, &["rtp"]);
        return Ok(Box::new(directory));
    }
    #[cfg(feature = "ldap")]
    {
        use plugs_core::impls::{DirectoryLayout, LdapConnector};
        let layout = DirectoryLayout {
            users_base: b.directory_users_base.clone(),
            groups_base: b.directory_groups_base.clone(),
            balance_attribute: b.directory_balance_attribute.clone(),
        };
        Ok(Box::new(LdapConnector::new(
            &b.directory_host,
            b.directory_bind_dn.clone(),
            b.directory_bind_password.clone(),
            layout,
        )))
    }
    #[cfg(not(feature = "ldap"))]
    {
        Err(requires_feature("directory_host", "ldap"))
    }
}

async fn object_store(config: &PlugsConfig) -> Result<Box<dyn Connector<dyn ObjectStore>>> {
    let b = &config.backends;
    if b.object_store_host.is_empty() {
        info!(backend = %Backend::ObjectStore, "no object_store_host, using in-memory store");
        let secret = match b.object_store_secret_key.as_str() {
            "" => "dev-secret",
            key => key,
        };
        let objects = InMemoryObjectStore::new(config.assets.public_base_url.clone(), secret);
        let store = <InMemoryObjectStore as Connector<dyn ObjectStore>>::connect(&objects)
            .await
            .map_err(PlugError::backend(Backend::ObjectStore))?;
        store
            .put(&config.assets.bucket, HOUSE_ASSET, b"\x89PNG".to_vec(), "image/png")
            .await
            .map_err(PlugError::backend(Backend::ObjectStore))?;
        return Ok(Box::new(objects));
    }
    #[cfg(feature = "s3")]
    {
        use plugs_core::impls::S3Connector;
        Ok(Box::new(S3Connector::new(
            &b.object_store_host,
            b.object_store_region.clone(),
            b.object_store_access_id.clone(),
            b.object_store_secret_key.clone(),
            config.assets.bucket.clone(),
        )))
    }
    #[cfg(not(feature = "s3"))]
    {
        Err(requires_feature("object_store_host", "s3"))
    }
}

async fn build(config: PlugsConfig) -> Result<PlugService> {
    let backends = Backends::from_config(&config).await?;
    AppBuilder::new(config)
        .database(backends.database)
        .directory(backends.directory)
        .object_store(backends.objects)
        .build()
        .await
        .map_err(|e| match e {
            BuildError::InvalidConfig(cause) | BuildError::Connect(cause) => cause,
            other => PlugError::Config(other.to_string()),
        })
}

fn guess_content_type(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);
    match ext.as_deref() {
        Some("png") => "image/png",
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        _ => "application/octet-stream",
    }
}

async fn demo(service: &PlugService) -> Result<()> {
    // (B) alice が 2 クレジットで sponsored plug を申し込む
    let alice = UserId::new("alice");
    let submission = service
        .submit(Upload {
            owner: alice.clone(),
            filename: "csh-social.png".into(),
            bytes: b"\x89PNG\r\n".to_vec(),
            content_type: "image/png".into(),
            credits: 2,
        })
        .await?;
    emit("submit", &submission);
    let Submission::Accepted { plug, .. } = submission else {
        warn!(user = %alice, "submission refused");
        return Ok(());
    };
    info!(balance = service.ledger().balance(&alice).await?, "alice after submit");

    // (C) 管理者が審査して承認する
    let root = UserId::new("root");
    let review = service.pending_review(&root).await?;
    emit("pending", &review);
    let mut approved: Vec<_> = service
        .repository()
        .fetch_approved()
        .await?
        .into_iter()
        .map(|p| p.id)
        .collect();
    approved.push(plug.id);
    service.set_approval_list(&root, &approved).await?;

    // (D) ページの表示をまねて何回か配信する
    for n in 0..DEMO_VIEWS {
        let served = service
            .serve_next(None, &format!("https://members.example/page/{n}"))
            .await?;
        emit("serve", &served);
    }

    // (E) 管理者が取り下げる
    service.delete_plug(&root, plug.id).await?;
    emit("delete", &plug.id);

    // (F) 集計
    emit("counts", &service.counts().await?);
    Ok(())
}

async fn run(config: PlugsConfig, command: Commands) -> Result<()> {
    // (A) バックエンドを用意して、サービスを組み立てる
    let service = build(config).await?;

    match command {
        Commands::Demo => demo(&service).await,
        Commands::Serve {
            referer,
            count,
            viewer,
        } => {
            let viewer = viewer.map(UserId::new);
            for _ in 0..count {
                emit("serve", &service.serve_next(viewer.as_ref(), &referer).await?);
            }
            Ok(())
        }
        Commands::Submit {
            owner,
            file,
            credits,
            content_type,
        } => {
            let bytes = tokio::fs::read(&file)
                .await
                .map_err(|e| PlugError::InvalidUpload(format!("{}: {e}", file.display())))?;
            let filename = file
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_default();
            let content_type =
                content_type.unwrap_or_else(|| guess_content_type(&file).to_string());
            let submission = service
                .submit(Upload {
                    owner: UserId::new(owner),
                    filename,
                    bytes,
                    content_type,
                    credits,
                })
                .await?;
            emit("submit", &submission);
            Ok(())
        }
        Commands::Pending { actor } => {
            emit("pending", &service.pending_review(&UserId::new(actor)).await?);
            Ok(())
        }
        Commands::Approve { actor, ids } => {
            let ids: Vec<PlugId> = ids.into_iter().map(PlugId::new).collect();
            service.set_approval_list(&UserId::new(actor), &ids).await?;
            emit("approve", &ids);
            Ok(())
        }
        Commands::Delete { actor, id } => {
            let id = PlugId::new(id);
            service.delete_plug(&UserId::new(actor), id).await?;
            emit("delete", &id);
            Ok(())
        }
        Commands::Counts => {
            emit("counts", &service.counts().await?);
            Ok(())
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let config = match PlugsConfig::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            init_tracing("info");
            error!(error = %e, "configuration rejected");
            return ExitCode::FAILURE;
        }
    };
    init_tracing(&config.log_filter);

    match run(config, cli.command.unwrap_or(Commands::Demo)).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) if e.is_fatal() => {
            error!(error = %e, "backend unreachable, shutting down");
            ExitCode::FAILURE
        }
        Err(e) => {
            error!(error = %e, kind = ?e.kind(), "command failed");
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn no_subcommand_means_demo() {
        let cli = Cli::try_parse_from(["plugs"]).unwrap();
        assert!(cli.command.is_none());
    }

    #[test]
    fn approve_takes_a_list_of_ids() {
        let cli = Cli::try_parse_from(["plugs", "approve", "root", "3", "7"]).unwrap();
        let Some(Commands::Approve { actor, ids }) = cli.command else {
            panic!("expected approve");
        };
        assert_eq!(actor, "root");
        assert_eq!(ids, vec![3, 7]);
    }

    #[test]
    fn submit_requires_credits() {
        assert!(Cli::try_parse_from(["plugs", "submit", "alice", "ad.png"]).is_err());
    }

    #[test]
    fn content_type_is_guessed_from_extension() {
        assert_eq!(guess_content_type(Path::new("a.PNG")), "image/png");
        assert_eq!(guess_content_type(Path::new("a.jpeg")), "image/jpeg");
        assert_eq!(guess_content_type(Path::new("a")), "application/octet-stream");
    }

    #[tokio::test]
    async fn demo_runs_against_in_memory_backends() {
        let service = build(PlugsConfig::default()).await.unwrap();
        demo(&service).await.unwrap();
        let counts = service.counts().await.unwrap();
        assert_eq!((counts.house, counts.sponsored), (1, 0));
    }
}
