use std::path::PathBuf;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand, ValueEnum};

use tgfs::vfs::telegram::{ProviderConfig, TelegramProvider};
use tgfs::{CacheStore, DataLayout, MockClient, mount_unprivileged};

#[derive(Parser)]
#[command(name = "tgfs", version, about = "Mount a Telegram account as a filesystem")]
struct Cli {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Mount the filesystem via FUSE.
    Mount(MountArgs),
}

#[derive(Args)]
struct MountArgs {
    /// Directory to mount the filesystem.
    #[arg(value_name = "MOUNT_POINT")]
    mount_point: PathBuf,

    /// Client backend. The TDLib-backed client is provided by the embedding
    /// application; the mock backend serves scripted demo data.
    #[arg(long, value_enum, default_value_t = BackendKind::Mock)]
    backend: BackendKind,

    /// Data directory (defaults to $XDG_DATA_HOME/tg-fuse).
    #[arg(long, value_name = "DIR")]
    data_dir: Option<PathBuf>,

    /// Allow other users to access the mount (requires user_allow_other).
    #[arg(long)]
    allow_other: bool,

    /// Disable the background prefetcher.
    #[arg(long)]
    no_prefetch: bool,
}

#[derive(ValueEnum, Clone, Copy)]
enum BackendKind {
    Mock,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(std::env::var("RUST_LOG").unwrap_or_else(|_| "tgfs=info".to_string()))
        .init();

    let cli = Cli::parse();
    match cli.cmd {
        Command::Mount(args) => mount_cmd(args).await?,
    }

    Ok(())
}

async fn mount_cmd(args: MountArgs) -> anyhow::Result<()> {
    if !args.mount_point.exists() {
        std::fs::create_dir_all(&args.mount_point)?;
    }
    if !args.mount_point.is_dir() {
        anyhow::bail!("mount point must be a directory");
    }

    let layout = match &args.data_dir {
        Some(dir) => DataLayout::at(dir),
        None => DataLayout::default_root()
            .ok_or_else(|| anyhow::anyhow!("no data directory available"))?,
    };
    let cache = Arc::new(CacheStore::open(&layout.cache_db()).await?);

    let client = match args.backend {
        BackendKind::Mock => Arc::new(demo_client()),
    };

    let config = ProviderConfig {
        spool_dir: DataLayout::spool_dir(),
        enable_prefetch: !args.no_prefetch,
        ..Default::default()
    };
    let provider = TelegramProvider::new(client, cache, config);
    provider.start().await?;

    let mut handle =
        mount_unprivileged(provider.clone(), &args.mount_point, args.allow_other).await?;
    println!("mounted at {}", args.mount_point.display());

    tokio::select! {
        result = &mut handle => {
            result?;
        }
        _ = tokio::signal::ctrl_c() => {
            println!("unmounting...");
            handle.unmount().await?;
        }
    }

    provider.stop().await;
    Ok(())
}

/// A small scripted account so a mock mount has something to show.
fn demo_client() -> MockClient {
    use tgfs::tg::types::{Chat, ChatKind, Message, User};

    let client = MockClient::new();
    client.add_user(User {
        id: 10,
        username: "alice".into(),
        first_name: "Alice".into(),
        last_name: "Liddell".into(),
        is_contact: true,
        ..Default::default()
    });
    client.add_group(Chat {
        id: 20,
        kind: ChatKind::Group,
        title: "tgfs dev".into(),
        username: String::new(),
        last_message_id: 2,
        last_message_ts: chrono::Utc::now().timestamp() - 120,
        can_send: true,
    });
    client.add_messages(
        20,
        vec![Message {
            id: 2,
            chat_id: 20,
            sender_id: 10,
            ts: chrono::Utc::now().timestamp() - 120,
            text: "welcome to the mock mount".into(),
            media: None,
            outgoing: false,
        }],
    );
    client
}
