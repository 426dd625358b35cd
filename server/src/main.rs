use clap::Parser;
use log::{error, info, warn};
use server::account_store::{AccountPolicy, AccountStore};
use server::auth::AuthService;
use server::config::Config;
use server::context::ServerContext;
use server::httpd::{self, HttpGate};
use server::network::{run_sync_ingest, SyncReceiver};
use server::persist::{AccountStorage, JsonFileStorage};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::time::{interval, Duration, MissedTickBehavior};

/// Command line arguments
#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    /// Address to bind to
    #[clap(short = 'H', long, default_value = "127.0.0.1")]
    host: String,
    /// HTTP admin port
    #[clap(short, long, default_value = "22005")]
    port: u16,
    /// UDP sync port
    #[clap(short, long, default_value = "22003")]
    sync_port: u16,
    /// Server name shown in the HTTP login realm
    #[clap(long, default_value = "Default Server")]
    server_name: String,
    /// Resource the HTTP root redirects to
    #[clap(long)]
    default_resource: Option<String>,
    /// Accounts file path
    #[clap(long, default_value = "accounts.json")]
    accounts: String,
    /// Verification public key file path
    #[clap(long, default_value = "verify.key")]
    verify_key: String,
    /// Seconds between account saves
    #[clap(long, default_value = "60")]
    save_interval: u64,
    /// HTTP worker thread count
    #[clap(long, default_value = "8")]
    http_threads: usize,
    /// Re-bind returning addresses to their last account
    #[clap(long)]
    auto_login: bool,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args = Args::parse();

    let config = Config {
        server_name: args.server_name.clone(),
        default_resource: args.default_resource.clone(),
        verify_key_path: args.verify_key.clone().into(),
        accounts_path: args.accounts.clone().into(),
        save_interval_secs: args.save_interval,
        http_thread_count: args.http_threads,
        auto_login: args.auto_login,
        ..Config::default()
    };

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(config.http_thread_count)
        .enable_all()
        .build()?;
    runtime.block_on(run(args, config))
}

async fn run(args: Args, config: Config) -> Result<(), Box<dyn std::error::Error>> {
    // Load accounts before anything can observe the store.
    let storage = JsonFileStorage::new(&config.accounts_path);
    let mut store = AccountStore::new(AccountPolicy::default());
    match store.load_from(&storage) {
        Ok(count) => info!("Loaded {} accounts from {}", count, config.accounts_path.display()),
        Err(e) => warn!(
            "Could not load accounts from {}: {}. Starting empty.",
            config.accounts_path.display(),
            e
        ),
    }

    let auth = AuthService::new(store, config.auto_login);
    let context = ServerContext::new(auth).into_shared();

    // HTTP admin gate
    let gate = HttpGate::new(Arc::clone(&context), &config).await;
    let http_addr: SocketAddr = format!("{}:{}", args.host, args.port).parse()?;
    let http_handle = {
        let gate = Arc::clone(&gate);
        tokio::spawn(async move {
            if let Err(e) = httpd::serve(gate, http_addr).await {
                error!("HTTP server failed: {}", e);
            }
        })
    };

    // UDP sync ingest
    let receiver = SyncReceiver::bind(&format!("{}:{}", args.host, args.sync_port)).await?;
    let rx = receiver.spawn_receiver();
    let ingest_handle = tokio::spawn(run_sync_ingest(Arc::clone(&context), rx));

    // Periodic pulse: expire idle HTTP sessions and save dirty accounts.
    // The snapshot is taken under the context lock; the file write happens
    // outside it on the blocking pool.
    let pulse_handle = {
        let context = Arc::clone(&context);
        let gate = Arc::clone(&gate);
        let storage = Arc::new(JsonFileStorage::new(&config.accounts_path));
        let mut timer = interval(Duration::from_secs(config.save_interval_secs.max(1)));
        timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
        tokio::spawn(async move {
            loop {
                timer.tick().await;
                gate.pulse();
                let snapshot = context.lock().await.auth.store_mut().take_save_snapshot();
                let Some(accounts) = snapshot else {
                    continue;
                };
                let storage = Arc::clone(&storage);
                let result =
                    tokio::task::spawn_blocking(move || storage.save_all(&accounts)).await;
                match result {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => {
                        warn!("Failed to save accounts, will retry: {}", e);
                        context.lock().await.auth.store_mut().mark_dirty();
                    }
                    Err(e) => {
                        warn!("Account save task failed, will retry: {}", e);
                        context.lock().await.auth.store_mut().mark_dirty();
                    }
                }
            }
        })
    };

    info!("Server '{}' running", config.server_name);

    tokio::select! {
        result = http_handle => {
            if let Err(e) = result {
                error!("HTTP task panicked: {}", e);
            }
        }
        result = ingest_handle => {
            if let Err(e) = result {
                error!("Sync ingest task panicked: {}", e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down gracefully...");
        }
    }

    pulse_handle.abort();

    // Final save so a clean shutdown never loses account changes.
    let storage = JsonFileStorage::new(&config.accounts_path);
    let mut ctx = context.lock().await;
    if ctx.auth.store().needs_save() && !ctx.auth.store_mut().flush(&storage) {
        error!("Final account save failed; changes may be lost");
    }

    Ok(())
}
