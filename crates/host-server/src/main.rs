//! The `storage-host` daemon: wires the negotiation engine, consensus
//! listener and action scheduler to a bundled placeholder chain backend and
//! runs them until `ctrl_c`.

use std::sync::Arc;

use clap::Parser;
use storage_host_chain::mock::MockChain;
use storage_host_core::consensus_listener::{self, ConsensusListenerError};
use storage_host_core::context::HostState;
use storage_host_core::db::{DBError, ObligationDB};
use storage_host_core::obligation::StorageFolder;
use storage_host_core::scheduler::{self, SchedulerError};
use storage_host_core::sector_store::SectorStore;
use storage_host_server::negotiation::run_negotiation_server;
use storage_host_server::settings::{load_or_init, ConfigurationError, ServerArguments, ServerConfiguration, SettingsError};
use tokio::sync::mpsc;
use tokio::task::JoinError;
use tokio_util::sync::CancellationToken;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
    #[error(transparent)]
    Settings(#[from] SettingsError),
    #[error(transparent)]
    Db(#[from] DBError),
    #[error(transparent)]
    ConsensusListener(#[from] ConsensusListenerError),
    #[error(transparent)]
    Scheduler(#[from] SchedulerError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Join(#[from] JoinError),
    #[error("FromEnv error: {0}")]
    EnvFilter(#[from] tracing_subscriber::filter::FromEnvError),
}

fn main() -> Result<(), ServerError> {
    let configuration: ServerConfiguration = ServerArguments::parse().try_into()?;

    let log_path = configuration.persist_dir.join("host.log");
    let file_appender = tracing_appender::rolling::never(
        log_path.parent().expect("persist_dir is always non-empty"),
        log_path
            .file_name()
            .expect("host.log always has a file name"),
    );
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(fmt::layer().with_writer(non_blocking).with_ansi(false))
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .from_env()?,
        )
        .init();

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .expect("failed to build the runtime")
        .block_on(configuration.run())?;

    Ok(())
}

struct SetupOutput {
    state: Arc<HostState>,
    settings: Arc<storage_host_server::settings::HostInternalSettings>,
}

impl ServerConfiguration {
    async fn setup(&self) -> Result<SetupOutput, ServerError> {
        let (settings, _financial, identity) = load_or_init(&self.persist_dir)?;
        tracing::info!(public_key = %hex::encode(identity.public_key()), "host identity loaded");

        let db = Arc::new(ObligationDB::open(self.persist_dir.join("host.db"))?);

        let folder_path = self.persist_dir.join("folder0");
        std::fs::create_dir_all(&folder_path)?;
        let folder = StorageFolder::new(folder_path, self.storage_folder_size);
        let sector_store = Arc::new(SectorStore::new(db.clone(), vec![folder]));

        // `MockChain` stands in for the external consensus set, transaction
        // pool and wallet collaborators until a real chain client is wired
        // in their place.
        let chain = Arc::new(MockChain::new(self.starting_height));

        let state = Arc::new(HostState::new(
            db,
            sector_store,
            chain.clone(),
            chain.clone(),
            chain,
            identity,
            self.starting_height,
        ));

        Ok(SetupOutput {
            state,
            settings: Arc::new(settings),
        })
    }

    pub async fn run(self) -> Result<(), ServerError> {
        let SetupOutput { state, settings } = self.setup().await?;

        scheduler::recover_on_startup(state.clone()).await?;

        let cancellation_token = CancellationToken::new();
        let (ready_height_tx, ready_height_rx) = mpsc::unbounded_channel();

        let consensus_task = tokio::spawn(consensus_listener::start_consensus_listener(
            state.consensus.clone(),
            state.clone(),
            ready_height_tx,
            cancellation_token.child_token(),
        ));
        let scheduler_task = tokio::spawn(scheduler::start_scheduler(
            state.clone(),
            ready_height_rx,
            cancellation_token.child_token(),
        ));
        let negotiation_task = tokio::spawn(run_negotiation_server(
            self.listen_address,
            state.clone(),
            settings,
            cancellation_token.child_token(),
        ));

        tokio::signal::ctrl_c()
            .await
            .expect("failed to listen for the shutdown signal");
        tracing::info!("shutdown signal received, stopping");

        cancellation_token.cancel();

        let (consensus_result, scheduler_result, negotiation_result) =
            tokio::join!(consensus_task, scheduler_task, negotiation_task);

        let consensus_result = consensus_result
            .inspect_err(|err| tracing::error!(%err))
            .inspect(|ok| {
                let _ = ok.as_ref().inspect_err(|err| tracing::error!(%err));
            });
        let scheduler_result = scheduler_result
            .inspect_err(|err| tracing::error!(%err))
            .inspect(|ok| {
                let _ = ok.as_ref().inspect_err(|err| tracing::error!(%err));
            });
        let negotiation_result = negotiation_result
            .inspect_err(|err| tracing::error!(%err))
            .inspect(|ok| {
                let _ = ok.as_ref().inspect_err(|err| tracing::error!(%err));
            });

        consensus_result??;
        scheduler_result??;
        negotiation_result??;

        Ok(())
    }
}
