use std::sync::{Arc, LazyLock};

use bulkmail_common::{
    Signal, Tier,
    audit::{self, AuditConfig},
    internal, logging,
};
use bulkmail_dispatch::{DispatchConfig, Dispatcher, TransportConfig};
use bulkmail_queue::StoreConfig;
use serde::Deserialize;
use tokio::sync::broadcast;

/// Top level configuration
///
/// ```ron
/// Bulkmail (
///     store: File(path: "/var/lib/bulkmail"),
///     transport: Smtp((host: "smtp.example.com", from: "news@example.com")),
///     tier: Starter,
///     dispatch: (dispatch_interval_secs: 60),
///     audit: (redact_recipients: true),
/// )
/// ```
#[derive(Debug, Default, Deserialize)]
pub struct Bulkmail {
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub transport: TransportConfig,
    #[serde(default)]
    pub dispatch: DispatchConfig,
    #[serde(default)]
    pub tier: Tier,
    #[serde(default)]
    pub audit: AuditConfig,
}

/// Process-wide signal fan-out: shutdown and "Send Now" requests
pub static SIGNALS: LazyLock<broadcast::Sender<Signal>> = LazyLock::new(|| {
    let (sender, _receiver) = broadcast::channel(64);
    sender
});

#[tracing::instrument(level = "trace")]
async fn shutdown() -> anyhow::Result<()> {
    let mut terminate = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            internal!(level = INFO, "CTRL+C entered -- Enter it again to force shutdown");
        }
        _ = terminate.recv() => {
            internal!(level = INFO, "Terminate Signal received, shutting down");
        }
    };

    SIGNALS
        .send(Signal::Shutdown)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Interrupted, e.to_string()))?;

    // The dispatcher finishes its current cycle and returns; a second CTRL+C
    // abandons it. Claimed jobs are reclaimed on the next start.
    tokio::signal::ctrl_c().await?;
    tracing::warn!("Forced shutdown");

    Ok(())
}

/// `SIGUSR1` asks for an immediate dispatch cycle
#[tracing::instrument(level = "trace")]
async fn send_now() -> anyhow::Result<()> {
    let mut user =
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::user_defined1())?;

    while user.recv().await.is_some() {
        if SIGNALS.send(Signal::SendNow).is_err() {
            tracing::warn!("Send Now requested, but the dispatcher is not running");
        }
    }

    Ok(())
}

impl Bulkmail {
    /// Open the stores, build the transport and assemble a [`Dispatcher`]
    ///
    /// # Errors
    /// Returns an error if the dispatch settings are unsafe, the store cannot
    /// be opened or the transport is misconfigured
    pub fn dispatcher(self) -> anyhow::Result<Dispatcher> {
        self.dispatch.validate()?;
        let stores = self.store.open()?;
        let transport = self.transport.into_transport()?;
        Ok(Dispatcher::new(
            self.dispatch,
            stores,
            transport,
            Arc::new(self.tier),
        ))
    }

    /// Run the dispatcher until shutdown
    ///
    /// # Errors
    ///
    /// This function will return an error if the store or transport fail to
    /// initialise, or a signal handler cannot be installed.
    #[tracing::instrument(level = "trace", skip_all, err)]
    pub async fn run(self) -> anyhow::Result<()> {
        logging::init();
        audit::init(self.audit.clone());

        if let Some(path) = self.store.path() {
            internal!(level = INFO, "Using store at {}", path.display());
        }

        let dispatcher = self.dispatcher()?;

        internal!("Controller running");

        let ret = tokio::select! {
            r = dispatcher.serve(SIGNALS.subscribe()) => r.map_err(anyhow::Error::from),
            r = shutdown() => r,
            r = send_now() => r,
        };

        internal!(level = INFO, "Shutting down...");

        ret
    }
}
