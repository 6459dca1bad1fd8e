mod api;
mod bridge;
mod events;
mod jsonrpc;
mod node;
mod nonce;
mod permission;
mod serialization;
mod signer;
#[cfg(test)]
mod testing;

use crate::{
    bridge::RequestBridge,
    events::EventSink,
    node::{method::eth, remote::Remote, types::Network, Node},
    nonce::NonceTracker,
    permission::{
        store::{JsonFileStore, MemoryStore, PermissionStore},
        Notifier, PermissionGate,
    },
    serialization::{Addresses, Str},
    signer::{
        keyring::Keyring,
        ledger::{Ledger, LedgerBridge},
        log_recorder::LogRecorder,
        router::SigningRouter,
        AccountSigner, SignerKind, SigningMethod,
    },
};
use anyhow::{ensure, Context as _, Result};
use reqwest::Url;
use rocket::{fairing::AdHoc, serde::Deserialize};
use std::{path::PathBuf, sync::Arc, time::Duration};

#[derive(Deserialize)]
#[serde(crate = "rocket::serde")]
struct Config {
    /// The BIP-0039 mnemonic phrase for seeding the keyring accounts.
    mnemonic: String,

    /// The password to use with the mnemonic phrase for salting the seed used
    /// for the keyring.
    #[serde(default)]
    password: String,

    /// The number of keyring accounts to derive from the mnemonic seed phrase.
    account_count: u32,

    /// The remote node being proxied.
    remote_node_url: Str<Url>,

    /// The network signing requests target.
    network: Network,

    /// The hardware device, if any.
    #[serde(default)]
    ledger: Option<LedgerConfig>,

    /// Seconds after which unanswered permission prompts are denied.
    #[serde(default)]
    permission_timeout: Option<u64>,

    /// File to persist permission decisions to. Decisions are only kept in
    /// memory without one.
    #[serde(default)]
    permissions_path: Option<PathBuf>,
}

#[derive(Deserialize)]
#[serde(crate = "rocket::serde")]
struct LedgerConfig {
    /// The JSON RPC endpoint of the device bridge.
    bridge_url: Str<Url>,

    device_id: String,

    /// Derivation paths of the device accounts to track.
    #[serde(default)]
    paths: Vec<String>,
}

/// Services shared by the HTTP routes.
struct Services {
    node: Arc<Node>,
    bridge: RequestBridge,
    gate: Arc<PermissionGate>,
    events: EventSink,
}

#[rocket::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let result = rocket::build()
        .attach(AdHoc::config::<Config>())
        .attach(AdHoc::try_on_ignite("signbridge::Node", |rocket| async move {
            let server = match rocket.figment().extract::<rocket::Config>() {
                Ok(server) => server,
                Err(err) => {
                    tracing::error!(%err, "invalid server configuration");
                    return Err(rocket);
                }
            };
            let approval_url = format!(
                "http://{}:{}/permissions/pending",
                server.address, server.port,
            );
            let services = match rocket.state::<Config>() {
                Some(config) => init(config, approval_url).await,
                None => return Err(rocket),
            };
            match services {
                Ok(services) => Ok(rocket
                    .manage(services.node)
                    .manage(services.bridge)
                    .manage(services.gate)
                    .manage(services.events)),
                Err(err) => {
                    tracing::error!(?err, "failed to initialize node");
                    Err(rocket)
                }
            }
        }))
        .mount("/", api::routes())
        .launch()
        .await;

    if let Err(err) = result {
        tracing::error!(%err, "server error");
        std::process::exit(1);
    }
}

async fn init(config: &Config, approval_url: String) -> Result<Services> {
    let events = EventSink::new();

    let remote = Remote::new(config.remote_node_url.0.clone())?;
    let chain_id = remote
        .execute(eth::ChainId, ())
        .await
        .context("failed to query remote node chain ID")?;
    ensure!(
        chain_id.to::<u64>() == config.network.chain_id()?,
        "remote node chain ID {chain_id} does not match {}",
        config.network.name,
    );
    tracing::debug!(url = %remote.url(), %chain_id, "connected to remote node");

    let keyring = Keyring::new(&config.mnemonic, &config.password, config.account_count)?;
    tracing::debug!(accounts = ?Addresses(&keyring.accounts()), "derived keyring accounts");

    let nonces = NonceTracker::new(Remote::new(config.remote_node_url.0.clone())?);
    let mut signing = SigningRouter::new(config.network.clone(), Box::new(nonces), events.clone())
        .with_keyring(Box::new(LogRecorder(keyring)));
    if let Some(ledger) = &config.ledger {
        let transport = LedgerBridge::new(ledger.bridge_url.0.clone())?;
        tracing::debug!(url = %transport.url(), device = %ledger.device_id, "using device bridge");
        signing = signing.with_ledger(Box::new(LogRecorder(Ledger::new(
            transport,
            &ledger.device_id,
        ))));
    }

    let node = Arc::new(Node::new(signing, remote));
    track_accounts(node.signing(), config).await?;

    let store: Box<dyn PermissionStore> = match &config.permissions_path {
        Some(path) => Box::new(JsonFileStore::open(path).await?),
        None => Box::new(MemoryStore::default()),
    };
    let gate = Arc::new(
        PermissionGate::new(store, Box::new(Notifier::new(approval_url)), events.clone())
            .with_timeout(config.permission_timeout.map(Duration::from_secs)),
    );

    Ok(Services {
        bridge: RequestBridge::new(gate.clone(), node.clone()),
        node,
        gate,
        events,
    })
}

/// Tracks the configured keyring and device accounts. Device accounts that
/// cannot be derived, for example because the device is disconnected, are
/// skipped.
async fn track_accounts(signing: &SigningRouter, config: &Config) -> Result<()> {
    for index in 0..config.account_count {
        let signer = AccountSigner {
            kind: SignerKind::Keyring,
            account_id: index.to_string(),
        };
        let address = signing.derive_address(&signer).await?;
        signing.add_tracked_address(address, SigningMethod::Keyring);
    }

    if let Some(ledger) = &config.ledger {
        for path in &ledger.paths {
            let signer = AccountSigner {
                kind: SignerKind::Ledger,
                account_id: path.clone(),
            };
            match signing.derive_address(&signer).await {
                Ok(address) => signing.add_tracked_address(
                    address,
                    SigningMethod::Ledger {
                        device_id: ledger.device_id.clone(),
                        path: path.clone(),
                    },
                ),
                Err(err) => tracing::warn!(%path, %err, "failed to derive device account"),
            }
        }
    }

    tracing::info!(accounts = ?Addresses(&signing.tracked_accounts()), "tracking accounts");
    Ok(())
}
