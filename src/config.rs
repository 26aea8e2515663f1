use std::sync::Arc;
use std::time::Duration;

use mongodb::Client as MongoClient;
use rocket::{
    fairing::{Fairing, Info, Kind},
    Build, Orbit, Rocket,
};
use serde::Deserialize;

use crate::commitment::IdentityHasher;
use crate::coordinator::{Coordinator, RetryPolicy, Sweeper};
use crate::ledger::{
    LedgerClient, LedgerSettings, LedgerTransport, MemoryLedger, RpcTransport, SigningIdentity,
};
use crate::model::mongodb::{ensure_indexes_exist, Id};
use crate::store::{MemoryStore, MongoStore, VoteStore};

/// URI scheme selecting the in-process store or ledger.
const MEMORY_URI: &str = "memory://";

/// Application configuration, derived from `Rocket.toml` and `ROCKET_*`
/// environment variables. This struct becomes managed state and can be
/// inspected by any endpoint.
#[derive(Deserialize)]
pub struct Config {
    // non-secrets
    #[serde(default)]
    admin_ids: Vec<String>,
    vote_max_attempts: u32,
    vote_backoff_base_ms: u64,
    vote_backoff_cap_ms: u64,
    local_apply_max_attempts: u32,
    intent_lease_secs: u64,
    sweep_interval_secs: u64,
    abandon_after_secs: u64,
    // secrets
    jwt_secret: String,
    commitment_secret: String,
}

impl Config {
    /// Voters who are always treated as admins, whatever their token says.
    pub fn is_admin(&self, id: Id) -> bool {
        let id = id.to_string();
        self.admin_ids.iter().any(|admin| admin.eq_ignore_ascii_case(&id))
    }

    /// Secret key used to verify JWTs.
    pub fn jwt_secret(&self) -> &[u8] {
        self.jwt_secret.as_bytes()
    }

    /// Secret key of the identity hasher.
    pub fn commitment_secret(&self) -> &[u8] {
        self.commitment_secret.as_bytes()
    }

    /// Retry and lease policy of the vote saga.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.vote_max_attempts.max(1),
            backoff_base: Duration::from_millis(self.vote_backoff_base_ms),
            backoff_cap: Duration::from_millis(self.vote_backoff_cap_ms),
            local_apply_attempts: self.local_apply_max_attempts.max(1),
            intent_lease: Duration::from_secs(self.intent_lease_secs),
            abandon_after: Duration::from_secs(self.abandon_after_secs),
        }
    }

    /// Period of the background reconciliation sweep. Zero disables it.
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

/// A fairing that loads the application config and puts it in managed state.
/// This could easily be achieved using `AdHoc::config`, but is written out
/// explicitly for symmetry with the other fairings and control over error
/// messages.
pub struct ConfigFairing;

#[rocket::async_trait]
impl Fairing for ConfigFairing {
    fn info(&self) -> Info {
        Info {
            name: "Config",
            kind: Kind::Ignite,
        }
    }

    async fn on_ignite(&self, mut rocket: Rocket<Build>) -> rocket::fairing::Result {
        let config = match rocket.figment().extract::<Config>() {
            Ok(config) => config,
            Err(e) => {
                error!("Failed to load application config");
                rocket::config::pretty_print_error(e);
                return Err(rocket);
            }
        };
        if config.admin_ids.is_empty() {
            warn!("No admin IDs configured; only tokens carrying the admin flag are admins");
        }
        if let Ok(ledger) = rocket.figment().extract::<LedgerConfig>() {
            let policy = config.retry_policy();
            if let Some(worst_case) = lease_shortfall(&policy, &ledger) {
                warn!(
                    "intent_lease_secs ({}s) is shorter than the longest a vote can take \
                     ({}s); the sweeper may take over votes that are still running",
                    policy.intent_lease.as_secs(),
                    worst_case.as_secs_f64().ceil()
                );
            }
        }

        rocket = rocket.manage(config);
        Ok(rocket)
    }
}

/// Configuration for the database.
#[derive(Deserialize)]
struct DbConfig {
    // secrets
    db_uri: String,
}

/// A fairing that connects to the local store, performs any setup
/// necessary, and places an `Arc<dyn VoteStore>` into managed state.
///
/// A `db_uri` of `memory://` selects a non-persistent in-process store.
#[derive(Default)]
pub struct DatabaseFairing {
    store: Option<Arc<dyn VoteStore>>,
}

impl DatabaseFairing {
    /// Use the given store instead of connecting to one.
    pub fn with_store(store: Arc<dyn VoteStore>) -> Self {
        Self { store: Some(store) }
    }
}

#[rocket::async_trait]
impl Fairing for DatabaseFairing {
    fn info(&self) -> Info {
        Info {
            name: "Vote store",
            kind: Kind::Ignite,
        }
    }

    async fn on_ignite(&self, rocket: Rocket<Build>) -> rocket::fairing::Result {
        if let Some(store) = &self.store {
            return Ok(rocket.manage(store.clone()));
        }

        let config = match rocket.figment().extract::<DbConfig>() {
            Ok(config) => config,
            Err(e) => {
                error!("Failed to load database config");
                rocket::config::pretty_print_error(e);
                return Err(rocket);
            }
        };

        if config.db_uri.starts_with(MEMORY_URI) {
            warn!("Using the in-memory vote store; nothing will be persisted");
            let store: Arc<dyn VoteStore> = Arc::new(MemoryStore::new());
            return Ok(rocket.manage(store));
        }

        info!("Loaded database config, connecting...");
        let client = match MongoClient::with_uri_str(&config.db_uri).await {
            Ok(client) => client,
            Err(e) => {
                error!("Failed to connect to database: {e}");
                return Err(rocket);
            }
        };
        let db = client.database(&get_database_name());

        if let Err(e) = ensure_indexes_exist(&db).await {
            error!("Failed to set up database indexes: {e}");
            return Err(rocket);
        }
        info!("...database connection online!");

        let store: Arc<dyn VoteStore> = Arc::new(MongoStore::new(client, &db));
        Ok(rocket.manage(store))
    }
}

/// Get the name of the database to use (production version).
#[cfg(not(test))]
pub(crate) fn get_database_name() -> String {
    "ballot_ledger".to_string()
}

/// Get the name of the database to use (test version).
/// Use a random name to avoid collisions between tests.
#[cfg(test)]
pub(crate) fn get_database_name() -> String {
    let random: u32 = rand::random();
    let db = format!("test{random}");
    info!("Using database {db}");
    db
}

/// Configuration for the ledger connection.
#[derive(Deserialize)]
struct LedgerConfig {
    // non-secrets
    ledger_url: String,
    ledger_request_timeout_ms: u64,
    ledger_confirm_timeout_ms: u64,
    ledger_poll_interval_ms: u64,
    ledger_reconcile_timeout_ms: u64,
    // secrets
    ledger_signing_key: String,
}

impl LedgerConfig {
    fn settings(&self) -> LedgerSettings {
        LedgerSettings {
            confirm_timeout: Duration::from_millis(self.ledger_confirm_timeout_ms),
            poll_interval: Duration::from_millis(self.ledger_poll_interval_ms.max(1)),
            reconcile_timeout: Duration::from_millis(self.ledger_reconcile_timeout_ms),
        }
    }
}

impl LedgerConfig {
    /// The longest one vote can hold its intent: a resumed vote reconciles,
    /// submits with every retry (each attempt fetching the nonce then sending),
    /// waits for confirmation and reconciles again. A polling loop can overrun
    /// its deadline by one request.
    fn worst_case_vote(&self, policy: &RetryPolicy) -> Duration {
        let request = Duration::from_millis(self.ledger_request_timeout_ms);
        let settings = self.settings();
        let backoff: Duration = (1..policy.max_attempts)
            .map(|attempt| policy.backoff(attempt))
            .sum();
        let reconcile = settings.reconcile_timeout + request;
        reconcile * 2
            + request * 2 * policy.max_attempts
            + backoff
            + settings.confirm_timeout
            + request
    }
}

/// The worst-case vote duration, if the intent lease does not cover it.
fn lease_shortfall(policy: &RetryPolicy, ledger: &LedgerConfig) -> Option<Duration> {
    let worst_case = ledger.worst_case_vote(policy);
    (worst_case > policy.intent_lease).then_some(worst_case)
}

/// A fairing that loads the signing key, connects to the ledger and places an
/// `Arc<LedgerClient>` into managed state.
///
/// A `ledger_url` of `memory://` selects an in-process ledger that funds the
/// signing account generously; for development only.
#[derive(Default)]
pub struct LedgerFairing {
    transport: Option<Arc<dyn LedgerTransport>>,
}

impl LedgerFairing {
    /// Use the given transport instead of connecting to `ledger_url`.
    pub fn with_transport(transport: Arc<dyn LedgerTransport>) -> Self {
        Self {
            transport: Some(transport),
        }
    }
}

#[rocket::async_trait]
impl Fairing for LedgerFairing {
    fn info(&self) -> Info {
        Info {
            name: "Ledger",
            kind: Kind::Ignite,
        }
    }

    async fn on_ignite(&self, rocket: Rocket<Build>) -> rocket::fairing::Result {
        let config = match rocket.figment().extract::<LedgerConfig>() {
            Ok(config) => config,
            Err(e) => {
                error!("Failed to load ledger config");
                rocket::config::pretty_print_error(e);
                return Err(rocket);
            }
        };
        let identity = match SigningIdentity::from_hex_seed(&config.ledger_signing_key) {
            Ok(identity) => identity,
            Err(e) => {
                error!("Failed to load ledger signing key: {e}");
                return Err(rocket);
            }
        };

        let transport: Arc<dyn LedgerTransport> = match &self.transport {
            Some(transport) => transport.clone(),
            None if config.ledger_url.starts_with(MEMORY_URI) => {
                warn!("Using the in-memory ledger; votes are not publicly verifiable");
                let ledger = MemoryLedger::new();
                ledger.fund(identity.address(), u64::MAX / 2);
                Arc::new(ledger)
            }
            None => {
                let timeout = Duration::from_millis(config.ledger_request_timeout_ms);
                match RpcTransport::new(&config.ledger_url, timeout) {
                    Ok(transport) => Arc::new(transport),
                    Err(e) => {
                        error!("Failed to build ledger client: {e}");
                        return Err(rocket);
                    }
                }
            }
        };
        info!("Signing ledger transactions as {}", identity.address());

        let client = LedgerClient::new(transport, identity, config.settings());
        Ok(rocket.manage(Arc::new(client)))
    }
}

/// A fairing that wires the store and the ledger into the vote coordinator
/// and its background sweeper, placing both into managed state.
///
/// Must be attached after [`ConfigFairing`], [`DatabaseFairing`] and
/// [`LedgerFairing`].
pub struct CoordinatorFairing;

#[rocket::async_trait]
impl Fairing for CoordinatorFairing {
    fn info(&self) -> Info {
        Info {
            name: "Vote coordinator",
            kind: Kind::Ignite,
        }
    }

    async fn on_ignite(&self, rocket: Rocket<Build>) -> rocket::fairing::Result {
        let wiring = rocket.state::<Config>().map(|config| {
            (
                IdentityHasher::new(config.commitment_secret()),
                config.retry_policy(),
                config.sweep_interval(),
            )
        });
        let store = rocket.state::<Arc<dyn VoteStore>>().cloned();
        let ledger = rocket.state::<Arc<LedgerClient>>().cloned();
        let (Some((hasher, policy, sweep_interval)), Some(store), Some(ledger)) =
            (wiring, store, ledger)
        else {
            error!("Vote coordinator needs the config, the store and the ledger");
            return Err(rocket);
        };

        let coordinator = Arc::new(Coordinator::new(store, ledger, hasher, policy));
        let sweeper = Sweeper::new(coordinator.clone(), sweep_interval);
        Ok(rocket.manage(coordinator).manage(sweeper))
    }
}

/// A fairing that runs the reconciliation sweeper while the server is up.
/// The first sweep runs straight away to recover votes left behind by a
/// previous run.
pub struct SweeperFairing;

#[rocket::async_trait]
impl Fairing for SweeperFairing {
    fn info(&self) -> Info {
        Info {
            name: "Reconciliation sweeper",
            kind: Kind::Liftoff | Kind::Shutdown,
        }
    }

    async fn on_liftoff(&self, rocket: &Rocket<Orbit>) {
        if let Some(sweeper) = rocket.state::<Sweeper>() {
            sweeper.start();
            sweeper.trigger_now();
        }
    }

    async fn on_shutdown(&self, rocket: &Rocket<Orbit>) {
        if let Some(sweeper) = rocket.state::<Sweeper>() {
            sweeper.stop().await;
        }
    }
}
