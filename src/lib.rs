#[macro_use]
extern crate log;

use std::sync::Arc;

use rocket::{figment::Figment, Build, Rocket};

use crate::config::{
    ConfigFairing, CoordinatorFairing, DatabaseFairing, LedgerFairing, SweeperFairing,
};
use crate::ledger::LedgerTransport;
use crate::logging::LoggerFairing;
use crate::store::VoteStore;

pub mod api;
pub mod commitment;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod ledger;
pub mod logging;
pub mod model;
mod periodic_task;
pub mod store;
#[cfg(test)]
mod testing;

pub use config::Config;

/// Build the server from `Rocket.toml` and the environment.
pub fn build() -> Rocket<Build> {
    assemble(
        rocket::build(),
        DatabaseFairing::default(),
        LedgerFairing::default(),
    )
}

/// Build the server over an existing store and ledger transport.
pub fn rocket_for_backends(
    figment: Figment,
    store: Arc<dyn VoteStore>,
    transport: Arc<dyn LedgerTransport>,
) -> Rocket<Build> {
    assemble(
        rocket::custom(figment),
        DatabaseFairing::with_store(store),
        LedgerFairing::with_transport(transport),
    )
}

fn assemble(
    rocket: Rocket<Build>,
    database: DatabaseFairing,
    ledger: LedgerFairing,
) -> Rocket<Build> {
    rocket
        .attach(LoggerFairing)
        .attach(ConfigFairing)
        .attach(database)
        .attach(ledger)
        .attach(CoordinatorFairing)
        .attach(SweeperFairing)
        .mount("/", api::routes())
        .register("/", api::catchers())
}
