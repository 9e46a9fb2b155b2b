use std::sync::Arc;
use std::net::SocketAddr;
use anyhow::Context;
use encore_api::{app, worker, AppState};
use encore_core::{OptionId, OptionListing, Seat, SeatId, SeatInventory};
use encore_store::app_config::{Config, SeedOption, StoreBackend};
use encore_store::{DbClient, MemoryStore, PgPriceCatalog, PgStore, RedisStore, StaticPriceCatalog};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn seed_seats(seed: &SeedOption) -> impl Iterator<Item = Seat> + '_ {
    (0..seed.seat_count as i64).map(move |i| {
        Seat::new(SeatId(seed.first_seat_id + i), OptionId(seed.option_id), format!("{}", i + 1))
    })
}

fn seed_catalog(seeds: &[SeedOption]) -> StaticPriceCatalog {
    seeds.iter().fold(StaticPriceCatalog::new(), |catalog, s| {
        catalog.with_option(OptionListing {
            id: OptionId(s.option_id),
            title: s.title.clone(),
            price: s.price,
            reserve_from: s.reserve_from,
            reserve_until: s.reserve_until,
        })
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "encore_api=debug,encore_booking=debug,encore_store=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::load().context("Failed to load config")?;
    let hold_lifetime = config.holds.lifetime()?;
    tracing::info!("Starting Encore API on port {} ({:?} store)", config.server.port, config.store.backend);

    let state = match config.store.backend {
        StoreBackend::Memory => {
            let store = Arc::new(MemoryStore::new());
            for seed in &config.seed {
                store.provision_seats(seed_seats(seed)).await;
            }
            AppState::new(store.clone(), store, Arc::new(seed_catalog(&config.seed)), hold_lifetime)
        }
        StoreBackend::Postgres => {
            let url = &config.database.as_ref().context("database.url is required")?.url;
            let db = DbClient::new(url).await.context("Failed to connect to Postgres")?;
            db.migrate().await?;
            let store = Arc::new(PgStore::new(db.pool.clone()));
            AppState::new(store.clone(), store, Arc::new(PgPriceCatalog::new(db.pool.clone())), hold_lifetime)
        }
        StoreBackend::Redis => {
            let url = &config.redis.as_ref().context("redis.url is required")?.url;
            let store = Arc::new(RedisStore::new(url).await.context("Failed to reach Redis")?);
            for seed in &config.seed {
                // Existing seats keep their status across restarts
                let seats: Vec<Seat> = seed_seats(seed).collect();
                let ids: Vec<SeatId> = seats.iter().map(|s| s.id).collect();
                let existing = store.fetch_by_ids(&ids).await?;
                for seat in seats.iter().filter(|s| !existing.iter().any(|e| e.id == s.id)) {
                    store.provision_seat(seat).await?;
                }
            }
            AppState::new(store.clone(), store, Arc::new(seed_catalog(&config.seed)), hold_lifetime)
        }
    };

    tokio::spawn(worker::start_expiry_worker(state.sweeper.clone(), config.holds.sweep_interval()));

    let app = app(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
