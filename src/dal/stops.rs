use itertools::Itertools;
use sqlx::{Pool, Postgres, QueryBuilder, query_as, query_scalar};
use tracing::{Instrument, info_span};

use crate::model::stop::Stop;

use super::{StopStore, StorageError};

/// Postgres has a limit of 65535 bind parameters per statement
const UPSERT_CHUNK_SIZE: usize = 1024;

#[derive(Clone, Debug)]
pub struct PgStopStore {
    pool: Pool<Postgres>,
}

impl PgStopStore {
    pub async fn connect(db_url: &str) -> Result<Self, StorageError> {
        let pool = sqlx::PgPool::connect(db_url).await?;
        sqlx::migrate!("./migrations").run(&pool).await?;

        Ok(Self { pool })
    }
}

impl StopStore for PgStopStore {
    #[tracing::instrument(err, skip_all, fields(stops = stops.len()))]
    async fn upsert_stops(&self, stops: &[Stop]) -> Result<u64, StorageError> {
        let mut tx = self.pool.begin().await?;
        let mut affected = 0;

        for stops in stops.chunks(UPSERT_CHUNK_SIZE).collect_vec() {
            let mut query_builder = QueryBuilder::new(
                "INSERT INTO stops (
                    id,
                    name,
                    stop_lat,
                    stop_long,
                    stop_lat_raw,
                    stop_long_raw
                )",
            );

            query_builder.push_values(stops, |mut b, stop| {
                b.push_bind(&stop.id)
                    .push_bind(&stop.name)
                    .push_bind(stop.stop_lat)
                    .push_bind(stop.stop_long)
                    .push_bind(&stop.stop_lat_raw)
                    .push_bind(&stop.stop_long_raw);
            });

            query_builder.push(
                " ON CONFLICT ( id ) DO UPDATE SET
                    name = EXCLUDED.name,
                    stop_lat = EXCLUDED.stop_lat,
                    stop_long = EXCLUDED.stop_long,
                    stop_lat_raw = EXCLUDED.stop_lat_raw,
                    stop_long_raw = EXCLUDED.stop_long_raw",
            );

            affected += query_builder
                .build()
                .execute(&mut *tx)
                .instrument(info_span!("Upserting stops"))
                .await?
                .rows_affected();
        }

        tx.commit().await?;

        Ok(affected)
    }

    async fn random_stop(&self) -> Result<Option<Stop>, StorageError> {
        let stop = query_as::<_, Stop>(
            "SELECT id, name, stop_lat, stop_long, stop_lat_raw, stop_long_raw
            FROM stops ORDER BY random() LIMIT 1",
        )
        .fetch_optional(&self.pool)
        .await?;

        Ok(stop)
    }

    async fn get_stop(&self, id: &str) -> Result<Option<Stop>, StorageError> {
        let stop = query_as::<_, Stop>(
            "SELECT id, name, stop_lat, stop_long, stop_lat_raw, stop_long_raw
            FROM stops WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(stop)
    }

    async fn count_stops(&self) -> Result<i64, StorageError> {
        let count: i64 = query_scalar("SELECT COUNT(*) FROM stops")
            .fetch_one(&self.pool)
            .await?;

        Ok(count)
    }
}
