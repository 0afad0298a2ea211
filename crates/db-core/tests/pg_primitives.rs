//! PostgreSQL integration tests for the database primitives.
//!
//! These tests share one PostgreSQL container. Run with:
//!
//! ```bash
//! cargo test -p db-core --test pg_primitives
//! ```

use std::sync::Arc;

use serial_test::serial;
use sqlx::{PgPool, Row};
use testcontainers::{ContainerAsync, runners::AsyncRunner};
use testcontainers_modules::postgres::Postgres;
use tokio::sync::OnceCell;
use uuid::Uuid;

use db_core::{
    BulkUpsert, DbError, LockMode, MergeStrategy, SqlValue, TableKey, lock_row, lock_rows,
    lock_rows_composite,
};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS widgets (
    id UUID PRIMARY KEY,
    qty BIGINT NOT NULL DEFAULT 0,
    peak BIGINT NOT NULL DEFAULT 0,
    note TEXT,
    tags JSONB
);

CREATE TABLE IF NOT EXISTS bins (
    site_id UUID NOT NULL,
    slot_id UUID NOT NULL,
    qty BIGINT NOT NULL DEFAULT 0,
    PRIMARY KEY (site_id, slot_id)
);
"#;

const WIDGETS: TableKey = TableKey {
    table: "widgets",
    key_columns: &["id"],
};

const BINS: TableKey = TableKey {
    table: "bins",
    key_columns: &["site_id", "slot_id"],
};

struct ContainerInfo {
    #[allow(dead_code)] // Container must stay alive for tests
    container: ContainerAsync<Postgres>,
    connection_string: String,
}

static CONTAINER: OnceCell<Arc<ContainerInfo>> = OnceCell::const_new();

async fn get_container_info() -> Arc<ContainerInfo> {
    CONTAINER
        .get_or_init(|| async {
            let container = Postgres::default().start().await.unwrap();

            let host = container.get_host().await.unwrap();
            let port = container.get_host_port_ipv4(5432).await.unwrap();
            let connection_string =
                format!("postgres://postgres:postgres@{}:{}/postgres", host, port);

            let temp_pool = PgPool::connect(&connection_string).await.unwrap();
            sqlx::raw_sql(SCHEMA).execute(&temp_pool).await.unwrap();
            temp_pool.close().await;

            Arc::new(ContainerInfo {
                container,
                connection_string,
            })
        })
        .await
        .clone()
}

async fn get_test_pool() -> PgPool {
    let info = get_container_info().await;

    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(5)
        .connect(&info.connection_string)
        .await
        .unwrap();

    sqlx::query("TRUNCATE TABLE widgets, bins")
        .execute(&pool)
        .await
        .unwrap();

    pool
}

async fn insert_widget(pool: &PgPool, id: Uuid, qty: i64) {
    sqlx::query("INSERT INTO widgets (id, qty) VALUES ($1, $2)")
        .bind(id)
        .bind(qty)
        .execute(pool)
        .await
        .unwrap();
}

#[tokio::test]
#[serial]
async fn lock_rows_locks_existing_rows() {
    let pool = get_test_pool().await;
    let first = Uuid::new_v4();
    let second = Uuid::new_v4();
    insert_widget(&pool, first, 1).await;
    insert_widget(&pool, second, 2).await;

    let mut tx = pool.begin().await.unwrap();
    let locked = lock_rows(&mut tx, &WIDGETS, &[first, second], LockMode::ForUpdate)
        .await
        .unwrap();
    assert_eq!(locked, 2);
    tx.commit().await.unwrap();
}

#[tokio::test]
#[serial]
async fn lock_rows_deduplicates_ids() {
    let pool = get_test_pool().await;
    let id = Uuid::new_v4();
    insert_widget(&pool, id, 1).await;

    let mut tx = pool.begin().await.unwrap();
    let locked = lock_rows(&mut tx, &WIDGETS, &[id, id, id], LockMode::ForUpdate)
        .await
        .unwrap();
    assert_eq!(locked, 1);
    tx.rollback().await.unwrap();
}

#[tokio::test]
#[serial]
async fn lock_rows_fails_on_missing_row() {
    let pool = get_test_pool().await;
    let existing = Uuid::new_v4();
    insert_widget(&pool, existing, 1).await;

    let mut tx = pool.begin().await.unwrap();
    let err = lock_rows(
        &mut tx,
        &WIDGETS,
        &[existing, Uuid::new_v4()],
        LockMode::ForUpdate,
    )
    .await
    .unwrap_err();

    match err {
        DbError::RowsNotFound {
            table,
            requested,
            found,
        } => {
            assert_eq!(table, "widgets");
            assert_eq!(requested, 2);
            assert_eq!(found, 1);
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
#[serial]
async fn lock_row_accepts_share_mode() {
    let pool = get_test_pool().await;
    let id = Uuid::new_v4();
    insert_widget(&pool, id, 1).await;

    let mut tx = pool.begin().await.unwrap();
    lock_row(&mut tx, &WIDGETS, id, LockMode::ForShare)
        .await
        .unwrap();
    tx.rollback().await.unwrap();
}

#[tokio::test]
#[serial]
async fn composite_lock_locks_key_pairs() {
    let pool = get_test_pool().await;
    let site = Uuid::new_v4();
    let first_slot = Uuid::new_v4();
    let second_slot = Uuid::new_v4();
    for slot in [first_slot, second_slot] {
        sqlx::query("INSERT INTO bins (site_id, slot_id, qty) VALUES ($1, $2, 5)")
            .bind(site)
            .bind(slot)
            .execute(&pool)
            .await
            .unwrap();
    }

    let mut tx = pool.begin().await.unwrap();
    let locked = lock_rows_composite(
        &mut tx,
        &BINS,
        &[(site, first_slot), (site, second_slot)],
        LockMode::ForUpdate,
    )
    .await
    .unwrap();
    assert_eq!(locked, 2);
    tx.commit().await.unwrap();
}

#[tokio::test]
#[serial]
async fn composite_lock_fails_on_missing_pair() {
    let pool = get_test_pool().await;
    let site = Uuid::new_v4();
    let slot = Uuid::new_v4();
    sqlx::query("INSERT INTO bins (site_id, slot_id, qty) VALUES ($1, $2, 5)")
        .bind(site)
        .bind(slot)
        .execute(&pool)
        .await
        .unwrap();

    let mut tx = pool.begin().await.unwrap();
    let err = lock_rows_composite(
        &mut tx,
        &BINS,
        &[(site, slot), (site, Uuid::new_v4())],
        LockMode::ForUpdate,
    )
    .await
    .unwrap_err();
    assert!(matches!(err, DbError::RowsNotFound { .. }));
}

#[tokio::test]
#[serial]
async fn composite_lock_rejects_single_column_table() {
    let pool = get_test_pool().await;
    let mut conn = pool.acquire().await.unwrap();

    let err = lock_rows_composite(
        &mut conn,
        &WIDGETS,
        &[(Uuid::new_v4(), Uuid::new_v4())],
        LockMode::ForUpdate,
    )
    .await
    .unwrap_err();
    assert!(matches!(err, DbError::KeyArity { .. }));
}

#[tokio::test]
#[serial]
async fn upsert_inserts_then_merges_with_add() {
    let pool = get_test_pool().await;
    let id = Uuid::new_v4();
    let upsert = BulkUpsert::new("widgets", &["id", "qty"])
        .on_conflict(&["id"])
        .merge("qty", MergeStrategy::Add);

    let mut conn = pool.acquire().await.unwrap();
    let row = |qty: i64| vec![vec![SqlValue::from(id), SqlValue::from(qty)]];
    upsert.execute(&mut conn, &row(10)).await.unwrap();
    upsert.execute(&mut conn, &row(7)).await.unwrap();

    let qty: i64 = sqlx::query_scalar("SELECT qty FROM widgets WHERE id = $1")
        .bind(id)
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(qty, 17);
}

#[tokio::test]
#[serial]
async fn upsert_overwrite_and_max_strategies() {
    let pool = get_test_pool().await;
    let id = Uuid::new_v4();
    let upsert = BulkUpsert::new("widgets", &["id", "qty", "peak"])
        .on_conflict(&["id"])
        .merge("qty", MergeStrategy::Overwrite)
        .merge("peak", MergeStrategy::Max);

    let mut conn = pool.acquire().await.unwrap();
    let row = |qty: i64, peak: i64| {
        vec![vec![
            SqlValue::from(id),
            SqlValue::from(qty),
            SqlValue::from(peak),
        ]]
    };
    upsert.execute(&mut conn, &row(100, 100)).await.unwrap();
    upsert.execute(&mut conn, &row(40, 60)).await.unwrap();

    let result = sqlx::query("SELECT qty, peak FROM widgets WHERE id = $1")
        .bind(id)
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(result.get::<i64, _>("qty"), 40);
    assert_eq!(result.get::<i64, _>("peak"), 100);
}

#[tokio::test]
#[serial]
async fn upsert_coalesce_keeps_stored_value_on_null() {
    let pool = get_test_pool().await;
    let id = Uuid::new_v4();
    let upsert = BulkUpsert::new("widgets", &["id", "note"])
        .on_conflict(&["id"])
        .merge("note", MergeStrategy::Coalesce);

    let mut conn = pool.acquire().await.unwrap();
    upsert
        .execute(
            &mut conn,
            &[vec![SqlValue::from(id), SqlValue::from("original")]],
        )
        .await
        .unwrap();
    upsert
        .execute(&mut conn, &[vec![SqlValue::from(id), SqlValue::Text(None)]])
        .await
        .unwrap();

    let note: Option<String> = sqlx::query_scalar("SELECT note FROM widgets WHERE id = $1")
        .bind(id)
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(note.as_deref(), Some("original"));
}

#[tokio::test]
#[serial]
async fn upsert_merge_json_concatenates_arrays() {
    let pool = get_test_pool().await;
    let id = Uuid::new_v4();
    let upsert = BulkUpsert::new("widgets", &["id", "tags"])
        .on_conflict(&["id"])
        .merge("tags", MergeStrategy::MergeJson);

    let mut conn = pool.acquire().await.unwrap();
    let row = |tags: serde_json::Value| vec![vec![SqlValue::from(id), SqlValue::from(tags)]];
    upsert
        .execute(&mut conn, &row(serde_json::json!(["a", "b"])))
        .await
        .unwrap();
    upsert
        .execute(&mut conn, &row(serde_json::json!(["c"])))
        .await
        .unwrap();

    let tags: serde_json::Value = sqlx::query_scalar("SELECT tags FROM widgets WHERE id = $1")
        .bind(id)
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(tags, serde_json::json!(["a", "b", "c"]));
}

#[tokio::test]
#[serial]
async fn upsert_append_text_joins_with_newline() {
    let pool = get_test_pool().await;
    let id = Uuid::new_v4();
    let upsert = BulkUpsert::new("widgets", &["id", "note"])
        .on_conflict(&["id"])
        .merge("note", MergeStrategy::AppendText);

    let mut conn = pool.acquire().await.unwrap();
    upsert
        .execute(&mut conn, &[vec![SqlValue::from(id), SqlValue::from("first")]])
        .await
        .unwrap();
    upsert
        .execute(&mut conn, &[vec![SqlValue::from(id), SqlValue::from("second")]])
        .await
        .unwrap();

    let note: String = sqlx::query_scalar("SELECT note FROM widgets WHERE id = $1")
        .bind(id)
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(note, "first\nsecond");
}

#[tokio::test]
#[serial]
async fn upsert_all_keep_leaves_row_untouched() {
    let pool = get_test_pool().await;
    let id = Uuid::new_v4();
    let upsert = BulkUpsert::new("widgets", &["id", "qty"])
        .on_conflict(&["id"])
        .merge("qty", MergeStrategy::Keep);

    let mut conn = pool.acquire().await.unwrap();
    let row = |qty: i64| vec![vec![SqlValue::from(id), SqlValue::from(qty)]];
    upsert.execute(&mut conn, &row(10)).await.unwrap();
    let affected = upsert.execute(&mut conn, &row(99)).await.unwrap();
    assert_eq!(affected, 0);

    let qty: i64 = sqlx::query_scalar("SELECT qty FROM widgets WHERE id = $1")
        .bind(id)
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(qty, 10);
}

#[tokio::test]
#[serial]
async fn upsert_handles_many_rows_in_one_statement() {
    let pool = get_test_pool().await;
    let upsert = BulkUpsert::new("widgets", &["id", "qty"]);

    let rows: Vec<Vec<SqlValue>> = (0..50)
        .map(|i| vec![SqlValue::from(Uuid::new_v4()), SqlValue::from(i as i64)])
        .collect();

    let mut conn = pool.acquire().await.unwrap();
    let affected = upsert.execute(&mut conn, &rows).await.unwrap();
    assert_eq!(affected, 50);

    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM widgets")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(count, 50);
}
