use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};

use super::store::{Entity, StoreError};
use crate::models::listing::{Advertisement, User};
use crate::models::prediction::PredictionResult;
use crate::models::task::{ModerationTask, NewModerationTask, TaskStatus};

const TASK_COLUMNS: &str = "id, item_id, status, is_violation, probability, error_message, \
     created_at, updated_at, processed_at, retry_count, max_retries";

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_unique_violation())
}

fn is_foreign_key_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_foreign_key_violation())
}

fn user_from_row(row: &PgRow) -> Result<User, StoreError> {
    Ok(User {
        seller_id: row.try_get("seller_id")?,
        is_verified_seller: row.try_get("is_verified_seller")?,
    })
}

fn advertisement_from_row(row: &PgRow) -> Result<Advertisement, StoreError> {
    Ok(Advertisement {
        item_id: row.try_get("item_id")?,
        seller_id: row.try_get("seller_id")?,
        name: row.try_get("name")?,
        description: row.try_get("description")?,
        category: row.try_get("category")?,
        images_qty: row.try_get("images_qty")?,
        is_closed: row.try_get("is_closed")?,
    })
}

fn task_from_row(row: &PgRow) -> Result<ModerationTask, StoreError> {
    let status_str: String = row.try_get("status")?;
    let status = status_str
        .parse::<TaskStatus>()
        .map_err(|_| StoreError::Corrupt(format!("unknown task status '{status_str}'")))?;

    Ok(ModerationTask {
        id: row.try_get("id")?,
        item_id: row.try_get("item_id")?,
        status,
        is_violation: row.try_get("is_violation")?,
        probability: row.try_get("probability")?,
        error_message: row.try_get("error_message")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
        processed_at: row.try_get("processed_at")?,
        retry_count: row.try_get("retry_count")?,
        max_retries: row.try_get("max_retries")?,
    })
}

/// Insert a seller
pub async fn create_user(pool: &PgPool, user: &User) -> Result<User, StoreError> {
    let row = sqlx::query(
        r#"
        INSERT INTO users (seller_id, is_verified_seller)
        VALUES ($1, $2)
        RETURNING seller_id, is_verified_seller
        "#,
    )
    .bind(user.seller_id)
    .bind(user.is_verified_seller)
    .fetch_one(pool)
    .await
    .map_err(|e| {
        if is_unique_violation(&e) {
            StoreError::AlreadyExists { entity: Entity::User, key: user.seller_id }
        } else {
            StoreError::Database(e)
        }
    })?;

    user_from_row(&row)
}

pub async fn get_user(pool: &PgPool, seller_id: i64) -> Result<User, StoreError> {
    let row = sqlx::query(
        r#"
        SELECT seller_id, is_verified_seller
        FROM users
        WHERE seller_id = $1
        "#,
    )
    .bind(seller_id)
    .fetch_optional(pool)
    .await?;

    match row {
        Some(r) => user_from_row(&r),
        None => Err(StoreError::not_found(Entity::User, seller_id)),
    }
}

pub async fn delete_user(pool: &PgPool, seller_id: i64) -> Result<User, StoreError> {
    let row = sqlx::query(
        r#"
        DELETE FROM users
        WHERE seller_id = $1
        RETURNING seller_id, is_verified_seller
        "#,
    )
    .bind(seller_id)
    .fetch_optional(pool)
    .await?;

    match row {
        Some(r) => user_from_row(&r),
        None => Err(StoreError::not_found(Entity::User, seller_id)),
    }
}

/// Insert an advertisement for an existing seller
pub async fn create_advertisement(
    pool: &PgPool,
    ad: &Advertisement,
) -> Result<Advertisement, StoreError> {
    let row = sqlx::query(
        r#"
        INSERT INTO advertisements
            (item_id, seller_id, name, description, category, images_qty, is_closed)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        RETURNING item_id, seller_id, name, description, category, images_qty, is_closed
        "#,
    )
    .bind(ad.item_id)
    .bind(ad.seller_id)
    .bind(&ad.name)
    .bind(&ad.description)
    .bind(ad.category)
    .bind(ad.images_qty)
    .bind(ad.is_closed)
    .fetch_one(pool)
    .await
    .map_err(|e| {
        if is_unique_violation(&e) {
            StoreError::AlreadyExists { entity: Entity::Advertisement, key: ad.item_id }
        } else if is_foreign_key_violation(&e) {
            StoreError::not_found(Entity::User, ad.seller_id)
        } else {
            StoreError::Database(e)
        }
    })?;

    advertisement_from_row(&row)
}

pub async fn get_advertisement(pool: &PgPool, item_id: i64) -> Result<Advertisement, StoreError> {
    let row = sqlx::query(
        r#"
        SELECT item_id, seller_id, name, description, category, images_qty, is_closed
        FROM advertisements
        WHERE item_id = $1
        "#,
    )
    .bind(item_id)
    .fetch_optional(pool)
    .await?;

    match row {
        Some(r) => advertisement_from_row(&r),
        None => Err(StoreError::not_found(Entity::Advertisement, item_id)),
    }
}

pub async fn advertisement_exists(pool: &PgPool, item_id: i64) -> Result<bool, StoreError> {
    let exists: bool =
        sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM advertisements WHERE item_id = $1)")
            .bind(item_id)
            .fetch_one(pool)
            .await?;
    Ok(exists)
}

pub async fn delete_advertisement(
    pool: &PgPool,
    item_id: i64,
) -> Result<Advertisement, StoreError> {
    let row = sqlx::query(
        r#"
        DELETE FROM advertisements
        WHERE item_id = $1
        RETURNING item_id, seller_id, name, description, category, images_qty, is_closed
        "#,
    )
    .bind(item_id)
    .fetch_optional(pool)
    .await?;

    match row {
        Some(r) => advertisement_from_row(&r),
        None => Err(StoreError::not_found(Entity::Advertisement, item_id)),
    }
}

/// Insert a new pending moderation task
pub async fn create_task(
    pool: &PgPool,
    task: &NewModerationTask,
) -> Result<ModerationTask, StoreError> {
    let row = sqlx::query(&format!(
        r#"
        INSERT INTO moderation_results (item_id, status, retry_count, max_retries)
        VALUES ($1, 'pending', 0, $2)
        RETURNING {TASK_COLUMNS}
        "#
    ))
    .bind(task.item_id)
    .bind(task.max_retries)
    .fetch_one(pool)
    .await
    .map_err(|e| {
        if is_unique_violation(&e) {
            StoreError::AlreadyExists { entity: Entity::ModerationTask, key: task.item_id }
        } else {
            StoreError::Database(e)
        }
    })?;

    task_from_row(&row)
}

/// Get a task by ID
pub async fn get_task(pool: &PgPool, task_id: i64) -> Result<ModerationTask, StoreError> {
    let row = sqlx::query(&format!(
        "SELECT {TASK_COLUMNS} FROM moderation_results WHERE id = $1"
    ))
    .bind(task_id)
    .fetch_optional(pool)
    .await?;

    match row {
        Some(r) => task_from_row(&r),
        None => Err(StoreError::not_found(Entity::ModerationTask, task_id)),
    }
}

/// Get the pending task of an advertisement, if any
pub async fn find_pending_task(
    pool: &PgPool,
    item_id: i64,
) -> Result<Option<ModerationTask>, StoreError> {
    let row = sqlx::query(&format!(
        r#"
        SELECT {TASK_COLUMNS}
        FROM moderation_results
        WHERE item_id = $1 AND status = 'pending'
        ORDER BY id ASC
        LIMIT 1
        "#
    ))
    .bind(item_id)
    .fetch_optional(pool)
    .await?;

    row.as_ref().map(task_from_row).transpose()
}

/// Distinguish a missing task from a terminal one after a guarded update
/// matched nothing.
async fn rejected_update(pool: &PgPool, task_id: i64) -> StoreError {
    match get_task(pool, task_id).await {
        Ok(task) => StoreError::InvalidState { task_id, status: task.status },
        Err(e) => e,
    }
}

/// Record a successful classification
pub async fn complete_task(
    pool: &PgPool,
    task_id: i64,
    result: &PredictionResult,
    retry_count: i32,
) -> Result<ModerationTask, StoreError> {
    let row = sqlx::query(&format!(
        r#"
        UPDATE moderation_results
        SET status = 'completed',
            is_violation = $2,
            probability = $3,
            error_message = NULL,
            retry_count = $4,
            processed_at = NOW(),
            updated_at = NOW()
        WHERE id = $1 AND status = 'pending'
        RETURNING {TASK_COLUMNS}
        "#
    ))
    .bind(task_id)
    .bind(result.is_violation)
    .bind(result.probability)
    .bind(retry_count)
    .fetch_optional(pool)
    .await?;

    match row {
        Some(r) => task_from_row(&r),
        None => Err(rejected_update(pool, task_id).await),
    }
}

/// Record a terminal failure
pub async fn fail_task(
    pool: &PgPool,
    task_id: i64,
    error_message: &str,
    retry_count: i32,
) -> Result<ModerationTask, StoreError> {
    let row = sqlx::query(&format!(
        r#"
        UPDATE moderation_results
        SET status = 'failed',
            is_violation = NULL,
            probability = NULL,
            error_message = $2,
            retry_count = $3,
            processed_at = NOW(),
            updated_at = NOW()
        WHERE id = $1 AND status = 'pending'
        RETURNING {TASK_COLUMNS}
        "#
    ))
    .bind(task_id)
    .bind(error_message)
    .bind(retry_count)
    .fetch_optional(pool)
    .await?;

    match row {
        Some(r) => task_from_row(&r),
        None => Err(rejected_update(pool, task_id).await),
    }
}

/// Administrative cleanup of a task record
pub async fn delete_task(pool: &PgPool, task_id: i64) -> Result<ModerationTask, StoreError> {
    let row = sqlx::query(&format!(
        "DELETE FROM moderation_results WHERE id = $1 RETURNING {TASK_COLUMNS}"
    ))
    .bind(task_id)
    .fetch_optional(pool)
    .await?;

    match row {
        Some(r) => task_from_row(&r),
        None => Err(StoreError::not_found(Entity::ModerationTask, task_id)),
    }
}
