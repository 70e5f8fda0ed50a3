//! SQLite implementation of the product store
//!
//! Prices are stored as decimal TEXT so no precision is lost through REAL.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use std::sync::Arc;

use crate::domain::errors::{StoreError, StoreResult};
use crate::domain::product::{CheckHistoryEntry, Product, ProductStatus};
use crate::domain::repositories::{CheckRecord, ProductStore};

const PRODUCT_COLUMNS: &str = "id, url, display_name, last_status, last_price, last_checked_at, \
     check_availability_enabled, check_price_enabled, created_at";

pub struct SqliteProductStore {
    pool: Arc<SqlitePool>,
}

impl SqliteProductStore {
    pub const fn new(pool: Arc<SqlitePool>) -> Self {
        Self { pool }
    }

    async fn require_product(&self, id: i64) -> StoreResult<Product> {
        self.get_product_by_id(id)
            .await?
            .ok_or(StoreError::ProductNotFound(id))
    }
}

fn parse_price(column: &'static str, raw: Option<String>) -> StoreResult<Option<Decimal>> {
    raw.map(|value| {
        Decimal::from_str(&value).map_err(|_| StoreError::CorruptValue { column, value })
    })
    .transpose()
}

fn parse_status(column: &'static str, raw: String) -> StoreResult<ProductStatus> {
    ProductStatus::from_str(&raw).map_err(|_| StoreError::CorruptValue { column, value: raw })
}

fn product_from_row(row: &SqliteRow) -> StoreResult<Product> {
    let last_status: Option<String> = row.try_get("last_status")?;

    Ok(Product {
        id: row.try_get("id")?,
        url: row.try_get("url")?,
        display_name: row.try_get("display_name")?,
        last_status: last_status
            .map(|s| parse_status("last_status", s))
            .transpose()?,
        last_price: parse_price("last_price", row.try_get("last_price")?)?,
        last_checked_at: row.try_get("last_checked_at")?,
        check_availability_enabled: row.try_get("check_availability_enabled")?,
        check_price_enabled: row.try_get("check_price_enabled")?,
        created_at: row.try_get("created_at")?,
    })
}

fn history_from_row(row: &SqliteRow) -> StoreResult<CheckHistoryEntry> {
    Ok(CheckHistoryEntry {
        id: row.try_get("id")?,
        product_id: row.try_get("product_id")?,
        status: parse_status("status", row.try_get("status")?)?,
        price: parse_price("price", row.try_get("price")?)?,
        checked_at: row.try_get("checked_at")?,
    })
}

#[async_trait]
impl ProductStore for SqliteProductStore {
    async fn get_product(&self, url: &str) -> StoreResult<Option<Product>> {
        let row = sqlx::query(&format!("SELECT {PRODUCT_COLUMNS} FROM products WHERE url = ?"))
            .bind(url)
            .fetch_optional(&*self.pool)
            .await?;

        row.as_ref().map(product_from_row).transpose()
    }

    async fn get_product_by_id(&self, id: i64) -> StoreResult<Option<Product>> {
        let row = sqlx::query(&format!("SELECT {PRODUCT_COLUMNS} FROM products WHERE id = ?"))
            .bind(id)
            .fetch_optional(&*self.pool)
            .await?;

        row.as_ref().map(product_from_row).transpose()
    }

    async fn list_products(&self) -> StoreResult<Vec<Product>> {
        let rows = sqlx::query(&format!("SELECT {PRODUCT_COLUMNS} FROM products ORDER BY id"))
            .fetch_all(&*self.pool)
            .await?;

        rows.iter().map(product_from_row).collect()
    }

    async fn upsert_product(&self, url: &str, display_name: Option<&str>) -> StoreResult<Product> {
        let display_name = display_name.map(str::trim).filter(|n| !n.is_empty());

        let row = sqlx::query(&format!(
            r"
            INSERT INTO products (url, display_name, created_at)
            VALUES (?, ?, ?)
            ON CONFLICT(url) DO UPDATE SET
                display_name = COALESCE(products.display_name, excluded.display_name)
            RETURNING {PRODUCT_COLUMNS}
            "
        ))
        .bind(url)
        .bind(display_name)
        .bind(Utc::now())
        .fetch_one(&*self.pool)
        .await?;

        product_from_row(&row)
    }

    async fn record_check(&self, check: &CheckRecord) -> StoreResult<Product> {
        let price = check.price.map(|p| p.to_string());
        let extracted_name = check
            .extracted_name
            .as_deref()
            .map(str::trim)
            .filter(|n| !n.is_empty());

        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query(
            r"
            UPDATE products SET
                last_status = ?,
                last_price = COALESCE(?, last_price),
                last_checked_at = ?,
                display_name = COALESCE(display_name, ?)
            WHERE id = ?
            ",
        )
        .bind(check.status.as_str())
        .bind(price.as_deref())
        .bind(check.checked_at)
        .bind(extracted_name)
        .bind(check.product_id)
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() == 0 {
            return Err(StoreError::ProductNotFound(check.product_id));
        }

        sqlx::query(
            r"
            INSERT INTO check_history (product_id, status, price, checked_at)
            VALUES (?, ?, ?, ?)
            ",
        )
        .bind(check.product_id)
        .bind(check.status.as_str())
        .bind(price.as_deref())
        .bind(check.checked_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        self.require_product(check.product_id).await
    }

    async fn get_history(
        &self,
        product_id: i64,
        limit: u32,
    ) -> StoreResult<Vec<CheckHistoryEntry>> {
        let rows = sqlx::query(
            r"
            SELECT id, product_id, status, price, checked_at
            FROM check_history
            WHERE product_id = ?
            ORDER BY checked_at DESC, id DESC
            LIMIT ?
            ",
        )
        .bind(product_id)
        .bind(i64::from(limit))
        .fetch_all(&*self.pool)
        .await?;

        rows.iter().map(history_from_row).collect()
    }

    async fn set_check_flags(
        &self,
        product_id: i64,
        availability: Option<bool>,
        price: Option<bool>,
    ) -> StoreResult<Product> {
        let updated = sqlx::query(
            r"
            UPDATE products SET
                check_availability_enabled = COALESCE(?, check_availability_enabled),
                check_price_enabled = COALESCE(?, check_price_enabled)
            WHERE id = ?
            ",
        )
        .bind(availability)
        .bind(price)
        .bind(product_id)
        .execute(&*self.pool)
        .await?;

        if updated.rows_affected() == 0 {
            return Err(StoreError::ProductNotFound(product_id));
        }
        self.require_product(product_id).await
    }

    async fn delete_product(&self, product_id: i64) -> StoreResult<bool> {
        let deleted = sqlx::query("DELETE FROM products WHERE id = ?")
            .bind(product_id)
            .execute(&*self.pool)
            .await?;

        Ok(deleted.rows_affected() > 0)
    }

    async fn get_setting(&self, key: &str) -> StoreResult<Option<String>> {
        let value = sqlx::query_scalar::<_, String>("SELECT value FROM settings WHERE key = ?")
            .bind(key)
            .fetch_optional(&*self.pool)
            .await?;

        Ok(value)
    }

    async fn set_setting(&self, key: &str, value: &str) -> StoreResult<()> {
        let now: DateTime<Utc> = Utc::now();
        sqlx::query(
            r"
            INSERT INTO settings (key, value, updated_at)
            VALUES (?, ?, ?)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at
            ",
        )
        .bind(key)
        .bind(value)
        .bind(now)
        .execute(&*self.pool)
        .await?;

        Ok(())
    }
}
