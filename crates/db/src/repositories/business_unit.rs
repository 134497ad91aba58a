use sqlx::{sqlite::SqliteRow, Row};

use leadroute_core::domain::business_unit::{BuSku, BuSkuId, BusinessUnit, BusinessUnitId};

use super::{BusinessUnitRepository, RepositoryError};
use crate::DbPool;

pub struct SqlBusinessUnitRepository {
    pool: DbPool,
}

impl SqlBusinessUnitRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl BusinessUnitRepository for SqlBusinessUnitRepository {
    async fn list(&self) -> Result<Vec<BusinessUnit>, RepositoryError> {
        let rows = sqlx::query("SELECT id, code, name FROM business_units ORDER BY code ASC")
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(unit_from_row).collect()
    }

    async fn skus_for_unit(&self, id: &BusinessUnitId) -> Result<Vec<BuSku>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, business_unit_id, code, name, category
             FROM bu_skus
             WHERE business_unit_id = ?
             ORDER BY code ASC",
        )
        .bind(&id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(sku_from_row).collect()
    }

    async fn save(&self, unit: BusinessUnit) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO business_units (id, code, name)
             VALUES (?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                code = excluded.code,
                name = excluded.name",
        )
        .bind(&unit.id.0)
        .bind(&unit.code)
        .bind(&unit.name)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn save_sku(&self, sku: BuSku) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO bu_skus (id, business_unit_id, code, name, category)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                code = excluded.code,
                name = excluded.name,
                category = excluded.category",
        )
        .bind(&sku.id.0)
        .bind(&sku.business_unit_id.0)
        .bind(&sku.code)
        .bind(&sku.name)
        .bind(&sku.category)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

fn unit_from_row(row: SqliteRow) -> Result<BusinessUnit, RepositoryError> {
    Ok(BusinessUnit {
        id: BusinessUnitId(row.try_get("id")?),
        code: row.try_get("code")?,
        name: row.try_get("name")?,
    })
}

fn sku_from_row(row: SqliteRow) -> Result<BuSku, RepositoryError> {
    Ok(BuSku {
        id: BuSkuId(row.try_get("id")?),
        business_unit_id: BusinessUnitId(row.try_get("business_unit_id")?),
        code: row.try_get("code")?,
        name: row.try_get("name")?,
        category: row.try_get("category")?,
    })
}
