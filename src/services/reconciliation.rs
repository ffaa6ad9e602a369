use std::str::FromStr;

use chrono::{Duration, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use sqlx::PgPool;
use uuid::Uuid;

use crate::domain::invoice::{InvoiceRecord, InvoiceType, ItemKind, LineItem};
use crate::domain::period::PeriodMonth;
use crate::domain::shortfall::{
    per_room_split, shortfall_of, CategoryReconciliation, ShortfallStatus, UtilityShortfallRecord,
    CATEGORY_ELECTRICITY, CATEGORY_WATER,
};
use crate::error::{map_db_error, AppError, AppResult};
use crate::services::invoice_generator::generate_in_tx;

#[derive(Debug, Clone, Serialize)]
pub struct ReconciliationReport {
    pub house_id: Uuid,
    pub period_month: String,
    pub categories: Vec<CategoryReconciliation>,
    pub total_shortfall: Decimal,
    pub active_room_count: i64,
    pub per_room_amount: Decimal,
}

/// Compare what the landlord paid the utility companies against what
/// tenant invoices billed for the same house and period. Cancelled
/// invoices do not count as collected.
pub async fn compute_reconciliation(
    pool: &PgPool,
    landlord_id: Uuid,
    house_id: Uuid,
    period: PeriodMonth,
) -> AppResult<ReconciliationReport> {
    let period_str = period.to_string();

    let expense_rows: Vec<(String, Decimal)> = sqlx::query_as(
        "SELECT category, COALESCE(SUM(amount), 0)
         FROM expenses
         WHERE landlord_id = $1 AND house_id = $2 AND period_month = $3
           AND category IN ($4, $5)
         GROUP BY category",
    )
    .bind(landlord_id)
    .bind(house_id)
    .bind(&period_str)
    .bind(CATEGORY_ELECTRICITY)
    .bind(CATEGORY_WATER)
    .fetch_all(pool)
    .await
    .map_err(map_db_error)?;

    let collected_rows: Vec<(String, Decimal)> = sqlx::query_as(
        "SELECT ii.category, COALESCE(SUM(ii.amount), 0)
         FROM invoice_items ii
         JOIN invoices i ON i.id = ii.invoice_id
         WHERE i.house_id = $1
           AND i.period_month = $2
           AND i.status <> 'cancelled'
           AND ii.item_type = 'utility_metered'
           AND ii.category IN ($3, $4)
         GROUP BY ii.category",
    )
    .bind(house_id)
    .bind(&period_str)
    .bind(CATEGORY_ELECTRICITY)
    .bind(CATEGORY_WATER)
    .fetch_all(pool)
    .await
    .map_err(map_db_error)?;

    let (active_room_count,): (i64,) = sqlx::query_as(
        "SELECT COUNT(*) FROM rooms WHERE house_id = $1 AND status = 'rented'",
    )
    .bind(house_id)
    .fetch_one(pool)
    .await
    .map_err(map_db_error)?;

    let sum_for = |rows: &[(String, Decimal)], category: &str| -> Decimal {
        rows.iter()
            .find(|(name, _)| name == category)
            .map(|(_, total)| *total)
            .unwrap_or(Decimal::ZERO)
    };

    let mut categories = Vec::with_capacity(2);
    let mut total_shortfall = Decimal::ZERO;
    for category in [CATEGORY_ELECTRICITY, CATEGORY_WATER] {
        let expense = sum_for(&expense_rows, category);
        let collected = sum_for(&collected_rows, category);
        let shortfall = shortfall_of(expense, collected);
        total_shortfall += shortfall;
        categories.push(CategoryReconciliation {
            category: category.to_string(),
            expense,
            collected,
            shortfall,
        });
    }

    Ok(ReconciliationReport {
        house_id,
        period_month: period_str,
        categories,
        total_shortfall,
        active_room_count,
        per_room_amount: per_room_split(total_shortfall, active_room_count),
    })
}

/// Persist the computed gap for a house and period so it can later be
/// billed out. Re-flagging a pending record refreshes its figures; an
/// applied record is immutable.
pub async fn flag_shortfall(
    pool: &PgPool,
    landlord_id: Uuid,
    house_id: Uuid,
    period: PeriodMonth,
) -> AppResult<UtilityShortfallRecord> {
    let report = compute_reconciliation(pool, landlord_id, house_id, period).await?;

    let electricity = report
        .categories
        .iter()
        .find(|c| c.category == CATEGORY_ELECTRICITY)
        .map(|c| c.shortfall)
        .unwrap_or(Decimal::ZERO);
    let water = report
        .categories
        .iter()
        .find(|c| c.category == CATEGORY_WATER)
        .map(|c| c.shortfall)
        .unwrap_or(Decimal::ZERO);

    let record: Option<UtilityShortfallRecord> = sqlx::query_as(
        "INSERT INTO utility_shortfalls
             (house_id, period_month, electricity_shortfall, water_shortfall,
              total_shortfall, per_room_amount, active_room_count, status)
         VALUES ($1, $2, $3, $4, $5, $6, $7, 'pending')
         ON CONFLICT (house_id, period_month) DO UPDATE SET
             electricity_shortfall = EXCLUDED.electricity_shortfall,
             water_shortfall = EXCLUDED.water_shortfall,
             total_shortfall = EXCLUDED.total_shortfall,
             per_room_amount = EXCLUDED.per_room_amount,
             active_room_count = EXCLUDED.active_room_count
         WHERE utility_shortfalls.status = 'pending'
         RETURNING *",
    )
    .bind(house_id)
    .bind(&report.period_month)
    .bind(electricity)
    .bind(water)
    .bind(report.total_shortfall)
    .bind(report.per_room_amount)
    .bind(report.active_room_count)
    .fetch_optional(pool)
    .await
    .map_err(map_db_error)?;

    record.ok_or_else(|| {
        AppError::Conflict(
            "Khoản thiếu hụt kỳ này đã được áp dụng, không thể cập nhật.".to_string(),
        )
    })
}

/// Bill a flagged shortfall out as adjustment invoices, one per active
/// contract in the house, each carrying the per-room share of every
/// category that came up short. Runs in a single transaction and locks
/// the shortfall row first, so two concurrent applies produce one set
/// of invoices. An already-applied shortfall is a no-op.
pub async fn apply_shortfall_to_invoices(
    pool: &PgPool,
    reference_prefix: &str,
    shortfall_id: Uuid,
    due_days: i64,
) -> AppResult<Vec<InvoiceRecord>> {
    let mut tx = pool.begin().await.map_err(map_db_error)?;

    let record: UtilityShortfallRecord =
        sqlx::query_as("SELECT * FROM utility_shortfalls WHERE id = $1 FOR UPDATE")
            .bind(shortfall_id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(map_db_error)?
            .ok_or_else(|| {
                AppError::NotFound("Không tìm thấy khoản thiếu hụt.".to_string())
            })?;

    if ShortfallStatus::parse(&record.status)? == ShortfallStatus::Applied {
        tx.rollback().await.map_err(map_db_error)?;
        return Ok(Vec::new());
    }

    let period = PeriodMonth::from_str(&record.period_month)?;
    let due_date = Utc::now().date_naive() + Duration::days(due_days.max(0));

    let mut items_template = Vec::new();
    for (category, shortfall) in [
        (CATEGORY_ELECTRICITY, record.electricity_shortfall),
        (CATEGORY_WATER, record.water_shortfall),
    ] {
        let share = per_room_split(shortfall, record.active_room_count);
        if share <= Decimal::ZERO {
            continue;
        }
        items_template.push(LineItem::validate(
            ItemKind::Adjustment,
            &format!(
                "Bù phần thiếu tiền {} kỳ {}",
                vietnamese_category(category),
                period
            ),
            Some(category.to_string()),
            Decimal::ONE,
            share,
            Some(share),
        )?);
    }

    if items_template.is_empty() {
        tx.rollback().await.map_err(map_db_error)?;
        return Err(AppError::UnprocessableEntity(
            "Khoản thiếu hụt không có số tiền để phân bổ.".to_string(),
        ));
    }

    let contract_ids: Vec<(Uuid,)> = sqlx::query_as(
        "SELECT id FROM contracts WHERE house_id = $1 AND status = 'active' ORDER BY created_at",
    )
    .bind(record.house_id)
    .fetch_all(&mut *tx)
    .await
    .map_err(map_db_error)?;

    let mut created = Vec::with_capacity(contract_ids.len());
    for (contract_id,) in contract_ids {
        let (invoice, _) = generate_in_tx(
            &mut tx,
            reference_prefix,
            contract_id,
            period,
            due_date,
            Decimal::ZERO,
            InvoiceType::Adjustment,
            false,
            items_template.clone(),
        )
        .await?;
        created.push(invoice);
    }

    sqlx::query(
        "UPDATE utility_shortfalls SET status = 'applied', applied_at = NOW() WHERE id = $1",
    )
    .bind(shortfall_id)
    .execute(&mut *tx)
    .await
    .map_err(map_db_error)?;

    tx.commit().await.map_err(map_db_error)?;

    tracing::info!(
        shortfall_id = %shortfall_id,
        house_id = %record.house_id,
        invoices = created.len(),
        "Shortfall applied as adjustment invoices"
    );
    Ok(created)
}

/// Discard a flagged shortfall that has not been billed out yet.
pub async fn delete_shortfall(pool: &PgPool, shortfall_id: Uuid) -> AppResult<()> {
    let existing: Option<(String,)> =
        sqlx::query_as("SELECT status FROM utility_shortfalls WHERE id = $1")
            .bind(shortfall_id)
            .fetch_optional(pool)
            .await
            .map_err(map_db_error)?;

    let (status,) = existing
        .ok_or_else(|| AppError::NotFound("Không tìm thấy khoản thiếu hụt.".to_string()))?;
    if status != "pending" {
        return Err(AppError::Conflict(
            "Khoản thiếu hụt đã được áp dụng, không thể xóa.".to_string(),
        ));
    }

    sqlx::query("DELETE FROM utility_shortfalls WHERE id = $1 AND status = 'pending'")
        .bind(shortfall_id)
        .execute(pool)
        .await
        .map_err(map_db_error)?;
    Ok(())
}

fn vietnamese_category(category: &str) -> &str {
    match category {
        CATEGORY_ELECTRICITY => "điện",
        CATEGORY_WATER => "nước",
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::vietnamese_category;

    #[test]
    fn category_labels() {
        assert_eq!(vietnamese_category("electricity"), "điện");
        assert_eq!(vietnamese_category("water"), "nước");
        assert_eq!(vietnamese_category("gas"), "gas");
    }
}
