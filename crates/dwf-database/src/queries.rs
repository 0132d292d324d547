//! 数据库查询操作

use async_trait::async_trait;
use dwf_core::{models::*, DwfError, Result, WorkflowStore, WorklistFilter};

use crate::connection::DatabasePool;
use crate::models::*;

/// 建表语句，标识与文本列一律使用 TEXT（UID列表、HL7原文长度不定）
const TABLES: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS messages (
        message_id TEXT PRIMARY KEY,
        message_type TEXT NOT NULL,
        payload TEXT NOT NULL,
        source TEXT,
        destination TEXT,
        correlation_id TEXT,
        status TEXT NOT NULL DEFAULT 'received',
        received_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW()
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS instance_availability_notifications (
        ian_id TEXT PRIMARY KEY,
        source TEXT,
        sop_instance_uids TEXT NOT NULL DEFAULT '',
        availability_status TEXT NOT NULL,
        timestamp TIMESTAMP WITH TIME ZONE NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS sop_instances (
        sop_uid TEXT PRIMARY KEY,
        stored_at_aet TEXT,
        patient_id TEXT,
        accession_number TEXT,
        created_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW()
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS performed_procedure_steps (
        pps_uid TEXT PRIMARY KEY,
        sps TEXT,
        rp TEXT,
        actor TEXT,
        status TEXT NOT NULL,
        instance_uids TEXT NOT NULL DEFAULT '',
        created_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW()
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS scheduled_procedure_steps (
        sps_uid TEXT PRIMARY KEY,
        status TEXT NOT NULL DEFAULT 'Scheduled'
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS unified_procedure_steps (
        ups_id TEXT PRIMARY KEY,
        rp TEXT,
        ups_status TEXT NOT NULL,
        actor TEXT,
        instance_uids TEXT NOT NULL DEFAULT '',
        start_time TIMESTAMP WITH TIME ZONE,
        end_time TIMESTAMP WITH TIME ZONE,
        created_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW()
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS worklist_items (
        name TEXT PRIMARY KEY,
        worklist_id TEXT NOT NULL,
        rp TEXT,
        assigned_to TEXT,
        worklist_manager TEXT,
        status TEXT NOT NULL,
        partial_data_flag BOOLEAN NOT NULL DEFAULT FALSE
    )
    "#,
];

/// 基于PostgreSQL的工作流存储
#[derive(Clone)]
pub struct PgStore {
    pool: DatabasePool,
}

/// 插入失败时区分唯一键冲突与其它数据库错误
fn map_insert_error(entity: &str, key: &str, e: sqlx::Error) -> DwfError {
    if let Some(db_err) = e.as_database_error() {
        if db_err.is_unique_violation() {
            return DwfError::Conflict(format!("{} {}", entity, key));
        }
    }
    DwfError::Database(e.to_string())
}

fn db_error(e: sqlx::Error) -> DwfError {
    DwfError::Database(e.to_string())
}

impl PgStore {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }

    /// 创建数据库表
    pub async fn create_tables(&self) -> Result<()> {
        let pool = self.pool.pool();

        for sql in TABLES {
            sqlx::query(sql).execute(pool).await.map_err(db_error)?;
        }

        self.create_indexes().await?;

        tracing::info!("Database tables created successfully");
        Ok(())
    }

    /// 创建数据库索引
    async fn create_indexes(&self) -> Result<()> {
        let pool = self.pool.pool();

        let indexes = [
            "CREATE INDEX IF NOT EXISTS idx_messages_correlation_id ON messages(correlation_id)",
            "CREATE INDEX IF NOT EXISTS idx_pps_sps ON performed_procedure_steps(sps)",
            "CREATE INDEX IF NOT EXISTS idx_worklist_manager ON worklist_items(worklist_manager)",
            "CREATE INDEX IF NOT EXISTS idx_worklist_assigned_to ON worklist_items(assigned_to)",
        ];

        for index_sql in indexes {
            sqlx::query(index_sql).execute(pool).await.map_err(db_error)?;
        }

        tracing::info!("Database indexes created successfully");
        Ok(())
    }
}

#[async_trait]
impl WorkflowStore for PgStore {
    // ========== 入站消息 ==========

    async fn find_message(&self, message_id: &str) -> Result<Option<MessageRecord>> {
        let row = sqlx::query_as::<_, DbMessage>(
            "SELECT message_id, message_type, payload, source, destination, correlation_id, status, received_at \
             FROM messages WHERE message_id = $1",
        )
        .bind(message_id)
        .fetch_optional(self.pool.pool())
        .await
        .map_err(db_error)?;

        Ok(row.map(MessageRecord::from))
    }

    async fn insert_message(&self, message: &MessageRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO messages (message_id, message_type, payload, source, destination, correlation_id, status, received_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(&message.message_id)
        .bind(&message.message_type)
        .bind(&message.payload)
        .bind(&message.source)
        .bind(&message.destination)
        .bind(&message.correlation_id)
        .bind(message.status.as_str())
        .bind(message.received_at)
        .execute(self.pool.pool())
        .await
        .map_err(|e| map_insert_error("message", &message.message_id, e))?;

        Ok(())
    }

    // ========== IAN ==========

    async fn find_ian(&self, ian_id: &str) -> Result<Option<InstanceAvailabilityNotification>> {
        let row = sqlx::query_as::<_, DbIan>(
            "SELECT ian_id, source, sop_instance_uids, availability_status, timestamp \
             FROM instance_availability_notifications WHERE ian_id = $1",
        )
        .bind(ian_id)
        .fetch_optional(self.pool.pool())
        .await
        .map_err(db_error)?;

        Ok(row.map(Into::into))
    }

    async fn insert_ian(&self, ian: &InstanceAvailabilityNotification) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO instance_availability_notifications (ian_id, source, sop_instance_uids, availability_status, timestamp)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(&ian.ian_id)
        .bind(&ian.source)
        .bind(&ian.sop_instance_uids)
        .bind(&ian.availability_status)
        .bind(ian.timestamp)
        .execute(self.pool.pool())
        .await
        .map_err(|e| map_insert_error("IAN", &ian.ian_id, e))?;

        Ok(())
    }

    // ========== SOP实例 ==========

    async fn find_sop_instance(&self, sop_uid: &str) -> Result<Option<SopInstance>> {
        let row = sqlx::query_as::<_, DbSopInstance>(
            "SELECT sop_uid, stored_at_aet, patient_id, accession_number, created_at \
             FROM sop_instances WHERE sop_uid = $1",
        )
        .bind(sop_uid)
        .fetch_optional(self.pool.pool())
        .await
        .map_err(db_error)?;

        Ok(row.map(Into::into))
    }

    async fn insert_sop_instance(&self, instance: &SopInstance) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO sop_instances (sop_uid, stored_at_aet, patient_id, accession_number, created_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(&instance.sop_uid)
        .bind(&instance.stored_at_aet)
        .bind(&instance.patient_id)
        .bind(&instance.accession_number)
        .bind(instance.created_at)
        .execute(self.pool.pool())
        .await
        .map_err(|e| map_insert_error("SOP instance", &instance.sop_uid, e))?;

        Ok(())
    }

    // ========== PPS ==========

    async fn find_pps(&self, pps_uid: &str) -> Result<Option<PerformedProcedureStep>> {
        let row = sqlx::query_as::<_, DbPps>(
            "SELECT pps_uid, sps, rp, actor, status, instance_uids, created_at \
             FROM performed_procedure_steps WHERE pps_uid = $1",
        )
        .bind(pps_uid)
        .fetch_optional(self.pool.pool())
        .await
        .map_err(db_error)?;

        Ok(row.map(Into::into))
    }

    async fn insert_pps(&self, pps: &PerformedProcedureStep) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO performed_procedure_steps (pps_uid, sps, rp, actor, status, instance_uids, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(&pps.pps_uid)
        .bind(&pps.sps)
        .bind(&pps.rp)
        .bind(&pps.actor)
        .bind(pps.status.as_str())
        .bind(&pps.instance_uids)
        .bind(pps.created_at)
        .execute(self.pool.pool())
        .await
        .map_err(|e| map_insert_error("PPS", &pps.pps_uid, e))?;

        Ok(())
    }

    // ========== SPS ==========

    async fn find_sps(&self, sps_uid: &str) -> Result<Option<ScheduledProcedureStep>> {
        let row = sqlx::query_as::<_, DbSps>(
            "SELECT sps_uid, status FROM scheduled_procedure_steps WHERE sps_uid = $1",
        )
        .bind(sps_uid)
        .fetch_optional(self.pool.pool())
        .await
        .map_err(db_error)?;

        Ok(row.map(Into::into))
    }

    async fn insert_sps(&self, sps: &ScheduledProcedureStep) -> Result<()> {
        sqlx::query("INSERT INTO scheduled_procedure_steps (sps_uid, status) VALUES ($1, $2)")
            .bind(&sps.sps_uid)
            .bind(sps.status.as_str())
            .execute(self.pool.pool())
            .await
            .map_err(|e| map_insert_error("SPS", &sps.sps_uid, e))?;

        Ok(())
    }

    async fn update_sps_status(&self, sps_uid: &str, status: &SpsStatus) -> Result<()> {
        let result = sqlx::query("UPDATE scheduled_procedure_steps SET status = $2 WHERE sps_uid = $1")
            .bind(sps_uid)
            .bind(status.as_str())
            .execute(self.pool.pool())
            .await
            .map_err(db_error)?;

        if result.rows_affected() == 0 {
            return Err(DwfError::NotFound(format!("SPS {}", sps_uid)));
        }
        Ok(())
    }

    // ========== UPS ==========

    async fn find_ups(&self, ups_id: &str) -> Result<Option<UnifiedProcedureStep>> {
        let row = sqlx::query_as::<_, DbUps>(
            "SELECT ups_id, rp, ups_status, actor, instance_uids, start_time, end_time, created_at \
             FROM unified_procedure_steps WHERE ups_id = $1",
        )
        .bind(ups_id)
        .fetch_optional(self.pool.pool())
        .await
        .map_err(db_error)?;

        Ok(row.map(Into::into))
    }

    async fn insert_ups(&self, ups: &UnifiedProcedureStep) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO unified_procedure_steps (ups_id, rp, ups_status, actor, instance_uids, start_time, end_time, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(&ups.ups_id)
        .bind(&ups.rp)
        .bind(ups.ups_status.as_str())
        .bind(&ups.actor)
        .bind(&ups.instance_uids)
        .bind(ups.start_time)
        .bind(ups.end_time)
        .bind(ups.created_at)
        .execute(self.pool.pool())
        .await
        .map_err(|e| map_insert_error("UPS", &ups.ups_id, e))?;

        Ok(())
    }

    async fn update_ups(&self, ups: &UnifiedProcedureStep, expected: &UpsStatus) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE unified_procedure_steps
            SET rp = $2, ups_status = $3, actor = $4, instance_uids = $5, start_time = $6, end_time = $7
            WHERE ups_id = $1 AND ups_status = $8
            "#,
        )
        .bind(&ups.ups_id)
        .bind(&ups.rp)
        .bind(ups.ups_status.as_str())
        .bind(&ups.actor)
        .bind(&ups.instance_uids)
        .bind(ups.start_time)
        .bind(ups.end_time)
        .bind(expected.as_str())
        .execute(self.pool.pool())
        .await
        .map_err(db_error)?;

        if result.rows_affected() > 0 {
            return Ok(());
        }

        // 未命中：记录不存在，或状态已被并发修改
        match self.find_ups(&ups.ups_id).await? {
            None => Err(DwfError::NotFound(format!("UPS {}", ups.ups_id))),
            Some(current) => Err(DwfError::InvalidStateTransition {
                from: current.ups_status.to_string(),
                event: ups.ups_status.to_string(),
            }),
        }
    }

    // ========== 工作列表 ==========

    async fn list_worklist_items(&self, filter: &WorklistFilter) -> Result<Vec<WorklistItem>> {
        let rows = sqlx::query_as::<_, DbWorklistItem>(
            r#"
            SELECT name, worklist_id, rp, assigned_to, worklist_manager, status, partial_data_flag
            FROM worklist_items
            WHERE ($1::text IS NULL OR worklist_manager = $1)
              AND ($2::text IS NULL OR assigned_to = $2)
            ORDER BY worklist_id, name
            "#,
        )
        .bind(&filter.manager)
        .bind(&filter.user)
        .fetch_all(self.pool.pool())
        .await
        .map_err(db_error)?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn insert_worklist_item(&self, item: &WorklistItem) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO worklist_items (name, worklist_id, rp, assigned_to, worklist_manager, status, partial_data_flag)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(&item.name)
        .bind(&item.worklist_id)
        .bind(&item.rp)
        .bind(&item.assigned_to)
        .bind(&item.worklist_manager)
        .bind(&item.status)
        .bind(item.partial_data_flag)
        .execute(self.pool.pool())
        .await
        .map_err(|e| map_insert_error("worklist item", &item.name, e))?;

        Ok(())
    }

    async fn clear_partial_data_flag(&self, name: &str) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE worklist_items SET partial_data_flag = FALSE WHERE name = $1 AND partial_data_flag = TRUE",
        )
        .bind(name)
        .execute(self.pool.pool())
        .await
        .map_err(db_error)?;

        Ok(result.rows_affected() > 0)
    }
}
