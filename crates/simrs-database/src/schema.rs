//! 表结构
//!
//! 所有语句均可重复执行，启动时按需调用 [`create_tables`]。

use simrs_core::Result;
use sqlx::PgPool;

const TABLES: &[(&str, &str)] = &[
    (
        "patients",
        r#"
        CREATE TABLE IF NOT EXISTS patients (
            id UUID PRIMARY KEY,
            medical_record_number VARCHAR(16) UNIQUE NOT NULL,
            nik CHAR(16) UNIQUE,
            name VARCHAR(255) NOT NULL,
            sex VARCHAR(8),
            birth_date DATE,
            phone VARCHAR(32),
            address TEXT,
            created_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW(),
            updated_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW()
        )
        "#,
    ),
    (
        "medical_record_counters",
        r#"
        CREATE TABLE IF NOT EXISTS medical_record_counters (
            year INTEGER PRIMARY KEY,
            last_value BIGINT NOT NULL
        )
        "#,
    ),
    (
        "polyclinics",
        r#"
        CREATE TABLE IF NOT EXISTS polyclinics (
            id UUID PRIMARY KEY,
            code VARCHAR(6) UNIQUE NOT NULL,
            name VARCHAR(255) NOT NULL,
            is_active BOOLEAN NOT NULL DEFAULT TRUE,
            created_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW(),
            updated_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW()
        )
        "#,
    ),
    (
        "doctors",
        r#"
        CREATE TABLE IF NOT EXISTS doctors (
            id UUID PRIMARY KEY,
            name VARCHAR(255) NOT NULL,
            polyclinic_id UUID NOT NULL REFERENCES polyclinics(id),
            license_number VARCHAR(64),
            user_id UUID,
            is_active BOOLEAN NOT NULL DEFAULT TRUE,
            created_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW()
        )
        "#,
    ),
    (
        "queue_counters",
        r#"
        CREATE TABLE IF NOT EXISTS queue_counters (
            polyclinic_id UUID NOT NULL REFERENCES polyclinics(id),
            queue_date DATE NOT NULL,
            last_number INTEGER NOT NULL,
            PRIMARY KEY (polyclinic_id, queue_date)
        )
        "#,
    ),
    (
        "queue_tickets",
        r#"
        CREATE TABLE IF NOT EXISTS queue_tickets (
            id UUID PRIMARY KEY,
            polyclinic_id UUID NOT NULL REFERENCES polyclinics(id),
            patient_id UUID REFERENCES patients(id),
            doctor_id UUID REFERENCES doctors(id),
            queue_date DATE NOT NULL,
            number INTEGER NOT NULL,
            code VARCHAR(16) NOT NULL,
            status VARCHAR(16) NOT NULL DEFAULT 'waiting',
            call_count INTEGER NOT NULL DEFAULT 0,
            handled_by UUID,
            created_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW(),
            called_at TIMESTAMP WITH TIME ZONE,
            serving_at TIMESTAMP WITH TIME ZONE,
            completed_at TIMESTAMP WITH TIME ZONE,
            skipped_at TIMESTAMP WITH TIME ZONE,
            updated_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW(),
            UNIQUE (polyclinic_id, queue_date, number)
        )
        "#,
    ),
    (
        "items",
        r#"
        CREATE TABLE IF NOT EXISTS items (
            id UUID PRIMARY KEY,
            code VARCHAR(32) UNIQUE NOT NULL,
            name VARCHAR(255) NOT NULL,
            unit VARCHAR(32) NOT NULL,
            category VARCHAR(64),
            min_stock BIGINT NOT NULL DEFAULT 0 CHECK (min_stock >= 0),
            is_active BOOLEAN NOT NULL DEFAULT TRUE,
            created_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW(),
            updated_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW()
        )
        "#,
    ),
    (
        "stock_batches",
        r#"
        CREATE TABLE IF NOT EXISTS stock_batches (
            id UUID PRIMARY KEY,
            item_id UUID NOT NULL REFERENCES items(id),
            batch_no VARCHAR(64),
            quantity BIGINT NOT NULL CHECK (quantity > 0),
            remaining BIGINT NOT NULL CHECK (remaining >= 0),
            received_at TIMESTAMP WITH TIME ZONE NOT NULL,
            expires_at DATE,
            created_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW()
        )
        "#,
    ),
    (
        "stock_movements",
        r#"
        CREATE TABLE IF NOT EXISTS stock_movements (
            id UUID PRIMARY KEY,
            item_id UUID NOT NULL REFERENCES items(id),
            kind VARCHAR(16) NOT NULL,
            quantity BIGINT NOT NULL,
            balance_after BIGINT NOT NULL,
            allocations JSONB NOT NULL DEFAULT '[]',
            reference_type VARCHAR(32),
            reference_id UUID,
            note TEXT,
            actor_id UUID,
            created_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW()
        )
        "#,
    ),
    (
        "stock_opnames",
        r#"
        CREATE TABLE IF NOT EXISTS stock_opnames (
            id UUID PRIMARY KEY,
            title VARCHAR(255) NOT NULL,
            notes TEXT,
            status VARCHAR(16) NOT NULL DEFAULT 'draft',
            created_by UUID,
            created_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW(),
            started_at TIMESTAMP WITH TIME ZONE,
            completed_at TIMESTAMP WITH TIME ZONE,
            cancelled_at TIMESTAMP WITH TIME ZONE
        )
        "#,
    ),
    (
        "stock_opname_lines",
        r#"
        CREATE TABLE IF NOT EXISTS stock_opname_lines (
            opname_id UUID NOT NULL REFERENCES stock_opnames(id) ON DELETE CASCADE,
            item_id UUID NOT NULL REFERENCES items(id),
            system_quantity BIGINT,
            physical_quantity BIGINT CHECK (physical_quantity >= 0),
            difference BIGINT,
            note TEXT,
            counted_by UUID,
            counted_at TIMESTAMP WITH TIME ZONE,
            PRIMARY KEY (opname_id, item_id)
        )
        "#,
    ),
    (
        "medical_records",
        r#"
        CREATE TABLE IF NOT EXISTS medical_records (
            id UUID PRIMARY KEY,
            patient_id UUID NOT NULL REFERENCES patients(id),
            ticket_id UUID NOT NULL REFERENCES queue_tickets(id),
            doctor_id UUID REFERENCES doctors(id),
            complaint TEXT,
            diagnosis TEXT NOT NULL,
            notes TEXT,
            created_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW()
        )
        "#,
    ),
    (
        "prescriptions",
        r#"
        CREATE TABLE IF NOT EXISTS prescriptions (
            id UUID PRIMARY KEY,
            ticket_id UUID NOT NULL REFERENCES queue_tickets(id),
            medical_record_id UUID NOT NULL REFERENCES medical_records(id),
            patient_id UUID NOT NULL REFERENCES patients(id),
            doctor_id UUID REFERENCES doctors(id),
            status VARCHAR(16) NOT NULL DEFAULT 'pending',
            items JSONB NOT NULL,
            notes TEXT,
            created_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW(),
            dispensed_at TIMESTAMP WITH TIME ZONE,
            dispensed_by UUID,
            cancelled_at TIMESTAMP WITH TIME ZONE
        )
        "#,
    ),
    (
        "folders",
        r#"
        CREATE TABLE IF NOT EXISTS folders (
            id UUID PRIMARY KEY,
            name VARCHAR(255) NOT NULL,
            parent_id UUID REFERENCES folders(id),
            created_by UUID,
            created_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW(),
            updated_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW()
        )
        "#,
    ),
    (
        "documents",
        r#"
        CREATE TABLE IF NOT EXISTS documents (
            id UUID PRIMARY KEY,
            folder_id UUID REFERENCES folders(id),
            title VARCHAR(255) NOT NULL,
            file_name VARCHAR(255) NOT NULL,
            mime_type VARCHAR(128) NOT NULL,
            size_bytes BIGINT NOT NULL,
            checksum CHAR(64) NOT NULL,
            storage_key VARCHAR(512) NOT NULL,
            compressed BOOLEAN NOT NULL DEFAULT FALSE,
            owner_id UUID,
            is_public BOOLEAN NOT NULL DEFAULT FALSE,
            created_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW(),
            updated_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW()
        )
        "#,
    ),
    (
        "document_access_rules",
        r#"
        CREATE TABLE IF NOT EXISTS document_access_rules (
            id UUID PRIMARY KEY,
            scope_kind VARCHAR(16) NOT NULL,
            scope_id UUID NOT NULL,
            target_kind VARCHAR(16) NOT NULL,
            target_value VARCHAR(64) NOT NULL,
            level VARCHAR(16) NOT NULL,
            created_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW(),
            UNIQUE (scope_kind, scope_id, target_kind, target_value)
        )
        "#,
    ),
    (
        // 日志保留已删除文档的记录，不设外键
        "document_access_logs",
        r#"
        CREATE TABLE IF NOT EXISTS document_access_logs (
            id UUID PRIMARY KEY,
            document_id UUID NOT NULL,
            user_id UUID NOT NULL,
            action VARCHAR(16) NOT NULL,
            granted BOOLEAN NOT NULL,
            at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW()
        )
        "#,
    ),
    (
        "attendance",
        r#"
        CREATE TABLE IF NOT EXISTS attendance (
            id UUID PRIMARY KEY,
            user_id UUID NOT NULL,
            work_date DATE NOT NULL,
            status VARCHAR(16) NOT NULL,
            check_in_at TIMESTAMP WITH TIME ZONE,
            check_out_at TIMESTAMP WITH TIME ZONE,
            check_in_latitude DOUBLE PRECISION,
            check_in_longitude DOUBLE PRECISION,
            check_out_latitude DOUBLE PRECISION,
            check_out_longitude DOUBLE PRECISION,
            check_in_photo VARCHAR(512),
            check_out_photo VARCHAR(512),
            distance_meters DOUBLE PRECISION,
            leave_id UUID,
            created_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW(),
            updated_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW(),
            UNIQUE (user_id, work_date)
        )
        "#,
    ),
    (
        "leave_requests",
        r#"
        CREATE TABLE IF NOT EXISTS leave_requests (
            id UUID PRIMARY KEY,
            user_id UUID NOT NULL,
            kind VARCHAR(16) NOT NULL,
            start_date DATE NOT NULL,
            end_date DATE NOT NULL,
            reason TEXT,
            status VARCHAR(16) NOT NULL DEFAULT 'pending',
            reviewed_by UUID,
            reviewed_at TIMESTAMP WITH TIME ZONE,
            review_note TEXT,
            created_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW(),
            CHECK (end_date >= start_date)
        )
        "#,
    ),
    (
        "roles",
        r#"
        CREATE TABLE IF NOT EXISTS roles (
            name VARCHAR(32) PRIMARY KEY,
            description TEXT,
            is_system BOOLEAN NOT NULL DEFAULT FALSE,
            created_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW()
        )
        "#,
    ),
    (
        "users",
        r#"
        CREATE TABLE IF NOT EXISTS users (
            id UUID PRIMARY KEY,
            username VARCHAR(32) UNIQUE NOT NULL,
            full_name VARCHAR(255) NOT NULL,
            email VARCHAR(255),
            role VARCHAR(32) NOT NULL REFERENCES roles(name),
            password_hash VARCHAR(255) NOT NULL,
            is_active BOOLEAN NOT NULL DEFAULT TRUE,
            polyclinic_ids UUID[] NOT NULL DEFAULT '{}',
            doctor_id UUID,
            created_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW(),
            updated_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW(),
            last_login_at TIMESTAMP WITH TIME ZONE
        )
        "#,
    ),
    (
        "access_grants",
        r#"
        CREATE TABLE IF NOT EXISTS access_grants (
            id UUID PRIMARY KEY,
            subject_kind VARCHAR(8) NOT NULL,
            subject_value VARCHAR(64) NOT NULL,
            feature VARCHAR(128) NOT NULL,
            granted_by UUID,
            created_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW(),
            UNIQUE (subject_kind, subject_value, feature)
        )
        "#,
    ),
];

const INDEXES: &[&str] = &[
    "CREATE INDEX IF NOT EXISTS idx_patients_name ON patients(LOWER(name))",
    // 同一患者在同一科室同一天只能有一张有效号票
    "CREATE UNIQUE INDEX IF NOT EXISTS uq_queue_active_patient ON queue_tickets(polyclinic_id, queue_date, patient_id) \
     WHERE patient_id IS NOT NULL AND status IN ('waiting', 'called', 'serving')",
    "CREATE INDEX IF NOT EXISTS idx_queue_tickets_waiting ON queue_tickets(polyclinic_id, queue_date, status, number)",
    "CREATE INDEX IF NOT EXISTS idx_doctors_polyclinic ON doctors(polyclinic_id)",
    "CREATE INDEX IF NOT EXISTS idx_stock_batches_fifo ON stock_batches(item_id, received_at, created_at) WHERE remaining > 0",
    "CREATE INDEX IF NOT EXISTS idx_stock_movements_item ON stock_movements(item_id, created_at DESC)",
    "CREATE INDEX IF NOT EXISTS idx_stock_movements_reference ON stock_movements(reference_id)",
    "CREATE INDEX IF NOT EXISTS idx_prescriptions_patient ON prescriptions(patient_id, created_at DESC)",
    "CREATE INDEX IF NOT EXISTS idx_medical_records_patient ON medical_records(patient_id, created_at DESC)",
    "CREATE UNIQUE INDEX IF NOT EXISTS uq_folders_name ON folders(COALESCE(parent_id, '00000000-0000-0000-0000-000000000000'::uuid), name)",
    "CREATE INDEX IF NOT EXISTS idx_documents_folder ON documents(folder_id)",
    "CREATE INDEX IF NOT EXISTS idx_access_rules_scope ON document_access_rules(scope_kind, scope_id)",
    "CREATE INDEX IF NOT EXISTS idx_access_logs_document ON document_access_logs(document_id, at DESC)",
    "CREATE INDEX IF NOT EXISTS idx_leave_requests_user ON leave_requests(user_id, start_date)",
    "CREATE INDEX IF NOT EXISTS idx_access_grants_feature ON access_grants(feature)",
];

/// 创建数据库表和索引
pub async fn create_tables(pool: &PgPool) -> Result<()> {
    for (name, sql) in TABLES {
        sqlx::query(sql).execute(pool).await?;
        tracing::debug!("Ensured table {}", name);
    }
    for sql in INDEXES {
        sqlx::query(sql).execute(pool).await?;
    }
    tracing::info!(
        tables = TABLES.len(),
        indexes = INDEXES.len(),
        "Database schema is up to date"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_statements_are_idempotent() {
        for (name, sql) in TABLES {
            assert!(sql.contains("IF NOT EXISTS"), "{} is not idempotent", name);
            assert!(sql.contains(name), "{} statement creates another table", name);
        }
        for sql in INDEXES {
            assert!(sql.contains("IF NOT EXISTS"));
        }
    }

    #[test]
    fn test_referenced_tables_come_first() {
        let position = |name: &str| TABLES.iter().position(|(n, _)| *n == name).unwrap();
        for (index, (name, sql)) in TABLES.iter().enumerate() {
            for (other, _) in TABLES {
                if *other != *name && sql.contains(&format!("REFERENCES {}(", other)) {
                    assert!(position(other) < index, "{} references {} before it exists", name, other);
                }
            }
        }
    }
}
