//! Embedded ledger schema
//!
//! Each migration is a list of single statements; function bodies contain semicolons, so
//! statements are kept apart instead of splitting one script.

use super::migration::SqlMigration;

pub const CREATE_LEDGER_SCHEMA: SqlMigration = SqlMigration {
    version: 20250101000001,
    name: "create_ledger_schema",
    up: &[
        r#"
        CREATE TABLE account_categories (
            id BIGSERIAL PRIMARY KEY,
            code VARCHAR(32) NOT NULL UNIQUE,
            name VARCHAR(255) NOT NULL,
            account_type VARCHAR(16) NOT NULL
                CHECK (account_type IN ('debit_normal', 'credit_normal'))
        )
        "#,
        r#"
        CREATE TABLE accounts (
            id BIGSERIAL PRIMARY KEY,
            account_code VARCHAR(32) NOT NULL UNIQUE,
            name VARCHAR(255) NOT NULL,
            category_id BIGINT NOT NULL REFERENCES account_categories (id),
            current_balance NUMERIC(19, 2) NOT NULL DEFAULT 0,
            is_active BOOLEAN NOT NULL DEFAULT TRUE,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )
        "#,
        r#"
        CREATE TABLE fiscal_periods (
            id BIGSERIAL PRIMARY KEY,
            name VARCHAR(64) NOT NULL UNIQUE,
            start_date DATE NOT NULL,
            end_date DATE NOT NULL,
            status VARCHAR(16) NOT NULL DEFAULT 'open'
                CHECK (status IN ('open', 'closed', 'locked')),
            closed_at TIMESTAMPTZ,
            closed_by UUID,
            locked_at TIMESTAMPTZ,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            CONSTRAINT fiscal_periods_range CHECK (start_date < end_date),
            CONSTRAINT fiscal_periods_no_overlap
                EXCLUDE USING gist (daterange(start_date, end_date, '[]') WITH &&)
        )
        "#,
        "CREATE SEQUENCE journal_number_seq",
        r#"
        CREATE TABLE journal_entries (
            id BIGSERIAL PRIMARY KEY,
            journal_number VARCHAR(32) NOT NULL UNIQUE,
            entry_date DATE NOT NULL,
            entry_type VARCHAR(16) NOT NULL CHECK (entry_type IN ('manual', 'system')),
            source_type VARCHAR(64),
            source_id BIGINT,
            event_type VARCHAR(64),
            description TEXT NOT NULL DEFAULT '',
            total_debit NUMERIC(19, 2) NOT NULL,
            total_credit NUMERIC(19, 2) NOT NULL,
            is_posted BOOLEAN NOT NULL DEFAULT FALSE,
            posted_at TIMESTAMPTZ,
            reverses_entry_id BIGINT REFERENCES journal_entries (id),
            created_by UUID,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            CONSTRAINT journal_entries_balanced CHECK (total_debit = total_credit),
            CONSTRAINT journal_entries_source_complete CHECK (
                (source_type IS NULL) = (source_id IS NULL)
                AND (source_id IS NULL) = (event_type IS NULL)
            ),
            CONSTRAINT journal_entries_source_key UNIQUE (source_type, source_id, event_type)
        )
        "#,
        r#"
        CREATE TABLE journal_lines (
            id BIGSERIAL PRIMARY KEY,
            journal_entry_id BIGINT NOT NULL REFERENCES journal_entries (id) ON DELETE CASCADE,
            line_number INTEGER NOT NULL,
            account_id BIGINT NOT NULL REFERENCES accounts (id),
            debit NUMERIC(19, 2) NOT NULL DEFAULT 0,
            credit NUMERIC(19, 2) NOT NULL DEFAULT 0,
            description TEXT,
            CONSTRAINT journal_lines_non_negative CHECK (debit >= 0 AND credit >= 0),
            CONSTRAINT journal_lines_single_side CHECK ((debit = 0) <> (credit = 0)),
            CONSTRAINT journal_lines_position UNIQUE (journal_entry_id, line_number)
        )
        "#,
        "CREATE INDEX idx_journal_lines_account ON journal_lines (account_id)",
        r#"
        CREATE TABLE account_mappings (
            key VARCHAR(32) PRIMARY KEY CHECK (key IN (
                'cash', 'bank', 'ar', 'ap', 'sales', 'expense',
                'vat_payable', 'vat_receivable', 'opening_equity'
            )),
            account_id BIGINT NOT NULL REFERENCES accounts (id),
            is_active BOOLEAN NOT NULL DEFAULT TRUE,
            updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )
        "#,
        r#"
        CREATE TABLE journal_failures (
            id BIGSERIAL PRIMARY KEY,
            source_type VARCHAR(64) NOT NULL,
            source_id BIGINT NOT NULL,
            event_type VARCHAR(64) NOT NULL,
            attempts INTEGER NOT NULL DEFAULT 1 CHECK (attempts > 0),
            last_error TEXT NOT NULL,
            last_attempt_at TIMESTAMPTZ NOT NULL,
            resolved_at TIMESTAMPTZ,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            CONSTRAINT journal_failures_source_key UNIQUE (source_type, source_id, event_type)
        )
        "#,
        "CREATE INDEX idx_journal_failures_unresolved ON journal_failures (last_attempt_at) WHERE resolved_at IS NULL",
        r#"
        CREATE TABLE z_reports (
            id BIGSERIAL PRIMARY KEY,
            session_id BIGINT NOT NULL UNIQUE,
            business_date DATE NOT NULL,
            closed_at TIMESTAMPTZ NOT NULL,
            gross_sales NUMERIC(19, 2) NOT NULL,
            discounts NUMERIC(19, 2) NOT NULL,
            net_sales NUMERIC(19, 2) NOT NULL,
            vat_amount NUMERIC(19, 2) NOT NULL,
            cash_total NUMERIC(19, 2) NOT NULL,
            card_total NUMERIC(19, 2) NOT NULL,
            on_account_total NUMERIC(19, 2) NOT NULL,
            sale_count INTEGER NOT NULL,
            journal_entry_id BIGINT REFERENCES journal_entries (id),
            journal_posted_at TIMESTAMPTZ,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )
        "#,
        r#"
        CREATE FUNCTION ledgerguard_guard_posted_entry() RETURNS trigger AS $$
        BEGIN
            IF TG_OP = 'DELETE' THEN
                IF OLD.is_posted THEN
                    RAISE EXCEPTION 'journal entry % is posted and cannot be deleted', OLD.id
                        USING ERRCODE = 'check_violation';
                END IF;
                RETURN OLD;
            END IF;
            IF OLD.is_posted THEN
                RAISE EXCEPTION 'journal entry % is posted and cannot be modified', OLD.id
                    USING ERRCODE = 'check_violation';
            END IF;
            IF NEW.is_posted AND (
                (SELECT COALESCE(SUM(debit), 0) FROM journal_lines WHERE journal_entry_id = NEW.id) <> NEW.total_debit
                OR (SELECT COALESCE(SUM(credit), 0) FROM journal_lines WHERE journal_entry_id = NEW.id) <> NEW.total_credit
            ) THEN
                RAISE EXCEPTION 'journal entry % lines do not match its totals', NEW.id
                    USING ERRCODE = 'check_violation';
            END IF;
            RETURN NEW;
        END;
        $$ LANGUAGE plpgsql
        "#,
        r#"
        CREATE TRIGGER journal_entries_posted_guard
            BEFORE UPDATE OR DELETE ON journal_entries
            FOR EACH ROW EXECUTE FUNCTION ledgerguard_guard_posted_entry()
        "#,
        r#"
        CREATE FUNCTION ledgerguard_guard_posted_lines() RETURNS trigger AS $$
        DECLARE
            parent_id BIGINT;
        BEGIN
            IF TG_OP = 'INSERT' THEN
                parent_id := NEW.journal_entry_id;
            ELSE
                parent_id := OLD.journal_entry_id;
            END IF;
            IF EXISTS (SELECT 1 FROM journal_entries WHERE id = parent_id AND is_posted) THEN
                RAISE EXCEPTION 'lines of posted journal entry % cannot change', parent_id
                    USING ERRCODE = 'check_violation';
            END IF;
            IF TG_OP = 'DELETE' THEN
                RETURN OLD;
            END IF;
            RETURN NEW;
        END;
        $$ LANGUAGE plpgsql
        "#,
        r#"
        CREATE TRIGGER journal_lines_posted_guard
            BEFORE INSERT OR UPDATE OR DELETE ON journal_lines
            FOR EACH ROW EXECUTE FUNCTION ledgerguard_guard_posted_lines()
        "#,
    ],
    down: &[
        "DROP TABLE IF EXISTS z_reports",
        "DROP TABLE IF EXISTS journal_failures",
        "DROP TABLE IF EXISTS account_mappings",
        "DROP TABLE IF EXISTS journal_lines",
        "DROP TABLE IF EXISTS journal_entries",
        "DROP FUNCTION IF EXISTS ledgerguard_guard_posted_lines()",
        "DROP FUNCTION IF EXISTS ledgerguard_guard_posted_entry()",
        "DROP SEQUENCE IF EXISTS journal_number_seq",
        "DROP TABLE IF EXISTS fiscal_periods",
        "DROP TABLE IF EXISTS accounts",
        "DROP TABLE IF EXISTS account_categories",
    ],
};

/// Every embedded migration, oldest first.
pub fn embedded() -> Vec<SqlMigration> {
    vec![CREATE_LEDGER_SCHEMA]
}
