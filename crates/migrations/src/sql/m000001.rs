use indoc::indoc;

use super::QueueMigration;

pub const M000001_MIGRATION: QueueMigration = QueueMigration {
    name: "m000001",
    is_breaking: false,
    stmts: &[
        indoc! {r#"
            create table :QUEUE_SCHEMA.analysis_queue (
                id uuid primary key,
                user_id uuid not null,
                analysis_type text not null
                    check (analysis_type in ('daily', 'weekly', 'monthly')),
                target_date date not null,
                week_start date,
                month_start date,
                entry_id uuid,
                status text not null default 'pending'
                    check (status in ('pending', 'processing', 'completed', 'failed')),
                attempts smallint not null default 0 check (attempts >= 0),
                max_attempts smallint not null default 3 check (max_attempts >= 1),
                next_retry_at timestamptz not null default now(),
                error_message text,
                processed_at timestamptz,
                created_at timestamptz not null default now(),
                updated_at timestamptz not null default now(),
                constraint analysis_queue_attempts_bounded check (attempts <= max_attempts),
                constraint analysis_queue_daily_has_entry
                    check (analysis_type <> 'daily' or entry_id is not null)
            );
        "#},
        indoc! {r#"
            create unique index analysis_queue_active_period_key_idx
                on :QUEUE_SCHEMA.analysis_queue (user_id, analysis_type, target_date)
                where status in ('pending', 'processing');
        "#},
        indoc! {r#"
            create index analysis_queue_due_idx
                on :QUEUE_SCHEMA.analysis_queue (next_retry_at)
                where status = 'pending';
        "#},
    ],
};
