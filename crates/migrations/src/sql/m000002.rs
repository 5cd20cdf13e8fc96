use indoc::indoc;

use super::QueueMigration;

pub const M000002_MIGRATION: QueueMigration = QueueMigration {
    name: "m000002",
    is_breaking: false,
    stmts: &[
        indoc! {r#"
            alter table :QUEUE_SCHEMA.analysis_queue
                add column locked_at timestamptz,
                add column locked_by text;
        "#},
        indoc! {r#"
            create index analysis_queue_processing_locked_at_idx
                on :QUEUE_SCHEMA.analysis_queue (locked_at)
                where status = 'processing';
        "#},
        indoc! {r#"
            create function :QUEUE_SCHEMA.tg_analysis_queue__update_timestamp() returns trigger as $$
            begin
                new.updated_at = greatest(now(), old.updated_at + interval '1 millisecond');
                return new;
            end;
            $$ language plpgsql;
        "#},
        indoc! {r#"
            create trigger _100_timestamps
                before update on :QUEUE_SCHEMA.analysis_queue
                for each row
                execute procedure :QUEUE_SCHEMA.tg_analysis_queue__update_timestamp();
        "#},
    ],
};
