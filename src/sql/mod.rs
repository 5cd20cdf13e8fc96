pub mod claim_job;
pub mod eligibility;
pub mod get_due_jobs;
pub mod insert_job;
pub mod release_job;
pub mod release_stale_claims;
pub mod timezone;
pub mod users;
