use transfer_queue::{JobQueue, JobStatus, NewJob};
use tempfile::tempdir;

fn new_job(table: &str) -> NewJob {
    NewJob {
        table_name: table.to_string(),
        strategy: "merge".to_string(),
        create_missing_tables: true,
        sender_url: "http://127.0.0.1:7400".to_string(),
        session_code: "ABCDEFGH".to_string(),
        batch_size: 250,
    }
}

#[test]
fn queue_claims_in_order_and_completes() {
    let dir = tempdir().unwrap();
    let queue_path = dir.path().join("jobs.db");
    let queue = JobQueue::open(&queue_path).unwrap();

    let mut ids = Vec::new();
    for table in ["users", "posts", "comments"] {
        ids.push(queue.enqueue(&new_job(table)).unwrap());
    }

    let job = queue.claim_next().unwrap().unwrap();
    assert_eq!(job.job_id, ids[0]);
    assert_eq!(job.table_name, "users");
    assert_eq!(job.status, JobStatus::Running);
    assert_eq!(job.attempts, 1);
    assert!(job.create_missing_tables);
    assert_eq!(job.batch_size, 250);

    queue
        .complete(job.job_id, r#"{"created":3,"updated":0,"skipped":0,"errors":[]}"#)
        .unwrap();
    let done = queue.get(job.job_id).unwrap().unwrap();
    assert_eq!(done.status, JobStatus::Done);
    assert!(done.result.unwrap().contains("\"created\":3"));

    let next = queue.claim_next().unwrap().unwrap();
    assert_eq!(next.job_id, ids[1]);

    let pending = queue.list(Some(JobStatus::Pending)).unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].table_name, "comments");
    assert_eq!(queue.list(None).unwrap().len(), 3);
}

#[test]
fn failed_jobs_retry_until_max_attempts() {
    let dir = tempdir().unwrap();
    let queue = JobQueue::open(dir.path().join("jobs.db")).unwrap();
    let id = queue.enqueue(&new_job("users")).unwrap();

    let job = queue.claim_next().unwrap().unwrap();
    let status = queue.fail(job.job_id, "disconnected: reset", 2).unwrap();
    assert_eq!(status, JobStatus::Pending);

    let job = queue.claim_next().unwrap().unwrap();
    assert_eq!(job.job_id, id);
    assert_eq!(job.attempts, 2);
    let status = queue.fail(job.job_id, "disconnected: reset", 2).unwrap();
    assert_eq!(status, JobStatus::Failed);

    assert!(queue.claim_next().unwrap().is_none());
    let failed = queue.get(id).unwrap().unwrap();
    assert_eq!(failed.last_error.as_deref(), Some("disconnected: reset"));
}

#[test]
fn queue_survives_reopen_and_vacuums_finished() {
    let dir = tempdir().unwrap();
    let queue_path = dir.path().join("nested").join("jobs.db");
    let queue = JobQueue::open(&queue_path).unwrap();

    let first = queue.enqueue(&new_job("users")).unwrap();
    let second = queue.enqueue(&new_job("posts")).unwrap();
    let job = queue.claim_next().unwrap().unwrap();
    queue.complete(job.job_id, "{}").unwrap();
    queue.claim_next().unwrap().unwrap();
    drop(queue);

    // Reopen to ensure durability; the interrupted job goes back to pending.
    let queue = JobQueue::open(&queue_path).unwrap();
    assert_eq!(queue.requeue_running().unwrap(), 1);
    assert_eq!(queue.get(second).unwrap().unwrap().status, JobStatus::Pending);

    let removed = queue.vacuum_finished().unwrap();
    assert_eq!(removed, 1);
    assert!(queue.get(first).unwrap().is_none());
}

#[cfg(unix)]
#[test]
fn open_leaves_existing_directory_permissions_alone() {
    use std::os::unix::fs::PermissionsExt;

    let dir = tempdir().unwrap();
    let shared = dir.path().join("shared");
    std::fs::create_dir(&shared).unwrap();
    std::fs::set_permissions(&shared, std::fs::Permissions::from_mode(0o755)).unwrap();

    JobQueue::open(shared.join("jobs.db")).unwrap();
    let mode = std::fs::metadata(&shared).unwrap().permissions().mode() & 0o777;
    assert_eq!(mode, 0o755);

    let created = dir.path().join("fresh");
    JobQueue::open(created.join("jobs.db")).unwrap();
    let mode = std::fs::metadata(&created).unwrap().permissions().mode() & 0o777;
    assert_eq!(mode, 0o700);
}
