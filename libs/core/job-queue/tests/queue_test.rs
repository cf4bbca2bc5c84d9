//! Integration tests for the queue client against a real Redis

use chrono::{TimeDelta, Utc};
use job_queue::{
    BackoffPolicy, ConnectRetry, Dequeued, ErrorRecord, Job, JobQueue, KnownQueue, QueueConfig,
    QueueError, RequeueOutcome, DEAD_LETTER_QUEUE,
};
use redis::AsyncCommands;
use serde_json::{json, Map, Value};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use test_utils::{TestDataBuilder, TestRedis};

const QUEUE: &str = "ideas:ready";

fn payload(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => panic!("payload must be a JSON object"),
    }
}

async fn queue_for(redis: &TestRedis, test_name: &str) -> JobQueue {
    let builder = TestDataBuilder::from_test_name(test_name);
    JobQueue::new(redis.connection_manager().await, builder.namespace())
}

/// Zero backoff so failed jobs can be dequeued again straight away.
async fn instant_retry_queue(redis: &TestRedis, test_name: &str) -> JobQueue {
    queue_for(redis, test_name)
        .await
        .with_backoff(BackoffPolicy::from_secs(&[0]).unwrap())
}

async fn expect_ready(queue: &JobQueue, name: &str) -> Job {
    match queue.dequeue(name, Duration::ZERO).await.unwrap() {
        Dequeued::Ready(job) => job,
        other => panic!("expected a ready job, got {:?}", other),
    }
}

mod lifecycle {
    use super::*;

    #[tokio::test]
    async fn test_third_failure_dead_letters_job() {
        let redis = TestRedis::new().await;
        let queue = instant_retry_queue(&redis, "test_third_failure_dead_letters_job").await;

        let job = queue.create_job("idea-a", payload(json!({"topic": "rust"})), None);
        assert_eq!(job.max_attempts, 3);
        queue.enqueue(QUEUE, &job).await.unwrap();

        for expected in 1..=2 {
            let mut current = expect_ready(&queue, QUEUE).await;
            let outcome = queue
                .requeue_with_backoff(QUEUE, &mut current, &format!("failure {}", expected))
                .await
                .unwrap();
            assert!(matches!(outcome, RequeueOutcome::Requeued { attempt, .. } if attempt == expected));
            assert_eq!(queue.length(QUEUE).await.unwrap(), 1);
        }

        let mut last = expect_ready(&queue, QUEUE).await;
        let outcome = queue
            .requeue_with_backoff(QUEUE, &mut last, "failure 3")
            .await
            .unwrap();
        assert_eq!(outcome, RequeueOutcome::DeadLettered { attempt: 3 });

        assert_eq!(queue.length(QUEUE).await.unwrap(), 0);
        assert!(queue.dequeue(QUEUE, Duration::ZERO).await.unwrap().is_empty());

        let dead = queue.peek(DEAD_LETTER_QUEUE, 10).await.unwrap();
        assert_eq!(dead.len(), 1);
        let dead = &dead[0];
        assert_eq!(dead.job_id, job.job_id);
        assert_eq!(dead.attempt, 3);
        assert_eq!(dead.final_error(), Some("Max attempts (3) exceeded"));
        assert_eq!(dead.error_history.len(), 4);
        assert!(matches!(
            dead.error_history.last(),
            Some(ErrorRecord::Final { origin_queue: Some(origin), .. }) if origin == QUEUE
        ));
    }

    #[tokio::test]
    async fn test_fresh_job_is_returned_immediately() {
        let redis = TestRedis::new().await;
        let queue = queue_for(&redis, "test_fresh_job_is_returned_immediately").await;

        let job = queue.create_job("idea-b", Map::new(), None);
        queue.enqueue(QUEUE, &job).await.unwrap();

        let dequeued = expect_ready(&queue, QUEUE).await;
        assert_eq!(dequeued, job);
        assert_eq!(queue.length(QUEUE).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_dequeue_is_fifo() {
        let redis = TestRedis::new().await;
        let queue = queue_for(&redis, "test_dequeue_is_fifo").await;

        let first = queue.create_job("idea-1", Map::new(), None);
        let second = queue.create_job("idea-2", Map::new(), None);
        queue.enqueue(QUEUE, &first).await.unwrap();
        queue.enqueue(QUEUE, &second).await.unwrap();

        assert_eq!(expect_ready(&queue, QUEUE).await.job_id, first.job_id);
        assert_eq!(expect_ready(&queue, QUEUE).await.job_id, second.job_id);
        assert!(queue.dequeue(QUEUE, Duration::ZERO).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_requeue_schedules_backoff() {
        let redis = TestRedis::new().await;
        let queue = queue_for(&redis, "test_requeue_schedules_backoff").await;

        let job = queue.create_job("idea-c", Map::new(), None);
        queue.enqueue(QUEUE, &job).await.unwrap();
        let mut job = expect_ready(&queue, QUEUE).await;

        let before = Utc::now();
        let outcome = queue
            .requeue_with_backoff(QUEUE, &mut job, "LLM timeout")
            .await
            .unwrap();

        let RequeueOutcome::Requeued { attempt, not_before } = outcome else {
            panic!("expected requeue, got {:?}", outcome);
        };
        assert_eq!(attempt, 1);
        assert!(not_before >= before + TimeDelta::seconds(60) - TimeDelta::milliseconds(1));
        assert!(not_before <= Utc::now() + TimeDelta::seconds(60));

        // The requeued job is pending, so dequeue pushes it back
        match queue.dequeue(QUEUE, Duration::ZERO).await.unwrap() {
            Dequeued::NotReady { job_id, not_before: nb } => {
                assert_eq!(job_id, job.job_id);
                assert_eq!(nb, not_before);
            }
            other => panic!("expected NotReady, got {:?}", other),
        }
        assert_eq!(queue.length(QUEUE).await.unwrap(), 1);

        let stored = queue.peek(QUEUE, 1).await.unwrap();
        assert_eq!(stored[0].attempt, 1);
        assert!(matches!(
            &stored[0].error_history[0],
            ErrorRecord::Attempt { attempt: 1, error, .. } if error == "LLM timeout"
        ));
    }

    #[tokio::test]
    async fn test_blocking_dequeue_times_out_on_empty_queue() {
        let redis = TestRedis::new().await;
        let queue = queue_for(&redis, "test_blocking_dequeue_times_out").await;

        let start = Instant::now();
        let result = queue.dequeue(QUEUE, Duration::from_secs(1)).await.unwrap();
        assert!(result.is_empty());
        assert!(start.elapsed() >= Duration::from_millis(900));
    }

    #[tokio::test]
    async fn test_blocking_dequeue_receives_job() {
        let redis = TestRedis::new().await;
        let queue = queue_for(&redis, "test_blocking_dequeue_receives_job").await;

        let producer = queue.clone();
        let job = queue.create_job("idea-d", Map::new(), None);
        let sent = job.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(1500)).await;
            producer.enqueue(QUEUE, &sent).await.unwrap();
        });

        let received = queue
            .dequeue(QUEUE, Duration::from_secs(5))
            .await
            .unwrap()
            .into_job()
            .expect("job should arrive before the timeout");
        assert_eq!(received.job_id, job.job_id);
    }
}

mod operations {
    use super::*;

    #[tokio::test]
    async fn test_clear_queue_returns_count() {
        let redis = TestRedis::new().await;
        let queue = queue_for(&redis, "test_clear_queue_returns_count").await;

        for i in 0..5 {
            let job = queue.create_job(format!("idea-{}", i), Map::new(), None);
            queue.enqueue(QUEUE, &job).await.unwrap();
        }

        assert_eq!(queue.clear_queue(QUEUE).await.unwrap(), 5);
        assert_eq!(queue.length(QUEUE).await.unwrap(), 0);
        assert_eq!(queue.clear_queue(QUEUE).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_peek_returns_newest_without_removing() {
        let redis = TestRedis::new().await;
        let queue = queue_for(&redis, "test_peek_returns_newest").await;

        let jobs: Vec<Job> = (0..3)
            .map(|i| queue.create_job(format!("idea-{}", i), Map::new(), None))
            .collect();
        for job in &jobs {
            queue.enqueue(QUEUE, job).await.unwrap();
        }

        let peeked = queue.peek(QUEUE, 2).await.unwrap();
        let ids: Vec<_> = peeked.iter().map(|j| j.job_id.as_str()).collect();
        assert_eq!(ids, [jobs[2].job_id.as_str(), jobs[1].job_id.as_str()]);

        assert_eq!(queue.peek(QUEUE, 0).await.unwrap().len(), 0);
        assert_eq!(queue.peek(QUEUE, 50).await.unwrap().len(), 3);
        assert_eq!(queue.length(QUEUE).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_move_to_dlq_with_and_without_reason() {
        let redis = TestRedis::new().await;
        let queue = queue_for(&redis, "test_move_to_dlq").await;

        let mut noted = queue.create_job("idea-noted", Map::new(), None);
        queue
            .move_to_dlq(&mut noted, Some("manual review"), Some("pipeline:tts"))
            .await
            .unwrap();

        let mut bare = queue.create_job("idea-bare", Map::new(), None);
        queue.move_to_dlq(&mut bare, Some("no origin"), None).await.unwrap();

        let mut silent = queue.create_job("idea-silent", Map::new(), None);
        queue.move_to_dlq(&mut silent, None, Some("pipeline:tts")).await.unwrap();

        let dead = queue.peek(DEAD_LETTER_QUEUE, 10).await.unwrap();
        assert_eq!(dead.len(), 3);
        assert_eq!(dead[0].job_id, silent.job_id);
        assert!(dead[0].error_history.is_empty());

        assert_eq!(dead[1].final_error(), Some("no origin"));
        assert!(matches!(
            dead[1].error_history.last(),
            Some(ErrorRecord::Final { origin_queue: None, .. })
        ));

        assert_eq!(dead[2].final_error(), Some("manual review"));
        assert!(matches!(
            dead[2].error_history.last(),
            Some(ErrorRecord::Final { origin_queue: Some(origin), .. }) if origin == "pipeline:tts"
        ));
    }

    #[tokio::test]
    async fn test_exhausted_job_only_enters_dead_letter_queue() {
        let redis = TestRedis::new().await;
        let queue = queue_for(&redis, "test_exhausted_job_enqueue").await;

        let mut job = queue.create_job("idea-spent", Map::new(), None);
        job.max_attempts = 0;

        let err = queue.enqueue(QUEUE, &job).await.unwrap_err();
        assert!(matches!(err, QueueError::Exhausted { attempt: 0, max_attempts: 0, .. }));
        assert_eq!(queue.length(QUEUE).await.unwrap(), 0);

        queue.enqueue(DEAD_LETTER_QUEUE, &job).await.unwrap();
        assert_eq!(queue.length(DEAD_LETTER_QUEUE).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_get_stats_reports_known_queues() {
        let redis = TestRedis::new().await;
        let queue = queue_for(&redis, "test_get_stats_reports_known_queues").await;

        let job = queue.create_job("idea-s", Map::new(), None);
        queue.enqueue(KnownQueue::PipelineTts.name(), &job).await.unwrap();
        queue.enqueue(KnownQueue::PipelineTts.name(), &job).await.unwrap();
        queue.enqueue("not:tracked", &job).await.unwrap();

        let stats = queue.get_stats().await.unwrap();
        assert_eq!(stats.len(), KnownQueue::all().count());
        assert_eq!(stats["pipeline:tts"], 2);
        assert_eq!(stats["ideas:ready"], 0);
        assert!(!stats.contains_key("not:tracked"));
    }

    #[tokio::test]
    async fn test_namespaces_are_isolated() {
        let redis = TestRedis::new().await;
        let staging = JobQueue::new(redis.connection_manager().await, "staging");
        let prod = JobQueue::new(redis.connection_manager().await, "prod");

        let job = staging.create_job("idea-ns", Map::new(), None);
        staging.enqueue(QUEUE, &job).await.unwrap();

        assert_eq!(staging.length(QUEUE).await.unwrap(), 1);
        assert_eq!(prod.length(QUEUE).await.unwrap(), 0);

        let mut conn = redis.connection();
        let raw_len: u64 = conn.llen("staging:ideas:ready").await.unwrap();
        assert_eq!(raw_len, 1);
    }

    #[tokio::test]
    async fn test_malformed_entry_is_reported_and_dropped() {
        let redis = TestRedis::new().await;
        let queue = queue_for(&redis, "test_malformed_entry").await;

        let mut conn = redis.connection();
        conn.lpush::<_, _, ()>(queue.key(QUEUE), "not json").await.unwrap();

        let err = queue.dequeue(QUEUE, Duration::ZERO).await.unwrap_err();
        assert!(matches!(err, QueueError::Malformed { queue: ref name, .. } if name == QUEUE));
        assert!(!err.is_connection_error());
        assert_eq!(queue.length(QUEUE).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_peek_skips_malformed_entries() {
        let redis = TestRedis::new().await;
        let queue = queue_for(&redis, "test_peek_skips_malformed").await;

        let job = queue.create_job("idea-ok", Map::new(), None);
        queue.enqueue(QUEUE, &job).await.unwrap();
        let mut conn = redis.connection();
        conn.lpush::<_, _, ()>(queue.key(QUEUE), "{\"broken\": true}").await.unwrap();

        let peeked = queue.peek(QUEUE, 10).await.unwrap();
        assert_eq!(peeked.len(), 1);
        assert_eq!(peeked[0].job_id, job.job_id);
    }

    #[tokio::test]
    async fn test_reads_minimal_job_documents() {
        let redis = TestRedis::new().await;
        let queue = queue_for(&redis, "test_reads_minimal_job_documents").await;

        let raw = json!({
            "job_id": "legacy-1",
            "idea_id": "idea-legacy",
            "dedupe_key": "idea-legacy_1700000000",
            "payload": {"source": "reddit"},
        });
        let mut conn = redis.connection();
        conn.lpush::<_, _, ()>(queue.key(QUEUE), raw.to_string()).await.unwrap();

        let job = expect_ready(&queue, QUEUE).await;
        assert_eq!(job.job_id, "legacy-1");
        assert_eq!(job.attempt, 0);
        assert_eq!(job.max_attempts, 3);
        assert!(job.error_history.is_empty());
    }

    #[tokio::test]
    async fn test_healthcheck() {
        let redis = TestRedis::new().await;
        let queue = queue_for(&redis, "test_healthcheck").await;
        assert!(queue.healthcheck().await);
    }
}

mod connection {
    use super::*;

    #[tokio::test]
    async fn test_connect_from_config() {
        let redis = TestRedis::new().await;
        let config = QueueConfig::new(redis.connection_string(), "cfg").with_max_attempts(5);

        let queue = JobQueue::connect(&config).await.unwrap();
        assert_eq!(queue.namespace(), "cfg");
        assert!(queue.healthcheck().await);

        let job = queue.create_job("idea-cfg", Map::new(), Some("custom".to_string()));
        assert_eq!(job.max_attempts, 5);
        assert_eq!(job.dedupe_key, "custom");

        let producer = queue.clone();
        let sent = job.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(1500)).await;
            producer.enqueue(QUEUE, &sent).await.unwrap();
        });

        let received = queue
            .dequeue(QUEUE, Duration::from_secs(5))
            .await
            .unwrap()
            .into_job()
            .expect("blocking pop should outlast the producer delay");
        assert_eq!(received.job_id, job.job_id);
    }

    #[tokio::test]
    async fn test_unreachable_broker_fails_after_three_attempts() {
        // Accepts and immediately drops every connection, counting them.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let accepted = Arc::new(AtomicU32::new(0));
        let counter = accepted.clone();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                counter.fetch_add(1, Ordering::SeqCst);
                drop(stream);
            }
        });

        let config = QueueConfig::new(format!("redis://127.0.0.1:{}", port), "ikon");

        let start = Instant::now();
        let err = match JobQueue::connect(&config).await {
            Ok(_) => panic!("connect to a broker that hangs up should fail"),
            Err(e) => e,
        };

        assert!(start.elapsed() >= Duration::from_secs(7));
        assert!(matches!(err, QueueError::Connect { attempts: 3, .. }));
        assert!(err.is_connection_error());
        assert_eq!(accepted.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_custom_retry_schedule() {
        let config = QueueConfig::new("redis://127.0.0.1:1", "ikon");
        let retry = ConnectRetry::new(2, Duration::from_millis(10));

        let err = match JobQueue::connect_with_retry(&config, &retry).await {
            Ok(_) => panic!("connect to a closed port should fail"),
            Err(e) => e,
        };
        assert!(matches!(err, QueueError::Connect { attempts: 2, .. }));
    }
}
