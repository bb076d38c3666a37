mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use common::{harness, harness_with, only, FakeFetcher, FakeRecognizer, FakeSpeech, Fakes};
use media_meter::config::FeatureFlags;
use media_meter::jobs::{JobError, JobKind, JobPayload};
use media_meter::metering::TransactionKind;

fn speak(text: &str) -> JobPayload {
    JobPayload::Synthesis {
        text: text.to_string(),
        voice: "en-US-AriaNeural".to_string(),
    }
}

#[tokio::test]
async fn synthesis_commits_one_debit_and_one_conversion() {
    let h = harness().await;
    let account = h.account("alice@example.com", 10).await;

    // 25 characters at 10 per token rounds up to 3.
    let receipt = h
        .state
        .orchestrator
        .submit_job(account, speak("The quick brown fox jumps"))
        .await
        .expect("job commits");

    assert_eq!(receipt.kind, JobKind::Synthesis);
    assert_eq!(receipt.tokens_charged, 3);
    assert_eq!(receipt.balance_after, 7);
    assert!(receipt.conversion_id.is_some());
    assert!(receipt.artifact.path.exists());
    assert_eq!(h.balance(account).await, 7);

    let entries = h.state.ledger.entries(account, 10).await.unwrap();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].id, receipt.transaction_id);
    assert_eq!(entries[0].kind, TransactionKind::Use);
    assert_eq!(entries[0].amount, -3);
    assert_eq!(entries[0].note, "Text conversion (25 characters)");
    assert_eq!(h.conversion_count(account).await, 1);
    h.assert_consistent(account).await;
}

#[tokio::test]
async fn insufficient_balance_is_rejected_before_the_engine_runs() {
    let h = harness().await;
    let account = h.account("bob@example.com", 2).await;

    let err = h
        .state
        .orchestrator
        .submit_job(account, speak("The quick brown fox jumps"))
        .await
        .unwrap_err();

    match err {
        JobError::InsufficientBalance { needed, available } => {
            assert_eq!(needed, 3);
            assert_eq!(available, 2);
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(h.fakes.speech.calls.load(Ordering::SeqCst), 0);
    assert!(h.files_in(JobKind::Synthesis).is_empty());
    assert_eq!(h.balance(account).await, 2);
    assert_eq!(h.entry_count(account).await, 1);
}

#[tokio::test]
async fn engine_failure_leaves_no_charge_and_no_file() {
    let fakes = Fakes {
        speech: Arc::new(FakeSpeech {
            fail: true,
            ..FakeSpeech::default()
        }),
        ..Fakes::default()
    };
    let h = harness_with(fakes, |_| {}).await;
    let account = h.account("carol@example.com", 10).await;

    let err = h
        .state
        .orchestrator
        .submit_job(account, speak("hello there"))
        .await
        .unwrap_err();

    assert_eq!(err.code(), "engine_error");
    assert!(!err.is_rejection());
    assert_eq!(h.fakes.speech.calls.load(Ordering::SeqCst), 1);
    assert!(h.files_in(JobKind::Synthesis).is_empty());
    assert_eq!(h.balance(account).await, 10);
    assert_eq!(h.entry_count(account).await, 1);
    assert_eq!(h.conversion_count(account).await, 0);
}

#[tokio::test]
async fn engine_panic_is_reported_as_engine_error() {
    let fakes = Fakes {
        speech: Arc::new(FakeSpeech {
            panic: true,
            ..FakeSpeech::default()
        }),
        ..Fakes::default()
    };
    let h = harness_with(fakes, |_| {}).await;
    let account = h.account("dave@example.com", 10).await;

    let err = h
        .state
        .orchestrator
        .submit_job(account, speak("hello there"))
        .await
        .unwrap_err();

    assert!(matches!(err, JobError::Engine(_)));
    assert!(h.files_in(JobKind::Synthesis).is_empty());
    assert_eq!(h.balance(account).await, 10);
}

#[tokio::test]
async fn slow_engine_times_out_without_charging() {
    let fakes = Fakes {
        speech: Arc::new(FakeSpeech {
            delay: Some(Duration::from_secs(30)),
            ..FakeSpeech::default()
        }),
        ..Fakes::default()
    };
    let h = harness_with(fakes, |config| {
        config.engine_timeout = Duration::from_millis(100);
    })
    .await;
    let account = h.account("erin@example.com", 10).await;

    let err = h
        .state
        .orchestrator
        .submit_job(account, speak("hello there"))
        .await
        .unwrap_err();

    match err {
        JobError::Engine(message) => assert!(message.contains("timed out"), "{message}"),
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(h.files_in(JobKind::Synthesis).is_empty());
    assert_eq!(h.balance(account).await, 10);
    h.assert_consistent(account).await;
}

#[tokio::test]
async fn disabled_kind_is_rejected_without_touching_the_engine() {
    let h = harness_with(
        Fakes::default(),
        only(FeatureFlags {
            synthesis: false,
            ..FeatureFlags::all()
        }),
    )
    .await;
    let account = h.account("frank@example.com", 10).await;

    let err = h
        .state
        .orchestrator
        .submit_job(account, speak("hello there"))
        .await
        .unwrap_err();

    assert!(matches!(err, JobError::FeatureDisabled(JobKind::Synthesis)));
    assert_eq!(err.code(), "feature_disabled");
    assert_eq!(h.fakes.speech.calls.load(Ordering::SeqCst), 0);
    assert_eq!(h.balance(account).await, 10);
}

#[tokio::test]
async fn unknown_voice_is_an_invalid_request() {
    let h = harness().await;
    let account = h.account("gina@example.com", 10).await;

    let err = h
        .state
        .orchestrator
        .submit_job(
            account,
            JobPayload::Synthesis {
                text: "hello".to_string(),
                voice: "xx-XX-Nobody".to_string(),
            },
        )
        .await
        .unwrap_err();

    assert!(matches!(err, JobError::InvalidRequest(_)));
    assert_eq!(h.fakes.speech.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn unknown_account_is_rejected() {
    let h = harness().await;

    let err = h
        .state
        .orchestrator
        .submit_job(4242, speak("hello"))
        .await
        .unwrap_err();

    assert!(matches!(err, JobError::AccountNotFound(4242)));
}

#[tokio::test]
async fn download_charges_a_flat_token_and_names_the_file_after_the_title() {
    let h = harness().await;
    let account = h.account("hank@example.com", 5).await;

    let receipt = h
        .state
        .orchestrator
        .submit_job(
            account,
            JobPayload::Download {
                url: "https://youtu.be/dQw4w9WgXcQ".to_string(),
            },
        )
        .await
        .expect("download commits");

    assert_eq!(receipt.tokens_charged, 1);
    assert_eq!(receipt.balance_after, 4);
    assert_eq!(receipt.conversion_id, None);
    assert_eq!(receipt.artifact.download_name, "Cats_ the movie.mp4");
    assert_eq!(h.files_in(JobKind::Download), vec![receipt.artifact.path.clone()]);

    let entries = h.state.ledger.entries(account, 1).await.unwrap();
    assert_eq!(entries[0].note, "Video download (YouTube)");
    h.assert_consistent(account).await;
}

#[tokio::test]
async fn unsupported_platform_is_rejected_before_fetching() {
    let h = harness().await;
    let account = h.account("ivy@example.com", 5).await;

    let err = h
        .state
        .orchestrator
        .submit_job(
            account,
            JobPayload::Download {
                url: "https://vimeo.com/12345".to_string(),
            },
        )
        .await
        .unwrap_err();

    assert!(matches!(err, JobError::UnsupportedPlatform(_)));
    assert_eq!(h.fakes.fetcher.calls.load(Ordering::SeqCst), 0);
    assert_eq!(h.balance(account).await, 5);
    assert_eq!(h.entry_count(account).await, 1);
}

#[tokio::test]
async fn failed_download_removes_partial_files() {
    let fakes = Fakes {
        fetcher: Arc::new(FakeFetcher {
            fail: true,
            ..FakeFetcher::default()
        }),
        ..Fakes::default()
    };
    let h = harness_with(fakes, |_| {}).await;
    let account = h.account("jack@example.com", 5).await;

    let err = h
        .state
        .orchestrator
        .submit_job(
            account,
            JobPayload::Download {
                url: "https://www.tiktok.com/@cat/video/1".to_string(),
            },
        )
        .await
        .unwrap_err();

    assert_eq!(err.code(), "engine_error");
    assert!(h.files_in(JobKind::Download).is_empty());
    assert_eq!(h.balance(account).await, 5);
}

fn stalled_download() -> Fakes {
    Fakes {
        fetcher: Arc::new(FakeFetcher {
            stall: Some(Duration::from_secs(30)),
            ..FakeFetcher::default()
        }),
        ..Fakes::default()
    }
}

fn tiktok() -> JobPayload {
    JobPayload::Download {
        url: "https://www.tiktok.com/@cat/video/2".to_string(),
    }
}

#[tokio::test]
async fn download_timeout_leaves_no_partial_files() {
    let h = harness_with(stalled_download(), |config| {
        config.engine_timeout = Duration::from_millis(100);
    })
    .await;
    let account = h.account("kate@example.com", 5).await;

    let err = h
        .state
        .orchestrator
        .submit_job(account, tiktok())
        .await
        .unwrap_err();

    match err {
        JobError::Engine(message) => assert!(message.contains("timed out"), "{message}"),
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(h.fakes.fetcher.calls.load(Ordering::SeqCst), 1);
    // Cleanup has finished by the time the error is returned.
    assert!(h.files_in(JobKind::Download).is_empty(), "{:?}", h.files_in(JobKind::Download));
    assert_eq!(h.balance(account).await, 5);
    h.assert_consistent(account).await;
}

#[tokio::test]
async fn dropped_caller_aborts_the_download_and_cleans_up() {
    let h = harness_with(stalled_download(), |_| {}).await;
    let account = h.account("liam@example.com", 5).await;

    let outcome = tokio::time::timeout(
        Duration::from_millis(100),
        h.state.orchestrator.submit_job(account, tiktok()),
    )
    .await;
    assert!(outcome.is_err(), "job should still be running");
    assert_eq!(h.fakes.fetcher.calls.load(Ordering::SeqCst), 1);

    let left = h.files_after_abort(JobKind::Download).await;
    assert!(left.is_empty(), "{left:?}");
    assert_eq!(h.balance(account).await, 5);
    assert_eq!(h.entry_count(account).await, 1);
    h.assert_consistent(account).await;
}

#[tokio::test]
async fn commit_completes_after_the_caller_is_gone() {
    let h = harness().await;
    let account = h.account("mia@example.com", 10).await;

    // Holding the account lock parks the job right before its debit.
    let lock = h.state.ledger.lock_account(account).await;
    let outcome = tokio::time::timeout(
        Duration::from_millis(200),
        h.state
            .orchestrator
            .submit_job(account, speak("The quick brown fox jumps")),
    )
    .await;
    assert!(outcome.is_err(), "job should be waiting on the lock");
    drop(lock);

    for _ in 0..50 {
        if h.conversion_count(account).await == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    // Charged and delivered together.
    assert_eq!(h.conversion_count(account).await, 1);
    assert_eq!(h.balance(account).await, 7);
    assert_eq!(h.files_in(JobKind::Synthesis).len(), 1);
    h.assert_consistent(account).await;
}

#[tokio::test]
async fn transcription_is_charged_by_duration_and_consumes_the_upload() {
    let h = harness().await;
    let account = h.account("kate@example.com", 20).await;
    let upload = h.staged_upload(account, "mp3").await;

    // 90 seconds at 10 tokens per minute.
    let receipt = h
        .state
        .orchestrator
        .submit_job(
            account,
            JobPayload::Transcription {
                upload: upload.clone(),
                language: Some("auto".to_string()),
            },
        )
        .await
        .expect("transcription commits");

    assert_eq!(receipt.tokens_charged, 15);
    assert_eq!(receipt.balance_after, 5);
    assert_eq!(receipt.artifact.language.as_deref(), Some("English"));
    assert!(!upload.exists());
    assert_eq!(
        std::fs::read_to_string(&receipt.artifact.path).unwrap(),
        "hello world"
    );
    assert_eq!(h.files_in(JobKind::Transcription), vec![receipt.artifact.path.clone()]);

    let entries = h.state.ledger.entries(account, 1).await.unwrap();
    assert_eq!(entries[0].note, "Transcription (1.5 min, English)");
    h.assert_consistent(account).await;
}

#[tokio::test]
async fn rejected_transcription_still_deletes_the_upload() {
    let h = harness().await;
    let account = h.account("liam@example.com", 3).await;
    let upload = h.staged_upload(account, "mp4").await;

    let err = h
        .state
        .orchestrator
        .submit_job(
            account,
            JobPayload::Transcription {
                upload: upload.clone(),
                language: None,
            },
        )
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        JobError::InsufficientBalance {
            needed: 15,
            available: 3
        }
    ));
    assert!(!upload.exists());
    assert_eq!(h.fakes.recognizer.calls.load(Ordering::SeqCst), 0);
    assert!(h.files_in(JobKind::Transcription).is_empty());
}

#[tokio::test]
async fn silent_upload_is_not_charged() {
    let fakes = Fakes {
        recognizer: Arc::new(FakeRecognizer::saying("  \n ")),
        ..Fakes::default()
    };
    let h = harness_with(fakes, |_| {}).await;
    let account = h.account("mia@example.com", 20).await;
    let upload = h.staged_upload(account, "mp3").await;

    let err = h
        .state
        .orchestrator
        .submit_job(
            account,
            JobPayload::Transcription {
                upload: upload.clone(),
                language: Some("en".to_string()),
            },
        )
        .await
        .unwrap_err();

    assert!(matches!(err, JobError::NoSpeechDetected));
    assert!(!upload.exists());
    assert!(h.files_in(JobKind::Transcription).is_empty());
    assert_eq!(h.balance(account).await, 20);
}

#[tokio::test]
async fn concurrent_jobs_cannot_overdraw_an_account() {
    let fakes = Fakes {
        speech: Arc::new(FakeSpeech {
            delay: Some(Duration::from_millis(50)),
            ..FakeSpeech::default()
        }),
        ..Fakes::default()
    };
    let h = harness_with(fakes, |_| {}).await;
    let account = h.account("nina@example.com", 5).await;

    let orchestrator = &h.state.orchestrator;
    let (first, second) = tokio::join!(
        orchestrator.submit_job(account, speak("The quick brown fox jumps")),
        orchestrator.submit_job(account, speak("The lazy dog sleeps all day")),
    );

    let committed = [&first, &second].iter().filter(|r| r.is_ok()).count();
    assert_eq!(committed, 1, "first: {first:?}, second: {second:?}");
    let failed = if first.is_err() { first } else { second };
    assert_eq!(failed.unwrap_err().code(), "insufficient_balance");

    assert_eq!(h.balance(account).await, 2);
    assert_eq!(h.files_in(JobKind::Synthesis).len(), 1);
    assert_eq!(h.conversion_count(account).await, 1);
    h.assert_consistent(account).await;
}
