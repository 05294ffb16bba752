mod common;

use common::*;
use sea_orm::{EntityTrait, PaginatorTrait};
use std::sync::Arc;
use std::time::Duration;
use upload_ingest::entities::{directories, stored_files, upload_sessions};
use upload_ingest::services::storage::blob_key;
use upload_ingest::services::upload::{ChunkRequest, CreateSessionRequest, UploadError};
use upload_ingest::utils::hash::calculate_hash;

async fn stored_file(env: &TestEnv, id: &str) -> stored_files::Model {
    stored_files::Entity::find_by_id(id)
        .one(&env.db)
        .await
        .unwrap()
        .expect("stored file exists")
}

async fn read_back(env: &TestEnv, file: &stored_files::Model) -> Vec<u8> {
    let key = env.service.finisher().resolve_blob_key(file).await.unwrap();
    env.storage.get_file(&key).await.unwrap()
}

#[tokio::test]
async fn test_round_trip_out_of_order() {
    let env = TestEnv::new().await;
    let data = test_data(10_000, 7);

    let created = env
        .service
        .create_session(create_request(DIR_A, "data.bin", &data, 1024))
        .await
        .unwrap();
    assert!(!created.resumed);
    assert_eq!(created.starting_block, 1);

    let order = [10, 3, 7, 1, 9, 2, 8, 4, 6, 5];
    let outcome = send_chunks(&env.service, &created.session_id, &data, 1024, &order).await;
    assert!(outcome.done);

    let file = stored_file(&env, outcome.file_id.as_deref().unwrap()).await;
    assert_eq!(file.size, data.len() as i64);
    assert_eq!(file.checksum, calculate_hash(&data));
    assert!(file.current);
    assert!(file.uses_id.is_none());
    assert_eq!(read_back(&env, &file).await, data);

    // Session resources are released
    assert_eq!(upload_sessions::Entity::find().count(&env.db).await.unwrap(), 0);
    assert!(!env.config.staging_root().join(&created.session_id).exists());
    assert!(env.service.tracker().is_empty());
    assert_eq!(env.processor.calls(), 1);
}

#[tokio::test]
async fn test_round_trip_various_chunk_sizes() {
    let env = TestEnv::new().await;

    for (i, (len, chunk)) in [(1usize, 1024usize), (1024, 1024), (1025, 1024), (4096, 1000)]
        .into_iter()
        .enumerate()
    {
        let data = test_data(len, i as u8 + 1);
        let name = format!("file-{}.bin", i);
        let created = env
            .service
            .create_session(create_request(DIR_A, &name, &data, chunk as i32))
            .await
            .unwrap();

        let count = len.div_ceil(chunk);
        let order: Vec<usize> = (1..=count).rev().collect();
        let outcome = send_chunks(&env.service, &created.session_id, &data, chunk, &order).await;
        assert!(outcome.done, "upload {} did not finish", name);

        let file = stored_file(&env, outcome.file_id.as_deref().unwrap()).await;
        assert_eq!(read_back(&env, &file).await, data);
    }
}

#[tokio::test]
async fn test_create_is_idempotent() {
    let env = TestEnv::new().await;
    let data = test_data(3000, 1);
    let req = create_request(DIR_A, "same.bin", &data, 1024);

    let first = env.service.create_session(req.clone()).await.unwrap();
    let second = env.service.create_session(req).await.unwrap();

    assert_eq!(first.session_id, second.session_id);
    assert!(!first.resumed);
    assert!(second.resumed);
    assert_eq!(upload_sessions::Entity::find().count(&env.db).await.unwrap(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_creates_share_one_session() {
    let env = TestEnv::new().await;
    let data = test_data(3000, 2);

    let mut handles = Vec::new();
    for _ in 0..8 {
        let service = env.service.clone();
        let req = create_request(DIR_A, "race.bin", &data, 1024);
        handles.push(tokio::spawn(async move { service.create_session(req).await }));
    }

    let mut ids = Vec::new();
    for handle in handles {
        ids.push(handle.await.unwrap().unwrap().session_id);
    }
    ids.dedup();
    assert_eq!(ids.len(), 1);
    assert_eq!(upload_sessions::Entity::find().count(&env.db).await.unwrap(), 1);
}

#[tokio::test]
async fn test_resume_reports_next_block() {
    let env = TestEnv::new().await;
    let data = test_data(5 * 1024, 3);
    let req = create_request(DIR_A, "resume.bin", &data, 1024);

    let created = env.service.create_session(req.clone()).await.unwrap();
    send_chunks(&env.service, &created.session_id, &data, 1024, &[1, 2]).await;

    let resumed = env.service.create_session(req).await.unwrap();
    assert_eq!(resumed.session_id, created.session_id);
    assert!(resumed.resumed);
    assert_eq!(resumed.starting_block, 3);
}

#[tokio::test]
async fn test_resume_after_restart() {
    let env = TestEnv::new().await;
    let data = test_data(4 * 1024, 4);
    let req = create_request(DIR_A, "restart.bin", &data, 1024);

    let created = env.service.create_session(req.clone()).await.unwrap();
    send_chunks(&env.service, &created.session_id, &data, 1024, &[1, 2, 3]).await;

    // Fresh tracker state, same database and staging area
    let service = env.restarted();
    let resumed = service.create_session(req).await.unwrap();
    assert_eq!(resumed.session_id, created.session_id);
    assert_eq!(resumed.starting_block, 4);

    let outcome = send_chunks(&service, &created.session_id, &data, 1024, &[4]).await;
    assert!(outcome.done);
    let file = stored_file(&env, outcome.file_id.as_deref().unwrap()).await;
    assert_eq!(read_back(&env, &file).await, data);
}

#[tokio::test]
async fn test_chunk_after_restart_rehydrates_tracker() {
    let env = TestEnv::new().await;
    let data = test_data(2 * 1024, 5);
    let created = env
        .service
        .create_session(create_request(DIR_A, "rehydrate.bin", &data, 1024))
        .await
        .unwrap();
    send_chunks(&env.service, &created.session_id, &data, 1024, &[2]).await;

    let service = env.restarted();
    let outcome = send_chunks(&service, &created.session_id, &data, 1024, &[1]).await;
    assert!(outcome.done);
}

#[tokio::test]
async fn test_duplicate_chunk_is_noop() {
    let env = TestEnv::new().await;
    let data = test_data(3 * 1024, 6);
    let created = env
        .service
        .create_session(create_request(DIR_A, "dup.bin", &data, 1024))
        .await
        .unwrap();

    send_chunks(&env.service, &created.session_id, &data, 1024, &[1, 1, 1]).await;
    let snapshot = env
        .service
        .tracker()
        .snapshot(&created.session_id)
        .await
        .unwrap();
    assert_eq!(snapshot.count_done(), 1);

    let outcome = send_chunks(&env.service, &created.session_id, &data, 1024, &[2, 2, 3]).await;
    assert!(outcome.done);
    let file = stored_file(&env, outcome.file_id.as_deref().unwrap()).await;
    assert_eq!(read_back(&env, &file).await, data);
}

#[tokio::test]
async fn test_dedup_across_directories() {
    let env = TestEnv::new().await;
    let data = test_data(2500, 8);

    let first = env
        .service
        .create_session(create_request(DIR_A, "a.bin", &data, 1024))
        .await
        .unwrap();
    let first_outcome = send_chunks(&env.service, &first.session_id, &data, 1024, &[1, 2, 3]).await;

    let second = env
        .service
        .create_session(create_request(DIR_B, "b.bin", &data, 1024))
        .await
        .unwrap();
    let second_outcome =
        send_chunks(&env.service, &second.session_id, &data, 1024, &[3, 2, 1]).await;

    let first_file = stored_file(&env, first_outcome.file_id.as_deref().unwrap()).await;
    let second_file = stored_file(&env, second_outcome.file_id.as_deref().unwrap()).await;

    assert_ne!(first_file.id, second_file.id);
    assert_eq!(second_file.uses_id.as_deref(), Some(first_file.id.as_str()));
    assert_eq!(second_file.checksum, first_file.checksum);
    assert_eq!(second_file.directory_id, DIR_B);

    // One physical blob, processed once
    assert_eq!(env.blob_count().await, 1);
    assert_eq!(env.processor.calls(), 1);
    assert_eq!(
        env.service
            .finisher()
            .resolve_blob_key(&second_file)
            .await
            .unwrap(),
        blob_key(&first_file.id)
    );
    assert_eq!(read_back(&env, &second_file).await, data);
}

#[tokio::test]
async fn test_exact_reupload_keeps_existing_file() {
    let env = TestEnv::new().await;
    let data = test_data(1500, 9);

    let mut ids = Vec::new();
    for _ in 0..2 {
        let created = env
            .service
            .create_session(create_request(DIR_A, "same.bin", &data, 1024))
            .await
            .unwrap();
        let outcome = send_chunks(&env.service, &created.session_id, &data, 1024, &[1, 2]).await;
        assert!(outcome.done);
        ids.push(outcome.file_id.unwrap());
    }

    assert_eq!(ids[0], ids[1]);
    assert_eq!(stored_files::Entity::find().count(&env.db).await.unwrap(), 1);
    assert_eq!(env.blob_count().await, 1);
    assert_eq!(upload_sessions::Entity::find().count(&env.db).await.unwrap(), 0);
}

#[tokio::test]
async fn test_new_content_becomes_next_version() {
    let env = TestEnv::new().await;
    let v1 = "first draft ".repeat(80).into_bytes();
    let v2 = "second draft ".repeat(70).into_bytes();

    let mut ids = Vec::new();
    for data in [&v1, &v2] {
        let created = env
            .service
            .create_session(create_request(DIR_A, "doc.txt", data, 1024))
            .await
            .unwrap();
        let outcome = send_chunks(&env.service, &created.session_id, data, 1024, &[1]).await;
        ids.push(outcome.file_id.unwrap());
    }

    let old = stored_file(&env, &ids[0]).await;
    let new = stored_file(&env, &ids[1]).await;
    assert!(!old.current);
    assert!(new.current);
    assert_eq!(new.parent_id.as_deref(), Some(old.id.as_str()));
    assert_eq!(new.media_type, "text/plain");
    assert_eq!(env.blob_count().await, 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_last_chunks_assemble_once() {
    let env = TestEnv::with_processor(CountingProcessor {
        delay: Some(Duration::from_millis(50)),
        ..Default::default()
    })
    .await;
    let data = test_data(8 * 512, 12);
    let created = env
        .service
        .create_session(create_request(DIR_A, "race.bin", &data, 512))
        .await
        .unwrap();

    let mut handles = Vec::new();
    for number in 1..=8 {
        let service = env.service.clone();
        let req = chunk_request(&created.session_id, &data, 512, number);
        handles.push(tokio::spawn(async move { service.accept_chunk(req).await }));
    }

    let mut done = 0;
    for handle in handles {
        let outcome = handle.await.unwrap().unwrap();
        if outcome.done {
            done += 1;
        }
    }

    assert_eq!(done, 1);
    assert_eq!(env.processor.calls(), 1);
    assert_eq!(stored_files::Entity::find().count(&env.db).await.unwrap(), 1);
    assert_eq!(env.blob_count().await, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_locks_released_after_uploads() {
    let env = TestEnv::new().await;
    let data = test_data(6 * 256, 40);

    // Same content into two directories, one addressed by path
    let by_path = CreateSessionRequest {
        directory_id: String::new(),
        directory_path: Some("imports".to_string()),
        ..create_request(DIR_A, "copy.bin", &data, 256)
    };
    let sessions = futures::future::join_all([
        env.service.create_session(create_request(DIR_A, "copy.bin", &data, 256)),
        env.service.create_session(by_path),
    ])
    .await;

    let mut handles = Vec::new();
    for created in sessions {
        let session_id = created.unwrap().session_id;
        for number in 1..=6 {
            let service = env.service.clone();
            let req = chunk_request(&session_id, &data, 256, number);
            handles.push(tokio::spawn(async move { service.accept_chunk(req).await }));
        }
    }
    let mut done = 0;
    for handle in handles {
        if handle.await.unwrap().unwrap().done {
            done += 1;
        }
    }
    assert_eq!(done, 2);
    assert_eq!(env.blob_count().await, 1);

    // An abandoned session releases its locks too
    let abandoned = env
        .service
        .create_session(create_request(DIR_B, "left.bin", &data, 256))
        .await
        .unwrap();
    send_chunks(&env.service, &abandoned.session_id, &data, 256, &[1, 2]).await;
    env.service
        .delete_session(&abandoned.session_id, OWNER)
        .await
        .unwrap();

    assert_eq!(env.service.held_locks(), 0);
}

#[tokio::test]
async fn test_size_mismatch_fails_without_stored_file() {
    let env = TestEnv::new().await;
    let req = CreateSessionRequest {
        checksum: String::new(),
        file_size: 10,
        ..create_request(DIR_A, "short.bin", &[0u8; 10], 4)
    };
    let created = env.service.create_session(req).await.unwrap();

    let chunk = |number: i32, bytes: &[u8]| ChunkRequest {
        session_id: created.session_id.clone(),
        caller: OWNER.to_string(),
        chunk_number: number,
        total_chunks: 3,
        chunk_size: bytes.len() as i64,
        total_size: 10,
        data: bytes::Bytes::copy_from_slice(bytes),
    };

    env.service.accept_chunk(chunk(1, b"aaaa")).await.unwrap();
    env.service.accept_chunk(chunk(2, b"bbbb")).await.unwrap();
    let res = env.service.accept_chunk(chunk(3, b"c")).await;

    assert!(matches!(res, Err(UploadError::Invalid(_))));
    assert_eq!(stored_files::Entity::find().count(&env.db).await.unwrap(), 0);
    assert_eq!(env.blob_count().await, 0);

    // Staged chunks survive a failed finish
    assert!(env.service.registry().find(&created.session_id).await.is_ok());
    assert!(env.config.staging_root().join(&created.session_id).join("3").exists());
}

#[tokio::test]
async fn test_checksum_mismatch_fails() {
    let env = TestEnv::new().await;
    let data = test_data(2048, 13);
    let req = CreateSessionRequest {
        checksum: calculate_hash(b"something else"),
        ..create_request(DIR_A, "bad.bin", &data, 1024)
    };
    let created = env.service.create_session(req).await.unwrap();

    env.service
        .accept_chunk(chunk_request(&created.session_id, &data, 1024, 1))
        .await
        .unwrap();
    let res = env
        .service
        .accept_chunk(chunk_request(&created.session_id, &data, 1024, 2))
        .await;

    assert!(matches!(res, Err(UploadError::Invalid(_))));
    assert_eq!(stored_files::Entity::find().count(&env.db).await.unwrap(), 0);
    assert_eq!(env.blob_count().await, 0);
}

#[tokio::test]
async fn test_report_pdf_example() {
    let env = TestEnv::new().await;
    let data = test_data(5_242_880, 14);
    let chunk_size = 2_097_152usize;

    let created = env
        .service
        .create_session(create_request(DIR_A, "report.pdf", &data, chunk_size as i32))
        .await
        .unwrap();
    assert_eq!(created.starting_block, 1);

    let session = env.service.registry().find(&created.session_id).await.unwrap();
    assert_eq!(session.chunk_count, 3);

    let first = send_chunks(&env.service, &created.session_id, &data, chunk_size, &[1]).await;
    assert!(!first.done);
    let second = send_chunks(&env.service, &created.session_id, &data, chunk_size, &[2]).await;
    assert!(!second.done);

    assert_eq!(chunk_of(&data, chunk_size, 3).len(), 1_048_576);
    let third = send_chunks(&env.service, &created.session_id, &data, chunk_size, &[3]).await;
    assert!(third.done);

    let file = stored_file(&env, third.file_id.as_deref().unwrap()).await;
    assert_eq!(file.size, 5_242_880);
    assert_eq!(file.checksum, calculate_hash(&data));
    assert_eq!(file.name, "report.pdf");
}

#[tokio::test]
async fn test_failed_finish_can_be_retried() {
    let env = TestEnv::with_flaky_storage(1).await;
    let data = test_data(2048, 15);
    let req = create_request(DIR_A, "retry.bin", &data, 1024);
    let created = env.service.create_session(req.clone()).await.unwrap();

    send_chunks(&env.service, &created.session_id, &data, 1024, &[1]).await;
    let res = env
        .service
        .accept_chunk(chunk_request(&created.session_id, &data, 1024, 2))
        .await;
    assert!(matches!(res, Err(UploadError::Internal(_))));

    // Everything is staged; the client is told nothing is missing
    let resumed = env.service.create_session(req).await.unwrap();
    assert_eq!(resumed.starting_block, 3);

    let outcome = send_chunks(&env.service, &created.session_id, &data, 1024, &[2]).await;
    assert!(outcome.done);
    let file = stored_file(&env, outcome.file_id.as_deref().unwrap()).await;
    assert_eq!(read_back(&env, &file).await, data);
}

#[tokio::test]
async fn test_zero_byte_file_finishes_on_create() {
    let env = TestEnv::new().await;
    let created = env
        .service
        .create_session(create_request(DIR_A, "empty.txt", &[], 0))
        .await
        .unwrap();

    let finished = created.finished.expect("empty upload finishes immediately");
    assert_eq!(finished.file.size, 0);
    assert_eq!(finished.file.checksum, calculate_hash(b""));
    assert_eq!(upload_sessions::Entity::find().count(&env.db).await.unwrap(), 0);
}

#[tokio::test]
async fn test_default_chunk_size() {
    let env = TestEnv::new().await;
    let data = test_data(3 * 1024 * 1024 + 1, 16);
    let created = env
        .service
        .create_session(create_request(DIR_A, "big.bin", &data, 0))
        .await
        .unwrap();

    let session = env.service.registry().find(&created.session_id).await.unwrap();
    assert_eq!(session.chunk_size, 1024 * 1024);
    assert_eq!(session.chunk_count, 4);
}

#[tokio::test]
async fn test_create_validation() {
    let env = TestEnv::new().await;
    let data = test_data(100, 17);

    let unknown_project = CreateSessionRequest {
        project_id: "nope".to_string(),
        ..create_request(DIR_A, "x.bin", &data, 0)
    };
    assert!(matches!(
        env.service.create_session(unknown_project).await,
        Err(UploadError::NotFound(_))
    ));

    let stranger = CreateSessionRequest {
        owner: STRANGER.to_string(),
        ..create_request(DIR_A, "x.bin", &data, 0)
    };
    assert!(matches!(
        env.service.create_session(stranger).await,
        Err(UploadError::NoAccess(_))
    ));

    let foreign_dir = create_request(FOREIGN_DIR, "x.bin", &data, 0);
    assert!(matches!(
        env.service.create_session(foreign_dir).await,
        Err(UploadError::Invalid(_))
    ));

    let unknown_dir = create_request("missing", "x.bin", &data, 0);
    assert!(matches!(
        env.service.create_session(unknown_dir).await,
        Err(UploadError::NotFound(_))
    ));

    let negative = CreateSessionRequest {
        file_size: -1,
        ..create_request(DIR_A, "x.bin", &data, 0)
    };
    assert!(matches!(
        env.service.create_session(negative).await,
        Err(UploadError::Invalid(_))
    ));

    let huge_chunks = create_request(DIR_A, "x.bin", &data, i32::MAX);
    assert!(matches!(
        env.service.create_session(huge_chunks).await,
        Err(UploadError::Invalid(_))
    ));

    // A project member may upload too
    let member = CreateSessionRequest {
        owner: MEMBER.to_string(),
        ..create_request(DIR_A, "x.bin", &data, 0)
    };
    assert!(env.service.create_session(member).await.is_ok());
}

#[tokio::test]
async fn test_directory_path_creates_directory() {
    let env = TestEnv::new().await;
    let data = test_data(100, 18);
    let req = CreateSessionRequest {
        directory_id: String::new(),
        directory_path: Some("project p1/reports".to_string()),
        ..create_request(DIR_A, "x.bin", &data, 0)
    };

    let first = env.service.create_session(req.clone()).await.unwrap();
    let second = env.service.create_session(req).await.unwrap();
    assert_eq!(first.session_id, second.session_id);

    let session = env.service.registry().find(&first.session_id).await.unwrap();
    assert_eq!(session.directory_name, "project p1/reports");
    assert_eq!(directories::Entity::find().count(&env.db).await.unwrap(), 4);

    let neither = CreateSessionRequest {
        directory_id: String::new(),
        ..create_request(DIR_A, "x.bin", &data, 0)
    };
    assert!(matches!(
        env.service.create_session(neither).await,
        Err(UploadError::Invalid(_))
    ));
}

#[tokio::test]
async fn test_chunk_validation() {
    let env = TestEnv::new().await;
    let data = test_data(2048, 19);
    let created = env
        .service
        .create_session(create_request(DIR_A, "v.bin", &data, 1024))
        .await
        .unwrap();

    let mut zero = chunk_request(&created.session_id, &data, 1024, 1);
    zero.chunk_number = 0;
    assert!(matches!(
        env.service.accept_chunk(zero).await,
        Err(UploadError::Invalid(_))
    ));

    let mut wrong_total = chunk_request(&created.session_id, &data, 1024, 1);
    wrong_total.total_chunks = 5;
    assert!(matches!(
        env.service.accept_chunk(wrong_total).await,
        Err(UploadError::Invalid(_))
    ));

    let mut lying_size = chunk_request(&created.session_id, &data, 1024, 1);
    lying_size.chunk_size = 1000;
    assert!(matches!(
        env.service.accept_chunk(lying_size).await,
        Err(UploadError::Invalid(_))
    ));

    let mut stranger = chunk_request(&created.session_id, &data, 1024, 1);
    stranger.caller = STRANGER.to_string();
    assert!(matches!(
        env.service.accept_chunk(stranger).await,
        Err(UploadError::NoAccess(_))
    ));

    let unknown = chunk_request("no-such-upload", &data, 1024, 1);
    assert!(matches!(
        env.service.accept_chunk(unknown).await,
        Err(UploadError::NotFound(_))
    ));

    // None of the rejected chunks were counted
    let snapshot = env
        .service
        .tracker()
        .snapshot(&created.session_id)
        .await
        .unwrap();
    assert_eq!(snapshot.count_done(), 0);
}

#[tokio::test]
async fn test_delete_session() {
    let env = TestEnv::new().await;
    let data = test_data(3072, 20);
    let created = env
        .service
        .create_session(create_request(DIR_A, "del.bin", &data, 1024))
        .await
        .unwrap();
    send_chunks(&env.service, &created.session_id, &data, 1024, &[1]).await;

    assert!(matches!(
        env.service.delete_session(&created.session_id, STRANGER).await,
        Err(UploadError::NoAccess(_))
    ));

    // Project members may abandon uploads they did not start
    env.service
        .delete_session(&created.session_id, MEMBER)
        .await
        .unwrap();

    assert!(!env.config.staging_root().join(&created.session_id).exists());
    assert!(matches!(
        env.service
            .accept_chunk(chunk_request(&created.session_id, &data, 1024, 2))
            .await,
        Err(UploadError::NotFound(_))
    ));
    assert!(!env.config.staging_root().join(&created.session_id).exists());
    assert!(matches!(
        env.service.delete_session(&created.session_id, OWNER).await,
        Err(UploadError::NotFound(_))
    ));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_delete_while_chunks_in_flight() {
    let env = TestEnv::new().await;
    let data = test_data(16 * 256, 21);
    let created = env
        .service
        .create_session(create_request(DIR_A, "inflight.bin", &data, 256))
        .await
        .unwrap();

    let mut handles = Vec::new();
    for number in 1..=15 {
        let service = env.service.clone();
        let req = chunk_request(&created.session_id, &data, 256, number);
        handles.push(tokio::spawn(async move { service.accept_chunk(req).await }));
    }
    env.service
        .delete_session(&created.session_id, OWNER)
        .await
        .unwrap();

    for handle in handles {
        match handle.await.unwrap() {
            Ok(outcome) => assert!(!outcome.done),
            Err(e) => assert!(matches!(e, UploadError::NotFound(_)), "unexpected {:?}", e),
        }
    }

    assert!(!env.config.staging_root().join(&created.session_id).exists());
    assert_eq!(upload_sessions::Entity::find().count(&env.db).await.unwrap(), 0);
    assert!(!env.service.tracker().is_loaded(&created.session_id));
}

#[tokio::test]
async fn test_list_sessions_for_project() {
    let env = TestEnv::new().await;
    let data = test_data(2048, 22);

    for (dir, name) in [(DIR_A, "one.bin"), (DIR_B, "two.bin")] {
        env.service
            .create_session(create_request(dir, name, &data, 1024))
            .await
            .unwrap();
    }

    let sessions = env.service.list_sessions(PROJECT, MEMBER).await.unwrap();
    assert_eq!(sessions.len(), 2);
    assert!(sessions.iter().all(|s| s.host == "test-host"));

    assert!(matches!(
        env.service.list_sessions(PROJECT, STRANGER).await,
        Err(UploadError::NoAccess(_))
    ));
    assert!(
        env.service
            .list_sessions(OTHER_PROJECT, "bob")
            .await
            .unwrap()
            .is_empty()
    );
}

#[tokio::test]
async fn test_services_are_independent() {
    let first = TestEnv::new().await;
    let second = TestEnv::new().await;
    let data = test_data(1024, 23);

    let created = first
        .service
        .create_session(create_request(DIR_A, "a.bin", &data, 1024))
        .await
        .unwrap();

    assert!(first.service.tracker().is_loaded(&created.session_id));
    assert!(!second.service.tracker().is_loaded(&created.session_id));
    let _ = Arc::clone(&second.service);
}
