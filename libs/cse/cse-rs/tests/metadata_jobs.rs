mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;

use common::*;
use cse_rs::model::errors::CseErrKind;
use cse_rs::model::metadata::{EncryptedFile, FolderMetadata, RootFolderInfo};
use cse_rs::model::symkey;
use cse_rs::service::metadata_handler::{CancelFlag, HandlerState};

fn document(original_filename: &str) -> EncryptedFile {
    EncryptedFile {
        encrypted_filename: symkey::generate_random_filename(),
        original_filename: original_filename.to_string(),
        mimetype: "text/plain".to_string(),
        content_key: symkey::generate_key().to_vec(),
        nonce: symkey::generate_nonce().to_vec(),
        tag: vec![7; 16],
    }
}

#[tokio::test]
async fn fetch_404_with_allow_empty_yields_valid_empty_model() {
    let server = Arc::new(FakeServer::default());
    server.add_folder("enc", "101");
    let cse = test_cse(server.clone(), test_account(2.0)).await;

    let mut handler = cse.metadata_handler("enc", "enc").unwrap();
    let status = handler.fetch_metadata(true).await;

    assert!(status.is_success(), "{status:?}");
    assert_eq!(handler.state(), HandlerState::Valid);
    assert!(handler.is_new_metadata_created());
    assert!(handler.folder_metadata().unwrap().files().is_empty());
}

#[tokio::test]
async fn fetch_404_without_allow_empty_is_an_error() {
    let server = Arc::new(FakeServer::default());
    server.add_folder("enc", "101");
    let cse = test_cse(server.clone(), test_account(2.0)).await;

    let mut handler = cse.metadata_handler("enc", "enc").unwrap();
    let status = handler.fetch_metadata(false).await;

    assert_eq!(status.code, 404);
    assert_eq!(handler.state(), HandlerState::Invalid);
    assert!(handler.folder_metadata().is_none());
}

#[tokio::test]
async fn upload_stores_first_then_updates() {
    let server = Arc::new(FakeServer::default());
    server.add_folder("enc", "101");
    let cse = test_cse(server.clone(), test_account(2.0)).await;

    // first write: the fetch 404'd, so the upload stores
    let mut handler = cse.metadata_handler("enc", "enc").unwrap();
    assert!(handler.fetch_metadata(true).await.is_success());
    let status = handler.upload_metadata(false).await;
    assert!(status.is_success(), "{status:?}");
    {
        let state = server.state.lock().unwrap();
        assert_eq!((state.store_calls, state.update_calls), (1, 0));
        assert!(state.locks.is_empty());
    }

    // second write: metadata exists, so the upload updates
    let mut handler = cse.metadata_handler("enc", "enc").unwrap();
    assert!(handler.fetch_metadata(true).await.is_success());
    assert!(!handler.is_new_metadata_created());
    handler
        .folder_metadata_mut()
        .unwrap()
        .add_encrypted_file(document("notes.txt"))
        .unwrap();
    assert!(handler.upload_metadata(false).await.is_success());
    {
        let state = server.state.lock().unwrap();
        assert_eq!((state.store_calls, state.update_calls), (1, 1));
        assert!(state.locks.is_empty());
    }

    let raw = server.metadata_of("101").unwrap();
    let account = test_account(2.0);
    let reparsed = FolderMetadata::parse(&account, &raw, RootFolderInfo::root()).unwrap();
    assert_eq!(reparsed.files().len(), 1);
    assert_eq!(reparsed.files()[0].original_filename, "notes.txt");
}

#[tokio::test]
async fn upload_failure_still_attempts_unlock_before_reporting() {
    let server = Arc::new(FakeServer::default());
    server.add_folder("enc", "101");
    let account = test_account(2.0);
    let mut root = FolderMetadata::empty(&account, RootFolderInfo::root()).unwrap();
    server.put_metadata("101", &root.encrypted_metadata().unwrap());
    server.state.lock().unwrap().fail_updates = true;

    let cse = test_cse(server.clone(), account).await;
    let mut handler = cse.metadata_handler("enc", "enc").unwrap();
    assert!(handler.fetch_metadata(false).await.is_success());

    let status = handler.upload_metadata(false).await;
    assert_eq!(status.code, 500);
    assert_eq!(handler.state(), HandlerState::Failed);

    let state = server.state.lock().unwrap();
    assert_eq!(state.update_calls, 1);
    assert_eq!(state.unlock_calls, 1);
    assert!(state.locks.is_empty(), "best-effort unlock must release the folder");
}

#[tokio::test]
async fn unlock_without_token_is_a_repeatable_noop() {
    let server = Arc::new(FakeServer::default());
    server.add_folder("enc", "101");
    let cse = test_cse(server.clone(), test_account(2.0)).await;

    let mut handler = cse.metadata_handler("enc", "enc").unwrap();
    assert!(handler.unlock_folder().await.is_success());
    assert!(handler.unlock_folder().await.is_success());
    assert_eq!(server.state.lock().unwrap().unlock_calls, 0);
}

#[tokio::test]
async fn keep_lock_defers_unlock_to_the_outer_orchestrator() {
    let server = Arc::new(FakeServer::default());
    server.add_folder("enc", "101");
    let cse = test_cse(server.clone(), test_account(2.0)).await;

    let mut handler = cse.metadata_handler("enc", "enc").unwrap();
    assert!(handler.fetch_metadata(true).await.is_success());
    assert!(handler.upload_metadata(true).await.is_success());

    assert!(server.is_locked("101"));
    assert!(handler.folder_token().is_some());

    assert!(handler.unlock_folder().await.is_success());
    assert!(!server.is_locked("101"));
    assert_eq!(server.state.lock().unwrap().unlock_calls, 1);
}

#[tokio::test]
async fn second_lock_on_a_locked_job_fails_fast() {
    let server = Arc::new(FakeServer::default());
    server.add_folder("enc", "101");
    let cse = test_cse(server.clone(), test_account(2.0)).await;

    let mut handler = cse.metadata_handler("enc", "enc").unwrap();
    assert!(handler.fetch_metadata(true).await.is_success());
    handler.lock_folder().await.unwrap();

    let err = handler.lock_folder().await.unwrap_err();
    assert_eq!(err.kind, CseErrKind::AlreadyLocked);
    assert_eq!(server.state.lock().unwrap().lock_calls, 1);

    assert!(handler.unlock_folder().await.is_success());
}

#[tokio::test]
async fn lock_contention_surfaces_without_retry() {
    let server = Arc::new(FakeServer::default());
    server.add_folder("enc", "101");
    server.force_lock("101", "someone-else");
    let cse = test_cse(server.clone(), test_account(2.0)).await;

    let mut handler = cse.metadata_handler("enc", "enc").unwrap();
    assert!(handler.fetch_metadata(true).await.is_success());
    let status = handler.upload_metadata(false).await;

    assert_eq!(status.code, 423);
    assert_eq!(handler.state(), HandlerState::Failed);
    let state = server.state.lock().unwrap();
    assert_eq!(state.lock_calls, 1, "no automatic retry of the lock protocol");
    assert_eq!(state.store_calls, 0);
}

#[tokio::test]
async fn cancellation_is_checked_between_steps() {
    let server = Arc::new(FakeServer::default());
    server.add_folder("enc", "101");
    let cse = test_cse(server.clone(), test_account(2.0)).await;

    let cancel = CancelFlag::default();
    cancel.store(true, Ordering::SeqCst);
    let mut handler = cse
        .metadata_handler("enc", "enc")
        .unwrap()
        .with_cancel_flag(cancel);

    let status = handler.fetch_metadata(true).await;
    assert!(!status.is_success());
    assert_eq!(handler.state(), HandlerState::Invalid);
    assert_eq!(server.state.lock().unwrap().lock_calls, 0);
}

#[tokio::test]
async fn nested_folder_inherits_the_root_key_chain() {
    let account = test_account(2.0);
    let mut root = FolderMetadata::empty(&account, RootFolderInfo::root()).unwrap();
    let root_raw = root.encrypted_metadata().unwrap();

    let nested_info = RootFolderInfo::for_nested(
        "enc",
        root.key_for_encryption().unwrap(),
        root.key_for_decryption().unwrap(),
        root.key_checksums().clone(),
    );
    let mut nested = FolderMetadata::empty(&account, nested_info).unwrap();
    nested.add_encrypted_file(document("inner.txt")).unwrap();
    let nested_raw = nested.encrypted_metadata().unwrap();

    let server = Arc::new(FakeServer::default());
    server.add_folder("enc", "101");
    server.add_folder("enc/sub", "102");
    server.put_metadata("101", &root_raw);
    server.put_metadata("102", &nested_raw);

    let cse = test_cse(server.clone(), account).await;
    let mut handler = cse.metadata_handler("enc/sub", "enc").unwrap();
    let status = handler.fetch_metadata(false).await;

    assert!(status.is_success(), "{status:?}");
    let metadata = handler.folder_metadata().unwrap();
    assert!(!metadata.is_root());
    assert_eq!(metadata.users().count(), 0);
    assert_eq!(metadata.files().len(), 1);
    assert_eq!(metadata.files()[0].original_filename, "inner.txt");
}

#[tokio::test]
async fn encrypt_folder_stores_empty_metadata_and_unlocks() {
    let server = Arc::new(FakeServer::default());
    server.add_folder("plain", "200");
    let cse = test_cse(server.clone(), test_account(2.0)).await;

    let status = cse.encrypt_folder("plain").await;
    assert!(status.is_success(), "{status:?}");

    {
        let state = server.state.lock().unwrap();
        assert!(state.encrypted_flags.contains("200"));
        assert_eq!(state.store_calls, 1);
        assert!(state.locks.is_empty());
    }

    let record = cse.journal.file_record("plain").unwrap().unwrap();
    assert!(record.is_top_level_e2ee);

    let raw = server.metadata_of("200").unwrap();
    let account = test_account(2.0);
    let reparsed = FolderMetadata::parse(&account, &raw, RootFolderInfo::root()).unwrap();
    assert_eq!(reparsed.users().count(), 1);
    assert!(reparsed.files().is_empty());
}
