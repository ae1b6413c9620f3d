//! End-to-end scenarios for the coordinator over the in-memory store.

use common::{NodeInfo, TxState, Xid};
use coordinator::{
    CoordinatorError, CoordinatorService, CreateBranchTx, CreateGlobalTx, SubmitBranchState,
    SubmitGlobalState,
};
use tx_store::{InMemoryTxStore, Version};

fn service() -> CoordinatorService<InMemoryTxStore> {
    CoordinatorService::new(InMemoryTxStore::new())
}

fn creator() -> NodeInfo {
    NodeInfo::new("g1", "s1", "i1")
}

async fn create_global(
    service: &CoordinatorService<InMemoryTxStore>,
    end_branches: bool,
) -> Xid {
    service
        .create_global_tx(CreateGlobalTx {
            node: creator(),
            expire_seconds: 60,
            extra: None,
            end_branches,
        })
        .await
        .unwrap()
}

async fn create_branch(
    service: &CoordinatorService<InMemoryTxStore>,
    xid: &Xid,
) -> common::BranchTxId {
    service
        .create_branch_tx(CreateBranchTx {
            node: creator(),
            xid: xid.clone(),
            branch_service_key: "svc.process".to_string(),
            branch_compensation_service_key: "svc.cancel".to_string(),
        })
        .await
        .unwrap()
}

fn submit_branch(
    xid: &Xid,
    branch: &common::BranchTxId,
    old_state: TxState,
    old_version: i64,
    new_state: TxState,
) -> SubmitBranchState {
    SubmitBranchState {
        xid: xid.clone(),
        branch_tx_id: branch.clone(),
        old_state,
        old_version: Version::new(old_version),
        new_state,
        job_id: String::new(),
        error_reason: String::new(),
        saga_data: None,
    }
}

fn submit_global(
    xid: &Xid,
    old_state: TxState,
    old_version: i64,
    new_state: TxState,
) -> SubmitGlobalState {
    SubmitGlobalState {
        xid: xid.clone(),
        old_state,
        old_version: Version::new(old_version),
        new_state,
    }
}

#[tokio::test]
async fn created_global_tx_starts_processing_at_version_zero() {
    let service = service();
    let xid = create_global(&service, false).await;

    let detail = service.query_global_detail(&xid).await.unwrap();
    assert_eq!(detail.state, TxState::Processing);
    assert_eq!(detail.version, Version::initial());
    assert_eq!(detail.creator, creator());
    assert_eq!(detail.expire_seconds, 60);
    assert!(detail.branches.is_empty());
}

#[tokio::test]
async fn created_xids_are_unique() {
    let service = service();
    let a = create_global(&service, false).await;
    let b = create_global(&service, false).await;
    assert_ne!(a, b);
}

#[tokio::test]
async fn expire_seconds_defaults_when_not_positive() {
    let service = service();
    let xid = service
        .create_global_tx(CreateGlobalTx {
            node: creator(),
            expire_seconds: 0,
            extra: None,
            end_branches: false,
        })
        .await
        .unwrap();

    let detail = service.query_global_detail(&xid).await.unwrap();
    assert_eq!(detail.expire_seconds, 60);
}

#[tokio::test]
async fn branch_creation_requires_existing_global_tx() {
    let service = service();
    let result = service
        .create_branch_tx(CreateBranchTx {
            node: creator(),
            xid: Xid::generate(),
            branch_service_key: "svc.process".to_string(),
            branch_compensation_service_key: String::new(),
        })
        .await;
    assert!(matches!(result, Err(CoordinatorError::GlobalTxNotFound(_))));
}

#[tokio::test]
async fn branch_creation_rejects_empty_service_key() {
    let service = service();
    let xid = create_global(&service, false).await;
    let result = service
        .create_branch_tx(CreateBranchTx {
            node: creator(),
            xid,
            branch_service_key: String::new(),
            branch_compensation_service_key: String::new(),
        })
        .await;
    assert!(matches!(result, Err(CoordinatorError::InvalidArgument(_))));
}

// Scenario: create a global transaction, register one branch, query the
// detail back.
#[tokio::test]
async fn register_and_query_single_branch() {
    let service = service();
    let xid = create_global(&service, false).await;
    let branch = create_branch(&service, &xid).await;

    let detail = service.query_global_detail(&xid).await.unwrap();
    assert_eq!(detail.branches.len(), 1);
    assert_eq!(detail.branches[0].branch_tx_id, branch);
    assert_eq!(detail.branches[0].state, TxState::Processing);
    assert_eq!(detail.branches[0].branch_service_key, "svc.process");

    let branch_detail = service.query_branch_detail(&branch).await.unwrap();
    assert_eq!(branch_detail.xid, xid);
    assert_eq!(branch_detail.global_tx_state, TxState::Processing);
}

// Scenario: with end_branches set, committing the only branch commits the
// global transaction.
#[tokio::test]
async fn last_branch_commit_cascades_to_global() {
    let service = service();
    let xid = create_global(&service, true).await;
    let branch = create_branch(&service, &xid).await;

    let state = service
        .submit_branch_state(submit_branch(
            &xid,
            &branch,
            TxState::Processing,
            0,
            TxState::Committed,
        ))
        .await
        .unwrap();
    assert_eq!(state, TxState::Committed);

    let detail = service.query_global_detail(&xid).await.unwrap();
    assert_eq!(detail.state, TxState::Committed);
    assert_eq!(detail.branches[0].version, Version::new(1));
}

#[tokio::test]
async fn commit_cascade_fires_exactly_once_regardless_of_order() {
    let service = service();
    let xid = create_global(&service, true).await;
    let b1 = create_branch(&service, &xid).await;
    let b2 = create_branch(&service, &xid).await;
    let b3 = create_branch(&service, &xid).await;

    // commit in reverse registration order; only the final submission
    // sees every sibling committed
    for branch in [&b3, &b1] {
        service
            .submit_branch_state(submit_branch(
                &xid,
                branch,
                TxState::Processing,
                0,
                TxState::Committed,
            ))
            .await
            .unwrap();
        let detail = service.query_global_detail(&xid).await.unwrap();
        assert_eq!(detail.state, TxState::Processing);
    }

    service
        .submit_branch_state(submit_branch(
            &xid,
            &b2,
            TxState::Processing,
            0,
            TxState::Committed,
        ))
        .await
        .unwrap();

    let detail = service.query_global_detail(&xid).await.unwrap();
    assert_eq!(detail.state, TxState::Committed);
    assert_eq!(detail.version, Version::new(1));
}

#[tokio::test]
async fn commit_cascade_gated_on_end_branches() {
    let service = service();
    let xid = create_global(&service, false).await;
    let branch = create_branch(&service, &xid).await;

    service
        .submit_branch_state(submit_branch(
            &xid,
            &branch,
            TxState::Processing,
            0,
            TxState::Committed,
        ))
        .await
        .unwrap();

    // more branches may still be registered; the global stays open
    let detail = service.query_global_detail(&xid).await.unwrap();
    assert_eq!(detail.state, TxState::Processing);
}

// Scenario: global compensation moves live branches along; finishing all
// branches finishes the global transaction.
#[tokio::test]
async fn compensation_roundtrip_over_two_branches() {
    let service = service();
    let xid = create_global(&service, false).await;
    let b1 = create_branch(&service, &xid).await;
    let b2 = create_branch(&service, &xid).await;

    let state = service
        .submit_global_state(submit_global(
            &xid,
            TxState::Processing,
            0,
            TxState::CompensationDoing,
        ))
        .await
        .unwrap();
    assert_eq!(state, TxState::CompensationDoing);

    let detail = service.query_global_detail(&xid).await.unwrap();
    assert!(
        detail
            .branches
            .iter()
            .all(|b| b.state == TxState::CompensationDoing)
    );

    service
        .submit_branch_state(submit_branch(
            &xid,
            &b1,
            TxState::CompensationDoing,
            1,
            TxState::CompensationDone,
        ))
        .await
        .unwrap();
    let detail = service.query_global_detail(&xid).await.unwrap();
    assert_eq!(detail.state, TxState::CompensationDoing);

    service
        .submit_branch_state(submit_branch(
            &xid,
            &b2,
            TxState::CompensationDoing,
            1,
            TxState::CompensationDone,
        ))
        .await
        .unwrap();
    let detail = service.query_global_detail(&xid).await.unwrap();
    assert_eq!(detail.state, TxState::CompensationDone);
}

// Scenario: four failed compensation attempts with distinct job ids push
// the branch, and its global transaction, to COMPENSATION_FAIL.
#[tokio::test]
async fn branch_exceeding_fail_threshold_fails_the_saga() {
    let service = service();
    let xid = create_global(&service, false).await;
    let branch = create_branch(&service, &xid).await;

    service
        .submit_global_state(submit_global(
            &xid,
            TxState::Processing,
            0,
            TxState::CompensationDoing,
        ))
        .await
        .unwrap();

    let mut old_state = TxState::CompensationDoing;
    let mut old_version = 1;
    for job in ["j1", "j2", "j3", "j4"] {
        let mut req = submit_branch(
            &xid,
            &branch,
            old_state,
            old_version,
            TxState::CompensationError,
        );
        req.job_id = job.to_string();
        req.error_reason = "undo handler unreachable".to_string();
        service.submit_branch_state(req).await.unwrap();

        let detail = service.query_branch_detail(&branch).await.unwrap();
        old_state = detail.detail.state;
        old_version = detail.detail.version.as_i64();
    }

    let detail = service.query_branch_detail(&branch).await.unwrap();
    assert_eq!(detail.detail.state, TxState::CompensationFail);
    assert_eq!(detail.detail.compensation_fail_times, 4);
    assert_eq!(detail.global_tx_state, TxState::CompensationFail);
}

// Scenario: a stale submission is rejected and nothing moves.
#[tokio::test]
async fn stale_branch_submission_leaves_row_unchanged() {
    let service = service();
    let xid = create_global(&service, false).await;
    let branch = create_branch(&service, &xid).await;

    service
        .submit_branch_state(submit_branch(
            &xid,
            &branch,
            TxState::Processing,
            0,
            TxState::CompensationDoing,
        ))
        .await
        .unwrap();

    // the branch is now at version 1; an assertion of version 0 is stale
    // even though the asserted state still matches
    let result = service
        .submit_branch_state(submit_branch(
            &xid,
            &branch,
            TxState::CompensationDoing,
            0,
            TxState::CompensationDone,
        ))
        .await;
    assert!(matches!(result, Err(CoordinatorError::ResourceChanged(_))));

    let detail = service.query_branch_detail(&branch).await.unwrap();
    assert_eq!(detail.detail.state, TxState::CompensationDoing);
    assert_eq!(detail.detail.version, Version::new(1));
}

#[tokio::test]
async fn resubmitting_current_state_is_idempotent() {
    let service = service();
    let xid = create_global(&service, false).await;
    let branch = create_branch(&service, &xid).await;

    service
        .submit_branch_state(submit_branch(
            &xid,
            &branch,
            TxState::Processing,
            0,
            TxState::Committed,
        ))
        .await
        .unwrap();

    // same transition again: accepted, version untouched
    let state = service
        .submit_branch_state(submit_branch(
            &xid,
            &branch,
            TxState::Committed,
            1,
            TxState::Committed,
        ))
        .await
        .unwrap();
    assert_eq!(state, TxState::Committed);

    let detail = service.query_branch_detail(&branch).await.unwrap();
    assert_eq!(detail.detail.version, Version::new(1));
}

#[tokio::test]
async fn global_commit_is_authoritative_over_branches() {
    let service = service();
    let xid = create_global(&service, false).await;
    let b1 = create_branch(&service, &xid).await;
    let b2 = create_branch(&service, &xid).await;

    service
        .submit_global_state(submit_global(&xid, TxState::Processing, 0, TxState::Committed))
        .await
        .unwrap();

    for branch in [&b1, &b2] {
        let detail = service.query_branch_detail(branch).await.unwrap();
        assert_eq!(detail.detail.state, TxState::Committed);
        assert_eq!(detail.global_tx_state, TxState::Committed);
    }
}

#[tokio::test]
async fn unknown_ids_report_not_found() {
    let service = service();
    assert!(matches!(
        service.query_global_detail(&Xid::generate()).await,
        Err(CoordinatorError::GlobalTxNotFound(_))
    ));
    assert!(matches!(
        service
            .query_branch_detail(&common::BranchTxId::generate())
            .await,
        Err(CoordinatorError::BranchTxNotFound(_))
    ));
    assert!(matches!(
        service
            .submit_global_state(submit_global(
                &Xid::generate(),
                TxState::Processing,
                0,
                TxState::Committed
            ))
            .await,
        Err(CoordinatorError::GlobalTxNotFound(_))
    ));
}

#[tokio::test]
async fn saga_data_roundtrip_and_first_writer_wins() {
    let service = service();
    let xid = create_global(&service, false).await;

    // never initialized: empty blob at version 0
    let empty = service.get_saga_data(&xid).await.unwrap();
    assert!(empty.data.is_empty());
    assert_eq!(empty.version, Version::initial());

    service.init_saga_data(&xid, b"first").await.unwrap();
    service.init_saga_data(&xid, b"second").await.unwrap();

    let stored = service.get_saga_data(&xid).await.unwrap();
    assert_eq!(stored.data, b"first");
    assert_eq!(stored.version, Version::initial());
}

#[tokio::test]
async fn branch_submission_updates_saga_data_in_same_call() {
    let service = service();
    let xid = create_global(&service, false).await;
    let branch = create_branch(&service, &xid).await;
    service.init_saga_data(&xid, b"step=0").await.unwrap();

    let mut req = submit_branch(&xid, &branch, TxState::Processing, 0, TxState::Committed);
    req.saga_data = Some(b"step=1".to_vec());
    service.submit_branch_state(req).await.unwrap();

    let stored = service.get_saga_data(&xid).await.unwrap();
    assert_eq!(stored.data, b"step=1");
    assert_eq!(stored.version, Version::new(1));
}

#[tokio::test]
async fn list_returns_matching_xids_newest_first() {
    let service = service();
    let first = create_global(&service, false).await;
    let second = create_global(&service, false).await;
    let committed = create_global(&service, false).await;
    service
        .submit_global_state(submit_global(
            &committed,
            TxState::Processing,
            0,
            TxState::Committed,
        ))
        .await
        .unwrap();

    let listed = service
        .list_global_txs_of_states(&[TxState::Processing], 0)
        .await
        .unwrap();
    assert_eq!(listed, vec![second.clone(), first.clone()]);

    let listed = service
        .list_global_txs_of_states(&[TxState::Processing, TxState::Committed], 2)
        .await
        .unwrap();
    assert_eq!(listed, vec![committed, second]);
}
