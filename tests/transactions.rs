//! Simple withdrawals against the scripted chain: nonces, building,
//! submission, timeouts and replacement.

use alloy::primitives::U256;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use withdrawal_orchestrator::blockchain::{
    BlockchainError, FeeParams, NonceManager, ReconcileOutcome, TxStatus,
};
use withdrawal_orchestrator::withdrawals::{JobStore, WithdrawalError, WithdrawalRequest};

mod common;
use common::{destination, eth, source, JsonSigner, MockChain};

fn transfer(amount: &str, wait: bool) -> WithdrawalRequest {
    WithdrawalRequest {
        from: source().to_string(),
        to: destination().to_string(),
        amount_eth: amount.to_string(),
        nonce: None,
        wait_for_confirmation: wait,
        timeout: None,
    }
}

#[tokio::test]
async fn test_concurrent_nonces_are_distinct_and_contiguous() {
    let chain = MockChain::new();
    chain.set_nonce(source(), 40);
    let nonces = Arc::new(NonceManager::new(chain.clone()));

    let mut handles = Vec::new();
    for _ in 0..16 {
        let nonces = nonces.clone();
        handles.push(tokio::spawn(async move { nonces.next_nonce(source()).await.unwrap() }));
    }

    let mut issued = HashSet::new();
    for handle in handles {
        assert!(issued.insert(handle.await.unwrap()), "nonce issued twice");
    }
    let expected: HashSet<u64> = (40..56).collect();
    assert_eq!(issued, expected);
}

#[tokio::test]
async fn test_validate_nonce_against_pending_count() {
    let chain = MockChain::new();
    chain.set_nonce(source(), 137);
    let service = common::service(chain.clone());

    let ok = service
        .validate_nonce(&source().to_string(), 137)
        .await
        .unwrap();
    assert!(ok.is_valid);
    assert_eq!(ok.current_nonce, 137);

    let stale = service
        .validate_nonce(&source().to_string(), 136)
        .await
        .unwrap();
    assert!(!stale.is_valid);
    assert_eq!(stale.requested_nonce, 136);

    // The verdict and the reported nonce come from the same chain read.
    chain.drift_nonce(true);
    let report = service
        .validate_nonce(&source().to_string(), 137)
        .await
        .unwrap();
    assert_eq!(report.current_nonce, 137);
    assert!(report.is_valid);
}

#[tokio::test]
async fn test_create_transaction_costs_and_does_not_reserve() {
    let chain = MockChain::new();
    chain.set_balance(source(), U256::from(10_000_000_000_000_000u64));
    chain.set_nonce(source(), 7);
    chain.set_fees(FeeParams::Legacy {
        gas_price: 14_285_714,
    });
    let service = common::service(chain.clone());

    let summary = service
        .create_transaction(&source().to_string(), &destination().to_string(), "0.001")
        .await
        .unwrap();

    assert!(summary.ready_to_sign);
    assert_eq!(summary.transaction.nonce, 7);
    assert_eq!(summary.transaction.gas_limit, 21_000);
    assert_eq!(
        summary.cost_estimate.gas_cost_wei,
        U256::from(21_000u64 * 14_285_714)
    );
    assert_eq!(
        summary.cost_estimate.total_cost_wei,
        U256::from(1_000_000_000_000_000u64 + 21_000 * 14_285_714)
    );

    // Building a preview leaves the nonce free.
    let report = service.get_nonce(&source().to_string()).await.unwrap();
    assert_eq!(report.next_available, 7);
    assert!(report.is_valid);
}

#[tokio::test]
async fn test_create_transaction_resolves_names() {
    let chain = MockChain::new();
    chain.set_balance(source(), eth(1));
    let service = common::service(chain.clone());

    let summary = service
        .create_transaction(&source().to_string(), "treasury.eth", "0.5")
        .await
        .unwrap();
    assert_eq!(summary.transaction.to, destination());

    let err = service
        .create_transaction(&source().to_string(), "nobody.eth", "0.5")
        .await
        .unwrap_err();
    assert!(matches!(err, BlockchainError::Resolution { .. }));
}

#[tokio::test]
async fn test_insufficient_balance_and_fee_ceiling() {
    let chain = MockChain::new();
    chain.set_balance(source(), U256::from(1_000u64));
    let service = common::service(chain.clone());

    let err = service
        .create_transaction(&source().to_string(), &destination().to_string(), "0.001")
        .await
        .unwrap_err();
    assert!(matches!(err, BlockchainError::InsufficientBalance { .. }));

    chain.set_balance(source(), eth(1));
    chain.set_fees(FeeParams::Eip1559 {
        max_fee_per_gas: 600_000_000_000,
        max_priority_fee_per_gas: 2_000_000_000,
    });
    let err = service
        .create_transaction(&source().to_string(), &destination().to_string(), "0.001")
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        BlockchainError::GasPriceTooHigh {
            current_gwei: 600,
            max_gwei: 500
        }
    ));

    chain.fail_fee_estimation(true);
    let err = service
        .create_transaction(&source().to_string(), &destination().to_string(), "0.001")
        .await
        .unwrap_err();
    assert!(matches!(err, BlockchainError::FeeEstimationFailed(_)));
}

#[tokio::test]
async fn test_execute_withdrawal_confirms() {
    let chain = MockChain::new();
    chain.set_balance(source(), eth(2));
    let service = common::service(chain.clone());
    let signer = JsonSigner::new(source());

    let outcome = service
        .execute_withdrawal(transfer("1", true), &signer)
        .await
        .unwrap();

    assert_eq!(outcome.record.status(), TxStatus::Confirmed);
    assert!(outcome.error.is_none());
    assert_eq!(outcome.record.nonce(), 0);
    assert!(outcome.record.confirmed_block().is_some());
    assert_eq!(chain.balance(destination()), eth(1));

    // The next transfer takes the next nonce.
    let second = service
        .execute_withdrawal(transfer("0.1", true), &signer)
        .await
        .unwrap();
    assert_eq!(second.record.nonce(), 1);
}

#[tokio::test]
async fn test_signer_must_match_sender() {
    let chain = MockChain::new();
    chain.set_balance(source(), eth(2));
    let service = common::service(chain.clone());

    let err = service
        .execute_withdrawal(transfer("1", true), &JsonSigner::new(destination()))
        .await
        .unwrap_err();
    assert!(matches!(err, BlockchainError::SignerMismatch { .. }));
    assert!(chain.sent().is_empty());
}

#[tokio::test]
async fn test_rejected_submission_releases_nonce() {
    let chain = MockChain::new();
    chain.set_balance(source(), eth(2));
    let service = common::service(chain.clone());
    let signer = JsonSigner::new(source());

    chain.reject_next("insufficient funds for gas * price + value");
    let err = service
        .execute_withdrawal(transfer("1", true), &signer)
        .await
        .unwrap_err();
    assert!(matches!(err, BlockchainError::SubmissionRejected { .. }));

    let outcome = service
        .execute_withdrawal(transfer("1", true), &signer)
        .await
        .unwrap();
    assert_eq!(outcome.record.nonce(), 0);
}

#[tokio::test]
async fn test_nonce_override_must_be_next() {
    let chain = MockChain::new();
    chain.set_balance(source(), eth(2));
    chain.set_nonce(source(), 5);
    let service = common::service(chain.clone());
    let signer = JsonSigner::new(source());

    let mut request = transfer("1", true);
    request.nonce = Some(3);
    let err = service
        .execute_withdrawal(request, &signer)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        BlockchainError::NonceStale {
            claimed: 3,
            expected: 5,
            ..
        }
    ));

    let mut request = transfer("1", true);
    request.nonce = Some(5);
    let outcome = service.execute_withdrawal(request, &signer).await.unwrap();
    assert_eq!(outcome.record.nonce(), 5);
}

#[tokio::test]
async fn test_timeout_then_reconcile_then_replace() {
    let chain = MockChain::new();
    chain.set_balance(source(), eth(2));
    chain.set_auto_mine(false);
    let service = common::service(chain.clone());
    let signer = JsonSigner::new(source());

    let mut request = transfer("1", true);
    request.timeout = Some(Duration::from_millis(100));
    let outcome = service.execute_withdrawal(request, &signer).await.unwrap();

    assert_eq!(outcome.record.status(), TxStatus::TimedOut);
    let error = outcome.error.expect("timeout is reported");
    assert!(error.contains("not confirmed"), "{error}");
    let hash = outcome.record.submission_hash();

    // Not replaceable until the nonce has been re-checked.
    let err = service.speed_up(hash, &signer).await.unwrap_err();
    assert!(matches!(
        err,
        WithdrawalError::Chain(BlockchainError::ReplacementRefused(_))
    ));

    let (record, reconciled) = service.reconcile_transaction(hash).await.unwrap();
    assert_eq!(reconciled, ReconcileOutcome::StillPending);
    assert_eq!(record.status(), TxStatus::Pending);

    let replacement = service.speed_up(hash, &signer).await.unwrap();
    assert_eq!(replacement.nonce(), record.nonce());
    assert!(
        replacement.request().fees.max_price_per_gas() > record.request().fees.max_price_per_gas()
    );
    assert_eq!(chain.pool_len(), 1);

    // The original points at its replacement and cannot be replaced twice.
    let original = service.get_transaction(hash).await.unwrap();
    assert_eq!(original.replaced_by(), Some(replacement.submission_hash()));
    let err = service.speed_up(hash, &signer).await.unwrap_err();
    match err {
        WithdrawalError::Chain(BlockchainError::ReplacementRefused(reason)) => {
            assert!(reason.contains("already replaced"), "{reason}");
        }
        other => panic!("expected ReplacementRefused, got {other:?}"),
    }

    chain.mine();
    let mined = service
        .get_transaction(replacement.submission_hash())
        .await
        .unwrap();
    assert_eq!(mined.status(), TxStatus::Confirmed);

    // The original can never be included now that its nonce is mined.
    let (record, reconciled) = service.reconcile_transaction(hash).await.unwrap();
    assert_eq!(reconciled, ReconcileOutcome::Replaced);
    assert_eq!(record.status(), TxStatus::Failed);
    assert!(record.failure_reason().unwrap().starts_with("replaced"));
    assert_eq!(
        service.get_transaction(hash).await.unwrap().status(),
        TxStatus::Failed
    );

    // Terminal records are forgotten once read.
    let err = service
        .get_transaction(replacement.submission_hash())
        .await
        .unwrap_err();
    assert!(matches!(err, WithdrawalError::TransactionNotFound(_)));
}

#[tokio::test]
async fn test_reconcile_detects_dropped_transaction() {
    let chain = MockChain::new();
    chain.set_balance(source(), eth(2));
    chain.set_auto_mine(false);
    let service = common::service(chain.clone());
    let signer = JsonSigner::new(source());

    let outcome = service
        .execute_withdrawal(transfer("1", false), &signer)
        .await
        .unwrap();
    assert_eq!(outcome.record.status(), TxStatus::Pending);

    chain.drop_pool();
    let (record, reconciled) = service
        .reconcile_transaction(outcome.record.submission_hash())
        .await
        .unwrap();
    assert_eq!(reconciled, ReconcileOutcome::Dropped);
    assert_eq!(record.status(), TxStatus::Failed);
    assert!(record.failure_reason().unwrap().starts_with("dropped"));
}

#[tokio::test]
async fn test_chain_outage_while_waiting_is_reported() {
    let chain = MockChain::new();
    chain.set_balance(source(), eth(2));
    chain.set_auto_mine(false);
    let service = common::service(chain.clone());
    let signer = JsonSigner::new(source());

    let mut request = transfer("1", false);
    request.timeout = Some(Duration::from_millis(200));
    let outcome = service.execute_withdrawal(request, &signer).await.unwrap();

    chain.set_down(true);
    let err = service
        .get_transaction(outcome.record.submission_hash())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        WithdrawalError::Chain(BlockchainError::ChainUnavailable { .. })
    ));
    assert!(!service.health().await);
}

#[tokio::test]
async fn test_mined_transaction_is_never_replaced() {
    let chain = MockChain::new();
    chain.set_balance(source(), eth(2));
    chain.set_auto_mine(false);
    let mut config = common::test_config();
    config.blockchain.confirmation_blocks = 3;
    let service = common::service_with(chain.clone(), JobStore::in_memory(), &config);
    let signer = JsonSigner::new(source());

    let mut request = transfer("1", true);
    request.timeout = Some(Duration::from_millis(100));
    let outcome = service.execute_withdrawal(request, &signer).await.unwrap();
    assert_eq!(outcome.record.status(), TxStatus::TimedOut);
    let hash = outcome.record.submission_hash();

    let (_, reconciled) = service.reconcile_transaction(hash).await.unwrap();
    assert_eq!(reconciled, ReconcileOutcome::StillPending);

    // Included after the reconcile, but not yet deep enough.
    chain.mine();
    let err = service.speed_up(hash, &signer).await.unwrap_err();
    match err {
        WithdrawalError::Chain(BlockchainError::ReplacementRefused(reason)) => {
            assert!(reason.contains("already mined"), "{reason}");
        }
        other => panic!("expected ReplacementRefused, got {other:?}"),
    }

    let (record, reconciled) = service.reconcile_transaction(hash).await.unwrap();
    assert_eq!(reconciled, ReconcileOutcome::StillPending);
    assert!(!record.nonce_revalidated());
    assert!(matches!(
        service.speed_up(hash, &signer).await,
        Err(WithdrawalError::Chain(BlockchainError::ReplacementRefused(_)))
    ));
    assert_eq!(chain.sent().len(), 1);

    chain.mine();
    chain.mine();
    let (record, reconciled) = service.reconcile_transaction(hash).await.unwrap();
    assert_eq!(reconciled, ReconcileOutcome::Confirmed);
    assert_eq!(record.status(), TxStatus::Confirmed);
}

#[tokio::test]
async fn test_transaction_tracked_when_caller_stops_waiting() {
    let chain = MockChain::new();
    chain.set_balance(source(), eth(2));
    chain.set_auto_mine(false);
    let service = Arc::new(common::service(chain.clone()));

    let task = {
        let service = service.clone();
        tokio::spawn(async move {
            let mut request = transfer("1", true);
            request.timeout = Some(Duration::from_secs(30));
            let _ = service
                .execute_withdrawal(request, &JsonSigner::new(source()))
                .await;
        })
    };
    while chain.pool_len() == 0 {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    task.abort();
    let _ = task.await;

    let hash = chain.pooled_hashes()[0];
    let record = service.get_transaction(hash).await.unwrap();
    assert_eq!(record.status(), TxStatus::Pending);
    assert_eq!(record.nonce(), 0);

    chain.mine();
    let record = service.get_transaction(hash).await.unwrap();
    assert_eq!(record.status(), TxStatus::Confirmed);
}

#[tokio::test]
async fn test_requested_wait_is_capped_by_request_timeout() {
    let chain = MockChain::new();
    chain.set_balance(source(), eth(2));
    chain.set_auto_mine(false);
    let mut config = common::test_config();
    config.server.request_timeout_secs = 3;
    let service = common::service_with(chain.clone(), JobStore::in_memory(), &config);

    let mut request = transfer("1", true);
    request.timeout = Some(Duration::from_secs(600));
    let started = Instant::now();
    let outcome = service
        .execute_withdrawal(request, &JsonSigner::new(source()))
        .await
        .unwrap();

    assert_eq!(outcome.record.status(), TxStatus::TimedOut);
    assert!(started.elapsed() < Duration::from_secs(3));
}
