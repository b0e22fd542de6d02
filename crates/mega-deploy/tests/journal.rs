//! Persistence of sessions through the file journal.

use std::{io::Write, sync::Arc};

use alloy_primitives::U256;
use mega_deploy::{
    replay,
    test_utils::{self, MockLedger, DEPLOYER},
    Argument, ExecutionConfig, ExecutionEngine, FileJournal, Future, FutureKind, Journal,
};

fn deployment() -> Vec<Future> {
    vec![Future::new(
        "Counter#Counter",
        FutureKind::ContractDeployment {
            artifact_id: "Counter".into(),
            constructor_args: vec![Argument::literal(7)],
            libraries: Default::default(),
            value: U256::ZERO,
            from: None,
        },
    )]
}

fn engine(ledger: &Arc<MockLedger>, journal: FileJournal) -> ExecutionEngine<FileJournal> {
    ExecutionEngine::new(ledger.clone(), Arc::new(test_utils::artifacts()), journal)
        .with_config(ExecutionConfig::default().with_required_confirmations(0))
        .with_accounts(test_utils::accounts())
}

#[tokio::test]
async fn test_file_journal_replays_session() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("deployment").join("journal.jsonl");
    let ledger = Arc::new(MockLedger::default());

    let mut first = engine(&ledger, FileJournal::open(&path).unwrap());
    let result = first.execute(&deployment()).await.unwrap();
    assert!(result.is_success());
    drop(first);

    let journal = FileJournal::open(&path).unwrap();
    let messages = journal.read().unwrap();
    assert_eq!(replay(&messages).unwrap(), result.state);
    assert_eq!(messages.first().map(|message| message.kind()), Some("RUN_START"));

    let mut second = engine(&ledger, journal);
    let resumed = second.execute(&deployment()).await.unwrap();
    assert_eq!(resumed.deployed_contracts()["Counter#Counter"], DEPLOYER.create(0));
    assert_eq!(ledger.sent_transactions().len(), 1);
}

#[tokio::test]
async fn test_resumes_after_torn_append() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("journal.jsonl");
    let ledger = Arc::new(MockLedger::default());

    let mut engine = engine(&ledger, FileJournal::open(&path).unwrap());
    engine.execute(&deployment()).await.unwrap();
    let complete = engine.journal().read().unwrap();
    drop(engine);

    // a crash in the middle of an append
    let mut file = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
    file.write_all(br#"{"type":"TRANSACTION_SEND","futureId":"Coun"#).unwrap();
    drop(file);

    let mut engine = self::engine(&ledger, FileJournal::open(&path).unwrap());
    let result = engine.execute(&deployment()).await.unwrap();
    assert!(result.is_success());
    let messages = engine.journal().read().unwrap();
    assert_eq!(&messages[..complete.len()], complete.as_slice());
    assert_eq!(messages.len(), complete.len() + 1);
}
