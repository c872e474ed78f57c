use std::sync::Arc;
use std::time::Duration;

use mockall::Sequence;

use super::LockOptions;
use super::MockRuleLock;
use super::MockRuleLocker;
use super::NestedLocker;
use super::RuleLock;
use super::RuleLocker;
use crate::LockError;
use crate::StoreError;

fn options() -> LockOptions {
    LockOptions::new(Duration::from_secs(10), "worker", "/locks/:id")
}

fn releasing_lock(result: Result<(), LockError>) -> Box<dyn RuleLock> {
    let mut lock = MockRuleLock::new();
    lock.expect_unlock().times(1).return_once(move || result);
    Box::new(lock)
}

#[tokio::test]
async fn test_own_failure_never_touches_nested() {
    let mut own = MockRuleLocker::new();
    own.expect_lock()
        .times(1)
        .returning(|key, _| Err(LockError::LockedLocally { key: key.to_string() }));
    let mut nested = MockRuleLocker::new();
    nested.expect_lock().times(0);

    let locker = NestedLocker::new(Arc::new(own), Arc::new(nested));
    let err = locker.lock("/k", &options()).await.err().unwrap();
    assert_eq!(err, LockError::LockedLocally { key: "/k".into() });
}

#[tokio::test]
async fn test_nested_failure_releases_own() {
    let mut own = MockRuleLocker::new();
    own.expect_lock()
        .times(1)
        .returning(|_, _| Ok(releasing_lock(Ok(()))));
    let mut nested = MockRuleLocker::new();
    nested
        .expect_lock()
        .times(1)
        .returning(|_, _| Err(LockError::Store(StoreError::Unavailable("down".into()))));

    let locker = NestedLocker::new(Arc::new(own), Arc::new(nested));
    let err = locker.lock("/k", &options()).await.err().unwrap();
    assert_eq!(err, LockError::Store(StoreError::Unavailable("down".into())));
}

#[tokio::test]
async fn test_unlock_releases_nested_then_own() {
    let mut seq = Sequence::new();
    let mut nested_lock = MockRuleLock::new();
    nested_lock
        .expect_unlock()
        .times(1)
        .in_sequence(&mut seq)
        .returning(|| Ok(()));
    let mut own_lock = MockRuleLock::new();
    own_lock
        .expect_unlock()
        .times(1)
        .in_sequence(&mut seq)
        .returning(|| Ok(()));

    let mut own = MockRuleLocker::new();
    own.expect_lock()
        .times(1)
        .return_once(move |_, _| Ok(Box::new(own_lock) as Box<dyn RuleLock>));
    let mut nested = MockRuleLocker::new();
    nested
        .expect_lock()
        .times(1)
        .return_once(move |_, _| Ok(Box::new(nested_lock) as Box<dyn RuleLock>));

    let locker = NestedLocker::new(Arc::new(own), Arc::new(nested));
    let lock = locker.lock("/k", &options()).await.unwrap();
    lock.unlock().await.unwrap();
}

#[tokio::test]
async fn test_unlock_prefers_nested_error() {
    let mut own = MockRuleLocker::new();
    own.expect_lock()
        .times(1)
        .returning(|_, _| Ok(releasing_lock(Err(LockError::NotHeld { key: "own".into() }))));
    let mut nested = MockRuleLocker::new();
    nested
        .expect_lock()
        .times(1)
        .returning(|_, _| Ok(releasing_lock(Err(LockError::NotHeld { key: "nested".into() }))));

    let locker = NestedLocker::new(Arc::new(own), Arc::new(nested));
    let lock = locker.lock("/k", &options()).await.unwrap();
    assert_eq!(lock.unlock().await, Err(LockError::NotHeld { key: "nested".into() }));
}

#[tokio::test]
async fn test_unlock_reports_own_error_when_nested_succeeds() {
    let mut own = MockRuleLocker::new();
    own.expect_lock()
        .times(1)
        .returning(|_, _| Ok(releasing_lock(Err(LockError::NotHeld { key: "own".into() }))));
    let mut nested = MockRuleLocker::new();
    nested
        .expect_lock()
        .times(1)
        .returning(|_, _| Ok(releasing_lock(Ok(()))));

    let locker = NestedLocker::new(Arc::new(own), Arc::new(nested));
    let lock = locker.lock("/k", &options()).await.unwrap();
    assert_eq!(lock.unlock().await, Err(LockError::NotHeld { key: "own".into() }));
}
