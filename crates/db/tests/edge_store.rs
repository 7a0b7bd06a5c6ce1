//! Follow edge storage tests against a migrated in-memory database.

#![allow(clippy::unwrap_used)]

use chrono::{Duration, Utc};
use habitgraph_common::AppError;
use habitgraph_db::entities::{FollowState, IncomingFollow, incoming_follow};
use habitgraph_db::repositories::{EdgeCursor, EdgeIndex, FollowEdgeRepository};
use habitgraph_db::test_utils::TestDatabase;
use sea_orm::{ColumnTrait, EntityTrait, QueryFilter};

async fn setup(users: &[&str]) -> (TestDatabase, FollowEdgeRepository) {
    let db = TestDatabase::new().await.unwrap();
    db.seed_users(users).await.unwrap();
    let repo = FollowEdgeRepository::new(db.connection());
    (db, repo)
}

async fn assert_indexes_agree(repo: &FollowEdgeRepository, follower: &str, followee: &str) {
    let outgoing = repo
        .find(EdgeIndex::ByFollower, follower, followee)
        .await
        .unwrap();
    let incoming = repo
        .find(EdgeIndex::ByFollowee, follower, followee)
        .await
        .unwrap();
    assert_eq!(outgoing, incoming);
}

#[tokio::test]
async fn test_lifecycle_keeps_both_indexes_identical() {
    let (_db, repo) = setup(&["a", "b"]).await;

    assert_eq!(
        repo.upsert("a", "b", FollowState::Pending).await.unwrap(),
        None
    );
    assert_indexes_agree(&repo, "a", "b").await;

    assert!(
        repo.transition("a", "b", FollowState::Pending, FollowState::Active)
            .await
            .unwrap()
    );
    assert_indexes_agree(&repo, "a", "b").await;

    let edge = repo
        .find(EdgeIndex::ByFollowee, "a", "b")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(edge.state, FollowState::Active);
    assert!(edge.accepted_at.is_some());

    assert!(repo.set_state("a", "b", FollowState::Removed).await.unwrap());
    assert_indexes_agree(&repo, "a", "b").await;

    assert_eq!(
        repo.upsert("a", "b", FollowState::Active).await.unwrap(),
        Some(FollowState::Removed)
    );
    assert_indexes_agree(&repo, "a", "b").await;
    assert!(
        repo.exists(EdgeIndex::ByFollower, "a", "b", FollowState::Active)
            .await
            .unwrap()
    );
}

#[tokio::test]
async fn test_upsert_leaves_live_edge_untouched() {
    let (_db, repo) = setup(&["a", "b"]).await;

    repo.upsert("a", "b", FollowState::Active).await.unwrap();
    let prior = repo.upsert("a", "b", FollowState::Pending).await.unwrap();

    assert_eq!(prior, Some(FollowState::Active));
    assert_eq!(
        repo.state_of("a", "b").await.unwrap(),
        Some(FollowState::Active)
    );
}

#[tokio::test]
async fn test_upsert_rejects_removed_target() {
    let (_db, repo) = setup(&["a", "b"]).await;

    let result = repo.upsert("a", "b", FollowState::Removed).await;
    assert!(matches!(result, Err(AppError::BadRequest(_))));
    assert_eq!(repo.state_of("a", "b").await.unwrap(), None);
}

#[tokio::test]
async fn test_transition_from_wrong_state_writes_nothing() {
    let (_db, repo) = setup(&["a", "b"]).await;

    repo.upsert("a", "b", FollowState::Active).await.unwrap();

    let moved = repo
        .transition("a", "b", FollowState::Pending, FollowState::Removed)
        .await
        .unwrap();

    assert!(!moved);
    assert_eq!(
        repo.state_of("a", "b").await.unwrap(),
        Some(FollowState::Active)
    );
    assert_indexes_agree(&repo, "a", "b").await;
}

#[tokio::test]
async fn test_concurrent_transitions_have_one_winner() {
    let (_db, repo) = setup(&["a", "b"]).await;
    repo.upsert("a", "b", FollowState::Pending).await.unwrap();

    let attempts = (0..8).map(|_| {
        let repo = repo.clone();
        async move {
            repo.transition("a", "b", FollowState::Pending, FollowState::Active)
                .await
                .unwrap()
        }
    });
    let results = futures::future::join_all(attempts).await;

    assert_eq!(results.iter().filter(|won| **won).count(), 1);
    assert_indexes_agree(&repo, "a", "b").await;
}

#[tokio::test]
async fn test_set_state_on_missing_edge_returns_false() {
    let (_db, repo) = setup(&["a", "b"]).await;

    assert!(!repo.set_state("a", "b", FollowState::Active).await.unwrap());
}

#[tokio::test]
async fn test_keyset_pagination_is_stable() {
    let (_db, repo) = setup(&["target", "f1", "f2", "f3", "f4", "f5", "f6"]).await;

    for follower in ["f1", "f2", "f3", "f4", "f5"] {
        repo.upsert(follower, "target", FollowState::Active)
            .await
            .unwrap();
    }

    let first = repo
        .list_followers("target", FollowState::Active, 2, None)
        .await
        .unwrap();
    assert_eq!(first.len(), 2);

    let last = first.last().unwrap();
    let cursor = EdgeCursor::after(last, &last.follower_id);

    // A follow landing between page fetches must not shift the next page.
    repo.upsert("f6", "target", FollowState::Active)
        .await
        .unwrap();

    let second = repo
        .list_followers("target", FollowState::Active, 10, Some(&cursor))
        .await
        .unwrap();

    assert_eq!(second.len(), 3);
    assert!(second.iter().all(|edge| edge.follower_id != "f6"));

    let mut seen: Vec<String> = first
        .iter()
        .chain(second.iter())
        .map(|edge| edge.follower_id.clone())
        .collect();
    assert_eq!(seen.len(), 5);
    seen.sort();
    seen.dedup();
    assert_eq!(seen.len(), 5);
}

#[tokio::test]
async fn test_counts_only_include_requested_state() {
    let (_db, repo) = setup(&["a", "b", "c", "d"]).await;

    repo.upsert("b", "a", FollowState::Active).await.unwrap();
    repo.upsert("c", "a", FollowState::Pending).await.unwrap();
    repo.upsert("d", "a", FollowState::Active).await.unwrap();
    repo.set_state("d", "a", FollowState::Removed)
        .await
        .unwrap();
    repo.upsert("a", "b", FollowState::Active).await.unwrap();
    repo.upsert("a", "c", FollowState::Pending).await.unwrap();

    assert_eq!(
        repo.count_followers("a", FollowState::Active).await.unwrap(),
        1
    );
    assert_eq!(
        repo.count_followers("a", FollowState::Pending).await.unwrap(),
        1
    );
    assert_eq!(
        repo.count_following("a", FollowState::Active).await.unwrap(),
        1
    );
    assert_eq!(repo.count_open_following("a").await.unwrap(), 2);

    assert_eq!(
        repo.follower_ids("a", FollowState::Active).await.unwrap(),
        vec!["b".to_string()]
    );
}

#[tokio::test]
async fn test_purge_removed_clears_both_indexes() {
    let (_db, repo) = setup(&["a", "b", "c"]).await;

    repo.upsert("a", "b", FollowState::Active).await.unwrap();
    repo.upsert("a", "c", FollowState::Active).await.unwrap();
    repo.set_state("a", "b", FollowState::Removed)
        .await
        .unwrap();

    let cutoff = (Utc::now() + Duration::seconds(1)).fixed_offset();
    assert_eq!(repo.purge_removed(cutoff).await.unwrap(), 1);

    assert!(
        repo.find(EdgeIndex::ByFollower, "a", "b")
            .await
            .unwrap()
            .is_none()
    );
    assert!(
        repo.find(EdgeIndex::ByFollowee, "a", "b")
            .await
            .unwrap()
            .is_none()
    );
    assert_eq!(
        repo.state_of("a", "c").await.unwrap(),
        Some(FollowState::Active)
    );
}

#[tokio::test]
async fn test_follow_quota_is_consumed_atomically() {
    let (_db, repo) = setup(&["a"]).await;
    let today = Utc::now().date_naive();

    let attempts = (0..6).map(|_| repo.consume_follow_quota("a", today, 3));
    let results = futures::future::join_all(attempts).await;
    assert_eq!(results.into_iter().filter(|r| *r.as_ref().unwrap()).count(), 3);
    assert_eq!(repo.follow_quota_used("a", today).await.unwrap(), 3);

    repo.release_follow_quota("a", today).await.unwrap();
    assert!(repo.consume_follow_quota("a", today, 3).await.unwrap());
    assert!(!repo.consume_follow_quota("a", today, 3).await.unwrap());

    // A new day starts from zero, and past days are purgeable.
    let tomorrow = today.succ_opt().unwrap();
    assert!(repo.consume_follow_quota("a", tomorrow, 3).await.unwrap());
    assert_eq!(repo.purge_follow_quota(tomorrow).await.unwrap(), 1);
    assert_eq!(repo.follow_quota_used("a", today).await.unwrap(), 0);
    assert_eq!(repo.follow_quota_used("a", tomorrow).await.unwrap(), 1);
}

#[tokio::test]
async fn test_transition_rolls_back_when_indexes_disagree() {
    let (db, repo) = setup(&["a", "b"]).await;
    repo.upsert("a", "b", FollowState::Pending).await.unwrap();

    // Lose the followee-side row behind the repository's back.
    IncomingFollow::delete_many()
        .filter(incoming_follow::Column::FollowerId.eq("a"))
        .filter(incoming_follow::Column::FolloweeId.eq("b"))
        .exec(db.connection().as_ref())
        .await
        .unwrap();

    let result = repo
        .transition("a", "b", FollowState::Pending, FollowState::Active)
        .await;
    assert!(matches!(result, Err(AppError::Internal(_))));

    assert_eq!(
        repo.state_of("a", "b").await.unwrap(),
        Some(FollowState::Pending)
    );
    let edge = repo
        .find(EdgeIndex::ByFollower, "a", "b")
        .await
        .unwrap()
        .unwrap();
    assert!(edge.accepted_at.is_none());
}
