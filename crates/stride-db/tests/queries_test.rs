//! Integration tests for the per-table query modules.
//!
//! Each test runs against its own database on the shared PostgreSQL from
//! `stride-test-utils`; they are ignored unless Docker or
//! `STRIDE_TEST_PG_URL` is available.

use stride_db::models::{NewPlanItem, NewTimeline, PlanItemStatus, TimelineType};
use stride_db::pool;
use stride_db::queries::goals::{self, NewGoal};
use stride_db::queries::{allocation, plan_items, timelines, tracked_goals, users};
use stride_test_utils::{create_test_db, drop_test_db, seed_user};

fn root_goal(user_id: i64, name: &str) -> NewGoal<'_> {
    NewGoal {
        user_id,
        name,
        area_of_focus: "",
        timeline: "1 year",
        parent_goal_id: None,
        depth: 0,
    }
}

#[tokio::test]
#[ignore = "requires PostgreSQL (Docker or STRIDE_TEST_PG_URL)"]
async fn migrations_create_all_tables() {
    let (pool, db_name) = create_test_db().await;

    let counts = pool::table_counts(&pool).await.unwrap();
    let names: Vec<&str> = counts.iter().map(|(name, _)| name.as_str()).collect();
    assert_eq!(
        names,
        ["users", "goals", "timelines", "plan_items", "tracked_goals"]
    );
    assert!(counts.iter().all(|(_, count)| *count == 0));

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
#[ignore = "requires PostgreSQL (Docker or STRIDE_TEST_PG_URL)"]
async fn quota_never_goes_negative() {
    let (pool, db_name) = create_test_db().await;
    let user_id = seed_user(&pool, 1).await;

    assert!(users::decrement_quota(&pool, user_id).await.unwrap());
    assert!(!users::decrement_quota(&pool, user_id).await.unwrap());

    let user = users::get_user(&pool, user_id).await.unwrap().unwrap();
    assert_eq!(user.generation_quota, 0);

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
#[ignore = "requires PostgreSQL (Docker or STRIDE_TEST_PG_URL)"]
async fn depth_above_three_violates_check_constraint() {
    let (pool, db_name) = create_test_db().await;
    let user_id = seed_user(&pool, 5).await;

    let mut goal = root_goal(user_id, "too deep");
    goal.depth = 4;
    assert!(goals::insert_goal(&pool, &goal).await.is_err());

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
#[ignore = "requires PostgreSQL (Docker or STRIDE_TEST_PG_URL)"]
async fn sibling_names_are_unique_under_a_parent() {
    let (pool, db_name) = create_test_db().await;
    let user_id = seed_user(&pool, 5).await;
    let root = goals::insert_goal(&pool, &root_goal(user_id, "learn rust")).await.unwrap();

    let child = NewGoal {
        parent_goal_id: Some(root.id),
        depth: 1,
        ..root_goal(user_id, "ownership")
    };
    let first = goals::insert_child_if_absent(&pool, &child).await.unwrap();
    assert!(first.is_some());
    assert!(goals::insert_child_if_absent(&pool, &child).await.unwrap().is_none());
    assert!(goals::insert_goal(&pool, &child).await.is_err());

    let found = goals::find_child_by_name(&pool, root.id, "ownership").await.unwrap();
    assert_eq!(found.map(|g| g.id), first.map(|g| g.id));

    // Root goals have no parent and may share names.
    assert!(goals::insert_goal(&pool, &root_goal(user_id, "learn rust")).await.is_ok());

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
#[ignore = "requires PostgreSQL (Docker or STRIDE_TEST_PG_URL)"]
async fn subtree_edges_walks_all_descendants() {
    let (pool, db_name) = create_test_db().await;
    let user_id = seed_user(&pool, 5).await;

    let root = goals::insert_goal(&pool, &root_goal(user_id, "root"))
        .await
        .unwrap();
    let mut child = root_goal(user_id, "child");
    child.parent_goal_id = Some(root.id);
    child.depth = 1;
    let child = goals::insert_goal(&pool, &child).await.unwrap();
    let mut grandchild = root_goal(user_id, "grandchild");
    grandchild.parent_goal_id = Some(child.id);
    grandchild.depth = 2;
    let grandchild = goals::insert_goal(&pool, &grandchild).await.unwrap();
    let unrelated = goals::insert_goal(&pool, &root_goal(user_id, "other"))
        .await
        .unwrap();

    let mut edges = goals::subtree_edges(&pool, root.id).await.unwrap();
    edges.sort();
    assert_eq!(
        edges,
        vec![
            (root.id, None),
            (child.id, Some(root.id)),
            (grandchild.id, Some(child.id)),
        ]
    );
    assert!(!edges.iter().any(|(id, _)| *id == unrelated.id));

    let found = goals::find_child_by_name(&pool, root.id, "child")
        .await
        .unwrap();
    assert_eq!(found.map(|g| g.id), Some(child.id));

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
#[ignore = "requires PostgreSQL (Docker or STRIDE_TEST_PG_URL)"]
async fn max_ids_follow_inserted_rows() {
    let (pool, db_name) = create_test_db().await;
    let user_id = seed_user(&pool, 5).await;
    let goal = goals::insert_goal(&pool, &root_goal(user_id, "learn rust"))
        .await
        .unwrap();

    let mut tx = pool.begin().await.unwrap();
    allocation::acquire_id_lease(&mut tx).await.unwrap();
    assert_eq!(allocation::current_max_ids(&mut tx).await.unwrap(), (0, 0));

    let inserted = timelines::insert_timelines(
        &mut tx,
        &[
            NewTimeline {
                id: 4,
                goal_id: goal.id,
                parent_timeline_id: None,
                title: "Week 1".into(),
                timeline_type: TimelineType::Week,
            },
            NewTimeline {
                id: 3,
                goal_id: goal.id,
                parent_timeline_id: Some(4),
                title: "Setup".into(),
                timeline_type: TimelineType::Topic,
            },
        ],
    )
    .await
    .unwrap();
    assert_eq!(inserted, 2);
    plan_items::insert_plan_items(
        &mut tx,
        &[NewPlanItem {
            id: 9,
            timeline_id: 3,
            goal_id: goal.id,
            name: "Install rustup".into(),
            description: None,
            status: PlanItemStatus::Todo,
        }],
    )
    .await
    .unwrap();
    assert_eq!(allocation::current_max_ids(&mut tx).await.unwrap(), (4, 9));
    tx.commit().await.unwrap();

    let updated = plan_items::update_status(&pool, 9, PlanItemStatus::Done)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(updated.status, PlanItemStatus::Done);
    assert!(plan_items::update_status(&pool, 10, PlanItemStatus::Done)
        .await
        .unwrap()
        .is_none());

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
#[ignore = "requires PostgreSQL (Docker or STRIDE_TEST_PG_URL)"]
async fn tracking_a_second_goal_replaces_the_first() {
    let (pool, db_name) = create_test_db().await;
    let user_id = seed_user(&pool, 5).await;
    let first = goals::insert_goal(&pool, &root_goal(user_id, "first"))
        .await
        .unwrap();
    let second = goals::insert_goal(&pool, &root_goal(user_id, "second"))
        .await
        .unwrap();

    tracked_goals::upsert_tracked_goal(&pool, user_id, first.id)
        .await
        .unwrap();
    tracked_goals::upsert_tracked_goal(&pool, user_id, second.id)
        .await
        .unwrap();

    let tracked = tracked_goals::get_for_user(&pool, user_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(tracked.goal_id, second.id);
    assert!(!tracked_goals::is_tracked(&pool, first.id).await.unwrap());
    assert!(tracked_goals::is_tracked(&pool, second.id).await.unwrap());

    pool.close().await;
    drop_test_db(&db_name).await;
}
