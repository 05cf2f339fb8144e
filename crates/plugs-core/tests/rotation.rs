//! End-to-end rotation scenarios over the in-memory backends.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{TimeZone, Utc};

use plugs_core::app::{AppBuilder, PlugService, Submission, Upload};
use plugs_core::config::PlugsConfig;
use plugs_core::domain::{AssetRef, ErrorKind, NewPlug, Plug, PlugError, UserId};
use plugs_core::impls::{InMemoryDatabase, InMemoryDirectory, InMemoryObjectStore};
use plugs_core::ports::{Connector, Dice, FixedClock, ObjectStore, SeededDice};

struct World {
    db: InMemoryDatabase,
    directory: InMemoryDirectory,
    objects: InMemoryObjectStore,
    service: Arc<PlugService>,
}

impl World {
    async fn new(config: PlugsConfig, dice: Arc<dyn Dice>) -> Self {
        let db = InMemoryDatabase::new();
        let directory = InMemoryDirectory::new();
        let objects = InMemoryObjectStore::new("https://s3.test", "it-secret");
        let clock = Arc::new(FixedClock::new(
            Utc.with_ymd_and_hms(2024, 3, 1, 9, 30, 0).unwrap(),
        ));
        let service = AppBuilder::new(config)
            .database(Box::new(db.clone()))
            .directory(Box::new(directory.clone()))
            .object_store(Box::new(objects.clone()))
            .clock(clock)
            .dice(dice)
            .build()
            .await
            .unwrap();
        Self {
            db,
            directory,
            objects,
            service: Arc::new(service),
        }
    }

    async fn seed(&self, plug: NewPlug) -> Plug {
        let store = <InMemoryObjectStore as Connector<dyn ObjectStore>>::connect(&self.objects)
            .await
            .unwrap();
        store
            .put("plugs", plug.asset_ref.as_str(), b"\x89PNG".to_vec(), "image/png")
            .await
            .unwrap();
        self.db.seed(plug, true)
    }
}

fn sponsored(key: &str, views: i32) -> NewPlug {
    NewPlug::new(AssetRef::new(key), UserId::new("alice"), views)
}

fn house(key: &str) -> NewPlug {
    NewPlug::house(AssetRef::new(key), UserId::new("drink"))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_selections_drain_plug_and_retire_it_once() {
    const N: usize = 48;
    let world = World::new(PlugsConfig::default(), Arc::new(SeededDice::new(7))).await;
    let plug = world.seed(sponsored("contended.png", N as i32)).await;

    let mut tasks = Vec::new();
    for _ in 0..N {
        let service = Arc::clone(&world.service);
        tasks.push(tokio::spawn(async move { service.serve_next(None, "stress").await }));
    }

    let mut views = BTreeSet::new();
    let mut empty = 0;
    for task in tasks {
        match task.await.unwrap() {
            Ok(served) => {
                assert_eq!(served.plug.id, plug.id);
                assert!(views.insert(served.plug.views_remaining), "counter value served twice");
            }
            Err(PlugError::EmptyCatalog) => empty += 1,
            Err(e) => panic!("unexpected error: {e}"),
        }
    }

    assert_eq!(views, (1..N as i32).collect::<BTreeSet<_>>());
    assert_eq!(empty, 1);
    assert!(world.db.plug(plug.id).is_none());
    assert!(world.objects.is_empty());
    assert_eq!(world.objects.removals(), 1);
}

#[tokio::test]
async fn house_plugs_are_never_charged() {
    let mut config = PlugsConfig::default();
    config.selection.house_percent = 50;
    let world = World::new(config, Arc::new(SeededDice::new(42))).await;
    let default = world.seed(house("house.png")).await;
    let paid = world.seed(sponsored("paid.png", 1_000)).await;

    let mut paid_serves = 0;
    for _ in 0..300 {
        let served = world.service.serve_next(None, "r").await.unwrap();
        if served.plug.id == paid.id {
            paid_serves += 1;
        } else {
            assert_eq!(served.plug.id, default.id);
            assert_eq!(served.plug.views_remaining, -1);
        }
    }

    assert!(paid_serves > 0 && paid_serves < 300);
    assert_eq!(world.db.plug(default.id).unwrap().views_remaining, -1);
    assert_eq!(world.db.plug(paid.id).unwrap().views_remaining, 1_000 - paid_serves);
}

#[tokio::test]
async fn submission_to_retirement() {
    let mut config = PlugsConfig::default();
    config.ledger.views_per_credit = 2;
    let world = World::new(config, Arc::new(SeededDice::new(1))).await;
    world.directory.add_user("alice", 1, &[]);
    world.directory.add_user("root", 0, &["eboard"]);
    let alice = UserId::new("alice");
    let root = UserId::new("root");

    let upload = |credits| Upload {
        owner: alice.clone(),
        filename: "poster.png".into(),
        bytes: b"\x89PNG".to_vec(),
        content_type: "image/png".into(),
        credits,
    };

    assert_eq!(
        world.service.submit(upload(2)).await.unwrap(),
        Submission::InsufficientCredit
    );
    let Submission::Accepted { plug, .. } = world.service.submit(upload(1)).await.unwrap() else {
        panic!("one credit should be enough");
    };
    assert_eq!(plug.asset_ref.as_str(), "2024/03/01/093000-alice-poster.png");
    assert_eq!(world.service.ledger().balance(&alice).await.unwrap(), 0);

    // not in rotation until approved
    let err = world.service.serve_next(None, "r").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::EmptyCatalog);

    world.service.set_approval_list(&root, &[plug.id]).await.unwrap();
    let served = world.service.serve_next(None, "r").await.unwrap();
    assert_eq!((served.plug.id, served.plug.views_remaining), (plug.id, 1));

    // second view exhausts it; nothing else is left to serve
    let err = world.service.serve_next(None, "r").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::EmptyCatalog);
    assert!(world.db.plug(plug.id).is_none());
    assert!(!world.objects.contains("plugs", plug.asset_ref.as_str()));

    let counts = world.service.counts().await.unwrap();
    assert_eq!((counts.house, counts.sponsored, counts.unapproved), (0, 0, 0));
}

#[tokio::test]
async fn backends_restart_under_a_live_service() {
    let world = World::new(PlugsConfig::default(), Arc::new(SeededDice::new(3))).await;
    world.seed(house("house.png")).await;
    world.directory.add_user("alice", 5, &[]);
    let before = (
        world.db.connections(),
        world.directory.connections(),
        world.objects.connections(),
    );

    world.db.drop_sessions();
    world.directory.drop_sessions();
    world.objects.drop_sessions();

    assert!(world.service.serve_next(None, "r").await.is_ok());
    assert_eq!(world.service.ledger().balance(&UserId::new("alice")).await.unwrap(), 5);
    // one reconnect per backend
    assert_eq!(world.db.connections(), before.0 + 1);
    assert_eq!(world.directory.connections(), before.1 + 1);
    assert_eq!(world.objects.connections(), before.2 + 1);
}

#[tokio::test]
async fn unreachable_database_is_fatal() {
    let world = World::new(PlugsConfig::default(), Arc::new(SeededDice::new(3))).await;
    world.seed(house("house.png")).await;

    world.db.drop_sessions();
    world.db.set_accepting(false);

    let err = world.service.serve_next(None, "r").await.unwrap_err();
    assert!(err.is_fatal());
    assert_eq!(err.kind(), ErrorKind::Connectivity);
}
