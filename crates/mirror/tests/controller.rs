mod common;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use common::{label, svc, FakeHost, MapCache};
use k8s_openapi::api::core::v1::Service;
use tether_core::{to_host_namespace, ClusterId, TenantObjectRef, LABEL_CLUSTER, LABEL_NAMESPACE};
use tether_mirror::{MirrorConfig, MirrorController, OrphanPolicy};
use tether_store::ItemBackoff;

fn c1() -> ClusterId { ClusterId::new("c1").unwrap() }

struct Fixture {
    host: Arc<FakeHost<Service>>,
    cache: Arc<MapCache<Service>>,
    ctrl: Arc<MirrorController<Service>>,
}

fn fixture(orphans: OrphanPolicy) -> Fixture {
    let host = FakeHost::new();
    let cache = MapCache::new();
    let config = MirrorConfig {
        orphans,
        backoff: ItemBackoff::new(Duration::from_millis(10), Duration::from_millis(100)),
        ..MirrorConfig::default()
    };
    let ctrl = Arc::new(MirrorController::new("svc-mirror", host.clone(), config));
    ctrl.registry().attach(c1(), cache.clone()).unwrap();
    Fixture { host, cache, ctrl }
}

fn with_rev(mut s: Service, rev: u32) -> Service {
    s.metadata.labels = Some(BTreeMap::from([("rev".to_string(), rev.to_string())]));
    s
}

async fn step(ctrl: &MirrorController<Service>) {
    let progressed = tokio::time::timeout(Duration::from_secs(1), ctrl.process_next()).await;
    assert!(matches!(progressed, Ok(true)), "expected a queued key");
}

#[tokio::test]
async fn tenant_create_then_delete_round_trip() {
    let f = fixture(OrphanPolicy::Retain);
    let handler = f.ctrl.handler();
    let web = svc("default", "web", "1");

    f.cache.put(web.clone());
    handler.on_add(&c1(), &web);
    step(&f.ctrl).await;

    let ns = to_host_namespace(&c1(), "default");
    let host_web = f.host.object(&ns, "web").expect("mirrored");
    assert_eq!(label(&host_web, LABEL_CLUSTER), Some("c1"));
    assert_eq!(label(&host_web, LABEL_NAMESPACE), Some("default"));

    f.cache.remove("default", "web");
    handler.on_delete(&c1(), &web);
    step(&f.ctrl).await;
    assert!(f.host.object(&ns, "web").is_none());

    // a second delete is a no-op success
    handler.on_delete(&c1(), &web);
    step(&f.ctrl).await;
    assert_eq!(f.ctrl.queue().num_requeues(&TenantObjectRef::new(c1(), "default", "web")), 0);
}

#[tokio::test]
async fn rapid_updates_coalesce_into_one_reconcile_of_latest_state() {
    let f = fixture(OrphanPolicy::Retain);
    let handler = f.ctrl.handler();

    let first = with_rev(svc("default", "web", "1"), 1);
    f.cache.put(first.clone());
    handler.on_add(&c1(), &first);
    let mut prev = first;
    for rev in 2..=10u32 {
        let next = with_rev(svc("default", "web", &rev.to_string()), rev);
        f.cache.put(next.clone());
        handler.on_update(&c1(), &prev, &next);
        prev = next;
    }
    assert_eq!(f.ctrl.queue().len(), 1);

    step(&f.ctrl).await;
    assert_eq!(f.host.create_calls(), 1);
    let host_web = f.host.object(&to_host_namespace(&c1(), "default"), "web").unwrap();
    assert_eq!(label(&host_web, "rev"), Some("10"));
    assert!(f.ctrl.queue().is_empty());
    assert_eq!(f.ctrl.queue().in_flight(), 0);
}

#[tokio::test]
async fn resync_with_same_resource_version_never_reaches_queue() {
    let f = fixture(OrphanPolicy::Retain);
    let handler = f.ctrl.handler();
    let web = svc("default", "web", "5");
    handler.on_update(&c1(), &web, &web.clone());
    assert!(f.ctrl.queue().is_empty());

    handler.on_update(&c1(), &web, &svc("default", "web", "6"));
    assert_eq!(f.ctrl.queue().len(), 1);
}

#[tokio::test]
async fn failed_create_is_retried_with_backoff_and_keeps_its_kind() {
    let f = fixture(OrphanPolicy::Retain);
    let handler = f.ctrl.handler();
    let key = TenantObjectRef::new(c1(), "default", "web");
    let web = svc("default", "web", "1");
    f.cache.put(web.clone());
    handler.on_add(&c1(), &web);

    f.host.fail_next(common::api_err(503, "ServiceUnavailable"));
    step(&f.ctrl).await;
    assert_eq!(f.host.len(), 0);
    assert_eq!(f.ctrl.queue().num_requeues(&key), 1);

    // the retry lands after the backoff and is still treated as a create
    step(&f.ctrl).await;
    assert_eq!(f.host.len(), 1);
    assert_eq!(f.host.create_calls(), 2);
    assert_eq!(f.ctrl.queue().num_requeues(&key), 0);
}

#[tokio::test]
async fn keys_of_removed_clusters_are_dropped() {
    let f = fixture(OrphanPolicy::Retain);
    let handler = f.ctrl.handler();
    let web = svc("default", "web", "1");
    f.cache.put(web.clone());
    handler.on_add(&c1(), &web);

    assert_eq!(f.ctrl.remove_cluster(&c1()).await.unwrap(), 0);
    assert!(!f.ctrl.registry().contains(&c1()));
    step(&f.ctrl).await;
    assert_eq!(f.host.create_calls(), 0);
}

#[tokio::test]
async fn purge_policy_cleans_up_on_cluster_removal() {
    let f = fixture(OrphanPolicy::Purge);
    let handler = f.ctrl.handler();
    for name in ["web", "db"] {
        let s = svc("default", name, "1");
        f.cache.put(s.clone());
        handler.on_add(&c1(), &s);
        step(&f.ctrl).await;
    }
    assert_eq!(f.host.len(), 2);

    assert_eq!(f.ctrl.remove_cluster(&c1()).await.unwrap(), 2);
    assert_eq!(f.host.len(), 0);
}

#[tokio::test]
async fn purge_reports_failures_but_still_removes_the_cluster() {
    let f = fixture(OrphanPolicy::Purge);
    let handler = f.ctrl.handler();
    for name in ["api", "db", "web"] {
        let s = svc("default", name, "1");
        f.cache.put(s.clone());
        handler.on_add(&c1(), &s);
        step(&f.ctrl).await;
    }
    assert_eq!(f.host.len(), 3);

    // host objects are swept in name order, so "api" is the one that fails
    f.host.fail_next(common::api_err(500, "InternalError"));
    assert!(f.ctrl.remove_cluster(&c1()).await.is_err());
    assert!(!f.ctrl.registry().contains(&c1()));
    assert_eq!(f.host.delete_calls(), 3);
    assert_eq!(f.host.len(), 1);
    assert!(f.host.object(&to_host_namespace(&c1(), "default"), "api").is_some());
}

#[tokio::test]
async fn retain_policy_leaves_mirrored_objects() {
    let f = fixture(OrphanPolicy::Retain);
    let handler = f.ctrl.handler();
    let web = svc("default", "web", "1");
    f.cache.put(web.clone());
    handler.on_add(&c1(), &web);
    step(&f.ctrl).await;

    f.ctrl.remove_cluster(&c1()).await.unwrap();
    assert_eq!(f.host.len(), 1);
}

#[tokio::test]
async fn run_drains_and_stops_on_shutdown() {
    let f = fixture(OrphanPolicy::Retain);
    let handler = f.ctrl.handler();
    for i in 0..20 {
        let s = svc("default", &format!("svc-{i}"), "1");
        f.cache.put(s.clone());
        handler.on_add(&c1(), &s);
    }
    let (tx, rx) = tokio::sync::watch::channel(false);
    let run = tokio::spawn(Arc::clone(&f.ctrl).run(rx));

    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while f.host.len() < 20 && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(f.host.len(), 20);

    tx.send(true).unwrap();
    tokio::time::timeout(Duration::from_secs(1), run).await.unwrap().unwrap();
    assert!(f.ctrl.queue().is_shutting_down());
}
