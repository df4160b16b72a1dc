use std::{collections::HashSet, sync::Arc};

use subnet_lease::{
    BackoffPolicy, LeaseManager, MemoryRegistry, Registry, StaticSubnets, TokioSleep,
};

type Manager = LeaseManager<MemoryRegistry, StaticSubnets, TokioSleep>;

fn manager(registry: MemoryRegistry, pool: usize) -> Arc<Manager> {
    let subnets = (1..=pool).map(|n| format!("subnet-{n:02}"));
    Arc::new(LeaseManager::with_backoff(
        registry,
        StaticSubnets::new(subnets),
        BackoffPolicy::new(1, std::time::Duration::ZERO),
        TokioSleep,
    ))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_clusters_never_share_a_subnet() {
    let registry = MemoryRegistry::new();
    let mgr = manager(registry.clone(), 5);

    let tasks = (0..8)
        .map(|n| {
            let mgr = Arc::clone(&mgr);
            tokio::spawn(async move {
                let cluster = format!("cluster-{n}");
                let res = mgr.acquire_subnet(&cluster).await;
                (cluster, res)
            })
        })
        .collect::<Vec<_>>();

    let mut won = Vec::new();
    let mut out_of_subnets = 0;
    for task in tasks {
        let (cluster, res) = task.await.expect("claim task panicked");
        match res {
            Ok(subnet) => won.push((cluster, subnet)),
            Err(err) if err.is_out_of_subnets() => out_of_subnets += 1,
            Err(err) => panic!("unexpected claim error: {err}"),
        }
    }

    assert_eq!(won.len(), 5);
    assert_eq!(out_of_subnets, 3);

    let distinct = won.iter().map(|(_, subnet)| subnet).collect::<HashSet<_>>();
    assert_eq!(distinct.len(), won.len());

    let claims = registry.scan_all().await.unwrap();
    assert_eq!(claims.len(), 5);
    for (cluster, subnet) in &won {
        let owner = registry.get(subnet).await.unwrap().expect("claim exists");
        assert_eq!(&owner.cluster, cluster);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn retry_storm_converges_on_one_claim() {
    let registry = MemoryRegistry::new();
    let mgr = manager(registry.clone(), 6);

    // the same request retried concurrently may leave several claims behind
    let tasks = (0..4)
        .map(|_| {
            let mgr = Arc::clone(&mgr);
            tokio::spawn(async move { mgr.acquire_subnet("tenant-a").await })
        })
        .collect::<Vec<_>>();
    for task in tasks {
        task.await.expect("claim task panicked").expect("claim succeeds");
    }

    let kept = mgr.acquire_subnet("tenant-a").await.unwrap();
    let again = mgr.acquire_subnet("tenant-a").await.unwrap();
    assert_eq!(kept, again);

    let owned = registry
        .scan_all()
        .await
        .unwrap()
        .into_iter()
        .filter(|claim| claim.cluster == "tenant-a")
        .collect::<Vec<_>>();
    assert_eq!(owned.len(), 1);
    assert_eq!(owned[0].subnet_id, kept);
}
