//! Server-side admission control and concurrent dispatch

mod common;

use std::collections::HashSet;
use std::sync::Arc;

use assert_matches::assert_matches;
use courier_middleware::{
    AdmissionMode, AdmissionOptions, Call, Caller, Dispatcher, Error, MemoryDirectory, Skeleton,
};

use common::{Counter, Slow, address, dispatcher, publish, serve, tcp};

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_increments_are_all_counted() {
    let _ = tracing_subscriber::fmt::try_init();

    let counter = address(1);
    let invoker = serve(
        tcp(),
        Arc::new(MemoryDirectory::new()),
        vec![dispatcher(counter, Counter::default())],
    )
    .await;
    let caller = Caller::builder("counter", counter, tcp()).build().unwrap();

    const CALLS: usize = 50;
    let tasks: Vec<_> = (0..CALLS)
        .map(|_| {
            let caller = caller.clone();
            tokio::spawn(async move { caller.invoke_as::<i64>(Call::new("increment")).await })
        })
        .collect();
    for task in tasks {
        task.await.unwrap().unwrap();
    }

    assert_eq!(
        caller.invoke_as::<i64>(Call::new("get")).await.unwrap(),
        i64::try_from(CALLS).unwrap()
    );

    let stats = invoker.statistics(&counter).await.unwrap();
    assert_eq!(stats.invocations, CALLS as u64 + 1);
    assert_eq!(stats.in_flight, 0);
    assert!(stats.average_latency.is_some());

    invoker.stop().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_block_at_max_refuses_overlapping_call() {
    let _ = tracing_subscriber::fmt::try_init();

    let slow = address(1);
    let skeleton: Arc<dyn Dispatcher> = Arc::new(
        Skeleton::new(slow, Slow)
            .unwrap()
            .with_admission(AdmissionOptions::block_at(1))
            .unwrap(),
    );
    let invoker = serve(tcp(), Arc::new(MemoryDirectory::new()), vec![skeleton]).await;
    let caller = Caller::builder("slow", slow, tcp()).build().unwrap();

    let (first, second) = tokio::join!(
        caller.invoke_as::<i64>(Call::new("nap").arg(500i64)),
        caller.invoke_as::<i64>(Call::new("nap").arg(500i64)),
    );

    let (ok, refused) = if first.is_ok() {
        (first, second)
    } else {
        (second, first)
    };
    assert_eq!(ok.unwrap(), 500);
    assert_matches!(
        refused,
        Err(Error::Capacity {
            mode: AdmissionMode::BlockAtMax,
            ..
        })
    );

    let stats = invoker.statistics(&slow).await.unwrap();
    assert_eq!(stats.invocations, 1);

    invoker.stop().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_forward_at_max_uses_other_instance() {
    let _ = tracing_subscriber::fmt::try_init();

    let directory = Arc::new(MemoryDirectory::new());
    let primary = address(1);
    let secondary = address(2);
    publish(&directory, "slow", primary).await;
    publish(&directory, "slow", secondary).await;

    let forwarding: Arc<dyn Dispatcher> = Arc::new(
        Skeleton::new(primary, Slow)
            .unwrap()
            .with_admission(AdmissionOptions::forward_at(1))
            .unwrap(),
    );
    let invoker = serve(
        tcp(),
        Arc::clone(&directory),
        vec![forwarding, dispatcher(secondary, Slow)],
    )
    .await;
    let caller = Caller::builder("slow", primary, tcp()).build().unwrap();

    let (first, second) = tokio::join!(
        caller.call(Call::new("nap").arg(500i64)),
        caller.call(Call::new("nap").arg(500i64)),
    );

    let served: HashSet<_> = [first.unwrap(), second.unwrap()]
        .iter()
        .filter_map(|reply| reply.served_by())
        .collect();
    assert_eq!(served, HashSet::from([primary, secondary]));

    invoker.stop().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_forward_without_alternate_is_capacity_error() {
    let _ = tracing_subscriber::fmt::try_init();

    let directory = Arc::new(MemoryDirectory::new());
    let primary = address(1);
    publish(&directory, "slow", primary).await;

    let forwarding: Arc<dyn Dispatcher> = Arc::new(
        Skeleton::new(primary, Slow)
            .unwrap()
            .with_admission(AdmissionOptions::forward_at(1))
            .unwrap(),
    );
    let invoker = serve(tcp(), Arc::clone(&directory), vec![forwarding]).await;
    let caller = Caller::builder("slow", primary, tcp()).build().unwrap();

    let (first, second) = tokio::join!(
        caller.invoke_as::<i64>(Call::new("nap").arg(500i64)),
        caller.invoke_as::<i64>(Call::new("nap").arg(500i64)),
    );

    let refused = if first.is_ok() { second } else { first };
    assert_matches!(
        refused,
        Err(Error::Capacity {
            mode: AdmissionMode::ForwardAtMax,
            ..
        })
    );

    invoker.stop().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_queue_at_max_serves_everyone() {
    let _ = tracing_subscriber::fmt::try_init();

    let slow = address(1);
    let skeleton: Arc<dyn Dispatcher> = Arc::new(
        Skeleton::new(slow, Slow)
            .unwrap()
            .with_admission(AdmissionOptions::queue_at(1))
            .unwrap(),
    );
    let invoker = serve(tcp(), Arc::new(MemoryDirectory::new()), vec![skeleton]).await;
    let caller = Caller::builder("slow", slow, tcp()).build().unwrap();

    let (first, second, third) = tokio::join!(
        caller.invoke_as::<i64>(Call::new("nap").arg(50i64)),
        caller.invoke_as::<i64>(Call::new("nap").arg(50i64)),
        caller.invoke_as::<i64>(Call::new("nap").arg(50i64)),
    );
    assert_eq!(first.unwrap() + second.unwrap() + third.unwrap(), 150);

    let stats = invoker.statistics(&slow).await.unwrap();
    assert_eq!(stats.invocations, 3);

    invoker.stop().await.unwrap();
}
