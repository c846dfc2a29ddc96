//! Retry and failover against real servers

mod common;

use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;
use courier_middleware::{
    Address, Call, Caller, Error, MemoryDirectory, PolicyError, ProxyOptions,
};

use common::{Calculator, address, dispatcher, publish, serve, tcp};

#[tokio::test]
async fn test_failover_skips_dead_instance() {
    let _ = tracing_subscriber::fmt::try_init();

    let directory = Arc::new(MemoryDirectory::new());
    let dead = address(1);
    let live = address(2);
    publish(&directory, "calculator", dead).await;
    publish(&directory, "calculator", live).await;

    let invoker = serve(
        tcp(),
        Arc::clone(&directory),
        vec![dispatcher(live, Calculator::default())],
    )
    .await;

    let caller = Caller::builder("calculator", dead, tcp())
        .directory(directory)
        .failover(3)
        .build()
        .unwrap();
    let reply = caller
        .call(Call::new("sum").arg(2i32).arg(3i32))
        .await
        .unwrap();

    assert_eq!(reply.served_by(), Some(live));
    assert_eq!(reply.address_chain(), &[dead, live]);
    // Without update_reference the caller stays bound where it was
    assert_eq!(caller.address(), dead);

    invoker.stop().await.unwrap();
}

#[tokio::test]
async fn test_failover_budget_of_one_is_exhausted() {
    let _ = tracing_subscriber::fmt::try_init();

    let directory = Arc::new(MemoryDirectory::new());
    let dead = address(1);
    publish(&directory, "calculator", dead).await;

    let caller = Caller::builder("calculator", dead, tcp())
        .directory(directory)
        .failover(1)
        .build()
        .unwrap();

    let result = tokio::time::timeout(
        Duration::from_secs(10),
        caller.invoke(Call::new("sum").arg(2i32).arg(3i32)),
    )
    .await
    .unwrap();
    assert_matches!(
        result,
        Err(Error::Policy(PolicyError::Exhausted { attempts: 1, .. }))
    );
}

#[tokio::test]
async fn test_not_bound_fault_triggers_failover() {
    let _ = tracing_subscriber::fmt::try_init();

    let directory = Arc::new(MemoryDirectory::new());
    let live = address(2);
    let vacant = Address::at(1, live.endpoint());
    publish(&directory, "calculator", vacant).await;
    publish(&directory, "calculator", live).await;

    let invoker = serve(
        tcp(),
        Arc::clone(&directory),
        vec![dispatcher(live, Calculator::default())],
    )
    .await;

    let caller = Caller::builder("calculator", vacant, tcp())
        .directory(directory)
        .failover(2)
        .build()
        .unwrap();

    assert_eq!(
        caller
            .invoke_as::<i32>(Call::new("sub").arg(9i32).arg(4i32))
            .await
            .unwrap(),
        5
    );

    invoker.stop().await.unwrap();
}

#[tokio::test]
async fn test_staged_retry_moves_to_other_instance_and_rebinds() {
    let _ = tracing_subscriber::fmt::try_init();

    let directory = Arc::new(MemoryDirectory::new());
    let dead = address(1);
    let live = address(2);
    publish(&directory, "calculator", dead).await;
    publish(&directory, "calculator", live).await;

    let invoker = serve(
        tcp(),
        Arc::clone(&directory),
        vec![dispatcher(live, Calculator::default())],
    )
    .await;

    let options = ProxyOptions::default()
        .with_retry_on_registered(2, Duration::from_millis(10))
        .with_retry_on_other(2)
        .with_update_reference(true);
    let caller = Caller::builder("calculator", dead, tcp())
        .options(options)
        .directory(directory)
        .build()
        .unwrap();

    let reply = caller
        .call(Call::new("sum").arg(20i32).arg(22i32))
        .await
        .unwrap();
    assert_eq!(reply.served_by(), Some(live));
    assert_eq!(caller.address(), live);

    // Rebound: the next call goes straight to the live instance
    let reply = caller
        .call(Call::new("sum").arg(1i32).arg(1i32))
        .await
        .unwrap();
    assert_eq!(reply.address_chain(), &[live]);

    invoker.stop().await.unwrap();
}

#[tokio::test]
async fn test_registered_retries_exhausted() {
    let _ = tracing_subscriber::fmt::try_init();

    let dead = address(1);
    let caller = Caller::builder("calculator", dead, tcp())
        .options(ProxyOptions::default().with_retry_on_registered(2, Duration::from_millis(5)))
        .build()
        .unwrap();

    assert_matches!(
        caller.invoke(Call::new("sum").arg(1i32).arg(2i32)).await,
        Err(Error::Policy(PolicyError::Exhausted { attempts: 3, .. }))
    );
}
