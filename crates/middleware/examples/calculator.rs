//! Serves a calculator over TCP and calls it from the same process.
//!
//! Run with `RUST_LOG=debug` to see the exchanges.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use courier_middleware::skeleton::CREATE_INSTANCE;
use courier_middleware::{
    Address, Call, Caller, Directory, DirectoryEntry, Dispatcher, InstancePolicy, Invoker,
    InvokerConfig, MemoryDirectory, MethodFault, MethodTable, ProxyOptions, Service, Skeleton,
};
use courier_transport::Transport;
use courier_transport_tcp::TcpTransport;
use courier_util::allocate_socket_addr;
use parking_lot::Mutex;
use tracing::info;

#[derive(Default)]
struct Calculator {
    memory: Mutex<i32>,
}

impl Service for Calculator {
    const IDENTIFIER: &'static str = "calculator";
    const POLICY: InstancePolicy = InstancePolicy::PerCall;

    fn methods(table: &mut MethodTable<Self>) {
        table
            .accessor0(CREATE_INSTANCE, |_| async { Ok(Arc::new(Self::default())) })
            .method0("getMem", |calc: Arc<Self>| async move { Ok(*calc.memory.lock()) })
            .method1("setMem", |calc: Arc<Self>, value: i32| async move {
                *calc.memory.lock() = value;
                Ok(())
            })
            .method2("sum", |_, a: i32, b: i32| async move { Ok(a.wrapping_add(b)) })
            .method2("div", |_, a: i32, b: i32| async move {
                a.checked_div(b)
                    .ok_or_else(|| MethodFault::new("ArithmeticException", "/ by zero"))
            });
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let transport: Arc<dyn Transport> = Arc::new(TcpTransport::default());
    let directory = Arc::new(MemoryDirectory::new());

    let primary = Address::at(1, allocate_socket_addr());
    let backup = Address::at(2, allocate_socket_addr());
    for address in [primary, backup] {
        directory
            .bind(DirectoryEntry::new(Calculator::IDENTIFIER, address))
            .await?;
    }

    let invoker = Invoker::new(
        Arc::clone(&transport),
        Arc::clone(&directory) as Arc<dyn Directory>,
        InvokerConfig::default(),
    );
    for address in [primary, backup] {
        let skeleton: Arc<dyn Dispatcher> =
            Arc::new(Skeleton::new(address, Calculator::default())?);
        invoker.bind(skeleton).await?;
    }
    invoker.start().await?;

    let caller = Caller::builder(Calculator::IDENTIFIER, primary, Arc::clone(&transport))
        .options(
            ProxyOptions::default()
                .with_retry_on_registered(2, Duration::from_millis(20))
                .with_retry_on_other(1)
                .with_update_reference(true),
        )
        .directory(directory)
        .build()?;

    let sum = caller
        .invoke_as::<i32>(Call::new("sum").arg(2).arg(3))
        .await?;
    info!("sum(2, 3) = {}", sum);

    caller.invoke(Call::new("setMem").arg(42)).await?;
    let fresh = caller
        .invoke_as::<i32>(Call::new("getMem").on_instance(CREATE_INSTANCE, vec![]))
        .await?;
    let kept = caller.invoke_as::<i32>(Call::new("getMem")).await?;
    info!("memory: bound object {}, fresh instance {}", kept, fresh);

    if let Err(err) = caller.invoke(Call::new("div").arg(1).arg(0)).await {
        info!("div(1, 0) failed as expected: {}", err);
    }

    // Take the primary away; the caller fails over and rebinds to the backup
    invoker.stop().await?;
    invoker.unbind(&primary).await?;
    invoker.start().await?;

    let sum = caller
        .invoke_as::<i32>(Call::new("sum").arg(20).arg(22))
        .await?;
    info!("sum(20, 22) = {} served at {}", sum, caller.address());

    if let Some(stats) = invoker.statistics(&backup).await {
        info!(
            "backup served {} calls, average latency {:?}",
            stats.invocations, stats.average_latency
        );
    }

    invoker.stop().await?;
    Ok(())
}
