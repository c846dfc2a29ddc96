//! Services and server setup shared by the integration tests

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use bytes::Bytes;
use courier_middleware::skeleton::{CREATE_INSTANCE, DESTROY_INSTANCE, INSTANCE_ACCESSOR};
use courier_middleware::{
    Address, Dispatcher, DirectoryEntry, InstancePolicy, InstanceRegistry, Invoker, InvokerConfig,
    MemoryDirectory, MethodFault, MethodTable, Service, Skeleton,
};
use courier_transport::Transport;
use courier_transport_tcp::TcpTransport;
use courier_transport_udp::UdpTransport;
use courier_util::allocate_socket_addr;
use parking_lot::Mutex;

/// Calculator with a memory cell; `create_instance()` yields a fresh one.
#[derive(Debug, Default)]
pub struct Calculator {
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
            .method2("sub", |_, a: i32, b: i32| async move { Ok(a.wrapping_sub(b)) })
            .method2("mul", |_, a: i32, b: i32| async move { Ok(a.wrapping_mul(b)) })
            .method2("div", |_, a: i32, b: i32| async move {
                a.checked_div(b)
                    .ok_or_else(|| MethodFault::new("ArithmeticException", "/ by zero"))
            })
            .method2("mod", |_, a: i32, b: i32| async move {
                a.checked_rem(b)
                    .ok_or_else(|| MethodFault::new("ArithmeticException", "/ by zero"))
            })
            .method2("quotient", |_, a: i32, b: i32| async move { Ok(a / b) })
            .method0("exception", |_| async {
                Err::<(), _>(MethodFault::new(
                    "UnsupportedOperation",
                    "Test remote exception throw.",
                ))
            });
    }
}

/// Memory cell whose instances are created and addressed by id.
#[derive(Debug, Default)]
pub struct Unicast {
    memory: Mutex<i32>,
    instances: InstanceRegistry<Unicast>,
}

impl Service for Unicast {
    const IDENTIFIER: &'static str = "unicast";
    const POLICY: InstancePolicy = InstancePolicy::Identified;

    fn methods(table: &mut MethodTable<Self>) {
        table
            .method0(CREATE_INSTANCE, |root: Arc<Self>| async move {
                Ok(root.instances.insert(Self::default()))
            })
            .method1(DESTROY_INSTANCE, |root: Arc<Self>, id: i32| async move {
                Ok(root.instances.remove(id).is_some())
            })
            .accessor1(INSTANCE_ACCESSOR, |root: Arc<Self>, id: i32| async move {
                root.instances
                    .get(id)
                    .ok_or_else(|| MethodFault::new("NoSuchInstance", format!("no instance {id}")))
            })
            .method0("getMem", |cell: Arc<Self>| async move { Ok(*cell.memory.lock()) })
            .method1("setMem", |cell: Arc<Self>, value: i32| async move {
                *cell.memory.lock() = value;
                Ok(())
            });
    }
}

/// Shared counter.
#[derive(Debug, Default)]
pub struct Counter {
    value: AtomicI64,
}

impl Service for Counter {
    const IDENTIFIER: &'static str = "counter";

    fn methods(table: &mut MethodTable<Self>) {
        table
            .method0("increment", |counter: Arc<Self>| async move {
                Ok(counter.value.fetch_add(1, Ordering::SeqCst) + 1)
            })
            .method0("get", |counter: Arc<Self>| async move {
                Ok(counter.value.load(Ordering::SeqCst))
            });
    }
}

/// Sleeps before answering.
#[derive(Debug, Default)]
pub struct Slow;

impl Service for Slow {
    const IDENTIFIER: &'static str = "slow";

    fn methods(table: &mut MethodTable<Self>) {
        table.method1("nap", |_, millis: i64| async move {
            tokio::time::sleep(Duration::from_millis(millis.unsigned_abs())).await;
            Ok(millis)
        });
    }
}

/// Reports the size of the blob it was sent.
#[derive(Debug, Default)]
pub struct Blob;

impl Service for Blob {
    const IDENTIFIER: &'static str = "blob";

    fn methods(table: &mut MethodTable<Self>) {
        table.method1("length", |_, data: Bytes| async move {
            Ok(i64::try_from(data.len()).unwrap_or(i64::MAX))
        });
    }
}

/// Recursive Fibonacci numbers.
#[derive(Debug, Default)]
pub struct Fibonacci;

impl Fibonacci {
    fn compute(n: i32) -> i64 {
        if n < 2 {
            i64::from(n.max(0))
        } else {
            Self::compute(n - 1) + Self::compute(n - 2)
        }
    }
}

impl Service for Fibonacci {
    const IDENTIFIER: &'static str = "fibonacci";

    fn methods(table: &mut MethodTable<Self>) {
        table.method1("fib", |_, n: i32| async move {
            if n > 40 {
                return Err(MethodFault::new("IllegalArgument", "n must be at most 40"));
            }
            Ok(Self::compute(n))
        });
    }
}

/// TCP transport with default settings.
pub fn tcp() -> Arc<dyn Transport> {
    Arc::new(TcpTransport::default())
}

/// UDP transport with default settings.
pub fn udp() -> Arc<dyn Transport> {
    Arc::new(UdpTransport::default())
}

/// A fresh loopback address for `object_id`.
pub fn address(object_id: i32) -> Address {
    Address::at(object_id, allocate_socket_addr())
}

/// Invoker settings with a short poll interval.
pub fn config() -> InvokerConfig {
    InvokerConfig::default().with_poll_interval(Duration::from_millis(50))
}

/// Bind `service` at `address` behind a skeleton.
pub fn dispatcher<S: Service>(address: Address, service: S) -> Arc<dyn Dispatcher> {
    Arc::new(Skeleton::new(address, service).unwrap())
}

/// Start an invoker serving `dispatchers`.
pub async fn serve(
    transport: Arc<dyn Transport>,
    directory: Arc<MemoryDirectory>,
    dispatchers: Vec<Arc<dyn Dispatcher>>,
) -> Invoker {
    let invoker = Invoker::new(transport, directory, config());
    for dispatcher in dispatchers {
        invoker.bind(dispatcher).await.unwrap();
    }
    invoker.start().await.unwrap();
    invoker
}

/// Publish `address` under `identifier`.
pub async fn publish(directory: &MemoryDirectory, identifier: &str, address: Address) {
    use courier_middleware::Directory;

    directory
        .bind(DirectoryEntry::new(identifier, address))
        .await
        .unwrap();
}
