//! Static dispatch tables built once per service type.

use futures::future::BoxFuture;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use crate::fault::MethodFault;
use crate::value::{Typed, TypedValue, Value, ValueType};

/// Future of a method body.
pub type MethodFuture = BoxFuture<'static, Result<TypedValue, MethodFault>>;

/// Future of an accessor body.
pub type AccessorFuture<S> = BoxFuture<'static, Result<Arc<S>, MethodFault>>;

/// Converts raw arguments and starts a method. `Err` means the arguments do
/// not fit the signature.
pub type MethodHandler<S> =
    Arc<dyn Fn(Arc<S>, Vec<Value>) -> Result<MethodFuture, String> + Send + Sync>;

/// Converts raw arguments and starts an accessor.
pub type AccessorHandler<S> =
    Arc<dyn Fn(Arc<S>, Vec<Value>) -> Result<AccessorFuture<S>, String> + Send + Sync>;

/// Name plus declared parameter types.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Signature {
    name: String,
    params: Vec<ValueType>,
}

impl Signature {
    /// Create a signature.
    pub fn new(name: impl Into<String>, params: Vec<ValueType>) -> Self {
        Self {
            name: name.into(),
            params,
        }
    }

    /// Name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Parameter types.
    #[must_use]
    pub fn params(&self) -> &[ValueType] {
        &self.params
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(", self.name)?;
        for (i, param) in self.params.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{param}")?;
        }
        f.write_str(")")
    }
}

/// Methods and accessors a service exposes.
pub struct MethodTable<S> {
    methods: HashMap<Signature, MethodHandler<S>>,
    accessors: HashMap<Signature, AccessorHandler<S>>,
}

impl<S> Default for MethodTable<S> {
    fn default() -> Self {
        Self {
            methods: HashMap::new(),
            accessors: HashMap::new(),
        }
    }
}

impl<S> fmt::Debug for MethodTable<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MethodTable")
            .field("methods", &self.methods.keys().collect::<Vec<_>>())
            .field("accessors", &self.accessors.keys().collect::<Vec<_>>())
            .finish()
    }
}

fn take_arg<T: Typed>(args: &mut impl Iterator<Item = Value>, position: usize) -> Result<T, String> {
    let value = args
        .next()
        .ok_or_else(|| format!("missing argument {position}"))?;
    T::from_value(value).ok_or_else(|| format!("argument {position} is not a valid {}", T::TYPE))
}

macro_rules! define_typed_methods {
    ($( $(#[$doc:meta])* $method:ident ( $($arg:ident : $ty:ident),* ) ),* $(,)?) => {
        $(
            $(#[$doc])*
            pub fn $method<$($ty,)* R, F, Fut>(&mut self, name: &str, handler: F) -> &mut Self
            where
                $($ty: Typed,)*
                R: Typed,
                F: Fn(Arc<S> $(, $ty)*) -> Fut + Send + Sync + 'static,
                Fut: Future<Output = Result<R, MethodFault>> + Send + 'static,
            {
                let params = vec![$($ty::TYPE),*];
                self.method(name, params, move |target, args| {
                    #[allow(unused_mut, unused_variables)]
                    let mut args = args.into_iter();
                    #[allow(unused_mut, unused_assignments)]
                    let mut _position = 0usize;
                    $(
                        let $arg: $ty = take_arg(&mut args, _position)?;
                        _position += 1;
                    )*
                    let future = handler(target $(, $arg)*);
                    Ok(Box::pin(async move { future.await.map(TypedValue::of) }) as MethodFuture)
                })
            }
        )*
    };
}

macro_rules! define_typed_accessors {
    ($( $(#[$doc:meta])* $accessor:ident ( $($arg:ident : $ty:ident),* ) ),* $(,)?) => {
        $(
            $(#[$doc])*
            pub fn $accessor<$($ty,)* F, Fut>(&mut self, name: &str, handler: F) -> &mut Self
            where
                $($ty: Typed,)*
                F: Fn(Arc<S> $(, $ty)*) -> Fut + Send + Sync + 'static,
                Fut: Future<Output = Result<Arc<S>, MethodFault>> + Send + 'static,
            {
                let params = vec![$($ty::TYPE),*];
                self.accessor(name, params, move |target, args| {
                    #[allow(unused_mut, unused_variables)]
                    let mut args = args.into_iter();
                    #[allow(unused_mut, unused_assignments)]
                    let mut _position = 0usize;
                    $(
                        let $arg: $ty = take_arg(&mut args, _position)?;
                        _position += 1;
                    )*
                    Ok(Box::pin(handler(target $(, $arg)*)) as AccessorFuture<S>)
                })
            }
        )*
    };
}

impl<S: Send + Sync + 'static> MethodTable<S> {
    /// Create an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a method over raw values.
    pub fn method<F>(&mut self, name: &str, params: Vec<ValueType>, handler: F) -> &mut Self
    where
        F: Fn(Arc<S>, Vec<Value>) -> Result<MethodFuture, String> + Send + Sync + 'static,
    {
        self.methods
            .insert(Signature::new(name, params), Arc::new(handler));
        self
    }

    /// Register an accessor over raw values.
    pub fn accessor<F>(&mut self, name: &str, params: Vec<ValueType>, handler: F) -> &mut Self
    where
        F: Fn(Arc<S>, Vec<Value>) -> Result<AccessorFuture<S>, String> + Send + Sync + 'static,
    {
        self.accessors
            .insert(Signature::new(name, params), Arc::new(handler));
        self
    }

    define_typed_methods!(
        /// Register a method without parameters.
        method0(),
        /// Register a method with one parameter.
        method1(a: A),
        /// Register a method with two parameters.
        method2(a: A, b: B),
        /// Register a method with three parameters.
        method3(a: A, b: B, c: C),
    );

    define_typed_accessors!(
        /// Register an accessor without parameters.
        accessor0(),
        /// Register an accessor with one parameter.
        accessor1(a: A),
        /// Register an accessor with two parameters.
        accessor2(a: A, b: B),
    );

    /// Look up a method.
    #[must_use]
    pub fn find_method(&self, signature: &Signature) -> Option<&MethodHandler<S>> {
        self.methods.get(signature)
    }

    /// Look up an accessor.
    #[must_use]
    pub fn find_accessor(&self, signature: &Signature) -> Option<&AccessorHandler<S>> {
        self.accessors.get(signature)
    }

    /// Whether a method with this exact signature exists.
    #[must_use]
    pub fn has_method(&self, name: &str, params: &[ValueType]) -> bool {
        self.methods.contains_key(&Signature::new(name, params.to_vec()))
    }

    /// Whether an accessor with this exact signature exists.
    #[must_use]
    pub fn has_accessor(&self, name: &str, params: &[ValueType]) -> bool {
        self.accessors
            .contains_key(&Signature::new(name, params.to_vec()))
    }

    /// Registered method signatures.
    pub fn method_signatures(&self) -> impl Iterator<Item = &Signature> {
        self.methods.keys()
    }
}
