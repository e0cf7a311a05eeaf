//! Per-request context — the request plus type-keyed request extensions.
//!
//! Extensions carry request-scoped state between middleware layers. The
//! flags setup middleware stores the per-request [`Flags`](crate::flags::Flags)
//! handle here, and everything downstream reads it back by type.

use std::{
    any::{Any, TypeId},
    collections::HashMap,
    fmt,
};

use crate::Request;

/// Type-erased map holding at most one value per type.
#[derive(Default)]
pub struct Extensions {
    map: HashMap<TypeId, Box<dyn Any + Send + Sync>>,
}

impl Extensions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a value, returning the previous value of the same type.
    pub fn insert<T>(&mut self, value: T) -> Option<T>
    where
        T: Send + Sync + 'static,
    {
        self.map
            .insert(TypeId::of::<T>(), Box::new(value))
            .and_then(|prev| prev.downcast::<T>().ok())
            .map(|prev| *prev)
    }

    pub fn get<T>(&self) -> Option<&T>
    where
        T: Send + Sync + 'static,
    {
        self.map
            .get(&TypeId::of::<T>())
            .and_then(|value| value.downcast_ref::<T>())
    }

    pub fn get_mut<T>(&mut self) -> Option<&mut T>
    where
        T: Send + Sync + 'static,
    {
        self.map
            .get_mut(&TypeId::of::<T>())
            .and_then(|value| value.downcast_mut::<T>())
    }

    pub fn contains<T>(&self) -> bool
    where
        T: Send + Sync + 'static,
    {
        self.map.contains_key(&TypeId::of::<T>())
    }

    pub fn remove<T>(&mut self) -> Option<T>
    where
        T: Send + Sync + 'static,
    {
        self.map
            .remove(&TypeId::of::<T>())
            .and_then(|value| value.downcast::<T>().ok())
            .map(|value| *value)
    }
}

impl fmt::Debug for Extensions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Extensions")
            .field("len", &self.map.len())
            .finish()
    }
}

/// Per-request context threaded through the middleware pipeline.
#[derive(Debug)]
pub struct Context {
    request: Request,
    extensions: Extensions,
}

impl Context {
    pub fn new(request: Request) -> Self {
        Self {
            request,
            extensions: Extensions::new(),
        }
    }

    pub fn request(&self) -> &Request {
        &self.request
    }

    pub fn extensions(&self) -> &Extensions {
        &self.extensions
    }

    pub fn extensions_mut(&mut self) -> &mut Extensions {
        &mut self.extensions
    }

    /// Consumes the context, returning the request and its extensions.
    pub fn into_parts(self) -> (Request, Extensions) {
        (self.request, self.extensions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Method;

    #[derive(Debug, PartialEq)]
    struct RequestId(u64);

    #[test]
    fn extensions_are_keyed_by_type() {
        let mut ext = Extensions::new();
        assert!(ext.insert(RequestId(1)).is_none());
        assert_eq!(ext.insert(RequestId(2)), Some(RequestId(1)));
        assert_eq!(ext.get::<RequestId>(), Some(&RequestId(2)));
        assert!(ext.get::<String>().is_none());

        ext.get_mut::<RequestId>().unwrap().0 = 3;
        assert_eq!(ext.remove::<RequestId>(), Some(RequestId(3)));
        assert!(!ext.contains::<RequestId>());
    }

    #[test]
    fn context_exposes_request_and_extensions() {
        let mut ctx = Context::new(Request::new(Method::Get, "/"));
        ctx.extensions_mut().insert(RequestId(7));
        assert_eq!(ctx.request().path(), "/");

        let (request, ext) = ctx.into_parts();
        assert_eq!(request.method(), &Method::Get);
        assert_eq!(ext.get::<RequestId>(), Some(&RequestId(7)));
    }
}
