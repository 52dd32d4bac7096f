//! Mono: a publisher of at most one item

use crate::error::FlowError;
use crate::flux::Flux;
use crate::ops::{ObserverFactory, SignalObserver};
use crate::subscriber::{LambdaSubscriber, Subscriber, SubscriptionHandle};
use std::error::Error as StdError;
use std::fmt::Debug;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// A cold publisher of zero or one item
///
/// # Example
/// ```
/// use rivulet::Mono;
///
/// Mono::just("Hugo")
///     .map(|name| name.len())
///     .do_on_success(|len| println!("success {:?}", len))
///     .subscribe_next(|len| println!("length {}", len));
/// ```
pub struct Mono<T> {
    flux: Flux<T>,
}

impl<T> Clone for Mono<T> {
    fn clone(&self) -> Self {
        Self {
            flux: self.flux.clone(),
        }
    }
}

impl<T: Send + 'static> Mono<T> {
    /// Emit `value`, then complete
    pub fn just(value: T) -> Self
    where
        T: Clone + Sync,
    {
        Self {
            flux: Flux::just([value]),
        }
    }

    pub fn empty() -> Self {
        Self {
            flux: Flux::empty(),
        }
    }

    pub fn error(error: FlowError) -> Self {
        Self {
            flux: Flux::error(error),
        }
    }

    /// Take the first item of `flux`, cancelling the rest
    pub fn from_flux(flux: Flux<T>) -> Self {
        Self { flux: flux.take(1) }
    }

    pub fn into_flux(self) -> Flux<T> {
        self.flux
    }

    pub fn as_flux(&self) -> Flux<T> {
        self.flux.clone()
    }

    pub fn map<U, F>(&self, f: F) -> Mono<U>
    where
        U: Send + 'static,
        F: Fn(T) -> U + Send + Sync + 'static,
    {
        Mono {
            flux: self.flux.map(f),
        }
    }

    pub fn try_map<U, E, F>(&self, f: F) -> Mono<U>
    where
        U: Send + 'static,
        E: StdError + Send + Sync + 'static,
        F: Fn(T) -> Result<U, E> + Send + Sync + 'static,
    {
        Mono {
            flux: self.flux.try_map(f),
        }
    }

    /// Continue with the Mono produced from the value
    pub fn flat_map<U, F>(&self, f: F) -> Mono<U>
    where
        U: Send + 'static,
        F: Fn(T) -> Mono<U> + Send + Sync + 'static,
    {
        Mono {
            flux: self.flux.flat_map(move |value| f(value).into_flux()),
        }
    }

    /// Expand the value into a Flux
    pub fn flat_map_many<U, F>(&self, f: F) -> Flux<U>
    where
        U: Send + 'static,
        F: Fn(T) -> Flux<U> + Send + Sync + 'static,
    {
        self.flux.flat_map(f)
    }

    pub fn on_error_resume<F>(&self, handler: F) -> Mono<T>
    where
        F: Fn(FlowError) -> Mono<T> + Send + Sync + 'static,
    {
        Mono {
            flux: self
                .flux
                .on_error_resume(move |error| handler(error).into_flux()),
        }
    }

    pub fn on_error_return(&self, value: T) -> Mono<T>
    where
        T: Clone + Sync,
    {
        Mono {
            flux: self.flux.on_error_return(value),
        }
    }

    /// Run `f` when the Mono succeeds: with the value, or `None` if it
    /// completed empty
    pub fn do_on_success<F>(&self, f: F) -> Mono<T>
    where
        F: Fn(Option<&T>) + Send + Sync + 'static,
    {
        let f = Arc::new(f);
        let factory: ObserverFactory<T> = Arc::new(move || {
            Arc::new(SuccessObserver {
                emitted: AtomicBool::new(false),
                f: f.clone(),
            }) as Arc<dyn SignalObserver<T>>
        });
        Mono {
            flux: self.flux.observe_with(factory),
        }
    }

    pub fn do_on_error<F>(&self, f: F) -> Mono<T>
    where
        F: Fn(&FlowError) + Send + Sync + 'static,
    {
        Mono {
            flux: self.flux.do_on_error(f),
        }
    }

    pub fn log(&self, category: impl Into<String>) -> Mono<T>
    where
        T: Debug,
    {
        Mono {
            flux: self.flux.log(category),
        }
    }

    pub fn subscribe<S>(&self, subscriber: S)
    where
        S: Subscriber<T>,
    {
        self.flux.subscribe(subscriber);
    }

    pub fn subscribe_next<N>(&self, on_next: N) -> SubscriptionHandle
    where
        N: FnMut(T) + Send + 'static,
    {
        self.flux.subscribe_next(on_next)
    }

    pub fn subscribe_with<N, E, C>(
        &self,
        on_next: N,
        on_error: E,
        on_complete: C,
    ) -> SubscriptionHandle
    where
        N: FnMut(T) + Send + 'static,
        E: FnMut(FlowError) + Send + 'static,
        C: FnMut() + Send + 'static,
    {
        self.flux.subscribe_with(on_next, on_error, on_complete)
    }

    pub fn subscribe_lambda(&self, subscriber: LambdaSubscriber<T>) -> SubscriptionHandle {
        self.flux.subscribe_lambda(subscriber)
    }
}

impl<T: Send + 'static> From<Mono<T>> for Flux<T> {
    fn from(mono: Mono<T>) -> Self {
        mono.into_flux()
    }
}

struct SuccessObserver<F> {
    emitted: AtomicBool,
    f: Arc<F>,
}

impl<T, F> SignalObserver<T> for SuccessObserver<F>
where
    F: Fn(Option<&T>) + Send + Sync + 'static,
{
    fn on_next(&self, item: &T) {
        self.emitted.store(true, Ordering::Release);
        (self.f)(Some(item));
    }

    fn on_complete(&self) {
        if !self.emitted.load(Ordering::Acquire) {
            (self.f)(None);
        }
    }
}
