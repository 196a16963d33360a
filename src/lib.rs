//! A fine-grained reactive graph: signals, memos, effects and keyed-list reconciliation.
//!
//! Every producer, derived node and consumer lives in one arena owned by a [`Runtime`](runtime::Runtime),
//! connected by version-stamped dependency edges (see `edge.rs`). Writes push invalidation down
//! the graph; reads pull validation back up through it; nothing recomputes unless something it
//! actually reads changed.
//!
//! ```
//! use weave_reactive::*;
//!
//! create_root(|| {
//!     let count = create_signal(1);
//!     let doubled = create_memo(move || count.get() * 2);
//!     assert_eq!(doubled.get(), 2);
//!     count.set(21);
//!     assert_eq!(doubled.get(), 42);
//! });
//! ```

mod derived;
mod edge;
mod effect;
mod error;
mod instrument;
mod keyed;
mod lis;
mod node;
mod pull;
mod runtime;
mod scheduler;
mod signal;

pub use derived::{create_memo, create_memo_always_changed, create_memo_with_eq, Memo};
pub use effect::{
    create_effect, create_effect_instrumented, create_effect_with_strategy, create_subscription,
    EffectHandle,
};
pub use error::ReactiveError;
pub use instrument::{Event, Instrument};
pub use keyed::{reconcile, KeyedList, ReconcileCallbacks};
pub use node::NodeHandle;
pub use runtime::{
    batch, create_child_scope, create_root, on_cleanup, untrack, use_current_scope, RootHandle,
};
pub use scheduler::{Host, Strategy, SyncHost};
pub use signal::{create_signal, create_signal_instrumented, ReadSignal, Signal};

#[cfg(test)]
mod tests {
    use crate::*;

    #[test]
    fn diamond_recomputes_every_changed_write() {
        create_root(|| {
            let s = create_signal(10);
            let a = create_memo(move || s.get() * 2);
            let b = create_memo(move || s.get() + 1);
            let runs = create_signal(0);
            let e = create_memo(move || {
                runs.update(|n| {
                    *n += 1;
                    true
                });
                a.get() + b.get()
            });
            assert_eq!(e.get(), 31);
            assert_eq!(runs.get_untracked(), 1);

            s.set(20);
            assert_eq!(e.get(), 61);
            assert_eq!(runs.get_untracked(), 2);

            s.set(30);
            assert_eq!(e.get(), 91);
            assert_eq!(runs.get_untracked(), 3);

            s.set(40);
            assert_eq!(e.get(), 121);
            assert_eq!(runs.get_untracked(), 4);
        });
    }

    /// Minimum-work laziness: `A` and `B` both clamp to 0 while
    /// `s < 50`, so every write in that range changes `s`'s version but neither `a` nor `b`'s
    /// cached *value* — `e`, which only reads `a` and `b`, must not recompute after its first
    /// read even though three intervening writes happened upstream of it.
    #[test]
    fn filtered_diamond_suppresses_downstream_recompute() {
        create_root(|| {
            let s = create_signal(10);
            let a = create_memo(move || if s.get() < 50 { 0 } else { s.get() });
            let b = create_memo(move || if s.get() < 50 { 0 } else { s.get() });
            let e_runs = create_signal(0);
            let e = create_memo(move || {
                e_runs.update(|n| {
                    *n += 1;
                    true
                });
                a.get() + b.get()
            });
            assert_eq!(e.get(), 0);
            assert_eq!(e_runs.get_untracked(), 1);

            for s_value in [20, 30, 40] {
                s.set(s_value);
                assert_eq!(e.get(), 0);
            }
            assert_eq!(e_runs.get_untracked(), 1);

            s.set(100);
            assert_eq!(e.get(), 200);
            assert_eq!(e_runs.get_untracked(), 2);
        });
    }

    #[test]
    fn scope_dispose_tears_down_effects() {
        create_root(|| {
            let trigger = create_signal(0);
            let runs = create_signal(0);
            let scope = create_child_scope(move || {
                create_effect(move || {
                    trigger.get();
                    runs.update(|n| {
                        *n += 1;
                        true
                    });
                });
            });
            assert_eq!(runs.get_untracked(), 1);
            scope.dispose();
            trigger.set(1);
            assert_eq!(runs.get_untracked(), 1);
        });
    }

    #[test]
    #[cfg(feature = "trace")]
    fn instrumented_recompute_emits_spans() {
        use tracing_subscriber::layer::SubscriberExt;

        struct CountingLayer(std::sync::Arc<std::sync::atomic::AtomicUsize>);
        impl<S: tracing::Subscriber> tracing_subscriber::Layer<S> for CountingLayer {
            fn on_new_span(
                &self,
                _attrs: &tracing::span::Attributes<'_>,
                _id: &tracing::span::Id,
                _ctx: tracing_subscriber::layer::Context<'_, S>,
            ) {
                self.0.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            }
        }

        let count = std::sync::Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let subscriber =
            tracing_subscriber::registry().with(CountingLayer(count.clone()));
        tracing::subscriber::with_default(subscriber, || {
            create_root(|| {
                let s = create_signal(1);
                let doubled = create_memo(move || s.get() * 2);
                assert_eq!(doubled.get(), 2);
                s.set(21);
                assert_eq!(doubled.get(), 42);
            });
        });
        assert!(count.load(std::sync::atomic::Ordering::SeqCst) > 0);
    }
}
