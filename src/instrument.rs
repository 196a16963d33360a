//! The devtools seam: every primitive accepts an optional [`Instrument`] invoked at construction
//! and at a handful of well-known points. The core never depends on what's on the other end of
//! the hook — a real devtools panel, a test probe, or nothing at all.

use crate::node::NodeHandle;

/// An event a devtools collaborator might care about. Emission timing is best-effort and
/// synchronous; the core makes no stronger guarantee. Whether to buffer and deliver snapshots on
/// a microtask boundary instead is left to whatever external collaborator consumes the hook.
#[derive(Debug)]
pub enum Event {
    Read { node: NodeHandle },
    Write { node: NodeHandle },
    ComputedValue { node: NodeHandle },
    EffectRun { node: NodeHandle },
    EffectDispose { node: NodeHandle },
    GraphSnapshot,
}

/// An optional hook wired into a primitive's constructor. The plain (non-`_instrumented`)
/// constructors use [`Instrument::default`], which does nothing.
#[derive(Default, Clone)]
pub struct Instrument {
    on_event: Option<std::rc::Rc<dyn Fn(Event)>>,
}

impl Instrument {
    pub fn new(on_event: impl Fn(Event) + 'static) -> Self {
        Instrument {
            on_event: Some(std::rc::Rc::new(on_event)),
        }
    }

    pub(crate) fn emit(&self, event: Event) {
        if let Some(cb) = &self.on_event {
            cb(event);
        }
    }
}

impl std::fmt::Debug for Instrument {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Instrument")
            .field("on_event", &self.on_event.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use crate::*;

    #[test]
    fn instrument_fires_on_every_read_write_and_recompute_not_just_creation() {
        create_root(|| {
            let events: Rc<RefCell<Vec<&'static str>>> = Rc::new(RefCell::new(Vec::new()));
            let log = events.clone();
            let instrument = Instrument::new(move |event| {
                log.borrow_mut().push(match event {
                    Event::Read { .. } => "read",
                    Event::Write { .. } => "write",
                    Event::ComputedValue { .. } => "computed",
                    Event::EffectRun { .. } => "effect_run",
                    Event::EffectDispose { .. } => "effect_dispose",
                    Event::GraphSnapshot => "snapshot",
                });
            });
            let count = create_signal_instrumented(1, instrument);
            count.get();
            count.set(2);
            count.set(3);

            let seen = events.borrow();
            assert_eq!(seen.iter().filter(|e| **e == "read").count(), 1);
            assert_eq!(seen.iter().filter(|e| **e == "write").count(), 2);
        });
    }

    #[test]
    fn effect_dispose_event_fires_on_teardown() {
        create_root(|| {
            let disposed = Rc::new(RefCell::new(false));
            let flag = disposed.clone();
            let instrument = Instrument::new(move |event| {
                if matches!(event, Event::EffectDispose { .. }) {
                    *flag.borrow_mut() = true;
                }
            });
            let trigger = create_signal(0);
            let handle = create_effect_instrumented(
                move || {
                    trigger.get();
                },
                instrument,
            );
            handle.dispose();
            assert!(*disposed.borrow());
        });
    }
}
