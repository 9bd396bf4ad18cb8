//! End-to-end theater scenarios on the lab platform.
//!
//! Run with: `cargo test --test e2e_theater`

use std::any::Any;
use std::cell::RefCell;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll, Waker};
use std::time::Duration;

use stagecraft::cue::{self, Hint};
use stagecraft::role::{Casting, Role, SceneEntry, Stagehand};
use stagecraft::scene::{solo, stepper, Scene, Step};
use stagecraft::types::{payload, unit, unpack, Payload, Signal};
use stagecraft::{scene_table, Blooper, BlooperKind, Theater, Verdict};

struct Plain;

impl Role for Plain {
    fn as_any(&self) -> &dyn Any {
        self
    }
    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

struct Counter {
    count: i64,
}

impl Counter {
    fn add_scene(stagehand: &Stagehand, params: Payload) -> Result<Box<dyn Scene>, Blooper> {
        let stagehand = stagehand.clone();
        Ok(solo(move |_| {
            let n = unpack::<i64>(&params).unwrap_or(1);
            let total = stagehand.with_role::<Counter, _>(|role| {
                role.count += n;
                role.count
            })?;
            Ok(payload(total))
        }))
    }

    fn get_scene(stagehand: &Stagehand, _params: Payload) -> Result<Box<dyn Scene>, Blooper> {
        let stagehand = stagehand.clone();
        Ok(solo(move |_| {
            let count = stagehand.with_role::<Counter, _>(|role| role.count)?;
            Ok(payload(count))
        }))
    }
}

impl Role for Counter {
    fn as_any(&self) -> &dyn Any {
        self
    }
    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
    fn scene_table(&self) -> &'static [SceneEntry] {
        scene_table! {
            "add" => Counter::add_scene,
            "get" => Counter::get_scene,
        }
    }
}

/// Installs a test subscriber; events flow when the crate is built with
/// the `tracing-integration` feature.
fn init_test_logging() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

fn watched(hint: Hint<Payload>) -> Rc<RefCell<Option<Signal<Payload>>>> {
    let slot: Rc<RefCell<Option<Signal<Payload>>>> = Rc::new(RefCell::new(None));
    let writer = Rc::clone(&slot);
    cue::commit(hint, move |signal| *writer.borrow_mut() = Some(signal));
    slot
}

// Scenario A: an immediate scene driven synchronously.
#[test]
fn surprise_returns_immediate_scene_value() {
    init_test_logging();
    let (theater, _platform) = Theater::lab();
    let gig = theater.play(|_, _| Ok(solo(|_| Ok(payload(42_i32)))), unit());
    let value = theater.surprise(&gig).expect("surprise should succeed");
    assert_eq!(unpack::<i32>(&value), Some(42));
}

#[test]
fn surprise_rejects_multi_step_scenes() {
    let (theater, _platform) = Theater::lab();
    let slow = theater.clone();
    let gig = theater.play(
        move |_, _| {
            let slow = slow.clone();
            Ok(stepper(move |take, _| match take {
                0 => Ok(Step::Yield(slow.timeout(Duration::from_millis(1)))),
                _ => Ok(Step::Return(unit())),
            }))
        },
        unit(),
    );
    let result = theater.surprise(&gig);
    assert!(matches!(result, Err(ref b) if b.kind() == BlooperKind::Protocol));
}

#[test]
fn surprise_is_rejected_while_the_stage_is_open() {
    let (theater, platform) = Theater::lab();
    let nested = theater.clone();
    let result: Rc<RefCell<Option<Result<Payload, Blooper>>>> = Rc::new(RefCell::new(None));
    let seen = Rc::clone(&result);
    theater
        .run(
            move |_, _| {
                let nested = nested.clone();
                let seen = Rc::clone(&seen);
                Ok(solo(move |_| {
                    let inner = nested.play(|_, _| Ok(solo(|_| Ok(unit()))), unit());
                    *seen.borrow_mut() = Some(nested.surprise(&inner));
                    Ok(unit())
                }))
            },
            unit(),
        )
        .run();
    platform.run_until_idle();
    match result.borrow_mut().take() {
        Some(Err(blooper)) => assert_eq!(blooper.kind(), BlooperKind::Protocol),
        other => panic!("nested surprise should be rejected, got {other:?}"),
    };
}

// Scenario B: timeout ordering across two scenes under virtual time.
#[test]
fn timers_order_scene_completions() {
    init_test_logging();
    let (theater, platform) = Theater::lab();
    let spawn = |delay_ms: u64, tag: &'static str| {
        let th = theater.clone();
        theater.run(
            move |_, _| {
                let th = th.clone();
                Ok(stepper(move |take, _| match take {
                    0 => Ok(Step::Yield(th.timeout(Duration::from_millis(delay_ms)))),
                    _ => Ok(Step::Return(payload(tag))),
                }))
            },
            unit(),
        )
    };
    let a = spawn(10, "A");
    let b = spawn(20, "B");

    let done: Rc<RefCell<Option<Signal<Vec<Payload>>>>> = Rc::new(RefCell::new(None));
    let writer = Rc::clone(&done);
    cue::commit(
        cue::all(vec![a.when_done(), b.when_done()]),
        move |signal| *writer.borrow_mut() = Some(signal),
    );

    platform.run_until_idle();
    assert!(done.borrow().is_none(), "nothing resolves before the timers");
    platform.advance(Duration::from_millis(15));
    assert!(done.borrow().is_none(), "only A has resolved at 15ms");
    platform.advance(Duration::from_millis(10));
    match done.borrow_mut().take() {
        Some(Signal::Prompt(values)) => {
            let tags: Vec<_> = values.iter().map(|v| unpack::<&str>(v).unwrap()).collect();
            assert_eq!(tags, vec!["A", "B"]);
        }
        other => panic!("expected both completions, got {other:?}"),
    };
}

// Scenario E lives with the cue unit tests; this covers the theater end of
// cancellation: stopping a waiting gig rolls its commitment back and
// disarms the timer leaf.
#[test]
fn stopping_a_waiting_gig_rolls_back_its_timer() {
    let (theater, platform) = Theater::lab();
    let th = theater.clone();
    let gig = theater.run(
        move |_, _| {
            let th = th.clone();
            Ok(stepper(move |take, _| match take {
                0 => Ok(Step::Yield(th.timeout(Duration::from_millis(100)))),
                _ => Ok(Step::Return(unit())),
            }))
        },
        unit(),
    );
    platform.run_until_idle();
    assert_eq!(platform.armed_timers(), 1);
    gig.stop("changed plans");
    assert_eq!(platform.armed_timers(), 0, "rollback must disarm the timer");
    match gig.fate() {
        Some(Signal::Blooper(blooper)) => assert_eq!(blooper.kind(), BlooperKind::Stopped),
        other => panic!("expected a stop blooper, got {other:?}"),
    }
    // Time passing afterwards must not resurrect anything.
    platform.advance(Duration::from_millis(200));
    assert!(matches!(gig.fate(), Some(Signal::Blooper(_))));
}

#[test]
fn stop_on_inert_and_finished_gigs_is_a_noop() {
    let (theater, platform) = Theater::lab();
    let inert = theater.play(|_, _| Ok(solo(|_| Ok(unit()))), unit());
    inert.stop("never started");
    assert!(inert.fate().is_none(), "inert gig must stay inert");

    let done = theater.run(|_, _| Ok(solo(|_| Ok(payload(1_i32)))), unit());
    platform.run_until_idle();
    assert!(matches!(done.fate(), Some(Signal::Prompt(_))));
    done.stop("too late");
    assert!(matches!(done.fate(), Some(Signal::Prompt(_))));
}

#[test]
fn marked_scenes_dispatch_by_name() {
    let (theater, platform) = Theater::lab();
    let counter = theater
        .cast(Casting::new(|| Box::new(Counter { count: 0 })))
        .expect("cast should succeed");
    platform.run_until_idle();

    let add = theater.play_named(&counter, "add", payload(5_i64));
    add.run();
    platform.run_until_idle();
    match add.fate() {
        Some(Signal::Prompt(value)) => assert_eq!(unpack::<i64>(&value), Some(5)),
        other => panic!("expected the running total, got {other:?}"),
    }

    let get = theater.play_named(&counter, "get", unit());
    get.run();
    platform.run_until_idle();
    match get.fate() {
        Some(Signal::Prompt(value)) => assert_eq!(unpack::<i64>(&value), Some(5)),
        other => panic!("expected the stored count, got {other:?}"),
    }
}

#[test]
fn unknown_selector_without_improvisation_bloopers() {
    let (theater, platform) = Theater::lab();
    let counter = theater
        .cast(
            Casting::new(|| Box::new(Counter { count: 0 }))
                .with_guard(|_| Verdict::Forgive),
        )
        .expect("cast should succeed");
    platform.run_until_idle();

    let gig = theater.play_named(&counter, "tapdance", unit());
    gig.run();
    platform.run_until_idle();
    match gig.fate() {
        Some(Signal::Blooper(blooper)) => assert_eq!(blooper.kind(), BlooperKind::UnknownScene),
        other => panic!("expected an unknown-scene blooper, got {other:?}"),
    }
    assert!(counter.is_alive(), "forgiven agent keeps working");
}

#[test]
fn gigs_posted_during_initialisation_wait_for_the_debut() {
    struct SlowDebut;

    impl Role for SlowDebut {
        fn as_any(&self) -> &dyn Any {
            self
        }
        fn as_any_mut(&mut self) -> &mut dyn Any {
            self
        }
        fn debut_scene(&self, stagehand: &Stagehand) -> Option<Box<dyn Scene>> {
            let theater = stagehand.theater().clone();
            Some(stepper(move |take, _| match take {
                0 => Ok(Step::Yield(theater.timeout(Duration::from_millis(50)))),
                _ => Ok(Step::Return(unit())),
            }))
        }
    }

    let (theater, platform) = Theater::lab();
    let agent = theater
        .cast(Casting::new(|| Box::new(SlowDebut)))
        .expect("cast should succeed");
    let eager = theater.play_on(&agent, |_, _| Ok(solo(|_| Ok(payload("ran")))), unit());
    eager.run();
    platform.run_until_idle();
    assert!(
        eager.fate().is_none(),
        "gigs posted while initialising stay postponed"
    );
    platform.advance(Duration::from_millis(60));
    match eager.fate() {
        Some(Signal::Prompt(value)) => assert_eq!(unpack::<&str>(&value), Some("ran")),
        other => panic!("postponed gig should run after the debut, got {other:?}"),
    }
}

#[test]
fn exchange_moves_items_between_scenes() {
    let (theater, platform) = Theater::lab();
    let exchange = theater.exchange_with(0);

    let feed = exchange.clone();
    theater
        .run(
            move |_, _| {
                let feed = feed.clone();
                Ok(stepper(move |take, _| match take {
                    0 => Ok(Step::Yield(cue::adapt(feed.produce(payload(7_i32)), |signal| {
                        signal.map(|()| unit())
                    }))),
                    _ => Ok(Step::Return(unit())),
                }))
            },
            unit(),
        )
        .run();

    let drain = exchange.clone();
    let consumer = theater.run(
        move |_, _| {
            let drain = drain.clone();
            Ok(stepper(move |take, signal| match take {
                0 => Ok(Step::Yield(drain.consume())),
                _ => match signal {
                    Signal::Prompt(item) => Ok(Step::Return(item)),
                    Signal::Blooper(blooper) => Err(blooper),
                },
            }))
        },
        unit(),
    );

    platform.run_until_idle();
    match consumer.fate() {
        Some(Signal::Prompt(value)) => assert_eq!(unpack::<i32>(&value), Some(7)),
        other => panic!("consumer should receive the item, got {other:?}"),
    }
    assert!(!exchange.is_overflowing());
    assert!(!exchange.is_underflowing());
}

#[test]
fn foreign_promises_bridge_through_portals() {
    let (theater, platform) = Theater::lab();
    let th = theater.clone();
    let gig = theater.run(
        move |_, _| {
            let th = th.clone();
            Ok(stepper(move |take, signal| match take {
                0 => Ok(Step::Yield(th.adopt(async {
                    futures_lite::future::yield_now().await;
                    Signal::Prompt(payload(11_i32))
                }))),
                _ => match signal {
                    Signal::Prompt(value) => Ok(Step::Return(value)),
                    Signal::Blooper(blooper) => Err(blooper),
                },
            }))
        },
        unit(),
    );
    platform.run_until_idle();
    match gig.fate() {
        Some(Signal::Prompt(value)) => assert_eq!(unpack::<i32>(&value), Some(11)),
        other => panic!("foreign promise should resolve the scene, got {other:?}"),
    }
}

#[test]
fn fate_promise_resolves_like_a_future() {
    let (theater, platform) = Theater::lab();
    let gig = theater.run(|_, _| Ok(solo(|_| Ok(payload(3_i32)))), unit());
    let mut promise = gig.promised();

    let waker = Waker::noop();
    let mut cx = Context::from_waker(waker);
    // The first poll forks the janitor bridge; it has not run yet.
    assert!(Pin::new(&mut promise).poll(&mut cx).is_pending());

    platform.run_until_idle();
    match Pin::new(&mut promise).poll(&mut cx) {
        Poll::Ready(Ok(value)) => assert_eq!(unpack::<i32>(&value), Some(3)),
        other => panic!("promise should be ready, got {other:?}"),
    }
}

/// Counts wakes; stands in for an executor's waker.
#[derive(Default)]
struct WakeCounter(AtomicUsize);

impl WakeCounter {
    fn count(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }
}

impl std::task::Wake for WakeCounter {
    fn wake(self: Arc<Self>) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

#[test]
fn fate_promise_wakes_the_latest_waker_once() {
    let (theater, platform) = Theater::lab();
    let th = theater.clone();
    let gig = theater.run(
        move |_, _| {
            let th = th.clone();
            Ok(stepper(move |take, _| match take {
                0 => Ok(Step::Yield(th.timeout(Duration::from_millis(10)))),
                _ => Ok(Step::Return(payload(8_i32))),
            }))
        },
        unit(),
    );
    let mut promise = gig.promised();

    let stale = Arc::new(WakeCounter::default());
    let fresh = Arc::new(WakeCounter::default());

    let waker = Waker::from(Arc::clone(&stale));
    let mut cx = Context::from_waker(&waker);
    assert!(Pin::new(&mut promise).poll(&mut cx).is_pending());

    // The bridge gig commits to the completion; the source still waits on
    // its timer.
    platform.run_until_idle();

    // Re-polling replaces the stored waker; the stale one never fires.
    let waker = Waker::from(Arc::clone(&fresh));
    let mut cx = Context::from_waker(&waker);
    assert!(Pin::new(&mut promise).poll(&mut cx).is_pending());

    platform.advance(Duration::from_millis(20));
    assert_eq!(stale.count(), 0);
    assert_eq!(fresh.count(), 1);

    match Pin::new(&mut promise).poll(&mut cx) {
        Poll::Ready(Ok(value)) => assert_eq!(unpack::<i32>(&value), Some(8)),
        other => panic!("promise should resolve with the scene value, got {other:?}"),
    }
}

#[test]
fn mourn_reveals_immediately_for_the_already_dead() {
    let (theater, platform) = Theater::lab();
    let agent = theater
        .cast(Casting::new(|| Box::new(Plain)))
        .expect("cast should succeed");
    platform.run_until_idle();
    let killed = agent.kill();
    platform.run_until_idle();
    assert!(matches!(killed.fate(), Some(Signal::Prompt(_))));
    assert!(!agent.is_alive());

    let grief = watched(theater.mourn(&agent));
    match grief.borrow_mut().take() {
        Some(Signal::Prompt(value)) => assert_eq!(unpack::<bool>(&value), Some(true)),
        other => panic!("mourn on a dead agent reveals at once, got {other:?}"),
    };
}
