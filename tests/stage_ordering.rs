//! Scheduler ordering and exclusivity guarantees.
//!
//! Run with: `cargo test --test stage_ordering`

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use stagecraft::scene::{solo, stepper, Step};
use stagecraft::types::{payload, unit, Signal};
use stagecraft::Theater;

type Log = Rc<RefCell<Vec<String>>>;

fn log_gig(theater: &Theater, log: &Log, tag: &'static str, steps: usize) -> stagecraft::Gig {
    let th = theater.clone();
    let log = Rc::clone(log);
    let gig = theater.play(
        move |_, _| {
            let th = th.clone();
            let log = Rc::clone(&log);
            Ok(stepper(move |take, _| {
                log.borrow_mut().push(format!("{tag}:enter{take}"));
                let out = if take + 1 < steps {
                    Step::Yield(th.timeout(Duration::from_millis(1)))
                } else {
                    Step::Return(payload(tag))
                };
                log.borrow_mut().push(format!("{tag}:exit{take}"));
                Ok(out)
            }))
        },
        unit(),
    );
    gig.run();
    gig
}

#[test]
fn steps_never_interleave() {
    let (theater, platform) = Theater::lab();
    let log: Log = Rc::new(RefCell::new(Vec::new()));
    log_gig(&theater, &log, "a", 3);
    log_gig(&theater, &log, "b", 3);
    platform.run_until_idle();
    platform.advance(Duration::from_millis(10));
    platform.advance(Duration::from_millis(10));

    // Every enter is immediately followed by its own exit: one gig on
    // stage at a time.
    let entries = log.borrow();
    for pair in entries.chunks(2) {
        let [enter, exit] = pair else {
            panic!("odd number of log entries");
        };
        assert_eq!(
            enter.replace(":enter", ":"),
            exit.replace(":exit", ":"),
            "interleaved steps: {entries:?}"
        );
    }
}

#[test]
fn one_agents_gigs_run_in_posting_order() {
    let (theater, platform) = Theater::lab();
    let log: Log = Rc::new(RefCell::new(Vec::new()));
    for tag in ["first", "second", "third"] {
        let log = Rc::clone(&log);
        theater
            .run(
                move |_, _| {
                    let log = Rc::clone(&log);
                    Ok(solo(move |_| {
                        log.borrow_mut().push(tag.to_string());
                        Ok(unit())
                    }))
                },
                unit(),
            );
    }
    platform.run_until_idle();
    assert_eq!(&*log.borrow(), &["first", "second", "third"]);
}

#[test]
fn yield_boundaries_are_fifo() {
    let (theater, platform) = Theater::lab();
    let log: Log = Rc::new(RefCell::new(Vec::new()));
    // Two multi-step gigs on the same (troupe) agent interleave at yield
    // boundaries with FIFO fairness.
    log_gig(&theater, &log, "x", 2);
    log_gig(&theater, &log, "y", 2);
    platform.run_until_idle();
    let first_round: Vec<_> = log
        .borrow()
        .iter()
        .filter(|entry| entry.contains("enter0"))
        .cloned()
        .collect();
    assert_eq!(first_round, vec!["x:enter0", "y:enter0"]);
    platform.advance(Duration::from_millis(5));
    let second_round: Vec<_> = log
        .borrow()
        .iter()
        .filter(|entry| entry.contains("enter1"))
        .cloned()
        .collect();
    assert_eq!(second_round, vec!["x:enter1", "y:enter1"]);
}

#[test]
fn synchronous_commitments_return_to_the_workload() {
    let (theater, platform) = Theater::lab();
    let gig = theater.run(
        |_, _| {
            Ok(stepper(|take, signal| match take {
                // A spark resolves during the commit, so the gig re-enters
                // the workload with its progress already set.
                0 => Ok(Step::Yield(stagecraft::cue::spark(Signal::Prompt(payload(
                    9_i32,
                ))))),
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
        Some(Signal::Prompt(value)) => {
            assert_eq!(stagecraft::types::unpack::<i32>(&value), Some(9));
        }
        other => panic!("expected the sparked value, got {other:?}"),
    }
}

#[test]
fn interrupts_are_counted_per_dispatch_class() {
    let (theater, platform) = Theater::lab();
    let immediate_before = theater.metrics().interrupts_immediate.get();
    theater.run(|_, _| Ok(solo(|_| Ok(unit()))), unit());
    platform.run_until_idle();
    // Posting armed a fast interrupt; the bootstrap surprises were
    // immediate ones.
    assert!(theater.metrics().interrupts_fast.get() >= 1);
    assert_eq!(theater.metrics().interrupts_immediate.get(), immediate_before);
    assert!(immediate_before >= 3, "bootstrap drives three surprises");
}

#[test]
fn metrics_track_gig_fates() {
    let (theater, platform) = Theater::lab();
    let prompted_before = theater.metrics().gigs_prompted.get();
    theater.run(|_, _| Ok(solo(|_| Ok(unit()))), unit());
    platform.run_until_idle();
    assert!(theater.metrics().gigs_prompted.get() > prompted_before);
}
