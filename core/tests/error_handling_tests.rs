// tests/error_handling_tests.rs
mod common;

use common::*;
use parking_lot::Mutex;
use serial_test::serial;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use stepchain::scheduler::Scheduler;
use stepchain::{Args, AsyncSteps, ChainPhase, Frame, StepError};

#[test]
fn test_sibling_handler_recovery_feeds_next_step() {
  setup_tracing();
  let (chain, scheduler, unhandled) = observed_chain();
  let rec = Recorder::new();

  let r_outer = rec.clone();
  let r_handler = rec.clone();
  let r_next = rec.clone();
  chain
    .add_with_handler(
      move |f, _| {
        let r_handler = r_handler.clone();
        let r_next = r_next.clone();
        f.add_with_handler(
          |f, _| f.error("MyError"),
          move |f, err| {
            r_handler.push(format!("inner_handler:{}", err.name()));
            f.success_with(Args::one("Recovered".to_string()))
          },
        )?;
        f.add(move |f, args| {
          r_next.push(format!("next:{}", args.get::<String>(0).unwrap()));
          f.success()
        })?;
        Ok(())
      },
      move |f, err| {
        r_outer.push(format!("outer_handler:{}", err.name()));
        f.success()
      },
    )
    .unwrap();

  chain.execute();
  scheduler.run();
  assert_eq!(rec.entries(), vec!["inner_handler:MyError", "next:Recovered"]);
  assert!(unhandled.lock().is_empty());
}

#[test]
fn test_handlers_not_called_on_success() {
  setup_tracing();
  let (chain, scheduler) = manual_chain();
  let rec = Recorder::new();

  let r = rec.clone();
  chain
    .add_with_handler(
      |f, _| {
        f.add(|f, _| f.success())?;
        Ok(())
      },
      move |f, _err| {
        r.push("handler");
        f.success()
      },
    )
    .unwrap();

  chain.execute();
  scheduler.run();
  assert!(rec.entries().is_empty());
}

#[test]
fn test_nested_handlers_replace_error_on_the_way_down() {
  setup_tracing();
  let (chain, scheduler, unhandled) = observed_chain();
  let rec = Recorder::new();

  let r_body = rec.clone();
  let r_root = rec.clone();
  chain
    .add_with_handler(
      move |f, _| {
        let r_mid = r_body.clone();
        let r_leaf = r_body.clone();
        f.add_with_handler(
          move |f, _| {
            let r = r_leaf.clone();
            f.add(move |f, _| {
              r.push("leaf");
              f.error("E1")
            })?;
            Ok(())
          },
          move |f, err| {
            r_mid.push(format!("mid:{}", err.name()));
            f.error("E2")
          },
        )?;
        Ok(())
      },
      move |f, err| {
        r_root.push(format!("root:{}", err.name()));
        f.success()
      },
    )
    .unwrap();
  let r = rec.clone();
  chain
    .add(move |f, _| {
      r.push("after");
      f.success()
    })
    .unwrap();

  chain.execute();
  scheduler.run();
  assert_eq!(rec.entries(), vec!["leaf", "mid:E1", "root:E2", "after"]);
  assert!(unhandled.lock().is_empty());
}

#[test]
fn test_handler_returning_err_replaces_error() {
  setup_tracing();
  let (chain, scheduler, unhandled) = observed_chain();

  chain
    .add_with_handler(|f, _| f.error("Original"), |_f, _err| Err(StepError::new("Replaced")))
    .unwrap();

  chain.execute();
  scheduler.run();
  let errors = unhandled.lock();
  assert_eq!(errors.len(), 1);
  assert_eq!(errors[0].name(), "Replaced");
}

#[test]
fn test_handler_doing_nothing_passes_error_on() {
  setup_tracing();
  let (chain, scheduler) = manual_chain();
  let rec = Recorder::new();

  let r_inner = rec.clone();
  let r_outer = rec.clone();
  chain
    .add_with_handler(
      move |f, _| {
        let r = r_inner.clone();
        f.add_with_handler(
          |f, _| f.error_with_info("Io", "disk full"),
          move |_f, err| {
            r.push(format!("inner_saw:{err}"));
            Ok(())
          },
        )?;
        Ok(())
      },
      move |f, err| {
        r_outer.push(format!("outer_saw:{err}"));
        f.success()
      },
    )
    .unwrap();

  chain.execute();
  scheduler.run();
  assert_eq!(
    rec.entries(),
    vec!["inner_saw:Io: disk full", "outer_saw:Io: disk full"]
  );
}

#[test]
fn test_cancel_hooks_run_innermost_first_while_unwinding() {
  setup_tracing();
  let (chain, scheduler) = manual_chain();
  let rec = Recorder::new();

  let r = rec.clone();
  chain
    .add_with_handler(
      {
        let r = rec.clone();
        move |f, _| {
          let r_cancel = r.clone();
          f.set_cancel(move |_| r_cancel.push("cancel:outer"))?;
          let r_mid = r.clone();
          f.add(move |f, _| {
            let r_cancel = r_mid.clone();
            f.set_cancel(move |_| r_cancel.push("cancel:mid"))?;
            let r_leaf = r_mid.clone();
            f.add(move |f, _| {
              r_leaf.push("leaf");
              f.error("Boom")
            })?;
            Ok(())
          })?;
          Ok(())
        }
      },
      move |f, err| {
        r.push(format!("handler:{}", err.name()));
        f.success()
      },
    )
    .unwrap();

  chain.execute();
  scheduler.run();
  assert_eq!(
    rec.entries(),
    vec!["leaf", "cancel:mid", "cancel:outer", "handler:Boom"]
  );
}

#[test]
fn test_error_from_add_in_handler_is_rejected() {
  setup_tracing();
  let (chain, scheduler) = manual_chain();
  let rec = Recorder::new();

  let r = rec.clone();
  chain
    .add_with_handler(
      |f, _| f.error("Fail"),
      move |f, _err| {
        let rejected = f.add(|f, _| f.success());
        r.push(format!("add_internal:{}", rejected.unwrap_err().is_internal()));
        f.success()
      },
    )
    .unwrap();

  chain.execute();
  scheduler.run();
  assert_eq!(rec.entries(), vec!["add_internal:true"]);
}

#[test]
fn test_timeout_raises_timeout_error() {
  setup_tracing();
  let (chain, scheduler) = manual_chain();
  let rec = Recorder::new();

  let r = rec.clone();
  chain
    .add_with_handler(
      |f, _| f.set_timeout(Duration::from_millis(50)),
      move |f, err| {
        r.push(format!("handled:{}", err.name()));
        f.success()
      },
    )
    .unwrap();
  let r = rec.clone();
  chain
    .add(move |f, _| {
      r.push("after");
      f.success()
    })
    .unwrap();

  chain.execute();
  scheduler.run();
  assert_eq!(rec.entries(), vec!["handled:Timeout", "after"]);
  assert_eq!(scheduler.now(), Duration::from_millis(50));
}

#[test]
fn test_success_before_timeout_disarms_it() {
  setup_tracing();
  let (chain, scheduler) = manual_chain();
  let rec = Recorder::new();

  let sched = scheduler.clone();
  let r = rec.clone();
  chain
    .add_with_handler(
      move |f, _| {
        f.set_timeout(Duration::from_millis(50))?;
        let frame = f.clone();
        sched.schedule_after(
          Duration::from_millis(10),
          Box::new(move || {
            frame.success().unwrap();
          }),
        );
        Ok(())
      },
      move |f, err| {
        r.push(format!("handled:{}", err.name()));
        f.success()
      },
    )
    .unwrap();

  chain.execute();
  scheduler.run();
  assert!(rec.entries().is_empty());
  assert_eq!(scheduler.now(), Duration::from_millis(10));
  assert_eq!(chain.phase(), ChainPhase::Idle);
}

#[test]
fn test_set_timeout_replaces_previous_timeout() {
  setup_tracing();
  let (chain, scheduler, unhandled) = observed_chain();

  chain
    .add(|f, _| {
      f.set_timeout(Duration::from_millis(10))?;
      f.set_timeout(Duration::from_millis(100))
    })
    .unwrap();

  chain.execute();
  assert_eq!(scheduler.pending_delays(), vec![Duration::from_millis(100)]);
  scheduler.run();
  assert_eq!(scheduler.now(), Duration::from_millis(100));
  assert_eq!(unhandled.lock()[0].name(), "Timeout");
}

#[test]
fn test_timeout_on_outer_frame_cancels_inner_timer() {
  setup_tracing();
  let (chain, scheduler) = manual_chain();
  let rec = Recorder::new();

  let r = rec.clone();
  chain
    .add_with_handler(
      |f, _| {
        f.set_timeout(Duration::from_millis(20))?;
        f.add(|f, _| f.set_timeout(Duration::from_millis(500)))?;
        Ok(())
      },
      move |f, err| {
        r.push(format!("handled:{}", err.name()));
        f.success()
      },
    )
    .unwrap();

  chain.execute();
  scheduler.run();
  assert_eq!(rec.entries(), vec!["handled:Timeout"]);
  assert_eq!(scheduler.now(), Duration::from_millis(20));
  assert!(!scheduler.has_events());
}

#[test]
#[serial]
fn test_cancel_invokes_hook_once_and_rejects_late_completion() {
  setup_tracing();
  reset_counters();
  let (chain, scheduler) = manual_chain();
  let rec = Recorder::new();
  let parked: Arc<Mutex<Option<Frame>>> = Arc::new(Mutex::new(None));

  let slot = Arc::clone(&parked);
  chain
    .add(move |f, _| {
      *slot.lock() = Some(f.clone());
      f.set_cancel(|_| {
        CANCEL_HOOK_CALLS.fetch_add(1, Ordering::SeqCst);
      })
    })
    .unwrap();
  let r = rec.clone();
  chain
    .add(move |f, _| {
      r.push("never");
      f.success()
    })
    .unwrap();

  chain.execute();
  assert_eq!(chain.phase(), ChainPhase::Suspended);

  chain.cancel();
  assert_eq!(CANCEL_HOOK_CALLS.load(Ordering::SeqCst), 1);
  assert_eq!(chain.phase(), ChainPhase::Idle);
  assert_eq!(chain.pending_steps(), 0);

  let frame = parked.lock().take().unwrap();
  assert!(frame.success().unwrap_err().is_internal());

  chain.cancel();
  assert_eq!(CANCEL_HOOK_CALLS.load(Ordering::SeqCst), 1);
  scheduler.run();
  assert!(rec.entries().is_empty());
}

#[test]
fn test_cancel_walks_frames_innermost_first_and_disarms_timers() {
  setup_tracing();
  let (chain, scheduler) = manual_chain();
  let rec = Recorder::new();

  let r = rec.clone();
  chain
    .add(move |f, _| {
      let r_outer = r.clone();
      f.set_cancel(move |_| r_outer.push("cancel:outer"))?;
      let r_inner = r.clone();
      f.add(move |f, _| {
        f.set_timeout(Duration::from_secs(60))?;
        let r_hook = r_inner.clone();
        f.set_cancel(move |frame| r_hook.push(format!("cancel:inner current={}", frame.is_current())))
      })?;
      Ok(())
    })
    .unwrap();

  chain.execute();
  scheduler.next_event();
  assert_eq!(chain.depth(), 2);
  assert_eq!(scheduler.pending(), 1);

  chain.cancel();
  assert_eq!(rec.entries(), vec!["cancel:inner current=false", "cancel:outer"]);
  assert!(!scheduler.has_events());
  assert_eq!(chain.depth(), 0);
}

#[test]
fn test_chain_is_reusable_after_cancel() {
  setup_tracing();
  let (chain, scheduler) = manual_chain();
  let rec = Recorder::new();

  chain.add(|f, _| f.set_cancel(|_| {})).unwrap();
  chain.execute();
  chain.cancel();

  let r = rec.clone();
  chain
    .add(move |f, _| {
      r.push("fresh");
      f.success()
    })
    .unwrap();
  chain.execute();
  scheduler.run();
  assert_eq!(rec.entries(), vec!["fresh"]);
}

#[test]
fn test_cancel_from_inside_a_handler_stops_unwinding() {
  setup_tracing();
  let (chain, scheduler, unhandled) = observed_chain();
  let rec = Recorder::new();

  let root = chain.clone();
  let r = rec.clone();
  chain
    .add_with_handler(
      |f, _| f.error("Outer"),
      move |_f, err| {
        r.push(format!("handler:{}", err.name()));
        root.cancel();
        Ok(())
      },
    )
    .unwrap();

  chain.execute();
  scheduler.run();
  assert_eq!(rec.entries(), vec!["handler:Outer"]);
  assert!(unhandled.lock().is_empty());
  assert_eq!(chain.phase(), ChainPhase::Idle);
}
