use std::sync::{Arc, Mutex};

use proptest::prelude::*;
use serde_json::json;

use stackd::deferred::{Deferred, Rejection};
use stackd_test_utils::with_timeout;

// A listener that joins after `join_at` notifications sees exactly the rest,
// in order; nothing sent after settlement reaches anyone.
proptest! {
    #[test]
    fn late_listeners_see_exactly_the_suffix(
        payloads in proptest::collection::vec(any::<u16>(), 0..40),
        join_at in 0usize..40,
        extra_after_settle in proptest::collection::vec(any::<u16>(), 0..5),
    ) {
        let join_at = join_at.min(payloads.len());
        let (deferred, settler) = Deferred::<(), u16>::pair();

        let early = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&early);
        deferred.on_progress(move |p| sink.lock().unwrap().push(p));

        for p in &payloads[..join_at] {
            settler.notify(*p);
        }
        let mut late = deferred.progress();
        for p in &payloads[join_at..] {
            settler.notify(*p);
        }
        prop_assert!(settler.resolve(()));
        for p in &extra_after_settle {
            prop_assert!(!settler.notify(*p));
        }

        prop_assert_eq!(early.lock().unwrap().clone(), payloads.clone());
        let mut seen = Vec::new();
        while let Some(p) = late.try_recv() {
            seen.push(p);
        }
        prop_assert_eq!(seen, payloads[join_at..].to_vec());
    }
}

#[tokio::test]
async fn spawned_executor_progress_reaches_listeners_attached_before_it_runs() {
    let deferred = Deferred::<bool, serde_json::Value>::spawn(|settler| async move {
        tokio::task::yield_now().await;
        settler.notify(json!({"finished": 1, "count": 2}));
        settler.notify(json!({"finished": 2, "count": 2}));
        settler.resolve(true);
    });
    let mut progress = deferred.progress();

    assert_eq!(with_timeout(deferred.wait()).await, Ok(true));
    assert_eq!(progress.recv().await, Some(json!({"finished": 1, "count": 2})));
    assert_eq!(progress.recv().await, Some(json!({"finished": 2, "count": 2})));
    assert_eq!(progress.recv().await, None);
}

#[tokio::test]
async fn then_keeps_progress_and_maps_the_outcome() {
    let (deferred, settler) = Deferred::<u32, &'static str>::pair();
    let chained = deferred.then(|outcome| outcome.map(|n| n * 2));
    let mut progress = chained.progress();

    settler.notify("one");
    settler.notify("two");
    settler.resolve(21);

    assert_eq!(with_timeout(chained.wait()).await, Ok(42));
    assert_eq!(progress.recv().await, Some("one"));
    assert_eq!(progress.recv().await, Some("two"));
    assert_eq!(progress.recv().await, None);
}

#[tokio::test]
async fn then_can_turn_a_failure_into_a_value() {
    let chained = Deferred::<u32, ()>::rejected("nope").then(|outcome| match outcome {
        Ok(n) => Ok(n),
        Err(rejection) => Ok(rejection.reason().len() as u32),
    });
    assert_eq!(with_timeout(chained.wait()).await, Ok(4));
}

#[test]
fn empty_reasons_are_replaced() {
    assert!(!Rejection::new("   ").reason().trim().is_empty());
    assert_eq!(Rejection::from("boom").reason(), "boom");
}
