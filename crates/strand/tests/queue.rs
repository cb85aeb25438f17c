// SPDX-License-Identifier: (MIT OR Apache-2.0)

//! Integration tests for `Queue`: capacity, completion counting and
//! cancellation.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use strand::{Error, Queue};

#[test]
fn second_put_blocks_until_get() {
    strand::run(|| {
        let q = Queue::with_maxsize(1);
        q.put(1)?;

        let second_done = Arc::new(AtomicBool::new(false));
        let producer = {
            let (q, done) = (q.clone(), second_done.clone());
            strand::spawn(move || {
                q.put(2)?;
                done.store(true, Ordering::SeqCst);
                Ok(())
            })?
        };

        strand::sleep(Duration::from_millis(50))?;
        assert!(!second_done.load(Ordering::SeqCst));
        assert!(q.full());

        assert_eq!(q.get()?, 1);
        producer.join()?;
        assert!(second_done.load(Ordering::SeqCst));
        assert_eq!(q.get()?, 2);
        Ok(())
    })
    .unwrap();
}

#[test]
fn join_waits_for_every_task_done() {
    strand::run(|| {
        let q = Queue::new();
        let processed = Arc::new(AtomicUsize::new(0));
        for item in 0..5 {
            q.put(item)?;
        }

        let consumer = {
            let (q, processed) = (q.clone(), processed.clone());
            strand::spawn(move || -> strand::Result<()> {
                loop {
                    let _item = q.get()?;
                    strand::sleep(Duration::from_millis(5))?;
                    processed.fetch_add(1, Ordering::SeqCst);
                    q.task_done();
                }
            })?
        };

        q.join()?;
        assert_eq!(processed.load(Ordering::SeqCst), 5);
        consumer.cancel()?;
        assert!(matches!(
            consumer.join(),
            Err(Error::TaskCancelled { .. })
        ));
        Ok(())
    })
    .unwrap();
}

#[test]
fn cancelled_get_consumes_nothing() {
    strand::run(|| {
        let q = Queue::new();
        let getter = {
            let q = q.clone();
            strand::spawn(move || q.get())?
        };
        strand::sleep(Duration::from_millis(20))?;
        getter.cancel()?;

        q.put("kept")?;
        assert_eq!(q.qsize(), 1);
        assert_eq!(q.get()?, "kept");
        Ok(())
    })
    .unwrap();
}

#[test]
fn get_times_out_on_empty_queue() {
    strand::run(|| {
        let q = Queue::<u32>::new();
        let err = strand::timeout_after(Duration::from_millis(20), || q.get()).unwrap_err();
        assert!(matches!(err, Error::Timeout { .. }));
        assert!(q.empty());
        Ok(())
    })
    .unwrap();
}
